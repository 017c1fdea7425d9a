//! HTTP surface - axum router over [`Monitor`](crate::monitor::Monitor)
//!
//! | Method | Path | Body / Result |
//! |--------|------|---------------|
//! | GET | `/health` | `{status, service, addresses}` |
//! | GET | `/addresses` | `{count, addresses}` |
//! | POST | `/addresses` | `{address, network}` → `{added}` |
//! | DELETE | `/addresses/:address` | `{removed}` |
//! | GET | `/balance/:address` | `BalanceReport` |
//! | GET | `/status` | address → `AddressStatus` |
//! | GET | `/events?limit=50` | recent `SyncEvent`s |
//! | POST | `/conflict` | `{outpoint \| txid+vout+network, wif, specs}` → `ConflictSet` |

mod routes;

pub use routes::{create_router, create_router_with_name, AppState};

use tracing::info;

use crate::monitor::Monitor;
use crate::runtime::Shutdown;

/// Serve until the shutdown signal fires
pub async fn serve(monitor: Monitor, addr: &str, shutdown: Shutdown) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr, "http_listening");
    axum::serve(listener, create_router(monitor))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
}
