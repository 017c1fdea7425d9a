//! HTTP routes over the Monitor

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use bitcoin::{Network, PrivateKey, Txid};
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use tower_http::trace::TraceLayer;

use crate::conflict::{CandidateSpec, OutpointDescriptor};
use crate::core::paths::http;
use crate::error::Error;
use crate::monitor::Monitor;

#[derive(Clone)]
pub struct AppState {
    pub monitor: Monitor,
    pub app_name: String,
}

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn reject(e: Error) -> (StatusCode, Json<Value>) {
    let status = match &e {
        Error::Validation(_) | Error::Usage(_) => StatusCode::BAD_REQUEST,
        Error::InsufficientFunds { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Upstream(_) | Error::Connection(_) => StatusCode::BAD_GATEWAY,
        Error::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"error": e.to_string(), "kind": e.kind()})))
}

fn to_json<T: serde::Serialize>(value: T) -> ApiResult {
    serde_json::to_value(value)
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))))
}

pub fn create_router(monitor: Monitor) -> Router { create_router_with_name(monitor, "rbfwatch") }

pub fn create_router_with_name(monitor: Monitor, app_name: &str) -> Router {
    Router::new()
        .route(http::HEALTH, get(health))
        .route(http::ADDRESSES, get(list_addresses).post(add_address))
        .route(http::ADDRESS, delete(remove_address))
        .route(http::BALANCE, get(balance))
        .route(http::STATUS, get(full_status))
        .route(http::EVENTS, get(events))
        .route(http::CONFLICT, post(conflict))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { monitor, app_name: app_name.to_string() })
}

async fn health(State(s): State<AppState>) -> impl IntoResponse {
    Json(json!({"status": "ok", "service": s.app_name, "addresses": s.monitor.monitored_addresses().len()}))
}

async fn list_addresses(State(s): State<AppState>) -> ApiResult {
    let addresses: Vec<Value> = s
        .monitor
        .monitored_addresses()
        .into_iter()
        .map(|(address, network)| json!({"address": address, "network": network}))
        .collect();
    Ok(Json(json!({"count": addresses.len(), "addresses": addresses})))
}

#[derive(Deserialize)]
struct AddRequest {
    address: String,
    network: Network,
}

async fn add_address(State(s): State<AppState>, Json(req): Json<AddRequest>) -> ApiResult {
    let added = s.monitor.add_monitored_address(&req.address, req.network).await.map_err(reject)?;
    Ok(Json(json!({"address": req.address, "network": req.network, "added": added})))
}

async fn remove_address(State(s): State<AppState>, Path(address): Path<String>) -> ApiResult {
    let removed = s.monitor.remove_monitored_address(&address);
    if !removed {
        return Err((StatusCode::NOT_FOUND, Json(json!({"error": format!("not monitored: {}", address)}))));
    }
    Ok(Json(json!({"address": address, "removed": true})))
}

async fn balance(State(s): State<AppState>, Path(address): Path<String>) -> ApiResult {
    to_json(s.monitor.get_balance(&address).await.map_err(reject)?)
}

async fn full_status(State(s): State<AppState>) -> ApiResult { to_json(s.monitor.get_full_status()) }

#[derive(Deserialize)]
struct EventsQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}
fn default_limit() -> usize { 50 }

async fn events(State(s): State<AppState>, Query(q): Query<EventsQuery>) -> ApiResult {
    let events = s.monitor.recent_events(q.limit);
    Ok(Json(json!({"count": events.len(), "events": events})))
}

/// Either a full descriptor or `txid`/`vout`/`network` to resolve through
/// the indexer
#[derive(Deserialize)]
struct ConflictRequest {
    #[serde(default)]
    outpoint: Option<OutpointDescriptor>,
    #[serde(default)]
    txid: Option<Txid>,
    #[serde(default)]
    vout: Option<u32>,
    #[serde(default)]
    network: Option<Network>,
    wif: String,
    specs: Vec<CandidateSpec>,
}

async fn conflict(State(s): State<AppState>, Json(req): Json<ConflictRequest>) -> ApiResult {
    let key = PrivateKey::from_str(req.wif.trim())
        .map_err(|e| reject(Error::validation(format!("signing key: {}", e))))?;

    let outpoint = match (req.outpoint, req.txid, req.vout, req.network) {
        (Some(descriptor), _, _, _) => descriptor,
        (None, Some(txid), Some(vout), Some(network)) => {
            s.monitor.resolve_outpoint(txid, vout, network).await.map_err(reject)?
        }
        _ => return Err(reject(Error::validation("give either `outpoint` or `txid`, `vout` and `network`"))),
    };

    to_json(s.monitor.build_conflict_set(&outpoint, &key, &req.specs).map_err(reject)?)
}
