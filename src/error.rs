//! Error taxonomy shared by the monitor, the indexer clients and the
//! conflict builder.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad address, network, key or candidate spec. Caller's fault, never retried.
    #[error("validation: {0}")]
    Validation(String),

    /// Indexer or network failure. Transient.
    #[error("upstream: {0}")]
    Upstream(String),

    /// Computed output value is non-positive or dust.
    #[error("insufficient funds: input {input_sat} sat, fee {fee_sat} sat ({reason})")]
    InsufficientFunds { input_sat: u64, fee_sat: u64, reason: String },

    /// Push subscription dropped or could not be opened.
    #[error("connection: {0}")]
    Connection(String),

    /// A conflict needs at least two competing spends.
    #[error("usage: {0}")]
    Usage(String),

    #[error("signing: {0}")]
    Signing(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self { Self::Validation(msg.into()) }
    pub fn upstream(msg: impl Into<String>) -> Self { Self::Upstream(msg.into()) }
    pub fn connection(msg: impl Into<String>) -> Self { Self::Connection(msg.into()) }

    /// Upstream and connection failures are retried by the poller and the
    /// subscription backoff; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Upstream(_) | Error::Connection(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::Upstream(_) => "upstream",
            Error::InsufficientFunds { .. } => "insufficient_funds",
            Error::Connection(_) => "connection",
            Error::Usage(_) => "usage",
            Error::Signing(_) => "signing",
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Error::Upstream(format!("decode: {}", e))
        } else {
            Error::Upstream(e.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self { Error::Connection(e.to_string()) }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self { Error::Upstream("timed out".into()) }
}
