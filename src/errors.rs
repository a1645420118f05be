//! Error types for podlink

use thiserror::Error;

/// Main error type for podlink
///
/// Every variant carries a plain string payload so the terminal outcome of a
/// tunnel lifecycle can be cloned out to each waiting dial caller.
#[derive(Error, Debug, Clone)]
pub enum PodlinkError {
    #[error("unsupported pod address format: {0}")]
    UnsupportedAddress(String),

    #[error("port allocation failed: {0}")]
    PortAllocation(String),

    #[error("failed to establish tunnel: {0}")]
    TunnelEstablishment(String),

    #[error("tunnel terminated: {0}")]
    TunnelTerminated(String),

    #[error("dial canceled: {0}")]
    DialCanceled(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("forwarder error: {0}")]
    Forwarder(String),
}

pub type Result<T> = std::result::Result<T, PodlinkError>;
