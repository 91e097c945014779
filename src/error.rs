use std::time::Duration;

/// Errors produced while probing a database
///
/// Only `Configuration` is fatal to the process; every other variant ends up
/// in the reported outcome.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("error resolving {host}: {reason}")]
    Resolution { host: String, reason: String },

    #[error(transparent)]
    Connection(#[from] crate::mysql::Error),

    #[error("i/o timeout after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("looking up external IP: {0}")]
    DiagnosticLookup(String),
}

pub type Result<T, E = ProbeError> = std::result::Result<T, E>;
