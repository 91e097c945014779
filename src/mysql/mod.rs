//! Just enough of the MySQL client protocol to log in and ping
//!
//! The connection dials a socket address it is handed and, when asked for
//! TLS, verifies the server against a separately supplied name.

pub mod auth;
pub mod conn;
pub mod handshake;
pub mod packet;

pub use auth::AuthPlugin;
pub use conn::MySqlConnection;
pub use handshake::Handshake;

/// Errors raised by the MySQL client
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error(
        "Error {code}{}: {message}",
        .state.as_ref().map(|s| format!(" ({s})")).unwrap_or_default()
    )]
    Server {
        code: u16,
        state: Option<String>,
        message: String,
    },

    #[error("TLS handshake failed: {0}")]
    Tls(std::io::Error),

    #[error("TLS setup failed: {0}")]
    TlsSetup(String),

    #[error("server does not support TLS")]
    TlsUnsupported,

    #[error("malformed packet: {0}")]
    Protocol(String),

    #[error("unsupported authentication plugin: {0}")]
    UnsupportedAuthPlugin(String),

    #[error("{0}")]
    Auth(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_display_with_state() {
        let err = Error::Server {
            code: 1049,
            state: Some("42000".to_string()),
            message: "Unknown database 'nope'".to_string(),
        };
        assert_eq!(err.to_string(), "Error 1049 (42000): Unknown database 'nope'");
    }

    #[test]
    fn test_server_error_display_without_state() {
        let err = Error::Server {
            code: 1040,
            state: None,
            message: "Too many connections".to_string(),
        };
        assert_eq!(err.to_string(), "Error 1040: Too many connections");
    }

    #[test]
    fn test_io_error_display() {
        let err: Error =
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused").into();
        assert_eq!(err.to_string(), "connection refused");
    }
}
