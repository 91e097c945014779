//! One-shot MySQL connectivity probe
//!
//! The host is resolved once and the connection dials that address, while TLS
//! certificates are still checked against the hostname ("pre-resolved" TLS).

pub mod cli;
pub mod config;
pub mod error;
pub mod external_ip;
pub mod mysql;
pub mod probe;
pub mod report;
pub mod resolver;
pub mod tls;
