//! TLS for connections that dial a pre-resolved address
//!
//! # Module Organization
//!
//! - `config` - the `pre-resolved` TLS policy and CA bundle
//! - `connector` - rustls connector keyed by the original hostname
//! - `metadata` - negotiated session and certificate details
//! - `verifier` - certificate verifier that records what it saw

pub mod config;
pub mod connector;
pub mod metadata;
pub mod verifier;

pub use config::{CaBundle, PRE_RESOLVED, TlsPolicy};
pub use connector::{build_connector, ensure_crypto_provider, server_name_from_host, session_metadata};
pub use metadata::TlsMetadata;
pub use verifier::{CapturedCertMetadata, CertCapturingVerifier};
