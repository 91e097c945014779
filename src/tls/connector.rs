use super::{CertCapturingVerifier, TlsMetadata, TlsPolicy};
use crate::error::{ProbeError, Result};
use rustls::{ClientConfig, ClientConnection, ProtocolVersion, pki_types::ServerName};
use std::{
    net::IpAddr,
    sync::{Arc, OnceLock},
};
use tokio_rustls::TlsConnector;
use tracing::debug;

static CRYPTO_PROVIDER_INIT: OnceLock<()> = OnceLock::new();

/// Ensure the rustls crypto provider is initialized
///
/// This should be called before any TLS operations. It's safe to call
/// multiple times as initialization only happens once.
pub fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.get_or_init(|| {
        // another component may have installed one already, which is fine
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            debug!("rustls crypto provider already installed");
        }
    });
}

/// Server name presented for SNI and checked against the certificate
///
/// # Errors
///
/// Returns a configuration error if `host` is neither an IP address nor a valid DNS name
pub fn server_name_from_host(host: &str) -> Result<ServerName<'static>> {
    let host = host.trim_end_matches('.');
    host.parse::<IpAddr>().map_or_else(
        |_| {
            ServerName::try_from(host.to_string()).map_err(|_| {
                ProbeError::Configuration(format!("invalid server name for TLS: {host}"))
            })
        },
        |ip| Ok(ServerName::from(ip)),
    )
}

/// Build the connector and the verifier that watches its handshakes
///
/// # Errors
///
/// Returns a configuration error if the CA bundle or server name are unusable
pub fn build_connector(
    policy: &TlsPolicy,
) -> Result<(TlsConnector, ServerName<'static>, CertCapturingVerifier)> {
    ensure_crypto_provider();

    let verifier = if policy.skip_verification() {
        CertCapturingVerifier::skipping_verification()
    } else {
        let roots = policy.ca_bundle().root_store()?;
        CertCapturingVerifier::with_root_certificates(roots)
            .map_err(|e| ProbeError::Configuration(format!("{e:#}")))?
    };

    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier.clone()))
        .with_no_client_auth();

    let server_name = server_name_from_host(policy.server_name_for_verification())?;

    Ok((TlsConnector::from(Arc::new(config)), server_name, verifier))
}

/// Negotiated session details plus whatever the verifier captured
#[must_use]
pub fn session_metadata(
    connection: &ClientConnection,
    verifier: &CertCapturingVerifier,
) -> TlsMetadata {
    let mut metadata: TlsMetadata = verifier.get_captured().unwrap_or_default().into();
    metadata.version = connection.protocol_version().map(protocol_name);
    metadata.cipher = connection
        .negotiated_cipher_suite()
        .map(|suite| format!("{:?}", suite.suite()));
    metadata
}

fn protocol_name(version: ProtocolVersion) -> String {
    match version {
        ProtocolVersion::TLSv1_2 => "TLSv1.2".to_string(),
        ProtocolVersion::TLSv1_3 => "TLSv1.3".to_string(),
        other => format!("{other:?}"),
    }
}
