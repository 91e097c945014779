use crate::error::{ProbeError, Result};
use rustls::{RootCertStore, pki_types::CertificateDer};
use rustls_pemfile::certs;
use std::{
    io::Cursor,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Name the policy is advertised under in the connection string
pub const PRE_RESOLVED: &str = "pre-resolved";

/// CA certificates in PEM format, read once while building the configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaBundle {
    path: PathBuf,
    pem: Arc<[u8]>,
}

impl CaBundle {
    /// Read and check a PEM bundle
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file cannot be read or holds no certificate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let pem = std::fs::read(path).map_err(|e| {
            ProbeError::Configuration(format!("failed to read CA file {}: {e}", path.display()))
        })?;

        Self::from_pem(path, pem)
    }

    /// Wrap PEM bytes that were obtained elsewhere
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the bytes hold no certificate
    pub fn from_pem(path: impl Into<PathBuf>, pem: impl Into<Arc<[u8]>>) -> Result<Self> {
        let bundle = Self {
            path: path.into(),
            pem: pem.into(),
        };
        bundle.certificates()?;
        Ok(bundle)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn pem(&self) -> &[u8] {
        &self.pem
    }

    /// Parse every certificate in the bundle
    ///
    /// # Errors
    ///
    /// Returns a configuration error on invalid PEM or an empty bundle
    pub fn certificates(&self) -> Result<Vec<CertificateDer<'static>>> {
        let mut reader = Cursor::new(self.pem());
        let parsed = certs(&mut reader)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| {
                ProbeError::Configuration(format!(
                    "invalid certificate PEM in {}: {e}",
                    self.path.display()
                ))
            })?;

        if parsed.is_empty() {
            return Err(ProbeError::Configuration(format!(
                "no certificates found in {}",
                self.path.display()
            )));
        }

        Ok(parsed)
    }

    /// Root store holding the bundle's certificates
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no certificate could be added
    pub fn root_store(&self) -> Result<RootCertStore> {
        let mut store = RootCertStore::empty();
        let (added, _ignored) = store.add_parsable_certificates(self.certificates()?);
        if added == 0 {
            return Err(ProbeError::Configuration(format!(
                "no usable CA certificates in {}",
                self.path.display()
            )));
        }
        Ok(store)
    }
}

/// TLS settings for a connection that dials an IP literal
///
/// The certificate is checked against `server_name`, the hostname the user
/// asked for, never against the dialed address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPolicy {
    server_name: String,
    skip_verification: bool,
    ca_bundle: CaBundle,
}

impl TlsPolicy {
    #[must_use]
    pub fn new(server_name: impl Into<String>, skip_verification: bool, ca_bundle: CaBundle) -> Self {
        Self {
            server_name: server_name.into(),
            skip_verification,
            ca_bundle,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        PRE_RESOLVED
    }

    #[must_use]
    pub fn server_name_for_verification(&self) -> &str {
        &self.server_name
    }

    #[must_use]
    pub const fn skip_verification(&self) -> bool {
        self.skip_verification
    }

    #[must_use]
    pub const fn ca_bundle(&self) -> &CaBundle {
        &self.ca_bundle
    }
}
