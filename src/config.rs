//! Validated probe settings

use crate::{
    error::{ProbeError, Result},
    tls::CaBundle,
};
use serde::{Serialize, Serializer};
use std::{fmt, path::PathBuf, time::Duration};

pub const DEFAULT_PORT: u16 = 3306;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for one probe run, immutable once built
///
/// Serializes with the password redacted so it can be echoed in the report.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct ProbeConfig {
    host: String,
    port: u16,
    user: String,
    #[serde(serialize_with = "redact")]
    password: String,
    database: String,
    #[serde(rename = "ssl_ca", serialize_with = "ca_path")]
    tls_ca: Option<CaBundle>,
    #[serde(rename = "ssl_verify_server_cert")]
    verify_server_cert: bool,
    #[serde(rename = "connect_timeout_secs", serialize_with = "seconds")]
    connect_timeout: Duration,
}

fn redact<S: Serializer>(password: &str, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&redacted(password))
}

#[allow(clippy::ref_option)]
fn ca_path<S: Serializer>(
    bundle: &Option<CaBundle>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match bundle {
        Some(bundle) => serializer.serialize_some(&bundle.path().display().to_string()),
        None => serializer.serialize_none(),
    }
}

fn seconds<S: Serializer>(d: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(d.as_secs_f64())
}

/// Stand-in shown wherever a password would be printed
#[must_use]
pub fn redacted(password: &str) -> String {
    if password.is_empty() {
        String::new()
    } else {
        "****".to_string()
    }
}

impl fmt::Debug for ProbeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &redacted(&self.password))
            .field("database", &self.database)
            .field("tls_ca", &self.tls_ca.as_ref().map(CaBundle::path))
            .field("verify_server_cert", &self.verify_server_cert)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl ProbeConfig {
    #[must_use]
    pub fn builder() -> ProbeConfigBuilder {
        ProbeConfigBuilder::default()
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    #[must_use]
    pub const fn tls_ca(&self) -> Option<&CaBundle> {
        self.tls_ca.as_ref()
    }

    #[must_use]
    pub const fn verify_server_cert(&self) -> bool {
        self.verify_server_cert
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

/// Builder for [`ProbeConfig`]
#[derive(Debug, Clone)]
pub struct ProbeConfigBuilder {
    host: Option<String>,
    port: u16,
    user: Option<String>,
    password: Option<String>,
    database: Option<String>,
    ssl_ca: Option<PathBuf>,
    verify_server_cert: bool,
    connect_timeout: Duration,
}

impl Default for ProbeConfigBuilder {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            user: None,
            password: None,
            database: None,
            ssl_ca: None,
            verify_server_cert: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ProbeConfigBuilder {
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// CA file in PEM format; enables TLS
    #[must_use]
    pub fn ssl_ca(mut self, path: impl Into<PathBuf>) -> Self {
        self.ssl_ca = Some(path.into());
        self
    }

    /// Check the server certificate against the hostname
    #[must_use]
    pub const fn verify_server_cert(mut self, verify: bool) -> Self {
        self.verify_server_cert = verify;
        self
    }

    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Validate and freeze the settings, reading the CA bundle if one was given
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a required field is missing or empty,
    /// the port or timeout is zero, or the CA file is unusable
    pub fn build(self) -> Result<ProbeConfig> {
        let host = required("host", self.host)?;
        let user = required("user", self.user)?;
        let password = required("password", self.password)?;
        let database = required("database", self.database)?;

        if self.port == 0 {
            return Err(ProbeError::Configuration(
                "port must be between 1 and 65535".to_string(),
            ));
        }

        if self.connect_timeout.is_zero() {
            return Err(ProbeError::Configuration(
                "connect timeout must be greater than zero".to_string(),
            ));
        }

        let tls_ca = self.ssl_ca.map(CaBundle::load).transpose()?;

        Ok(ProbeConfig {
            host,
            port: self.port,
            user,
            password,
            database,
            tls_ca,
            verify_server_cert: self.verify_server_cert,
            connect_timeout: self.connect_timeout,
        })
    }
}

fn required(field: &str, value: Option<String>) -> Result<String> {
    match value {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ProbeError::Configuration(format!("{field} is required"))),
    }
}
