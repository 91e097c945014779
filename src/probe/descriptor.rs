use crate::{
    config::redacted,
    resolver::{self, ResolvedAddress},
    tls::TlsPolicy,
};
use std::{collections::BTreeMap, fmt, net::SocketAddr, time::Duration};

/// Address literal and port the connection string points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    literal_address: String,
    port: u16,
}

impl ConnectionTarget {
    #[must_use]
    pub fn new(resolved: &ResolvedAddress, port: u16) -> Self {
        Self {
            literal_address: resolver::format(resolved),
            port,
        }
    }

    /// The formatted address, bracketed when IPv6
    #[must_use]
    pub fn literal_address(&self) -> &str {
        &self.literal_address
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.literal_address, self.port)
    }
}

/// Everything needed to open one connection to a pre-resolved address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub(super) user: String,
    pub(super) password: String,
    pub(super) database: String,
    pub(super) resolved: ResolvedAddress,
    pub(super) target: ConnectionTarget,
    pub(super) connect_timeout: Duration,
    pub(super) tls: Option<TlsPolicy>,
}

impl ConnectionDescriptor {
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
    pub const fn resolved(&self) -> &ResolvedAddress {
        &self.resolved
    }

    #[must_use]
    pub const fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    #[must_use]
    pub const fn tls(&self) -> Option<&TlsPolicy> {
        self.tls.as_ref()
    }

    /// Socket address that gets dialed, IPv6 zone included
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        self.resolved.socket_addr(self.target.port)
    }

    /// Query options, sorted by key
    #[must_use]
    pub fn params(&self) -> BTreeMap<&'static str, String> {
        let mut params = BTreeMap::new();
        params.insert("timeout", format_timeout(self.connect_timeout));
        if let Some(policy) = &self.tls {
            params.insert("tls", policy.name().to_string());
        }
        params
    }

    /// `user:password@tcp(address:port)/database?options`
    #[must_use]
    pub fn connection_string(&self) -> String {
        self.render(&self.password)
    }

    /// Same as [`Self::connection_string`] with the password masked
    #[must_use]
    pub fn redacted_connection_string(&self) -> String {
        self.render(&redacted(&self.password))
    }

    fn render(&self, password: &str) -> String {
        let query = self
            .params()
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&");

        format!(
            "{}:{password}@tcp({})/{}?{query}",
            self.user, self.target, self.database
        )
    }
}

/// `30s`, or milliseconds when the timeout is not a whole number of seconds
fn format_timeout(timeout: Duration) -> String {
    if timeout.subsec_nanos() == 0 {
        format!("{}s", timeout.as_secs())
    } else {
        format!("{}ms", timeout.as_millis())
    }
}
