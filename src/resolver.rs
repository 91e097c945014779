//! Hostname resolution, done once and up front
//!
//! The probe dials the address returned here, never the hostname itself, so
//! the name is only used again for TLS identity checks.

use crate::error::{ProbeError, Result};
use serde::Serialize;
use std::{
    future::Future,
    net::{IpAddr, SocketAddr, SocketAddrV6},
};
use tokio::net::lookup_host;
use tracing::debug;

/// An address obtained from a single lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedAddress {
    ip: IpAddr,
    is_ipv6: bool,
    #[serde(skip_serializing_if = "is_zero")]
    scope_id: u32,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl ResolvedAddress {
    #[must_use]
    pub const fn new(ip: IpAddr) -> Self {
        Self {
            ip,
            is_ipv6: ip.is_ipv6(),
            scope_id: 0,
        }
    }

    /// Keep the IPv6 zone so link-local addresses stay dialable
    #[must_use]
    pub const fn with_scope_id(mut self, scope_id: u32) -> Self {
        if self.is_ipv6 {
            self.scope_id = scope_id;
        }
        self
    }

    #[must_use]
    pub const fn ip(&self) -> IpAddr {
        self.ip
    }

    #[must_use]
    pub const fn is_ipv6(&self) -> bool {
        self.is_ipv6
    }

    #[must_use]
    pub const fn scope_id(&self) -> u32 {
        self.scope_id
    }

    /// Socket address to dial, zone included
    #[must_use]
    pub const fn socket_addr(&self, port: u16) -> SocketAddr {
        match self.ip {
            IpAddr::V6(ip) => SocketAddr::V6(SocketAddrV6::new(ip, port, 0, self.scope_id)),
            IpAddr::V4(_) => SocketAddr::new(self.ip, port),
        }
    }
}

impl From<SocketAddr> for ResolvedAddress {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Self::new(IpAddr::V4(*v4.ip())),
            SocketAddr::V6(v6) => Self::new(IpAddr::V6(*v6.ip())).with_scope_id(v6.scope_id()),
        }
    }
}

/// Literal used inside a connection target: IPv6 goes in brackets
#[must_use]
pub fn format(addr: &ResolvedAddress) -> String {
    if addr.is_ipv6() {
        format!("[{}]", addr.ip)
    } else {
        addr.ip.to_string()
    }
}

/// Name resolution seam used by the probe
pub trait Resolve {
    /// Resolve `host` to exactly one address
    fn resolve(&self, host: &str) -> impl Future<Output = Result<ResolvedAddress>> + Send;
}

/// Resolver backed by the operating system (`getaddrinfo`)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    fn resolve(&self, host: &str) -> impl Future<Output = Result<ResolvedAddress>> + Send {
        async move {
            if host.is_empty() {
                return Err(ProbeError::Resolution {
                    host: String::new(),
                    reason: "empty hostname".to_string(),
                });
            }

            // literal addresses never hit the resolver
            if let Ok(ip) = host.parse::<IpAddr>() {
                return Ok(ResolvedAddress::new(ip));
            }

            let mut addrs = lookup_host((host, 0))
                .await
                .map_err(|e| ProbeError::Resolution {
                    host: host.to_string(),
                    reason: e.to_string(),
                })?;

            let first = addrs.next().ok_or_else(|| ProbeError::Resolution {
                host: host.to_string(),
                reason: "no addresses returned".to_string(),
            })?;

            let resolved = ResolvedAddress::from(first);
            debug!(host, address = %resolved.ip(), "resolved hostname");

            Ok(resolved)
        }
    }
}
