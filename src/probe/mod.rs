//! Resolve once, then make a single connect-and-ping attempt
//!
//! [`build`] turns a configuration and a resolved address into a
//! [`ConnectionDescriptor`] without touching the network; [`attempt`] does
//! the I/O. [`ConnectionProbe::run`] ties the steps together.

mod descriptor;

pub use descriptor::{ConnectionDescriptor, ConnectionTarget};

use crate::{
    config::ProbeConfig,
    error::{ProbeError, Result},
    mysql::MySqlConnection,
    resolver::{Resolve, ResolvedAddress},
    tls::{TlsMetadata, TlsPolicy},
};
use std::{fmt, future::Future, time::Duration};
use tokio::time::{Instant, timeout};
use tracing::{debug, info};

pub const SUCCESS_MESSAGE: &str = "successfully connected to database";

/// Upper bound for `COM_QUIT` and stream shutdown after a finished attempt
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Steps of a probe run; each is entered at most once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Idle,
    Resolving,
    Building,
    Connecting,
    Succeeded,
    Failed,
}

impl ProbeState {
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Resolving)
                | (Self::Resolving, Self::Building | Self::Failed)
                | (Self::Building, Self::Connecting)
                | (Self::Connecting, Self::Succeeded | Self::Failed)
        )
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for ProbeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Resolving => "resolving",
            Self::Building => "building",
            Self::Connecting => "connecting",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of a probe run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    passed: bool,
    message: String,
    resolved_address: Option<ResolvedAddress>,
    connection_string: Option<String>,
    server_version: Option<String>,
    tls: Option<TlsMetadata>,
    elapsed: Duration,
}

impl ProbeOutcome {
    fn failed(message: String) -> Self {
        Self {
            passed: false,
            message,
            resolved_address: None,
            connection_string: None,
            server_version: None,
            tls: None,
            elapsed: Duration::ZERO,
        }
    }

    #[must_use]
    pub const fn passed(&self) -> bool {
        self.passed
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub const fn resolved_address(&self) -> Option<&ResolvedAddress> {
        self.resolved_address.as_ref()
    }

    /// Connection string with the password masked
    #[must_use]
    pub fn connection_string(&self) -> Option<&str> {
        self.connection_string.as_deref()
    }

    #[must_use]
    pub fn server_version(&self) -> Option<&str> {
        self.server_version.as_deref()
    }

    #[must_use]
    pub const fn tls(&self) -> Option<&TlsMetadata> {
        self.tls.as_ref()
    }

    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// Describe the connection to make; no I/O happens here
#[must_use]
pub fn build(config: &ProbeConfig, resolved: &ResolvedAddress) -> ConnectionDescriptor {
    let tls = config.tls_ca().map(|bundle| {
        TlsPolicy::new(
            config.host(),
            !config.verify_server_cert(),
            bundle.clone(),
        )
    });

    ConnectionDescriptor {
        user: config.user().to_string(),
        password: config.password().to_string(),
        database: config.database().to_string(),
        resolved: *resolved,
        target: ConnectionTarget::new(resolved, config.port()),
        connect_timeout: config.connect_timeout(),
        tls,
    }
}

/// What a successful attempt learned about the server
struct Session {
    server_version: String,
    tls: Option<TlsMetadata>,
}

/// Open one connection, log in and ping, bounded by the connect timeout
///
/// Never fails: errors become a failed outcome.
pub async fn attempt(descriptor: &ConnectionDescriptor) -> ProbeOutcome {
    let started = Instant::now();
    let limit = descriptor.connect_timeout();

    let result = match timeout(limit, connect_and_ping(descriptor)).await {
        Ok(Ok((session, conn))) => {
            close_within(CLOSE_TIMEOUT, conn.close()).await;
            Ok(session)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(ProbeError::Timeout(limit)),
    };

    let mut outcome = match result {
        Ok(session) => ProbeOutcome {
            passed: true,
            message: SUCCESS_MESSAGE.to_string(),
            resolved_address: None,
            connection_string: None,
            server_version: Some(session.server_version),
            tls: session.tls,
            elapsed: Duration::ZERO,
        },
        Err(e) => {
            debug!("attempt failed: {e:?}");
            ProbeOutcome::failed(format!("error connecting: {e}"))
        }
    };

    outcome.resolved_address = Some(*descriptor.resolved());
    outcome.connection_string = Some(descriptor.redacted_connection_string());
    outcome.elapsed = started.elapsed();
    outcome
}

async fn connect_and_ping(
    descriptor: &ConnectionDescriptor,
) -> Result<(Session, MySqlConnection)> {
    let mut conn = MySqlConnection::connect(descriptor).await?;
    conn.ping().await?;

    let session = Session {
        server_version: conn.server_version().to_string(),
        tls: conn.tls_metadata().cloned(),
    };

    Ok((session, conn))
}

/// Run the close handshake, giving up after `limit`
///
/// The attempt has already been decided; a slow close only gets logged.
async fn close_within(limit: Duration, close: impl Future<Output = ()>) {
    if timeout(limit, close).await.is_err() {
        debug!("closing the connection timed out after {limit:?}");
    }
}

/// Drives one probe through its states
#[derive(Debug)]
pub struct ConnectionProbe {
    config: ProbeConfig,
    state: ProbeState,
}

impl ConnectionProbe {
    #[must_use]
    pub const fn new(config: ProbeConfig) -> Self {
        Self {
            config,
            state: ProbeState::Idle,
        }
    }

    #[must_use]
    pub const fn state(&self) -> ProbeState {
        self.state
    }

    #[must_use]
    pub const fn config(&self) -> &ProbeConfig {
        &self.config
    }

    fn transition(&mut self, next: ProbeState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid probe transition {} -> {next}",
            self.state
        );
        debug!(from = %self.state, to = %next, "probe state");
        self.state = next;
    }

    /// Resolve the host, build the descriptor and make the attempt
    ///
    /// A probe runs once; calling this again returns a failed outcome.
    pub async fn run<R: Resolve>(&mut self, resolver: &R) -> ProbeOutcome {
        if self.state != ProbeState::Idle {
            return ProbeOutcome::failed(format!("probe already {}", self.state));
        }

        let started = Instant::now();

        self.transition(ProbeState::Resolving);
        let limit = self.config.connect_timeout();
        let resolution = timeout(limit, resolver.resolve(self.config.host()))
            .await
            .unwrap_or_else(|_| {
                Err(ProbeError::Resolution {
                    host: self.config.host().to_string(),
                    reason: ProbeError::Timeout(limit).to_string(),
                })
            });
        let resolved = match resolution {
            Ok(resolved) => resolved,
            Err(e) => {
                self.transition(ProbeState::Failed);
                let mut outcome = ProbeOutcome::failed(e.to_string());
                outcome.elapsed = started.elapsed();
                return outcome;
            }
        };

        self.transition(ProbeState::Building);
        let descriptor = build(&self.config, &resolved);

        self.transition(ProbeState::Connecting);
        info!(address = %descriptor.target(), tls = descriptor.tls().is_some(), "connecting");
        let mut outcome = attempt(&descriptor).await;

        self.transition(if outcome.passed {
            ProbeState::Succeeded
        } else {
            ProbeState::Failed
        });

        outcome.elapsed = started.elapsed();
        outcome
    }
}
