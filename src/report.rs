use crate::{
    config::ProbeConfig,
    external_ip,
    probe::{ConnectionProbe, ProbeOutcome},
    resolver::{ResolvedAddress, Resolve},
    tls::TlsMetadata,
};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use tokio::time::Instant;
use tracing::debug;

/// Everything the run was invoked with, echoed in the report
#[derive(Serialize, Debug, Clone)]
pub struct Options {
    #[serde(flatten)]
    pub probe: ProbeConfig,
    pub external_ip_lookup: String,
    pub debug: bool,
}

impl Options {
    #[must_use]
    pub const fn new(probe: ProbeConfig, external_ip_lookup: String, debug: bool) -> Self {
        Self {
            probe,
            external_ip_lookup,
            debug,
        }
    }
}

/// The JSON document printed at the end of a run, pass or fail
#[derive(Serialize, Debug)]
pub struct Report {
    pub version: String,
    pub time: String,
    pub options: Options,
    pub db_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dsn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_addr: Option<ResolvedAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsMetadata>,
    pub runtime_ms: i64,
    pub passed: bool,
    pub message: String,
}

impl Report {
    #[must_use]
    pub fn new(
        options: Options,
        external_ip: Option<String>,
        outcome: &ProbeOutcome,
        runtime_ms: i64,
    ) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            time: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            db_name: options.probe.database().to_string(),
            options,
            dsn: outcome.connection_string().map(ToString::to_string),
            external_ip,
            server_addr: outcome.resolved_address().copied(),
            server_version: outcome.server_version().map(ToString::to_string),
            tls: outcome.tls().cloned(),
            runtime_ms,
            passed: outcome.passed(),
            message: outcome.message().to_string(),
        }
    }

    /// Serialize with 4-space indentation
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        let mut buf = Vec::new();
        let mut serializer = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
        self.serialize(&mut serializer)?;

        // serde_json only writes valid UTF-8
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Look up the external IP, run the probe and collect the report
pub async fn collect<R: Resolve>(options: Options, resolver: &R) -> Report {
    let started = Instant::now();

    let external_ip = external_ip::best_effort(&options.external_ip_lookup).await;

    let mut probe = ConnectionProbe::new(options.probe.clone());
    let outcome = probe.run(resolver).await;
    debug!(state = %probe.state(), passed = outcome.passed(), "probe finished");

    let runtime_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

    Report::new(options, external_ip, &outcome, runtime_ms)
}
