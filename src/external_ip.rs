//! Ask a "what is my IP" service where the probe is connecting from

use crate::error::{ProbeError, Result};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_LOOKUP_URL: &str = "http://ifconfig.co/";

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

// ifconfig.co only answers with a bare address to curl-looking clients
const USER_AGENT: &str = "curl/1.2.3";

/// Fetch the caller's public IP as plain text
///
/// # Errors
///
/// Returns a diagnostic error if the request fails, the service answers with
/// a non-success status or an empty body
pub async fn lookup(url: &str) -> Result<String> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(LOOKUP_TIMEOUT)
        .build()
        .map_err(|e| ProbeError::DiagnosticLookup(format!("failed to create HTTP client: {e}")))?;

    let response = client
        .get(url)
        .header("Accept", "text/plain")
        .send()
        .await
        .map_err(|e| ProbeError::DiagnosticLookup(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProbeError::DiagnosticLookup(format!(
            "{url} returned {status}"
        )));
    }

    let body = response
        .text()
        .await
        .map_err(|e| ProbeError::DiagnosticLookup(format!("reading body: {e}")))?;

    let ip = body.trim();
    if ip.is_empty() {
        return Err(ProbeError::DiagnosticLookup(format!(
            "{url} returned an empty body"
        )));
    }

    Ok(ip.to_string())
}

/// [`lookup`] that never fails the run: errors are logged and dropped
///
/// An empty URL disables the lookup.
pub async fn best_effort(url: &str) -> Option<String> {
    if url.is_empty() {
        debug!("external IP lookup disabled");
        return None;
    }

    debug!(url, "looking up external IP");
    match lookup(url).await {
        Ok(ip) => Some(ip),
        Err(e) => {
            warn!("{e}");
            None
        }
    }
}
