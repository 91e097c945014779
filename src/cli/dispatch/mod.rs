use crate::{cli::actions::Action, config::ProbeConfig};
use anyhow::{Context, Result};
use clap::ArgMatches;
use std::time::Duration;

/// Convert `ArgMatches` into typed Action enum with validation
///
/// # Errors
///
/// Returns an error if a required argument is missing or the configuration is invalid
pub fn dispatch(matches: &ArgMatches) -> Result<Action> {
    let host = matches
        .get_one::<String>("host")
        .context("host is required")?;

    let user = matches
        .get_one::<String>("user")
        .context("user is required")?;

    let password = matches
        .get_one::<String>("password")
        .context("password is required")?;

    let database = matches
        .get_one::<String>("dbname")
        .context("database name is required")?;

    // Extract port with default
    let port = matches.get_one::<u16>("port").copied().unwrap_or(3306);

    let connect_timeout = matches
        .get_one::<u64>("connect-timeout")
        .copied()
        .map_or(crate::config::DEFAULT_CONNECT_TIMEOUT, Duration::from_secs);

    let mut builder = ProbeConfig::builder()
        .host(host)
        .port(port)
        .user(user)
        .password(password)
        .database(database)
        .verify_server_cert(matches.get_flag("ssl-verify-server-cert"))
        .connect_timeout(connect_timeout);

    if let Some(ca) = matches.get_one::<String>("ssl-ca")
        && !ca.is_empty()
    {
        builder = builder.ssl_ca(ca);
    }

    let config = builder.build().context("Failed to build probe configuration")?;

    let external_ip_lookup = matches
        .get_one::<String>("external-ip-lookup")
        .cloned()
        .unwrap_or_default();

    Ok(Action::Probe {
        config,
        external_ip_lookup,
        debug: debug_enabled(matches),
    })
}

/// Whether debug logging was requested
#[must_use]
pub fn debug_enabled(matches: &ArgMatches) -> bool {
    matches.get_flag("debug")
}
