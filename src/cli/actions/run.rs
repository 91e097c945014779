use crate::{
    cli::actions::Action,
    report::{self, Options},
    resolver::SystemResolver,
};
use anyhow::{Context, Result};

/// Execute the action
///
/// The report goes to stdout whether the probe passed or not.
///
/// # Errors
///
/// Returns an error if the report cannot be serialized
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Probe {
            config,
            external_ip_lookup,
            debug,
        } => {
            let options = Options::new(config, external_ip_lookup, debug);
            let report = report::collect(options, &SystemResolver).await;

            let json = report
                .to_json_pretty()
                .context("Failed to serialize report")?;

            println!("{json}");
        }
    }

    Ok(())
}
