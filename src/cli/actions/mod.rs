mod run;

use crate::config::ProbeConfig;

/// Action enum representing each possible command
#[derive(Debug)]
pub enum Action {
    Probe {
        config: ProbeConfig,
        external_ip_lookup: String,
        debug: bool,
    },
}

impl Action {
    /// Execute the action
    ///
    /// # Errors
    ///
    /// Returns an error if the action fails to execute
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
