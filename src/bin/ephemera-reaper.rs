//! In-instance reaper for ephemera servers.
//!
//! Installed by the boot script as a systemd service. It watches the workload
//! container and terminates the instance it runs on once the workload has
//! exited or stayed idle for the configured delay. Configuration comes from
//! the environment file written at boot (`SCW_*` and `REAPER_*`).

use std::process::ExitCode;

use ephemera::reaper::IdentityError;
use ephemera::{
    ConfigError, DockerActivitySource, MetadataIdentity, Reaper, ReaperError,
    ReaperRuntimeConfig, ScalewayConfig, ScalewayProvider, ScalewayProviderError,
};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
enum ReaperBinError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("provider error: {0}")]
    Provider(#[from] ScalewayProviderError),
    #[error("metadata client error: {0}")]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Reaper(#[from] ReaperError),
}

#[tokio::main]
async fn main() -> ExitCode {
    ephemera::telemetry::init();
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "reaper stopped without terminating the instance");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), ReaperBinError> {
    let runtime = ReaperRuntimeConfig::load_without_cli_args()?;
    runtime.validate()?;
    let scaleway = ScalewayConfig::load_without_cli_args()?;

    let provider = ScalewayProvider::new(scaleway)?;
    let activity = DockerActivitySource::new(runtime.container.clone());
    let identity = MetadataIdentity::new()?;
    let config = runtime.reaper_config();
    info!(
        container = %runtime.container,
        shutdown_delay_secs = config.shutdown_delay.as_secs(),
        tick_secs = config.tick.as_secs(),
        "reaper starting"
    );

    let reason = Reaper::new(provider, activity, identity, config).run().await?;
    info!(reason = ?reason, "reaper finished");
    Ok(())
}
