//! Binary entry point for the `ephemera` CLI.
//!
//! Results are printed to stdout as JSON; logs and errors go to stderr.

mod cli;

use std::io::{self, Write};
use std::process;

use clap::Parser;
use serde::Serialize;
use thiserror::Error;

use cli::{Cli, GameSettings, InstanceCommand, ProvisionCommand};
use ephemera::{
    BootScriptSynthesizer, FailureKind, InstanceId, PipelineError, ProvisionConfig, Provider,
    ProvisioningPipeline, ScalewayConfig, ScalewayProvider, ScalewayProviderError, WorkloadKind,
    WorkloadRequest,
};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid request: {0}")]
    Request(String),
    #[error("provider error: {0}")]
    Provider(#[from] ScalewayProviderError),
    #[error("provisioning failed at {kind}: {message}")]
    Provision { kind: FailureKind, message: String },
    #[error("instance {0} not found")]
    NotFound(String),
    #[error("failed to write output: {0}")]
    Output(String),
}

impl From<PipelineError<ScalewayProviderError>> for CliError {
    fn from(err: PipelineError<ScalewayProviderError>) -> Self {
        Self::Provision {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Serialize)]
struct StopOutcome<'a> {
    instance_id: &'a str,
    action: &'static str,
}

#[tokio::main]
async fn main() {
    ephemera::telemetry::init();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Provision(command) => provision(command).await,
        Cli::Describe(command) => describe(command).await,
        Cli::List => list().await,
        Cli::Stop(command) => stop(command).await,
    }
}

async fn provision(command: ProvisionCommand) -> Result<(), CliError> {
    let request = build_request(command)?;
    if !request.eula_accepted {
        return Err(PipelineError::<ScalewayProviderError>::LicenseNotAccepted.into());
    }

    let scaleway = load_scaleway_config()?;
    let settings =
        ProvisionConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    settings
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;

    let synthesizer = BootScriptSynthesizer::new(settings.reaper_settings(&scaleway));
    let defaults = scaleway.request_defaults();
    let provider = ScalewayProvider::connect(scaleway).await?;
    let pipeline = ProvisioningPipeline::new(provider, synthesizer, defaults)
        .with_rule_set(settings.rule_set());

    let server = pipeline.provision(request).await?;
    print_json(&server)
}

async fn describe(command: InstanceCommand) -> Result<(), CliError> {
    let provider = ScalewayProvider::new(load_scaleway_config()?)?;
    let id = InstanceId::new(command.instance_id);
    let details = provider
        .describe(&id)
        .await?
        .ok_or_else(|| CliError::NotFound(id.to_string()))?;
    print_json(&details)
}

async fn list() -> Result<(), CliError> {
    let provider = ScalewayProvider::new(load_scaleway_config()?)?;
    let instances = provider.list_all().await?;
    print_json(&instances)
}

async fn stop(command: InstanceCommand) -> Result<(), CliError> {
    let provider = ScalewayProvider::new(load_scaleway_config()?)?;
    let id = InstanceId::new(command.instance_id);
    provider.stop(&id).await?;
    print_json(&StopOutcome {
        instance_id: id.as_str(),
        action: "poweroff",
    })
}

fn load_scaleway_config() -> Result<ScalewayConfig, CliError> {
    ScalewayConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))
}

fn build_request(command: ProvisionCommand) -> Result<WorkloadRequest, CliError> {
    let base = match &command.request {
        Some(path) => read_request(path)?,
        None => WorkloadRequest::default(),
    };
    let kind = command
        .kind
        .as_deref()
        .map(str::parse::<WorkloadKind>)
        .transpose()
        .map_err(|err| CliError::Request(err.to_string()))?;
    let GameSettings {
        memory,
        motd,
        max_players,
        gamemode,
        difficulty,
        seed,
        level_name,
        modpack_url,
        plugin_urls,
        no_pvp,
        offline_mode,
        command_blocks,
    } = command.game;

    Ok(WorkloadRequest {
        kind: kind.or(base.kind),
        version: command.version.or(base.version),
        server_name: command.name.or(base.server_name),
        instance_type: command.instance_type.or(base.instance_type),
        memory: memory.or(base.memory),
        authorized_key: command.ssh_key.or(base.authorized_key),
        motd: motd.or(base.motd),
        max_players: max_players.or(base.max_players),
        gamemode: gamemode.or(base.gamemode),
        difficulty: difficulty.or(base.difficulty),
        seed: seed.or(base.seed),
        level_name: level_name.or(base.level_name),
        pvp: base.pvp && !no_pvp,
        online_mode: base.online_mode && !offline_mode,
        enable_command_block: base.enable_command_block || command_blocks,
        modpack_url: modpack_url.or(base.modpack_url),
        plugin_urls: if plugin_urls.is_empty() {
            base.plugin_urls
        } else {
            plugin_urls
        },
        eula_accepted: base.eula_accepted || command.accept_eula,
    })
}

fn read_request(path: &str) -> Result<WorkloadRequest, CliError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| CliError::Request(format!("cannot read {path}: {err}")))?;
    serde_json::from_str(&raw).map_err(|err| CliError::Request(format!("{path}: {err}")))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let rendered =
        serde_json::to_string_pretty(value).map_err(|err| CliError::Output(err.to_string()))?;
    writeln!(io::stdout(), "{rendered}").map_err(|err| CliError::Output(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod main_tests;
