//! Command-line interface definitions for the `ephemera` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page. It
//! must not depend on library types for that reason.

use clap::{Args, Parser};

/// Top-level CLI for the `ephemera` binary.
#[derive(Debug, Parser)]
#[command(
    name = "ephemera",
    about = "Provision self-terminating Minecraft servers on Scaleway",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Provision a server and wait until it runs.
    #[command(name = "provision", about = "Provision a server and wait until it runs")]
    Provision(ProvisionCommand),
    /// Print the current details of an instance.
    #[command(name = "describe", about = "Print the current details of an instance")]
    Describe(InstanceCommand),
    /// List every instance in the configured project and zone.
    #[command(name = "list", about = "List instances in the configured project and zone")]
    List,
    /// Power an instance off without deleting it.
    #[command(name = "stop", about = "Power an instance off without deleting it")]
    Stop(InstanceCommand),
}

/// Arguments for `ephemera provision`.
///
/// Flags override values read from `--request`.
#[derive(Debug, Parser)]
pub(crate) struct ProvisionCommand {
    /// Accept the Minecraft EULA (<https://aka.ms/MinecraftEULA>). Required.
    #[arg(long)]
    pub(crate) accept_eula: bool,
    /// Read the request from a JSON file.
    #[arg(long, value_name = "PATH")]
    pub(crate) request: Option<String>,
    /// Server distribution (VANILLA, PAPER, SPIGOT, FORGE, FABRIC, PURPUR).
    #[arg(long, value_name = "KIND")]
    pub(crate) kind: Option<String>,
    /// Game version, or LATEST.
    #[arg(long = "game-version", value_name = "VERSION")]
    pub(crate) version: Option<String>,
    /// Instance name; generated when omitted.
    #[arg(long, value_name = "NAME")]
    pub(crate) name: Option<String>,
    /// Override the Scaleway commercial type for this server.
    #[arg(long, value_name = "TYPE")]
    pub(crate) instance_type: Option<String>,
    /// Public SSH key allowed to log in.
    #[arg(long, value_name = "KEY")]
    pub(crate) ssh_key: Option<String>,
    #[command(flatten)]
    pub(crate) game: GameSettings,
}

/// Game settings passed to the container.
#[derive(Debug, Args)]
pub(crate) struct GameSettings {
    /// JVM heap size, for example 3G.
    #[arg(long, value_name = "SIZE")]
    pub(crate) memory: Option<String>,
    /// Message of the day.
    #[arg(long, value_name = "TEXT")]
    pub(crate) motd: Option<String>,
    /// Player cap.
    #[arg(long, value_name = "COUNT")]
    pub(crate) max_players: Option<u32>,
    /// Game mode (survival, creative, adventure, spectator).
    #[arg(long, value_name = "MODE")]
    pub(crate) gamemode: Option<String>,
    /// Difficulty (peaceful, easy, normal, hard).
    #[arg(long, value_name = "LEVEL")]
    pub(crate) difficulty: Option<String>,
    /// World seed.
    #[arg(long, value_name = "SEED", allow_hyphen_values = true)]
    pub(crate) seed: Option<String>,
    /// World directory name.
    #[arg(long, value_name = "NAME")]
    pub(crate) level_name: Option<String>,
    /// Modpack archive URL.
    #[arg(long, value_name = "URL")]
    pub(crate) modpack_url: Option<String>,
    /// Plugin jar URL; repeat for several plugins.
    #[arg(long = "plugin-url", value_name = "URL")]
    pub(crate) plugin_urls: Vec<String>,
    /// Disable player-versus-player combat.
    #[arg(long)]
    pub(crate) no_pvp: bool,
    /// Skip account authentication.
    #[arg(long)]
    pub(crate) offline_mode: bool,
    /// Enable command blocks.
    #[arg(long)]
    pub(crate) command_blocks: bool,
}

/// Arguments naming a single instance.
#[derive(Debug, Parser)]
pub(crate) struct InstanceCommand {
    /// Instance identifier.
    #[arg(value_name = "INSTANCE_ID")]
    pub(crate) instance_id: String,
}
