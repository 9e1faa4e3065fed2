//! Provisioning requests for the containerised game-server workload.
//!
//! A [`WorkloadRequest`] is what a caller submits; every field except the
//! licence flag is optional. [`WorkloadRequest::resolve`] applies the
//! defaults once and yields the immutable [`WorkloadSpec`] the pipeline works
//! from.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

/// Version sentinel selecting the newest release.
pub const LATEST_VERSION: &str = "LATEST";
/// JVM heap handed to the workload when none is requested.
pub const DEFAULT_MEMORY: &str = "3G";
/// Player cap applied when none is requested.
pub const DEFAULT_MAX_PLAYERS: u32 = 10;
/// Game mode applied when none is requested.
pub const DEFAULT_GAMEMODE: &str = "survival";
/// Difficulty applied when none is requested.
pub const DEFAULT_DIFFICULTY: &str = "normal";
/// Message of the day applied when none is requested.
pub const DEFAULT_MOTD: &str = "A server created using ephemera";
/// Prefix of generated server names.
pub const SERVER_NAME_PREFIX: &str = "ephemera";

/// Server distribution run by the container.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum WorkloadKind {
    /// Official server.
    #[default]
    Vanilla,
    /// Paper.
    Paper,
    /// Spigot.
    Spigot,
    /// Forge.
    Forge,
    /// Fabric.
    Fabric,
    /// Purpur.
    Purpur,
}

impl WorkloadKind {
    /// Value understood by the container's `TYPE` variable.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Vanilla => "VANILLA",
            Self::Paper => "PAPER",
            Self::Spigot => "SPIGOT",
            Self::Forge => "FORGE",
            Self::Fabric => "FABRIC",
            Self::Purpur => "PURPUR",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a workload kind is not recognised.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown workload kind `{0}` (expected VANILLA, PAPER, SPIGOT, FORGE, FABRIC or PURPUR)")]
pub struct UnknownWorkloadKind(pub String);

impl FromStr for WorkloadKind {
    type Err = UnknownWorkloadKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "VANILLA" => Ok(Self::Vanilla),
            "PAPER" => Ok(Self::Paper),
            "SPIGOT" => Ok(Self::Spigot),
            "FORGE" => Ok(Self::Forge),
            "FABRIC" => Ok(Self::Fabric),
            "PURPUR" => Ok(Self::Purpur),
            _ => Err(UnknownWorkloadKind(value.to_owned())),
        }
    }
}

impl Serialize for WorkloadKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for WorkloadKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

const fn enabled() -> bool {
    true
}

/// Caller-supplied provisioning request.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct WorkloadRequest {
    /// Server distribution; defaults to VANILLA.
    pub kind: Option<WorkloadKind>,
    /// Game version; defaults to [`LATEST_VERSION`].
    pub version: Option<String>,
    /// Instance name; generated when absent.
    pub server_name: Option<String>,
    /// Commercial instance type overriding the configured default.
    pub instance_type: Option<String>,
    /// JVM heap size, for example `3G`.
    pub memory: Option<String>,
    /// Public SSH key granted access to the instance.
    pub authorized_key: Option<String>,
    /// Message of the day.
    pub motd: Option<String>,
    /// Player cap.
    pub max_players: Option<u32>,
    /// Game mode.
    pub gamemode: Option<String>,
    /// Difficulty.
    pub difficulty: Option<String>,
    /// World seed.
    pub seed: Option<String>,
    /// World directory name.
    pub level_name: Option<String>,
    /// Player-versus-player combat.
    #[serde(default = "enabled")]
    pub pvp: bool,
    /// Account authentication against the game's session servers.
    #[serde(default = "enabled")]
    pub online_mode: bool,
    /// Command blocks.
    pub enable_command_block: bool,
    /// Modpack archive URL.
    pub modpack_url: Option<String>,
    /// Plugin jar URLs.
    pub plugin_urls: Vec<String>,
    /// Whether the caller accepted the workload licence (EULA).
    #[serde(alias = "eula")]
    pub eula_accepted: bool,
}

impl Default for WorkloadRequest {
    fn default() -> Self {
        Self {
            kind: None,
            version: None,
            server_name: None,
            instance_type: None,
            memory: None,
            authorized_key: None,
            motd: None,
            max_players: None,
            gamemode: None,
            difficulty: None,
            seed: None,
            level_name: None,
            pvp: true,
            online_mode: true,
            enable_command_block: false,
            modpack_url: None,
            plugin_urls: Vec::new(),
            eula_accepted: false,
        }
    }
}

/// Deployment-wide values used when a request leaves them unset.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RequestDefaults {
    /// Commercial instance type.
    pub instance_type: String,
}

/// Fully defaulted workload description.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct WorkloadSpec {
    /// Server distribution.
    pub kind: WorkloadKind,
    /// Game version or [`LATEST_VERSION`].
    pub version: String,
    /// Instance name.
    pub server_name: String,
    /// Commercial instance type.
    pub instance_type: String,
    /// JVM heap size.
    pub memory: String,
    /// Public SSH key, if any.
    pub authorized_key: Option<String>,
    /// Message of the day.
    pub motd: String,
    /// Player cap.
    pub max_players: u32,
    /// Game mode.
    pub gamemode: String,
    /// Difficulty.
    pub difficulty: String,
    /// World seed, if any.
    pub seed: Option<String>,
    /// World directory name, if any.
    pub level_name: Option<String>,
    /// Player-versus-player combat.
    pub pvp: bool,
    /// Session-server authentication.
    pub online_mode: bool,
    /// Command blocks.
    pub enable_command_block: bool,
    /// Modpack archive URL, if any.
    pub modpack_url: Option<String>,
    /// Plugin jar URLs; empty entries are dropped.
    pub plugin_urls: Vec<String>,
    /// Licence acceptance carried through for the container's `EULA` flag.
    pub eula_accepted: bool,
}

/// Flattens control characters to spaces and trims; blank values vanish.
///
/// Request values end up as words of a root shell script, so none of them
/// may span lines.
fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|raw| {
            raw.chars()
                .map(|ch| if ch.is_control() { ' ' } else { ch })
                .collect::<String>()
                .trim()
                .to_owned()
        })
        .filter(|trimmed| !trimmed.is_empty())
}

impl WorkloadRequest {
    /// Applies defaults, producing the immutable spec.
    ///
    /// Blank strings count as absent. The world name and seed stay unset
    /// unless supplied so the container chooses its own.
    #[must_use]
    pub fn resolve(self, defaults: &RequestDefaults) -> WorkloadSpec {
        let server_name = non_empty(self.server_name)
            .unwrap_or_else(|| format!("{SERVER_NAME_PREFIX}-{}", Uuid::new_v4().simple()));
        WorkloadSpec {
            kind: self.kind.unwrap_or_default(),
            version: non_empty(self.version).unwrap_or_else(|| String::from(LATEST_VERSION)),
            server_name,
            instance_type: non_empty(self.instance_type)
                .unwrap_or_else(|| defaults.instance_type.clone()),
            memory: non_empty(self.memory).unwrap_or_else(|| String::from(DEFAULT_MEMORY)),
            authorized_key: non_empty(self.authorized_key),
            motd: non_empty(self.motd).unwrap_or_else(|| String::from(DEFAULT_MOTD)),
            max_players: self
                .max_players
                .filter(|players| *players > 0)
                .unwrap_or(DEFAULT_MAX_PLAYERS),
            gamemode: non_empty(self.gamemode).unwrap_or_else(|| String::from(DEFAULT_GAMEMODE)),
            difficulty: non_empty(self.difficulty)
                .unwrap_or_else(|| String::from(DEFAULT_DIFFICULTY)),
            seed: non_empty(self.seed),
            level_name: non_empty(self.level_name),
            pvp: self.pvp,
            online_mode: self.online_mode,
            enable_command_block: self.enable_command_block,
            modpack_url: non_empty(self.modpack_url),
            plugin_urls: self
                .plugin_urls
                .into_iter()
                .filter_map(|url| non_empty(Some(url)))
                .collect(),
            eula_accepted: self.eula_accepted,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn defaults() -> RequestDefaults {
        RequestDefaults {
            instance_type: String::from("DEV1-M"),
        }
    }

    #[test]
    fn empty_request_gets_documented_defaults() {
        let spec = WorkloadRequest::default().resolve(&defaults());

        assert_eq!(spec.kind, WorkloadKind::Vanilla);
        assert_eq!(spec.version, LATEST_VERSION);
        assert_eq!(spec.instance_type, "DEV1-M");
        assert_eq!(spec.memory, "3G");
        assert_eq!(spec.max_players, 10);
        assert_eq!(spec.gamemode, "survival");
        assert_eq!(spec.difficulty, "normal");
        assert_eq!(spec.motd, DEFAULT_MOTD);
        assert!(spec.server_name.starts_with("ephemera-"));
        assert!(spec.seed.is_none());
        assert!(spec.level_name.is_none());
        assert!(spec.pvp && spec.online_mode);
    }

    #[test]
    fn blank_fields_are_treated_as_absent() {
        let request = WorkloadRequest {
            version: Some(String::from("  ")),
            seed: Some(String::new()),
            plugin_urls: vec![String::new(), String::from("https://example.com/a.jar")],
            instance_type: Some(String::from("GP1-S")),
            ..WorkloadRequest::default()
        };

        let spec = request.resolve(&defaults());

        assert_eq!(spec.version, LATEST_VERSION);
        assert!(spec.seed.is_none());
        assert_eq!(spec.plugin_urls, vec![String::from("https://example.com/a.jar")]);
        assert_eq!(spec.instance_type, "GP1-S");
    }

    #[test]
    fn control_characters_are_flattened() {
        let request = WorkloadRequest {
            server_name: Some(String::from("x\ntouch /tmp/owned\n#")),
            version: Some(String::from("1.21\r\n; reboot")),
            motd: Some(String::from("\t\n")),
            ..WorkloadRequest::default()
        };

        let spec = request.resolve(&defaults());

        assert_eq!(spec.server_name, "x touch /tmp/owned #");
        assert_eq!(spec.version, "1.21  ; reboot");
        assert_eq!(spec.motd, DEFAULT_MOTD);
    }

    #[rstest]
    #[case("paper", WorkloadKind::Paper)]
    #[case("FABRIC", WorkloadKind::Fabric)]
    #[case(" Purpur ", WorkloadKind::Purpur)]
    fn parses_kinds_case_insensitively(#[case] raw: &str, #[case] expected: WorkloadKind) {
        assert_eq!(raw.parse::<WorkloadKind>(), Ok(expected));
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = "bedrock".parse::<WorkloadKind>().expect_err("unknown kind");
        assert!(err.to_string().contains("bedrock"));
    }

    #[test]
    fn deserializes_json_request() {
        let request: WorkloadRequest = serde_json::from_str(
            r#"{"kind":"paper","version":"1.21.1","eula":true,"pvp":false,"max_players":4}"#,
        )
        .expect("request should parse");

        assert_eq!(request.kind, Some(WorkloadKind::Paper));
        assert!(request.eula_accepted);
        assert!(!request.pvp);
        assert!(request.online_mode);
        assert_eq!(request.max_players, Some(4));
    }
}
