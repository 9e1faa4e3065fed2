//! Container environment derived from a workload spec.

use std::borrow::Cow;
use std::fmt;

use crate::workload::WorkloadSpec;

/// Operator permission level granted to server operators.
const OP_PERMISSION_LEVEL: &str = "2";

/// A single `KEY=VALUE` assignment passed to the workload container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnvAssignment {
    /// Variable name.
    pub key: &'static str,
    /// Unescaped value.
    pub value: String,
}

impl EnvAssignment {
    fn new(key: &'static str, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }

    /// Shell-safe ` -e KEY=VALUE` flag for `docker run`.
    #[must_use]
    pub fn docker_flag(&self) -> String {
        let assignment = self.to_string();
        format!(" -e {}", shell_escape::unix::escape(Cow::Owned(assignment)))
    }
}

impl fmt::Display for EnvAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Maps `spec` to the container's environment.
///
/// The seed, world name, modpack and plugin assignments appear only when the
/// spec carries a value for them.
#[must_use]
pub fn environment(spec: &WorkloadSpec) -> Vec<EnvAssignment> {
    let mut env = vec![
        EnvAssignment::new("EULA", spec.eula_accepted.to_string()),
        EnvAssignment::new("TYPE", spec.kind.as_str()),
        EnvAssignment::new("VERSION", spec.version.as_str()),
        EnvAssignment::new("MEMORY", spec.memory.as_str()),
        EnvAssignment::new("MAX_PLAYERS", spec.max_players.to_string()),
        EnvAssignment::new("MOTD", spec.motd.as_str()),
        EnvAssignment::new("DIFFICULTY", spec.difficulty.as_str()),
        EnvAssignment::new("MODE", spec.gamemode.as_str()),
        EnvAssignment::new("PVP", spec.pvp.to_string()),
        EnvAssignment::new("ONLINE_MODE", spec.online_mode.to_string()),
        EnvAssignment::new(
            "ENABLE_COMMAND_BLOCK",
            spec.enable_command_block.to_string(),
        ),
        EnvAssignment::new("OP_PERMISSION_LEVEL", OP_PERMISSION_LEVEL),
    ];

    if let Some(seed) = &spec.seed {
        env.push(EnvAssignment::new("SEED", seed.as_str()));
    }
    if let Some(level) = &spec.level_name {
        env.push(EnvAssignment::new("LEVEL", level.as_str()));
    }
    if let Some(modpack) = &spec.modpack_url {
        env.push(EnvAssignment::new("MODPACK", modpack.as_str()));
    }
    if !spec.plugin_urls.is_empty() {
        env.push(EnvAssignment::new("PLUGINS", spec.plugin_urls.join(",")));
    }
    env
}
