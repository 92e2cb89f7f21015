//! Configuration data model (§3.1, §6).
//!
//! Full schema documentation, interactive config editing, and config-file
//! generation are external-collaborator concerns (see SPEC_FULL.md §1). What
//! lives here is only what the runner loop needs to reload the configuration
//! every cycle (§4.7 step 5a): `serde`-derived structs and minimal
//! structural validation. Cycle detection in the `watches` graph is the
//! DAG planner's job (`crate::dag`), not this module's.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Top-level configuration consumed by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub agent: AgentConfig,
    #[serde(default)]
    pub settings: Settings,
    pub stations: Vec<StationConfig>,
    /// Opaque `permissions` block, written verbatim to
    /// `<worktree>/.claude/settings.json` before invocation (§4.5). The
    /// engine never interprets its contents.
    #[serde(default)]
    pub permissions: Option<serde_json::Value>,
    /// Global preamble, overridden per-station (§4.5 prompt layout).
    #[serde(default)]
    pub preamble: Option<String>,
}

/// The external agent command and its fixed arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Global settings: branch-naming convention and the default external watch target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    #[serde(default = "default_watches")]
    pub watches: String,
}

fn default_branch_prefix() -> String {
    "line/".to_string()
}

fn default_watches() -> String {
    "main".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            branch_prefix: default_branch_prefix(),
            watches: default_watches(),
        }
    }
}

/// A single station declaration (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StationConfig {
    pub name: String,
    /// Empty/absent means "default to the previous station's name, or the
    /// global watched branch for the first station" (§3, resolved by
    /// [`resolve_watches_defaults`]).
    #[serde(default)]
    pub watches: Option<String>,
    pub prompt: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub preamble: Option<String>,
}

/// Hardcoded default preamble, used when neither the station nor the
/// global config specifies one (§4.5 prompt layout).
pub const DEFAULT_PREAMBLE: &str =
    "You are running non-interactively. Make the changes described below directly \
     in the working tree; there is no human available to answer questions.";

impl Config {
    /// Parse and structurally validate a configuration from YAML text.
    ///
    /// Validation is intentionally thin (§3.1): non-empty station list,
    /// non-empty/unique names, and `watches` defaulting. Cycle detection is
    /// left to [`crate::dag::Dag::build`], which callers must still invoke.
    pub fn from_yaml(text: &str) -> anyhow::Result<Config> {
        let mut cfg: Config = serde_yaml::from_str(text)?;
        resolve_watches_defaults(&mut cfg);
        validate(&cfg)?;
        Ok(cfg)
    }

    /// Load and validate configuration from a file path.
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
        Self::from_yaml(&text)
    }
}

/// Fill in `watches` for stations that left it empty: the previous
/// station's name, or `settings.watches` for the first station (§3).
fn resolve_watches_defaults(cfg: &mut Config) {
    let global_watches = cfg.settings.watches.clone();
    let mut previous_name: Option<String> = None;
    for station in &mut cfg.stations {
        if station.watches.as_deref().unwrap_or("").is_empty() {
            station.watches = Some(previous_name.clone().unwrap_or_else(|| global_watches.clone()));
        }
        previous_name = Some(station.name.clone());
    }
}

fn validate(cfg: &Config) -> anyhow::Result<()> {
    if cfg.stations.is_empty() {
        anyhow::bail!("configuration declares no stations");
    }
    let mut seen = std::collections::HashSet::new();
    for station in &cfg.stations {
        if station.name.trim().is_empty() {
            anyhow::bail!("station name must not be empty");
        }
        if !seen.insert(station.name.as_str()) {
            anyhow::bail!("duplicate station name: {}", station.name);
        }
    }
    Ok(())
}

impl StationConfig {
    /// Effective agent command for this station: the station override, or
    /// the global command.
    pub fn effective_command<'a>(&'a self, global: &'a AgentConfig) -> (&'a str, &'a [String]) {
        match (&self.command, &self.args) {
            (Some(command), Some(args)) => (command.as_str(), args.as_slice()),
            (Some(command), None) => (command.as_str(), global.args.as_slice()),
            (None, _) => (global.command.as_str(), global.args.as_slice()),
        }
    }

    /// Effective preamble: station > global > hardcoded default (§4.5).
    pub fn effective_preamble<'a>(&'a self, global: &'a Config) -> &'a str {
        self.preamble
            .as_deref()
            .or(global.preamble.as_deref())
            .unwrap_or(DEFAULT_PREAMBLE)
    }
}
