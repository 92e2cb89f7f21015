//! Agent invocation (§4.5).
//!
//! Builds the prompt, writes it to `.line-context`, and drives the
//! configured command through a pseudo-terminal so its output can be
//! tailed live from the station log.

use std::path::Path;

use crate::config::{AgentConfig, Config, StationConfig};
use crate::error::LineError;
use crate::log_manager::LogManager;
use crate::pty;

/// A commit reference shown in the prompt's compact commit list.
pub struct CommitSummary {
    pub short_hash: String,
    pub subject: String,
}

/// Concatenates the effective preamble, station name, prompt, and a
/// compact commit list, followed by a short "how to inspect changes"
/// footer (§4.5 prompt layout). Diffs are never inlined.
pub fn build_prompt(cfg: &Config, station: &StationConfig, commits: &[CommitSummary]) -> String {
    let preamble = station.effective_preamble(cfg);
    let mut prompt = String::new();
    prompt.push_str(preamble);
    prompt.push_str("\n\n");
    prompt.push_str(&format!("Station: {}\n\n", station.name));
    prompt.push_str(&station.prompt);
    prompt.push_str("\n\n");

    if commits.is_empty() {
        prompt.push_str("No new commits to review.\n");
    } else {
        prompt.push_str("Commits to review:\n");
        for commit in commits {
            prompt.push_str(&format!("  {} {}\n", commit.short_hash, commit.subject));
        }
    }

    prompt.push_str(
        "\nInspect the working tree directly (e.g. `git log -p`, `git diff`) to see the \
         full changes; they are not inlined above.\n",
    );
    prompt
}

/// Environment variables passed to the agent process: the runner's own
/// environment minus `CLAUDECODE=*`, plus `LINE_AGENT=1` so the external
/// post-commit hook can recognize its own invocation (§4.5).
pub fn build_env() -> Vec<(String, String)> {
    filter_env(std::env::vars())
}

fn filter_env(vars: impl Iterator<Item = (String, String)>) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = vars.filter(|(key, _)| key != "CLAUDECODE").collect();
    env.push(("LINE_AGENT".to_string(), "1".to_string()));
    env
}

/// Writes the `permissions` block (if configured) to
/// `<worktree>/.claude/settings.json` before invocation. Informational
/// only; the engine never reads it back (§4.5).
pub fn write_permissions(cfg: &Config, worktree: &Path) -> Result<(), LineError> {
    let Some(permissions) = &cfg.permissions else {
        return Ok(());
    };
    let dir = worktree.join(".claude");
    std::fs::create_dir_all(&dir).map_err(|e| LineError::StateIo {
        path: dir.clone(),
        detail: e.to_string(),
    })?;
    let path = dir.join("settings.json");
    let text = serde_json::to_string_pretty(permissions).map_err(|e| LineError::StateIo {
        path: path.clone(),
        detail: e.to_string(),
    })?;
    std::fs::write(&path, text).map_err(|e| LineError::StateIo {
        path,
        detail: e.to_string(),
    })
}

/// Runs the station's agent command inside `worktree`, streaming combined
/// stdout/stderr into the station's log. Returns the process exit code.
pub fn invoke(
    global_agent: &AgentConfig,
    station: &StationConfig,
    worktree: &Path,
    prompt: &str,
    log_manager: &LogManager,
) -> Result<Option<i32>, LineError> {
    let context_path = worktree.join(".line-context");
    std::fs::write(&context_path, prompt).map_err(|e| LineError::StateIo {
        path: context_path.clone(),
        detail: e.to_string(),
    })?;

    let (command, base_args) = station.effective_command(global_agent);
    let mut args: Vec<String> = base_args.to_vec();
    args.push(context_path.to_string_lossy().into_owned());

    let env = build_env();
    let result = pty::run_in_pty(command, &args, worktree, &env, prompt, |chunk| {
        let _ = log_manager.append(&station.name, chunk);
    });

    // Best-effort cleanup even on error (§4.5: "removed on exit, even on error").
    let _ = std::fs::remove_file(&context_path);

    result
}
