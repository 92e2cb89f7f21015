//! Station processor (§4.5): the per-station state machine.
//!
//! `DetectHead → {NothingToDo, SkipAll, BeginWork} → Prepare →
//! AssembleContext → InvokeAgent → PostAgent → CommitOrNote → Finalize`.
//! Any error raised once the station has entered the active state is
//! caught by [`process`], recorded as `state = failed`, and returned to
//! the scheduler (§7 propagation policy) — the state machine itself never
//! panics its way out of a step.

use std::path::Path;

use chrono::Utc;
use ignore::gitignore::GitignoreBuilder;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::agent::{self, CommitSummary};
use crate::config::{Config, StationConfig};
use crate::dag::Dag;
use crate::error::LineError;
use crate::git::{worktree_path, Repository};
use crate::log_manager::LogManager;
use crate::state::{LastResult, StateStore, StationState, StatusRecord};

const NOTES_REF: &str = "line";

static SKIP_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[(skip ci|ci skip|skip line|line skip)\]").unwrap());
static TRIGGERED_BY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^Triggered-By:\s*(\S+)").unwrap());

/// Process one station for one cycle. Inputs mirror §4.5: the full
/// station set (for `resolve_watched_branch`), the station being
/// processed, a repository gateway bound to the repo root, and the log
/// manager.
pub fn process(
    cfg: &Config,
    dag: &Dag,
    station: &StationConfig,
    repo_root: &Path,
    state: &StateStore,
    logs: &LogManager,
) -> Result<(), LineError> {
    let repo = Repository::at(repo_root);
    let watched_branch = dag.resolve_watched_branch(station);
    let watches_external = dag.watches_external_branch(station);

    // DetectHead
    let head = repo.head_of(&watched_branch)?;
    let last_seen = state.read_last_seen(&station.name).unwrap_or_default();

    if last_seen == head {
        // NothingToDo
        let prior = state.read_status(&station.name).and_then(|r| r.last_result);
        state.write_status(&station.name, &StatusRecord::idle(prior))?;
        return Ok(());
    }

    let commits = repo.commits_between(&last_seen, &head)?;

    let lineignore = load_lineignore(repo_root);
    let all_skip_markable = commits.iter().all(|hash| {
        is_skip_markable(&repo, hash, watches_external, lineignore.as_ref()).unwrap_or(false)
    });

    if all_skip_markable {
        // SkipAll
        state.write_last_seen(&station.name, &head)?;
        let prior = state.read_status(&station.name).and_then(|r| r.last_result);
        state.write_status(&station.name, &StatusRecord::idle(prior))?;
        return Ok(());
    }

    // BeginWork
    let started_at = Utc::now();
    state.write_status(
        &station.name,
        &StatusRecord {
            state: StationState::ChangeDetected,
            last_result: None,
            started_at: Some(started_at),
            completed_at: None,
            head_at_start: Some(head.clone()),
            error: None,
            pid: Some(std::process::id()),
        },
    )?;

    match run_active_steps(
        cfg,
        dag,
        station,
        &repo,
        repo_root,
        state,
        logs,
        &watched_branch,
        watches_external,
        &last_seen,
        &head,
        &commits,
        lineignore.as_ref(),
        started_at,
    ) {
        Ok(last_result) => {
            state.write_last_seen(&station.name, &head)?;
            state.write_status(
                &station.name,
                &StatusRecord {
                    state: StationState::Idle,
                    last_result: Some(last_result),
                    started_at: Some(started_at),
                    completed_at: Some(Utc::now()),
                    head_at_start: Some(head),
                    error: None,
                    pid: Some(std::process::id()),
                },
            )?;
            Ok(())
        }
        Err(e) => {
            state.write_status(
                &station.name,
                &StatusRecord {
                    state: StationState::Failed,
                    last_result: None,
                    started_at: Some(started_at),
                    completed_at: Some(Utc::now()),
                    head_at_start: Some(head),
                    error: Some(e.to_string()),
                    pid: Some(std::process::id()),
                },
            )?;
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_active_steps(
    cfg: &Config,
    dag: &Dag,
    station: &StationConfig,
    repo: &Repository,
    repo_root: &Path,
    state: &StateStore,
    logs: &LogManager,
    watched_branch: &str,
    watches_external: bool,
    last_seen: &str,
    head: &str,
    commits: &[String],
    lineignore: Option<&ignore::gitignore::Gitignore>,
    started_at: chrono::DateTime<Utc>,
) -> Result<LastResult, LineError> {
    let station_branch = format!("{}{}", cfg.settings.branch_prefix, station.name);
    let worktree = worktree_path(repo_root, &cfg.settings.branch_prefix, &station.name);

    // Prepare
    if !repo.branch_exists(&station_branch)? {
        repo.create_branch(&station_branch, watched_branch)?;
    }
    if !worktree.exists() {
        repo.create_worktree(&worktree, &station_branch)?;
    }
    let station_repo = Repository::at(&worktree);
    station_repo.ensure_identity()?;
    station_repo.rebase_onto(watched_branch)?;

    // AssembleContext
    let context_commits: Vec<CommitSummary> = commits
        .iter()
        .filter(|hash| {
            if !watches_external {
                return true;
            }
            // Drop our own output observed after a rebase (§4.5
            // agent-commit filter): never instruct the agent to redo it.
            match repo.commit_message(hash) {
                Ok(message) => !TRIGGERED_BY.is_match(&message),
                Err(_) => true,
            }
        })
        .map(|hash| CommitSummary {
            short_hash: hash.chars().take(7).collect(),
            subject: repo
                .commit_message(hash)
                .unwrap_or_default()
                .lines()
                .next()
                .unwrap_or("")
                .to_string(),
        })
        .collect();
    let prompt = agent::build_prompt(cfg, station, &context_commits);

    // InvokeAgent
    logs.truncate(&station.name)?;
    logs.append(
        &station.name,
        &format!("--- Processing {head} at {} ---\n", Utc::now().to_rfc3339()),
    )?;
    agent::write_permissions(cfg, &worktree)?;
    let snapshot = station_repo.head_of("HEAD")?;
    state.write_status(
        &station.name,
        &StatusRecord {
            state: StationState::AgentRunning,
            last_result: None,
            started_at: Some(started_at),
            completed_at: None,
            head_at_start: Some(head.to_string()),
            error: None,
            pid: Some(std::process::id()),
        },
    )?;
    let exit_code = agent::invoke(&cfg.agent, station, &worktree, &prompt, logs)?;
    if exit_code != Some(0) {
        return Err(LineError::AgentExited {
            command: station.effective_command(&cfg.agent).0.to_string(),
            code: exit_code,
        });
    }

    // PostAgent
    let post_agent_head = station_repo.head_of("HEAD")?;
    if post_agent_head != snapshot {
        log::warn!(
            "station {}: agent committed directly ({} -> {}); soft-resetting to preserve file changes",
            station.name,
            snapshot,
            post_agent_head
        );
        station_repo.reset_soft(&snapshot)?;
    }

    // CommitOrNote
    state.write_status(
        &station.name,
        &StatusRecord {
            state: StationState::Committing,
            last_result: None,
            started_at: Some(started_at),
            completed_at: None,
            head_at_start: Some(head.to_string()),
            error: None,
            pid: Some(std::process::id()),
        },
    )?;
    if station_repo.has_uncommitted_changes()? {
        station_repo.stage_all()?;
        station_repo.commit(&commit_message(station, watched_branch, head))?;
        Ok(LastResult::Modified)
    } else {
        let note = review_note(station);
        for hash in commits {
            repo.add_note(NOTES_REF, hash, &note)?;
        }
        Ok(LastResult::Noop)
    }
}

/// `[<UPPERCASE-STATION>] Agent changes\n\nTriggered-By: <watched-HEAD>` (§4.5).
fn commit_message(station: &StationConfig, _watched_branch: &str, head: &str) -> String {
    format!(
        "[{}] Agent changes\n\nTriggered-By: {}",
        station.name.to_uppercase(),
        head
    )
}

/// `[<UPPERCASE-STATION>] Reviewed, no changes needed` (§4.5).
fn review_note(station: &StationConfig) -> String {
    format!("[{}] Reviewed, no changes needed", station.name.to_uppercase())
}

fn load_lineignore(repo_root: &Path) -> Option<ignore::gitignore::Gitignore> {
    let path = repo_root.join(".lineignore");
    if !path.exists() {
        return None;
    }
    let mut builder = GitignoreBuilder::new(repo_root);
    let _ = builder.add(&path);
    builder.build().ok()
}

/// A commit is skip-markable iff (§4.5): its message contains a
/// case-insensitive `[skip ci]`/`[ci skip]`/`[skip line]`/`[line skip]`
/// marker; or (when the station watches an external branch) the message
/// carries a `Triggered-By:` trailer (our own prior output); or
/// `.lineignore` exists, the commit's changed-file list is non-empty,
/// `.lineignore` itself is not among the changed files, and every changed
/// path matches its patterns.
fn is_skip_markable(
    repo: &Repository,
    hash: &str,
    watches_external: bool,
    lineignore: Option<&ignore::gitignore::Gitignore>,
) -> Result<bool, LineError> {
    let message = repo.commit_message(hash)?;
    if SKIP_MARKER.is_match(&message) {
        return Ok(true);
    }
    if watches_external && TRIGGERED_BY.is_match(&message) {
        return Ok(true);
    }
    if let Some(matcher) = lineignore {
        let files = repo.files_changed(hash)?;
        if !files.is_empty()
            && !files.iter().any(|f| f == ".lineignore")
            && files
                .iter()
                .all(|f| matcher.matched(f, false).is_ignore())
        {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_ci_marker_is_case_insensitive() {
        assert!(SKIP_MARKER.is_match("docs: fix typo [SKIP CI]"));
        assert!(SKIP_MARKER.is_match("chore [ci skip]"));
        assert!(SKIP_MARKER.is_match("chore [skip line]"));
        assert!(SKIP_MARKER.is_match("chore [line skip]"));
        assert!(!SKIP_MARKER.is_match("plain commit message"));
    }

    #[test]
    fn triggered_by_trailer_is_detected() {
        let message = "[DOCS] Agent changes\n\nTriggered-By: abc123";
        assert!(TRIGGERED_BY.is_match(message));
        assert!(!TRIGGERED_BY.is_match("Co-authored-by: someone <a@b.com>"));
    }

    #[test]
    fn commit_message_matches_expected_shape() {
        let station = StationConfig {
            name: "security".to_string(),
            watches: Some("main".to_string()),
            prompt: "review".to_string(),
            command: None,
            args: None,
            preamble: None,
        };
        let message = commit_message(&station, "main", "deadbeef");
        assert_eq!(message, "[SECURITY] Agent changes\n\nTriggered-By: deadbeef");
    }

    #[test]
    fn review_note_matches_expected_shape() {
        let station = StationConfig {
            name: "security".to_string(),
            watches: Some("main".to_string()),
            prompt: "review".to_string(),
            command: None,
            args: None,
            preamble: None,
        };
        assert_eq!(review_note(&station), "[SECURITY] Reviewed, no changes needed");
    }
}
