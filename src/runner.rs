//! Self-retiring runner loop (§4.7).
//!
//! In steady state the loop processes one cycle, waits one grace period,
//! and exits; only a trigger file with a newer modification time (written
//! by the external post-commit hook's `line trigger` invocation) keeps it
//! alive for another iteration.

use std::path::Path;
use std::time::Duration;

use crossbeam_channel::Receiver;

use crate::config::Config;
use crate::log_manager::LogManager;
use crate::scheduler;
use crate::state::StateStore;

const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Runs the self-retiring loop until it self-retires or `cancel` fires.
///
/// `cancel`, when provided, unblocks the grace-period sleep early; it is
/// never consulted mid-cycle (§5 cancellation model).
pub fn run(config_path: &Path, repo_root: &Path, cancel: Option<Receiver<()>>) {
    let state = StateStore::new(repo_root);

    if state.is_runner_alive() {
        log::info!("another runner is already active, exiting");
        return;
    }
    if let Err(e) = state.write_pid(std::process::id()) {
        log::warn!("failed to write runner PID file, aborting startup: {e}");
        return;
    }

    let logs = LogManager::new();

    let mut last_mtime = state.read_trigger_mtime();
    let mut cfg = match Config::load(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            log::warn!("initial configuration load failed, exiting: {e}");
            state.remove_pid();
            return;
        }
    };

    loop {
        match Config::load(config_path) {
            Ok(reloaded) => cfg = reloaded,
            Err(e) => log::warn!("configuration reload failed, keeping previous config: {e}"),
        }

        log::info!("cycle: starting");
        scheduler::run_once(&cfg, repo_root, &state, &logs);
        log::info!("cycle: complete");

        if wait_grace_period(cancel.as_ref()) {
            log::info!("runner cancelled during grace period");
            break;
        }

        let new_mtime = state.read_trigger_mtime();
        if new_mtime <= last_mtime {
            log::info!("no new trigger, self-retiring");
            break;
        }
        last_mtime = new_mtime;
    }

    logs.close_all();
    state.remove_pid();
}

/// Waits the grace period, returning `true` if cancellation fired first.
fn wait_grace_period(cancel: Option<&Receiver<()>>) -> bool {
    match cancel {
        Some(rx) => match rx.recv_timeout(GRACE_PERIOD) {
            Ok(()) => true,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => false,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => false,
        },
        None => {
            std::thread::sleep(GRACE_PERIOD);
            false
        }
    }
}

/// Runs a single `RunOnce` cycle and returns, bypassing the PID-file
/// singleton guard (§4.8: used by `line run --once` and by tests).
pub fn run_once(config_path: &Path, repo_root: &Path) {
    let state = StateStore::new(repo_root);
    let logs = LogManager::new();
    match Config::load(config_path) {
        Ok(cfg) => scheduler::run_once(&cfg, repo_root, &state, &logs),
        Err(e) => log::warn!("configuration load failed: {e}"),
    }
    logs.close_all();
}

/// Writes the current HEAD of `watches` into `<repo>/.line/trigger`
/// (§4.8 `line trigger`).
pub fn write_trigger(repo_root: &Path, watches: &str) -> anyhow::Result<()> {
    let repo = crate::git::Repository::at(repo_root);
    let head = repo.head_of(watches)?;
    let state = StateStore::new(repo_root);
    state.write_trigger(&head)?;
    Ok(())
}

/// Spawns a detached `line run` process if no runner is currently alive
/// (§4.8 `line trigger`).
pub fn spawn_runner_if_needed(repo_root: &Path, config_path: &Path, self_exe: &Path) -> anyhow::Result<()> {
    let state = StateStore::new(repo_root);
    if state.is_runner_alive() {
        return Ok(());
    }
    std::process::Command::new(self_exe)
        .arg("run")
        .arg("--config")
        .arg(config_path)
        .arg("--repo")
        .arg(repo_root)
        .current_dir(repo_root)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn init_repo(dir: &Path) {
        let run = |args: &[&str]| {
            Command::new("git").args(args).current_dir(dir).output().unwrap();
        };
        run(&["init", "-q", "-b", "main"]);
        run(&["config", "user.name", "test"]);
        run(&["config", "user.email", "test@example.com"]);
        std::fs::write(dir.join("a.txt"), "one\n").unwrap();
        run(&["add", "-A"]);
        run(&["commit", "-q", "-m", "initial"]);
    }

    fn config_text() -> &'static str {
        "agent:\n  command: \"true\"\nstations:\n  - name: security\n    prompt: review\n"
    }

    #[test]
    fn run_once_processes_a_cycle_without_pid_guard() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let config_path = dir.path().join("line.yaml");
        std::fs::write(&config_path, config_text()).unwrap();

        run_once(&config_path, dir.path());

        let state = StateStore::new(dir.path());
        let status = state.read_status("security").unwrap();
        assert_eq!(status.state, crate::state::StationState::Idle);
    }

    #[test]
    fn write_trigger_records_current_head() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        write_trigger(dir.path(), "main").unwrap();
        let state = StateStore::new(dir.path());
        assert!(state.read_trigger_mtime() > std::time::UNIX_EPOCH);
    }

    #[test]
    fn singleton_guard_skips_when_runner_already_alive() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let config_path = dir.path().join("line.yaml");
        std::fs::write(&config_path, config_text()).unwrap();

        let state = StateStore::new(dir.path());
        state.write_pid(std::process::id()).unwrap();

        // Should return immediately without processing any station, since
        // this process's own PID is (trivially) alive.
        run(&config_path, dir.path(), None);
        assert!(state.read_status("security").is_none());
    }
}
