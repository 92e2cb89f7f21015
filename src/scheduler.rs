//! Cycle scheduler (§4.6): `RunOnce` walks DAG levels in order, running
//! each level's stations concurrently and joining before moving to the
//! next.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;

use crate::config::Config;
use crate::dag::Dag;
use crate::log_manager::LogManager;
use crate::state::{StateStore, StationState, StatusRecord};
use crate::station;

/// Runs exactly one cycle over every configured station. Per-station
/// failures never abort the cycle (§4.6 step 3c) — the caller cannot
/// distinguish a cycle where everything failed from one where nothing
/// did; only the status files reveal that (§4.6 step 4).
pub fn run_once(cfg: &Config, repo_root: &Path, state: &StateStore, logs: &LogManager) {
    let station_names: Vec<String> = cfg.stations.iter().map(|s| s.name.clone()).collect();
    if let Err(e) = state.recover_stale_active(&station_names) {
        log::warn!("stale-active recovery failed: {e}");
    }

    let dag = match Dag::build(&cfg.stations, &cfg.settings.branch_prefix) {
        Ok(dag) => dag,
        Err(e) => {
            log::warn!("station graph rejected: {e}");
            return;
        }
    };

    let failed: Mutex<HashSet<String>> = Mutex::new(HashSet::new());

    for (level_index, level) in dag.levels().iter().enumerate() {
        log::info!("cycle: entering level {level_index} with {} station(s)", level.len());
        let eligible: Vec<&crate::config::StationConfig> = level
            .iter()
            .filter_map(|name| cfg.stations.iter().find(|s| &s.name == name))
            .collect();

        let to_run: Vec<&crate::config::StationConfig> = eligible
            .into_iter()
            .filter(|station| {
                let watches = station.watches.as_deref().unwrap_or("");
                let upstream_failed = failed.lock().expect("failed-set mutex poisoned").contains(watches);
                if upstream_failed {
                    log::info!("station {}: skipped, upstream station failed", station.name);
                    let record = StatusRecord {
                        state: StationState::Skipped,
                        last_result: None,
                        started_at: None,
                        completed_at: Some(Utc::now()),
                        head_at_start: None,
                        error: Some("upstream station failed".to_string()),
                        pid: Some(std::process::id()),
                    };
                    if let Err(e) = state.write_status(&station.name, &record) {
                        log::warn!("station {}: failed to write skipped status: {e}", station.name);
                    }
                    failed.lock().expect("failed-set mutex poisoned").insert(station.name.clone());
                }
                !upstream_failed
            })
            .collect();

        std::thread::scope(|scope| {
            let handles: Vec<_> = to_run
                .iter()
                .map(|station| {
                    let dag = &dag;
                    let failed = &failed;
                    scope.spawn(move || {
                        log::info!("station {}: processing", station.name);
                        let result = station::process(cfg, dag, station, repo_root, state, logs);
                        if let Err(e) = result {
                            log::warn!("station {}: failed: {e}", station.name);
                            failed
                                .lock()
                                .expect("failed-set mutex poisoned")
                                .insert(station.name.clone());
                        }
                    })
                })
                .collect();
            for handle in handles {
                let _ = handle.join();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentConfig, Settings, StationConfig};
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

    #[test]
    fn run_once_marks_downstream_skipped_when_upstream_fails() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let cfg = Config {
            agent: AgentConfig {
                command: "sh".to_string(),
                args: vec!["-c".to_string(), "exit 1".to_string()],
            },
            settings: Settings::default(),
            stations: vec![
                StationConfig {
                    name: "broken".to_string(),
                    watches: Some("main".to_string()),
                    prompt: "x".to_string(),
                    command: None,
                    args: None,
                    preamble: None,
                },
                StationConfig {
                    name: "downstream".to_string(),
                    watches: Some("broken".to_string()),
                    prompt: "y".to_string(),
                    command: None,
                    args: None,
                    preamble: None,
                },
            ],
            permissions: None,
            preamble: None,
        };
        let state = StateStore::new(dir.path());
        let log_dir = tempfile::tempdir().unwrap();
        let logs = LogManager::with_dir(log_dir.path().to_path_buf());

        run_once(&cfg, dir.path(), &state, &logs);

        let broken_status = state.read_status("broken").unwrap();
        assert_eq!(broken_status.state, StationState::Failed);
        let downstream_status = state.read_status("downstream").unwrap();
        assert_eq!(downstream_status.state, StationState::Skipped);
        assert_eq!(
            downstream_status.error.as_deref(),
            Some("upstream station failed")
        );
    }
}
