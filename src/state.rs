//! State store (§4.2): status/last-seen/trigger/pid files under
//! `<repo>/.line/`.
//!
//! Writes to the status JSON use a create-temp-then-rename pattern so a
//! reader never observes a half-written file (§9 decision on ANSI-race
//! ordering); no other file in the store needs this, since each is a
//! single short write and readers already tolerate "no record" on any
//! parse failure.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::LineError;

/// One configured station's processing state (§3).
#[derive(Debug, Clone, Display, Serialize, Deserialize, PartialEq, Eq)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StationState {
    Idle,
    ChangeDetected,
    AgentRunning,
    Committing,
    Failed,
    Skipped,
}

impl StationState {
    /// `{change_detected, agent_running, committing}` (§3): states that
    /// require a live recorded PID to be valid.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            StationState::ChangeDetected | StationState::AgentRunning | StationState::Committing
        )
    }
}

/// Meaningful only when `state = Idle` (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LastResult {
    Noop,
    Modified,
}

/// A station's on-disk status record (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusRecord {
    pub state: StationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<LastResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_at_start: Option<String>,
    /// Present when `state ∈ {failed, skipped}` (§3).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

impl StatusRecord {
    /// `pid` is the writing process's own id (§3: the field records "the
    /// runner process that last wrote the record", unqualified by state).
    pub fn idle(last_result: Option<LastResult>) -> Self {
        StatusRecord {
            state: StationState::Idle,
            last_result,
            started_at: None,
            completed_at: None,
            head_at_start: None,
            error: None,
            pid: Some(std::process::id()),
        }
    }
}

/// File-backed store rooted at `<repo>/.line/`.
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(repo_root: &Path) -> Self {
        StateStore {
            root: repo_root.join(".line"),
        }
    }

    fn status_path(&self, station: &str) -> PathBuf {
        self.root.join("status").join(format!("{station}.json"))
    }

    fn last_seen_path(&self, station: &str) -> PathBuf {
        self.root.join("state").join(station)
    }

    fn trigger_path(&self) -> PathBuf {
        self.root.join("trigger")
    }

    fn pid_path(&self) -> PathBuf {
        self.root.join("runner.pid")
    }

    fn ensure_parent(path: &Path) -> Result<(), LineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LineError::StateIo {
                path: parent.to_path_buf(),
                detail: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// A reader that finds a partial/unparsable file treats it as "no
    /// record" (§4.2), rather than surfacing the parse error.
    pub fn read_status(&self, station: &str) -> Option<StatusRecord> {
        let text = std::fs::read_to_string(self.status_path(station)).ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Atomic create-temp-then-rename write (§9 decision).
    pub fn write_status(&self, station: &str, record: &StatusRecord) -> Result<(), LineError> {
        let path = self.status_path(station);
        Self::ensure_parent(&path)?;
        let text = serde_json::to_string_pretty(record).map_err(|e| LineError::StateIo {
            path: path.clone(),
            detail: e.to_string(),
        })?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, text).map_err(|e| LineError::StateIo {
            path: tmp.clone(),
            detail: e.to_string(),
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| LineError::StateIo {
            path,
            detail: e.to_string(),
        })?;
        Ok(())
    }

    /// Absent means "never processed" (§4.2).
    pub fn read_last_seen(&self, station: &str) -> Option<String> {
        let text = std::fs::read_to_string(self.last_seen_path(station)).ok()?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    pub fn write_last_seen(&self, station: &str, hash: &str) -> Result<(), LineError> {
        let path = self.last_seen_path(station);
        Self::ensure_parent(&path)?;
        std::fs::write(&path, hash).map_err(|e| LineError::StateIo {
            path,
            detail: e.to_string(),
        })
    }

    /// Zero time if the trigger file is absent (§4.7 step 4).
    pub fn read_trigger_mtime(&self) -> std::time::SystemTime {
        std::fs::metadata(self.trigger_path())
            .and_then(|m| m.modified())
            .unwrap_or(std::time::UNIX_EPOCH)
    }

    /// Content is advisory (§5); only the modification time is load-bearing.
    pub fn write_trigger(&self, content: &str) -> Result<(), LineError> {
        let path = self.trigger_path();
        Self::ensure_parent(&path)?;
        std::fs::write(&path, content).map_err(|e| LineError::StateIo {
            path,
            detail: e.to_string(),
        })
    }

    pub fn write_pid(&self, pid: u32) -> Result<(), LineError> {
        let path = self.pid_path();
        Self::ensure_parent(&path)?;
        std::fs::write(&path, pid.to_string()).map_err(|e| LineError::StateIo {
            path,
            detail: e.to_string(),
        })
    }

    pub fn read_pid(&self) -> Option<u32> {
        std::fs::read_to_string(self.pid_path())
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    pub fn remove_pid(&self) {
        let _ = std::fs::remove_file(self.pid_path());
    }

    /// Signal-0 liveness check: sends no signal, just probes whether the
    /// process exists.
    #[cfg(unix)]
    pub fn is_pid_alive(pid: u32) -> bool {
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
    }

    #[cfg(not(unix))]
    pub fn is_pid_alive(_pid: u32) -> bool {
        true
    }

    pub fn is_runner_alive(&self) -> bool {
        self.read_pid()
            .map(Self::is_pid_alive)
            .unwrap_or(false)
    }

    /// Stale-active recovery (§4.2): for every configured station, if its
    /// status is active and the recorded PID is not alive, rewrite it to
    /// `failed`. Called once at the start of each cycle.
    pub fn recover_stale_active(&self, station_names: &[String]) -> Result<(), LineError> {
        for name in station_names {
            let Some(mut record) = self.read_status(name) else {
                continue;
            };
            if !record.state.is_active() {
                continue;
            }
            let alive = record.pid.map(Self::is_pid_alive).unwrap_or(false);
            if alive {
                continue;
            }
            let prior_state = record.state.to_string();
            log::warn!("station {name}: stale {prior_state} cleared on startup");
            record.state = StationState::Failed;
            record.error = Some(format!(
                "stale {prior_state} cleared on startup (previous process interrupted)"
            ));
            record.completed_at = Some(Utc::now());
            self.write_status(name, &record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips_through_atomic_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let record = StatusRecord {
            state: StationState::Idle,
            last_result: Some(LastResult::Modified),
            started_at: None,
            completed_at: None,
            head_at_start: Some("abc".into()),
            error: None,
            pid: None,
        };
        store.write_status("docs", &record).unwrap();
        let read_back = store.read_status("docs").unwrap();
        assert_eq!(read_back, record);
    }

    #[test]
    fn missing_status_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        assert!(store.read_status("docs").is_none());
    }

    #[test]
    fn garbage_status_file_is_treated_as_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let path = dir.path().join(".line/status/docs.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();
        assert!(store.read_status("docs").is_none());
    }

    #[test]
    fn last_seen_absent_means_never_processed() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        assert_eq!(store.read_last_seen("docs"), None);
        store.write_last_seen("docs", "abc123").unwrap();
        assert_eq!(store.read_last_seen("docs"), Some("abc123".to_string()));
    }

    #[test]
    fn trigger_mtime_is_epoch_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        assert_eq!(store.read_trigger_mtime(), std::time::UNIX_EPOCH);
        store.write_trigger("deadbeef").unwrap();
        assert!(store.read_trigger_mtime() > std::time::UNIX_EPOCH);
    }

    #[test]
    fn pid_file_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        assert_eq!(store.read_pid(), None);
        store.write_pid(std::process::id()).unwrap();
        assert_eq!(store.read_pid(), Some(std::process::id()));
        assert!(store.is_runner_alive());
        store.remove_pid();
        assert_eq!(store.read_pid(), None);
    }

    #[test]
    fn recover_stale_active_rewrites_dead_pid_to_failed() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let record = StatusRecord {
            state: StationState::AgentRunning,
            last_result: None,
            started_at: Some(Utc::now()),
            completed_at: None,
            head_at_start: Some("abc".into()),
            error: None,
            // A PID almost certainly not alive in the test sandbox.
            pid: Some(999_999),
        };
        store.write_status("docs", &record).unwrap();
        store
            .recover_stale_active(&["docs".to_string()])
            .unwrap();
        let after = store.read_status("docs").unwrap();
        assert_eq!(after.state, StationState::Failed);
        assert!(after.error.unwrap().contains("stale"));
    }

    #[test]
    fn recover_stale_active_leaves_idle_alone() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let record = StatusRecord::idle(Some(LastResult::Noop));
        store.write_status("docs", &record).unwrap();
        store
            .recover_stale_active(&["docs".to_string()])
            .unwrap();
        let after = store.read_status("docs").unwrap();
        assert_eq!(after.state, StationState::Idle);
    }
}
