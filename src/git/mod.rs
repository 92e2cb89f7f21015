//! Repository gateway (§4.1): every Git operation the engine needs, wrapped
//! in [`LineError::Git`] so callers can record the failure verbatim.
//!
//! All git invocations go through [`Repository::run`] (or
//! [`Repository::run_check`] for exit-code-only commands), which logs the
//! command line and working directory at `debug` in a
//! `$ <command> [<context>]` style before running it.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::LineError;

mod worktree;

pub use worktree::worktree_path;

/// A bound handle to a repository (or one of its worktrees). Every method
/// runs `git` with `self.root` as the working directory.
#[derive(Debug, Clone)]
pub struct Repository {
    root: PathBuf,
}

impl Repository {
    /// Bind a gateway to a directory. Canonicalizes `root` when possible
    /// (stripping Windows UNC prefixes via `dunce` rather than leaving them
    /// in `git`-facing paths) but does not require `root` to exist yet or
    /// to actually be a git repository; the first command run against it
    /// will fail with [`LineError::Git`] if it isn't.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        Repository { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run `git <args>`, logging at debug, returning trimmed stdout.
    /// Non-zero exit becomes `LineError::Git` carrying the stderr/stdout tail.
    fn run(&self, args: &[&str]) -> Result<String, LineError> {
        let cmd_str = format!("git {}", args.join(" "));
        log::debug!("$ {} [{}]", cmd_str, self.root.display());

        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .map_err(|e| LineError::Git {
                command: cmd_str.clone(),
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).replace('\r', "\n");
            let stdout = String::from_utf8_lossy(&output.stdout).replace('\r', "\n");
            let detail = [stderr.trim(), stdout.trim()]
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            return Err(LineError::Git {
                command: cmd_str,
                detail,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Run `git <args>` for its exit code alone; never treats non-zero as
    /// an error (used for `rev-parse --verify`-style existence checks).
    fn run_check(&self, args: &[&str]) -> Result<bool, LineError> {
        let cmd_str = format!("git {}", args.join(" "));
        log::debug!("$ {} [{}]", cmd_str, self.root.display());

        let status = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map_err(|e| LineError::Git {
                command: cmd_str,
                detail: e.to_string(),
            })?;
        Ok(status.success())
    }

    /// Resolve `reference` to a commit hash.
    pub fn head_of(&self, reference: &str) -> Result<String, LineError> {
        self.run(&["rev-parse", "--verify", reference])
            .map_err(|_| LineError::UnknownRef {
                reference: reference.to_string(),
            })
    }

    pub fn branch_exists(&self, name: &str) -> Result<bool, LineError> {
        self.run_check(&[
            "show-ref",
            "--verify",
            "--quiet",
            &format!("refs/heads/{name}"),
        ])
    }

    /// Fails if `name` already exists (§4.1).
    pub fn create_branch(&self, name: &str, from: &str) -> Result<(), LineError> {
        if self.branch_exists(name)? {
            return Err(LineError::BranchAlreadyExists {
                branch: name.to_string(),
            });
        }
        self.run(&["branch", name, from])?;
        Ok(())
    }

    /// Fails if `path` already exists; creates parent directories as needed
    /// (§4.1).
    pub fn create_worktree(&self, path: &Path, branch: &str) -> Result<(), LineError> {
        if path.exists() {
            return Err(LineError::WorktreePathExists {
                path: path.to_path_buf(),
            });
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LineError::Git {
                command: format!("mkdir -p {}", parent.display()),
                detail: e.to_string(),
            })?;
        }
        self.run(&["worktree", "add", &path.to_string_lossy(), branch])?;
        Ok(())
    }

    /// Commits reachable from `to`, newest first, per `git rev-list`
    /// ordering. An empty `from` means "all commits reachable from `to`"
    /// (§4.1).
    pub fn commits_between(&self, from: &str, to: &str) -> Result<Vec<String>, LineError> {
        let range = if from.is_empty() {
            to.to_string()
        } else {
            format!("{from}..{to}")
        };
        let out = self.run(&["rev-list", &range])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    pub fn commit_message(&self, hash: &str) -> Result<String, LineError> {
        self.run(&["log", "-1", "--format=%B", hash])
    }

    /// Includes the root-commit case, where `<hash>^` does not exist
    /// (§4.1): falls back to listing every path in the tree.
    pub fn files_changed(&self, hash: &str) -> Result<Vec<String>, LineError> {
        let has_parent = self.run_check(&["rev-parse", "--verify", &format!("{hash}^")])?;
        let out = if has_parent {
            self.run(&[
                "diff-tree",
                "--no-commit-id",
                "--name-only",
                "-r",
                hash,
            ])?
        } else {
            self.run(&["ls-tree", "--name-only", "-r", hash])?
        };
        Ok(out.lines().filter(|l| !l.is_empty()).map(str::to_string).collect())
    }

    pub fn has_uncommitted_changes(&self) -> Result<bool, LineError> {
        let status = self.run(&["status", "--porcelain"])?;
        Ok(!status.trim().is_empty())
    }

    /// Stages everything, including untracked files (§4.1).
    pub fn stage_all(&self) -> Result<(), LineError> {
        self.run(&["add", "-A"])?;
        Ok(())
    }

    pub fn commit(&self, message: &str) -> Result<(), LineError> {
        self.run(&["commit", "-m", message])?;
        Ok(())
    }

    pub fn reset_soft(&self, reference: &str) -> Result<(), LineError> {
        self.run(&["reset", "--soft", reference])?;
        Ok(())
    }

    /// Rebases the current branch onto `target`, abandoning the station's
    /// prior work on conflict (§4.1 failure policy): abort any in-progress
    /// rebase first (idempotent), then if the rebase itself fails, abort it
    /// and hard-reset to `target`. Only a failure of *both* steps is
    /// reported.
    pub fn rebase_onto(&self, target: &str) -> Result<(), LineError> {
        // Idempotent: ignore the error if there is no rebase in progress.
        let _ = self.run(&["rebase", "--abort"]);

        if self.run(&["rebase", target]).is_ok() {
            return Ok(());
        }

        let _ = self.run(&["rebase", "--abort"]);
        self.run(&["reset", "--hard", target])
            .map(|_| ())
            .map_err(|e| LineError::RebaseAndResetFailed {
                target: target.to_string(),
                detail: e.to_string(),
            })
    }

    /// Writes a local `user.name`/`user.email` only if unresolved, using
    /// fixed values (§4.1) so commits made inside freshly created worktrees
    /// never fail for lack of identity.
    pub fn ensure_identity(&self) -> Result<(), LineError> {
        if self.run_check(&["config", "user.name"])? {
            return Ok(());
        }
        self.run(&["config", "user.name", "line-runner"])?;
        self.run(&["config", "user.email", "line-runner@localhost"])?;
        Ok(())
    }

    /// Adds a forced note under `refs/notes/<notes_ref>`, creating the ref
    /// if needed (§4.1).
    pub fn add_note(&self, notes_ref: &str, commit: &str, message: &str) -> Result<(), LineError> {
        self.run(&[
            "notes",
            "--ref",
            notes_ref,
            "add",
            "-f",
            "-m",
            message,
            commit,
        ])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn init_repo(dir: &Path) {
        let run = |args: &[&str]| {
            Command::new("git")
                .args(args)
                .current_dir(dir)
                .output()
                .unwrap();
        };
        run(&["init", "-q", "-b", "main"]);
        run(&["config", "user.name", "test"]);
        run(&["config", "user.email", "test@example.com"]);
        std::fs::write(dir.join("a.txt"), "one\n").unwrap();
        run(&["add", "-A"]);
        run(&["commit", "-q", "-m", "initial"]);
    }

    #[test]
    fn head_of_resolves_branch() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let repo = Repository::at(dir.path());
        let head = repo.head_of("main").unwrap();
        assert_eq!(head.len(), 40);
    }

    #[test]
    fn head_of_unknown_ref_is_unknown_ref_error() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let repo = Repository::at(dir.path());
        let err = repo.head_of("does-not-exist").unwrap_err();
        assert!(matches!(err, LineError::UnknownRef { .. }));
    }

    #[test]
    fn branch_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let repo = Repository::at(dir.path());
        assert!(!repo.branch_exists("line/docs").unwrap());
        repo.create_branch("line/docs", "main").unwrap();
        assert!(repo.branch_exists("line/docs").unwrap());
        let err = repo.create_branch("line/docs", "main").unwrap_err();
        assert!(matches!(err, LineError::BranchAlreadyExists { .. }));
    }

    #[test]
    fn files_changed_handles_root_commit() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let repo = Repository::at(dir.path());
        let head = repo.head_of("main").unwrap();
        let files = repo.files_changed(&head).unwrap();
        assert_eq!(files, vec!["a.txt".to_string()]);
    }

    #[test]
    fn commits_between_empty_from_means_all() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let repo = Repository::at(dir.path());
        let head = repo.head_of("main").unwrap();
        let commits = repo.commits_between("", &head).unwrap();
        assert_eq!(commits, vec![head]);
    }

    #[test]
    fn stage_commit_and_uncommitted_changes() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let repo = Repository::at(dir.path());
        assert!(!repo.has_uncommitted_changes().unwrap());
        std::fs::write(dir.path().join("b.txt"), "two\n").unwrap();
        assert!(repo.has_uncommitted_changes().unwrap());
        repo.stage_all().unwrap();
        repo.commit("second").unwrap();
        assert!(!repo.has_uncommitted_changes().unwrap());
    }

    #[test]
    fn rebase_onto_conflict_falls_back_to_hard_reset() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let repo = Repository::at(dir.path());
        repo.create_branch("line/docs", "main").unwrap();
        Command::new("git")
            .args(["checkout", "-q", "line/docs"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        std::fs::write(dir.path().join("a.txt"), "station edit\n").unwrap();
        repo.stage_all().unwrap();
        repo.commit("station work").unwrap();

        Command::new("git")
            .args(["checkout", "-q", "main"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        std::fs::write(dir.path().join("a.txt"), "upstream edit\n").unwrap();
        repo.stage_all().unwrap();
        repo.commit("upstream work").unwrap();

        Command::new("git")
            .args(["checkout", "-q", "line/docs"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        repo.rebase_onto("main").unwrap();
        let head = repo.head_of("HEAD").unwrap();
        let main_head = repo.head_of("main").unwrap();
        assert_eq!(head, main_head);
    }
}
