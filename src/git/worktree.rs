//! Worktree path convention (§4.1): `<repo>/.line/worktrees/<branch-prefix><station-name>/`.

use std::path::{Path, PathBuf};

/// Compute the fixed worktree path for a station, given the repository
/// root and the configured branch prefix.
pub fn worktree_path(repo_root: &Path, branch_prefix: &str, station_name: &str) -> PathBuf {
    repo_root
        .join(".line")
        .join("worktrees")
        .join(format!("{branch_prefix}{station_name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_expected_path() {
        let path = worktree_path(Path::new("/repo"), "line/", "docs");
        assert_eq!(path, PathBuf::from("/repo/.line/worktrees/line/docs"));
    }
}
