//! A throwaway git repository for tests, gated behind `test-support` so integration tests
//! (which depend on this crate as an external dependency) can use it too.
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::git::repository::Repository;

pub struct TmpRepo {
    dir: tempfile::TempDir,
}

impl Default for TmpRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl TmpRepo {
    pub fn new() -> TmpRepo {
        let dir = tempfile::tempdir().expect("tempdir");
        run_git(dir.path(), &["init", "-q", "-b", "main"]);
        run_git(dir.path(), &["config", "user.name", "Test User"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        TmpRepo { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn repository(&self) -> Repository {
        Repository::discover(self.dir.path()).expect("discover repo")
    }

    pub fn write_file(&self, relative: &str, contents: &str) {
        let full = self.dir.path().join(relative);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(full, contents).expect("write file");
    }

    pub fn stage_all(&self) {
        run_git(self.dir.path(), &["add", "-A"]);
    }

    pub fn commit_with_message(&self, message: &str) -> String {
        self.stage_all();
        run_git(self.dir.path(), &["commit", "-q", "-m", message]);
        self.head_sha()
    }

    pub fn commit_path_with_message(&self, path: &str, message: &str) -> String {
        self.stage_all();
        run_git(self.dir.path(), &["commit", "-q", "-m", message, "--", path]);
        self.head_sha()
    }

    pub fn head_sha(&self) -> String {
        run_git(self.dir.path(), &["rev-parse", "HEAD"]).trim().to_string()
    }

    pub fn git_dir(&self) -> PathBuf {
        self.dir.path().join(".git")
    }
}

fn run_git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to spawn git {args:?}: {e}"));
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).expect("git output is utf8")
}
