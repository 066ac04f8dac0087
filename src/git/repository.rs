use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use crate::error::EntireError;

/// The well-known sha1 of an empty tree. Used as the diff base for a root commit, which has
/// no parent to diff against.
pub const EMPTY_TREE_ID: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// A resolved repository location plus the `-C`/`--git-dir` prefix every subprocess call
/// needs so the engine never depends on the process's current working directory.
#[derive(Debug, Clone)]
pub struct Repository {
    git_dir: PathBuf,
    workdir: PathBuf,
}

impl Repository {
    /// Discover a repository starting from `start`, walking parents the way `git
    /// rev-parse --show-toplevel` does.
    pub fn discover(start: &Path) -> Result<Repository, EntireError> {
        let mut args = vec![
            "-C".to_string(),
            start.to_string_lossy().to_string(),
            "rev-parse".to_string(),
            "--show-toplevel".to_string(),
            "--git-dir".to_string(),
        ];
        let output = exec_git_in(start, &mut args)?;
        let stdout = String::from_utf8(output.stdout)?;
        let mut lines = stdout.lines();
        let toplevel = lines
            .next()
            .ok_or_else(|| EntireError::NotFound("repository root".to_string()))?;
        let git_dir = lines
            .next()
            .ok_or_else(|| EntireError::NotFound("git dir".to_string()))?;

        let workdir = PathBuf::from(toplevel);
        let git_dir = if Path::new(git_dir).is_absolute() {
            PathBuf::from(git_dir)
        } else {
            workdir.join(git_dir)
        };

        Ok(Repository { git_dir, workdir })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// The `-C <workdir>` prefix shared by every git invocation this repository issues.
    pub fn global_args_for_exec(&self) -> Vec<String> {
        vec!["-C".to_string(), self.workdir.to_string_lossy().to_string()]
    }

    /// Read a single git config value, repo-local first, falling back to the user-global config.
    pub fn config_get_str(&self, key: &str) -> Result<Option<String>, EntireError> {
        let mut args = self.global_args_for_exec();
        args.push("config".to_string());
        args.push("--get".to_string());
        args.push(key.to_string());

        match exec_git(&args) {
            Ok(output) => Ok(Some(String::from_utf8(output.stdout)?.trim().to_string())),
            Err(e) if e.is_not_found_exit() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Resolve `HEAD` to a commit sha. `NotFound` on an unborn branch.
    pub fn head(&self) -> Result<String, EntireError> {
        self.rev_parse("HEAD")
    }

    /// Resolve `HEAD`'s tree sha. `NotFound` on an unborn branch.
    pub fn head_tree(&self) -> Result<String, EntireError> {
        self.rev_parse("HEAD^{tree}")
    }

    /// Paths that differ between two commit- or tree-ish revisions, with a status letter
    /// (`A`/`M`/`D`/...) from `git diff-tree --name-status`.
    pub fn diff_name_status(&self, a: &str, b: &str) -> Result<Vec<(String, char)>, EntireError> {
        let mut args = self.global_args_for_exec();
        args.push("diff-tree".to_string());
        args.push("--no-commit-id".to_string());
        args.push("--name-status".to_string());
        args.push("-r".to_string());
        args.push(a.to_string());
        args.push(b.to_string());
        let output = exec_git(&args)?;
        let stdout = String::from_utf8(output.stdout)?;
        let mut out = Vec::new();
        for line in stdout.lines() {
            let Some((status, path)) = line.split_once('\t') else { continue };
            out.push((path.to_string(), status.chars().next().unwrap_or('M')));
        }
        Ok(out)
    }

    /// The blob id each changed path has in `b`, restricted to the diff between `a` and `b`.
    /// Deleted paths are omitted. This is the diff-restricted read the content-aware overlap
    /// check uses: it never compares a path the commit didn't actually touch.
    pub fn diff_blob_ids(&self, a: &str, b: &str) -> Result<BTreeMap<String, String>, EntireError> {
        let mut args = self.global_args_for_exec();
        args.push("diff-tree".to_string());
        args.push("--no-commit-id".to_string());
        args.push("-r".to_string());
        args.push(a.to_string());
        args.push(b.to_string());
        let output = exec_git(&args)?;
        let stdout = String::from_utf8(output.stdout)?;
        let mut out = BTreeMap::new();
        for line in stdout.lines() {
            let Some((meta, path)) = line.split_once('\t') else { continue };
            // raw format: `:<old_mode> <new_mode> <old_sha> <new_sha> <status>`
            let fields: Vec<&str> = meta.trim_start_matches(':').split_whitespace().collect();
            let [_, _, _, new_sha, status] = fields[..] else { continue };
            if status.starts_with('D') {
                continue;
            }
            out.insert(path.to_string(), new_sha.to_string());
        }
        Ok(out)
    }

    pub fn rev_parse(&self, rev: &str) -> Result<String, EntireError> {
        let mut args = self.global_args_for_exec();
        args.push("rev-parse".to_string());
        args.push(rev.to_string());
        match exec_git(&args) {
            Ok(output) => Ok(String::from_utf8(output.stdout)?.trim().to_string()),
            Err(e) if e.is_not_found_exit() => Err(EntireError::NotFound(rev.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Whether a rebase is currently in progress in this worktree's git dir.
    pub fn is_rebase_in_progress(&self) -> bool {
        self.git_dir.join("rebase-merge").is_dir() || self.git_dir.join("rebase-apply").is_dir()
    }

    /// The current branch's short name, or `NotFound` on detached HEAD.
    pub fn current_branch(&self) -> Result<String, EntireError> {
        let mut args = self.global_args_for_exec();
        args.push("symbolic-ref".to_string());
        args.push("--short".to_string());
        args.push("HEAD".to_string());
        match exec_git(&args) {
            Ok(output) => Ok(String::from_utf8(output.stdout)?.trim().to_string()),
            Err(e) if e.is_not_found_exit() => Err(EntireError::NotFound("HEAD".to_string())),
            Err(e) => Err(e),
        }
    }

    /// Author identity to attribute permanent-ref commits to: repo-local config, then
    /// user-global config, then a fixed fallback.
    pub fn signature(&self) -> (String, String) {
        let name = self
            .config_get_str("user.name")
            .ok()
            .flatten()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "Unknown".to_string());
        let email = self
            .config_get_str("user.email")
            .ok()
            .flatten()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "unknown@local".to_string());
        (name, email)
    }
}

/// Run `git` with the given arguments, returning an error built from the subprocess's
/// exit status and stderr on failure.
pub fn exec_git(args: &[String]) -> Result<Output, EntireError> {
    let output = Command::new("git")
        .args(args)
        .stdin(Stdio::null())
        .output()?;
    check_status(output)
}

/// Run `git` with the given arguments, feeding `stdin` to the subprocess.
pub fn exec_git_stdin(args: &[String], stdin: &[u8]) -> Result<Output, EntireError> {
    use std::io::Write;

    let mut child = Command::new("git")
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    child
        .stdin
        .take()
        .expect("stdin was piped")
        .write_all(stdin)?;

    let output = child.wait_with_output()?;
    check_status(output)
}

fn exec_git_in(start: &Path, args: &mut Vec<String>) -> Result<Output, EntireError> {
    let _ = start;
    let output = Command::new("git")
        .args(args.iter())
        .stdin(Stdio::null())
        .output()?;
    check_status(output)
}

fn check_status(output: Output) -> Result<Output, EntireError> {
    if output.status.success() {
        Ok(output)
    } else {
        Err(EntireError::GitCliError {
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

pub fn find_repository_in_path(path: &str) -> Result<Repository, EntireError> {
    Repository::discover(Path::new(path))
}
