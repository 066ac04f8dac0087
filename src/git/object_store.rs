use std::fs;
use std::os::unix::fs::PermissionsExt;

use crate::error::EntireError;
use crate::git::repository::{exec_git, exec_git_stdin, Repository};

/// The Git file mode of a tree entry. Symlinks are deliberately not representable here —
/// `ObjectStore::blob_from_file` refuses to serialize one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Regular,
    Executable,
    Tree,
}

impl Mode {
    fn as_git_str(self) -> &'static str {
        match self {
            Mode::Regular => "100644",
            Mode::Executable => "100755",
            Mode::Tree => "040000",
        }
    }

    fn type_str(self) -> &'static str {
        match self {
            Mode::Regular | Mode::Executable => "blob",
            Mode::Tree => "tree",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub mode: Mode,
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct CommitObject {
    pub tree: String,
    pub parents: Vec<String>,
    pub author: String,
    pub committer: String,
    pub message: String,
}

/// Thin wrapper over the host `git` binary's plumbing commands, used as the object database
/// backing every store in this crate. Never a bundled reimplementation of Git.
pub struct ObjectStore<'a> {
    repo: &'a Repository,
}

impl<'a> ObjectStore<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        ObjectStore { repo }
    }

    pub fn put_blob(&self, bytes: &[u8]) -> Result<String, EntireError> {
        let mut args = self.repo.global_args_for_exec();
        args.push("hash-object".to_string());
        args.push("-w".to_string());
        args.push("--stdin".to_string());
        let output = exec_git_stdin(&args, bytes)?;
        Ok(String::from_utf8(output.stdout)?.trim().to_string())
    }

    /// Serialize a file on disk into a blob, preserving the executable bit. Returns `Ok(None)`
    /// (not an error) when the path is a symlink: callers that only accept regular files skip
    /// the entry rather than following or storing the link.
    pub fn blob_from_file(&self, path: &std::path::Path) -> Result<Option<(String, Mode)>, EntireError> {
        let metadata = fs::symlink_metadata(path)?;
        if metadata.file_type().is_symlink() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        let mode = if metadata.permissions().mode() & 0o111 != 0 {
            Mode::Executable
        } else {
            Mode::Regular
        };
        let id = self.put_blob(&bytes)?;
        Ok(Some((id, mode)))
    }

    pub fn read_blob(&self, id: &str) -> Result<Vec<u8>, EntireError> {
        let mut args = self.repo.global_args_for_exec();
        args.push("cat-file".to_string());
        args.push("-p".to_string());
        args.push(id.to_string());
        match exec_git(&args) {
            Ok(output) => Ok(output.stdout),
            Err(e) if e.is_not_found_exit() => Err(EntireError::NotFound(id.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Build a tree object from already-sorted entries (Git's sort order: byte-wise by name,
    /// with directories compared as if a trailing `/` were appended). Callers are expected to
    /// have sorted via [`crate::git::tree_builder`] before calling this.
    pub fn put_tree(&self, entries: &[TreeEntry]) -> Result<String, EntireError> {
        let mut args = self.repo.global_args_for_exec();
        args.push("mktree".to_string());

        let mut stdin = String::new();
        for entry in entries {
            stdin.push_str(entry.mode.as_git_str());
            stdin.push(' ');
            stdin.push_str(entry.mode.type_str());
            stdin.push(' ');
            stdin.push_str(&entry.id);
            stdin.push('\t');
            stdin.push_str(&entry.name);
            stdin.push('\n');
        }

        let output = exec_git_stdin(&args, stdin.as_bytes())?;
        Ok(String::from_utf8(output.stdout)?.trim().to_string())
    }

    pub fn read_tree(&self, id: &str) -> Result<Vec<TreeEntry>, EntireError> {
        let mut args = self.repo.global_args_for_exec();
        args.push("ls-tree".to_string());
        args.push(id.to_string());
        let output = match exec_git(&args) {
            Ok(output) => output,
            Err(e) if e.is_not_found_exit() => return Err(EntireError::NotFound(id.to_string())),
            Err(e) => return Err(e),
        };
        let stdout = String::from_utf8(output.stdout)?;

        let mut entries = Vec::new();
        for line in stdout.lines() {
            let Some((header, name)) = line.split_once('\t') else {
                return Err(EntireError::TreeCorrupt(format!("unparsable ls-tree line: {line}")));
            };
            let parts: Vec<&str> = header.split_whitespace().collect();
            if parts.len() != 3 {
                return Err(EntireError::TreeCorrupt(format!("unparsable ls-tree header: {header}")));
            }
            let mode = match parts[0] {
                "100644" => Mode::Regular,
                "100755" => Mode::Executable,
                "040000" => Mode::Tree,
                other => {
                    return Err(EntireError::TreeCorrupt(format!(
                        "unsupported mode in tree {id}: {other}"
                    )))
                }
            };
            entries.push(TreeEntry {
                mode,
                name: name.to_string(),
                id: parts[2].to_string(),
            });
        }
        Ok(entries)
    }

    pub fn put_commit(
        &self,
        tree: &str,
        parents: &[String],
        author: (&str, &str),
        committer: (&str, &str),
        message: &str,
    ) -> Result<String, EntireError> {
        let mut args = self.repo.global_args_for_exec();
        args.push("commit-tree".to_string());
        args.push(tree.to_string());
        for parent in parents {
            args.push("-p".to_string());
            args.push(parent.clone());
        }

        let mut cmd = std::process::Command::new("git");
        cmd.args(&args)
            .env("GIT_AUTHOR_NAME", author.0)
            .env("GIT_AUTHOR_EMAIL", author.1)
            .env("GIT_COMMITTER_NAME", committer.0)
            .env("GIT_COMMITTER_EMAIL", committer.1)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = cmd.spawn()?;
        {
            use std::io::Write;
            child
                .stdin
                .take()
                .expect("stdin was piped")
                .write_all(message.as_bytes())?;
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(EntireError::GitCliError {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8(output.stdout)?.trim().to_string())
    }

    pub fn read_commit(&self, id: &str) -> Result<CommitObject, EntireError> {
        let mut args = self.repo.global_args_for_exec();
        args.push("cat-file".to_string());
        args.push("-p".to_string());
        args.push(id.to_string());
        let output = match exec_git(&args) {
            Ok(output) => output,
            Err(e) if e.is_not_found_exit() => return Err(EntireError::NotFound(id.to_string())),
            Err(e) => return Err(e),
        };
        let text = String::from_utf8(output.stdout)?;

        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = String::new();
        let mut committer = String::new();
        let mut lines = text.lines();
        let mut message_started = false;
        let mut message = String::new();

        for line in &mut lines {
            if message_started {
                message.push_str(line);
                message.push('\n');
                continue;
            }
            if line.is_empty() {
                message_started = true;
                continue;
            }
            if let Some(rest) = line.strip_prefix("tree ") {
                tree = Some(rest.to_string());
            } else if let Some(rest) = line.strip_prefix("parent ") {
                parents.push(rest.to_string());
            } else if let Some(rest) = line.strip_prefix("author ") {
                author = rest.to_string();
            } else if let Some(rest) = line.strip_prefix("committer ") {
                committer = rest.to_string();
            }
        }

        Ok(CommitObject {
            tree: tree.ok_or_else(|| EntireError::TreeCorrupt(format!("commit {id} missing tree")))?,
            parents,
            author,
            committer,
            message: message.trim_end_matches('\n').to_string(),
        })
    }

    pub fn resolve_ref(&self, name: &str) -> Result<Option<String>, EntireError> {
        let mut args = self.repo.global_args_for_exec();
        args.push("rev-parse".to_string());
        args.push("--verify".to_string());
        args.push(format!("{name}^{{commit}}"));
        match exec_git(&args) {
            Ok(output) => Ok(Some(String::from_utf8(output.stdout)?.trim().to_string())),
            Err(e) if e.is_not_found_exit() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Compare-and-swap ref update: `expected_old` is the value the caller last observed
    /// (`None` for "must not already exist"). A mismatch surfaces as [`EntireError::RefRace`].
    pub fn set_ref(&self, name: &str, new_id: &str, expected_old: Option<&str>) -> Result<(), EntireError> {
        let mut args = self.repo.global_args_for_exec();
        args.push("update-ref".to_string());
        args.push(name.to_string());
        args.push(new_id.to_string());
        if let Some(old) = expected_old {
            args.push(old.to_string());
        } else {
            args.push(String::new());
        }
        match exec_git(&args) {
            Ok(_) => Ok(()),
            Err(EntireError::GitCliError { stderr, .. }) if stderr.contains("not the expected value") => {
                Err(EntireError::RefRace(name.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    pub fn delete_ref(&self, name: &str) -> Result<(), EntireError> {
        let mut args = self.repo.global_args_for_exec();
        args.push("update-ref".to_string());
        args.push("-d".to_string());
        args.push(name.to_string());
        match exec_git(&args) {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found_exit() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// List every ref whose name starts with `prefix` (e.g. `refs/entire/`), as full ref names.
    pub fn iter_refs(&self, prefix: &str) -> Result<Vec<String>, EntireError> {
        let mut args = self.repo.global_args_for_exec();
        args.push("for-each-ref".to_string());
        args.push("--format=%(refname)".to_string());
        args.push(prefix.to_string());
        let output = exec_git(&args)?;
        let stdout = String::from_utf8(output.stdout)?;
        Ok(stdout.lines().map(|l| l.to_string()).collect())
    }
}
