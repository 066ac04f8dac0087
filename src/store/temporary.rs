use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::EntireError;
use crate::git::object_store::{Mode, ObjectStore};
use crate::git::repository::Repository;
use crate::git::tree_builder;
use crate::id::validate_session_id;
use crate::session::hash_worktree_id;
use crate::trailer::Trailers;
use crate::utils::debug_log;

const RESERVED_METADATA_DIR: &str = ".entire";

/// Shadow ref name for a given base commit and worktree id: `entire/<commit7>-<wthash6>`.
pub fn shadow_ref(base_commit: &str, worktree_id: &str) -> String {
    let prefix = &base_commit[..base_commit.len().min(7)];
    format!("entire/{prefix}-{}", hash_worktree_id(worktree_id))
}

/// Parse a shadow ref's short name (without `refs/` prefix) back into its two fields.
pub fn parse_shadow_ref(name: &str) -> Option<(&str, &str)> {
    let rest = name.strip_prefix("entire/")?;
    if rest == "checkpoints/v1" {
        return None;
    }
    rest.split_once('-')
}

pub struct WriteTemporaryOptions {
    pub base_commit: String,
    pub worktree_id: String,
    pub worktree_path: PathBuf,
    pub session_id: String,
    pub is_first_checkpoint: bool,
    pub modified_files: Vec<String>,
    pub new_files: Vec<String>,
    pub deleted_files: Vec<String>,
    /// Extra files (prompts, transcript chunks) to merge into the snapshot under
    /// `RESERVED_METADATA_DIR`, read from this absolute directory if present.
    pub metadata_dir_abs: Option<PathBuf>,
}

pub struct WriteTemporaryResult {
    pub commit_id: String,
    pub skipped: bool,
}

pub struct TemporaryCheckpointSummary {
    pub commit_id: String,
    pub session_id: Option<String>,
    pub metadata_path: Option<String>,
    pub is_task: bool,
}

pub struct TemporaryStore<'a> {
    repo: &'a Repository,
    store: ObjectStore<'a>,
}

impl<'a> TemporaryStore<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        TemporaryStore {
            repo,
            store: ObjectStore::new(repo),
        }
    }

    pub fn write_temporary(&self, opts: &WriteTemporaryOptions) -> Result<WriteTemporaryResult, EntireError> {
        if opts.base_commit.is_empty() {
            return Err(EntireError::InvalidId(opts.base_commit.clone()));
        }
        validate_session_id(&opts.session_id)?;

        let ref_name = shadow_ref(&opts.base_commit, &opts.worktree_id);
        let full_ref = format!("refs/{ref_name}");
        let parent_commit_id = self.store.resolve_ref(&full_ref)?;

        let base_tree_id = match &parent_commit_id {
            Some(commit_id) => self.store.read_commit(commit_id)?.tree,
            None => self.store.read_commit(&opts.base_commit)?.tree,
        };

        let last_tree_id = match &parent_commit_id {
            Some(commit_id) => Some(self.store.read_commit(commit_id)?.tree),
            None => None,
        };

        let mut flat: BTreeMap<String, (Mode, String)> = BTreeMap::new();
        tree_builder::flatten(&self.store, &base_tree_id, "", &mut flat)?;

        for deleted in &opts.deleted_files {
            flat.remove(deleted);
        }

        let paths_to_write: Vec<&String> = if opts.is_first_checkpoint {
            let mut all = Vec::new();
            walk_worktree(&opts.worktree_path, &opts.worktree_path, &mut all)?;
            return self.finish_write(opts, flat, all, parent_commit_id, last_tree_id, &ref_name, &full_ref);
        } else {
            opts.modified_files.iter().chain(opts.new_files.iter()).collect()
        };

        for path in paths_to_write {
            let abs = opts.worktree_path.join(path);
            match self.store.blob_from_file(&abs) {
                Ok(Some((id, mode))) => {
                    flat.insert(path.clone(), (mode, id));
                }
                Ok(None) => {
                    // symlink: never serialized
                }
                Err(EntireError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    flat.remove(path);
                }
                Err(e) => return Err(e),
            }
        }

        self.merge_metadata_dir(opts, &mut flat)?;

        self.commit_if_changed(opts, flat, parent_commit_id, last_tree_id, &ref_name, &full_ref)
    }

    fn finish_write(
        &self,
        opts: &WriteTemporaryOptions,
        mut flat: BTreeMap<String, (Mode, String)>,
        all_paths: Vec<String>,
        parent_commit_id: Option<String>,
        last_tree_id: Option<String>,
        ref_name: &str,
        full_ref: &str,
    ) -> Result<WriteTemporaryResult, EntireError> {
        for path in &all_paths {
            let abs = opts.worktree_path.join(path);
            if let Some((id, mode)) = self.store.blob_from_file(&abs)? {
                flat.insert(path.clone(), (mode, id));
            }
        }
        self.merge_metadata_dir(opts, &mut flat)?;
        self.commit_if_changed(opts, flat, parent_commit_id, last_tree_id, ref_name, full_ref)
    }

    fn merge_metadata_dir(
        &self,
        opts: &WriteTemporaryOptions,
        flat: &mut BTreeMap<String, (Mode, String)>,
    ) -> Result<(), EntireError> {
        let Some(metadata_dir_abs) = &opts.metadata_dir_abs else {
            return Ok(());
        };
        if !metadata_dir_abs.is_dir() {
            return Ok(());
        }
        let mut files = Vec::new();
        walk_worktree(metadata_dir_abs, metadata_dir_abs, &mut files)?;
        for relative in files {
            let abs = metadata_dir_abs.join(&relative);
            if let Some((id, mode)) = self.store.blob_from_file(&abs)? {
                flat.insert(format!("{RESERVED_METADATA_DIR}/{relative}"), (mode, id));
            }
        }
        Ok(())
    }

    fn commit_if_changed(
        &self,
        opts: &WriteTemporaryOptions,
        flat: BTreeMap<String, (Mode, String)>,
        parent_commit_id: Option<String>,
        last_tree_id: Option<String>,
        ref_name: &str,
        full_ref: &str,
    ) -> Result<WriteTemporaryResult, EntireError> {
        let new_tree_id = tree_builder::build(&self.store, &flat)?;

        if last_tree_id.as_deref() == Some(new_tree_id.as_str()) {
            debug_log(&format!("write_temporary: dedup, tree unchanged on {ref_name}"));
            return Ok(WriteTemporaryResult {
                commit_id: parent_commit_id.expect("tree identity implies a parent commit"),
                skipped: true,
            });
        }

        let trailers = Trailers {
            session: Some(opts.session_id.clone()),
            ephemeral_branch: Some(ref_name.to_string()),
            ..Default::default()
        };
        let message = format!("Shadow checkpoint\n\n{}", trailers.format());
        let (author_name, author_email) = self.repo.signature();

        let mut current_parent = parent_commit_id;
        let mut retried = false;
        loop {
            let parents: Vec<String> = current_parent.clone().into_iter().collect();
            let commit_id = self.store.put_commit(
                &new_tree_id,
                &parents,
                (&author_name, &author_email),
                (&author_name, &author_email),
                &message,
            )?;
            match self.store.set_ref(full_ref, &commit_id, current_parent.as_deref()) {
                Ok(()) => return Ok(WriteTemporaryResult { commit_id, skipped: false }),
                Err(e) if e.is_ref_race() && !retried => {
                    // Reload the fresh tip and recommit the same tree on top of it: the
                    // shadow ref has only one writer per (base_commit, worktree_id), so the
                    // race is against our own earlier attempt, not concurrent content.
                    retried = true;
                    current_parent = self.store.resolve_ref(full_ref)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn read_temporary(
        &self,
        base_commit: &str,
        worktree_id: &str,
    ) -> Result<Option<TemporaryCheckpointSummary>, EntireError> {
        let ref_name = shadow_ref(base_commit, worktree_id);
        let full_ref = format!("refs/{ref_name}");
        let Some(commit_id) = self.store.resolve_ref(&full_ref)? else {
            return Ok(None);
        };
        let commit = self.store.read_commit(&commit_id)?;
        let trailers = Trailers::parse(&commit.message);
        Ok(Some(TemporaryCheckpointSummary {
            commit_id,
            session_id: trailers.session,
            metadata_path: trailers.metadata,
            is_task: trailers.metadata_task.is_some(),
        }))
    }

    pub fn list_temporary(&self) -> Result<Vec<String>, EntireError> {
        let refs = self.store.iter_refs("refs/entire/")?;
        Ok(refs
            .into_iter()
            .filter_map(|r| r.strip_prefix("refs/").map(|s| s.to_string()))
            .filter(|name| parse_shadow_ref(name).is_some())
            .collect())
    }

    /// Walk commits on a session's shadow ref from the tip, filtering to `session_id` when
    /// given, stopping after `limit` matches.
    pub fn list_temporary_checkpoints(
        &self,
        base_commit: &str,
        worktree_id: &str,
        session_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<TemporaryCheckpointSummary>, EntireError> {
        let ref_name = shadow_ref(base_commit, worktree_id);
        let full_ref = format!("refs/{ref_name}");
        let mut current = self.store.resolve_ref(&full_ref)?;
        let mut out = Vec::new();

        while let Some(commit_id) = current {
            if out.len() >= limit {
                break;
            }
            let commit = self.store.read_commit(&commit_id)?;
            let trailers = Trailers::parse(&commit.message);

            let matches = session_id.is_none_or(|wanted| trailers.session.as_deref() == Some(wanted));
            if matches {
                out.push(TemporaryCheckpointSummary {
                    commit_id: commit_id.clone(),
                    session_id: trailers.session.clone(),
                    metadata_path: trailers.metadata.clone(),
                    is_task: trailers.metadata_task.is_some(),
                });
            }
            current = commit.parents.first().cloned();
        }

        Ok(out)
    }

    /// Write a subagent task checkpoint under `tasks/<tool-use-id>/` on the shadow ref.
    /// `final_checkpoint` selects between an incremental snapshot (`checkpoints/NNN-<id>.json`)
    /// and the terminal `checkpoint.json` plus chunked subagent transcript.
    pub fn write_temporary_task(
        &self,
        opts: &WriteTemporaryOptions,
        tool_use_id: &str,
        task: &crate::store::models::TaskCheckpoint,
        sequence: Option<u64>,
        transcript: Option<&[u8]>,
    ) -> Result<WriteTemporaryResult, EntireError> {
        crate::validation::validate_path_segment(tool_use_id)?;

        let ref_name = shadow_ref(&opts.base_commit, &opts.worktree_id);
        let full_ref = format!("refs/{ref_name}");
        let parent_commit_id = self.store.resolve_ref(&full_ref)?;
        let base_tree_id = match &parent_commit_id {
            Some(commit_id) => self.store.read_commit(commit_id)?.tree,
            None => self.store.read_commit(&opts.base_commit)?.tree,
        };

        let mut flat: BTreeMap<String, (Mode, String)> = BTreeMap::new();
        tree_builder::flatten(&self.store, &base_tree_id, "", &mut flat)?;

        let task_prefix = format!("tasks/{tool_use_id}");
        match sequence {
            Some(seq) => {
                let incremental = crate::store::models::IncrementalCheckpoint {
                    sequence: seq,
                    checkpoint_id: task.tool_use_id.clone(),
                    created_at: task.created_at,
                    files_touched: task.files_touched.clone(),
                };
                let bytes = serde_json::to_vec_pretty(&incremental)?;
                let id = self.store.put_blob(&bytes)?;
                flat.insert(
                    format!("{task_prefix}/checkpoints/{seq:03}-{}.json", task.tool_use_id),
                    (Mode::Regular, id),
                );
            }
            None => {
                let bytes = serde_json::to_vec_pretty(task)?;
                let id = self.store.put_blob(&bytes)?;
                flat.insert(format!("{task_prefix}/checkpoint.json"), (Mode::Regular, id));

                if let Some(transcript_bytes) = transcript {
                    let id = self.store.put_blob(transcript_bytes)?;
                    flat.insert(
                        format!("{task_prefix}/agent-{}.jsonl", task.agent_id),
                        (Mode::Regular, id),
                    );
                }
            }
        }

        let new_tree_id = tree_builder::build(&self.store, &flat)?;
        let trailers = Trailers {
            session: Some(opts.session_id.clone()),
            ephemeral_branch: Some(ref_name.clone()),
            metadata_task: Some(format!("{task_prefix}/checkpoint.json")),
            ..Default::default()
        };
        let message = format!("Task checkpoint\n\n{}", trailers.format());
        let (author_name, author_email) = self.repo.signature();
        let parents: Vec<String> = parent_commit_id.clone().into_iter().collect();
        let commit_id = self.store.put_commit(
            &new_tree_id,
            &parents,
            (&author_name, &author_email),
            (&author_name, &author_email),
            &message,
        )?;
        self.store.set_ref(&full_ref, &commit_id, parent_commit_id.as_deref())?;

        Ok(WriteTemporaryResult { commit_id, skipped: false })
    }
}

fn walk_worktree(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<(), EntireError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let file_name = entry.file_name();
        if file_name == ".git" || file_name == RESERVED_METADATA_DIR {
            continue;
        }
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk_worktree(root, &path, out)?;
        } else if file_type.is_file() || file_type.is_symlink() {
            if let Ok(relative) = path.strip_prefix(root) {
                out.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_ref_uses_seven_char_commit_prefix_and_six_char_hash() {
        let name = shadow_ref("abcdef0123456789", "wt-1");
        assert!(name.starts_with("entire/abcdef0-"));
        let (commit, hash) = parse_shadow_ref(&name).unwrap();
        assert_eq!(commit, "abcdef0");
        assert_eq!(hash.len(), 6);
    }

    #[test]
    fn shadow_ref_is_deterministic() {
        assert_eq!(shadow_ref("abc1234", "wt"), shadow_ref("abc1234", "wt"));
    }

    #[test]
    fn parse_shadow_ref_rejects_the_permanent_ref() {
        assert!(parse_shadow_ref("entire/checkpoints/v1").is_none());
    }

    #[test]
    fn parse_shadow_ref_rejects_unrelated_names() {
        assert!(parse_shadow_ref("refs/heads/main").is_none());
    }
}
