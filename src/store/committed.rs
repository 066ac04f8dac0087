use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;

use crate::config::Config;
use crate::error::EntireError;
use crate::git::object_store::{Mode, ObjectStore};
use crate::git::repository::Repository;
use crate::git::tree_builder;
use crate::id::{parse_checkpoint_id, shard_path};
use crate::store::models::{merge_files_touched, CheckpointSummary, CommittedMetadata, TokenUsage};
use crate::trailer::Trailers;
use crate::transcript;

pub struct WriteCommittedOptions {
    pub checkpoint_id: String,
    pub session_id: String,
    pub strategy: String,
    pub branch: String,
    pub files_touched: Vec<String>,
    pub agent: String,
    pub turn_id: String,
    pub is_task: bool,
    pub tool_use_id: Option<String>,
    pub transcript_start_offset: u64,
    pub token_usage: Option<TokenUsage>,
    pub transcript: Option<Vec<u8>>,
    pub transcript_path: Option<PathBuf>,
    pub prompts: Vec<String>,
    pub context: Vec<u8>,
    pub metadata_dir: Option<PathBuf>,
}

pub struct UpdateCommittedOptions {
    pub checkpoint_id: String,
    pub session_id: String,
    pub transcript: Option<Vec<u8>>,
    pub transcript_path: Option<PathBuf>,
    pub prompts: Vec<String>,
    pub context: Vec<u8>,
}

pub struct CommittedCheckpoint {
    pub summary: CheckpointSummary,
    pub metadata: CommittedMetadata,
    pub transcript: Vec<u8>,
    pub prompts: String,
    pub context: Vec<u8>,
}

/// A tree state plus commit message, ready to be turned into a commit against some parent.
/// Built fresh by a `commit_with_retry` closure on every attempt, so a retry after a lost CAS
/// race recomputes this against the tree the winning writer actually left behind.
struct CommitBuild {
    flat: BTreeMap<String, (Mode, String)>,
    message: String,
}

pub struct CommittedStore<'a> {
    repo: &'a Repository,
    store: ObjectStore<'a>,
}

impl<'a> CommittedStore<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        CommittedStore {
            repo,
            store: ObjectStore::new(repo),
        }
    }

    fn permanent_ref(&self) -> String {
        format!("refs/{}", Config::get().permanent_ref(self.repo))
    }

    fn remote_permanent_ref(&self) -> String {
        format!("refs/remotes/origin/{}", Config::get().permanent_ref(self.repo))
    }

    pub fn write_committed(&self, opts: &WriteCommittedOptions) -> Result<String, EntireError> {
        let checkpoint_id = parse_checkpoint_id(&opts.checkpoint_id)?;
        let base_path = shard_path(&checkpoint_id);
        let ref_name = self.permanent_ref();

        // Blob content that doesn't depend on the prior tree state is written once, up front,
        // so a retry after a lost CAS race doesn't redo the (possibly large) transcript hashing
        // and chunking.
        let transcript_bytes = self.load_transcript_bytes(opts)?;
        let format = transcript::detect_format(&transcript_bytes);
        let chunk_ids: Vec<(String, String)> = transcript::chunk(&transcript_bytes, format)
            .iter()
            .enumerate()
            .map(|(index, chunk_bytes)| Ok((transcript::chunk_file_name(index), self.store.put_blob(chunk_bytes)?)))
            .collect::<Result<_, EntireError>>()?;
        let content_hash = crate::utils::sha256_hex(&transcript_bytes);
        let hash_id = self.store.put_blob(content_hash.as_bytes())?;
        let prompts_joined = opts.prompts.join("\n\n---\n\n");
        let prompts_id = self.store.put_blob(prompts_joined.as_bytes())?;
        let context_id = self.store.put_blob(&opts.context)?;

        self.commit_with_retry(&ref_name, |old_head| {
            let mut flat = self.flat_tree_at(old_head)?;

            let prior_root: Option<CheckpointSummary> = self.read_summary(&flat, &base_path)?;
            if let Some(prior) = &prior_root {
                self.archive_latest_session(&mut flat, &base_path, prior.session_count)?;
            }

            for (name, id) in &chunk_ids {
                flat.insert(format!("{base_path}/{name}"), (Mode::Regular, id.clone()));
            }
            flat.insert(format!("{base_path}/content_hash.txt"), (Mode::Regular, hash_id.clone()));
            flat.insert(format!("{base_path}/prompt.txt"), (Mode::Regular, prompts_id.clone()));
            flat.insert(format!("{base_path}/context.md"), (Mode::Regular, context_id.clone()));

            if let Some(metadata_dir) = &opts.metadata_dir {
                self.merge_metadata_dir(metadata_dir, &base_path, &mut flat)?;
            }

            let prior_files: Vec<String> = prior_root.as_ref().map(|s| s.files_touched.clone()).unwrap_or_default();
            let files_touched = merge_files_touched(&prior_files, &opts.files_touched);
            let session_count = prior_root.as_ref().map(|s| s.session_count).unwrap_or(0) + 1;
            let mut session_ids = prior_root.as_ref().map(|s| s.session_ids.clone()).unwrap_or_default();
            session_ids.push(opts.session_id.clone());
            // Per-session contribution count for this checkpoint id; a session revisiting the
            // same checkpoint id (rare — ids are random) would need its own prior count read,
            // which the archive-on-merge path already discards, so this is always the session's
            // first contribution under this id.
            let checkpoints_count = 1;
            let created_at = Utc::now();

            let metadata = CommittedMetadata {
                checkpoint_id: checkpoint_id.clone(),
                session_id: opts.session_id.clone(),
                strategy: opts.strategy.clone(),
                created_at,
                branch: opts.branch.clone(),
                checkpoints_count,
                files_touched: files_touched.clone(),
                agent: opts.agent.clone(),
                turn_id: opts.turn_id.clone(),
                is_task: opts.is_task,
                tool_use_id: opts.tool_use_id.clone(),
                transcript_start_offset: opts.transcript_start_offset,
                token_usage: opts.token_usage.clone(),
                ai_summary: None,
                initial_attribution: None,
                session_transcript_source: None,
            };
            let metadata_bytes = serde_json::to_vec_pretty(&metadata)?;
            let metadata_id = self.store.put_blob(&metadata_bytes)?;
            flat.insert(format!("{base_path}/0/metadata.json"), (Mode::Regular, metadata_id));

            let summary = CheckpointSummary {
                cli_version: env!("CARGO_PKG_VERSION").to_string(),
                checkpoint_id: checkpoint_id.clone(),
                strategy: opts.strategy.clone(),
                branch: opts.branch.clone(),
                created_at,
                session_count,
                session_ids,
                files_touched,
                token_usage: opts.token_usage.clone(),
            };
            let summary_bytes = serde_json::to_vec_pretty(&summary)?;
            let summary_id = self.store.put_blob(&summary_bytes)?;
            flat.insert(format!("{base_path}/metadata.json"), (Mode::Regular, summary_id));

            let trailers = Trailers {
                session: Some(opts.session_id.clone()),
                strategy: Some(opts.strategy.clone()),
                agent: Some(opts.agent.clone()),
                checkpoint: Some(checkpoint_id.clone()),
                ..Default::default()
            };
            let message = format!("Checkpoint: {checkpoint_id}\n\n{}", trailers.format());

            Ok(CommitBuild { flat, message })
        })
    }

    fn flat_tree_at(&self, commit_id: Option<&str>) -> Result<BTreeMap<String, (Mode, String)>, EntireError> {
        match commit_id {
            Some(commit_id) => {
                let tree_id = self.store.read_commit(commit_id)?.tree;
                let mut flat = BTreeMap::new();
                tree_builder::flatten(&self.store, &tree_id, "", &mut flat)?;
                Ok(flat)
            }
            None => Ok(BTreeMap::new()),
        }
    }

    fn load_transcript_bytes(&self, opts: &WriteCommittedOptions) -> Result<Vec<u8>, EntireError> {
        if let Some(bytes) = &opts.transcript {
            return Ok(bytes.clone());
        }
        if let Some(path) = &opts.transcript_path {
            return Ok(std::fs::read(path)?);
        }
        Ok(Vec::new())
    }

    fn merge_metadata_dir(
        &self,
        metadata_dir: &std::path::Path,
        base_path: &str,
        flat: &mut BTreeMap<String, (Mode, String)>,
    ) -> Result<(), EntireError> {
        fn walk(store: &ObjectStore, root: &std::path::Path, dir: &std::path::Path, base_path: &str, flat: &mut BTreeMap<String, (Mode, String)>) -> Result<(), EntireError> {
            for entry in std::fs::read_dir(dir)? {
                let entry = entry?;
                let path = entry.path();
                let file_type = entry.file_type()?;
                if file_type.is_symlink() {
                    continue;
                }
                if file_type.is_dir() {
                    walk(store, root, &path, base_path, flat)?;
                } else if file_type.is_file() {
                    let relative = path.strip_prefix(root).expect("walked from root").to_string_lossy().replace('\\', "/");
                    crate::validation::validate_relative_path(&relative)?;
                    if let Some((id, mode)) = store.blob_from_file(&path)? {
                        flat.insert(format!("{base_path}/{relative}"), (mode, id));
                    }
                }
            }
            Ok(())
        }
        walk(&self.store, metadata_dir, metadata_dir, base_path, flat)
    }

    /// Move the current (`0/`) session's files to `<N>/` where N is the prior session count,
    /// making room for the incoming session at `0/`.
    fn archive_latest_session(
        &self,
        flat: &mut BTreeMap<String, (Mode, String)>,
        base_path: &str,
        prior_session_count: u64,
    ) -> Result<(), EntireError> {
        let archive_index = prior_session_count.max(1);
        let names = [
            "metadata.json",
            "full.jsonl",
            "prompt.txt",
            "context.md",
            "content_hash.txt",
        ];
        let mut to_archive: Vec<(String, (Mode, String))> = Vec::new();
        let prefix = format!("{base_path}/0/");
        for (path, entry) in flat.iter() {
            if path.starts_with(&prefix) {
                let suffix = &path[prefix.len()..];
                let is_chunk = suffix.starts_with("full.jsonl.") || names.contains(&suffix);
                if is_chunk {
                    to_archive.push((suffix.to_string(), entry.clone()));
                }
            }
        }
        for (suffix, entry) in to_archive {
            let old_path = format!("{base_path}/0/{suffix}");
            let new_path = format!("{base_path}/{archive_index}/{suffix}");
            flat.remove(&old_path);
            flat.insert(new_path, entry);
        }
        Ok(())
    }

    fn read_summary(
        &self,
        flat: &BTreeMap<String, (Mode, String)>,
        base_path: &str,
    ) -> Result<Option<CheckpointSummary>, EntireError> {
        self.read_json(flat, &format!("{base_path}/metadata.json"))
    }

    fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        flat: &BTreeMap<String, (Mode, String)>,
        path: &str,
    ) -> Result<Option<T>, EntireError> {
        let Some((_, id)) = flat.get(path) else {
            return Ok(None);
        };
        let bytes = self.store.read_blob(id)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Commit `build`'s output against the permanent ref. `build` is handed the ref's current
    /// tip (`None` for an unborn ref) and must derive its tree and message purely from that —
    /// on a lost CAS race, the fresh tip is reloaded and `build` runs again from scratch, then
    /// the write is retried exactly once more before the race propagates.
    fn commit_with_retry<F>(&self, ref_name: &str, mut build: F) -> Result<String, EntireError>
    where
        F: FnMut(Option<&str>) -> Result<CommitBuild, EntireError>,
    {
        let (author_name, author_email) = self.repo.signature();
        let mut old_head = self.store.resolve_ref(ref_name)?;
        let mut retried = false;
        loop {
            let built = build(old_head.as_deref())?;
            let tree_id = tree_builder::build(&self.store, &built.flat)?;
            let parents: Vec<String> = old_head.clone().into_iter().collect();
            let commit_id = self.store.put_commit(
                &tree_id,
                &parents,
                (&author_name, &author_email),
                (&author_name, &author_email),
                &built.message,
            )?;
            match self.store.set_ref(ref_name, &commit_id, old_head.as_deref()) {
                Ok(()) => return Ok(commit_id),
                Err(e) if e.is_ref_race() && !retried => {
                    retried = true;
                    old_head = self.store.resolve_ref(ref_name)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn read_tree_for_ref(&self) -> Result<Option<BTreeMap<String, (Mode, String)>>, EntireError> {
        let primary = self.permanent_ref();
        let resolved = match self.store.resolve_ref(&primary)? {
            Some(id) => Some(id),
            None => self.store.resolve_ref(&self.remote_permanent_ref())?,
        };
        let Some(commit_id) = resolved else {
            return Ok(None);
        };
        let tree_id = self.store.read_commit(&commit_id)?.tree;
        let mut flat = BTreeMap::new();
        tree_builder::flatten(&self.store, &tree_id, "", &mut flat)?;
        Ok(Some(flat))
    }

    pub fn read_committed(&self, checkpoint_id: &str) -> Result<Option<CommittedCheckpoint>, EntireError> {
        let checkpoint_id = parse_checkpoint_id(checkpoint_id)?;
        let Some(flat) = self.read_tree_for_ref()? else {
            return Ok(None);
        };
        let base_path = shard_path(&checkpoint_id);
        let Some(summary) = self.read_summary(&flat, &base_path)? else {
            return Ok(None);
        };
        let metadata: CommittedMetadata = self
            .read_json(&flat, &format!("{base_path}/0/metadata.json"))?
            .ok_or_else(|| EntireError::TreeCorrupt(format!("missing session metadata for {checkpoint_id}")))?;

        let transcript = self.read_chunked(&flat, &base_path, 0)?;
        let prompts = self.read_text(&flat, &format!("{base_path}/0/prompt.txt"))?;
        let context = self.read_bytes(&flat, &format!("{base_path}/0/context.md"))?;

        Ok(Some(CommittedCheckpoint {
            summary,
            metadata,
            transcript,
            prompts,
            context,
        }))
    }

    pub fn read_session_content(
        &self,
        checkpoint_id: &str,
        index: u64,
    ) -> Result<Option<CommittedCheckpoint>, EntireError> {
        let checkpoint_id = parse_checkpoint_id(checkpoint_id)?;
        let Some(flat) = self.read_tree_for_ref()? else {
            return Ok(None);
        };
        let base_path = shard_path(&checkpoint_id);
        let Some(summary) = self.read_summary(&flat, &base_path)? else {
            return Ok(None);
        };
        let Some(metadata) = self.read_json(&flat, &format!("{base_path}/{index}/metadata.json"))? else {
            return Ok(None);
        };
        let transcript = self.read_chunked(&flat, &base_path, index)?;
        let prompts = self.read_text(&flat, &format!("{base_path}/{index}/prompt.txt"))?;
        let context = self.read_bytes(&flat, &format!("{base_path}/{index}/context.md"))?;
        Ok(Some(CommittedCheckpoint { summary, metadata, transcript, prompts, context }))
    }

    fn read_chunked(
        &self,
        flat: &BTreeMap<String, (Mode, String)>,
        base_path: &str,
        index: u64,
    ) -> Result<Vec<u8>, EntireError> {
        let prefix = format!("{base_path}/{index}/");
        let mut named_chunks = Vec::new();
        for (path, (_, id)) in flat {
            if let Some(suffix) = path.strip_prefix(&prefix) {
                if suffix == "full.jsonl" || suffix.starts_with("full.jsonl.") {
                    named_chunks.push((suffix.to_string(), self.store.read_blob(id)?));
                } else if suffix == "transcript.jsonl" {
                    // legacy single-file name
                    named_chunks.push(("full.jsonl".to_string(), self.store.read_blob(id)?));
                }
            }
        }
        Ok(transcript::join_chunks(named_chunks))
    }

    fn read_text(&self, flat: &BTreeMap<String, (Mode, String)>, path: &str) -> Result<String, EntireError> {
        Ok(String::from_utf8(self.read_bytes(flat, path)?)?)
    }

    fn read_bytes(&self, flat: &BTreeMap<String, (Mode, String)>, path: &str) -> Result<Vec<u8>, EntireError> {
        match flat.get(path) {
            Some((_, id)) => self.store.read_blob(id),
            None => Ok(Vec::new()),
        }
    }

    pub fn update_committed(&self, opts: &UpdateCommittedOptions) -> Result<String, EntireError> {
        let checkpoint_id = parse_checkpoint_id(&opts.checkpoint_id)?;
        let ref_name = self.permanent_ref();
        let base_path = shard_path(&checkpoint_id);

        let transcript_bytes = match (&opts.transcript, &opts.transcript_path) {
            (Some(bytes), _) => bytes.clone(),
            (None, Some(path)) => std::fs::read(path)?,
            (None, None) => Vec::new(),
        };
        let format = transcript::detect_format(&transcript_bytes);
        let chunk_ids: Vec<(String, String)> = transcript::chunk(&transcript_bytes, format)
            .iter()
            .enumerate()
            .map(|(index, chunk_bytes)| Ok((transcript::chunk_file_name(index), self.store.put_blob(chunk_bytes)?)))
            .collect::<Result<_, EntireError>>()?;
        let content_hash = crate::utils::sha256_hex(&transcript_bytes);
        let hash_id = self.store.put_blob(content_hash.as_bytes())?;
        let prompts_joined = opts.prompts.join("\n\n---\n\n");
        let prompts_id = self.store.put_blob(prompts_joined.as_bytes())?;
        let context_id = self.store.put_blob(&opts.context)?;

        self.commit_with_retry(&ref_name, |old_head| {
            let Some(commit_id) = old_head else {
                return Err(EntireError::CheckpointNotFound(checkpoint_id.clone()));
            };
            let mut flat = self.flat_tree_at(Some(commit_id))?;

            if self.read_summary(&flat, &base_path)?.is_none() {
                return Err(EntireError::CheckpointNotFound(checkpoint_id.clone()));
            }

            // Resolve which session slot to update: the one matching `session_id`, falling back
            // to the latest (`0/`) slot if the caller's session id isn't the most recent writer.
            let target_index = self.resolve_session_slot(&flat, &base_path, &opts.session_id)?;
            let prefix = format!("{base_path}/{target_index}/");

            // Clear any previously written chunk files for this slot before writing the new
            // set, since a shorter transcript must not leave stale tail chunks behind.
            flat.retain(|path, _| {
                !(path.starts_with(&prefix) && {
                    let suffix = &path[prefix.len()..];
                    suffix == "full.jsonl" || suffix.starts_with("full.jsonl.")
                })
            });
            for (name, id) in &chunk_ids {
                flat.insert(format!("{prefix}{name}"), (Mode::Regular, id.clone()));
            }
            flat.insert(format!("{prefix}content_hash.txt"), (Mode::Regular, hash_id.clone()));
            flat.insert(format!("{prefix}prompt.txt"), (Mode::Regular, prompts_id.clone()));
            flat.insert(format!("{prefix}context.md"), (Mode::Regular, context_id.clone()));

            let trailers = Trailers {
                session: Some(opts.session_id.clone()),
                strategy: Some("update".to_string()),
                agent: Some(String::new()),
                checkpoint: Some(checkpoint_id.clone()),
                ..Default::default()
            };
            let message = format!("Checkpoint: {checkpoint_id}\n\n{}", trailers.format());

            Ok(CommitBuild { flat, message })
        })
    }

    fn resolve_session_slot(
        &self,
        flat: &BTreeMap<String, (Mode, String)>,
        base_path: &str,
        session_id: &str,
    ) -> Result<u64, EntireError> {
        let summary = self
            .read_summary(flat, base_path)?
            .ok_or_else(|| EntireError::CheckpointNotFound(base_path.to_string()))?;
        for index in 0..summary.session_count {
            if let Some(metadata) = self.read_json::<CommittedMetadata>(flat, &format!("{base_path}/{index}/metadata.json"))? {
                if metadata.session_id == session_id {
                    return Ok(index);
                }
            }
        }
        Ok(0)
    }

    pub fn update_summary(&self, checkpoint_id: &str, summary_text: &str) -> Result<String, EntireError> {
        let checkpoint_id = parse_checkpoint_id(checkpoint_id)?;
        let ref_name = self.permanent_ref();
        let base_path = shard_path(&checkpoint_id);

        self.commit_with_retry(&ref_name, |old_head| {
            let Some(commit_id) = old_head else {
                return Err(EntireError::CheckpointNotFound(checkpoint_id.clone()));
            };
            let mut flat = self.flat_tree_at(Some(commit_id))?;

            let metadata_path = format!("{base_path}/0/metadata.json");
            let mut metadata: CommittedMetadata = self
                .read_json(&flat, &metadata_path)?
                .ok_or_else(|| EntireError::CheckpointNotFound(checkpoint_id.clone()))?;
            metadata.ai_summary = Some(summary_text.to_string());

            let bytes = serde_json::to_vec_pretty(&metadata)?;
            let id = self.store.put_blob(&bytes)?;
            flat.insert(metadata_path, (Mode::Regular, id));

            let trailers = Trailers {
                session: Some(metadata.session_id.clone()),
                strategy: Some(metadata.strategy.clone()),
                agent: Some(metadata.agent.clone()),
                checkpoint: Some(checkpoint_id.clone()),
                ..Default::default()
            };
            let message = format!("Checkpoint: {checkpoint_id}\n\n{}", trailers.format());

            Ok(CommitBuild { flat, message })
        })
    }

    pub fn list_committed(&self) -> Result<Vec<CheckpointSummary>, EntireError> {
        let Some(flat) = self.read_tree_for_ref()? else {
            return Ok(Vec::new());
        };
        let mut summaries = Vec::new();
        for (path, (_, id)) in &flat {
            if path.ends_with("/metadata.json") && path.matches('/').count() == 2 {
                let bytes = self.store.read_blob(id)?;
                summaries.push(serde_json::from_slice::<CheckpointSummary>(&bytes)?);
            }
        }
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    pub fn get_checkpoint_author(&self, checkpoint_id: &str) -> Result<Option<(String, String)>, EntireError> {
        let checkpoint_id = parse_checkpoint_id(checkpoint_id)?;
        let ref_name = self.permanent_ref();
        let base_path = shard_path(&checkpoint_id);
        let target_path = format!("{base_path}/metadata.json");

        let mut current = self.store.resolve_ref(&ref_name)?;
        let mut last_introducing: Option<String> = None;
        while let Some(commit_id) = current {
            let commit = self.store.read_commit(&commit_id)?;
            let mut flat = BTreeMap::new();
            tree_builder::flatten(&self.store, &commit.tree, "", &mut flat)?;
            if flat.contains_key(&target_path) {
                last_introducing = Some(commit.author.clone());
            } else {
                break;
            }
            current = commit.parents.first().cloned();
        }

        Ok(last_introducing.map(|author| parse_author_line(&author)))
    }
}

fn parse_author_line(line: &str) -> (String, String) {
    if let Some(open) = line.find('<') {
        let name = line[..open].trim().to_string();
        let email = line[open + 1..].splitn(2, '>').next().unwrap_or("").to_string();
        (name, email)
    } else {
        (line.trim().to_string(), String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_author_line_splits_name_and_email() {
        assert_eq!(
            parse_author_line("Jane Doe <jane@example.com> 1700000000 +0000"),
            ("Jane Doe".to_string(), "jane@example.com".to_string())
        );
    }

    #[test]
    fn parse_author_line_tolerates_missing_email() {
        assert_eq!(parse_author_line("Unknown"), ("Unknown".to_string(), String::new()));
    }
}
