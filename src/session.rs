use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EntireError;
use crate::fsm::Phase;
use crate::git::repository::Repository;
use crate::id::validate_session_id;

/// Persisted per-session record. The ref database is authoritative; this is a weak index
/// used to resume a session's bookkeeping (files touched, pending checkpoints) across
/// process invocations, not a second source of truth for checkpoint contents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    pub session_id: String,
    pub worktree_path: PathBuf,
    pub worktree_id: String,
    pub base_commit: String,
    pub phase: String,
    pub started_at: DateTime<Utc>,
    pub last_interaction: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub turn_id: String,
    pub step_count: u64,
    /// Path touched during this session mapped to the blob id the session itself last wrote
    /// there; used for content-aware overlap detection in `CheckpointEngine::post_commit`.
    pub files_touched: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_prompt: Option<String>,
    pub turn_checkpoint_ids: Vec<String>,
    pub last_transcript_offset: u64,
    pub cli_version: String,
}

impl SessionState {
    pub fn new(
        session_id: &str,
        worktree_path: PathBuf,
        worktree_id: String,
        base_commit: String,
    ) -> Result<SessionState, EntireError> {
        validate_session_id(session_id)?;
        let now = Utc::now();
        Ok(SessionState {
            session_id: session_id.to_string(),
            worktree_path,
            worktree_id,
            base_commit,
            phase: Phase::Idle.as_str().to_string(),
            started_at: now,
            last_interaction: now,
            ended_at: None,
            turn_id: String::new(),
            step_count: 0,
            files_touched: BTreeMap::new(),
            pending_prompt: None,
            turn_checkpoint_ids: Vec::new(),
            last_transcript_offset: 0,
            cli_version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    pub fn phase(&self) -> Phase {
        Phase::from_str_normalized(&self.phase)
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase.as_str().to_string();
    }

    fn state_dir(repo: &Repository) -> PathBuf {
        repo.git_dir().join("entire-sessions")
    }

    fn state_path(repo: &Repository, session_id: &str) -> PathBuf {
        Self::state_dir(repo).join(format!("{session_id}.json"))
    }

    pub fn load(repo: &Repository, session_id: &str) -> Result<Option<SessionState>, EntireError> {
        validate_session_id(session_id)?;
        let path = Self::state_path(repo, session_id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Write-to-temp-then-rename so readers never observe a partially written file.
    pub fn save(&self, repo: &Repository) -> Result<(), EntireError> {
        let dir = Self::state_dir(repo);
        std::fs::create_dir_all(&dir)?;
        let final_path = Self::state_path(repo, &self.session_id);
        let tmp_path = dir.join(format!("{}.json.tmp-{}", self.session_id, std::process::id()));

        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(&tmp_path, bytes)?;
        std::fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    pub fn delete(repo: &Repository, session_id: &str) -> Result<(), EntireError> {
        validate_session_id(session_id)?;
        let path = Self::state_path(repo, session_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Deterministic hash of a worktree id (empty for the main worktree) used to keep shadow
/// refs of sibling worktrees on the same base commit from colliding.
pub fn hash_worktree_id(worktree_id: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(worktree_id.as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(3).map(|b| format!("{b:02x}")).collect()
}

pub fn discover_repo(path: &Path) -> Result<Repository, EntireError> {
    Repository::discover(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_idle_with_empty_bookkeeping() {
        let session = SessionState::new("sess-1", PathBuf::from("/repo"), String::new(), "abc123".to_string())
            .unwrap();
        assert_eq!(session.phase(), Phase::Idle);
        assert!(session.files_touched.is_empty());
        assert!(session.turn_checkpoint_ids.is_empty());
    }

    #[test]
    fn rejects_invalid_session_ids() {
        let err = SessionState::new("a/b", PathBuf::from("/repo"), String::new(), "abc".to_string());
        assert!(err.is_err());
    }

    #[test]
    fn worktree_hash_is_deterministic_and_short() {
        let a = hash_worktree_id("worktree-7");
        let b = hash_worktree_id("worktree-7");
        assert_eq!(a, b);
        assert_eq!(a.len(), 6);
    }

    #[test]
    fn worktree_hash_differs_across_ids() {
        assert_ne!(hash_worktree_id("one"), hash_worktree_id("two"));
    }
}
