use std::path::PathBuf;

use crate::config::Config;
use crate::error::EntireError;
use crate::fsm::{self, Action, Context as FsmContext, Event, Phase};
use crate::git::object_store::ObjectStore;
use crate::git::repository::Repository;
use crate::id::new_checkpoint_id;
use crate::session::SessionState;
use crate::store::committed::{CommittedStore, WriteCommittedOptions};
use crate::store::models::TokenUsage;
use crate::store::temporary::{TemporaryStore, WriteTemporaryOptions};
use crate::utils::debug_log;

/// Orchestrates the Phase FSM against the store: binds each FSM action to a concrete store
/// call, tracks content-aware overlap, and carries `files_touched` forward across turns.
pub struct CheckpointEngine<'a> {
    repo: &'a Repository,
}

/// What TurnStart needs to record when it creates a brand-new session.
pub struct TurnStartOptions {
    pub session_id: String,
    pub agent: String,
    pub prompt: Option<String>,
    pub worktree_id: String,
}

impl<'a> CheckpointEngine<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        CheckpointEngine { repo }
    }

    pub fn turn_start(&self, opts: &TurnStartOptions) -> Result<SessionState, EntireError> {
        let mut session = match SessionState::load(self.repo, &opts.session_id)? {
            Some(session) => session,
            None => {
                let base_commit = self.repo.head()?;
                SessionState::new(
                    &opts.session_id,
                    self.repo.workdir().to_path_buf(),
                    opts.worktree_id.clone(),
                    base_commit,
                )?
            }
        };

        let ctx = FsmContext {
            has_files_touched: !session.files_touched.is_empty(),
            is_rebase_in_progress: self.repo.is_rebase_in_progress(),
        };
        let (new_phase, actions) = fsm::transition(session.phase(), Event::TurnStart, ctx);
        session.set_phase(new_phase);
        self.apply_actions(&mut session, &actions)?;
        session.pending_prompt = opts.prompt.clone();
        session.turn_id = uuid::Uuid::new_v4().to_string();
        session.save(self.repo)?;
        Ok(session)
    }

    pub fn turn_end(&self, session_id: &str) -> Result<(), EntireError> {
        let Some(mut session) = SessionState::load(self.repo, session_id)? else {
            return Ok(());
        };
        let ctx = FsmContext {
            has_files_touched: !session.files_touched.is_empty(),
            is_rebase_in_progress: self.repo.is_rebase_in_progress(),
        };
        let (new_phase, actions) = fsm::transition(session.phase(), Event::TurnEnd, ctx);
        session.set_phase(new_phase);
        self.apply_actions(&mut session, &actions)?;

        let committed = CommittedStore::new(self.repo);
        let pending: Vec<String> = std::mem::take(&mut session.turn_checkpoint_ids);
        for checkpoint_id in pending {
            let update = crate::store::committed::UpdateCommittedOptions {
                checkpoint_id,
                session_id: session.session_id.clone(),
                transcript: None,
                transcript_path: None,
                prompts: session.pending_prompt.iter().cloned().collect(),
                context: Vec::new(),
            };
            committed.update_committed(&update)?;
        }
        session.pending_prompt = None;
        session.save(self.repo)?;
        Ok(())
    }

    pub fn session_start(&self, session_id: &str, worktree_id: &str) -> Result<(), EntireError> {
        let mut session = match SessionState::load(self.repo, session_id)? {
            Some(session) => session,
            None => {
                let base_commit = self.repo.head()?;
                SessionState::new(session_id, self.repo.workdir().to_path_buf(), worktree_id.to_string(), base_commit)?
            }
        };
        let ctx = FsmContext {
            has_files_touched: !session.files_touched.is_empty(),
            is_rebase_in_progress: self.repo.is_rebase_in_progress(),
        };
        let (new_phase, actions) = fsm::transition(session.phase(), Event::SessionStart, ctx);
        session.set_phase(new_phase);
        self.apply_actions(&mut session, &actions)?;
        session.save(self.repo)?;
        Ok(())
    }

    pub fn session_stop(&self, session_id: &str) -> Result<(), EntireError> {
        let Some(mut session) = SessionState::load(self.repo, session_id)? else {
            return Ok(());
        };
        let ctx = FsmContext {
            has_files_touched: !session.files_touched.is_empty(),
            is_rebase_in_progress: self.repo.is_rebase_in_progress(),
        };
        let (new_phase, actions) = fsm::transition(session.phase(), Event::SessionStop, ctx);
        session.set_phase(new_phase);
        self.apply_actions(&mut session, &actions)?;
        session.save(self.repo)?;
        Ok(())
    }

    /// Invoked when the in-progress session's file set changes mid-turn; writes a shadow
    /// commit and records the blob id the session itself wrote for each touched path.
    pub fn save_temporary(
        &self,
        session_id: &str,
        modified_files: Vec<String>,
        new_files: Vec<String>,
        deleted_files: Vec<String>,
        is_first_checkpoint: bool,
    ) -> Result<(), EntireError> {
        let Some(mut session) = SessionState::load(self.repo, session_id)? else {
            return Err(EntireError::NotFound(format!("session {session_id}")));
        };

        let temp_store = TemporaryStore::new(self.repo);
        let opts = WriteTemporaryOptions {
            base_commit: session.base_commit.clone(),
            worktree_id: session.worktree_id.clone(),
            worktree_path: session.worktree_path.clone(),
            session_id: session.session_id.clone(),
            is_first_checkpoint,
            modified_files: modified_files.clone(),
            new_files: new_files.clone(),
            deleted_files: deleted_files.clone(),
            metadata_dir_abs: None,
        };
        let result = temp_store.write_temporary(&opts)?;

        if !result.skipped {
            let object_store = ObjectStore::new(self.repo);
            let commit = object_store.read_commit(&result.commit_id)?;
            let mut flat = std::collections::BTreeMap::new();
            crate::git::tree_builder::flatten(&object_store, &commit.tree, "", &mut flat)?;
            for path in modified_files.iter().chain(new_files.iter()) {
                if let Some((_, blob_id)) = flat.get(path) {
                    session.files_touched.insert(path.clone(), blob_id.clone());
                }
            }
            for path in &deleted_files {
                session.files_touched.remove(path);
            }
        }

        session.save(self.repo)?;
        Ok(())
    }

    /// Runs on every git commit in the worktree: decides whether the commit "earns" a
    /// checkpoint trailer via content-aware overlap, and carries forward any files the
    /// commit didn't absorb.
    pub fn post_commit(&self, session_id: &str) -> Result<Option<String>, EntireError> {
        let Some(mut session) = SessionState::load(self.repo, session_id)? else {
            return Ok(None);
        };

        let ctx = FsmContext {
            has_files_touched: !session.files_touched.is_empty(),
            is_rebase_in_progress: self.repo.is_rebase_in_progress(),
        };
        let (new_phase, actions) = fsm::transition(session.phase(), Event::GitCommit, ctx);
        let old_phase = session.phase();
        session.set_phase(new_phase);

        let should_condense = actions.contains(&Action::Condense)
            || (actions.contains(&Action::CondenseIfFilesTouched) && !session.files_touched.is_empty());

        let mut new_checkpoint_id_value = None;
        if should_condense {
            let head = self.repo.head()?;
            let overlap = self.content_aware_overlap(&session, &head)?;
            if overlap {
                let checkpoint_id = new_checkpoint_id();
                let committed = CommittedStore::new(self.repo);
                let write_opts = WriteCommittedOptions {
                    checkpoint_id: checkpoint_id.clone(),
                    session_id: session.session_id.clone(),
                    strategy: "auto".to_string(),
                    branch: self.current_branch().unwrap_or_default(),
                    files_touched: session.files_touched.keys().cloned().collect(),
                    agent: "unknown".to_string(),
                    turn_id: session.turn_id.clone(),
                    is_task: false,
                    tool_use_id: None,
                    transcript_start_offset: session.last_transcript_offset,
                    token_usage: None::<TokenUsage>,
                    transcript: None,
                    transcript_path: None,
                    prompts: session.pending_prompt.iter().cloned().collect(),
                    context: Vec::new(),
                    metadata_dir: None,
                };
                committed.write_committed(&write_opts)?;
                session.turn_checkpoint_ids.push(checkpoint_id.clone());
                new_checkpoint_id_value = Some(checkpoint_id);

                self.carry_forward_after_commit(&mut session, &head)?;
                session.base_commit = head;

                if matches!(old_phase, Phase::Idle | Phase::Ended) && session.files_touched.is_empty() {
                    self.delete_shadow_ref_if_unreferenced(&session)?;
                }
            }
        } else if actions.contains(&Action::DiscardIfNoFiles) {
            SessionState::delete(self.repo, session_id)?;
            return Ok(None);
        }

        session.save(self.repo)?;
        Ok(new_checkpoint_id_value)
    }

    fn current_branch(&self) -> Option<String> {
        self.repo.current_branch().ok()
    }

    /// A commit "overlaps" the session if, for some path in the commit's own diff, the blob id
    /// it introduced matches what the session last wrote there. Paths the commit didn't touch
    /// are never consulted, even if the session has a stale recorded blob id for them.
    fn content_aware_overlap(&self, session: &SessionState, head_commit: &str) -> Result<bool, EntireError> {
        if session.files_touched.is_empty() {
            return Ok(false);
        }
        let object_store = ObjectStore::new(self.repo);
        let parent = object_store.read_commit(head_commit)?.parents.first().cloned();
        let diff_base = parent.as_deref().unwrap_or(crate::git::repository::EMPTY_TREE_ID);
        let changed = self.repo.diff_blob_ids(diff_base, head_commit)?;

        for (path, new_blob_id) in &changed {
            if let Some(session_blob_id) = session.files_touched.get(path) {
                if session_blob_id == new_blob_id {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Remove from `files_touched` every path whose committed blob id now matches what the
    /// session wrote (it has been absorbed); keep the rest for the next commit.
    fn carry_forward_after_commit(&self, session: &mut SessionState, head_commit: &str) -> Result<(), EntireError> {
        let object_store = ObjectStore::new(self.repo);
        let head_tree = object_store.read_commit(head_commit)?.tree;
        let mut flat = std::collections::BTreeMap::new();
        crate::git::tree_builder::flatten(&object_store, &head_tree, "", &mut flat)?;

        session.files_touched.retain(|path, session_blob_id| {
            match flat.get(path) {
                Some((_, committed_blob_id)) => committed_blob_id != session_blob_id,
                None => true,
            }
        });
        Ok(())
    }

    fn delete_shadow_ref_if_unreferenced(&self, session: &SessionState) -> Result<(), EntireError> {
        let ref_name = crate::store::temporary::shadow_ref(&session.base_commit, &session.worktree_id);
        let object_store = ObjectStore::new(self.repo);
        object_store.delete_ref(&format!("refs/{ref_name}"))?;
        debug_log(&format!("deleted shadow ref {ref_name} after condense"));
        Ok(())
    }

    fn apply_actions(&self, session: &mut SessionState, actions: &[Action]) -> Result<(), EntireError> {
        for action in actions {
            match action {
                Action::UpdateLastInteraction => session.last_interaction = chrono::Utc::now(),
                Action::ClearEndedAt => session.ended_at = None,
                Action::WarnStaleSession => {
                    tracing::warn!(session_id = %session.session_id, "session restarted while still active");
                }
                Action::Condense | Action::CondenseIfFilesTouched | Action::DiscardIfNoFiles => {
                    // Handled by post_commit, which has the committed HEAD this action needs.
                }
            }
        }
        if matches!(session.phase(), Phase::Ended) && session.ended_at.is_none() {
            session.ended_at = Some(chrono::Utc::now());
        }
        Ok(())
    }

    pub fn permanent_ref_name(&self) -> String {
        Config::get().permanent_ref(self.repo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_start_options_carry_through_fields() {
        let opts = TurnStartOptions {
            session_id: "s1".to_string(),
            agent: "claude-code".to_string(),
            prompt: Some("do the thing".to_string()),
            worktree_id: String::new(),
        };
        assert_eq!(opts.session_id, "s1");
        assert_eq!(opts.prompt.as_deref(), Some("do the thing"));
    }
}
