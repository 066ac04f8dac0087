use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// `<id>/<N>/metadata.json` — one session's contribution to a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommittedMetadata {
    pub checkpoint_id: String,
    pub session_id: String,
    pub strategy: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub branch: String,
    pub checkpoints_count: u64,
    pub files_touched: Vec<String>,
    pub agent: String,
    pub turn_id: String,
    pub is_task: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    pub transcript_start_offset: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_attribution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_transcript_source: Option<String>,
}

/// `<id>/metadata.json` — the aggregated root summary across every session that has
/// written to this checkpoint id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointSummary {
    pub cli_version: String,
    pub checkpoint_id: String,
    pub strategy: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub branch: String,
    /// When the most recent contributing session wrote this checkpoint. `ListCommitted`
    /// sorts on this field, descending.
    pub created_at: DateTime<Utc>,
    pub session_count: u64,
    pub session_ids: Vec<String>,
    pub files_touched: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}

/// `tasks/<tool-use-id>/checkpoint.json` — the final record of a completed subagent task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskCheckpoint {
    pub tool_use_id: String,
    pub agent_id: String,
    pub created_at: DateTime<Utc>,
    pub files_touched: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<String>,
}

/// `tasks/<tool-use-id>/checkpoints/NNN-<id>.json` — one incremental snapshot of an
/// in-progress subagent task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncrementalCheckpoint {
    pub sequence: u64,
    pub checkpoint_id: String,
    pub created_at: DateTime<Utc>,
    pub files_touched: Vec<String>,
}

/// Merge two sorted, possibly-overlapping `files_touched` lists into one sorted,
/// deduplicated list (Invariant 4).
pub fn merge_files_touched(prior: &[String], new: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = prior.iter().cloned().chain(new.iter().cloned()).collect();
    merged.sort();
    merged.dedup();
    merged
}
