use serde::{Deserialize, Serialize};

use crate::config::Config;

/// A single turn of an agent transcript. Agent-specific parsers translate their own wire
/// formats into this shape before handing bytes to the store; the store itself only ever
/// sees already-chunked bytes (see [`chunk`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    User { text: String, timestamp: String },
    Assistant { text: String, timestamp: String },
    ToolUse { name: String, input: serde_json::Value, timestamp: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AiTranscript {
    messages: Vec<Message>,
}

impl AiTranscript {
    pub fn new() -> Self {
        AiTranscript::default()
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn without_tool_use(&self) -> AiTranscript {
        AiTranscript {
            messages: self
                .messages
                .iter()
                .filter(|m| !matches!(m, Message::ToolUse { .. }))
                .cloned()
                .collect(),
        }
    }
}

/// The wire format a raw transcript blob was detected to be in. Only JSONL (one JSON value
/// per line) has a built-in chunker; other formats are recognized so an external adapter can
/// claim them, but are chunked as a single opaque chunk here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptFormat {
    Jsonl,
    Opaque,
}

/// Sniff a transcript format from its leading bytes. JSONL transcripts start each line with
/// `{`; anything else is treated as opaque and chunked as a single unit.
pub fn detect_format(bytes: &[u8]) -> TranscriptFormat {
    let first_non_ws = bytes.iter().find(|b| !b.is_ascii_whitespace());
    match first_non_ws {
        Some(b'{') => TranscriptFormat::Jsonl,
        _ => TranscriptFormat::Opaque,
    }
}

/// Split transcript bytes into chunks no larger than the configured chunk size, never
/// splitting a JSONL line across chunks.
pub fn chunk(bytes: &[u8], format: TranscriptFormat) -> Vec<Vec<u8>> {
    let limit = Config::get().transcript_chunk_bytes;
    if bytes.is_empty() {
        return vec![Vec::new()];
    }
    match format {
        TranscriptFormat::Opaque => vec![bytes.to_vec()],
        TranscriptFormat::Jsonl => {
            let mut chunks = Vec::new();
            let mut current = Vec::new();
            for line in bytes.split_inclusive(|&b| b == b'\n') {
                if !current.is_empty() && current.len() + line.len() > limit {
                    chunks.push(std::mem::take(&mut current));
                }
                current.extend_from_slice(line);
            }
            if !current.is_empty() || chunks.is_empty() {
                chunks.push(current);
            }
            chunks
        }
    }
}

/// Chunk file names: `full.jsonl` for chunk 0, `full.jsonl.NNN` (three digits, 1-based) for
/// subsequent chunks.
pub fn chunk_file_name(index: usize) -> String {
    if index == 0 {
        "full.jsonl".to_string()
    } else {
        format!("full.jsonl.{index:03}")
    }
}

/// Reconstitute transcript bytes from an ordered set of `(name, bytes)` chunks, sorting by
/// the chunk-file-name convention so readers need not assume directory listing order.
pub fn join_chunks(mut named_chunks: Vec<(String, Vec<u8>)>) -> Vec<u8> {
    named_chunks.sort_by_key(|(name, _)| chunk_sort_key(name));
    named_chunks.into_iter().flat_map(|(_, bytes)| bytes).collect()
}

fn chunk_sort_key(name: &str) -> usize {
    if name == "full.jsonl" {
        0
    } else {
        name.rsplit('.')
            .next()
            .and_then(|suffix| suffix.parse().ok())
            .unwrap_or(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_jsonl_from_leading_brace() {
        assert_eq!(detect_format(b"{\"type\":\"user\"}\n"), TranscriptFormat::Jsonl);
        assert_eq!(detect_format(b"not json at all"), TranscriptFormat::Opaque);
    }

    #[test]
    fn jsonl_chunking_never_splits_a_line() {
        let line = b"{\"type\":\"user\",\"text\":\"hi\"}\n";
        let bytes: Vec<u8> = line.repeat(3);
        let chunks = chunk(&bytes, TranscriptFormat::Jsonl);
        for c in &chunks {
            assert!(c.is_empty() || c.ends_with(b"\n"));
        }
        let rejoined: Vec<u8> = chunks.into_iter().flatten().collect();
        assert_eq!(rejoined, bytes);
    }

    #[test]
    fn chunk_file_names_follow_convention() {
        assert_eq!(chunk_file_name(0), "full.jsonl");
        assert_eq!(chunk_file_name(1), "full.jsonl.001");
        assert_eq!(chunk_file_name(12), "full.jsonl.012");
    }

    #[test]
    fn join_chunks_orders_by_suffix() {
        let chunks = vec![
            ("full.jsonl.002".to_string(), b"c".to_vec()),
            ("full.jsonl".to_string(), b"a".to_vec()),
            ("full.jsonl.001".to_string(), b"b".to_vec()),
        ];
        assert_eq!(join_chunks(chunks), b"abc".to_vec());
    }

    #[test]
    fn without_tool_use_filters_tool_messages() {
        let mut t = AiTranscript::new();
        t.add_message(Message::User { text: "hi".into(), timestamp: "t0".into() });
        t.add_message(Message::ToolUse {
            name: "grep".into(),
            input: serde_json::json!({}),
            timestamp: "t1".into(),
        });
        t.add_message(Message::Assistant { text: "ok".into(), timestamp: "t2".into() });

        let filtered = t.without_tool_use();
        assert_eq!(filtered.messages().len(), 2);
    }
}
