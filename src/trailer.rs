use std::collections::HashMap;
use std::fmt::Write as _;

const KEYS: &[&str] = &[
    "Entire-Session",
    "Entire-Strategy",
    "Entire-Agent",
    "Entire-Checkpoint",
    "Entire-Metadata",
    "Entire-Metadata-Task",
    "Entire-EphemeralBranch",
];

/// The trailer set a commit message may carry. All fields are optional; any present field
/// is last-occurrence-wins if the message somehow repeats a key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trailers {
    pub session: Option<String>,
    pub strategy: Option<String>,
    pub agent: Option<String>,
    pub checkpoint: Option<String>,
    pub metadata: Option<String>,
    pub metadata_task: Option<String>,
    pub ephemeral_branch: Option<String>,
}

impl Trailers {
    pub fn is_empty(&self) -> bool {
        self == &Trailers::default()
    }

    /// Render as trailer lines, one per present field, in the fixed `KEYS` order.
    pub fn format(&self) -> String {
        let mut out = String::new();
        let pairs: [(&str, &Option<String>); 7] = [
            ("Entire-Session", &self.session),
            ("Entire-Strategy", &self.strategy),
            ("Entire-Agent", &self.agent),
            ("Entire-Checkpoint", &self.checkpoint),
            ("Entire-Metadata", &self.metadata),
            ("Entire-Metadata-Task", &self.metadata_task),
            ("Entire-EphemeralBranch", &self.ephemeral_branch),
        ];
        for (key, value) in pairs {
            if let Some(value) = value {
                let _ = writeln!(out, "{key}: {value}");
            }
        }
        out
    }

    /// Parse trailer lines out of a full commit message body. Only lines matching
    /// `Entire-<Key>: <value>` are consumed; everything else is ignored. Trailing whitespace
    /// on either side of the colon is tolerated. The last occurrence of a key wins.
    pub fn parse(message: &str) -> Trailers {
        let mut found: HashMap<&'static str, String> = HashMap::new();
        for line in message.lines() {
            let line = line.trim_end();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            if let Some(canonical) = KEYS.iter().find(|k| **k == key) {
                found.insert(canonical, value.to_string());
            }
        }

        Trailers {
            session: found.get("Entire-Session").cloned(),
            strategy: found.get("Entire-Strategy").cloned(),
            agent: found.get("Entire-Agent").cloned(),
            checkpoint: found.get("Entire-Checkpoint").cloned(),
            metadata: found.get("Entire-Metadata").cloned(),
            metadata_task: found.get("Entire-Metadata-Task").cloned(),
            ephemeral_branch: found.get("Entire-EphemeralBranch").cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_format_and_parse() {
        let trailers = Trailers {
            session: Some("sess-1".to_string()),
            strategy: Some("auto".to_string()),
            agent: Some("claude-code".to_string()),
            checkpoint: Some("abcdef012345".to_string()),
            metadata: Some(".entire/meta.json".to_string()),
            metadata_task: None,
            ephemeral_branch: Some("entire/abc1234-f00ba2".to_string()),
        };
        let message = format!("Subject\n\nBody text.\n\n{}", trailers.format());
        assert_eq!(Trailers::parse(&message), trailers);
    }

    #[test]
    fn last_occurrence_wins_and_whitespace_is_tolerated() {
        let message = "Subject\n\nEntire-Session: first  \nEntire-Session:second\n";
        let trailers = Trailers::parse(message);
        assert_eq!(trailers.session.as_deref(), Some("second"));
    }

    #[test]
    fn ignores_unrelated_colon_lines() {
        let message = "Subject\n\nSigned-off-by: someone <a@b.c>\nEntire-Checkpoint: abcdef012345\n";
        let trailers = Trailers::parse(message);
        assert_eq!(trailers.checkpoint.as_deref(), Some("abcdef012345"));
        assert!(trailers.session.is_none());
    }
}
