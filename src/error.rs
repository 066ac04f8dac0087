use std::fmt;

/// The closed set of failure modes the checkpoint store can produce.
#[derive(Debug)]
pub enum EntireError {
    /// A checkpoint or session id failed validation (wrong length, non-hex, contains a separator).
    InvalidId(String),
    /// A ref, blob, or commit was looked up and does not exist.
    NotFound(String),
    /// `ReadCommitted`/`UpdateCommitted`/`UpdateSummary` addressed a checkpoint id with no entry
    /// on the permanent ref.
    CheckpointNotFound(String),
    /// A checkpoint has no transcript content where one was required.
    NoTranscript(String),
    /// A path under a checkpoint's or session's tree escaped its shard via `..` or an absolute path.
    PathTraversal(String),
    /// A tree or commit object did not parse the way the store expects.
    TreeCorrupt(String),
    /// A ref compare-and-swap lost the race; retried once, then surfaced.
    RefRace(String),
    /// An operation was cancelled before it could make a ref-visible change.
    Cancelled,
    /// The underlying `git` subprocess exited non-zero.
    GitCliError { code: Option<i32>, stderr: String },
    /// Catch-all for conditions not worth a dedicated variant.
    Generic(String),
    Io(std::io::Error),
    Json(serde_json::Error),
    FromUtf8(std::string::FromUtf8Error),
}

impl fmt::Display for EntireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntireError::InvalidId(id) => write!(f, "invalid id: {id}"),
            EntireError::NotFound(what) => write!(f, "not found: {what}"),
            EntireError::CheckpointNotFound(id) => write!(f, "checkpoint not found: {id}"),
            EntireError::NoTranscript(id) => write!(f, "no transcript for checkpoint: {id}"),
            EntireError::PathTraversal(path) => write!(f, "path traversal rejected: {path}"),
            EntireError::TreeCorrupt(what) => write!(f, "tree corrupt: {what}"),
            EntireError::RefRace(ref_name) => write!(f, "ref race on {ref_name}"),
            EntireError::Cancelled => write!(f, "operation cancelled"),
            EntireError::GitCliError { code, stderr } => {
                write!(f, "git exited with {code:?}: {stderr}")
            }
            EntireError::Generic(msg) => write!(f, "{msg}"),
            EntireError::Io(e) => write!(f, "io error: {e}"),
            EntireError::Json(e) => write!(f, "json error: {e}"),
            EntireError::FromUtf8(e) => write!(f, "utf8 error: {e}"),
        }
    }
}

impl std::error::Error for EntireError {}

impl From<std::io::Error> for EntireError {
    fn from(e: std::io::Error) -> Self {
        EntireError::Io(e)
    }
}

impl From<serde_json::Error> for EntireError {
    fn from(e: serde_json::Error) -> Self {
        EntireError::Json(e)
    }
}

impl From<std::string::FromUtf8Error> for EntireError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        EntireError::FromUtf8(e)
    }
}

impl EntireError {
    /// Whether this error is the sentinel for a ref CAS loss, which the engine retries once.
    pub fn is_ref_race(&self) -> bool {
        matches!(self, EntireError::RefRace(_))
    }

    /// `git cat-file`/`show-ref`/`rev-parse` style "doesn't exist" exit codes, which several
    /// call sites treat as an absent value rather than a hard failure.
    pub fn is_not_found_exit(&self) -> bool {
        matches!(
            self,
            EntireError::GitCliError { code: Some(1), .. } | EntireError::GitCliError { code: Some(128), .. }
        )
    }
}
