use rand::RngCore;

use crate::error::EntireError;

/// Number of hex characters in a checkpoint id.
pub const CHECKPOINT_ID_LEN: usize = 12;

/// Generate a fresh random 12-hex-char checkpoint id.
pub fn new_checkpoint_id() -> String {
    let mut bytes = [0u8; CHECKPOINT_ID_LEN / 2];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Validate a checkpoint id: exactly 12 lowercase hex characters.
pub fn parse_checkpoint_id(id: &str) -> Result<String, EntireError> {
    if id.len() != CHECKPOINT_ID_LEN || !id.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
        return Err(EntireError::InvalidId(id.to_string()));
    }
    Ok(id.to_string())
}

/// The sharded directory path a checkpoint id lives under on the permanent ref,
/// e.g. `ab/cdef01234567/`.
pub fn shard_path(id: &str) -> String {
    format!("{}/{}", &id[..2], &id[2..])
}

/// Validate a session id: non-empty, no path separators, no `..`.
pub fn validate_session_id(id: &str) -> Result<(), EntireError> {
    if id.is_empty() || id.contains('/') || id.contains('\\') || id.contains("..") {
        return Err(EntireError::InvalidId(id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_round_trip_through_parse() {
        for _ in 0..50 {
            let id = new_checkpoint_id();
            assert_eq!(parse_checkpoint_id(&id).unwrap(), id);
        }
    }

    #[test]
    fn rejects_wrong_length_and_uppercase() {
        assert!(parse_checkpoint_id("abc").is_err());
        assert!(parse_checkpoint_id("ABCDEF012345").is_err());
        assert!(parse_checkpoint_id("gggggggggggg").is_err());
    }

    #[test]
    fn shard_path_splits_first_two_chars() {
        assert_eq!(shard_path("abcdef012345"), "ab/cdef012345");
    }

    #[test]
    fn session_id_rejects_separators_and_traversal() {
        assert!(validate_session_id("a/b").is_err());
        assert!(validate_session_id("a\\b").is_err());
        assert!(validate_session_id("../etc").is_err());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("session-123").is_ok());
    }
}
