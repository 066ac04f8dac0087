use std::sync::OnceLock;

use crate::git::repository::Repository;

/// Process-wide settings, layered: environment, then repo-local git config, then defaults.
///
/// Mirrors the donor codebase's `Config::get()` singleton; unlike the donor there is no
/// settings-file cascade (out of scope), so the only inputs are the environment and git config
/// read lazily per repository.
#[derive(Debug, Clone)]
pub struct Config {
    pub permanent_ref: String,
    pub shadow_ref_prefix: String,
    pub disabled: bool,
    pub transcript_chunk_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            permanent_ref: "entire/checkpoints/v1".to_string(),
            shadow_ref_prefix: "entire/".to_string(),
            disabled: false,
            transcript_chunk_bytes: 4 * 1024 * 1024,
        }
    }
}

static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    /// The process-wide config, built once from the environment.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(Config::from_env)
    }

    fn from_env() -> Config {
        let mut config = Config::default();
        if let Ok(value) = std::env::var("ENTIRE_PERMANENT_REF") {
            if !value.is_empty() {
                config.permanent_ref = value;
            }
        }
        if std::env::var("ENTIRE_DISABLED").unwrap_or_default() == "1" {
            config.disabled = true;
        }
        if let Ok(value) = std::env::var("ENTIRE_TRANSCRIPT_CHUNK_BYTES") {
            if let Ok(bytes) = value.parse() {
                config.transcript_chunk_bytes = bytes;
            }
        }
        config
    }

    /// The permanent ref name, allowing a repo-local override via `entire.permanentRef`.
    pub fn permanent_ref(&self, repo: &Repository) -> String {
        repo.config_get_str("entire.permanentRef")
            .ok()
            .flatten()
            .unwrap_or_else(|| self.permanent_ref.clone())
    }
}
