use std::path::PathBuf;

static DEBUG_ENABLED: std::sync::OnceLock<bool> = std::sync::OnceLock::new();
static DEBUG_PERFORMANCE_ENABLED: std::sync::OnceLock<bool> = std::sync::OnceLock::new();

fn is_debug_enabled() -> bool {
    *DEBUG_ENABLED.get_or_init(|| {
        cfg!(debug_assertions)
            || std::env::var("ENTIRE_DEBUG").unwrap_or_default() == "1"
            || std::env::var("ENTIRE_DEBUG_PERFORMANCE").unwrap_or_default() == "1"
    })
}

fn is_debug_performance_enabled() -> bool {
    is_debug_enabled()
        && *DEBUG_PERFORMANCE_ENABLED
            .get_or_init(|| std::env::var("ENTIRE_DEBUG_PERFORMANCE").unwrap_or_default() == "1")
}

/// Hot-path debug line, kept for parity with call sites that want a cheap one-liner
/// instead of a full `tracing` span; delegates to `tracing::debug!` either way.
pub fn debug_log(msg: &str) {
    if is_debug_enabled() {
        tracing::debug!("{msg}");
    }
}

pub fn debug_performance_log(msg: &str) {
    if is_debug_performance_enabled() {
        tracing::debug!(perf = true, "{msg}");
    }
}

/// Installs a `tracing_subscriber` `EnvFilter` from `ENTIRE_LOG`, falling back to `RUST_LOG`.
/// Safe to call more than once; only the first call wins.
pub fn init_logging() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = std::env::var("ENTIRE_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| "warn".to_string());
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
            .with_writer(std::io::stderr)
            .try_init();
    });
}

#[inline]
pub fn normalize_to_posix(path: &str) -> String {
    path.replace('\\', "/")
}

/// The user's home directory, falling back to `.` when undiscoverable.
pub fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// `sha256:<hex>` of the given bytes, the format `content_hash.txt` always carries.
pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}
