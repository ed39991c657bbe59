//! Bundler configuration.
//!
//! Everything tunable lives here: cache location, standard-library path,
//! and the guard rails around fetching and macro expansion. Defaults match
//! the documented behavior; environment variables override the paths.

use std::{env, path::PathBuf, time::Duration};

/// Environment variable overriding the HTTP cache root.
pub const CACHE_DIR_ENV: &str = "SKEIN_CACHE_DIR";

/// Environment variable pointing at the standard library entry module,
/// resolved for the bare `"skein"` specifier.
pub const STDLIB_PATH_ENV: &str = "SKEIN_LIB_PATH";

/// The bare specifier that resolves to the bundled standard library.
pub const STDLIB_TAG: &str = "skein";

#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory of the on-disk HTTP cache.
    pub cache_dir: PathBuf,
    /// Entry module of the standard library, if available.
    pub stdlib_path: Option<String>,
    /// Bypass the HTTP cache on read (still write on success).
    pub reload: bool,
    /// Redirect hops before a fetch fails with `RedirectLoop`.
    pub max_redirects: usize,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
    /// Fixed-point iterations before macro expansion fails with `MacroRecursion`.
    pub macro_iteration_cap: usize,
    /// Wall-clock limit for a single macro invocation.
    pub macro_timeout: Duration,
    /// Debounce window for watch mode.
    pub watch_debounce: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            stdlib_path: env::var(STDLIB_PATH_ENV).ok(),
            reload: false,
            max_redirects: 10,
            http_timeout: Duration::from_secs(30),
            macro_iteration_cap: 100,
            macro_timeout: Duration::from_secs(5),
            watch_debounce: Duration::from_millis(100),
        }
    }
}

/// Cache root: `$SKEIN_CACHE_DIR`, else `~/.skein/cache`, else a
/// `.skein-cache` directory next to the current working directory when no
/// home directory can be determined.
fn default_cache_dir() -> PathBuf {
    if let Some(dir) = env::var_os(CACHE_DIR_ENV) {
        return PathBuf::from(dir);
    }
    match dirs::home_dir() {
        Some(home) => home.join(".skein").join("cache"),
        None => PathBuf::from(".skein-cache"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let config = Config::default();
        assert_eq!(config.max_redirects, 10);
        assert_eq!(config.macro_iteration_cap, 100);
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert_eq!(config.macro_timeout, Duration::from_secs(5));
        assert_eq!(config.watch_debounce, Duration::from_millis(100));
    }
}
