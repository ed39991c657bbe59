//! Bundling error taxonomy.
//!
//! Every failure the pipeline can surface is a variant here; the CLI maps
//! any of them to a non-zero exit with the `Display` text. Fetch failures
//! that are covered by a usable cache entry never reach this type — they
//! degrade to a warning inside the fetcher.

use thiserror::Error;

/// Errors produced while turning an entry module into a bundle.
#[derive(Debug, Error)]
pub enum BundleError {
    // ---- fetch ----
    #[error("module not found: {uri}")]
    NotFound { uri: String },

    #[error("HTTP {status} fetching {url}")]
    HttpError { status: u16, url: String },

    #[error("network error fetching {url}: {reason}")]
    NetworkError { url: String, reason: String },

    #[error("redirect loop fetching {url} (gave up after {hops} hops)")]
    RedirectLoop { url: String, hops: usize },

    #[error("remote module {referrer} may not import non-HTTP specifier '{specifier}'")]
    HostEscape { specifier: String, referrer: String },

    #[error("cannot resolve bare specifier '{specifier}' (only the standard-library tag is supported)")]
    BareSpecifier { specifier: String },

    #[error("cannot resolve the standard library: no library path configured (set SKEIN_LIB_PATH)")]
    StdlibUnavailable,

    // ---- parse ----
    #[error("{uri}:{line}:{col}: parse error: {message}")]
    Parse {
        uri: String,
        line: usize,
        col: usize,
        message: String,
    },

    #[error("{uri}: unsupported syntax: {construct}")]
    UnsupportedSyntax { uri: String, construct: String },

    #[error("duplicate declaration '{name}' in module {uri}")]
    DuplicateDeclaration { uri: String, name: String },

    // ---- resolution ----
    #[error("module '{module}' has no export named '{name}'")]
    MissingExport { module: String, name: String },

    #[error("re-export cycle while resolving '{name}' through module {module}")]
    ReExportCycle { module: String, name: String },

    #[error("ambiguous star export: '{name}' is provided by multiple modules re-exported from {module}")]
    AmbiguousStarExport { module: String, name: String },

    #[error("unresolved reference '{name}' in {scope}")]
    UnresolvedReference { scope: String, name: String },

    // ---- macros ----
    #[error("Macro expansion exceeded max iterations ({cap})")]
    MacroRecursion { cap: usize },

    #[error("macro evaluation exceeded the {secs}s wall-clock limit")]
    MacroTimeout { secs: u64 },

    #[error("macro returned a malformed value: {detail} (expected {{expression, references}})")]
    MacroReturnShape { detail: String },

    #[error("macro evaluation failed: {detail}")]
    MacroEvaluation { detail: String },

    // ---- emission ----
    #[error("internal emission ordering conflict: {detail}")]
    EmitOrderingConflict { detail: String },

    // ---- io plumbing ----
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl BundleError {
    /// Helper for wrapping filesystem errors with the offending path.
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, BundleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_names_status_and_url() {
        let err = BundleError::HttpError {
            status: 404,
            url: "http://example.com/utils.ts".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("404"));
        assert!(text.contains("http://example.com/utils.ts"));
    }

    #[test]
    fn missing_export_names_the_symbol() {
        let err = BundleError::MissingExport {
            module: "/tmp/x.ts".to_string(),
            name: "doesNotExist".to_string(),
        };
        assert!(err.to_string().contains("doesNotExist"));
    }

    #[test]
    fn parse_error_mentions_parse() {
        let err = BundleError::Parse {
            uri: "/tmp/x.ts".to_string(),
            line: 3,
            col: 7,
            message: "Expected ';'".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("parse"));
        assert!(text.contains("/tmp/x.ts:3:7"));
    }

    #[test]
    fn macro_recursion_has_the_documented_message() {
        let err = BundleError::MacroRecursion { cap: 100 };
        assert!(
            err.to_string()
                .contains("Macro expansion exceeded max iterations")
        );
    }
}
