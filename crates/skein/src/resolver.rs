//! Specifier resolution.
//!
//! Turns an import specifier plus the referring module's URI into an
//! absolute URI in one of the three supported schemes. Local modules are
//! identified by absolute filesystem paths, remote modules by full
//! `http(s)://` URLs, and synthetic host modules by `host://` URIs.

use std::path::{Component, Path, PathBuf};

use url::Url;

use crate::{
    config::{Config, STDLIB_TAG},
    errors::{BundleError, Result},
};

/// The scheme a resolved URI belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UriScheme {
    File,
    Http,
    Host,
}

/// Classify an absolute URI.
pub fn scheme_of(uri: &str) -> UriScheme {
    if is_http_uri(uri) {
        UriScheme::Http
    } else if is_host_uri(uri) {
        UriScheme::Host
    } else {
        UriScheme::File
    }
}

pub fn is_http_uri(uri: &str) -> bool {
    uri.starts_with("http://") || uri.starts_with("https://")
}

pub fn is_host_uri(uri: &str) -> bool {
    uri.starts_with("host://")
}

/// Resolve `specifier` against the module that mentions it.
///
/// Remote modules are sandboxed: once fetched over HTTP, a module may only
/// reach other HTTP modules. Any resolution that would escape to a local
/// path, a `host://` module or the standard library fails with
/// `HostEscape`.
pub fn resolve_specifier(specifier: &str, referrer: &str, config: &Config) -> Result<String> {
    let resolved = resolve_unchecked(specifier, referrer, config)?;

    if is_http_uri(referrer) && !is_http_uri(&resolved) {
        return Err(BundleError::HostEscape {
            specifier: specifier.to_string(),
            referrer: referrer.to_string(),
        });
    }

    Ok(resolved)
}

fn resolve_unchecked(specifier: &str, referrer: &str, config: &Config) -> Result<String> {
    // The standard-library tag maps to a host-supplied local path.
    if specifier == STDLIB_TAG {
        return config
            .stdlib_path
            .clone()
            .ok_or(BundleError::StdlibUnavailable);
    }

    if is_host_uri(specifier) || is_http_uri(specifier) {
        return Ok(specifier.to_string());
    }

    // Accept file:// on input, normalize to a plain absolute path.
    if let Some(path) = specifier.strip_prefix("file://") {
        return Ok(path.to_string());
    }

    if specifier.starts_with('/') {
        if is_http_uri(referrer) {
            return join_url(referrer, specifier);
        }
        return Ok(specifier.to_string());
    }

    if specifier.starts_with("./") || specifier.starts_with("../") {
        if is_http_uri(referrer) {
            return join_url(referrer, specifier);
        }
        let base = Path::new(referrer).parent().unwrap_or(Path::new(""));
        return Ok(normalize_path(&base.join(specifier)));
    }

    Err(BundleError::BareSpecifier {
        specifier: specifier.to_string(),
    })
}

fn join_url(base: &str, specifier: &str) -> Result<String> {
    let base_url = Url::parse(base).map_err(|e| BundleError::NetworkError {
        url: base.to_string(),
        reason: format!("invalid base URL: {e}"),
    })?;
    let joined = base_url
        .join(specifier)
        .map_err(|e| BundleError::NetworkError {
            url: base.to_string(),
            reason: format!("cannot resolve '{specifier}': {e}"),
        })?;
    Ok(joined.to_string())
}

/// Collapse `.` and `..` components without touching the filesystem.
fn normalize_path(path: &Path) -> String {
    let mut parts: Vec<std::ffi::OsString> = Vec::new();
    let mut prefix = String::new();
    for component in path.components() {
        match component {
            Component::RootDir => prefix = "/".to_string(),
            Component::Prefix(p) => prefix = p.as_os_str().to_string_lossy().to_string(),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop();
            }
            Component::Normal(part) => parts.push(part.to_os_string()),
        }
    }
    let mut out = PathBuf::from(prefix);
    for part in parts {
        out.push(part);
    }
    out.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            stdlib_path: Some("/opt/skein/lib/index.ts".to_string()),
            ..Config::default()
        }
    }

    #[test]
    fn relative_path_from_file() {
        let uri = resolve_specifier("./utils.ts", "/home/user/project/src/main.ts", &config())
            .expect("resolution should succeed");
        assert_eq!(uri, "/home/user/project/src/utils.ts");
    }

    #[test]
    fn parent_relative_path_from_file() {
        let uri = resolve_specifier("../other.ts", "/home/user/project/src/main.ts", &config())
            .expect("resolution should succeed");
        assert_eq!(uri, "/home/user/project/other.ts");
    }

    #[test]
    fn relative_path_from_http() {
        let uri = resolve_specifier("./utils.ts", "https://example.com/lib/mod.ts", &config())
            .expect("resolution should succeed");
        assert_eq!(uri, "https://example.com/lib/utils.ts");
    }

    #[test]
    fn parent_relative_path_from_http() {
        let uri = resolve_specifier(
            "../other.ts",
            "https://example.com/lib/nested/mod.ts",
            &config(),
        )
        .expect("resolution should succeed");
        assert_eq!(uri, "https://example.com/lib/other.ts");
    }

    #[test]
    fn server_absolute_path_from_http() {
        let uri = resolve_specifier(
            "/lodash-es@4.17.21/es2022/add.mjs",
            "https://esm.sh/lodash-es@4.17.21/add",
            &config(),
        )
        .expect("resolution should succeed");
        assert_eq!(uri, "https://esm.sh/lodash-es@4.17.21/es2022/add.mjs");
    }

    #[test]
    fn absolute_file_path_passes_through() {
        let uri = resolve_specifier("/usr/local/lib/module.ts", "/home/user/main.ts", &config())
            .expect("resolution should succeed");
        assert_eq!(uri, "/usr/local/lib/module.ts");
    }

    #[test]
    fn absolute_http_url_passes_through() {
        let uri = resolve_specifier(
            "https://cdn.example.com/lodash.js",
            "https://esm.sh/lodash-es",
            &config(),
        )
        .expect("resolution should succeed");
        assert_eq!(uri, "https://cdn.example.com/lodash.js");
    }

    #[test]
    fn stdlib_tag_resolves_to_configured_path() {
        let uri = resolve_specifier(STDLIB_TAG, "/some/path/module.ts", &config())
            .expect("resolution should succeed");
        assert_eq!(uri, "/opt/skein/lib/index.ts");
    }

    #[test]
    fn stdlib_tag_without_path_errors() {
        let config = Config {
            stdlib_path: None,
            ..Config::default()
        };
        let err = resolve_specifier(STDLIB_TAG, "/main.ts", &config)
            .expect_err("resolution should fail");
        assert!(matches!(err, BundleError::StdlibUnavailable));
    }

    #[test]
    fn host_uri_passes_through() {
        let uri = resolve_specifier("host://http/server", "/home/user/main.ts", &config())
            .expect("resolution should succeed");
        assert_eq!(uri, "host://http/server");
    }

    #[test]
    fn http_module_cannot_reach_local_files() {
        let err = resolve_specifier(
            "/etc/passwd.ts",
            "https://example.com/lib/mod.ts",
            &config(),
        );
        // A server-absolute path resolves back into the same origin, so this
        // succeeds; only genuinely non-HTTP results are escapes.
        assert!(err.is_ok());

        let err = resolve_specifier("host://fs", "https://example.com/lib/mod.ts", &config())
            .expect_err("host escape should fail");
        assert!(matches!(err, BundleError::HostEscape { .. }));

        let err = resolve_specifier(STDLIB_TAG, "https://example.com/lib/mod.ts", &config())
            .expect_err("stdlib from remote should fail");
        assert!(matches!(err, BundleError::HostEscape { .. }));
    }

    #[test]
    fn bare_specifier_is_rejected() {
        let err = resolve_specifier("lodash", "/home/user/main.ts", &config())
            .expect_err("bare specifiers are not supported");
        assert!(matches!(err, BundleError::BareSpecifier { .. }));
    }

    #[test]
    fn file_scheme_is_normalized_to_a_path() {
        let uri = resolve_specifier("file:///tmp/x/entry.ts", "/main.ts", &config())
            .expect("resolution should succeed");
        assert_eq!(uri, "/tmp/x/entry.ts");
    }
}
