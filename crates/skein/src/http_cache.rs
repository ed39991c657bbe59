//! On-disk cache for remote module sources.
//!
//! Entries are keyed by the SHA-256 of the full URL (query string
//! included) and grouped under a directory named after the URL's host. A
//! sibling `.meta.json` file carries the validators used for conditional
//! requests. Writes go through a temp file and an atomic rename so
//! concurrent bundler invocations sharing one cache root cannot corrupt
//! entries; staleness is defined purely by the presence of the body file.

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::errors::{BundleError, Result};

/// Hex characters of the URL hash used in file names. 24 nibbles of
/// SHA-256 is plenty to avoid collisions within one host directory.
const KEY_PREFIX_LEN: usize = 24;

/// Validators remembered alongside a cached body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheMeta {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

/// A cache hit: body plus whatever validators were stored with it.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub body: String,
    pub meta: CacheMeta,
}

#[derive(Debug, Clone)]
pub struct HttpCache {
    root: PathBuf,
}

impl HttpCache {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Path of the body file for `url`.
    pub fn body_path(&self, url: &str) -> PathBuf {
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "unknown-host".to_string());
        let digest = hex::encode(Sha256::digest(url.as_bytes()));
        self.root.join(host).join(&digest[..KEY_PREFIX_LEN])
    }

    fn meta_path(&self, url: &str) -> PathBuf {
        let mut path = self.body_path(url).into_os_string();
        path.push(".meta.json");
        PathBuf::from(path)
    }

    /// Look up a cached body. A missing or unreadable metadata sibling is
    /// tolerated; the body file alone makes the entry usable.
    pub fn lookup(&self, url: &str) -> Option<CacheEntry> {
        let body_path = self.body_path(url);
        let body = fs::read_to_string(&body_path).ok()?;
        let meta = fs::read_to_string(self.meta_path(url))
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_else(|| CacheMeta {
                url: url.to_string(),
                ..CacheMeta::default()
            });
        debug!("cache hit for {url} at {}", body_path.display());
        Some(CacheEntry { body, meta })
    }

    /// Store a fetched body and its validators.
    pub fn store(&self, url: &str, body: &str, meta: &CacheMeta) -> Result<()> {
        let body_path = self.body_path(url);
        let dir = body_path
            .parent()
            .expect("cache body path always has a parent");
        fs::create_dir_all(dir).map_err(|e| BundleError::io(dir.display().to_string(), e))?;

        write_atomically(dir, &body_path, body.as_bytes())?;
        let meta_text =
            serde_json::to_string(meta).expect("cache metadata serialization cannot fail");
        write_atomically(dir, &self.meta_path(url), meta_text.as_bytes())?;
        debug!("cached {url} ({} bytes)", body.len());
        Ok(())
    }

    /// Drop a single entry. Used by tests and by explicit eviction.
    pub fn evict(&self, url: &str) {
        for path in [self.body_path(url), self.meta_path(url)] {
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("could not evict {}: {e}", path.display());
                }
            }
        }
    }
}

fn write_atomically(dir: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| BundleError::io(dir.display().to_string(), e))?;
    use std::io::Write;
    tmp.write_all(bytes)
        .map_err(|e| BundleError::io(target.display().to_string(), e))?;
    tmp.persist(target)
        .map_err(|e| BundleError::io(target.display().to_string(), e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> (tempfile::TempDir, HttpCache) {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = HttpCache::new(dir.path().to_path_buf());
        (dir, cache)
    }

    #[test]
    fn round_trips_body_and_meta() {
        let (_dir, cache) = cache();
        let meta = CacheMeta {
            url: "http://example.com/utils.ts".to_string(),
            etag: Some("\"abc\"".to_string()),
            last_modified: None,
        };
        cache
            .store("http://example.com/utils.ts", "export const x = 1;", &meta)
            .expect("store should succeed");

        let entry = cache
            .lookup("http://example.com/utils.ts")
            .expect("entry should exist");
        assert_eq!(entry.body, "export const x = 1;");
        assert_eq!(entry.meta.etag.as_deref(), Some("\"abc\""));
    }

    #[test]
    fn query_strings_are_distinct_entries() {
        let (_dir, cache) = cache();
        assert_ne!(
            cache.body_path("http://example.com/m.ts?v=1"),
            cache.body_path("http://example.com/m.ts?v=2")
        );
    }

    #[test]
    fn entries_are_grouped_by_host() {
        let (_dir, cache) = cache();
        let path = cache.body_path("http://example.com/a/b/c.ts");
        assert!(path.parent().expect("parent").ends_with("example.com"));
    }

    #[test]
    fn evict_removes_the_entry() {
        let (_dir, cache) = cache();
        cache
            .store("http://example.com/m.ts", "x", &CacheMeta::default())
            .expect("store should succeed");
        cache.evict("http://example.com/m.ts");
        assert!(cache.lookup("http://example.com/m.ts").is_none());
    }
}
