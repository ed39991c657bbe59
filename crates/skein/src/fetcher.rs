//! Module source fetching.
//!
//! Resolves an absolute URI to source text. Local files are read from
//! disk, remote modules go through the on-disk HTTP cache with
//! stale-on-failure fallback, and `host://` modules are synthesized
//! without any I/O by the module registry.

use std::time::Duration;

use log::{debug, warn};
use reqwest::{blocking::Client, redirect::Policy, StatusCode};

use crate::{
    config::Config,
    errors::{BundleError, Result},
    http_cache::{CacheMeta, HttpCache},
    resolver::{scheme_of, UriScheme},
};

/// How a module's source text was obtained this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleProvenance {
    /// Read from the local filesystem.
    Disk,
    /// Fetched over HTTP during this run.
    RemoteFetched,
    /// Served from the on-disk HTTP cache.
    RemoteCached,
    /// Synthesized `host://` stub; has no source text.
    Synthetic,
}

pub struct Fetcher {
    client: Client,
    cache: HttpCache,
    reload: bool,
    max_redirects: usize,
    /// URLs announced with a `Fetched:` line this run, in order.
    fetched_urls: Vec<String>,
}

impl Fetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| BundleError::NetworkError {
                url: "(http client)".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            cache: HttpCache::new(config.cache_dir.clone()),
            reload: config.reload,
            max_redirects: config.max_redirects,
            fetched_urls: Vec::new(),
        })
    }

    /// URLs fetched over the network this run (one entry per URL).
    pub fn fetched_urls(&self) -> &[String] {
        &self.fetched_urls
    }

    /// Fetch the source text for `uri`. `host://` URIs are rejected here;
    /// the registry synthesizes them without consulting the fetcher.
    pub fn fetch(&mut self, uri: &str) -> Result<(String, ModuleProvenance)> {
        match scheme_of(uri) {
            UriScheme::File => self.fetch_file(uri),
            UriScheme::Http => self.fetch_http(uri),
            UriScheme::Host => Err(BundleError::NotFound {
                uri: uri.to_string(),
            }),
        }
    }

    fn fetch_file(&self, path: &str) -> Result<(String, ModuleProvenance)> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok((text, ModuleProvenance::Disk)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BundleError::NotFound {
                uri: path.to_string(),
            }),
            Err(e) => Err(BundleError::io(path, e)),
        }
    }

    fn fetch_http(&mut self, url: &str) -> Result<(String, ModuleProvenance)> {
        let cached = self.cache.lookup(url);

        // A usable cache entry satisfies the read without any network
        // round-trip unless --reload asked for a revalidation.
        if !self.reload {
            if let Some(entry) = &cached {
                return Ok((entry.body.clone(), ModuleProvenance::RemoteCached));
            }
        }

        match self.request_following_redirects(url, cached.as_ref().map(|c| &c.meta)) {
            Ok(FetchedResponse::Fresh { body, meta }) => {
                self.cache.store(url, &body, &meta)?;
                self.announce(url);
                Ok((body, ModuleProvenance::RemoteFetched))
            }
            Ok(FetchedResponse::NotModified) => {
                let entry = cached.ok_or_else(|| BundleError::NetworkError {
                    url: url.to_string(),
                    reason: "server answered 304 but no cache entry exists".to_string(),
                })?;
                debug!("revalidated {url} via 304");
                Ok((entry.body, ModuleProvenance::RemoteCached))
            }
            Err(err) => match cached {
                // Stale-on-failure: a cached body outranks a fetch error.
                Some(entry) => {
                    warn!("using cached copy of {url}: {err}");
                    Ok((entry.body, ModuleProvenance::RemoteCached))
                }
                None => Err(err),
            },
        }
    }

    fn request_following_redirects(
        &self,
        url: &str,
        validators: Option<&CacheMeta>,
    ) -> Result<FetchedResponse> {
        let mut current = url.to_string();
        for _hop in 0..=self.max_redirects {
            let mut request = self.client.get(&current);
            if let Some(meta) = validators {
                if let Some(etag) = &meta.etag {
                    request = request.header(reqwest::header::IF_NONE_MATCH, etag);
                }
                if let Some(last_modified) = &meta.last_modified {
                    request = request.header(reqwest::header::IF_MODIFIED_SINCE, last_modified);
                }
            }

            let response = request.send().map_err(|e| BundleError::NetworkError {
                url: current.clone(),
                reason: if e.is_timeout() {
                    "request timed out".to_string()
                } else {
                    e.to_string()
                },
            })?;

            let status = response.status();
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| BundleError::HttpError {
                        status: status.as_u16(),
                        url: current.clone(),
                    })?;
                current = absolutize_location(&current, location)?;
                continue;
            }

            if status == StatusCode::NOT_MODIFIED {
                return Ok(FetchedResponse::NotModified);
            }

            if status.is_success() {
                let meta = CacheMeta {
                    url: url.to_string(),
                    etag: header_string(&response, reqwest::header::ETAG),
                    last_modified: header_string(&response, reqwest::header::LAST_MODIFIED),
                };
                let body = response.text().map_err(|e| BundleError::NetworkError {
                    url: current.clone(),
                    reason: e.to_string(),
                })?;
                return Ok(FetchedResponse::Fresh { body, meta });
            }

            return Err(BundleError::HttpError {
                status: status.as_u16(),
                url: current.clone(),
            });
        }

        Err(BundleError::RedirectLoop {
            url: url.to_string(),
            hops: self.max_redirects,
        })
    }

    fn announce(&mut self, url: &str) {
        if self.fetched_urls.iter().any(|u| u == url) {
            return;
        }
        eprintln!("Fetched: {url}");
        self.fetched_urls.push(url.to_string());
    }
}

enum FetchedResponse {
    Fresh { body: String, meta: CacheMeta },
    NotModified,
}

fn header_string(response: &reqwest::blocking::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn absolutize_location(current: &str, location: &str) -> Result<String> {
    if location.starts_with("http://") || location.starts_with("https://") {
        return Ok(location.to_string());
    }
    let base = url::Url::parse(current).map_err(|e| BundleError::NetworkError {
        url: current.to_string(),
        reason: e.to_string(),
    })?;
    let joined = base.join(location).map_err(|e| BundleError::NetworkError {
        url: current.to_string(),
        reason: format!("bad redirect target '{location}': {e}"),
    })?;
    Ok(joined.to_string())
}
