//! In-memory module store for one bundler run.
//!
//! Modules are fetched and parsed lazily on first reference and cached
//! for the rest of the run. The registry owns the fetcher and the shared
//! source map; nothing here persists across invocations (the on-disk
//! HTTP cache lives below the fetcher).

use deno_ast::swc::common::{sync::Lrc, SourceMap};
use log::debug;

use crate::{
    config::Config,
    errors::Result,
    fetcher::Fetcher,
    module_record::{FxIndexMap, ModuleRecord},
    parser,
    resolver::{scheme_of, UriScheme},
};

pub struct ModuleRegistry {
    modules: FxIndexMap<String, ModuleRecord>,
    fetcher: Fetcher,
    source_map: Lrc<SourceMap>,
    config: Config,
}

impl ModuleRegistry {
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self {
            modules: FxIndexMap::default(),
            fetcher: Fetcher::new(&config)?,
            source_map: Lrc::new(SourceMap::default()),
            config,
        })
    }

    pub fn source_map(&self) -> &Lrc<SourceMap> {
        &self.source_map
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// URLs fetched over the network this run.
    pub fn fetched_urls(&self) -> &[String] {
        self.fetcher.fetched_urls()
    }

    /// URIs of every module loaded so far, in load order.
    pub fn loaded_uris(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    pub fn get(&self, uri: &str) -> Option<&ModuleRecord> {
        self.modules.get(uri)
    }

    /// Load `uri` if it is not already in the store and return its record.
    pub fn ensure(&mut self, uri: &str) -> Result<&ModuleRecord> {
        if !self.modules.contains_key(uri) {
            let record = self.load(uri)?;
            self.modules.insert(uri.to_string(), record);
        }
        Ok(self
            .modules
            .get(uri)
            .expect("module inserted immediately above"))
    }

    fn load(&mut self, uri: &str) -> Result<ModuleRecord> {
        if scheme_of(uri) == UriScheme::Host {
            debug!("synthesizing host module {uri}");
            return ModuleRecord::synthetic_host(uri);
        }

        let (source, provenance) = self.fetcher.fetch(uri)?;
        debug!("loaded {uri} ({} bytes, {provenance:?})", source.len());
        let ast = parser::parse_module(&self.source_map, uri, &source)?;
        ModuleRecord::from_ast(uri, source, ast, provenance)
    }
}
