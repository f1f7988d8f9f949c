//! Source registry: alias -> [`Source`] descriptors.
//!
//! The registry is shared mutable state — the template engine may define and
//! look up datasources concurrently from multiple worker threads — so the
//! map lives behind a mutex. The map is insertion-ordered for deterministic
//! listing; redefining an existing alias is a no-op.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use url::Url;

use crate::error::{DatatapError, Result};
use crate::source::Source;

pub struct Registry {
    sources: Mutex<IndexMap<String, Arc<Source>>>,
    /// Schemes with a registered reader; registration of any other scheme
    /// is rejected up front.
    schemes: BTreeSet<&'static str>,
}

impl Registry {
    pub fn new(schemes: impl IntoIterator<Item = &'static str>) -> Self {
        Self {
            sources: Mutex::new(IndexMap::new()),
            schemes: schemes.into_iter().collect(),
        }
    }

    /// Create and store a Source. Errors if the URL's scheme has no
    /// registered reader. Redefinition of an existing alias is a no-op and
    /// returns the existing Source.
    pub fn register(
        &self,
        alias: &str,
        url: Url,
        headers: Vec<(String, String)>,
    ) -> Result<Arc<Source>> {
        if !self.schemes.contains(url.scheme()) {
            return Err(DatatapError::SchemeNotRegistered {
                scheme: url.scheme().to_string(),
            });
        }

        let mut sources = self.lock();
        if let Some(existing) = sources.get(alias) {
            return Ok(Arc::clone(existing));
        }
        let source = Arc::new(Source::new(alias, url, headers));
        sources.insert(alias.to_string(), Arc::clone(&source));
        Ok(source)
    }

    /// Pure map lookup.
    pub fn lookup(&self, alias: &str) -> Option<Arc<Source>> {
        self.lock().get(alias).cloned()
    }

    pub fn exists(&self, alias: &str) -> bool {
        self.lock().contains_key(alias)
    }

    /// Register a dynamically-referenced source: the alias string itself is
    /// parsed as a URL, and must be absolute.
    pub fn dynamic(&self, alias: &str, headers: Vec<(String, String)>) -> Result<Arc<Source>> {
        let url = Url::parse(alias).map_err(|_| DatatapError::UndefinedDatasource {
            alias: alias.to_string(),
        })?;
        self.register(alias, url, headers)
    }

    /// All registered aliases, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.lock().keys().cloned().collect();
        aliases.sort();
        aliases
    }

    /// Backend teardown for every registered Source. Called once at
    /// shutdown, after all outstanding reads have completed.
    pub fn cleanup(&self) {
        let sources: Vec<Arc<Source>> = self.lock().values().cloned().collect();
        for source in sources {
            source.cleanup();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IndexMap<String, Arc<Source>>> {
        self.sources.lock().expect("registry lock poisoned")
    }
}
