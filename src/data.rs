//! The datasource facade: definition, lookup, reads and parsing.
//!
//! A [`Data`] owns the source registry, the result cache and the reader
//! table. Template engines hold one `Data` for the life of a render and call
//! [`Data::datasource`] (structured) or [`Data::include`] (raw text) from
//! their template functions.

use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;
use serde_json::Value;
use url::Url;

use crate::cache::{FetchResult, ResultCache};
use crate::error::{DatatapError, Result};
use crate::parsers;
use crate::readers::ReaderTable;
use crate::registry::Registry;
use crate::source::Source;

pub struct Data {
    registry: Registry,
    cache: ResultCache,
    readers: ReaderTable,
    stdin: OnceCell<Vec<u8>>,
    stdin_override: Mutex<Option<Vec<u8>>>,
}

impl Data {
    pub fn new() -> Self {
        let readers = ReaderTable::new();
        let schemes: Vec<&'static str> = readers.schemes().collect();
        Self {
            registry: Registry::new(schemes),
            cache: ResultCache::new(),
            readers,
            stdin: OnceCell::new(),
            stdin_override: Mutex::new(None),
        }
    }

    /// Define a named datasource. Redefining an alias is a no-op.
    pub fn define_datasource(
        &self,
        alias: &str,
        url: &Url,
        headers: Vec<(String, String)>,
    ) -> Result<Arc<Source>> {
        self.registry.register(alias, url.clone(), headers)
    }

    pub fn lookup(&self, alias: &str) -> Option<Arc<Source>> {
        self.registry.lookup(alias)
    }

    /// A defined alias, or — when the alias string is itself an absolute
    /// URL — a source defined on the fly under that string.
    fn lookup_or_dynamic(&self, alias: &str) -> Result<Arc<Source>> {
        match self.registry.lookup(alias) {
            Some(source) => Ok(source),
            None => self.registry.dynamic(alias, vec![]),
        }
    }

    /// Read and parse a datasource into structured data.
    pub fn datasource(&self, alias: &str, args: &[String]) -> Result<Value> {
        let source = self.lookup_or_dynamic(alias)?;
        let fetched = self.read_source(&source, args)?;
        parsers::parse(&fetched.media_type, &fetched.bytes)
    }

    /// Read a datasource as text, without parsing.
    pub fn include(&self, alias: &str, args: &[String]) -> Result<String> {
        let source = self.lookup_or_dynamic(alias)?;
        let fetched = self.read_source(&source, args)?;
        String::from_utf8(fetched.bytes.clone())
            .map_err(|e| DatatapError::read_failure(alias, args, anyhow::Error::from(e)))
    }

    /// Whether the alias has been defined. Purely a registry check; the
    /// datasource is not contacted.
    pub fn datasource_exists(&self, alias: &str) -> bool {
        self.registry.exists(alias)
    }

    /// Whether the datasource can actually be read right now. Undefined
    /// aliases are unreachable rather than an error.
    pub fn datasource_reachable(&self, alias: &str, args: &[String]) -> bool {
        match self.registry.lookup(alias) {
            Some(source) => self.read_source(&source, args).is_ok(),
            None => false,
        }
    }

    pub fn list_datasources(&self) -> Vec<String> {
        self.registry.list()
    }

    /// Fetch through the result cache: one reader invocation per distinct
    /// `(alias, args)`, shared by concurrent callers.
    pub fn read_source(&self, source: &Arc<Source>, args: &[String]) -> Result<Arc<FetchResult>> {
        let key = ResultCache::key(source.alias(), args);
        self.cache.get_or_fetch(&key, || {
            let reader = self.readers.get(source.url().scheme())?;
            let bytes = reader
                .read(self, source, args)
                .map_err(|e| DatatapError::read_failure(source.alias(), args, e))?;
            let media_type = source.media_type(args.first().map(String::as_str))?;
            Ok(FetchResult { bytes, media_type })
        })
    }

    /// Standard input, read once and memoized.
    pub fn read_stdin(&self) -> Result<Vec<u8>> {
        self.stdin
            .get_or_try_init(|| -> Result<Vec<u8>> {
                if let Some(buf) = self.stdin_override.lock().expect("stdin lock poisoned").take() {
                    return Ok(buf);
                }
                use std::io::Read;
                let mut buf = Vec::new();
                std::io::stdin().read_to_end(&mut buf)?;
                Ok(buf)
            })
            .cloned()
    }

    /// Replace stdin with a byte buffer. Only effective before the first
    /// `stdin:` read.
    pub fn set_stdin(&self, bytes: Vec<u8>) {
        *self.stdin_override.lock().expect("stdin lock poisoned") = Some(bytes);
    }

    /// Tear down backend state (revoke Vault leases and the like). Call
    /// once, after the last read.
    pub fn cleanup(&self) {
        self.registry.cleanup();
    }
}

impl Default for Data {
    fn default() -> Self {
        Self::new()
    }
}
