//! Process-wide memoization of datasource reads.
//!
//! Each distinct `(alias, args)` query is fetched at most once; a cache hit
//! returns the stored result without re-invoking the reader, regardless of
//! whether the underlying data may have changed. Failed reads are never
//! cached and are retried verbatim on the next identical call.
//!
//! The cache is an explicit object injected where it's needed (no
//! package-level state), guarded for concurrent first access: racing
//! readers of the same key block on one fetch instead of duplicating it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;

use crate::error::Result;

/// The outcome of a datasource read. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

pub struct ResultCache {
    entries: Mutex<HashMap<String, Arc<OnceCell<Arc<FetchResult>>>>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cache key: the alias concatenated with the ordered args. Args are
    /// deliberately not normalized — different literal arg strings that are
    /// semantically equal produce distinct entries.
    pub fn key(alias: &str, args: &[String]) -> String {
        let mut key = alias.to_string();
        for arg in args {
            key.push_str(arg);
        }
        key
    }

    /// Return the cached result for `key`, or run `fetch` and store its
    /// result. Entries are write-once; errors leave the slot empty so the
    /// next call retries.
    pub fn get_or_fetch<F>(&self, key: &str, fetch: F) -> Result<Arc<FetchResult>>
    where
        F: FnOnce() -> Result<FetchResult>,
    {
        let cell = {
            let mut entries = self.entries.lock().expect("result cache lock poisoned");
            Arc::clone(entries.entry(key.to_string()).or_default())
        };

        // the map lock is released here: a slow fetch must not block
        // unrelated keys (merge sub-reads re-enter this cache)
        cell.get_or_try_init(|| fetch().map(Arc::new)).cloned()
    }

    #[cfg(test)]
    fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .is_some_and(|c| c.get().is_some())
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn result(s: &str) -> FetchResult {
        FetchResult {
            bytes: s.as_bytes().to_vec(),
            media_type: "text/plain".into(),
        }
    }

    #[test]
    fn second_read_hits_cache() {
        let cache = ResultCache::new();
        let calls = AtomicUsize::new(0);

        let fetch = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(result("hello"))
        };

        let a = cache.get_or_fetch("k", fetch).unwrap();
        let b = cache
            .get_or_fetch("k", || panic!("cache hit must not re-invoke the reader"))
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn failed_fetch_is_not_cached() {
        let cache = ResultCache::new();

        let r = cache.get_or_fetch("k", || Err(anyhow::anyhow!("boom").into()));
        assert!(r.is_err());
        assert!(!cache.contains("k"));

        let r = cache.get_or_fetch("k", || Ok(result("ok")));
        assert!(r.is_ok());
        assert!(cache.contains("k"));
    }

    #[test]
    fn keys_concatenate_alias_and_args() {
        assert_eq!(ResultCache::key("a", &[]), "a");
        assert_eq!(
            ResultCache::key("a", &["x".into(), "y".into()]),
            "axy"
        );
        // args are not normalized: these are distinct entries
        assert_ne!(
            ResultCache::key("a", &["b/c".into()]),
            ResultCache::key("a", &["b//c".into()])
        );
    }

    #[test]
    fn distinct_args_are_distinct_entries() {
        let cache = ResultCache::new();
        cache
            .get_or_fetch(&ResultCache::key("a", &["one".into()]), || Ok(result("1")))
            .unwrap();
        let two = cache
            .get_or_fetch(&ResultCache::key("a", &["two".into()]), || Ok(result("2")))
            .unwrap();
        assert_eq!(two.bytes, b"2");
    }

    #[test]
    fn concurrent_first_access_fetches_once() {
        let cache = Arc::new(ResultCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                std::thread::spawn(move || {
                    cache
                        .get_or_fetch("shared", || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok(result("shared"))
                        })
                        .unwrap()
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap().bytes, b"shared");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
