//! Datasource descriptors.
//!
//! A [`Source`] is a named, URL-addressed data origin. Each Source owns at
//! most one lazily-constructed backend client appropriate to its scheme (an
//! HTTP client, a Vault session, an embedded KV handle, AWS signing state);
//! the client is built on first use and reused for the Source's lifetime,
//! even when reads race from multiple threads.

use std::fmt;
use std::sync::RwLock;

use once_cell::sync::OnceCell;
use url::Url;

use crate::error::Result;
use crate::mime;
use crate::readers::consul::ConsulClient;
use crate::readers::vault::VaultClient;
use crate::aws::AwsClient;
use crate::readers::blob::GcsClient;

/// A lazily-constructed, scheme-appropriate backend client.
pub enum Backend {
    /// Plain HTTP client for `http`/`https` sources.
    Http(reqwest::blocking::Client),
    /// Authenticated Vault session.
    Vault(VaultClient),
    /// Consul KV client.
    Consul(ConsulClient),
    /// Embedded KV database for `boltdb` sources.
    Kv(redb::Database),
    /// Signing state + client for `s3`, `aws+smp` and `aws+sm` sources.
    Aws(AwsClient),
    /// Google Cloud Storage client for `gs` sources.
    Gcs(GcsClient),
}

/// A named datasource. Identity is the alias.
pub struct Source {
    alias: String,
    url: Url,
    /// Per-alias HTTP headers (http/https sources only).
    headers: Vec<(String, String)>,
    /// Media-type override recorded by a reader (e.g. an HTTP Content-Type
    /// response header). Consulted by MIME resolution at precedence 3.
    media_type: RwLock<Option<String>>,
    backend: OnceCell<Backend>,
}

impl Source {
    pub fn new(alias: impl Into<String>, url: Url, headers: Vec<(String, String)>) -> Self {
        Self {
            alias: alias.into(),
            url,
            headers,
            media_type: RwLock::new(None),
            backend: OnceCell::new(),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// The scheme's backend client, built exactly once. Concurrent first
    /// reads block on the same initialization rather than racing it.
    pub fn backend_or_init<F>(&self, init: F) -> Result<&Backend>
    where
        F: FnOnce() -> Result<Backend>,
    {
        self.backend.get_or_try_init(init)
    }

    /// Record a media-type override for subsequent MIME resolution.
    pub fn set_media_type(&self, media_type: &str) {
        *self.media_type.write().expect("media type lock poisoned") = Some(media_type.to_string());
    }

    /// Drop any recorded override (a subpath read addresses different
    /// content than the read that recorded it).
    pub fn clear_media_type(&self) {
        *self.media_type.write().expect("media type lock poisoned") = None;
    }

    pub fn media_type_hint(&self) -> Option<String> {
        self.media_type.read().expect("media type lock poisoned").clone()
    }

    /// Effective media type for a read with the given subpath argument.
    pub fn media_type(&self, subpath: Option<&str>) -> Result<String> {
        let hint = self.media_type_hint();
        mime::media_type(&self.url, hint.as_deref(), subpath)
    }

    /// Backend-specific teardown. Errors are logged, not propagated:
    /// shutdown must not be blocked by a failed logout.
    pub fn cleanup(&self) {
        if let Some(Backend::Vault(vc)) = self.backend.get() {
            if let Err(e) = vc.logout() {
                tracing::warn!(alias = %self.alias, "vault logout failed: {e}");
            }
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.alias, self.url)
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("alias", &self.alias)
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn source(url: &str) -> Source {
        Source::new("test", Url::parse(url).unwrap(), vec![])
    }

    #[test]
    fn backend_is_constructed_exactly_once() {
        let s = Arc::new(source("http://example.com/"));
        let count = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&s);
                let count = Arc::clone(&count);
                std::thread::spawn(move || {
                    s.backend_or_init(|| {
                        count.fetch_add(1, Ordering::SeqCst);
                        Ok(Backend::Http(reqwest::blocking::Client::new()))
                    })
                    .map(|_| ())
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap().unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_init_is_retried() {
        let s = source("http://example.com/");

        let r = s.backend_or_init(|| Err(anyhow::anyhow!("first attempt fails").into()));
        assert!(r.is_err());

        let r = s.backend_or_init(|| Ok(Backend::Http(reqwest::blocking::Client::new())));
        assert!(r.is_ok());
    }

    #[test]
    fn media_type_hint_round_trips() {
        let s = source("http://example.com/data");
        assert_eq!(s.media_type_hint(), None);

        s.set_media_type("application/json");
        assert_eq!(s.media_type_hint().as_deref(), Some("application/json"));

        s.clear_media_type();
        assert_eq!(s.media_type_hint(), None);
    }

    #[test]
    fn media_type_uses_override_then_default() {
        let s = source("http://example.com/unknown");
        assert_eq!(s.media_type(None).unwrap(), "text/plain");

        s.set_media_type("application/yaml");
        assert_eq!(s.media_type(None).unwrap(), "application/yaml");
    }

    #[test]
    fn display_shows_alias_and_url() {
        let s = source("vault:///secret/a");
        assert_eq!(s.to_string(), "test=vault:///secret/a");
    }
}
