//! Scheme-dispatched datasource readers.
//!
//! Every supported URL scheme maps to one [`Reader`]. Readers return raw
//! bytes; parsing into structured data happens later, driven by the media
//! type the read resolved. A reader may set a media-type override on the
//! [`Source`] (HTTP `Content-Type`, directory listings, merge output).

use std::collections::BTreeMap;

use crate::data::Data;
use crate::error::{DatatapError, Result};
use crate::source::Source;

pub mod aws;
pub mod blob;
pub mod boltdb;
pub mod consul;
pub mod env;
pub mod file;
pub mod git;
pub mod http;
pub mod merge;
pub mod stdin;
pub mod vault;

pub trait Reader: Send + Sync {
    /// Fetch the bytes behind `source`, optionally refined by `args`
    /// (typically a single subpath or key).
    fn read(&self, data: &Data, source: &Source, args: &[String]) -> Result<Vec<u8>>;
}

/// Immutable scheme-to-reader table, built once at startup.
pub struct ReaderTable {
    readers: BTreeMap<&'static str, Box<dyn Reader>>,
}

impl ReaderTable {
    pub fn new() -> Self {
        let mut readers: BTreeMap<&'static str, Box<dyn Reader>> = BTreeMap::new();

        readers.insert("file", Box::new(file::FileReader));
        readers.insert("env", Box::new(env::EnvReader));
        readers.insert("stdin", Box::new(stdin::StdinReader));
        readers.insert("http", Box::new(http::HttpReader));
        readers.insert("https", Box::new(http::HttpReader));
        for scheme in crate::urls::GIT_SCHEMES {
            readers.insert(scheme, Box::new(git::GitReader));
        }
        readers.insert("vault", Box::new(vault::VaultReader));
        readers.insert("vault+http", Box::new(vault::VaultReader));
        readers.insert("vault+https", Box::new(vault::VaultReader));
        readers.insert("consul", Box::new(consul::ConsulReader));
        readers.insert("consul+http", Box::new(consul::ConsulReader));
        readers.insert("consul+https", Box::new(consul::ConsulReader));
        readers.insert("boltdb", Box::new(boltdb::BoltdbReader));
        readers.insert("s3", Box::new(blob::S3Reader));
        readers.insert("gs", Box::new(blob::GcsReader));
        readers.insert("aws+smp", Box::new(aws::ParamStoreReader));
        readers.insert("aws+sm", Box::new(aws::SecretsManagerReader));
        readers.insert("merge", Box::new(merge::MergeReader));

        Self { readers }
    }

    pub fn get(&self, scheme: &str) -> Result<&dyn Reader> {
        self.readers
            .get(scheme)
            .map(|r| r.as_ref())
            .ok_or_else(|| DatatapError::SchemeNotRegistered {
                scheme: scheme.to_string(),
            })
    }

    pub fn schemes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.readers.keys().copied()
    }
}

impl Default for ReaderTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Most readers accept at most one extra argument (a subpath or key).
pub fn at_most_one_arg<'a>(scheme: &str, args: &'a [String]) -> Result<Option<&'a str>> {
    match args {
        [] => Ok(None),
        [one] => Ok(Some(one.as_str())),
        _ => Err(DatatapError::ArgumentError {
            scheme: scheme.to_string(),
            message: format!("expected at most 1 argument, got {}", args.len()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_all_schemes() {
        let table = ReaderTable::new();
        for scheme in [
            "file", "env", "stdin", "http", "https", "git", "git+file", "git+http",
            "git+https", "git+ssh", "vault", "vault+http", "vault+https", "consul",
            "consul+http", "consul+https", "boltdb", "s3", "gs", "aws+smp", "aws+sm",
            "merge",
        ] {
            assert!(table.get(scheme).is_ok(), "no reader for {scheme}");
        }
    }

    #[test]
    fn unknown_scheme_is_an_error() {
        let table = ReaderTable::new();
        match table.get("ftp") {
            Err(DatatapError::SchemeNotRegistered { scheme }) => assert_eq!(scheme, "ftp"),
            other => panic!("expected a scheme error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn at_most_one_arg_rejects_two() {
        assert_eq!(at_most_one_arg("vault", &[]).unwrap(), None);
        let args = vec!["a".to_string()];
        assert_eq!(at_most_one_arg("vault", &args).unwrap(), Some("a"));
        let args = vec!["a".to_string(), "b".to_string()];
        assert!(at_most_one_arg("vault", &args).is_err());
    }
}
