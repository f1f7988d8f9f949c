//! datatap - uniform datasource access for template renderers.
//!
//! A datasource is a URL (or an alias bound to one) naming structured data
//! somewhere: a local file, an HTTP endpoint, a git repo, Vault, Consul, an
//! object store, or a merge of several of those. datatap resolves the URL,
//! dispatches it to a scheme-specific reader, caches the result, and parses
//! the bytes according to their media type.
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`data`] - The facade: define, look up and read datasources
//! - [`urls`] - Datasource URL parsing and relative resolution
//! - [`mime`] - Media type inference and precedence
//! - [`readers`] - Scheme-dispatched readers (file, http, git, vault, ...)
//! - [`registry`] - Alias to source descriptor map
//! - [`cache`] - Write-once memoization of reads
//! - [`merge`] - Deep map merging for the `merge:` scheme
//! - [`parsers`] - Bytes to structured data, by media type
//! - [`error`] - Error types and result alias
//!
//! # Example
//!
//! ```no_run
//! use datatap::Data;
//!
//! let data = Data::new();
//! let url = url::Url::parse("https://example.com/config.json").unwrap();
//! data.define_datasource("cfg", &url, vec![])?;
//! let value = data.datasource("cfg", &[])?;
//! println!("{}", value["name"]);
//! # Ok::<(), datatap::DatatapError>(())
//! ```

pub mod aws;
pub mod cache;
pub mod cli;
pub mod data;
pub mod error;
pub mod merge;
pub mod mime;
pub mod parsers;
pub mod readers;
pub mod registry;
pub mod source;
pub mod urls;

pub use cache::{FetchResult, ResultCache};
pub use data::Data;
pub use error::{DatatapError, Result};
pub use registry::Registry;
pub use source::Source;
