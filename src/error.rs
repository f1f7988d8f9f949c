//! Error types for datatap operations.
//!
//! This module defines [`DatatapError`], the primary error type used
//! throughout the crate, and a [`Result`] type alias for convenience.
//!
//! # Error Handling Strategy
//!
//! - Use `DatatapError` for domain-specific errors that need distinct handling
//! - Use `anyhow::Error` (via `DatatapError::Other`) for unexpected errors
//! - Read failures always carry the alias and args they were issued with
//! - Errors are never swallowed inside readers; they propagate to the
//!   template function that triggered the read

use thiserror::Error;

/// Core error type for datatap operations.
#[derive(Debug, Error)]
pub enum DatatapError {
    /// The URL's scheme has no registered reader.
    #[error("no datasource reader registered for scheme '{scheme}'")]
    SchemeNotRegistered { scheme: String },

    /// Alias not found, and not resolvable as an absolute URL.
    #[error("undefined datasource '{alias}'")]
    UndefinedDatasource { alias: String },

    /// A datasource spec string could not be resolved to an absolute URL.
    #[error("invalid datasource URL '{value}': {message}")]
    InvalidUrl { value: String, message: String },

    /// Network, filesystem or backend error while reading a datasource.
    #[error("couldn't read datasource '{alias}'{}: {source}", args_suffix(.args))]
    ReadFailure {
        alias: String,
        args: Vec<String>,
        #[source]
        source: anyhow::Error,
    },

    /// Media type unsupported, or fetched bytes failed to parse.
    #[error("can't parse as {media_type}: {message}")]
    ParseFailure { media_type: String, message: String },

    /// Too many (or otherwise unusable) positional arguments.
    #[error("bad arguments to {scheme} datasource: {message}")]
    ArgumentError { scheme: String, message: String },

    /// A merge datasource was malformed or a sub-source wasn't a map.
    #[error("merge: {message}")]
    MergeError { message: String },

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic wrapped error for anyhow interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DatatapError {
    /// Wrap a backend failure with the alias and args that triggered it.
    pub fn read_failure(
        alias: impl Into<String>,
        args: &[String],
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::ReadFailure {
            alias: alias.into(),
            args: args.to_vec(),
            source: source.into(),
        }
    }
}

fn args_suffix(args: &[String]) -> String {
    if args.is_empty() {
        String::new()
    } else {
        format!(" (args: {})", args.join(", "))
    }
}

/// Result type alias for datatap operations.
pub type Result<T> = std::result::Result<T, DatatapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_not_registered_displays_scheme() {
        let err = DatatapError::SchemeNotRegistered {
            scheme: "gopher".into(),
        };
        assert!(err.to_string().contains("gopher"));
    }

    #[test]
    fn undefined_datasource_displays_alias() {
        let err = DatatapError::UndefinedDatasource {
            alias: "missing".into(),
        };
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn read_failure_displays_alias_and_args() {
        let err = DatatapError::read_failure(
            "config",
            &["sub/path.json".to_string()],
            anyhow::anyhow!("connection refused"),
        );
        let msg = err.to_string();
        assert!(msg.contains("config"));
        assert!(msg.contains("sub/path.json"));
    }

    #[test]
    fn read_failure_without_args_omits_args_clause() {
        let err = DatatapError::read_failure("config", &[], anyhow::anyhow!("boom"));
        assert!(!err.to_string().contains("args:"));
    }

    #[test]
    fn parse_failure_displays_media_type() {
        let err = DatatapError::ParseFailure {
            media_type: "application/toml".into(),
            message: "expected a table".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("application/toml"));
        assert!(msg.contains("expected a table"));
    }

    #[test]
    fn io_error_converts_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: DatatapError = io_err.into();
        assert!(matches!(err, DatatapError::Io(_)));
    }

    #[test]
    fn result_type_alias_works() {
        fn returns_error() -> Result<()> {
            Err(DatatapError::MergeError {
                message: "need at least 2 sources".into(),
            })
        }
        assert!(returns_error().is_err());
    }
}
