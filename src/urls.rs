//! Datasource URL resolution.
//!
//! Every datasource is addressed by an absolute URL. User-supplied specs are
//! looser: `-` means stdin, bare paths are resolved against the working
//! directory, and `alias=URI` pairs carry the alias inline. This module turns
//! all of those into canonical [`Url`]s.

use std::path::Path;

use url::Url;

use crate::error::{DatatapError, Result};

/// Schemes for which subpath args get git-style `//` handling in
/// [`resolve_url`].
pub const GIT_SCHEMES: &[&str] = &["git", "git+file", "git+http", "git+https", "git+ssh"];

/// Parse a user-supplied datasource spec into an absolute URL.
///
/// - `-` resolves to `stdin:`
/// - absolute URLs are used as-is
/// - anything else is treated as a filesystem path: OS separators are
///   normalized to `/`, Windows volume names (drive letters and UNC
///   prefixes) are rewritten to `file:` URLs directly, and relative paths
///   are resolved against the current working directory
pub fn parse_source_url(value: &str) -> Result<Url> {
    let mut spec = if value == "-" {
        "stdin:".to_string()
    } else {
        value.replace('\\', "/")
    };

    if let Some(vol) = volume_name(&spec) {
        // UNC paths keep their leading slashes; drive letters need a
        // file:/// prefix so the drive isn't read as a URL scheme
        if vol.len() > 2 {
            spec = format!("file:{spec}");
        } else {
            spec = format!("file:///{spec}");
        }
    }

    match Url::parse(&spec) {
        // a single-letter "scheme" is a drive letter that slipped through
        Ok(u) if u.scheme().len() > 1 => Ok(u),
        _ => file_to_url(&spec),
    }
}

/// Parse an `alias=URI` datasource definition.
///
/// A bare path with no `alias=` is accepted for `file:` sources only; the
/// alias is then inferred from the file stem (`data/foo.json` -> `foo`).
pub fn parse_alias_spec(spec: &str) -> Result<(String, Url)> {
    match spec.split_once('=') {
        Some((alias, value)) => {
            let url = parse_source_url(value)?;
            Ok((alias.to_string(), url))
        }
        None => {
            let url = parse_source_url(spec)?;
            if url.scheme() != "file" {
                return Err(DatatapError::InvalidUrl {
                    value: spec.to_string(),
                    message: "an alias name must be provided for non-file datasources".into(),
                });
            }
            let base = Path::new(spec)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(spec);
            let alias = base.split('.').next().unwrap_or(base).to_string();
            Ok((alias, url))
        }
    }
}

/// Resolve a per-call subpath reference against a base URL.
///
/// Differs from plain URL reference resolution in that query parameters are
/// unioned: the base URL's parameters are kept, with the subpath's winning
/// on duplicates. Git URLs get additional handling so that the `//`
/// repo/path delimiter survives resolution.
pub fn resolve_url(base: &Url, rel: &str) -> Result<Url> {
    // opaque URLs (env:VAR, merge:a|b) have nothing to resolve against
    if base.cannot_be_a_base() {
        return Ok(base.clone());
    }

    let mut base = base.clone();
    let mut rel = rel.to_string();

    if GIT_SCHEMES.contains(&base.scheme()) {
        if base.path().contains("//") && rel.contains("//") {
            return Err(DatatapError::InvalidUrl {
                value: rel,
                message: "both base URL and subpath contain '//', which is not allowed in git URLs"
                    .into(),
            });
        }

        // a subpath must extend the base path, not replace its last element
        if !rel.is_empty() && !base.path().ends_with('/') {
            let p = format!("{}/", base.path());
            base.set_path(&p);
        }

        // leading '//' would otherwise be parsed as a schemeless authority
        if rel.starts_with("//") {
            rel = format!(".{rel}");
        }
    }

    let mut out = base.join(&rel).map_err(|e| DatatapError::InvalidUrl {
        value: rel.clone(),
        message: e.to_string(),
    })?;

    if base.query().is_some() {
        let mut pairs: Vec<(String, String)> = base
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        for (k, v) in out.query_pairs() {
            match pairs.iter_mut().find(|(pk, _)| *pk == k) {
                Some(pair) => pair.1 = v.into_owned(),
                None => pairs.push((k.into_owned(), v.into_owned())),
            }
        }
        out.query_pairs_mut().clear().extend_pairs(&pairs);
    }

    Ok(out)
}

/// Join and lexically clean two slash-separated paths, collapsing duplicate
/// separators and resolving `.` and `..` segments.
pub(crate) fn path_join(a: &str, b: &str) -> String {
    let joined = match (a.is_empty(), b.is_empty()) {
        (true, _) => b.to_string(),
        (_, true) => a.to_string(),
        _ => format!("{a}/{b}"),
    };
    if joined.is_empty() {
        return joined;
    }

    let rooted = joined.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for seg in joined.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|s| *s != "..") {
                    segments.pop();
                } else if !rooted {
                    segments.push("..");
                }
            }
            _ => segments.push(seg),
        }
    }

    let mut out = String::new();
    if rooted {
        out.push('/');
    }
    out.push_str(&segments.join("/"));
    if out.is_empty() {
        ".".to_string()
    } else {
        out
    }
}

/// Windows volume prefix of a (slash-normalized) path: `C:` for drive
/// letters, `//host/share` for UNCs. `None` on plain paths.
fn volume_name(path: &str) -> Option<&str> {
    let b = path.as_bytes();
    if b.len() >= 2 && b[1] == b':' && b[0].is_ascii_alphabetic() {
        return Some(&path[..2]);
    }
    if let Some(rest) = path.strip_prefix("//") {
        let mut parts = rest.splitn(3, '/');
        let host = parts.next()?;
        let share = parts.next()?;
        if !host.is_empty() && !share.is_empty() {
            let len = 2 + host.len() + 1 + share.len();
            return Some(&path[..len]);
        }
    }
    None
}

fn file_to_url(path: &str) -> Result<Url> {
    let cwd = std::env::current_dir()?;
    let base = Url::from_directory_path(&cwd).map_err(|()| DatatapError::InvalidUrl {
        value: path.to_string(),
        message: format!("working directory {} is not absolute", cwd.display()),
    })?;
    base.join(path).map_err(|e| DatatapError::InvalidUrl {
        value: path.to_string(),
        message: e.to_string(),
    })
}
