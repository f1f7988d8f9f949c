//! Media type resolution for fetched datasource content.
//!
//! The media type selects which format parser is applied to fetched bytes.
//! Resolution follows a fixed precedence order (first present wins):
//!
//! 1. `type` query parameter on the per-call subpath argument
//! 2. `type` query parameter on the source's base URL
//! 3. the source's media-type override (e.g. an HTTP `Content-Type` header,
//!    or a reader that always yields JSON)
//! 4. extension lookup on the subpath's path component
//! 5. extension lookup on the source URL's path
//! 6. `text/plain`
//!
//! Spaces in an explicit `type` value are rewritten to `+`, so callers can
//! write `type=application array json` without URL-escaping.

use std::path::Path;

use url::Url;

use crate::error::{DatatapError, Result};

pub const TEXT_MEDIATYPE: &str = "text/plain";
pub const CSV_MEDIATYPE: &str = "text/csv";
pub const JSON_MEDIATYPE: &str = "application/json";
pub const JSON_ARRAY_MEDIATYPE: &str = "application/array+json";
pub const TOML_MEDIATYPE: &str = "application/toml";
pub const YAML_MEDIATYPE: &str = "application/yaml";
pub const ENV_MEDIATYPE: &str = "application/x-env";

/// Extension -> media type table. The handful of types we can parse, plus
/// nothing else: unknown extensions fall through to `text/plain`.
fn by_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "json" => Some(JSON_MEDIATYPE),
        "yml" | "yaml" => Some(YAML_MEDIATYPE),
        "csv" => Some(CSV_MEDIATYPE),
        "toml" => Some(TOML_MEDIATYPE),
        "env" => Some(ENV_MEDIATYPE),
        _ => None,
    }
}

/// Normalize non-canonical media types seen in the wild before matching
/// against the parser dispatch table.
pub fn canonical(media_type: &str) -> &str {
    match media_type {
        "application/x-yaml" | "text/yaml" | "text/x-yaml" => YAML_MEDIATYPE,
        "application/text" => TEXT_MEDIATYPE,
        "text/json" => JSON_MEDIATYPE,
        other => other,
    }
}

/// Compute the effective media type for a read of `url` with an optional
/// per-call `subpath`, given any override recorded on the source.
pub fn media_type(url: &Url, override_hint: Option<&str>, subpath: Option<&str>) -> Result<String> {
    let sub = subpath.map(split_subpath);

    let mut mediatype = sub
        .as_ref()
        .and_then(|(_, q)| query_param(q, "type"))
        .or_else(|| url.query_pairs().find(|(k, _)| k == "type").map(|(_, v)| v.into_owned()))
        .or_else(|| override_hint.map(str::to_string))
        .unwrap_or_default();

    // make it so '+' doesn't need to be escaped
    mediatype = mediatype.replace(' ', "+");

    if mediatype.is_empty() {
        mediatype = sub
            .as_ref()
            .and_then(|(p, _)| extension_of(p))
            .or_else(|| extension_of(url.path()))
            .map(str::to_string)
            .unwrap_or_default();
    }

    if mediatype.is_empty() {
        return Ok(TEXT_MEDIATYPE.to_string());
    }
    parse_media_type(&mediatype)
}

fn extension_of(path: &str) -> Option<&'static str> {
    let ext = Path::new(path).extension()?.to_str()?;
    by_extension(ext)
}

/// Validate `type/subtype[;params]`, stripping any parameters. A malformed
/// media type is a parse error, surfaced to the caller.
pub fn parse_media_type(s: &str) -> Result<String> {
    let essence = s.split(';').next().unwrap_or("").trim();
    let malformed = || DatatapError::ParseFailure {
        media_type: s.to_string(),
        message: "malformed media type".into(),
    };

    let (ty, subty) = essence.split_once('/').ok_or_else(malformed)?;
    if ty.is_empty() || subty.is_empty() || subty.contains('/') {
        return Err(malformed());
    }
    let token_ok = |t: &str| {
        t.chars()
            .all(|c| c.is_ascii_alphanumeric() || "!#$&-^_.+".contains(c))
    };
    if !token_ok(ty) || !token_ok(subty) {
        return Err(malformed());
    }
    Ok(essence.to_ascii_lowercase())
}

/// Split a subpath argument into its path and query portions. Subpaths are
/// not full URLs, so this is a plain textual split.
fn split_subpath(subpath: &str) -> (String, String) {
    // a git-style '//' delimiter prefix reduces to a single slash here
    let s = if subpath.starts_with("//") {
        &subpath[1..]
    } else {
        subpath
    };
    // a ref fragment (git args) is neither path nor query
    let s = s.split_once('#').map_or(s, |(before, _)| before);
    match s.split_once('?') {
        Some((p, q)) => (p.to_string(), q.to_string()),
        None => (s.to_string(), String::new()),
    }
}

fn query_param(query: &str, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}
