//! The `merge:` scheme combines several datasources into one map.
//!
//! `merge:a|b|c` parses each part (a defined alias, or a URL used ad hoc),
//! requires every part to parse to a map, and deep-merges them with earlier
//! parts taking priority. The result is rendered as YAML.
//!
//! Query strings and fragments in a `merge:` URL apply to the merged result,
//! not the parts; to merge sources that need their own query strings or
//! headers, define them as aliases first.

use serde_json::Value;

use crate::data::Data;
use crate::error::{DatatapError, Result};
use crate::mime;
use crate::parsers;
use crate::readers::Reader;
use crate::source::Source;
use crate::{merge, urls};

pub struct MergeReader;

impl Reader for MergeReader {
    fn read(&self, data: &Data, source: &Source, _args: &[String]) -> Result<Vec<u8>> {
        // `|` is not a legal URL character, so it may arrive percent-encoded
        let spec = source.url().path().replace("%7C", "|").replace("%7c", "|");
        let parts: Vec<&str> = spec.split('|').collect();
        if parts.len() < 2 {
            return Err(DatatapError::MergeError {
                message: "need at least 2 datasources to merge".to_string(),
            });
        }

        let mut maps = Vec::with_capacity(parts.len());
        for part in parts {
            let sub = match data.lookup(part) {
                Some(sub) => sub,
                // not a defined alias: treat the part as a URL of its own
                None => data.define_datasource(part, &urls::parse_source_url(part)?, vec![])?,
            };
            let fetched = data.read_source(&sub, &[])?;

            let value = parsers::parse(&fetched.media_type, &fetched.bytes)?;
            let Value::Object(map) = value else {
                return Err(DatatapError::MergeError {
                    message: format!(
                        "can only merge maps: datasource {part} (type {}) did not parse to a map",
                        fetched.media_type
                    ),
                });
            };
            maps.push(map);
        }

        let merged = merge::merge_maps(&maps);
        let yaml = parsers::to_yaml(&Value::Object(merged))?;
        source.set_media_type(mime::YAML_MEDIATYPE);
        Ok(yaml.into_bytes())
    }
}
