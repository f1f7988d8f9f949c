//! Format parsing for fetched datasource bytes.
//!
//! Readers produce raw bytes plus a media type; this module turns them into
//! structured values for the template engine. Supported formats: JSON, JSON
//! arrays, YAML, TOML and `.env` files. Everything else surfaces as a parse
//! error, except `text/plain` which passes through as a string.
//!
//! Parsed values are represented as [`serde_json::Value`] — the common
//! denominator the template layer consumes.

use serde_json::Value;

use crate::error::{DatatapError, Result};
use crate::mime;

/// Parse fetched bytes according to their media type.
pub fn parse(media_type: &str, data: &[u8]) -> Result<Value> {
    let text = std::str::from_utf8(data).map_err(|e| DatatapError::ParseFailure {
        media_type: media_type.to_string(),
        message: format!("invalid UTF-8: {e}"),
    })?;

    match mime::canonical(media_type) {
        mime::JSON_MEDIATYPE => parse_json(media_type, text),
        mime::JSON_ARRAY_MEDIATYPE => {
            let v = parse_json(media_type, text)?;
            if v.is_array() {
                Ok(v)
            } else {
                Err(parse_err(media_type, "expected a JSON array"))
            }
        }
        mime::YAML_MEDIATYPE => serde_yaml::from_str::<Value>(text)
            .map_err(|e| parse_err(media_type, &e.to_string())),
        mime::TOML_MEDIATYPE => {
            let table: toml::Value =
                toml::from_str(text).map_err(|e| parse_err(media_type, &e.to_string()))?;
            serde_json::to_value(table).map_err(|e| parse_err(media_type, &e.to_string()))
        }
        mime::ENV_MEDIATYPE => Ok(parse_dotenv(text)),
        mime::TEXT_MEDIATYPE => Ok(Value::String(text.to_string())),
        other => Err(DatatapError::ParseFailure {
            media_type: other.to_string(),
            message: "datasources of this type are not yet supported".into(),
        }),
    }
}

/// Serialize a value to YAML (2-space indent) for downstream parsing.
pub fn to_yaml(value: &Value) -> Result<String> {
    serde_yaml::to_string(value).map_err(|e| DatatapError::ParseFailure {
        media_type: mime::YAML_MEDIATYPE.to_string(),
        message: e.to_string(),
    })
}

fn parse_json(media_type: &str, text: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|e| parse_err(media_type, &e.to_string()))
}

fn parse_err(media_type: &str, message: &str) -> DatatapError {
    DatatapError::ParseFailure {
        media_type: media_type.to_string(),
        message: message.to_string(),
    }
}

/// Parse `.env`-style content: `KEY=value` lines, `#` comments, optional
/// single or double quotes around the value.
fn parse_dotenv(content: &str) -> Value {
    let mut map = serde_json::Map::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        map.insert(
            key.trim().to_string(),
            Value::String(unquote(value.trim()).to_string()),
        );
    }

    Value::Object(map)
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')))
    {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_json_object() {
        let v = parse(mime::JSON_MEDIATYPE, br#"{"hello":"world"}"#).unwrap();
        assert_eq!(v, json!({"hello": "world"}));
    }

    #[test]
    fn parses_json_array() {
        let v = parse(mime::JSON_ARRAY_MEDIATYPE, br#"["a","b"]"#).unwrap();
        assert_eq!(v, json!(["a", "b"]));
    }

    #[test]
    fn json_array_type_rejects_object() {
        assert!(parse(mime::JSON_ARRAY_MEDIATYPE, br#"{"a":1}"#).is_err());
    }

    #[test]
    fn parses_yaml() {
        let v = parse(mime::YAML_MEDIATYPE, b"hello: world\nn: 42\n").unwrap();
        assert_eq!(v, json!({"hello": "world", "n": 42}));
    }

    #[test]
    fn parses_yaml_alias_media_type() {
        let v = parse("application/x-yaml", b"a: 1\n").unwrap();
        assert_eq!(v, json!({"a": 1}));
    }

    #[test]
    fn parses_toml() {
        let v = parse(mime::TOML_MEDIATYPE, b"[server]\nport = 8080\n").unwrap();
        assert_eq!(v, json!({"server": {"port": 8080}}));
    }

    #[test]
    fn parses_dotenv() {
        let v = parse(
            mime::ENV_MEDIATYPE,
            b"# comment\nFOO=bar\nQUOTED=\"a b\"\nEMPTY=\n",
        )
        .unwrap();
        assert_eq!(v, json!({"FOO": "bar", "QUOTED": "a b", "EMPTY": ""}));
    }

    #[test]
    fn text_passes_through_as_string() {
        let v = parse(mime::TEXT_MEDIATYPE, b"hello").unwrap();
        assert_eq!(v, json!("hello"));
    }

    #[test]
    fn unsupported_media_type_is_an_error() {
        let err = parse("application/octet-stream", b"x").unwrap_err();
        assert!(err.to_string().contains("octet-stream"));
    }

    #[test]
    fn invalid_json_reports_parse_failure() {
        assert!(parse(mime::JSON_MEDIATYPE, b"{nope").is_err());
    }

    #[test]
    fn to_yaml_round_trips_maps() {
        let v = json!({"z": {"a": "aaa"}, "f": false});
        let y = to_yaml(&v).unwrap();
        let back: Value = serde_yaml::from_str(&y).unwrap();
        assert_eq!(back, v);
    }
}
