//! Object store readers for S3 (`s3://bucket/key`) and Google Cloud Storage
//! (`gs://bucket/key`).
//!
//! A key ending in `/` lists the objects under that prefix, one level deep,
//! as a JSON array with the prefix trimmed. S3 URLs accept `region`,
//! `endpoint`, `disableSSL` and `s3ForcePathStyle` query parameters;
//! `AWS_S3_ENDPOINT` overrides the endpoint for S3-compatible stores. GCS
//! uses `GOOGLE_OAUTH_ACCESS_TOKEN` when set, and anonymous access
//! otherwise.

use std::time::Duration;

use quick_xml::events::Event;
use url::Url;

use crate::aws::AwsClient;
use crate::data::Data;
use crate::error::Result;
use crate::mime;
use crate::readers::{at_most_one_arg, Reader};
use crate::source::{Backend, Source};
use crate::urls::path_join;

pub struct S3Reader;

impl Reader for S3Reader {
    fn read(&self, _data: &Data, source: &Source, args: &[String]) -> Result<Vec<u8>> {
        let url = source.url();
        let bucket = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("s3 URL {url} has no bucket"))?;
        let key = object_key(url.path(), at_most_one_arg("s3", args)?);

        let backend = source.backend_or_init(|| Ok(Backend::Aws(AwsClient::from_env()?)))?;
        let Backend::Aws(client) = backend else {
            return Err(anyhow::anyhow!("wrong backend kind for {url}").into());
        };

        let region = query_value(url, "region").unwrap_or_else(|| client.config.region.clone());
        let endpoint = std::env::var("AWS_S3_ENDPOINT")
            .ok()
            .or_else(|| query_value(url, "endpoint"));
        let insecure = query_value(url, "disableSSL").as_deref() == Some("true");

        let base = match endpoint {
            // custom endpoints are path-style: http(s)://host/bucket/key
            Some(endpoint) => {
                let scheme = if insecure { "http" } else { "https" };
                let endpoint = endpoint
                    .strip_prefix("https://")
                    .or_else(|| endpoint.strip_prefix("http://"))
                    .unwrap_or(&endpoint);
                format!("{scheme}://{endpoint}/{bucket}")
            }
            None => format!("https://{bucket}.s3.{region}.amazonaws.com"),
        };

        if key.ends_with('/') {
            let prefix = key.trim_start_matches('/');
            let mut list_url = Url::parse(&format!("{base}/")).map_err(anyhow::Error::from)?;
            list_url
                .query_pairs_mut()
                .append_pair("delimiter", "/")
                .append_pair("list-type", "2")
                .append_pair("prefix", prefix);

            let body = self.get(client, &list_url)?;
            let keys = parse_s3_listing(&body, prefix)?;
            source.set_media_type(mime::JSON_ARRAY_MEDIATYPE);
            return Ok(serde_json::to_vec(&keys).map_err(anyhow::Error::from)?);
        }

        let object_url =
            Url::parse(&format!("{base}{key}")).map_err(anyhow::Error::from)?;
        source.clear_media_type();
        let (body, content_type) = self.get_with_type(client, &object_url)?;
        if let Some(ct) = content_type {
            source.set_media_type(&mime::parse_media_type(&ct)?);
        }
        Ok(body)
    }
}

impl S3Reader {
    fn get(&self, client: &AwsClient, url: &Url) -> Result<Vec<u8>> {
        self.get_with_type(client, url).map(|(body, _)| body)
    }

    fn get_with_type(&self, client: &AwsClient, url: &Url) -> Result<(Vec<u8>, Option<String>)> {
        let mut request = client.http.get(url.clone());
        for (name, value) in client.sign("s3", "GET", url, b"")? {
            request = request.header(name, value);
        }
        let response = request.send().map_err(anyhow::Error::from)?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let body = response.bytes().map_err(anyhow::Error::from)?;
        if !status.is_success() {
            return Err(anyhow::anyhow!(
                "s3 GET {url} failed ({status}): {}",
                String::from_utf8_lossy(&body)
            )
            .into());
        }
        Ok((body.to_vec(), content_type))
    }
}

pub struct GcsReader;

const GCS_ENDPOINT: &str = "https://storage.googleapis.com";

impl Reader for GcsReader {
    fn read(&self, _data: &Data, source: &Source, args: &[String]) -> Result<Vec<u8>> {
        let url = source.url();
        let bucket = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("gs URL {url} has no bucket"))?
            .to_string();
        let key = object_key(url.path(), at_most_one_arg("gs", args)?);

        let backend = source.backend_or_init(|| {
            let http = reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .map_err(anyhow::Error::from)?;
            Ok(Backend::Gcs(GcsClient {
                http,
                endpoint: std::env::var("GOOGLE_STORAGE_ENDPOINT")
                    .unwrap_or_else(|_| GCS_ENDPOINT.to_string()),
                token: std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN").ok(),
            }))
        })?;
        let Backend::Gcs(client) = backend else {
            return Err(anyhow::anyhow!("wrong backend kind for {url}").into());
        };

        if key.ends_with('/') {
            let keys = client.list(&bucket, key.trim_start_matches('/'))?;
            source.set_media_type(mime::JSON_ARRAY_MEDIATYPE);
            return Ok(serde_json::to_vec(&keys).map_err(anyhow::Error::from)?);
        }

        source.clear_media_type();
        let (body, content_type) = client.get(&bucket, &key)?;
        if let Some(ct) = content_type {
            source.set_media_type(&mime::parse_media_type(&ct)?);
        }
        Ok(body)
    }
}

pub struct GcsClient {
    http: reqwest::blocking::Client,
    endpoint: String,
    token: Option<String>,
}

impl GcsClient {
    fn get(&self, bucket: &str, key: &str) -> Result<(Vec<u8>, Option<String>)> {
        let url = format!("{}/{bucket}{key}", self.endpoint);
        let response = self.request(&url)?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let body = response.bytes().map_err(anyhow::Error::from)?;
        if !status.is_success() {
            return Err(anyhow::anyhow!(
                "gs GET {url} failed ({status}): {}",
                String::from_utf8_lossy(&body)
            )
            .into());
        }
        Ok((body.to_vec(), content_type))
    }

    /// One level of the bucket's JSON listing API, prefix-trimmed.
    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let mut url =
            Url::parse(&format!("{}/storage/v1/b/{bucket}/o", self.endpoint))
                .map_err(anyhow::Error::from)?;
        url.query_pairs_mut()
            .append_pair("delimiter", "/")
            .append_pair("prefix", prefix);

        let response = self.request(url.as_str())?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("gs listing of {prefix} failed ({status})").into());
        }
        let payload: serde_json::Value = response.json().map_err(anyhow::Error::from)?;

        let mut keys = Vec::new();
        if let Some(items) = payload["items"].as_array() {
            for item in items {
                if let Some(name) = item["name"].as_str() {
                    keys.push(name.strip_prefix(prefix).unwrap_or(name).to_string());
                }
            }
        }
        if let Some(prefixes) = payload["prefixes"].as_array() {
            for p in prefixes {
                if let Some(name) = p.as_str() {
                    keys.push(name.strip_prefix(prefix).unwrap_or(name).to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn request(&self, url: &str) -> Result<reqwest::blocking::Response> {
        let mut request = self.http.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        Ok(request.send().map_err(anyhow::Error::from)?)
    }
}

fn object_key(path: &str, arg: Option<&str>) -> String {
    match arg {
        Some(extra) => {
            let joined = path_join(path, extra);
            // path_join collapses the trailing slash that marks a listing
            if extra.ends_with('/') && !joined.ends_with('/') {
                format!("{joined}/")
            } else {
                joined
            }
        }
        None => path.to_string(),
    }
}

fn query_value(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// Keys and common prefixes from a ListObjectsV2 response, trimmed of the
/// requested prefix.
fn parse_s3_listing(xml: &[u8], prefix: &str) -> Result<Vec<String>> {
    let text = std::str::from_utf8(xml)
        .map_err(|e| anyhow::anyhow!("listing response is not UTF-8: {e}"))?;
    let mut reader = quick_xml::Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut keys = Vec::new();
    let mut element: Option<String> = None;
    loop {
        match reader.read_event().map_err(|e| anyhow::anyhow!("bad listing XML: {e}"))? {
            Event::Start(start) => {
                element = Some(String::from_utf8_lossy(start.name().as_ref()).into_owned());
            }
            Event::Text(body) => {
                if matches!(element.as_deref(), Some("Key") | Some("Prefix")) {
                    let value = body
                        .unescape()
                        .map_err(|e| anyhow::anyhow!("bad listing XML: {e}"))?;
                    // the request echoes its own <Prefix> back
                    if value != prefix {
                        keys.push(value.strip_prefix(prefix).unwrap_or(&value).to_string());
                    }
                }
            }
            Event::End(_) => element = None,
            Event::Eof => break,
            _ => {}
        }
    }
    keys.sort();
    Ok(keys)
}
