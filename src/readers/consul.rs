//! Consul KV reader.
//!
//! `consul:///key/path` reads the raw value stored at the key. A trailing
//! slash lists the keys under the prefix, relative to it. The server address
//! comes from the URL authority, else `CONSUL_HTTP_ADDR`, else the local
//! agent; `CONSUL_HTTP_TOKEN` and `CONSUL_HTTP_SSL` behave as they do for
//! the Consul CLI.

use std::time::Duration;

use url::Url;

use crate::data::Data;
use crate::error::Result;
use crate::mime;
use crate::readers::{at_most_one_arg, Reader};
use crate::source::{Backend, Source};
use crate::urls;

pub struct ConsulReader;

impl Reader for ConsulReader {
    fn read(&self, _data: &Data, source: &Source, args: &[String]) -> Result<Vec<u8>> {
        let arg = at_most_one_arg(source.url().scheme(), args)?;
        let url = match arg {
            Some(subpath) => urls::resolve_url(source.url(), subpath)?,
            None => source.url().clone(),
        };

        let backend =
            source.backend_or_init(|| Ok(Backend::Consul(ConsulClient::connect(source.url())?)))?;
        let Backend::Consul(client) = backend else {
            return Err(anyhow::anyhow!("wrong backend kind for {url}").into());
        };

        let key = url.path().trim_start_matches('/');
        if key.ends_with('/') {
            source.set_media_type(mime::JSON_ARRAY_MEDIATYPE);
            client.list(key)
        } else {
            source.clear_media_type();
            client.read(key)
        }
    }
}

pub struct ConsulClient {
    http: reqwest::blocking::Client,
    addr: Url,
    token: Option<String>,
}

impl ConsulClient {
    pub fn connect(source_url: &Url) -> Result<Self> {
        let ssl_env = matches!(
            std::env::var("CONSUL_HTTP_SSL").unwrap_or_default().to_lowercase().as_str(),
            "true" | "1"
        );
        let addr = match source_url.host_str() {
            Some(host) => {
                let scheme = match source_url.scheme() {
                    "consul+https" => "https",
                    "consul+http" => "http",
                    _ if ssl_env => "https",
                    _ => "http",
                };
                let port = source_url.port().map(|p| format!(":{p}")).unwrap_or_default();
                Url::parse(&format!("{scheme}://{host}{port}")).map_err(anyhow::Error::from)?
            }
            None => {
                let addr = std::env::var("CONSUL_HTTP_ADDR")
                    .unwrap_or_else(|_| "http://localhost:8500".to_string());
                let addr = if addr.contains("://") {
                    addr
                } else if ssl_env {
                    format!("https://{addr}")
                } else {
                    format!("http://{addr}")
                };
                Url::parse(&addr).map_err(anyhow::Error::from)?
            }
        };

        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(anyhow::Error::from)?;

        Ok(Self {
            http,
            addr,
            token: std::env::var("CONSUL_HTTP_TOKEN").ok(),
        })
    }

    pub fn read(&self, key: &str) -> Result<Vec<u8>> {
        let mut url = self.addr.join(&format!("v1/kv/{key}")).map_err(anyhow::Error::from)?;
        url.set_query(Some("raw"));

        let response = self.request(url)?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(anyhow::anyhow!("key {key} not found in consul").into());
        }
        let body = response.bytes().map_err(anyhow::Error::from)?;
        if !status.is_success() {
            return Err(anyhow::anyhow!(
                "consul read of {key} failed ({status}): {}",
                String::from_utf8_lossy(&body)
            )
            .into());
        }
        Ok(body.to_vec())
    }

    /// Keys under the prefix, relative to it, as a JSON array.
    pub fn list(&self, prefix: &str) -> Result<Vec<u8>> {
        let mut url = self.addr.join(&format!("v1/kv/{prefix}")).map_err(anyhow::Error::from)?;
        url.set_query(Some("keys"));

        let response = self.request(url)?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("consul list of {prefix} failed ({status})").into());
        }

        let keys: Vec<String> = response.json().map_err(anyhow::Error::from)?;
        let relative: Vec<&str> = keys
            .iter()
            .map(|k| k.strip_prefix(prefix).unwrap_or(k))
            .filter(|k| !k.is_empty())
            .collect();
        Ok(serde_json::to_vec(&relative).map_err(anyhow::Error::from)?)
    }

    fn request(&self, url: Url) -> Result<reqwest::blocking::Response> {
        let mut request = self.http.get(url);
        if let Some(token) = &self.token {
            request = request.header("X-Consul-Token", token);
        }
        Ok(request.send().map_err(anyhow::Error::from)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client(server: &MockServer) -> ConsulClient {
        ConsulClient {
            http: reqwest::blocking::Client::new(),
            addr: Url::parse(&server.base_url()).unwrap(),
            token: None,
        }
    }

    #[test]
    fn read_fetches_raw_value() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v1/kv/app/config").query_param_exists("raw");
            then.status(200).body("foo: bar");
        });

        let bytes = client(&server).read("app/config").unwrap();
        assert_eq!(bytes, b"foo: bar");
    }

    #[test]
    fn list_strips_the_prefix() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v1/kv/app/").query_param_exists("keys");
            then.status(200)
                .json_body(serde_json::json!(["app/one", "app/two/three"]));
        });

        let bytes = client(&server).list("app/").unwrap();
        assert_eq!(bytes, br#"["one","two/three"]"#);
    }

    #[test]
    fn missing_key_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v1/kv/nope").query_param_exists("raw");
            then.status(404);
        });

        let err = client(&server).read("nope").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn token_is_sent_when_configured() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/v1/kv/secured")
                .header("X-Consul-Token", "abc123");
            then.status(200).body("v");
        });

        let mut c = client(&server);
        c.token = Some("abc123".into());
        c.read("secured").unwrap();
        mock.assert();
    }
}
