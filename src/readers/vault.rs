//! HashiCorp Vault reader.
//!
//! `vault:///secret/app` reads the secret at that path and yields the inner
//! `data` object as JSON. A trailing slash lists keys. Query parameters turn
//! the read into a write (for dynamic secret backends that take arguments).
//!
//! Authentication tries, in order: `VAULT_TOKEN`, the CLI's `~/.vault-token`
//! file, AppRole (`VAULT_ROLE_ID`/`VAULT_SECRET_ID`), and userpass
//! (`VAULT_AUTH_USERNAME`/`VAULT_AUTH_PASSWORD`). Tokens obtained by logging
//! in are revoked on cleanup.

use std::time::Duration;

use serde_json::Value;
use url::Url;

use crate::data::Data;
use crate::error::Result;
use crate::mime;
use crate::readers::{at_most_one_arg, Reader};
use crate::source::{Backend, Source};
use crate::urls;

pub struct VaultReader;

impl Reader for VaultReader {
    fn read(&self, _data: &Data, source: &Source, args: &[String]) -> Result<Vec<u8>> {
        let arg = at_most_one_arg(source.url().scheme(), args)?;
        let url = match arg {
            Some(subpath) => urls::resolve_url(source.url(), subpath)?,
            None => source.url().clone(),
        };

        let backend =
            source.backend_or_init(|| Ok(Backend::Vault(VaultClient::connect(source.url())?)))?;
        let Backend::Vault(client) = backend else {
            return Err(anyhow::anyhow!("wrong backend kind for {url}").into());
        };

        let path = url.path().trim_start_matches('/');
        let params: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "type")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        if path.ends_with('/') {
            source.set_media_type(mime::JSON_ARRAY_MEDIATYPE);
            client.list(path)
        } else {
            source.set_media_type(mime::JSON_MEDIATYPE);
            client.read(path, &params)
        }
    }
}

pub struct VaultClient {
    http: reqwest::blocking::Client,
    addr: Url,
    token: String,
    owns_token: bool,
}

impl VaultClient {
    /// Connect and authenticate. The server address comes from the
    /// datasource URL's authority when present, otherwise `VAULT_ADDR`.
    pub fn connect(source_url: &Url) -> Result<Self> {
        let addr = match source_url.host_str() {
            Some(host) => {
                let scheme = match source_url.scheme() {
                    "vault+http" => "http",
                    _ => "https",
                };
                let port = source_url.port().map(|p| format!(":{p}")).unwrap_or_default();
                Url::parse(&format!("{scheme}://{host}{port}"))
                    .map_err(anyhow::Error::from)?
            }
            None => {
                let addr = std::env::var("VAULT_ADDR")
                    .map_err(|_| anyhow::anyhow!("no vault address: URL has no authority and VAULT_ADDR is unset"))?;
                Url::parse(&addr).map_err(anyhow::Error::from)?
            }
        };

        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(anyhow::Error::from)?;

        let (token, owns_token) = Self::login(&http, &addr)?;
        Ok(Self { http, addr, token, owns_token })
    }

    fn login(http: &reqwest::blocking::Client, addr: &Url) -> Result<(String, bool)> {
        if let Ok(token) = std::env::var("VAULT_TOKEN") {
            return Ok((token, false));
        }
        if let Some(home) = dirs::home_dir() {
            if let Ok(token) = std::fs::read_to_string(home.join(".vault-token")) {
                let token = token.trim().to_string();
                if !token.is_empty() {
                    return Ok((token, false));
                }
            }
        }
        if let (Ok(role_id), Ok(secret_id)) =
            (std::env::var("VAULT_ROLE_ID"), std::env::var("VAULT_SECRET_ID"))
        {
            let mount = std::env::var("VAULT_AUTH_APPROLE_MOUNT")
                .unwrap_or_else(|_| "approle".to_string());
            let body = serde_json::json!({ "role_id": role_id, "secret_id": secret_id });
            let token = Self::login_request(http, addr, &format!("auth/{mount}/login"), &body)?;
            return Ok((token, true));
        }
        if let (Ok(username), Ok(password)) = (
            std::env::var("VAULT_AUTH_USERNAME"),
            std::env::var("VAULT_AUTH_PASSWORD"),
        ) {
            let mount = std::env::var("VAULT_AUTH_USERPASS_MOUNT")
                .unwrap_or_else(|_| "userpass".to_string());
            let body = serde_json::json!({ "password": password });
            let token = Self::login_request(
                http,
                addr,
                &format!("auth/{mount}/login/{username}"),
                &body,
            )?;
            return Ok((token, true));
        }
        Err(anyhow::anyhow!(
            "no vault auth configured: set VAULT_TOKEN, VAULT_ROLE_ID/VAULT_SECRET_ID, or VAULT_AUTH_USERNAME/VAULT_AUTH_PASSWORD"
        )
        .into())
    }

    fn login_request(
        http: &reqwest::blocking::Client,
        addr: &Url,
        path: &str,
        body: &Value,
    ) -> Result<String> {
        let url = addr.join(&format!("v1/{path}")).map_err(anyhow::Error::from)?;
        let response = http.post(url).json(body).send().map_err(anyhow::Error::from)?;
        let status = response.status();
        let payload: Value = response.json().map_err(anyhow::Error::from)?;
        if !status.is_success() {
            return Err(anyhow::anyhow!("vault login failed ({status}): {payload}").into());
        }
        payload["auth"]["client_token"]
            .as_str()
            .map(|t| t.to_string())
            .ok_or_else(|| anyhow::anyhow!("vault login response had no client token").into())
    }

    /// Read a secret, or write-then-read when `params` is non-empty.
    pub fn read(&self, path: &str, params: &[(String, String)]) -> Result<Vec<u8>> {
        let url = self.api_url(path, &[])?;
        let request = if params.is_empty() {
            self.http.get(url)
        } else {
            let body: serde_json::Map<String, Value> = params
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            self.http.post(url).json(&Value::Object(body))
        };

        let payload = self.dispatch(request, path)?;
        let data = &payload["data"];
        if data.is_null() {
            return Err(anyhow::anyhow!("no value found for path /{path}").into());
        }
        Ok(serde_json::to_vec(data).map_err(anyhow::Error::from)?)
    }

    /// List keys under a path as a JSON array.
    pub fn list(&self, path: &str) -> Result<Vec<u8>> {
        let url = self.api_url(path.trim_end_matches('/'), &[("list", "true")])?;
        let payload = self.dispatch(self.http.get(url), path)?;
        let keys = &payload["data"]["keys"];
        if keys.is_null() {
            return Err(anyhow::anyhow!("no value found for path /{path}").into());
        }
        Ok(serde_json::to_vec(keys).map_err(anyhow::Error::from)?)
    }

    fn api_url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self.addr.join(&format!("v1/{path}")).map_err(anyhow::Error::from)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    fn dispatch(&self, request: reqwest::blocking::RequestBuilder, path: &str) -> Result<Value> {
        let response = request
            .header("X-Vault-Token", &self.token)
            .send()
            .map_err(anyhow::Error::from)?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(anyhow::anyhow!("no value found for path /{path}").into());
        }
        let payload: Value = response.json().map_err(anyhow::Error::from)?;
        if !status.is_success() {
            return Err(anyhow::anyhow!("vault read of /{path} failed ({status}): {payload}").into());
        }
        Ok(payload)
    }

    /// Revoke the token if this client created it by logging in.
    pub fn logout(&self) -> Result<()> {
        if !self.owns_token {
            return Ok(());
        }
        let url = self.addr.join("v1/auth/token/revoke-self").map_err(anyhow::Error::from)?;
        self.http
            .post(url)
            .header("X-Vault-Token", &self.token)
            .send()
            .map_err(anyhow::Error::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client(server: &MockServer) -> VaultClient {
        VaultClient {
            http: reqwest::blocking::Client::new(),
            addr: Url::parse(&server.base_url()).unwrap(),
            token: "test-token".into(),
            owns_token: false,
        }
    }

    #[test]
    fn read_unwraps_the_data_envelope() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/v1/secret/app")
                .header("X-Vault-Token", "test-token");
            then.status(200)
                .json_body(serde_json::json!({"data": {"password": "hunter2"}}));
        });

        let bytes = client(&server).read("secret/app", &[]).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["password"], "hunter2");
    }

    #[test]
    fn params_turn_the_read_into_a_write() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/ssh/creds/test")
                .json_body(serde_json::json!({"ip": "10.1.2.3"}));
            then.status(200).json_body(serde_json::json!({"data": {"key": "k"}}));
        });

        let params = vec![("ip".to_string(), "10.1.2.3".to_string())];
        client(&server).read("ssh/creds/test", &params).unwrap();
        mock.assert();
    }

    #[test]
    fn list_returns_keys() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v1/secret").query_param("list", "true");
            then.status(200)
                .json_body(serde_json::json!({"data": {"keys": ["app", "db"]}}));
        });

        let bytes = client(&server).list("secret/").unwrap();
        assert_eq!(bytes, br#"["app","db"]"#);
    }

    #[test]
    fn missing_path_reports_no_value() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v1/secret/nope");
            then.status(404).json_body(serde_json::json!({"errors": []}));
        });

        let err = client(&server).read("secret/nope", &[]).unwrap_err();
        assert!(err.to_string().contains("no value found for path /secret/nope"));
    }

    #[test]
    fn logout_is_a_noop_for_external_tokens() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v1/auth/token/revoke-self");
            then.status(204);
        });

        client(&server).logout().unwrap();
        mock.assert_hits(0);

        let mut owning = client(&server);
        owning.owns_token = true;
        owning.logout().unwrap();
        mock.assert_hits(1);
    }
}
