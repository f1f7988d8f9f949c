//! AWS Systems Manager Parameter Store (`aws+smp://`) and Secrets Manager
//! (`aws+sm://`) readers, speaking the services' JSON APIs directly.
//!
//! `aws+smp:///app/prod/` lists parameter names under the path;
//! `aws+smp:///app/prod/db_password` yields the parameter record as JSON.
//! `aws+sm:///app/secret` yields the secret value, presented as JSON.

use base64::Engine;
use serde_json::{json, Value};
use url::Url;

use crate::aws::AwsClient;
use crate::data::Data;
use crate::error::{DatatapError, Result};
use crate::mime;
use crate::readers::Reader;
use crate::source::{Backend, Source};
use crate::urls::path_join;

/// Path from the URL plus an optional extra-path argument. More than one
/// extra argument is rejected.
pub fn parse_datasource_url_args(url: &Url, args: &[String]) -> Result<String> {
    if args.len() >= 2 {
        return Err(DatatapError::ArgumentError {
            scheme: url.scheme().to_string(),
            message: format!(
                "maximum two arguments to {} datasource: alias, extraPath (found {})",
                url.scheme(),
                args.len() + 1
            ),
        });
    }

    let mut path = url.path().to_string();
    if let Some(arg) = args.first() {
        let arg_path = arg.split(['?', '#']).next().unwrap_or("");
        if !arg_path.is_empty() {
            path = path_join(&path, arg_path);
            if arg_path.ends_with('/') {
                path.push('/');
            }
        }
    }
    Ok(path)
}

pub struct ParamStoreReader;

impl Reader for ParamStoreReader {
    fn read(&self, _data: &Data, source: &Source, args: &[String]) -> Result<Vec<u8>> {
        let path = parse_datasource_url_args(source.url(), args)?;
        let backend = source.backend_or_init(|| Ok(Backend::Aws(AwsClient::from_env()?)))?;
        let Backend::Aws(client) = backend else {
            return Err(anyhow::anyhow!("wrong backend kind for {}", source.url()).into());
        };

        if path.ends_with('/') {
            let response = call(
                client,
                "ssm",
                "AWS_SSM_ENDPOINT",
                "AmazonSSM.GetParametersByPath",
                &json!({ "Path": path, "WithDecryption": true }),
            )?;
            let names: Vec<&str> = response["Parameters"]
                .as_array()
                .map(|params| {
                    params
                        .iter()
                        .filter_map(|p| p["Name"].as_str())
                        .map(|name| name.strip_prefix(path.as_str()).unwrap_or(name))
                        .collect()
                })
                .unwrap_or_default();

            source.set_media_type(mime::JSON_ARRAY_MEDIATYPE);
            return Ok(serde_json::to_vec(&names).map_err(anyhow::Error::from)?);
        }

        let response = call(
            client,
            "ssm",
            "AWS_SSM_ENDPOINT",
            "AmazonSSM.GetParameter",
            &json!({ "Name": path, "WithDecryption": true }),
        )?;
        let parameter = &response["Parameter"];
        if parameter.is_null() {
            return Err(anyhow::anyhow!("no parameter found at {path}").into());
        }

        source.set_media_type(mime::JSON_MEDIATYPE);
        Ok(serde_json::to_vec(parameter).map_err(anyhow::Error::from)?)
    }
}

pub struct SecretsManagerReader;

impl Reader for SecretsManagerReader {
    fn read(&self, _data: &Data, source: &Source, args: &[String]) -> Result<Vec<u8>> {
        let path = parse_datasource_url_args(source.url(), args)?;
        let backend = source.backend_or_init(|| Ok(Backend::Aws(AwsClient::from_env()?)))?;
        let Backend::Aws(client) = backend else {
            return Err(anyhow::anyhow!("wrong backend kind for {}", source.url()).into());
        };

        if path.ends_with('/') {
            let response = call(
                client,
                "secretsmanager",
                "AWS_SECRETSMANAGER_ENDPOINT",
                "secretsmanager.ListSecrets",
                &json!({}),
            )?;
            let names: Vec<String> = response["SecretList"]
                .as_array()
                .map(|secrets| {
                    secrets
                        .iter()
                        .filter_map(|s| s["Name"].as_str())
                        .filter_map(|name| {
                            // secret names don't have to start with a slash
                            let full = if name.starts_with('/') {
                                name.to_string()
                            } else {
                                format!("/{name}")
                            };
                            full.strip_prefix(path.as_str()).map(str::to_string)
                        })
                        .filter(|rest| !rest.is_empty())
                        .collect()
                })
                .unwrap_or_default();

            source.set_media_type(mime::JSON_ARRAY_MEDIATYPE);
            return Ok(serde_json::to_vec(&names).map_err(anyhow::Error::from)?);
        }

        let response = call(
            client,
            "secretsmanager",
            "AWS_SECRETSMANAGER_ENDPOINT",
            "secretsmanager.GetSecretValue",
            &json!({ "SecretId": path }),
        )?;

        source.set_media_type(mime::JSON_MEDIATYPE);
        if let Some(text) = response["SecretString"].as_str() {
            return Ok(text.as_bytes().to_vec());
        }
        if let Some(blob) = response["SecretBinary"].as_str() {
            return Ok(base64::engine::general_purpose::STANDARD
                .decode(blob)
                .map_err(|e| anyhow::anyhow!("secret {path} has undecodable binary value: {e}"))?);
        }
        Err(anyhow::anyhow!("secret {path} has no value").into())
    }
}

/// One signed JSON-RPC call against an AWS service endpoint. The endpoint
/// env var override supports localstack-style stand-ins.
fn call(
    client: &AwsClient,
    service: &str,
    endpoint_var: &str,
    target: &str,
    body: &Value,
) -> Result<Value> {
    let endpoint = std::env::var(endpoint_var).unwrap_or_else(|_| {
        format!("https://{service}.{}.amazonaws.com/", client.config.region)
    });
    let url = Url::parse(&endpoint).map_err(anyhow::Error::from)?;
    let payload = serde_json::to_vec(body).map_err(anyhow::Error::from)?;

    let mut request = client
        .http
        .post(url.clone())
        .header("Content-Type", "application/x-amz-json-1.1")
        .header("X-Amz-Target", target)
        .body(payload.clone());
    for (name, value) in client.sign(service, "POST", &url, &payload)? {
        request = request.header(name, value);
    }

    let response = request.send().map_err(anyhow::Error::from)?;
    let status = response.status();
    let body = response.bytes().map_err(anyhow::Error::from)?;
    if !status.is_success() {
        return Err(anyhow::anyhow!(
            "{target} failed ({status}): {}",
            String::from_utf8_lossy(&body)
        )
        .into());
    }
    Ok(serde_json::from_slice(&body).map_err(anyhow::Error::from)?)
}
