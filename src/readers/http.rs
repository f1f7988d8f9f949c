use std::time::Duration;

use crate::data::Data;
use crate::error::Result;
use crate::readers::{at_most_one_arg, Reader};
use crate::source::{Backend, Source};
use crate::urls;

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP(S) reader. The response `Content-Type` drives parsing unless the
/// datasource was declared with an explicit `type` query parameter.
pub struct HttpReader;

impl Reader for HttpReader {
    fn read(&self, _data: &Data, source: &Source, args: &[String]) -> Result<Vec<u8>> {
        let arg = at_most_one_arg(source.url().scheme(), args)?;
        let url = match arg {
            Some(subpath) => urls::resolve_url(source.url(), subpath)?,
            None => source.url().clone(),
        };

        let backend = source.backend_or_init(|| {
            let client = reqwest::blocking::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .map_err(anyhow::Error::from)?;
            Ok(Backend::Http(client))
        })?;
        let Backend::Http(client) = backend else {
            return Err(anyhow::anyhow!("wrong backend kind for {url}").into());
        };

        let mut request = client.get(url.clone());
        for (name, value) in source.headers() {
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
                "unexpected HTTP status {} on GET from {url}: {}",
                status.as_u16(),
                String::from_utf8_lossy(&body)
            )
            .into());
        }

        if let Some(ct) = content_type {
            source.set_media_type(&ct);
        }
        Ok(body.to_vec())
    }
}
