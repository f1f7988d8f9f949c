//! AWS request signing and credential resolution.
//!
//! The `s3`, `aws+smp` and `aws+sm` readers all speak plain HTTPS to AWS
//! endpoints; this module supplies the Signature Version 4 signing step and
//! resolves credentials, region and timeout from the standard environment
//! variables. `AWS_ANON=true` skips signing entirely (public buckets).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::Result;

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_TIMEOUT_MS: u64 = 500;

/// Credentials, region and client options resolved from the environment.
#[derive(Debug, Clone)]
pub struct AwsConfig {
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub session_token: Option<String>,
    pub anonymous: bool,
    pub timeout: Duration,
}

impl AwsConfig {
    pub fn from_env() -> Self {
        let timeout_ms = std::env::var("AWS_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        Self {
            region: std::env::var("AWS_REGION")
                .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
                .unwrap_or_else(|_| DEFAULT_REGION.to_string()),
            access_key: std::env::var("AWS_ACCESS_KEY_ID").ok(),
            secret_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok(),
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
            anonymous: matches!(
                std::env::var("AWS_ANON").unwrap_or_default().to_lowercase().as_str(),
                "true" | "1" | "yes"
            ),
            timeout: Duration::from_millis(timeout_ms),
        }
    }
}

/// An HTTP client plus the signing state memoized on an AWS-backed Source.
pub struct AwsClient {
    pub http: reqwest::blocking::Client,
    pub config: AwsConfig,
}

impl AwsClient {
    pub fn from_env() -> Result<Self> {
        let config = AwsConfig::from_env();
        let http = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(anyhow::Error::from)?;
        Ok(Self { http, config })
    }

    /// SigV4 headers for a request, using the current time.
    pub fn sign(
        &self,
        service: &str,
        method: &str,
        url: &Url,
        payload: &[u8],
    ) -> Result<Vec<(String, String)>> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(anyhow::Error::from)?
            .as_secs();
        sign_at(&self.config, service, method, url, payload, now)
    }
}

/// Compute SigV4 headers for the request at the given epoch second.
///
/// Returns the headers to attach: `x-amz-date`, `authorization`, and for S3
/// `x-amz-content-sha256`, plus `x-amz-security-token` when a session token
/// is present. Anonymous mode yields no headers.
pub fn sign_at(
    config: &AwsConfig,
    service: &str,
    method: &str,
    url: &Url,
    payload: &[u8],
    epoch_secs: u64,
) -> Result<Vec<(String, String)>> {
    if config.anonymous {
        return Ok(vec![]);
    }
    let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) else {
        return Err(anyhow::anyhow!(
            "no AWS credentials: set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY, or AWS_ANON=true"
        )
        .into());
    };

    let amz_date = format_amz_date(epoch_secs);
    let datestamp = &amz_date[..8];
    let payload_hash = hex::encode(Sha256::digest(payload));

    let host = url
        .host_str()
        .map(|h| match url.port() {
            Some(p) => format!("{h}:{p}"),
            None => h.to_string(),
        })
        .ok_or_else(|| anyhow::anyhow!("URL {url} has no host"))?;

    // canonical headers, sorted by name
    let mut headers: Vec<(String, String)> = vec![
        ("host".into(), host),
        ("x-amz-date".into(), amz_date.clone()),
    ];
    if service == "s3" {
        headers.push(("x-amz-content-sha256".into(), payload_hash.clone()));
    }
    if let Some(token) = &config.session_token {
        headers.push(("x-amz-security-token".into(), token.clone()));
    }
    headers.sort();

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{k}:{v}\n"))
        .collect();
    let signed_headers: String = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "{method}\n{}\n{}\n{canonical_headers}\n{signed_headers}\n{payload_hash}",
        canonical_uri(url),
        canonical_query(url),
    );

    let scope = format!("{datestamp}/{}/{service}/aws4_request", config.region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let mut key = hmac(format!("AWS4{secret_key}").as_bytes(), datestamp.as_bytes());
    key = hmac(&key, config.region.as_bytes());
    key = hmac(&key, service.as_bytes());
    key = hmac(&key, b"aws4_request");
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes()));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={access_key}/{scope}, SignedHeaders={signed_headers}, Signature={signature}"
    );

    // host is set by the HTTP client itself
    let mut out: Vec<(String, String)> = headers.into_iter().filter(|(k, _)| k != "host").collect();
    out.push(("authorization".into(), authorization));
    Ok(out)
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn canonical_uri(url: &Url) -> String {
    let path = url.path();
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k), uri_encode(&v)))
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// AWS URI encoding: unreserved characters pass through, everything else is
/// percent-encoded with uppercase hex.
pub fn uri_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// `YYYYMMDD'T'HHMMSS'Z'` for an epoch second.
fn format_amz_date(epoch_secs: u64) -> String {
    let days = epoch_secs / 86_400;
    let secs = epoch_secs % 86_400;
    let (y, m, d) = civil_from_days(days as i64);
    format!(
        "{y:04}{m:02}{d:02}T{:02}{:02}{:02}Z",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    )
}

// days-since-epoch to (year, month, day), Gregorian
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2015-08-30T12:36:00Z, the timestamp used by the AWS SigV4 test suite
    const TEST_EPOCH: u64 = 1_440_938_160;

    fn test_config() -> AwsConfig {
        AwsConfig {
            region: "us-east-1".into(),
            access_key: Some("AKIDEXAMPLE".into()),
            secret_key: Some("wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".into()),
            session_token: None,
            anonymous: false,
            timeout: Duration::from_millis(500),
        }
    }

    #[test]
    fn formats_amz_date() {
        assert_eq!(format_amz_date(TEST_EPOCH), "20150830T123600Z");
        assert_eq!(format_amz_date(0), "19700101T000000Z");
    }

    #[test]
    fn get_vanilla_matches_aws_test_suite() {
        // the "get-vanilla" case from AWS's published SigV4 test suite
        let url = Url::parse("https://example.amazonaws.com/").unwrap();
        let headers = sign_at(&test_config(), "service", "GET", &url, b"", TEST_EPOCH).unwrap();

        let auth = &headers.iter().find(|(k, _)| k == "authorization").unwrap().1;
        assert!(
            auth.ends_with("5fa00fa31553b73ebf1942676e86291e8372ff2a2260956d9b8aae1d763fbf31"),
            "unexpected signature in {auth}"
        );
        assert!(auth.contains("Credential=AKIDEXAMPLE/20150830/us-east-1/service/aws4_request"));
        assert!(auth.contains("SignedHeaders=host;x-amz-date"));
    }

    #[test]
    fn anonymous_mode_produces_no_headers() {
        let mut config = test_config();
        config.anonymous = true;

        let url = Url::parse("https://bucket.s3.amazonaws.com/key").unwrap();
        let headers = sign_at(&config, "s3", "GET", &url, b"", TEST_EPOCH).unwrap();
        assert!(headers.is_empty());
    }

    #[test]
    fn missing_credentials_is_an_error() {
        let mut config = test_config();
        config.access_key = None;

        let url = Url::parse("https://example.amazonaws.com/").unwrap();
        let err = sign_at(&config, "s3", "GET", &url, b"", TEST_EPOCH).unwrap_err();
        assert!(err.to_string().contains("AWS_ACCESS_KEY_ID"));
    }

    #[test]
    fn s3_requests_carry_content_sha256() {
        let url = Url::parse("https://bucket.s3.amazonaws.com/key").unwrap();
        let headers = sign_at(&test_config(), "s3", "GET", &url, b"", TEST_EPOCH).unwrap();
        assert!(headers.iter().any(|(k, _)| k == "x-amz-content-sha256"));
    }

    #[test]
    fn uri_encode_escapes_reserved_characters() {
        assert_eq!(uri_encode("a b/c"), "a%20b%2Fc");
        assert_eq!(uri_encode("safe-chars_1.2~"), "safe-chars_1.2~");
    }

    #[test]
    fn config_defaults() {
        // fresh process envs vary; just exercise the parser defaults
        let config = AwsConfig::from_env();
        assert!(!config.region.is_empty());
        assert!(config.timeout >= Duration::from_millis(1));
    }
}
