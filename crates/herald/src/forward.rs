//! Outbound HTTP forwarding.
//!
//! [`retry_with_exponential_backoff`] wraps any upstream call; retries fire
//! only for errors marked retryable (network failures, upstream 5xx).
//! [`forward_s3_request`] rewrites an inbound request onto a native S3
//! backend, re-signing with the backend's own credentials; the client's
//! signature never leaves the gateway.

use crate::config::S3Config;
use crate::header;
use crate::http::{Body, Response};
use crate::request::RequestMeta;
use crate::sig_v4::{AmzDate, SigningKey, sign_request_v4};
use crate::{S3Error, S3Result};

use std::future::Future;
use std::time::Duration;

use http::HeaderMap;
use http::Method;
use http::StatusCode;
use http::header::HeaderName;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds the shared outbound client. Connection establishment is bounded;
/// the overall transfer is not, so large object streams are never cut off
/// mid-body.
#[must_use]
pub fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_default()
}

/// Deterministic sub-125ms jitter derived from the monotonic clock, so
/// concurrent retries don't stampede in lockstep.
fn jitter() -> Duration {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.subsec_nanos());
    Duration::from_millis(u64::from(nanos % 125))
}

#[must_use]
pub fn backoff_delay(attempt: u32) -> Duration {
    BACKOFF_BASE * 2u32.saturating_pow(attempt.saturating_sub(1)) + jitter()
}

/// Invokes `f` up to `max_attempts` times, sleeping `base * 2^(n-1) + jitter`
/// between attempts. Only retryable errors are retried; the last error is
/// returned when the budget runs out.
pub async fn retry_with_exponential_backoff<T, F, Fut>(max_attempts: u32, mut f: F) -> S3Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = S3Result<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = backoff_delay(attempt);
                warn!(attempt, ?delay, %err, "upstream attempt failed, backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Headers that never cross the gateway boundary: authentication material,
/// routing headers and hop-by-hop headers are regenerated per leg.
fn is_hop_header(name: &str) -> bool {
    matches!(
        name,
        header::AUTHORIZATION
            | header::HOST
            | header::CONNECTION
            | "keep-alive"
            | "transfer-encoding"
            | "upgrade"
            | "proxy-authorization"
            | "te"
            | "trailer"
    ) || name == header::X_AMZ_DATE
        || name == header::X_AMZ_CONTENT_SHA256
        || name == header::X_FORWARDED_FOR
        || name == header::X_FORWARDED_HOST
        || name.starts_with("x-amz-signature")
}

/// Copies forwardable headers from the inbound request.
#[must_use]
pub fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_header(name.as_str()) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Rewrites the target URL onto the backend endpoint, preserving the
/// path-vs-virtual-hosted style the backend expects.
pub fn build_target_url(cfg: &S3Config, object_key: Option<&str>, meta: &RequestMeta) -> S3Result<Url> {
    let mut url = Url::parse(&cfg.endpoint).map_err(|e| s3_error!(e, InternalError, "invalid backend endpoint: {}", cfg.endpoint))?;

    if cfg.force_path_style {
        let mut path = format!("/{}", cfg.bucket);
        if let Some(key) = object_key {
            path.push('/');
            path.push_str(key);
        }
        url.set_path(&path);
    } else {
        let host = url
            .host_str()
            .ok_or_else(|| s3_error!(InternalError, "backend endpoint has no host: {}", cfg.endpoint))?;
        let vh = format!("{}.{host}", cfg.bucket);
        url.set_host(Some(&vh))
            .map_err(|e| s3_error!(e, InternalError, "invalid virtual-hosted host"))?;
        url.set_path(&object_key.map_or_else(|| "/".to_owned(), |key| format!("/{key}")));
    }

    let query: Vec<(String, String)> = meta
        .query
        .as_ref()
        .iter()
        .filter(|(k, _)| !k.starts_with("X-Amz-"))
        .cloned()
        .collect();
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in &query {
            pairs.append_pair(k, v);
        }
    }
    Ok(url)
}

fn convert_send_error(err: &reqwest::Error) -> S3Error {
    let mut e = s3_error!(InternalError, "upstream request failed: {}", err);
    if err.is_timeout() {
        e = s3_error!(RequestTimeout, "upstream request timed out");
    }
    e.retryable()
}

/// Converts an upstream response, flagging 5xx as a retryable error so the
/// retry wrapper and the failover sequencer can react.
pub fn convert_upstream_response(resp: reqwest::Response) -> S3Result<Response> {
    let status = resp.status();
    if status.is_server_error() {
        return Err(s3_error!(InternalError, "upstream returned {}", status).retryable());
    }

    let mut headers = HeaderMap::with_capacity(resp.headers().len());
    for (name, value) in resp.headers() {
        if !matches!(name.as_str(), "connection" | "transfer-encoding" | "keep-alive") {
            headers.append::<HeaderName>(name.clone(), value.clone());
        }
    }

    Ok(Response {
        status,
        headers,
        body: Body::from(resp),
    })
}

/// Sends one signed request to the backend. Streaming bodies cannot be
/// replayed, so callers pass `attempts = 1` when the body streams.
async fn send_once(
    client: &reqwest::Client,
    method: &Method,
    url: &Url,
    headers: HeaderMap,
    body: Body,
    key: &SigningKey<'_>,
) -> S3Result<Response> {
    let mut headers = headers;
    sign_request_v4(method, url, &mut headers, key, &AmzDate::now());

    debug!(%method, %url, "forwarding to s3 backend");
    let resp = client
        .request(method.clone(), url.clone())
        .headers(headers)
        .body(body.into_reqwest())
        .send()
        .await
        .map_err(|e| convert_send_error(&e))?;

    convert_upstream_response(resp)
}

/// Forwards an inbound S3 request to a native S3 backend with retries.
///
/// The request is re-signed per attempt. When the body is buffered it is
/// replayed across attempts; a streaming body forces a single attempt.
pub async fn forward_s3_request(
    client: &reqwest::Client,
    cfg: &S3Config,
    meta: &RequestMeta,
    inbound_headers: &HeaderMap,
    body: Body,
    max_attempts: u32,
) -> S3Result<Response> {
    let url = build_target_url(cfg, meta.object_key.as_deref(), meta)?;
    let headers = forwardable_headers(inbound_headers);
    let key = SigningKey {
        access_key_id: &cfg.credentials.access_key_id,
        secret_access_key: &cfg.credentials.secret_access_key,
        region: &cfg.region,
        service: "s3",
    };

    match body.bytes() {
        Some(bytes) => {
            retry_with_exponential_backoff(max_attempts, || {
                send_once(client, &meta.method, &url, headers.clone(), Body::from(bytes.clone()), &key)
            })
            .await
        }
        None => send_once(client, &meta.method, &url, headers, body, &key).await,
    }
}

/// Issues a plain signed GET against the backend (mirror workers use this to
/// pull the primary copy of an object).
pub async fn signed_get(client: &reqwest::Client, cfg: &S3Config, object_key: &str) -> S3Result<Response> {
    let mut url = Url::parse(&cfg.endpoint)
        .map_err(|e| s3_error!(e, InternalError, "invalid backend endpoint: {}", cfg.endpoint))?;
    if cfg.force_path_style {
        url.set_path(&format!("/{}/{object_key}", cfg.bucket));
    } else {
        let host = url
            .host_str()
            .ok_or_else(|| s3_error!(InternalError, "backend endpoint has no host: {}", cfg.endpoint))?;
        let vh = format!("{}.{host}", cfg.bucket);
        url.set_host(Some(&vh))
            .map_err(|e| s3_error!(e, InternalError, "invalid virtual-hosted host"))?;
        url.set_path(&format!("/{object_key}"));
    }

    let key = SigningKey {
        access_key_id: &cfg.credentials.access_key_id,
        secret_access_key: &cfg.credentials.secret_access_key,
        region: &cfg.region,
        service: "s3",
    };
    let resp = send_once(client, &Method::GET, &url, HeaderMap::new(), Body::empty(), &key).await?;
    if resp.status != StatusCode::OK && resp.status != StatusCode::PARTIAL_CONTENT {
        return Err(s3_error!(InternalError, "primary GET returned {}", resp.status));
    }
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::S3Credentials;
    use crate::http::OrderedQs;
    use crate::request::UrlFormat;

    fn s3_config(force_path_style: bool) -> S3Config {
        S3Config {
            endpoint: "http://127.0.0.1:9000".to_owned(),
            region: "us-east-1".to_owned(),
            credentials: S3Credentials {
                access_key_id: "k".to_owned(),
                secret_access_key: "s".to_owned(),
            },
            force_path_style,
            bucket: "upstream".to_owned(),
        }
    }

    fn meta(key: Option<&str>, query: &str) -> RequestMeta {
        RequestMeta {
            bucket: Some("gw".to_owned()),
            object_key: key.map(str::to_owned),
            url_format: UrlFormat::Path,
            method: Method::GET,
            query: OrderedQs::parse(query),
            decoded_path: String::new(),
            host: "localhost".to_owned(),
        }
    }

    #[test]
    fn path_style_url() {
        let url = build_target_url(&s3_config(true), Some("a/b.txt"), &meta(Some("a/b.txt"), "")).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/upstream/a/b.txt");
    }

    #[test]
    fn virtual_hosted_url() {
        let cfg = S3Config {
            endpoint: "https://s3.example.com".to_owned(),
            ..s3_config(false)
        };
        let url = build_target_url(&cfg, Some("k"), &meta(Some("k"), "")).unwrap();
        assert_eq!(url.as_str(), "https://upstream.s3.example.com/k");
    }

    #[test]
    fn query_is_copied_without_presign_params() {
        let url = build_target_url(
            &s3_config(true),
            None,
            &meta(None, "list-type=2&prefix=a&X-Amz-Signature=zzz"),
        )
        .unwrap();
        assert!(url.query().unwrap().contains("list-type=2"));
        assert!(url.query().unwrap().contains("prefix=a"));
        assert!(!url.query().unwrap().contains("X-Amz-Signature"));
    }

    #[test]
    fn hop_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::AUTHORIZATION, "AWS4 sig".parse().unwrap());
        headers.insert(http::header::HOST, "gw".parse().unwrap());
        headers.insert(http::header::CONTENT_TYPE, "text/plain".parse().unwrap());
        headers.insert("x-amz-meta-tag", "v".parse().unwrap());
        let out = forwardable_headers(&headers);
        assert!(out.get(http::header::AUTHORIZATION).is_none());
        assert!(out.get(http::header::HOST).is_none());
        assert_eq!(out.get(http::header::CONTENT_TYPE).unwrap(), "text/plain");
        assert_eq!(out.get("x-amz-meta-tag").unwrap(), "v");
    }

    #[tokio::test]
    async fn retry_stops_on_non_retryable() {
        let mut calls = 0;
        let result: S3Result<()> = retry_with_exponential_backoff(3, || {
            calls += 1;
            async move { Err(s3_error!(NoSuchKey)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_exhausts_budget() {
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let c = calls.clone();
        let result: S3Result<()> = retry_with_exponential_backoff(3, move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Err(s3_error!(InternalError).retryable())
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
