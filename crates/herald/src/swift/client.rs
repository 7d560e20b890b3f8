//! Swift REST client.
//!
//! Targets `{storageUrl}/{container}[/{object}]` with an `X-Auth-Token`
//! from the Keystone store. Buffered requests are retried with backoff and
//! transparently re-authenticated on 401; streaming uploads get a single
//! attempt because their body cannot be replayed.

use crate::config::SwiftConfig;
use crate::forward::{convert_upstream_response, retry_with_exponential_backoff};
use crate::header;
use crate::http::{Body, Response};
use crate::keystone::KeystoneToken;
use crate::registry::{Bucket, BucketRegistry};
use crate::resolver::{RequestContext, attempt_budget};
use crate::S3Result;

use bytes::Bytes;
use http::HeaderMap;
use http::HeaderValue;
use http::Method;
use http::StatusCode;
use tracing::debug;

pub struct SwiftClient<'a> {
    ctx: &'a RequestContext,
    pub cfg: &'a SwiftConfig,
    bucket: &'a Bucket,
}

/// Percent-encodes an object key, preserving `/` so pseudo-directories keep
/// their structure on the wire.
#[must_use]
pub fn encode_object_key(key: &str) -> String {
    key.split('/').map(|seg| urlencoding::encode(seg).into_owned()).collect::<Vec<_>>().join("/")
}

impl<'a> SwiftClient<'a> {
    #[must_use]
    pub fn new(ctx: &'a RequestContext, cfg: &'a SwiftConfig, bucket: &'a Bucket) -> Self {
        Self { ctx, cfg, bucket }
    }

    #[must_use]
    pub fn container(&self) -> &str {
        &self.cfg.container
    }

    #[must_use]
    pub fn region(&self) -> &str {
        &self.cfg.region
    }

    #[must_use]
    pub fn bucket_name(&self) -> &str {
        &self.bucket.bucket_name
    }

    #[must_use]
    pub fn registry(&self) -> &BucketRegistry {
        &self.ctx.registry
    }

    /// The shared outbound HTTP client, for callers that frame their own
    /// requests.
    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        &self.ctx.client
    }

    /// Relative path for the container itself.
    #[must_use]
    pub fn container_path(&self) -> String {
        urlencoding::encode(&self.cfg.container).into_owned()
    }

    /// Relative path for an object inside the container.
    #[must_use]
    pub fn object_path(&self, key: &str) -> String {
        format!("{}/{}", self.container_path(), encode_object_key(key))
    }

    pub async fn token(&self) -> S3Result<KeystoneToken> {
        self.ctx.keystone.get_token(self.cfg).await
    }

    async fn issue(
        &self,
        token: &KeystoneToken,
        method: &Method,
        path: &str,
        query: &[(String, String)],
        mut headers: HeaderMap,
        body: Body,
    ) -> S3Result<reqwest::Response> {
        let url = format!("{}/{}", token.storage_url, path);
        if let Ok(value) = HeaderValue::from_str(&token.token) {
            headers.insert(header::X_AUTH_TOKEN, value);
        }

        debug!(%method, %url, "swift request");
        let mut builder = self.ctx.client.request(method.clone(), &url).headers(headers);
        if !query.is_empty() {
            builder = builder.query(query);
        }
        builder
            .body(body.into_reqwest())
            .send()
            .await
            .map_err(|e| s3_error!(e, InternalError, "swift request failed").retryable())
    }

    async fn send_buffered_once(
        &self,
        method: &Method,
        path: &str,
        query: &[(String, String)],
        headers: HeaderMap,
        bytes: Bytes,
    ) -> S3Result<Response> {
        let token = self.token().await?;
        let resp = self
            .issue(&token, method, path, query, headers.clone(), Body::from(bytes.clone()))
            .await?;

        let resp = if resp.status() == StatusCode::UNAUTHORIZED {
            // stale token; re-authenticate once and replay
            let token = self.ctx.keystone.refresh_token(self.cfg, &token.token).await?;
            self.issue(&token, method, path, query, headers, Body::from(bytes)).await?
        } else {
            resp
        };

        convert_upstream_response(resp)
    }

    /// Sends a request whose body (possibly empty) is buffered. Retried with
    /// exponential backoff within the bucket's attempt budget.
    pub async fn send(
        &self,
        method: &Method,
        path: &str,
        query: &[(String, String)],
        headers: &HeaderMap,
        bytes: Bytes,
    ) -> S3Result<Response> {
        let attempts = attempt_budget(self.bucket);
        retry_with_exponential_backoff(attempts, || {
            self.send_buffered_once(method, path, query, headers.clone(), bytes.clone())
        })
        .await
    }

    /// Sends a streaming request. Single attempt: the body cannot be
    /// replayed, and a 401 surfaces as `AccessDenied` instead of a retry.
    pub async fn send_streaming(
        &self,
        method: &Method,
        path: &str,
        query: &[(String, String)],
        headers: HeaderMap,
        body: Body,
    ) -> S3Result<Response> {
        let token = self.token().await?;
        let resp = self.issue(&token, method, path, query, headers, body).await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(s3_error!(AccessDenied, "swift rejected the auth token mid-stream"));
        }
        convert_upstream_response(resp)
    }

    /// Shorthand for a bodiless request.
    pub async fn request(&self, method: &Method, path: &str, query: &[(String, String)]) -> S3Result<Response> {
        self.send(method, path, query, &HeaderMap::new(), Bytes::new()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_keys_are_encoded_per_segment() {
        assert_eq!(encode_object_key("a/b c/d#e"), "a/b%20c/d%23e");
        assert_eq!(encode_object_key("plain.txt"), "plain.txt");
        assert_eq!(encode_object_key("nested/dir/file"), "nested/dir/file");
    }
}
