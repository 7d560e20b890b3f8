//! Operation classification and dispatch.
//!
//! The S3 and Swift resolvers present the same operation surface; this
//! module owns the `(method, objectKey?, query)` → operation table, the
//! shared dispatch entry point, and the primary-then-replica failover
//! sequencer. Replica fan-out is bounded: a replica is dispatched under an
//! `is_replica` bucket record that carries no replicas of its own.

use crate::config::BackendConfig;
use crate::http::{Body, Response};
use crate::keystone::KeystoneStore;
use crate::mirror::MirrorQueue;
use crate::registry::{Bucket, BucketRegistry};
use crate::request::RequestMeta;
use crate::{S3Result, s3, swift};

use std::sync::Arc;

use http::HeaderMap;
use http::Method;
use http::Uri;
use tracing::warn;

/// Process-wide collaborators, threaded through every handler so tests can
/// substitute doubles.
pub struct RequestContext {
    pub registry: Arc<BucketRegistry>,
    pub keystone: Arc<KeystoneStore>,
    pub mirror: Arc<MirrorQueue>,
    pub client: reqwest::Client,
}

/// An inbound request after parsing, as seen by the resolvers.
#[derive(Debug)]
pub struct GatewayRequest {
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Body,
    pub meta: RequestMeta,
}

impl GatewayRequest {
    #[must_use]
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Snapshot for replaying a bodiless request against a replica.
    #[must_use]
    pub fn replay_parts(&self) -> (Uri, HeaderMap, RequestMeta) {
        (self.uri.clone(), self.headers.clone(), self.meta.clone())
    }
}

/// The resolved S3 operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S3Op {
    ListBuckets,
    CreateBucket,
    DeleteBucket,
    HeadBucket,
    /// `?acl`, `?versioning` and the other bucket pseudo-endpoints.
    QueryParamed,
    ListObjects,
    ListObjectsV2,
    GetObject,
    PutObject,
    DeleteObject,
    HeadObject,
    CopyObject,
    CreateMultipartUpload,
    UploadPart,
    CompleteMultipartUpload,
    AbortMultipartUpload,
    ListMultipartUploads,
    ListParts,
    DeleteObjects,
}

impl S3Op {
    #[must_use]
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            Self::CreateBucket
                | Self::DeleteBucket
                | Self::PutObject
                | Self::DeleteObject
                | Self::CopyObject
                | Self::CreateMultipartUpload
                | Self::UploadPart
                | Self::CompleteMultipartUpload
                | Self::AbortMultipartUpload
                | Self::DeleteObjects
        )
    }
}

/// Bucket-level query markers that select a pseudo-endpoint.
pub const PSEUDO_ENDPOINT_MARKERS: &[&str] = &[
    "acl",
    "policy",
    "versioning",
    "cors",
    "lifecycle",
    "encryption",
    "tagging",
    "object-lock",
    "replication",
    "logging",
    "website",
    "accelerate",
    "requestPayment",
];

/// Maps `(method, objectKey?, query, headers)` to an operation.
pub fn resolve_op(meta: &RequestMeta, headers: &HeaderMap) -> S3Result<S3Op> {
    let has_key = meta.object_key.is_some();
    let has_bucket = meta.bucket.is_some();
    let q = &meta.query;

    let op = match meta.method.as_str() {
        "GET" => {
            if !has_bucket {
                S3Op::ListBuckets
            } else if has_key {
                if q.has("uploadId") {
                    S3Op::ListParts
                } else {
                    S3Op::GetObject
                }
            } else if q.has("uploads") {
                S3Op::ListMultipartUploads
            } else if q.get("list-type").is_some_and(|v| v == "2") {
                S3Op::ListObjectsV2
            } else if PSEUDO_ENDPOINT_MARKERS.iter().any(|m| q.has(m)) {
                S3Op::QueryParamed
            } else {
                S3Op::ListObjects
            }
        }
        "PUT" => {
            if has_key {
                if q.has("partNumber") && q.has("uploadId") {
                    S3Op::UploadPart
                } else if headers.contains_key(crate::header::X_AMZ_COPY_SOURCE) {
                    S3Op::CopyObject
                } else {
                    S3Op::PutObject
                }
            } else if has_bucket {
                if PSEUDO_ENDPOINT_MARKERS.iter().any(|m| q.has(m)) {
                    S3Op::QueryParamed
                } else {
                    S3Op::CreateBucket
                }
            } else {
                return Err(invalid_request!("PUT requires a bucket"));
            }
        }
        "POST" => {
            if has_bucket && !has_key && q.has("delete") {
                S3Op::DeleteObjects
            } else if has_key && q.has("uploads") {
                S3Op::CreateMultipartUpload
            } else if has_key && q.has("uploadId") {
                S3Op::CompleteMultipartUpload
            } else {
                return Err(s3_error!(MethodNotAllowed, "unsupported POST target"));
            }
        }
        "DELETE" => {
            if has_key {
                if q.has("uploadId") {
                    S3Op::AbortMultipartUpload
                } else {
                    S3Op::DeleteObject
                }
            } else if has_bucket {
                S3Op::DeleteBucket
            } else {
                return Err(invalid_request!("DELETE requires a bucket"));
            }
        }
        "HEAD" => {
            if has_key {
                S3Op::HeadObject
            } else if has_bucket {
                S3Op::HeadBucket
            } else {
                return Err(invalid_request!("HEAD requires a bucket"));
            }
        }
        _ => return Err(invalid_request!("unsupported method: {}", meta.method)),
    };
    Ok(op)
}

/// Routes a request into the backend-specific resolver.
pub async fn dispatch(
    ctx: &RequestContext,
    bucket: &Bucket,
    req: GatewayRequest,
    mirror_enabled: bool,
) -> S3Result<Response> {
    match &bucket.config {
        BackendConfig::S3(cfg) => s3::resolve(ctx, bucket, cfg, req, mirror_enabled).await,
        BackendConfig::Swift(cfg) => swift::resolve(ctx, bucket, cfg, req, mirror_enabled).await,
    }
}

/// Dispatches with replica failover.
///
/// The primary attempt fully completes before any replica attempt begins.
/// Failover is read-preferring: only GET/HEAD fall through to replicas;
/// mutations propagate via the mirror queue instead. Replicas are tried in
/// declaration order; the first success wins, and if every attempt fails the
/// last error is returned.
pub async fn dispatch_with_failover(
    ctx: &RequestContext,
    bucket: &Arc<Bucket>,
    req: GatewayRequest,
) -> S3Result<Response> {
    let read_op = req.meta.method == Method::GET || req.meta.method == Method::HEAD;
    if !(read_op && bucket.has_replicas() && !bucket.is_replica) {
        return dispatch(ctx, bucket, req, true).await;
    }

    let replay = req.replay_parts();
    let err = match dispatch(ctx, bucket, req, true).await {
        Ok(resp) => return Ok(resp),
        Err(err) if err.is_retryable() => err,
        Err(err) => return Err(err),
    };

    warn!(bucket = %bucket.bucket_name, %err, "primary failed, trying replicas");
    let mut last_err = err;
    for replica in &bucket.replicas {
        let (uri, headers, meta) = replay.clone();
        let replica_req = GatewayRequest {
            uri,
            headers,
            body: Body::empty(),
            meta,
        };
        let replica_bucket = bucket.replica_bucket(replica);
        match dispatch(ctx, &replica_bucket, replica_req, false).await {
            Ok(resp) => {
                warn!(bucket = %bucket.bucket_name, replica = %replica.name, "replica served the request");
                return Ok(resp);
            }
            Err(err) => {
                warn!(bucket = %bucket.bucket_name, replica = %replica.name, %err, "replica attempt failed");
                last_err = err;
            }
        }
    }
    Err(last_err)
}

/// Upstream attempt budget: buckets participating in replication get a
/// single attempt so the failover path is reached promptly.
#[must_use]
pub fn attempt_budget(bucket: &Bucket) -> u32 {
    if bucket.has_replicas() || bucket.is_replica {
        1
    } else {
        crate::forward::DEFAULT_MAX_ATTEMPTS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::http::OrderedQs;
    use crate::request::UrlFormat;

    fn meta(method: Method, bucket: Option<&str>, key: Option<&str>, query: &str) -> RequestMeta {
        RequestMeta {
            bucket: bucket.map(str::to_owned),
            object_key: key.map(str::to_owned),
            url_format: UrlFormat::Path,
            method,
            query: OrderedQs::parse(query),
            decoded_path: String::new(),
            host: "localhost".to_owned(),
        }
    }

    #[test]
    fn dispatch_table() {
        let plain = HeaderMap::new();
        let mut copy = HeaderMap::new();
        copy.insert(crate::header::X_AMZ_COPY_SOURCE, "/src/k".parse().unwrap());

        let cases: &[(Method, Option<&str>, Option<&str>, &str, &HeaderMap, S3Op)] = &[
            (Method::GET, None, None, "", &plain, S3Op::ListBuckets),
            (Method::GET, Some("b"), None, "list-type=2", &plain, S3Op::ListObjectsV2),
            (Method::GET, Some("b"), None, "", &plain, S3Op::ListObjects),
            (Method::GET, Some("b"), None, "acl", &plain, S3Op::QueryParamed),
            (Method::GET, Some("b"), None, "versioning", &plain, S3Op::QueryParamed),
            (Method::GET, Some("b"), None, "uploads", &plain, S3Op::ListMultipartUploads),
            (Method::GET, Some("b"), Some("k"), "", &plain, S3Op::GetObject),
            (Method::GET, Some("b"), Some("k"), "uploadId=u1", &plain, S3Op::ListParts),
            (Method::PUT, Some("b"), None, "", &plain, S3Op::CreateBucket),
            (Method::PUT, Some("b"), Some("k"), "", &plain, S3Op::PutObject),
            (Method::PUT, Some("b"), Some("k"), "", &copy, S3Op::CopyObject),
            (Method::PUT, Some("b"), Some("k"), "partNumber=1&uploadId=u1", &plain, S3Op::UploadPart),
            (Method::POST, Some("b"), None, "delete", &plain, S3Op::DeleteObjects),
            (Method::POST, Some("b"), Some("k"), "uploads", &plain, S3Op::CreateMultipartUpload),
            (Method::POST, Some("b"), Some("k"), "uploadId=u1", &plain, S3Op::CompleteMultipartUpload),
            (Method::DELETE, Some("b"), None, "", &plain, S3Op::DeleteBucket),
            (Method::DELETE, Some("b"), Some("k"), "", &plain, S3Op::DeleteObject),
            (Method::DELETE, Some("b"), Some("k"), "uploadId=u1", &plain, S3Op::AbortMultipartUpload),
            (Method::HEAD, Some("b"), None, "", &plain, S3Op::HeadBucket),
            (Method::HEAD, Some("b"), Some("k"), "", &plain, S3Op::HeadObject),
        ];

        for (method, bucket, key, query, headers, expected) in cases {
            let m = meta(method.clone(), *bucket, *key, query);
            let op = resolve_op(&m, headers).unwrap();
            assert_eq!(op, *expected, "{method} bucket={bucket:?} key={key:?} q={query}");
        }
    }

    #[test]
    fn unsupported_post_is_method_not_allowed() {
        let m = meta(Method::POST, Some("b"), Some("k"), "");
        let err = resolve_op(&m, &HeaderMap::new()).unwrap_err();
        assert_eq!(err.code(), crate::S3ErrorCode::MethodNotAllowed);
    }

    #[test]
    fn mutating_classification() {
        assert!(S3Op::PutObject.is_mutating());
        assert!(S3Op::DeleteObjects.is_mutating());
        assert!(!S3Op::GetObject.is_mutating());
        assert!(!S3Op::QueryParamed.is_mutating());
        assert!(!S3Op::ListParts.is_mutating());
    }
}
