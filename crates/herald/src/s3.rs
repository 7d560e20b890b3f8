//! Pass-through resolver for native S3 backends.
//!
//! The backend already speaks S3, so every operation is a re-signed forward
//! of the inbound request. The interest here is the hooks shared with the
//! Swift translator: attempt budgeting, the mirror enqueue after successful
//! mutations, and the copy-source rewrite from gateway bucket names to
//! upstream ones.

use crate::config::{BackendConfig, S3Config};
use crate::forward::forward_s3_request;
use crate::header;
use crate::http::Response;
use crate::mirror::{self, MirrorCommand, SerializedRequest};
use crate::registry::Bucket;
use crate::resolver::{GatewayRequest, RequestContext, S3Op, attempt_budget, resolve_op};
use crate::{S3Error, S3Result};

use bytes::Bytes;
use http::HeaderValue;
use tracing::debug;

/// Operations whose (small) body must be buffered so the mirror task can
/// replay it. Object payloads are not buffered; the worker re-fetches
/// them from the primary.
fn needs_buffered_body(op: S3Op) -> bool {
    matches!(
        op,
        S3Op::CreateBucket | S3Op::CompleteMultipartUpload | S3Op::DeleteObjects
    )
}

/// Rewrites `x-amz-copy-source` from the gateway bucket name to the
/// backend's upstream bucket name.
fn rewrite_copy_source(ctx: &RequestContext, req: &mut GatewayRequest) -> S3Result<()> {
    let Some(value) = req.header_str(header::X_AMZ_COPY_SOURCE) else {
        return Ok(());
    };
    let decoded = urlencoding::decode(value)
        .map_err(|_| invalid_request!("invalid x-amz-copy-source"))?
        .into_owned();
    let trimmed = decoded.trim_start_matches('/');
    let Some((src_bucket, src_key)) = trimmed.split_once('/') else {
        return Err(invalid_request!("x-amz-copy-source must be /bucket/key"));
    };

    let Some(source) = ctx.registry.get(src_bucket) else {
        return Err(s3_error!(NoSuchBucket, "copy source bucket {} is not configured", src_bucket));
    };
    let upstream = match &source.config {
        BackendConfig::S3(cfg) => &cfg.bucket,
        BackendConfig::Swift(_) => {
            return Err(s3_error!(
                NotImplemented,
                "cross-protocol copy from {} is not supported",
                src_bucket
            ));
        }
    };

    let rewritten = format!("/{upstream}/{src_key}");
    let value = HeaderValue::from_str(&rewritten)
        .map_err(|e| s3_error!(e, InternalError, "rewritten copy source is not a valid header"))?;
    req.headers.insert(header::X_AMZ_COPY_SOURCE, value);
    Ok(())
}

/// Dispatches one request against a native S3 backend.
pub async fn resolve(
    ctx: &RequestContext,
    bucket: &Bucket,
    cfg: &S3Config,
    mut req: GatewayRequest,
    mirror_enabled: bool,
) -> S3Result<Response> {
    let op = resolve_op(&req.meta, &req.headers)?;
    let attempts = attempt_budget(bucket);
    debug!(bucket = %bucket.bucket_name, ?op, attempts, "resolved s3 operation");

    if op == S3Op::ListBuckets {
        // the gateway owns the bucket namespace; the front door answers this
        return Err(s3_error!(NotImplemented, "ListBuckets does not reach a backend"));
    }

    if op == S3Op::CopyObject {
        rewrite_copy_source(ctx, &mut req)?;
    }

    let command = MirrorCommand::from_op(op);
    let body_bytes = if command.is_some() && needs_buffered_body(op) {
        req.body.store_all().await.map_err(S3Error::internal_error)?
    } else {
        Bytes::new()
    };

    // snapshot before the body is consumed by the forward
    let original = if mirror_enabled && bucket.has_replicas() && command.is_some() {
        Some(SerializedRequest::from_request(&req, &body_bytes))
    } else {
        None
    };

    let body = std::mem::take(&mut req.body);
    let resp = forward_s3_request(&ctx.client, cfg, &req.meta, &req.headers, body, attempts).await?;

    if resp.status.is_success()
        && let (Some(command), Some(original)) = (command, original)
    {
        mirror::enqueue_for_replicas(&ctx.mirror, bucket, command, &original)?;
    }

    Ok(resp)
}
