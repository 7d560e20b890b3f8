//! S3↔Swift protocol translator.
//!
//! Presents the S3 REST surface over the OpenStack Object Storage API.
//! Every handler issues Swift REST calls against
//! `{storageUrl}/{container}[/{object}]` with an `X-Auth-Token` from the
//! Keystone store, then converts the response into the S3 shape (status,
//! headers, XML body) a standard S3 client expects.

mod client;
pub use self::client::{SwiftClient, encode_object_key};

mod convert;

mod buckets;
mod bulk_delete;
mod multipart;
mod objects;
mod pseudo;

use crate::config::SwiftConfig;
use crate::http::Response;
use crate::mirror::{self, MirrorCommand, SerializedRequest};
use crate::registry::Bucket;
use crate::resolver::{GatewayRequest, RequestContext, S3Op, resolve_op};
use crate::{S3Error, S3Result};

use bytes::Bytes;
use tracing::debug;

/// Handlers that address an object fail fast when the key is absent.
pub(crate) fn require_key(req: &GatewayRequest) -> S3Result<&str> {
    req.meta
        .object_key
        .as_deref()
        .ok_or_else(|| invalid_request!("an object key is required"))
}

/// Dispatches one request against a Swift backend.
pub async fn resolve(
    ctx: &RequestContext,
    bucket: &Bucket,
    cfg: &SwiftConfig,
    mut req: GatewayRequest,
    mirror_enabled: bool,
) -> S3Result<Response> {
    let op = resolve_op(&req.meta, &req.headers)?;
    debug!(bucket = %bucket.bucket_name, ?op, "resolved swift operation");

    let command = MirrorCommand::from_op(op);

    // small-bodied mutations are buffered so the mirror task can replay them
    let body_bytes = match op {
        S3Op::DeleteObjects | S3Op::CompleteMultipartUpload | S3Op::CreateBucket => {
            req.body.store_all().await.map_err(S3Error::internal_error)?
        }
        _ => Bytes::new(),
    };

    let original = if mirror_enabled && bucket.has_replicas() && command.is_some() {
        Some(SerializedRequest::from_request(&req, &body_bytes))
    } else {
        None
    };

    let client = SwiftClient::new(ctx, cfg, bucket);
    let resp = match op {
        S3Op::ListBuckets => {
            return Err(s3_error!(NotImplemented, "ListBuckets does not reach a backend"));
        }
        S3Op::GetObject => objects::get_object(&client, &req).await?,
        S3Op::HeadObject => objects::head_object(&client, &req).await?,
        S3Op::PutObject => objects::put_object(&client, req).await?,
        S3Op::DeleteObject => objects::delete_object(&client, &req).await?,
        S3Op::CopyObject => objects::copy_object(&client, &req).await?,
        S3Op::ListObjects => buckets::list_objects(&client, &req, buckets::ListStyle::V1).await?,
        S3Op::ListObjectsV2 => buckets::list_objects(&client, &req, buckets::ListStyle::V2).await?,
        S3Op::CreateBucket => buckets::create_bucket(&client).await?,
        S3Op::DeleteBucket => buckets::delete_bucket(&client).await?,
        S3Op::HeadBucket => buckets::head_bucket(&client).await?,
        S3Op::QueryParamed => pseudo::route_query_paramed(&client, &req).await?,
        S3Op::CreateMultipartUpload => multipart::create_multipart_upload(&client, &req).await?,
        S3Op::UploadPart => multipart::upload_part(&client, req).await?,
        S3Op::CompleteMultipartUpload => multipart::complete_multipart_upload(&client, &req, &body_bytes).await?,
        S3Op::AbortMultipartUpload => multipart::abort_multipart_upload(&client, &req).await?,
        S3Op::ListMultipartUploads => multipart::list_multipart_uploads(&client, &req).await?,
        S3Op::ListParts => multipart::list_parts(&client, &req).await?,
        S3Op::DeleteObjects => bulk_delete::delete_objects(&client, &body_bytes).await?,
    };

    if resp.status.is_success()
        && let (Some(command), Some(original)) = (command, original)
    {
        mirror::enqueue_for_replicas(&ctx.mirror, bucket, command, &original)?;
    }

    Ok(resp)
}
