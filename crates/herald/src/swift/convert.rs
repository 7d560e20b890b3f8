//! Swift→S3 status and header translation tables.

use crate::dto::quote_etag;
use crate::header;
use crate::http::Response;
use crate::{S3Error, S3Result};

use http::StatusCode;

/// What the failing Swift call was addressing, for 404 disambiguation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Object,
    Bucket,
    Upload,
}

/// Maps a non-success Swift status to the S3 error a client expects.
pub fn convert_error(status: StatusCode, target: Target) -> S3Error {
    match status.as_u16() {
        401 | 403 => s3_error!(AccessDenied, "swift denied access"),
        404 => match target {
            Target::Object => s3_error!(NoSuchKey, "The specified key does not exist"),
            Target::Bucket => s3_error!(NoSuchBucket, "The specified bucket does not exist"),
            Target::Upload => s3_error!(NoSuchUpload, "The specified upload does not exist"),
        },
        408 => s3_error!(RequestTimeout, "swift timed out reading the request"),
        411 | 422 => invalid_request!("swift rejected the request entity"),
        416 => s3_error!(InvalidObjectState, "requested range is not satisfiable"),
        409 => invalid_request!("the container is not empty"),
        _ => s3_error!(InternalError, "swift returned unexpected status {}", status),
    }
}

/// Create-container statuses that mean the name is taken.
pub fn convert_create_bucket_error(status: StatusCode) -> S3Error {
    match status.as_u16() {
        400 | 507 => s3_error!(BucketAlreadyExists, "The requested bucket name is not available"),
        _ => convert_error(status, Target::Bucket),
    }
}

/// Pulls a header Swift must send when it asserts success; absence is an
/// upstream invariant violation surfaced as 502.
pub fn require_header<'a>(resp: &'a Response, name: &str) -> S3Result<&'a str> {
    resp.header_str(name)
        .ok_or_else(|| S3Error::bad_gateway(format!("swift success response is missing {name}")))
}

/// Copies the object-level headers of a Swift GET/HEAD response onto the S3
/// response: `ETag` (quoted), `Last-Modified`, `Content-Length`,
/// `Content-Type`, `Content-Range`, plus `x-object-meta-*` renamed to
/// `x-amz-meta-*`.
pub fn map_object_headers(from: &Response, to: &mut Response) -> S3Result<()> {
    let etag = require_header(from, header::ETAG)?;
    to.set_header(header::ETAG, &quote_etag(etag));

    let last_modified = require_header(from, header::LAST_MODIFIED)?;
    to.set_header(header::LAST_MODIFIED, last_modified);

    let content_length = require_header(from, header::CONTENT_LENGTH)?;
    to.set_header(header::CONTENT_LENGTH, content_length);

    if let Some(content_type) = from.header_str(header::CONTENT_TYPE) {
        to.set_header(header::CONTENT_TYPE, content_type);
    }
    if let Some(content_range) = from.header_str(header::CONTENT_RANGE) {
        to.set_header(header::CONTENT_RANGE, content_range);
    }
    to.set_header(header::ACCEPT_RANGES, "bytes");

    for (name, value) in &from.headers {
        if let Some(suffix) = name.as_str().strip_prefix(header::X_OBJECT_META_PREFIX)
            && let Ok(value) = value.to_str()
        {
            to.set_header(&format!("{}{suffix}", header::X_AMZ_META_PREFIX), value);
        }
    }
    Ok(())
}
