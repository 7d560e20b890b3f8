//! Header name constants.
//!
//! Names are lowercase so they can be matched directly against hyper's
//! normalized header map and used in SigV4 canonical headers.

pub const ACCEPT: &str = "accept";
pub const ACCEPT_RANGES: &str = "accept-ranges";
pub const AUTHORIZATION: &str = "authorization";
pub const CONNECTION: &str = "connection";
pub const CONTENT_LENGTH: &str = "content-length";
pub const CONTENT_RANGE: &str = "content-range";
pub const CONTENT_TYPE: &str = "content-type";
pub const ETAG: &str = "etag";
pub const HOST: &str = "host";
pub const LAST_MODIFIED: &str = "last-modified";
pub const LOCATION: &str = "location";
pub const RANGE: &str = "range";

pub const X_AMZ_BUCKET_LOCATION_NAME: &str = "x-amz-bucket-location-name";
pub const X_AMZ_BUCKET_LOCATION_TYPE: &str = "x-amz-bucket-location-type";
pub const X_AMZ_BUCKET_REGION: &str = "x-amz-bucket-region";
pub const X_AMZ_CONTENT_SHA256: &str = "x-amz-content-sha256";
pub const X_AMZ_COPY_SOURCE: &str = "x-amz-copy-source";
pub const X_AMZ_DATE: &str = "x-amz-date";
pub const X_AMZ_META_PREFIX: &str = "x-amz-meta-";
pub const X_AMZ_REQUEST_ID: &str = "x-amz-request-id";

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";

// OpenStack Swift
pub const X_AUTH_TOKEN: &str = "x-auth-token";
pub const X_CONTAINER_META_PREFIX: &str = "x-container-meta-";
pub const X_CONTAINER_META_ENCRYPTION_TYPE: &str = "x-container-meta-encryption-type";
pub const X_CONTAINER_READ: &str = "x-container-read";
pub const X_CONTAINER_WRITE: &str = "x-container-write";
pub const X_COPY_FROM: &str = "x-copy-from";
pub const X_OBJECT_META_PREFIX: &str = "x-object-meta-";
pub const X_SUBJECT_TOKEN: &str = "x-subject-token";

/// Payload marker for requests signed without a body hash.
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
