//! AWS Signature Version 4.
//!
//! Inbound verification and outbound signing share the same canonicalization
//! primitives. The gateway never forwards a client signature: outbound S3
//! calls are re-signed with the backend's own credentials via
//! [`sign_request_v4`].

mod amz_date;
pub use self::amz_date::{AmzDate, ParseAmzDateError};

mod authorization;
pub use self::authorization::{AuthorizationV4, CredentialV4, ParseAuthorizationError};

mod presigned;
pub use self::presigned::{ParsePresignedUrlError, PresignedUrlV4};

mod canonical;
pub use self::canonical::{
    Payload, calculate_signature, create_canonical_request, create_presigned_canonical_request,
    create_string_to_sign, hex_sha256, uri_encode,
};

mod sign;
pub use self::sign::{SigningKey, presign_url_v4, sign_request_v4};
