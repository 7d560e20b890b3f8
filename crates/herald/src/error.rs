//! S3-shaped error type
//!
//! Every handler returns [`S3Result<T>`]; the front door converts an
//! [`S3Error`] into the canonical S3 error XML with the mapped status code.

use crate::xml;

use std::error::Error as StdErrorTrait;
use std::fmt;

use http::StatusCode;

/// Type-erased error, used as the `source` of an [`S3Error`].
pub type StdError = Box<dyn StdErrorTrait + Send + Sync + 'static>;

/// Constructs an [`S3Error`].
///
/// Forms:
/// - `s3_error!(Code)`
/// - `s3_error!(Code, "format", args..)`
/// - `s3_error!(source, Code)`
/// - `s3_error!(source, Code, "format", args..)`
macro_rules! s3_error {
    ($code:ident) => {
        $crate::S3Error::new($crate::S3ErrorCode::$code)
    };
    ($code:ident, $msg:literal $(, $arg:expr)* $(,)?) => {
        $crate::S3Error::with_message($crate::S3ErrorCode::$code, format!($msg $(, $arg)*))
    };
    ($source:expr, $code:ident) => {{
        let mut err = $crate::S3Error::new($crate::S3ErrorCode::$code);
        err.set_source(Box::new($source));
        err
    }};
    ($source:expr, $code:ident, $msg:literal $(, $arg:expr)* $(,)?) => {{
        let mut err = $crate::S3Error::with_message($crate::S3ErrorCode::$code, format!($msg $(, $arg)*));
        err.set_source(Box::new($source));
        err
    }};
}

/// Shorthand for `s3_error!(InvalidRequest, ..)`.
macro_rules! invalid_request {
    ($msg:literal $(, $arg:expr)* $(,)?) => {
        s3_error!(InvalidRequest, $msg $(, $arg)*)
    };
    ($source:expr, $msg:literal $(, $arg:expr)* $(,)?) => {
        s3_error!($source, InvalidRequest, $msg $(, $arg)*)
    };
}

/// Canonical S3 error codes emitted by the gateway.
///
/// The list covers the codes in the inbound protocol surface plus the
/// authentication failures. Status mapping follows the AWS error reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum S3ErrorCode {
    AccessDenied,
    AuthorizationHeaderMalformed,
    BucketAlreadyExists,
    BucketAlreadyOwnedByYou,
    ExpiredToken,
    IncompleteBody,
    InternalError,
    InvalidArgument,
    InvalidBucketName,
    InvalidObjectState,
    InvalidPart,
    InvalidRequest,
    InvalidURI,
    MalformedXML,
    MethodNotAllowed,
    MissingContentLength,
    NoSuchBucket,
    NoSuchKey,
    NoSuchUpload,
    NotImplemented,
    PreconditionFailed,
    RequestTimeout,
    ServiceUnavailable,
    SignatureDoesNotMatch,
}

impl S3ErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AccessDenied => "AccessDenied",
            Self::AuthorizationHeaderMalformed => "AuthorizationHeaderMalformed",
            Self::BucketAlreadyExists => "BucketAlreadyExists",
            Self::BucketAlreadyOwnedByYou => "BucketAlreadyOwnedByYou",
            Self::ExpiredToken => "ExpiredToken",
            Self::IncompleteBody => "IncompleteBody",
            Self::InternalError => "InternalError",
            Self::InvalidArgument => "InvalidArgument",
            Self::InvalidBucketName => "InvalidBucketName",
            Self::InvalidObjectState => "InvalidObjectState",
            Self::InvalidPart => "InvalidPart",
            Self::InvalidRequest => "InvalidRequest",
            Self::InvalidURI => "InvalidURI",
            Self::MalformedXML => "MalformedXML",
            Self::MethodNotAllowed => "MethodNotAllowed",
            Self::MissingContentLength => "MissingContentLength",
            Self::NoSuchBucket => "NoSuchBucket",
            Self::NoSuchKey => "NoSuchKey",
            Self::NoSuchUpload => "NoSuchUpload",
            Self::NotImplemented => "NotImplemented",
            Self::PreconditionFailed => "PreconditionFailed",
            Self::RequestTimeout => "RequestTimeout",
            Self::ServiceUnavailable => "ServiceUnavailable",
            Self::SignatureDoesNotMatch => "SignatureDoesNotMatch",
        }
    }

    #[must_use]
    pub fn status_code(self) -> StatusCode {
        match self {
            Self::AccessDenied
            | Self::ExpiredToken
            | Self::InvalidObjectState
            | Self::SignatureDoesNotMatch => StatusCode::FORBIDDEN,
            Self::AuthorizationHeaderMalformed
            | Self::IncompleteBody
            | Self::InvalidArgument
            | Self::InvalidBucketName
            | Self::InvalidPart
            | Self::InvalidRequest
            | Self::InvalidURI
            | Self::MalformedXML => StatusCode::BAD_REQUEST,
            Self::BucketAlreadyExists | Self::BucketAlreadyOwnedByYou => StatusCode::CONFLICT,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::MissingContentLength => StatusCode::LENGTH_REQUIRED,
            Self::NoSuchBucket | Self::NoSuchKey | Self::NoSuchUpload => StatusCode::NOT_FOUND,
            Self::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            Self::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            Self::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl fmt::Display for S3ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gateway error with S3 semantics.
pub struct S3Error {
    code: S3ErrorCode,
    message: Option<String>,
    request_id: Option<String>,
    source: Option<StdError>,
    /// Set when the error was produced while talking to a backend and the
    /// failure is worth retrying or failing over (network error, 5xx).
    retryable: bool,
    /// Overrides the code's default HTTP status (502 for upstream
    /// invariant violations).
    status_override: Option<StatusCode>,
}

impl S3Error {
    #[must_use]
    pub fn new(code: S3ErrorCode) -> Self {
        Self {
            code,
            message: None,
            request_id: None,
            source: None,
            retryable: false,
            status_override: None,
        }
    }

    /// An upstream invariant violation: the backend asserted success but the
    /// response is missing something required. Surfaces as 502.
    #[must_use]
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        let mut err = Self::with_message(S3ErrorCode::InternalError, message);
        err.status_override = Some(StatusCode::BAD_GATEWAY);
        err
    }

    #[must_use]
    pub fn with_message(code: S3ErrorCode, message: impl Into<String>) -> Self {
        let mut err = Self::new(code);
        err.message = Some(message.into());
        err
    }

    #[must_use]
    pub fn with_source(code: S3ErrorCode, source: StdError) -> Self {
        let mut err = Self::new(code);
        err.source = Some(source);
        err
    }

    /// Wraps an arbitrary error as `InternalError`.
    pub fn internal_error(source: impl Into<StdError>) -> Self {
        let mut err = Self::new(S3ErrorCode::InternalError);
        err.source = Some(source.into());
        err
    }

    #[must_use]
    pub fn code(&self) -> S3ErrorCode {
        self.code
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    pub fn set_source(&mut self, source: StdError) {
        self.source = Some(source);
    }

    pub fn set_request_id(&mut self, request_id: impl Into<String>) {
        self.request_id = Some(request_id.into());
    }

    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        self.status_override.unwrap_or_else(|| self.code.status_code())
    }

    /// Marks the error as a transient upstream failure.
    #[must_use]
    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Serializes the error into the canonical S3 `<Error>` XML document.
    #[must_use]
    pub fn to_xml(&self, host_id: &str) -> String {
        let mut s = xml::Serializer::with_decl();
        s.element("Error", |s| {
            s.text_element("Code", self.code.as_str());
            s.text_element("Message", self.message.as_deref().unwrap_or(self.code.as_str()));
            s.text_element("RequestId", self.request_id.as_deref().unwrap_or(""));
            s.text_element("HostId", host_id);
        });
        s.finish()
    }
}

impl fmt::Debug for S3Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("S3Error");
        d.field("code", &self.code);
        if let Some(ref message) = self.message {
            d.field("message", message);
        }
        if let Some(ref request_id) = self.request_id {
            d.field("request_id", request_id);
        }
        if let Some(ref source) = self.source {
            d.field("source", source);
        }
        d.finish_non_exhaustive()
    }
}

impl fmt::Display for S3Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        if let Some(ref message) = self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

impl StdErrorTrait for S3Error {
    fn source(&self) -> Option<&(dyn StdErrorTrait + 'static)> {
        self.source.as_deref().map(|e| e as _)
    }
}

impl From<S3ErrorCode> for S3Error {
    fn from(code: S3ErrorCode) -> Self {
        Self::new(code)
    }
}

pub type S3Result<T = (), E = S3Error> = Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macro_forms() {
        let e = s3_error!(NoSuchKey);
        assert_eq!(e.code(), S3ErrorCode::NoSuchKey);
        assert_eq!(e.status_code(), StatusCode::NOT_FOUND);

        let name = "part";
        let e = s3_error!(InvalidArgument, "bad {name}");
        assert_eq!(e.message(), Some("bad part"));

        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let e = s3_error!(io, InternalError);
        assert!(std::error::Error::source(&e).is_some());

        let e = invalid_request!("missing bucket");
        assert_eq!(e.code(), S3ErrorCode::InvalidRequest);
    }

    #[test]
    fn xml_body() {
        let mut e = S3Error::with_message(S3ErrorCode::NoSuchBucket, "The specified bucket does not exist");
        e.set_request_id("req-1");
        let body = e.to_xml("herald");
        assert_eq!(
            body,
            concat!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>",
                "<Error>",
                "<Code>NoSuchBucket</Code>",
                "<Message>The specified bucket does not exist</Message>",
                "<RequestId>req-1</RequestId>",
                "<HostId>herald</HostId>",
                "</Error>",
            )
        );
    }
}
