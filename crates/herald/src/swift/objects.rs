//! Core object operations: Put, Get, Head, Delete, Copy.

use super::client::{SwiftClient, encode_object_key};
use super::convert::{self, Target};
use super::require_key;

use crate::config::BackendConfig;
use crate::dto::{Timestamp, TimestampFormat, quote_etag};
use crate::header;
use crate::http::Response;
use crate::resolver::GatewayRequest;
use crate::xml;
use crate::S3Result;

use bytes::Bytes;
use http::HeaderMap;
use http::HeaderValue;
use http::Method;
use http::StatusCode;

/// GetObject: Swift `GET /c/o`, Range passed through; 200 or 206.
pub async fn get_object(client: &SwiftClient<'_>, req: &GatewayRequest) -> S3Result<Response> {
    let key = require_key(req)?;
    let path = client.object_path(key);

    let mut headers = HeaderMap::new();
    if let Some(range) = req.header_str(header::RANGE)
        && let Ok(value) = HeaderValue::from_str(range)
    {
        headers.insert(header::RANGE, value);
    }

    let resp = client.send(&Method::GET, &path, &[], &headers, Bytes::new()).await?;
    match resp.status.as_u16() {
        200 | 206 => {
            let mut out = Response::with_status(resp.status);
            convert::map_object_headers(&resp, &mut out)?;
            out.body = resp.body;
            Ok(out)
        }
        _ => Err(convert::convert_error(resp.status, Target::Object)),
    }
}

/// HeadObject: Swift `HEAD /c/o`; always 200 with the GetObject header set.
pub async fn head_object(client: &SwiftClient<'_>, req: &GatewayRequest) -> S3Result<Response> {
    let key = require_key(req)?;
    let path = client.object_path(key);

    let resp = client.request(&Method::HEAD, &path, &[]).await?;
    match resp.status.as_u16() {
        200 | 204 | 206 => {
            let mut out = Response::with_status(StatusCode::OK);
            convert::map_object_headers(&resp, &mut out)?;
            Ok(out)
        }
        _ => Err(convert::convert_error(resp.status, Target::Object)),
    }
}

/// Maps inbound `x-amz-meta-*` and content headers onto a Swift PUT.
fn put_headers(req: &GatewayRequest) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for name in [header::CONTENT_TYPE, header::CONTENT_LENGTH] {
        if let Some(value) = req.headers.get(name) {
            headers.insert(name, value.clone());
        }
    }
    for (name, value) in &req.headers {
        if let Some(suffix) = name.as_str().strip_prefix(header::X_AMZ_META_PREFIX)
            && let Ok(name) = http::header::HeaderName::try_from(format!("x-object-meta-{suffix}"))
        {
            headers.insert(name, value.clone());
        }
    }
    headers
}

/// PutObject: Swift `PUT /c/o` (201) → S3 200 with the quoted ETag.
pub async fn put_object(client: &SwiftClient<'_>, mut req: GatewayRequest) -> S3Result<Response> {
    let key = require_key(&req)?.to_owned();
    let path = client.object_path(&key);
    let headers = put_headers(&req);

    let body = std::mem::take(&mut req.body);
    let resp = client.send_streaming(&Method::PUT, &path, &[], headers, body).await?;
    match resp.status.as_u16() {
        200 | 201 => {
            let etag = convert::require_header(&resp, header::ETAG)?;
            let mut out = Response::with_status(StatusCode::OK);
            out.set_header(header::ETAG, &quote_etag(etag));
            out.set_header(header::CONTENT_LENGTH, "0");
            Ok(out)
        }
        404 => Err(convert::convert_error(StatusCode::NOT_FOUND, Target::Bucket)),
        _ => Err(convert::convert_error(resp.status, Target::Object)),
    }
}

/// DeleteObject: Swift `DELETE /c/o` → 204. A Swift 404 still answers 204:
/// deletion is idempotent, which the mirror replay relies on.
pub async fn delete_object(client: &SwiftClient<'_>, req: &GatewayRequest) -> S3Result<Response> {
    let key = require_key(req)?;
    let path = client.object_path(key);

    let resp = client.request(&Method::DELETE, &path, &[]).await?;
    match resp.status.as_u16() {
        200 | 204 | 404 => Ok(Response::with_status(StatusCode::NO_CONTENT)),
        _ => Err(convert::convert_error(resp.status, Target::Object)),
    }
}

/// Resolves `x-amz-copy-source` to a Swift container path via the registry.
fn resolve_copy_source(client: &SwiftClient<'_>, req: &GatewayRequest) -> S3Result<String> {
    let value = req
        .header_str(header::X_AMZ_COPY_SOURCE)
        .ok_or_else(|| invalid_request!("missing x-amz-copy-source"))?;
    let decoded = urlencoding::decode(value)
        .map_err(|_| invalid_request!("invalid x-amz-copy-source"))?
        .into_owned();
    let trimmed = decoded.trim_start_matches('/');
    let Some((src_bucket, src_key)) = trimmed.split_once('/') else {
        return Err(invalid_request!("x-amz-copy-source must be /bucket/key"));
    };

    let Some(source) = client.registry().get(src_bucket) else {
        return Err(s3_error!(NoSuchBucket, "copy source bucket {} is not configured", src_bucket));
    };
    match &source.config {
        BackendConfig::Swift(cfg) => Ok(format!(
            "/{}/{}",
            urlencoding::encode(&cfg.container),
            encode_object_key(src_key)
        )),
        BackendConfig::S3(_) => Err(s3_error!(
            NotImplemented,
            "cross-protocol copy from {} is not supported",
            src_bucket
        )),
    }
}

/// CopyObject: Swift `PUT /c/o` with `X-Copy-From` (201) → S3 200 with a
/// synthesized `<CopyObjectResult>`.
pub async fn copy_object(client: &SwiftClient<'_>, req: &GatewayRequest) -> S3Result<Response> {
    let key = require_key(req)?;
    let path = client.object_path(key);
    let copy_from = resolve_copy_source(client, req)?;

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&copy_from) {
        headers.insert(header::X_COPY_FROM, value);
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));

    let resp = client.send(&Method::PUT, &path, &[], &headers, Bytes::new()).await?;
    match resp.status.as_u16() {
        200 | 201 => {
            let etag = convert::require_header(&resp, header::ETAG)?;
            let last_modified = resp
                .header_str(header::LAST_MODIFIED)
                .and_then(|v| Timestamp::parse(TimestampFormat::HttpDate, v).ok())
                .unwrap_or_else(Timestamp::now)
                .to_string_format(TimestampFormat::DateTime);

            let mut s = xml::Serializer::with_decl();
            s.element_ns("CopyObjectResult", xml::S3_XMLNS, |s| {
                s.text_element("ETag", &quote_etag(etag));
                s.text_element("LastModified", &last_modified);
            });

            let mut out = Response::with_status(StatusCode::OK);
            out.set_xml_body(s.finish());
            Ok(out)
        }
        _ => Err(convert::convert_error(resp.status, Target::Object)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::http::OrderedQs;
    use crate::request::{RequestMeta, UrlFormat};

    fn request_with_meta(headers: HeaderMap) -> GatewayRequest {
        GatewayRequest {
            uri: "/b/k".parse().unwrap(),
            headers,
            body: crate::http::Body::empty(),
            meta: RequestMeta {
                bucket: Some("b".to_owned()),
                object_key: Some("k".to_owned()),
                url_format: UrlFormat::Path,
                method: Method::PUT,
                query: OrderedQs::parse(""),
                decoded_path: "/b/k".to_owned(),
                host: "localhost".to_owned(),
            },
        }
    }

    #[test]
    fn put_headers_map_amz_meta() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_TYPE, "application/pdf".parse().unwrap());
        headers.insert("x-amz-meta-owner", "ops".parse().unwrap());
        headers.insert("x-amz-date", "20250101T000000Z".parse().unwrap());
        let req = request_with_meta(headers);

        let mapped = put_headers(&req);
        assert_eq!(mapped.get("content-type").unwrap(), "application/pdf");
        assert_eq!(mapped.get("x-object-meta-owner").unwrap(), "ops");
        assert!(mapped.get("x-amz-date").is_none());
    }
}
