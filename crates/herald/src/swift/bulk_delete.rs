//! DeleteObjects over Swift bulk-delete.
//!
//! The handler first tries the shared HTTP client. Some Swift deployments
//! reject bodies the client library re-frames, so on transport failure the
//! request is re-issued as a manually framed HTTP/1.1 POST over a raw
//! (optionally TLS) connection, and the response is parsed from the wire
//! bytes: status line via httparse, chunked markers stripped by hand.

use super::client::{SwiftClient, encode_object_key};

use crate::header;
use crate::http::Response;
use crate::xml;
use crate::S3Result;

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};
use url::Url;

/// Inbound `<Delete>` document.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DeleteXml {
    #[serde(rename = "Object", default)]
    objects: Vec<ObjectIdentifierXml>,
    #[serde(default)]
    quiet: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ObjectIdentifierXml {
    key: String,
}

/// Swift's bulk-delete JSON body.
#[derive(Debug, Default, Deserialize)]
struct SwiftBulkResult {
    #[serde(rename = "Number Deleted", default)]
    number_deleted: u64,
    #[serde(rename = "Number Not Found", default)]
    number_not_found: u64,
    #[serde(rename = "Errors", default)]
    errors: Vec<(String, String)>,
    #[serde(rename = "Response Status", default)]
    response_status: String,
}

fn parse_delete_xml(body: &[u8]) -> S3Result<DeleteXml> {
    let text = std::str::from_utf8(body).map_err(|_| s3_error!(MalformedXML, "request body is not UTF-8"))?;
    let doc: DeleteXml =
        quick_xml::de::from_str(text).map_err(|e| s3_error!(e, MalformedXML, "invalid Delete body"))?;
    if doc.objects.is_empty() {
        return Err(s3_error!(MalformedXML, "Delete names no objects"));
    }
    Ok(doc)
}

/// Maps a Swift per-path error status onto the S3 error code for
/// `<DeleteResult>` entries.
fn map_error_code(status: u16) -> &'static str {
    match status {
        404 => "NoSuchKey",
        401 | 403 => "AccessDenied",
        _ => "InternalError",
    }
}

fn parse_error_status(status_line: &str) -> u16 {
    status_line
        .split_whitespace()
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(500)
}

/// Normalizes a bulk-delete path for comparison: strips the leading slash
/// and percent-decoding.
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    urlencoding::decode(trimmed).map_or_else(|_| trimmed.to_owned(), |s| s.into_owned())
}

/// Outcome of one Swift bulk-delete call.
#[derive(Debug, Default)]
pub struct BulkDeleteOutcome {
    pub deleted: u64,
    pub not_found: u64,
    /// decoded `container/key` → swift status
    pub errors: HashMap<String, u16>,
}

impl BulkDeleteOutcome {
    fn from_swift(result: &SwiftBulkResult) -> Self {
        let errors = result
            .errors
            .iter()
            .map(|(path, status)| (normalize_path(path), parse_error_status(status)))
            .collect();
        Self {
            deleted: result.number_deleted,
            not_found: result.number_not_found,
            errors,
        }
    }
}

/// Issues a bulk delete for already-decoded object names in the client's
/// container. Used by DeleteObjects and by multipart abort cleanup.
pub async fn bulk_delete_paths(client: &SwiftClient<'_>, keys: &[String]) -> S3Result<BulkDeleteOutcome> {
    let container = urlencoding::encode(client.container()).into_owned();
    let lines: Vec<String> = keys
        .iter()
        .map(|key| format!("{container}/{}", encode_object_key(key)))
        .collect();
    let payload = format!("{}\n", lines.join("\n"));

    let token = client.token().await?;
    let storage_url = Url::parse(&token.storage_url)
        .map_err(|e| s3_error!(e, InternalError, "invalid swift storage url"))?;

    // native POST first; fall back to raw framing when the transport or the
    // upstream rejects it
    let body = match native_bulk_delete(client, &storage_url, &token.token, &payload).await {
        Ok(body) => body,
        Err(err) => {
            warn!(%err, "native bulk delete failed, retrying with raw framing");
            raw_bulk_delete(&storage_url, &token.token, &payload).await?
        }
    };

    let result: SwiftBulkResult = serde_json::from_slice(&body)
        .map_err(|e| s3_error!(e, InternalError, "unparseable bulk-delete response"))?;
    debug!(
        deleted = result.number_deleted,
        not_found = result.number_not_found,
        errors = result.errors.len(),
        status = %result.response_status,
        "swift bulk delete finished"
    );
    Ok(BulkDeleteOutcome::from_swift(&result))
}

async fn native_bulk_delete(
    client: &SwiftClient<'_>,
    storage_url: &Url,
    token: &str,
    payload: &str,
) -> S3Result<Vec<u8>> {
    let url = format!("{storage_url}?bulk-delete");
    let resp = client
        .http()
        .post(&url)
        .header(header::X_AUTH_TOKEN, token)
        .header(header::CONTENT_TYPE, "text/plain")
        .header(header::ACCEPT, "application/json")
        .body(payload.to_owned())
        .send()
        .await
        .map_err(|e| s3_error!(e, InternalError, "bulk delete transport failure").retryable())?;

    let status = resp.status();
    if !status.is_success() {
        return Err(s3_error!(InternalError, "bulk delete returned {}", status).retryable());
    }
    let body = resp
        .bytes()
        .await
        .map_err(|e| s3_error!(e, InternalError, "bulk delete body read failure").retryable())?;
    Ok(body.to_vec())
}

/// Manually framed HTTP/1.1 POST, read to EOF.
async fn raw_bulk_delete(storage_url: &Url, token: &str, payload: &str) -> S3Result<Vec<u8>> {
    let host = storage_url
        .host_str()
        .ok_or_else(|| s3_error!(InternalError, "swift storage url has no host"))?
        .to_owned();
    let https = storage_url.scheme() == "https";
    let port = storage_url.port().unwrap_or(if https { 443 } else { 80 });
    let path = storage_url.path();

    let request = format!(
        "POST {path}?bulk-delete HTTP/1.1\r\n\
         Host: {host}\r\n\
         X-Auth-Token: {token}\r\n\
         Content-Type: text/plain\r\n\
         Accept: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{payload}",
        payload.len(),
    );

    let stream = tokio::net::TcpStream::connect((host.as_str(), port))
        .await
        .map_err(|e| s3_error!(e, InternalError, "bulk delete connect failure").retryable())?;

    let mut raw = Vec::new();
    if https {
        let mut roots = tokio_rustls::rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = tokio_rustls::rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = tokio_rustls::TlsConnector::from(Arc::new(config));
        let server_name = tokio_rustls::rustls::pki_types::ServerName::try_from(host.clone())
            .map_err(|e| s3_error!(e, InternalError, "invalid TLS server name"))?;
        let mut tls = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| s3_error!(e, InternalError, "bulk delete TLS failure").retryable())?;
        tls.write_all(request.as_bytes())
            .await
            .map_err(|e| s3_error!(e, InternalError, "bulk delete write failure").retryable())?;
        tls.read_to_end(&mut raw)
            .await
            .map_err(|e| s3_error!(e, InternalError, "bulk delete read failure").retryable())?;
    } else {
        let mut stream = stream;
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|e| s3_error!(e, InternalError, "bulk delete write failure").retryable())?;
        stream
            .read_to_end(&mut raw)
            .await
            .map_err(|e| s3_error!(e, InternalError, "bulk delete read failure").retryable())?;
    }

    parse_raw_response(&raw)
}

/// Splits a raw HTTP/1.x response into status + body, stripping chunked
/// markers when present.
fn parse_raw_response(raw: &[u8]) -> S3Result<Vec<u8>> {
    let mut header_buf = [httparse::EMPTY_HEADER; 32];
    let mut parsed = httparse::Response::new(&mut header_buf);
    let body_offset = match parsed
        .parse(raw)
        .map_err(|e| s3_error!(e, InternalError, "unparseable bulk-delete response head"))?
    {
        httparse::Status::Complete(offset) => offset,
        httparse::Status::Partial => {
            return Err(s3_error!(InternalError, "truncated bulk-delete response"));
        }
    };

    let status = parsed.code.unwrap_or(500);
    if !(200..300).contains(&status) {
        return Err(s3_error!(InternalError, "bulk delete returned {}", status).retryable());
    }

    let chunked = parsed.headers.iter().any(|h| {
        h.name.eq_ignore_ascii_case("transfer-encoding")
            && std::str::from_utf8(h.value).is_ok_and(|v| v.eq_ignore_ascii_case("chunked"))
    });

    let body = &raw[body_offset..];
    if chunked {
        strip_chunked(body)
    } else {
        Ok(body.to_vec())
    }
}

/// Decodes a chunked transfer-encoded body.
fn strip_chunked(mut body: &[u8]) -> S3Result<Vec<u8>> {
    let mut out = Vec::with_capacity(body.len());
    loop {
        let Some(line_end) = body.windows(2).position(|w| w == b"\r\n") else {
            return Err(s3_error!(InternalError, "malformed chunked body"));
        };
        let size_line = std::str::from_utf8(&body[..line_end])
            .map_err(|_| s3_error!(InternalError, "malformed chunk size"))?;
        let size = usize::from_str_radix(size_line.split(';').next().unwrap_or("").trim(), 16)
            .map_err(|_| s3_error!(InternalError, "malformed chunk size"))?;
        body = &body[line_end + 2..];
        if size == 0 {
            return Ok(out);
        }
        if body.len() < size + 2 {
            return Err(s3_error!(InternalError, "truncated chunk"));
        }
        out.extend_from_slice(&body[..size]);
        body = &body[size + 2..];
    }
}

/// DeleteObjects: Swift bulk-delete, answered with `<DeleteResult>`.
pub async fn delete_objects(client: &SwiftClient<'_>, body: &Bytes) -> S3Result<Response> {
    let doc = parse_delete_xml(body)?;
    let keys: Vec<String> = doc.objects.iter().map(|o| o.key.clone()).collect();

    let outcome = bulk_delete_paths(client, &keys).await?;
    let container = client.container();

    let mut s = xml::Serializer::with_decl();
    s.element_ns("DeleteResult", xml::S3_XMLNS, |s| {
        for key in &keys {
            let path = format!("{container}/{key}");
            if let Some(&status) = outcome.errors.get(&path) {
                s.element("Error", |s| {
                    s.text_element("Key", key);
                    s.text_element("Code", map_error_code(status));
                    s.text_element("Message", &format!("swift rejected the delete with status {status}"));
                });
            } else if !doc.quiet {
                s.element("Deleted", |s| {
                    s.text_element("Key", key);
                });
            }
        }
    });

    let mut out = Response::with_status(StatusCode::OK);
    out.set_xml_body(s.finish());
    Ok(out)
}
