//! Multipart upload over Swift Static Large Objects.
//!
//! Swift has no multipart protocol, so the gateway simulates one. Each
//! upload is tracked by a session file at
//! `.herald/multipart/{uploadId}.json` inside the target container; part
//! bodies land at `{object}/{partNumber}`. Complete builds an SLO manifest
//! from the session and PUTs it with `?multipart-manifest=put`, and Swift
//! assembles the logical object. A missing session means the upload does
//! not exist.

use super::buckets::container_page;
use super::client::SwiftClient;
use super::convert::{self, Target};
use super::require_key;

use crate::dto::{Timestamp, TimestampFormat, quote_etag, unquote_etag};
use crate::header;
use crate::http::Response;
use crate::resolver::GatewayRequest;
use crate::xml;
use crate::{S3Error, S3Result};

use bytes::Bytes;
use http::HeaderMap;
use http::HeaderValue;
use http::Method;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const SESSION_PREFIX: &str = ".herald/multipart/";
const MAX_PART_NUMBER: u32 = 10_000;
const DEFAULT_MAX_PARTS: usize = 1000;
const DEFAULT_MAX_UPLOADS: usize = 1000;

/// The persisted state of one simulated multipart upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartSession {
    pub upload_id: String,
    pub bucket: String,
    pub object_key: String,
    pub initiated: String,
    pub initiator: String,
    pub owner: String,
    pub storage_class: String,
    #[serde(default)]
    pub parts: Vec<SessionPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPart {
    pub part_number: u32,
    pub e_tag: String,
    pub size: u64,
    pub last_modified: String,
}

impl MultipartSession {
    /// Inserts a part, replacing any existing entry with the same number
    /// (the last writer wins, matching S3 UploadPart semantics).
    pub fn upsert_part(&mut self, part: SessionPart) {
        self.parts.retain(|p| p.part_number != part.part_number);
        self.parts.push(part);
    }

    /// Parts sorted ascending by part number, the SLO manifest order.
    #[must_use]
    pub fn sorted_parts(&self) -> Vec<&SessionPart> {
        let mut parts: Vec<&SessionPart> = self.parts.iter().collect();
        parts.sort_by_key(|p| p.part_number);
        parts
    }
}

fn session_key(upload_id: &str) -> String {
    format!("{SESSION_PREFIX}{upload_id}.json")
}

/// The client's `<CompleteMultipartUpload>` document. The manifest is built
/// from the session, but a malformed body is still rejected up front.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CompleteUploadXml {
    #[serde(rename = "Part", default)]
    parts: Vec<CompleteUploadPartXml>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CompleteUploadPartXml {
    part_number: u32,
    #[serde(rename = "ETag", default)]
    e_tag: Option<String>,
}

fn parse_complete_body(body: &[u8]) -> S3Result<Option<CompleteUploadXml>> {
    if body.is_empty() {
        return Ok(None);
    }
    let text = std::str::from_utf8(body).map_err(|_| s3_error!(MalformedXML, "request body is not UTF-8"))?;
    let doc: CompleteUploadXml =
        quick_xml::de::from_str(text).map_err(|e| s3_error!(e, MalformedXML, "invalid CompleteMultipartUpload body"))?;
    Ok(Some(doc))
}

fn require_upload_id(req: &GatewayRequest) -> S3Result<&str> {
    req.meta
        .query
        .get("uploadId")
        .ok_or_else(|| invalid_request!("missing uploadId"))
}

/// Builds the Swift SLO manifest for the session's parts.
#[must_use]
pub fn build_slo_manifest(container: &str, object_key: &str, session: &MultipartSession) -> serde_json::Value {
    let entries: Vec<serde_json::Value> = session
        .sorted_parts()
        .into_iter()
        .map(|part| {
            serde_json::json!({
                "path": format!("/{container}/{object_key}/{}", part.part_number),
                "etag": unquote_etag(&part.e_tag),
                "size_bytes": part.size,
            })
        })
        .collect();
    serde_json::Value::Array(entries)
}

async fn read_session(client: &SwiftClient<'_>, upload_id: &str) -> S3Result<Option<MultipartSession>> {
    let path = client.object_path(&session_key(upload_id));
    let mut resp = client.request(&Method::GET, &path, &[]).await?;
    match resp.status.as_u16() {
        200 => {
            let bytes = resp.body.store_all().await.map_err(S3Error::internal_error)?;
            let session = serde_json::from_slice(&bytes)
                .map_err(|e| s3_error!(e, InternalError, "corrupt multipart session {}", upload_id))?;
            Ok(Some(session))
        }
        404 => Ok(None),
        _ => Err(convert::convert_error(resp.status, Target::Upload)),
    }
}

async fn write_session(client: &SwiftClient<'_>, session: &MultipartSession) -> S3Result<()> {
    let path = client.object_path(&session_key(&session.upload_id));
    let body = serde_json::to_vec(session).map_err(|e| s3_error!(e, InternalError, "session encode failure"))?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let resp = client.send(&Method::PUT, &path, &[], &headers, Bytes::from(body)).await?;
    if !resp.status.is_success() {
        return Err(convert::convert_error(resp.status, Target::Upload));
    }
    Ok(())
}

async fn delete_session(client: &SwiftClient<'_>, upload_id: &str) -> S3Result<bool> {
    let path = client.object_path(&session_key(upload_id));
    let resp = client.request(&Method::DELETE, &path, &[]).await?;
    match resp.status.as_u16() {
        200 | 204 => Ok(true),
        404 => Ok(false),
        _ => Err(convert::convert_error(resp.status, Target::Upload)),
    }
}

/// CreateMultipartUpload: mint an uploadId, persist the initial session,
/// answer `<InitiateMultipartUploadResult>`.
pub async fn create_multipart_upload(client: &SwiftClient<'_>, req: &GatewayRequest) -> S3Result<Response> {
    let key = require_key(req)?;
    let upload_id = uuid::Uuid::new_v4().to_string();

    let session = MultipartSession {
        upload_id: upload_id.clone(),
        bucket: client.bucket_name().to_owned(),
        object_key: key.to_owned(),
        initiated: Timestamp::now().to_string_format(TimestampFormat::DateTime),
        initiator: client.bucket_name().to_owned(),
        owner: client.bucket_name().to_owned(),
        storage_class: "STANDARD".to_owned(),
        parts: Vec::new(),
    };
    write_session(client, &session).await?;
    debug!(upload_id = %upload_id, key, "opened multipart upload");

    let mut s = xml::Serializer::with_decl();
    s.element_ns("InitiateMultipartUploadResult", xml::S3_XMLNS, |s| {
        s.text_element("Bucket", client.bucket_name());
        s.text_element("Key", key);
        s.text_element("UploadId", &upload_id);
    });

    let mut out = Response::with_status(StatusCode::OK);
    out.set_xml_body(s.finish());
    Ok(out)
}

/// UploadPart: PUT the body at `{object}/{partNumber}`, then fold the part
/// into the session (replace-by-partNumber).
pub async fn upload_part(client: &SwiftClient<'_>, mut req: GatewayRequest) -> S3Result<Response> {
    let key = require_key(&req)?.to_owned();
    let upload_id = require_upload_id(&req)?.to_owned();
    let part_number: u32 = req
        .meta
        .query
        .get("partNumber")
        .and_then(|v| v.parse().ok())
        .filter(|&n| (1..=MAX_PART_NUMBER).contains(&n))
        .ok_or_else(|| s3_error!(InvalidArgument, "partNumber must be an integer between 1 and 10000"))?;

    let size: u64 = req
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| atoi::atoi::<u64>(v.as_bytes()))
        .unwrap_or(0);

    let part_path = client.object_path(&format!("{key}/{part_number}"));
    let mut headers = HeaderMap::new();
    if let Some(value) = req.headers.get(header::CONTENT_LENGTH) {
        headers.insert(header::CONTENT_LENGTH, value.clone());
    }

    let body = std::mem::take(&mut req.body);
    let resp = client.send_streaming(&Method::PUT, &part_path, &[], headers, body).await?;
    if !matches!(resp.status.as_u16(), 200 | 201) {
        return Err(convert::convert_error(resp.status, Target::Object));
    }
    let etag = convert::require_header(&resp, header::ETAG)?.to_owned();

    let Some(mut session) = read_session(client, &upload_id).await? else {
        return Err(s3_error!(NoSuchUpload, "upload {} does not exist", upload_id));
    };
    session.upsert_part(SessionPart {
        part_number,
        e_tag: etag.clone(),
        size,
        last_modified: Timestamp::now().to_string_format(TimestampFormat::DateTime),
    });
    write_session(client, &session).await?;

    let mut out = Response::with_status(StatusCode::OK);
    out.set_header(header::ETAG, &quote_etag(&etag));
    out.set_header(header::CONTENT_LENGTH, "0");
    Ok(out)
}

fn complete_result(client: &SwiftClient<'_>, key: &str, etag: &str) -> Response {
    let mut s = xml::Serializer::with_decl();
    s.element_ns("CompleteMultipartUploadResult", xml::S3_XMLNS, |s| {
        s.text_element("Location", client.region());
        s.text_element("Bucket", client.bucket_name());
        s.text_element("Key", key);
        s.text_element("ETag", &quote_etag(etag));
    });
    let mut out = Response::with_status(StatusCode::OK);
    out.set_xml_body(s.finish());
    out
}

/// CompleteMultipartUpload: build the SLO manifest from the session, PUT it
/// with `?multipart-manifest=put`, drop the session.
///
/// Idempotent: when the session is already gone but the manifest object
/// exists, the stored ETag is returned again. Part objects are left in
/// place, since Swift needs them while it assembles the SLO.
pub async fn complete_multipart_upload(
    client: &SwiftClient<'_>,
    req: &GatewayRequest,
    body: &Bytes,
) -> S3Result<Response> {
    let key = require_key(req)?;
    let upload_id = require_upload_id(req)?;
    let object_path = client.object_path(key);

    let declared = parse_complete_body(body)?;
    if let Some(ref doc) = declared
        && doc.parts.is_empty()
    {
        return Err(s3_error!(MalformedXML, "CompleteMultipartUpload names no parts"));
    }

    let Some(session) = read_session(client, upload_id).await? else {
        // a second Complete for an already-assembled upload answers with
        // the existing manifest's ETag
        let head = client.request(&Method::HEAD, &object_path, &[]).await?;
        if head.status.is_success() {
            let etag = convert::require_header(&head, header::ETAG)?;
            return Ok(complete_result(client, key, etag));
        }
        return Err(s3_error!(NoSuchUpload, "upload {} does not exist", upload_id));
    };

    if session.parts.is_empty() {
        return Err(s3_error!(MalformedXML, "multipart upload {} has no parts", upload_id));
    }

    // every declared part must have been uploaded, with a matching ETag
    if let Some(ref doc) = declared {
        for declared_part in &doc.parts {
            let Some(stored) = session.parts.iter().find(|p| p.part_number == declared_part.part_number) else {
                return Err(s3_error!(InvalidPart, "part {} was not uploaded", declared_part.part_number));
            };
            if let Some(ref e_tag) = declared_part.e_tag
                && unquote_etag(e_tag) != unquote_etag(&stored.e_tag)
            {
                return Err(s3_error!(InvalidPart, "part {} ETag does not match", declared_part.part_number));
            }
        }
    }

    let manifest = build_slo_manifest(client.container(), key, &session);
    let manifest_bytes =
        serde_json::to_vec(&manifest).map_err(|e| s3_error!(e, InternalError, "manifest encode failure"))?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let query = [("multipart-manifest".to_owned(), "put".to_owned())];
    let resp = client
        .send(&Method::PUT, &object_path, &query, &headers, Bytes::from(manifest_bytes))
        .await?;
    if !matches!(resp.status.as_u16(), 200 | 201) {
        return Err(convert::convert_error(resp.status, Target::Object));
    }

    // fetch the assembled ETag; fall back to HEAD when the PUT response
    // carries none
    let etag = match resp.header_str(header::ETAG) {
        Some(etag) => etag.to_owned(),
        None => {
            let head = client.request(&Method::HEAD, &object_path, &[]).await?;
            convert::require_header(&head, header::ETAG)?.to_owned()
        }
    };

    if let Err(err) = delete_session(client, upload_id).await {
        warn!(upload_id, %err, "failed to remove completed multipart session");
    }

    Ok(complete_result(client, key, &etag))
}

/// AbortMultipartUpload: drop the session, bulk-delete any uploaded parts,
/// answer 204.
pub async fn abort_multipart_upload(client: &SwiftClient<'_>, req: &GatewayRequest) -> S3Result<Response> {
    let key = require_key(req)?;
    let upload_id = require_upload_id(req)?;

    if !delete_session(client, upload_id).await? {
        return Err(s3_error!(NoSuchUpload, "upload {} does not exist", upload_id));
    }

    // best-effort cleanup of part objects
    let prefix = format!("{key}/");
    match container_page(client, Some(&prefix), None, None, DEFAULT_MAX_PARTS).await {
        Ok(entries) => {
            let paths: Vec<String> = entries.iter().filter_map(|e| e.name.clone()).collect();
            if !paths.is_empty()
                && let Err(err) = super::bulk_delete::bulk_delete_paths(client, &paths).await
            {
                warn!(upload_id, %err, "failed to clean up aborted parts");
            }
        }
        Err(err) => warn!(upload_id, %err, "failed to list aborted parts"),
    }

    Ok(Response::with_status(StatusCode::NO_CONTENT))
}

/// ListParts: the session must exist; parts come from the container listing
/// under `{object}/`, sorted numerically.
pub async fn list_parts(client: &SwiftClient<'_>, req: &GatewayRequest) -> S3Result<Response> {
    let key = require_key(req)?;
    let upload_id = require_upload_id(req)?;

    if read_session(client, upload_id).await?.is_none() {
        return Err(s3_error!(NoSuchUpload, "upload {} does not exist", upload_id));
    }

    let marker: u32 = req
        .meta
        .query
        .get("part-number-marker")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let max_parts: usize = req
        .meta
        .query
        .get("max-parts")
        .and_then(|v| v.parse().ok())
        .filter(|&n| n > 0)
        .map_or(DEFAULT_MAX_PARTS, |n: usize| n.min(DEFAULT_MAX_PARTS));

    let prefix = format!("{key}/");
    let entries = container_page(client, Some(&prefix), None, None, DEFAULT_MAX_PARTS).await?;

    // {object}/{N}: anything deeper or non-numeric is not a part
    let mut parts: Vec<(u32, &super::buckets::SwiftEntry)> = entries
        .iter()
        .filter_map(|entry| {
            let name = entry.name.as_deref()?;
            let suffix = name.strip_prefix(&prefix)?;
            let number: u32 = suffix.parse().ok()?;
            Some((number, entry))
        })
        .filter(|&(n, _)| n > marker)
        .collect();
    parts.sort_by_key(|&(n, _)| n);

    let is_truncated = parts.len() > max_parts;
    parts.truncate(max_parts);
    let next_marker = parts.last().map(|&(n, _)| n);

    let mut s = xml::Serializer::with_decl();
    s.element_ns("ListPartsResult", xml::S3_XMLNS, |s| {
        s.text_element("Bucket", client.bucket_name());
        s.text_element("Key", key);
        s.text_element("UploadId", upload_id);
        s.text_element("StorageClass", "STANDARD");
        s.text_element("PartNumberMarker", &marker.to_string());
        if let Some(next) = next_marker {
            s.text_element("NextPartNumberMarker", &next.to_string());
        }
        s.text_element("MaxParts", &max_parts.to_string());
        s.text_element("IsTruncated", if is_truncated { "true" } else { "false" });
        for (number, entry) in &parts {
            s.element("Part", |s| {
                s.text_element("PartNumber", &number.to_string());
                s.text_element("LastModified", &swift_listing_time(entry));
                s.text_element("ETag", &quote_etag(entry.hash.as_deref().unwrap_or("")));
                s.text_element("Size", &entry.bytes.unwrap_or(0).to_string());
            });
        }
    });

    let mut out = Response::with_status(StatusCode::OK);
    out.set_xml_body(s.finish());
    Ok(out)
}

fn swift_listing_time(entry: &super::buckets::SwiftEntry) -> String {
    entry
        .last_modified
        .as_deref()
        .and_then(|v| Timestamp::parse(TimestampFormat::SwiftDateTime, v).ok())
        .unwrap_or_else(Timestamp::now)
        .to_string_format(TimestampFormat::DateTime)
}

struct UploadFilters {
    prefix: Option<String>,
    key_marker: Option<String>,
    upload_id_marker: Option<String>,
    delimiter: Option<String>,
    max_uploads: usize,
}

fn upload_filters(req: &GatewayRequest) -> UploadFilters {
    let q = &req.meta.query;
    UploadFilters {
        prefix: q.get("prefix").map(str::to_owned),
        key_marker: q.get("key-marker").map(str::to_owned),
        upload_id_marker: q.get("upload-id-marker").map(str::to_owned),
        delimiter: q.get("delimiter").map(str::to_owned),
        max_uploads: q
            .get("max-uploads")
            .and_then(|v| v.parse().ok())
            .filter(|&n| n > 0)
            .map_or(DEFAULT_MAX_UPLOADS, |n: usize| n.min(DEFAULT_MAX_UPLOADS)),
    }
}

/// Applies prefix/marker filtering and `(key, uploadId)` ordering to the
/// open sessions.
fn filter_sessions(mut sessions: Vec<MultipartSession>, filters: &UploadFilters) -> Vec<MultipartSession> {
    if let Some(ref prefix) = filters.prefix {
        sessions.retain(|s| s.object_key.starts_with(prefix.as_str()));
    }
    if let Some(ref key_marker) = filters.key_marker {
        let upload_id_marker = filters.upload_id_marker.as_deref().unwrap_or("");
        sessions.retain(|s| {
            s.object_key.as_str() > key_marker.as_str()
                || (s.object_key.as_str() == key_marker.as_str()
                    && !upload_id_marker.is_empty()
                    && s.upload_id.as_str() > upload_id_marker)
        });
    }
    sessions.sort_by(|a, b| {
        a.object_key
            .cmp(&b.object_key)
            .then_with(|| a.upload_id.cmp(&b.upload_id))
    });
    sessions
}

/// ListMultipartUploads: every session file under `.herald/multipart/` is a
/// live upload.
pub async fn list_multipart_uploads(client: &SwiftClient<'_>, req: &GatewayRequest) -> S3Result<Response> {
    let filters = upload_filters(req);

    let entries = container_page(client, Some(SESSION_PREFIX), None, None, DEFAULT_MAX_UPLOADS).await?;
    let mut sessions = Vec::with_capacity(entries.len());
    for entry in &entries {
        let Some(name) = entry.name.as_deref() else { continue };
        let Some(upload_id) = name
            .strip_prefix(SESSION_PREFIX)
            .and_then(|s| s.strip_suffix(".json"))
        else {
            continue;
        };
        match read_session(client, upload_id).await {
            Ok(Some(session)) => sessions.push(session),
            Ok(None) => {}
            Err(err) => warn!(upload_id, %err, "skipping unreadable multipart session"),
        }
    }

    let sessions = filter_sessions(sessions, &filters);
    let is_truncated = sessions.len() > filters.max_uploads;
    let sessions = &sessions[..sessions.len().min(filters.max_uploads)];

    // group keys behind the delimiter into CommonPrefixes, like ListObjects
    let mut common_prefixes: Vec<String> = Vec::new();
    let mut uploads: Vec<&MultipartSession> = Vec::new();
    if let Some(ref delimiter) = filters.delimiter {
        let base = filters.prefix.as_deref().unwrap_or("");
        for session in sessions {
            let rest = &session.object_key[base.len()..];
            if let Some(idx) = rest.find(delimiter.as_str()) {
                let prefix = format!("{base}{}{delimiter}", &rest[..idx]);
                if common_prefixes.last() != Some(&prefix) {
                    common_prefixes.push(prefix);
                }
            } else {
                uploads.push(session);
            }
        }
    } else {
        uploads.extend(sessions.iter());
    }

    let next_key_marker = uploads.last().map(|s| s.object_key.clone());
    let next_upload_id_marker = uploads.last().map(|s| s.upload_id.clone());

    let mut s = xml::Serializer::with_decl();
    s.element_ns("ListMultipartUploadsResult", xml::S3_XMLNS, |s| {
        s.text_element("Bucket", client.bucket_name());
        s.text_element("KeyMarker", filters.key_marker.as_deref().unwrap_or(""));
        s.text_element("UploadIdMarker", filters.upload_id_marker.as_deref().unwrap_or(""));
        if let Some(ref marker) = next_key_marker {
            s.text_element("NextKeyMarker", marker);
        }
        if let Some(ref marker) = next_upload_id_marker {
            s.text_element("NextUploadIdMarker", marker);
        }
        if let Some(ref delimiter) = filters.delimiter {
            s.text_element("Delimiter", delimiter);
        }
        if let Some(ref prefix) = filters.prefix {
            s.text_element("Prefix", prefix);
        }
        s.text_element("MaxUploads", &filters.max_uploads.to_string());
        s.text_element("IsTruncated", if is_truncated { "true" } else { "false" });
        for upload in &uploads {
            s.element("Upload", |s| {
                s.text_element("Key", &upload.object_key);
                s.text_element("UploadId", &upload.upload_id);
                s.element("Initiator", |s| {
                    s.text_element("ID", &upload.initiator);
                    s.text_element("DisplayName", &upload.initiator);
                });
                s.element("Owner", |s| {
                    s.text_element("ID", &upload.owner);
                    s.text_element("DisplayName", &upload.owner);
                });
                s.text_element("StorageClass", &upload.storage_class);
                s.text_element("Initiated", &upload.initiated);
            });
        }
        for prefix in &common_prefixes {
            s.element("CommonPrefixes", |s| {
                s.text_element("Prefix", prefix);
            });
        }
    });

    let mut out = Response::with_status(StatusCode::OK);
    out.set_xml_body(s.finish());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(upload_id: &str, key: &str) -> MultipartSession {
        MultipartSession {
            upload_id: upload_id.to_owned(),
            bucket: "b".to_owned(),
            object_key: key.to_owned(),
            initiated: "2025-03-01T00:00:00.000Z".to_owned(),
            initiator: "b".to_owned(),
            owner: "b".to_owned(),
            storage_class: "STANDARD".to_owned(),
            parts: Vec::new(),
        }
    }

    fn part(n: u32, etag: &str, size: u64) -> SessionPart {
        SessionPart {
            part_number: n,
            e_tag: etag.to_owned(),
            size,
            last_modified: "2025-03-01T00:00:00.000Z".to_owned(),
        }
    }

    #[test]
    fn upsert_replaces_by_part_number() {
        let mut s = session("u1", "k");
        s.upsert_part(part(2, "b", 10));
        s.upsert_part(part(1, "a", 10));
        s.upsert_part(part(2, "b2", 20));
        assert_eq!(s.parts.len(), 2);

        let sorted = s.sorted_parts();
        assert_eq!(sorted[0].part_number, 1);
        assert_eq!(sorted[1].part_number, 2);
        assert_eq!(sorted[1].e_tag, "b2");
        assert_eq!(sorted[1].size, 20);
    }

    #[test]
    fn manifest_is_sorted_and_unquoted() {
        let mut s = session("u1", "a b/c.bin");
        s.upsert_part(part(10, "\"ff\"", 5));
        s.upsert_part(part(2, "aa", 7));

        let manifest = build_slo_manifest("cont", "a b/c.bin", &s);
        let entries = manifest.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["path"], "/cont/a b/c.bin/2");
        assert_eq!(entries[0]["etag"], "aa");
        assert_eq!(entries[0]["size_bytes"], 7);
        assert_eq!(entries[1]["path"], "/cont/a b/c.bin/10");
        assert_eq!(entries[1]["etag"], "ff");
    }

    #[test]
    fn session_json_uses_camel_case() {
        let mut s = session("u1", "k");
        s.upsert_part(part(1, "aa", 5));
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["uploadId"], "u1");
        assert_eq!(json["objectKey"], "k");
        assert_eq!(json["storageClass"], "STANDARD");
        assert_eq!(json["parts"][0]["partNumber"], 1);
        assert_eq!(json["parts"][0]["eTag"], "aa");

        let back: MultipartSession = serde_json::from_value(json).unwrap();
        assert_eq!(back.parts.len(), 1);
    }

    #[test]
    fn complete_body_parsing() {
        assert!(parse_complete_body(b"").unwrap().is_none());

        let doc = parse_complete_body(
            br#"<CompleteMultipartUpload>
                <Part><PartNumber>1</PartNumber><ETag>"aa"</ETag></Part>
                <Part><PartNumber>2</PartNumber><ETag>"bb"</ETag></Part>
            </CompleteMultipartUpload>"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(doc.parts.len(), 2);
        assert_eq!(doc.parts[0].part_number, 1);
        assert_eq!(doc.parts[1].e_tag.as_deref(), Some("\"bb\""));

        let err = parse_complete_body(b"<oops").unwrap_err();
        assert_eq!(err.code(), crate::S3ErrorCode::MalformedXML);
    }

    #[test]
    fn filter_sessions_orders_and_markers() {
        let sessions = vec![session("u2", "b"), session("u1", "b"), session("u9", "a")];
        let filters = UploadFilters {
            prefix: None,
            key_marker: None,
            upload_id_marker: None,
            delimiter: None,
            max_uploads: 10,
        };
        let sorted = filter_sessions(sessions.clone(), &filters);
        assert_eq!(sorted[0].object_key, "a");
        assert_eq!(sorted[1].upload_id, "u1");
        assert_eq!(sorted[2].upload_id, "u2");

        let filters = UploadFilters {
            prefix: None,
            key_marker: Some("a".to_owned()),
            upload_id_marker: None,
            delimiter: None,
            max_uploads: 10,
        };
        let after_a = filter_sessions(sessions.clone(), &filters);
        assert!(after_a.iter().all(|s| s.object_key.as_str() > "a"));

        let filters = UploadFilters {
            prefix: Some("b".to_owned()),
            key_marker: None,
            upload_id_marker: None,
            delimiter: None,
            max_uploads: 10,
        };
        let only_b = filter_sessions(sessions, &filters);
        assert_eq!(only_b.len(), 2);
    }
}
