//! Bucket operations and the container-listing translation.

use super::client::SwiftClient;
use super::convert::{self, Target};

use crate::dto::{Timestamp, TimestampFormat, quote_etag};
use crate::header;
use crate::http::Response;
use crate::resolver::GatewayRequest;
use crate::xml;
use crate::{S3Error, S3Result};

use http::Method;
use http::StatusCode;
use serde::Deserialize;

pub const DEFAULT_MAX_KEYS: usize = 1000;

/// One row of a Swift JSON container listing: either an object or, with a
/// delimiter, a `subdir` pseudo-entry.
#[derive(Debug, Clone, Deserialize)]
pub struct SwiftEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub bytes: Option<u64>,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub subdir: Option<String>,
}

impl SwiftEntry {
    fn s3_last_modified(&self) -> String {
        self.last_modified
            .as_deref()
            .and_then(|v| Timestamp::parse(TimestampFormat::SwiftDateTime, v).ok())
            .unwrap_or_else(Timestamp::now)
            .to_string_format(TimestampFormat::DateTime)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListStyle {
    V1,
    V2,
}

struct ListParams {
    prefix: Option<String>,
    delimiter: Option<String>,
    marker: Option<String>,
    max_keys: usize,
}

fn list_params(req: &GatewayRequest, style: ListStyle) -> ListParams {
    let q = &req.meta.query;
    let max_keys = q
        .get("max-keys")
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .map_or(DEFAULT_MAX_KEYS, |n| n.min(DEFAULT_MAX_KEYS));

    let marker = match style {
        ListStyle::V1 => q.get("marker").map(str::to_owned),
        // the continuation token wins over start-after, as on AWS
        ListStyle::V2 => q
            .get("continuation-token")
            .or_else(|| q.get("start-after"))
            .map(str::to_owned),
    };

    ListParams {
        prefix: q.get("prefix").map(str::to_owned),
        delimiter: q.get("delimiter").map(str::to_owned),
        marker,
        max_keys,
    }
}

/// Fetches one page of the container listing as parsed JSON entries.
pub async fn container_page(
    client: &SwiftClient<'_>,
    prefix: Option<&str>,
    delimiter: Option<&str>,
    marker: Option<&str>,
    limit: usize,
) -> S3Result<Vec<SwiftEntry>> {
    let mut query: Vec<(String, String)> = vec![
        ("format".to_owned(), "json".to_owned()),
        ("limit".to_owned(), limit.to_string()),
    ];
    if let Some(prefix) = prefix {
        query.push(("prefix".to_owned(), prefix.to_owned()));
    }
    if let Some(delimiter) = delimiter {
        query.push(("delimiter".to_owned(), delimiter.to_owned()));
    }
    if let Some(marker) = marker {
        query.push(("marker".to_owned(), marker.to_owned()));
    }

    let mut resp = client.request(&Method::GET, &client.container_path(), &query).await?;
    match resp.status.as_u16() {
        200 | 204 => {
            let bytes = resp.body.store_all().await.map_err(S3Error::internal_error)?;
            if bytes.is_empty() {
                return Ok(Vec::new());
            }
            serde_json::from_slice(&bytes)
                .map_err(|e| s3_error!(e, InternalError, "swift returned an unparseable listing"))
        }
        _ => Err(convert::convert_error(resp.status, Target::Bucket)),
    }
}

/// ListObjects / ListObjectsV2 over a Swift container listing.
///
/// `IsTruncated` follows the page-fill heuristic: a page of exactly
/// `max_keys` entries is reported as truncated.
pub async fn list_objects(client: &SwiftClient<'_>, req: &GatewayRequest, style: ListStyle) -> S3Result<Response> {
    let params = list_params(req, style);
    let entries = container_page(
        client,
        params.prefix.as_deref(),
        params.delimiter.as_deref(),
        params.marker.as_deref(),
        params.max_keys,
    )
    .await?;

    let is_truncated = entries.len() == params.max_keys;
    let last_key = entries
        .iter()
        .rev()
        .find_map(|e| e.name.as_deref().or(e.subdir.as_deref()))
        .map(str::to_owned);

    let objects: Vec<&SwiftEntry> = entries.iter().filter(|e| e.name.is_some()).collect();
    let common_prefixes: Vec<&str> = entries.iter().filter_map(|e| e.subdir.as_deref()).collect();

    let mut s = xml::Serializer::with_decl();
    s.element_ns("ListBucketResult", xml::S3_XMLNS, |s| {
        s.text_element("Name", client.bucket_name());
        s.text_element("Prefix", params.prefix.as_deref().unwrap_or(""));
        if let Some(ref delimiter) = params.delimiter {
            s.text_element("Delimiter", delimiter);
        }
        s.text_element("MaxKeys", &params.max_keys.to_string());
        s.text_element("IsTruncated", if is_truncated { "true" } else { "false" });

        match style {
            ListStyle::V1 => {
                s.text_element("Marker", params.marker.as_deref().unwrap_or(""));
                if is_truncated && let Some(ref last) = last_key {
                    s.text_element("NextMarker", last);
                }
            }
            ListStyle::V2 => {
                s.text_element("KeyCount", &objects.len().to_string());
                if let Some(token) = req.meta.query.get("continuation-token") {
                    s.text_element("ContinuationToken", token);
                }
                if is_truncated && let Some(ref last) = last_key {
                    s.text_element("NextContinuationToken", last);
                }
            }
        }

        for entry in &objects {
            s.element("Contents", |s| {
                s.text_element("Key", entry.name.as_deref().unwrap_or(""));
                s.text_element("LastModified", &entry.s3_last_modified());
                s.text_element("ETag", &quote_etag(entry.hash.as_deref().unwrap_or("")));
                s.text_element("Size", &entry.bytes.unwrap_or(0).to_string());
                s.text_element("StorageClass", "STANDARD");
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

/// CreateBucket: Swift `PUT /c` (201/202) → S3 200 with a `Location`.
pub async fn create_bucket(client: &SwiftClient<'_>) -> S3Result<Response> {
    let resp = client.request(&Method::PUT, &client.container_path(), &[]).await?;
    match resp.status.as_u16() {
        200 | 201 | 202 => {
            let mut s = xml::Serializer::with_decl();
            s.element_ns("CreateBucketConfiguration", xml::S3_XMLNS, |s| {
                s.text_element("Location", &format!("/{}", client.bucket_name()));
            });

            let mut out = Response::with_status(StatusCode::OK);
            out.set_header(header::LOCATION, &format!("/{}", client.bucket_name()));
            out.set_xml_body(s.finish());
            Ok(out)
        }
        _ => Err(convert::convert_create_bucket_error(resp.status)),
    }
}

/// DeleteBucket: Swift `DELETE /c` → 204.
pub async fn delete_bucket(client: &SwiftClient<'_>) -> S3Result<Response> {
    let resp = client.request(&Method::DELETE, &client.container_path(), &[]).await?;
    match resp.status.as_u16() {
        204 | 200 => Ok(Response::with_status(StatusCode::NO_CONTENT)),
        _ => Err(convert::convert_error(resp.status, Target::Bucket)),
    }
}

/// HeadBucket: Swift `HEAD /c` (2xx) → S3 200 with the bucket-region
/// header set.
pub async fn head_bucket(client: &SwiftClient<'_>) -> S3Result<Response> {
    let resp = client.request(&Method::HEAD, &client.container_path(), &[]).await?;
    if !resp.status.is_success() {
        return Err(convert::convert_error(resp.status, Target::Bucket));
    }
    let mut out = Response::with_status(StatusCode::OK);
    out.set_header(header::X_AMZ_BUCKET_REGION, client.region());
    out.set_header(header::X_AMZ_BUCKET_LOCATION_TYPE, "AvailabilityZone");
    out.set_header(header::X_AMZ_BUCKET_LOCATION_NAME, client.region());
    Ok(out)
}
