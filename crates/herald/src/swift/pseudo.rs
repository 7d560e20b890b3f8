//! Bucket pseudo-endpoints.
//!
//! Swift has no counterpart for most S3 bucket sub-resources, so these
//! handlers synthesize the XML shapes standard S3 clients validate against.
//! ACL, tagging and encryption are derived from container headers; the rest
//! are canned empties. PUTs are accepted and discarded with 200.

use super::client::SwiftClient;
use super::convert::{self, Target};

use crate::header;
use crate::http::Response;
use crate::resolver::GatewayRequest;
use crate::xml;
use crate::S3Result;

use http::HeaderValue;
use http::Method;
use http::StatusCode;

fn xml_response(body: String) -> Response {
    let mut out = Response::with_status(StatusCode::OK);
    out.set_xml_body(body);
    out
}

fn empty_config(root: &str) -> Response {
    let mut s = xml::Serializer::with_decl();
    s.element_ns(root, xml::S3_XMLNS, |_| {});
    xml_response(s.finish())
}

/// HEADs the container so header-derived endpoints see its metadata; 404
/// maps to `NoSuchBucket` like any bucket operation.
async fn head_container(client: &SwiftClient<'_>) -> S3Result<Response> {
    let resp = client.request(&Method::HEAD, &client.container_path(), &[]).await?;
    if !resp.status.is_success() {
        return Err(convert::convert_error(resp.status, Target::Bucket));
    }
    Ok(resp)
}

fn get_acl_body(owner: &str, container: &Response) -> String {
    let world_readable = container
        .header_str(header::X_CONTAINER_READ)
        .is_some_and(|v| v.contains(".r:*"));

    let mut s = xml::Serializer::with_decl();
    s.element_ns("AccessControlPolicy", xml::S3_XMLNS, |s| {
        s.element("Owner", |s| {
            s.text_element("ID", owner);
            s.text_element("DisplayName", owner);
        });
        s.element("AccessControlList", |s| {
            s.element("Grant", |s| {
                s.element("Grantee", |s| {
                    s.text_element("ID", owner);
                    s.text_element("DisplayName", owner);
                });
                s.text_element("Permission", "FULL_CONTROL");
            });
            if world_readable {
                s.element("Grant", |s| {
                    s.element("Grantee", |s| {
                        s.text_element("URI", "http://acs.amazonaws.com/groups/global/AllUsers");
                    });
                    s.text_element("Permission", "READ");
                });
            }
        });
    });
    s.finish()
}

fn get_tagging_body(container: &Response) -> String {
    let mut s = xml::Serializer::with_decl();
    s.element_ns("Tagging", xml::S3_XMLNS, |s| {
        s.element("TagSet", |s| {
            for (name, value) in &container.headers {
                let Some(suffix) = name.as_str().strip_prefix(header::X_CONTAINER_META_PREFIX) else {
                    continue;
                };
                // encryption metadata is surfaced via ?encryption, not as a tag
                if suffix.eq_ignore_ascii_case("encryption-type") {
                    continue;
                }
                if let Ok(value) = value.to_str() {
                    s.element("Tag", |s| {
                        s.text_element("Key", suffix);
                        s.text_element("Value", value);
                    });
                }
            }
        });
    });
    s.finish()
}

fn get_encryption_body(container: &Response) -> String {
    let algorithm = container
        .header_str(header::X_CONTAINER_META_ENCRYPTION_TYPE)
        .unwrap_or("AES256");

    let mut s = xml::Serializer::with_decl();
    s.element_ns("ServerSideEncryptionConfiguration", xml::S3_XMLNS, |s| {
        s.element("Rule", |s| {
            s.element("ApplyServerSideEncryptionByDefault", |s| {
                s.text_element("SSEAlgorithm", algorithm);
            });
        });
    });
    s.finish()
}

fn get_policy_response() -> Response {
    // GetBucketPolicy is the one sub-resource S3 serves as JSON
    let mut out = Response::with_status(StatusCode::OK);
    out.headers
        .insert(http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    out.body = r#"{"Version":"2012-10-17","Statement":[]}"#.into();
    out
}

fn request_payment_body() -> String {
    let mut s = xml::Serializer::with_decl();
    s.element_ns("RequestPaymentConfiguration", xml::S3_XMLNS, |s| {
        s.text_element("Payer", "BucketOwner");
    });
    s.finish()
}

/// Routes a `?acl`/`?versioning`/… bucket request to its canned handler.
pub async fn route_query_paramed(client: &SwiftClient<'_>, req: &GatewayRequest) -> S3Result<Response> {
    let q = &req.meta.query;

    // writes are accepted so clients' configuration calls succeed, but
    // nothing is stored
    if req.meta.method == Method::PUT {
        return Ok(Response::with_status(StatusCode::OK));
    }

    if q.has("acl") {
        let container = head_container(client).await?;
        return Ok(xml_response(get_acl_body(client.bucket_name(), &container)));
    }
    if q.has("tagging") {
        let container = head_container(client).await?;
        return Ok(xml_response(get_tagging_body(&container)));
    }
    if q.has("encryption") {
        let container = head_container(client).await?;
        return Ok(xml_response(get_encryption_body(&container)));
    }
    if q.has("policy") {
        head_container(client).await?;
        return Ok(get_policy_response());
    }
    if q.has("versioning") {
        return Ok(empty_config("VersioningConfiguration"));
    }
    if q.has("lifecycle") {
        return Ok(empty_config("LifecycleConfiguration"));
    }
    if q.has("cors") {
        return Ok(empty_config("CORSConfiguration"));
    }
    if q.has("replication") {
        return Ok(empty_config("ReplicationConfiguration"));
    }
    if q.has("object-lock") {
        return Ok(empty_config("ObjectLockConfiguration"));
    }
    if q.has("logging") {
        return Ok(empty_config("BucketLoggingStatus"));
    }
    if q.has("website") {
        return Ok(empty_config("WebsiteConfiguration"));
    }
    if q.has("accelerate") {
        return Ok(empty_config("AccelerateConfiguration"));
    }
    if q.has("requestPayment") {
        return Ok(xml_response(request_payment_body()));
    }

    Err(s3_error!(NotImplemented, "unsupported bucket sub-resource"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acl_reflects_container_read() {
        let mut container = Response::with_status(StatusCode::NO_CONTENT);
        container.set_header(header::X_CONTAINER_READ, ".r:*,.rlistings");
        let body = get_acl_body("demo", &container);
        assert!(body.contains("<Permission>FULL_CONTROL</Permission>"));
        assert!(body.contains("global/AllUsers"));

        let private = Response::with_status(StatusCode::NO_CONTENT);
        let body = get_acl_body("demo", &private);
        assert!(!body.contains("AllUsers"));
    }

    #[test]
    fn tagging_skips_encryption_meta() {
        let mut container = Response::with_status(StatusCode::NO_CONTENT);
        container.set_header("x-container-meta-team", "storage");
        container.set_header("x-container-meta-encryption-type", "AES256");
        let body = get_tagging_body(&container);
        assert!(body.contains("<Key>team</Key>"));
        assert!(body.contains("<Value>storage</Value>"));
        assert!(!body.contains("encryption"));
    }

    #[test]
    fn encryption_defaults_to_aes256() {
        let container = Response::with_status(StatusCode::NO_CONTENT);
        let body = get_encryption_body(&container);
        assert!(body.contains("<SSEAlgorithm>AES256</SSEAlgorithm>"));

        let mut container = Response::with_status(StatusCode::NO_CONTENT);
        container.set_header(header::X_CONTAINER_META_ENCRYPTION_TYPE, "aes-xts");
        let body = get_encryption_body(&container);
        assert!(body.contains("<SSEAlgorithm>aes-xts</SSEAlgorithm>"));
    }
}
