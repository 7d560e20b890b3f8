//! Inbound request classification.
//!
//! [`extract_request_info`] derives bucket, object key, URL format and the
//! ordered query multimap from the raw request line. Virtual-hosted-style
//! hosts look like `{bucket}.s3.{...}.com`; everything else (IP literals,
//! `localhost`, bare domains) is treated as path-style.

use crate::http::OrderedQs;
use crate::{S3Error, S3Result};

use std::net::{IpAddr, SocketAddr};

use http::HeaderMap;
use http::Method;
use http::Uri;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlFormat {
    VirtualHosted,
    Path,
}

/// The classified request line.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub bucket: Option<String>,
    pub object_key: Option<String>,
    pub url_format: UrlFormat,
    pub method: Method,
    pub query: OrderedQs,
    /// Percent-decoded URI path, as signed by the client.
    pub decoded_path: String,
    /// Host without the port, used for classification.
    pub host: String,
}

impl RequestMeta {
    #[must_use]
    pub fn is_mutating(&self) -> bool {
        self.method == Method::PUT || self.method == Method::POST || self.method == Method::DELETE
    }
}

fn host_without_port(host: &str) -> &str {
    // bracketed IPv6 literal keeps its brackets
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split_once(']').map_or(host, |(ip, _)| ip);
    }
    host.split_once(':').map_or(host, |(h, _)| h)
}

fn is_socket_addr_or_ip_addr(host: &str) -> bool {
    host.parse::<SocketAddr>().is_ok() || host.parse::<IpAddr>().is_ok()
}

/// Does the host follow the `{bucket}.s3.{...}.com` virtual-hosted shape?
///
/// The second label must be `s3`, the TLD `com`, and the bucket label must
/// not itself be `s3` (that is the service endpoint, which is path-style).
fn is_virtual_hosted(host: &str) -> bool {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 3 {
        return false;
    }
    labels[0] != "s3" && !labels[0].is_empty() && labels[1] == "s3" && labels[labels.len() - 1] == "com"
}

fn extract_host(uri: &Uri, headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::HOST) {
        return value.to_str().ok().map(str::to_owned);
    }
    // HTTP/2 carries the authority in the URI instead of a Host header
    uri.authority().map(|a| a.as_str().to_owned())
}

fn validate_method(method: &Method) -> S3Result<Method> {
    const ALLOWED: [Method; 5] = [Method::GET, Method::PUT, Method::POST, Method::DELETE, Method::HEAD];
    if ALLOWED.contains(method) {
        Ok(method.clone())
    } else {
        Err(invalid_request!("unsupported method: {}", method))
    }
}

/// Derives [`RequestMeta`] from the request line and headers.
pub fn extract_request_info(method: &Method, uri: &Uri, headers: &HeaderMap) -> S3Result<RequestMeta> {
    let method = validate_method(method)?;

    let Some(raw_host) = extract_host(uri, headers) else {
        return Err(invalid_request!("Invalid request: {}", uri));
    };
    let host = host_without_port(&raw_host).to_owned();

    let decoded_path = urlencoding::decode(uri.path())
        .map_err(|_| S3Error::new(crate::S3ErrorCode::InvalidURI))?
        .into_owned();

    let query = uri.query().map(OrderedQs::parse).unwrap_or_default();

    let path_style = is_socket_addr_or_ip_addr(&host) || host == "localhost" || !is_virtual_hosted(&host);

    let (url_format, bucket, object_key) = if path_style {
        let trimmed = decoded_path.trim_start_matches('/');
        let (bucket, key) = match trimmed.split_once('/') {
            Some((bucket, rest)) => (some_nonempty(bucket), some_nonempty(rest)),
            None => (some_nonempty(trimmed), None),
        };
        (UrlFormat::Path, bucket, key)
    } else {
        let bucket = host.split('.').next().map(str::to_owned);
        let key = some_nonempty(decoded_path.trim_start_matches('/'));
        (UrlFormat::VirtualHosted, bucket, key)
    };

    Ok(RequestMeta {
        bucket,
        object_key,
        url_format,
        method,
        query,
        decoded_path,
        host,
    })
}

fn some_nonempty(s: &str) -> Option<String> {
    if s.is_empty() { None } else { Some(s.to_owned()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(method: Method, uri: &str, host: &str) -> RequestMeta {
        let uri: Uri = uri.parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(http::header::HOST, host.parse().unwrap());
        extract_request_info(&method, &uri, &headers).unwrap()
    }

    #[test]
    fn path_style_rules() {
        let cases: &[(&str, &str, Option<&str>, Option<&str>)] = &[
            ("/", "localhost:8000", None, None),
            ("/demo", "localhost", Some("demo"), None),
            ("/demo/a/b.txt", "127.0.0.1:9000", Some("demo"), Some("a/b.txt")),
            ("/demo/k", "storage.internal", Some("demo"), Some("k")),
            // the bare service endpoint is path-style even though it mentions s3
            ("/demo/k", "s3.us-east-1.amazonaws.com", Some("demo"), Some("k")),
        ];
        for &(path, host, bucket, key) in cases {
            let m = meta(Method::GET, path, host);
            assert_eq!(m.url_format, UrlFormat::Path, "{host}{path}");
            assert_eq!(m.bucket.as_deref(), bucket, "{host}{path}");
            assert_eq!(m.object_key.as_deref(), key, "{host}{path}");
        }
    }

    #[test]
    fn virtual_hosted_rules() {
        let cases: &[(&str, &str, &str, Option<&str>)] = &[
            ("/", "demo.s3.us-east-1.amazonaws.com", "demo", None),
            ("/a/b.txt", "demo.s3.amazonaws.com", "demo", Some("a/b.txt")),
            ("/k", "demo.s3.example.com:9000", "demo", Some("k")),
        ];
        for &(path, host, bucket, key) in cases {
            let m = meta(Method::GET, path, host);
            assert_eq!(m.url_format, UrlFormat::VirtualHosted, "{host}{path}");
            assert_eq!(m.bucket.as_deref(), Some(bucket), "{host}{path}");
            assert_eq!(m.object_key.as_deref(), key, "{host}{path}");
        }
    }

    #[test]
    fn port_is_stripped_before_classification() {
        let m = meta(Method::GET, "/b/k", "demo.s3.example.com:8443");
        assert_eq!(m.url_format, UrlFormat::VirtualHosted);
        assert_eq!(m.host, "demo.s3.example.com");
    }

    #[test]
    fn ipv6_literal_is_path_style() {
        let m = meta(Method::GET, "/demo/k", "[::1]:9000");
        assert_eq!(m.url_format, UrlFormat::Path);
        assert_eq!(m.bucket.as_deref(), Some("demo"));
    }

    #[test]
    fn unknown_method_fails() {
        let uri: Uri = "/demo".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(http::header::HOST, "localhost".parse().unwrap());
        let err = extract_request_info(&Method::PATCH, &uri, &headers).unwrap_err();
        assert_eq!(err.code(), crate::S3ErrorCode::InvalidRequest);
    }

    #[test]
    fn missing_host_fails() {
        let uri: Uri = "/demo".parse().unwrap();
        let headers = HeaderMap::new();
        let err = extract_request_info(&Method::GET, &uri, &headers).unwrap_err();
        assert_eq!(err.code(), crate::S3ErrorCode::InvalidRequest);
    }

    #[test]
    fn query_multimap_preserved() {
        let m = meta(Method::GET, "/demo?list-type=2&prefix=a&prefix=b", "localhost");
        assert_eq!(m.query.get("list-type"), Some("2"));
        assert_eq!(m.query.get("prefix"), Some("a"));
        assert_eq!(m.query.get_unique("prefix"), None);
    }

    // Deterministic host/path sweep; every combination must classify without
    // panicking and obey the bucket/key derivation rule for its format.
    #[test]
    fn classification_sweep() {
        let hosts = [
            "localhost",
            "127.0.0.1",
            "[::1]:9000",
            "b1.s3.example.com",
            "b1.s3.eu-west-2.amazonaws.com",
            "s3.example.com",
            "example.org",
            "a.b",
        ];
        let paths = ["/", "/x", "/x/", "/x/y", "/x/y/z%20w"];
        for host in hosts {
            for path in paths {
                let m = meta(Method::GET, path, host);
                match m.url_format {
                    UrlFormat::VirtualHosted => {
                        assert_eq!(m.bucket.as_deref(), host.split('.').next());
                    }
                    UrlFormat::Path => {
                        let decoded = urlencoding::decode(path).unwrap();
                        let first = decoded.trim_start_matches('/').split('/').next().unwrap();
                        if first.is_empty() {
                            assert_eq!(m.bucket, None);
                        } else {
                            assert_eq!(m.bucket.as_deref(), Some(first));
                        }
                    }
                }
            }
        }
    }
}
