//! Request classification against the path-vs-virtual-hosted rule.

use herald::request::{UrlFormat, extract_request_info};

use http::{HeaderMap, Method, Uri};

fn classify(method: Method, path_and_query: &str, host: &str) -> herald::RequestMeta {
    let uri: Uri = path_and_query.parse().unwrap();
    let mut headers = HeaderMap::new();
    headers.insert(http::header::HOST, host.parse().unwrap());
    extract_request_info(&method, &uri, &headers).unwrap()
}

#[test]
fn virtual_hosted_buckets_come_from_the_host() {
    let meta = classify(Method::GET, "/photos/2024/cat.jpg", "media.s3.eu-west-2.amazonaws.com");
    assert_eq!(meta.url_format, UrlFormat::VirtualHosted);
    assert_eq!(meta.bucket.as_deref(), Some("media"));
    assert_eq!(meta.object_key.as_deref(), Some("photos/2024/cat.jpg"));
}

#[test]
fn path_style_buckets_come_from_the_path() {
    let meta = classify(Method::PUT, "/media/photos/cat.jpg", "127.0.0.1:9000");
    assert_eq!(meta.url_format, UrlFormat::Path);
    assert_eq!(meta.bucket.as_deref(), Some("media"));
    assert_eq!(meta.object_key.as_deref(), Some("photos/cat.jpg"));
}

#[test]
fn service_endpoint_is_not_a_bucket() {
    let meta = classify(Method::GET, "/", "s3.us-east-1.amazonaws.com");
    assert_eq!(meta.url_format, UrlFormat::Path);
    assert_eq!(meta.bucket, None);
    assert_eq!(meta.object_key, None);
}

#[test]
fn sweep_of_hosts_and_paths_classifies_consistently() {
    let hosts = [
        ("localhost:8000", UrlFormat::Path),
        ("10.20.30.40", UrlFormat::Path),
        ("[2001:db8::1]:443", UrlFormat::Path),
        ("warehouse.internal", UrlFormat::Path),
        ("assets.s3.example.com", UrlFormat::VirtualHosted),
        ("assets.s3.ap-south-1.amazonaws.com", UrlFormat::VirtualHosted),
        ("s3.example.com", UrlFormat::Path),
    ];
    let paths = ["/", "/alpha", "/alpha/", "/alpha/beta", "/alpha/beta/gamma.bin"];

    for (host, expected) in hosts {
        for path in paths {
            let meta = classify(Method::GET, path, host);
            assert_eq!(meta.url_format, expected, "{host} {path}");
            match expected {
                UrlFormat::VirtualHosted => {
                    assert_eq!(meta.bucket.as_deref(), host.split('.').next(), "{host} {path}");
                    let expect_key = path.trim_start_matches('/');
                    if expect_key.is_empty() {
                        assert_eq!(meta.object_key, None, "{host} {path}");
                    } else {
                        assert_eq!(meta.object_key.as_deref(), Some(expect_key), "{host} {path}");
                    }
                }
                UrlFormat::Path => {
                    let mut segments = path.trim_start_matches('/').splitn(2, '/');
                    let bucket = segments.next().filter(|s| !s.is_empty());
                    let key = segments.next().filter(|s| !s.is_empty());
                    assert_eq!(meta.bucket.as_deref(), bucket, "{host} {path}");
                    assert_eq!(meta.object_key.as_deref(), key, "{host} {path}");
                }
            }
        }
    }
}
