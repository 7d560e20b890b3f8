//! Canonical request construction and the HMAC-SHA256 signature chain.

use super::amz_date::AmzDate;

use crate::http::OrderedHeaders;

use hmac::{Hmac, Mac};
use http::Method;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Payload hash declaration for the canonical request.
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    Unsigned,
    SingleChunk(&'a str),
    Empty,
}

/// SHA-256 of the empty string, the hash of bodiless requests.
const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

impl Payload<'_> {
    fn as_str(&self) -> &str {
        match *self {
            Payload::Unsigned => "UNSIGNED-PAYLOAD",
            Payload::SingleChunk(hash) => hash,
            Payload::Empty => EMPTY_SHA256,
        }
    }
}

/// Percent-encodes with the SigV4 unreserved set (`A-Za-z0-9-._~`).
///
/// `encode_slash` is false for URI paths and true for query components.
#[must_use]
pub fn uri_encode(s: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => out.push(b as char),
            b'/' if !encode_slash => out.push('/'),
            _ => {
                out.push('%');
                out.push(char::from_digit(u32::from(b >> 4), 16).unwrap_or('0').to_ascii_uppercase());
                out.push(char::from_digit(u32::from(b & 0xf), 16).unwrap_or('0').to_ascii_uppercase());
            }
        }
    }
    out
}

fn canonical_query_string(query: &[(String, String)], skip_signature: bool) -> String {
    let mut encoded: Vec<(String, String)> = query
        .iter()
        .filter(|(k, _)| !(skip_signature && k == "X-Amz-Signature"))
        .map(|(k, v)| (uri_encode(k, true), uri_encode(v, true)))
        .collect();
    encoded.sort();

    let mut out = String::new();
    for (i, (k, v)) in encoded.iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        out.push_str(k);
        out.push('=');
        out.push_str(v);
    }
    out
}

fn canonical_headers(headers: &OrderedHeaders) -> (String, String) {
    let mut canonical = String::new();
    let mut signed = String::new();

    let mut prev_name: Option<&str> = None;
    for (name, value) in headers.iter_pairs() {
        if prev_name == Some(name) {
            // duplicate header values are comma-joined
            canonical.pop();
            canonical.push(',');
            canonical.push_str(value.trim());
            canonical.push('\n');
            continue;
        }
        canonical.push_str(name);
        canonical.push(':');
        canonical.push_str(value.trim());
        canonical.push('\n');

        if prev_name.is_some() {
            signed.push(';');
        }
        signed.push_str(name);
        prev_name = Some(name);
    }

    (canonical, signed)
}

/// Builds the canonical request for a header-signed request.
#[must_use]
pub fn create_canonical_request(
    method: &Method,
    decoded_uri_path: &str,
    query: &[(String, String)],
    headers: &OrderedHeaders,
    payload: Payload<'_>,
) -> String {
    let (canonical_headers, signed_headers) = canonical_headers(headers);
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method.as_str(),
        uri_encode(decoded_uri_path, false),
        canonical_query_string(query, false),
        canonical_headers,
        signed_headers,
        payload.as_str(),
    )
}

/// Builds the canonical request for a presigned URL: the query string omits
/// `X-Amz-Signature` and the payload is always unsigned.
#[must_use]
pub fn create_presigned_canonical_request(
    method: &Method,
    decoded_uri_path: &str,
    query: &[(String, String)],
    headers: &OrderedHeaders,
) -> String {
    let (canonical_headers, signed_headers) = canonical_headers(headers);
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method.as_str(),
        uri_encode(decoded_uri_path, false),
        canonical_query_string(query, true),
        canonical_headers,
        signed_headers,
        Payload::Unsigned.as_str(),
    )
}

#[must_use]
pub fn create_string_to_sign(canonical_request: &str, date: &AmzDate, region: &str, service: &str) -> String {
    format!(
        "AWS4-HMAC-SHA256\n{}\n{}/{}/{}/aws4_request\n{}",
        date.fmt_iso8601(),
        date.fmt_date(),
        region,
        service,
        hex_sha256(canonical_request.as_bytes()),
    )
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Derives the signing key and signs `string_to_sign`, returning lowercase hex.
#[must_use]
pub fn calculate_signature(
    string_to_sign: &str,
    secret_key: &str,
    date: &AmzDate,
    region: &str,
    service: &str,
) -> String {
    let date_key = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date.fmt_date().as_bytes());
    let region_key = hmac_sha256(&date_key, region.as_bytes());
    let service_key = hmac_sha256(&region_key, service.as_bytes());
    let signing_key = hmac_sha256(&service_key, b"aws4_request");
    let signature = hmac_sha256(&signing_key, string_to_sign.as_bytes());
    hex_simd::encode_to_string(signature.as_slice(), hex_simd::AsciiCase::Lower)
}

#[must_use]
pub fn hex_sha256(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    hex_simd::encode_to_string(hash.as_slice(), hex_simd::AsciiCase::Lower)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Worked example from the AWS SigV4 documentation:
    // GET https://examplebucket.s3.amazonaws.com/test.txt with Range header.
    #[test]
    fn aws_doc_get_object_example() {
        let headers = OrderedHeaders::from_slice_unchecked(&[
            ("host", "examplebucket.s3.amazonaws.com"),
            ("range", "bytes=0-9"),
            ("x-amz-content-sha256", EMPTY_SHA256),
            ("x-amz-date", "20130524T000000Z"),
        ]);
        let canonical = create_canonical_request(
            &Method::GET,
            "/test.txt",
            &[],
            &headers,
            Payload::SingleChunk(EMPTY_SHA256),
        );
        let expected = concat!(
            "GET\n",
            "/test.txt\n",
            "\n",
            "host:examplebucket.s3.amazonaws.com\n",
            "range:bytes=0-9\n",
            "x-amz-content-sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855\n",
            "x-amz-date:20130524T000000Z\n",
            "\n",
            "host;range;x-amz-content-sha256;x-amz-date\n",
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
        );
        assert_eq!(canonical, expected);

        let date = AmzDate::parse("20130524T000000Z").unwrap();
        let string_to_sign = create_string_to_sign(&canonical, &date, "us-east-1", "s3");
        let signature = calculate_signature(
            &string_to_sign,
            "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY",
            &date,
            "us-east-1",
            "s3",
        );
        assert_eq!(signature, "f0e8bdb87c964420e857bd35b5d6ed310bd44f0170aba48dd91039c6036bdb41");
    }

    #[test]
    fn query_string_is_sorted_and_encoded() {
        let query = vec![
            ("prefix".to_owned(), "a/b".to_owned()),
            ("delimiter".to_owned(), "/".to_owned()),
        ];
        assert_eq!(canonical_query_string(&query, false), "delimiter=%2F&prefix=a%2Fb");
    }

    #[test]
    fn duplicate_headers_are_joined() {
        let headers = OrderedHeaders::from_slice_unchecked(&[("a", "1"), ("a", "2"), ("b", "3")]);
        let (canonical, signed) = canonical_headers(&headers);
        assert_eq!(canonical, "a:1,2\nb:3\n");
        assert_eq!(signed, "a;b");
    }

    #[test]
    fn uri_encoding() {
        assert_eq!(uri_encode("/a b/c~d", false), "/a%20b/c~d");
        assert_eq!(uri_encode("a/b", true), "a%2Fb");
        assert_eq!(uri_encode("k=&v", true), "k%3D%26v");
    }
}
