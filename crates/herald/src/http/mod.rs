//! HTTP plumbing: bodies, responses, ordered query/header containers.

mod body;
pub use self::body::Body;

use crate::error::{S3Error, S3Result};

use std::str::FromStr;

use http::HeaderMap;
use http::HeaderValue;
use http::StatusCode;
use http::header::HeaderName;

/// Gateway-internal response, converted to a hyper response at the edge.
#[derive(Debug, Default)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

impl Response {
    #[must_use]
    pub fn with_status(status: StatusCode) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Sets an XML body along with the `Content-Type` header.
    pub fn set_xml_body(&mut self, xml: String) {
        self.headers
            .insert(http::header::CONTENT_TYPE, HeaderValue::from_static("application/xml"));
        self.body = Body::from(xml);
    }

    /// Inserts a header, replacing any previous value. Invalid names or
    /// values are silently dropped; upstream metadata a client sent us that
    /// hyper cannot represent is not worth failing the whole response over.
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (HeaderName::from_str(name), HeaderValue::from_str(value)) {
            self.headers.insert(name, value);
        }
    }

    #[must_use]
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Query string as an order-preserving multimap.
///
/// Repeated keys are kept in order of appearance; values are
/// percent-decoded.
#[derive(Debug, Clone, Default)]
pub struct OrderedQs {
    pairs: Vec<(String, String)>,
}

impl OrderedQs {
    #[must_use]
    pub fn parse(query: &str) -> Self {
        let pairs = url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Self { pairs }
    }

    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == name)
    }

    /// Returns the first value for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// Returns the value for `name` only if it appears exactly once.
    #[must_use]
    pub fn get_unique(&self, name: &str) -> Option<&str> {
        let mut iter = self.pairs.iter().filter(|(k, _)| k == name);
        let first = iter.next()?;
        if iter.next().is_some() {
            return None;
        }
        Some(first.1.as_str())
    }
}

impl AsRef<[(String, String)]> for OrderedQs {
    fn as_ref(&self) -> &[(String, String)] {
        &self.pairs
    }
}

/// Immutable header container sorted by lowercase name.
///
/// SigV4 canonicalization needs headers in ascending name order with
/// duplicates preserved; a sorted vec gives that directly.
#[derive(Debug, Default, Clone)]
pub struct OrderedHeaders {
    /// Ascending (name, value) pairs; names are lowercase.
    headers: Vec<(String, String)>,
}

impl OrderedHeaders {
    /// Constructs [`OrderedHeaders`] from a header map.
    ///
    /// Values that are not valid UTF-8 are rejected.
    pub fn from_header_map(map: &HeaderMap) -> S3Result<Self> {
        let mut headers = Vec::with_capacity(map.len());
        for (name, value) in map {
            let value = value
                .to_str()
                .map_err(|e| invalid_request!(e, "invalid header: {}", name.as_str()))?;
            headers.push((name.as_str().to_owned(), value.to_owned()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Self { headers })
    }

    /// Constructs from already-lowercase pairs, sorting by name.
    #[must_use]
    pub fn from_pairs(mut headers: Vec<(String, String)>) -> Self {
        headers.sort_by(|a, b| a.0.cmp(&b.0));
        Self { headers }
    }

    #[cfg(test)]
    #[must_use]
    pub fn from_slice_unchecked(slice: &[(&str, &str)]) -> Self {
        let mut headers: Vec<(String, String)> =
            slice.iter().map(|&(n, v)| (n.to_owned(), v.to_owned())).collect();
        headers.sort_by(|a, b| a.0.cmp(&b.0));
        Self { headers }
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        let slice = self.headers.as_slice();
        let lower = slice.partition_point(|x| x.0.as_str() < name);
        let upper = slice.partition_point(|x| x.0.as_str() <= name);
        slice[lower..upper].iter().map(|(_, v)| v.as_str())
    }

    /// Gets a header value by lowercase name. Time `O(logn)`.
    #[must_use]
    pub fn get_unique(&self, name: &str) -> Option<&str> {
        let slice = self.headers.as_slice();
        let lower = slice.partition_point(|x| x.0.as_str() < name);
        let mut iter = slice[lower..].iter();
        let (n, v) = iter.next()?;
        if n != name {
            return None;
        }
        if let Some((next_n, _)) = iter.next()
            && next_n == name
        {
            return None;
        }
        Some(v.as_str())
    }

    pub fn iter_pairs(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// Builds an error response carrying the canonical S3 error XML.
#[must_use]
pub fn serialize_error(err: &S3Error, host_id: &str) -> Response {
    let mut res = Response::with_status(err.status_code());
    res.set_xml_body(err.to_xml(host_id));
    if let Some(request_id) = err.request_id() {
        res.set_header(crate::header::X_AMZ_REQUEST_ID, request_id);
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_qs_multimap() {
        let qs = OrderedQs::parse("a=1&b=2&a=3&flag");
        assert_eq!(qs.get("a"), Some("1"));
        assert_eq!(qs.get_unique("a"), None);
        assert_eq!(qs.get_unique("b"), Some("2"));
        assert!(qs.has("flag"));
        assert_eq!(qs.as_ref().len(), 4);
    }

    #[test]
    fn ordered_qs_decodes() {
        let qs = OrderedQs::parse("key=a%2Fb+c");
        assert_eq!(qs.get("key"), Some("a/b c"));
    }

    #[test]
    fn ordered_headers_lookup() {
        let hs = OrderedHeaders::from_slice_unchecked(&[
            ("host", "example.com"),
            ("x-amz-date", "20250101T000000Z"),
            ("x-amz-meta-a", "1"),
            ("x-amz-meta-a", "2"),
        ]);
        assert_eq!(hs.get_unique("host"), Some("example.com"));
        assert_eq!(hs.get_unique("x-amz-meta-a"), None);
        assert_eq!(hs.get_all("x-amz-meta-a").count(), 2);
        assert_eq!(hs.get_unique("absent"), None);
    }

    #[test]
    fn from_pairs_sorts() {
        let hs = OrderedHeaders::from_pairs(vec![
            ("x-amz-date".to_owned(), "d".to_owned()),
            ("host".to_owned(), "h".to_owned()),
        ]);
        let pairs: Vec<_> = hs.iter_pairs().collect();
        assert_eq!(pairs, vec![("host", "h"), ("x-amz-date", "d")]);
    }
}
