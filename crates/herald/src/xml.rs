//! Minimal XML writer for S3 response bodies.
//!
//! S3 responses are shallow element trees with no attributes beyond the
//! occasional `xmlns`, so a push-style string builder is all that is needed.
//! Inbound XML (DeleteObjects, CompleteMultipartUpload) is parsed with
//! `quick-xml` serde in the modules that own those shapes.

use std::borrow::Cow;

pub const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// Escapes `& < > " '` for use in element content or attribute values.
#[must_use]
pub fn escape(s: &str) -> Cow<'_, str> {
    let needs_escape = s.bytes().any(|b| matches!(b, b'&' | b'<' | b'>' | b'"' | b'\''));
    if !needs_escape {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Push-style XML serializer.
#[derive(Default)]
pub struct Serializer {
    buf: String,
}

impl Serializer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a document with the standard XML declaration.
    #[must_use]
    pub fn with_decl() -> Self {
        let mut s = Self::new();
        s.buf.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
        s
    }

    /// Writes `<name>..</name>` with nested content produced by `f`.
    pub fn element(&mut self, name: &str, f: impl FnOnce(&mut Self)) {
        self.buf.push('<');
        self.buf.push_str(name);
        self.buf.push('>');
        f(self);
        self.buf.push_str("</");
        self.buf.push_str(name);
        self.buf.push('>');
    }

    /// Writes `<name xmlns="..">..</name>`.
    pub fn element_ns(&mut self, name: &str, xmlns: &str, f: impl FnOnce(&mut Self)) {
        self.buf.push('<');
        self.buf.push_str(name);
        self.buf.push_str(" xmlns=\"");
        self.buf.push_str(&escape(xmlns));
        self.buf.push_str("\">");
        f(self);
        self.buf.push_str("</");
        self.buf.push_str(name);
        self.buf.push('>');
    }

    /// Writes `<name>text</name>` with escaping.
    pub fn text_element(&mut self, name: &str, text: &str) {
        self.element(name, |s| s.text(text));
    }

    /// Writes `<name/>`.
    pub fn empty_element(&mut self, name: &str) {
        self.buf.push('<');
        self.buf.push_str(name);
        self.buf.push_str("/>");
    }

    /// Writes escaped character content.
    pub fn text(&mut self, text: &str) {
        self.buf.push_str(&escape(text));
    }

    #[must_use]
    pub fn finish(self) -> String {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escaping() {
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("a&b<c>d\"e'f"), "a&amp;b&lt;c&gt;d&quot;e&apos;f");
    }

    #[test]
    fn nested_document() {
        let mut s = Serializer::with_decl();
        s.element_ns("ListBucketResult", S3_XMLNS, |s| {
            s.text_element("Name", "b");
            s.element("Contents", |s| {
                s.text_element("Key", "a&b");
            });
            s.empty_element("IsTruncated");
        });
        let out = s.finish();
        assert_eq!(
            out,
            concat!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>",
                "<ListBucketResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">",
                "<Name>b</Name>",
                "<Contents><Key>a&amp;b</Key></Contents>",
                "<IsTruncated/>",
                "</ListBucketResult>",
            )
        );
    }
}
