//! Request/response payloads.
//!
//! A [`Body`] is either a buffered chunk of bytes or a streaming source.
//! Streaming is the default for object payloads so that large uploads and
//! downloads propagate backpressure end to end; only the operations that
//! need the full document in memory (XML bodies, bulk delete, SLO manifests)
//! buffer via [`Body::store_all`].

use crate::error::StdError;

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::Stream;
use futures::StreamExt;
use http_body::Frame;
use http_body_util::BodyStream;

type BoxStream = Pin<Box<dyn Stream<Item = Result<Bytes, StdError>> + Send + Sync + 'static>>;

enum Inner {
    Once(Option<Bytes>),
    Streaming(BoxStream),
}

pub struct Body {
    inner: Inner,
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl Body {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            inner: Inner::Once(None),
        }
    }

    #[must_use]
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, StdError>> + Send + Sync + 'static,
    {
        Self {
            inner: Inner::Streaming(Box::pin(stream)),
        }
    }

    /// Returns the buffered bytes if the body is not streaming.
    #[must_use]
    pub fn bytes(&self) -> Option<Bytes> {
        match self.inner {
            Inner::Once(ref bytes) => Some(bytes.clone().unwrap_or_default()),
            Inner::Streaming(_) => None,
        }
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        matches!(self.inner, Inner::Streaming(_))
    }

    /// Drains the body into memory, replacing the stream with the buffered
    /// result so subsequent calls are cheap.
    pub async fn store_all(&mut self) -> Result<Bytes, StdError> {
        match self.inner {
            Inner::Once(ref bytes) => Ok(bytes.clone().unwrap_or_default()),
            Inner::Streaming(ref mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                let bytes = buf.freeze();
                self.inner = Inner::Once(Some(bytes.clone()));
                Ok(bytes)
            }
        }
    }

    /// Converts into an outbound `reqwest` body, preserving streaming.
    #[must_use]
    pub fn into_reqwest(self) -> reqwest::Body {
        match self.inner {
            Inner::Once(bytes) => reqwest::Body::from(bytes.unwrap_or_default()),
            Inner::Streaming(stream) => reqwest::Body::wrap_stream(stream),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self {
            inner: Inner::Once(Some(bytes)),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Bytes::from(bytes).into()
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Bytes::from(s).into()
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Bytes::from_static(s.as_bytes()).into()
    }
}

impl From<hyper::body::Incoming> for Body {
    fn from(incoming: hyper::body::Incoming) -> Self {
        let stream = BodyStream::new(incoming).filter_map(|result| async move {
            match result {
                Ok(frame) => frame.into_data().ok().map(Ok),
                Err(e) => Some(Err(StdError::from(e))),
            }
        });
        Self::from_stream(stream)
    }
}

impl From<reqwest::Response> for Body {
    fn from(resp: reqwest::Response) -> Self {
        let stream = resp.bytes_stream().map(|result| result.map_err(StdError::from));
        Self::from_stream(stream)
    }
}

impl http_body::Body for Body {
    type Data = Bytes;
    type Error = StdError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Bytes>, StdError>>> {
        let this = self.get_mut();
        match this.inner {
            Inner::Once(ref mut bytes) => match bytes.take() {
                Some(bytes) if !bytes.is_empty() => Poll::Ready(Some(Ok(Frame::data(bytes)))),
                _ => Poll::Ready(None),
            },
            Inner::Streaming(ref mut stream) => match stream.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(bytes))) => Poll::Ready(Some(Ok(Frame::data(bytes)))),
                Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl Stream for Body {
    type Item = Result<Bytes, StdError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner {
            Inner::Once(ref mut bytes) => match bytes.take() {
                Some(bytes) if !bytes.is_empty() => Poll::Ready(Some(Ok(bytes))),
                _ => Poll::Ready(None),
            },
            Inner::Streaming(ref mut stream) => stream.poll_next_unpin(cx),
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner {
            Inner::Once(ref bytes) => f
                .debug_struct("Body")
                .field("len", &bytes.as_ref().map_or(0, Bytes::len))
                .finish(),
            Inner::Streaming(_) => f.debug_struct("Body").field("streaming", &true).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_all_buffers_stream() {
        let chunks: Vec<Result<Bytes, StdError>> = vec![Ok(Bytes::from_static(b"he")), Ok(Bytes::from_static(b"llo"))];
        let mut body = Body::from_stream(futures::stream::iter(chunks));
        assert!(body.is_streaming());
        assert_eq!(body.store_all().await.unwrap(), Bytes::from_static(b"hello"));
        // second call hits the buffered copy
        assert_eq!(body.store_all().await.unwrap(), Bytes::from_static(b"hello"));
        assert!(!body.is_streaming());
    }

    #[tokio::test]
    async fn buffered_bytes() {
        let body = Body::from(Bytes::from_static(b"abc"));
        assert_eq!(body.bytes(), Some(Bytes::from_static(b"abc")));
    }
}
