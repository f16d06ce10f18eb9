use std::{fmt, future::Future};

use b_x::BX;
use bytes::Bytes;
use http::{header, HeaderName, HeaderValue, Method, StatusCode, Uri};
use tracing::debug;

mod trailers;
pub use trailers::*;

use crate::{BodyProducer, BodyWriter, FileSpec, IncomingBody};

/// Header fields: request and response headers, and trailers
pub type Headers = http::HeaderMap;

/// An HTTP request, as assembled by the engine
pub struct Request {
    pub method: Method,

    /// Requested entity
    pub uri: Uri,

    headers: Headers,
    body: IncomingBody,
}

impl Request {
    pub fn new(method: Method, uri: Uri, headers: Headers, body: IncomingBody) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
        }
    }

    /// Request headers
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The body length the peer announced, if any
    pub fn content_length(&self) -> Option<u64> {
        self.body.content_len()
    }

    /// Pull chunks of the request body from here, then its trailers
    pub fn body(&mut self) -> &mut IncomingBody {
        &mut self.body
    }

    pub fn into_body(self) -> IncomingBody {
        self.body
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("content_length", &self.content_length())
            .finish()?;

        for (name, value) in &self.headers {
            debug!(%name, value = ?value.to_str(), "header");
        }

        Ok(())
    }
}

/// An HTTP response: status, headers, a body producer and a trailers maker.
///
/// Responses are not mutated once built: the `with_*` methods consume
/// the response and return a new one.
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: BodyProducer,
    trailers: Box<dyn TrailersMaker>,
}

impl Response {
    pub fn new(status: StatusCode, headers: Headers, body: BodyProducer) -> Self {
        Self {
            status,
            headers,
            body,
            trailers: Box::new(NoTrailers),
        }
    }

    pub fn no_body(status: StatusCode, headers: Headers) -> Self {
        Self::new(status, headers, BodyProducer::Empty)
    }

    /// A response whose body is already fully built in memory
    pub fn builder_body(status: StatusCode, headers: Headers, body: impl Into<Bytes>) -> Self {
        Self::new(status, headers, BodyProducer::Builder(body.into()))
    }

    /// A response whose body is written by `produce`, see [BodyWriter]
    pub fn streaming<F, Fut>(status: StatusCode, headers: Headers, produce: F) -> Self
    where
        F: FnOnce(BodyWriter) -> Fut + 'static,
        Fut: Future<Output = Result<(), BX>> + 'static,
    {
        Self::new(status, headers, BodyProducer::streaming(produce))
    }

    /// A response whose body is a region of a file
    pub fn file(status: StatusCode, headers: Headers, spec: FileSpec) -> Self {
        Self::new(status, headers, BodyProducer::File(spec))
    }

    /// Returns the same response with a different trailers maker
    pub fn with_trailers_maker(self, maker: impl TrailersMaker + 'static) -> Self {
        Self {
            trailers: Box::new(maker),
            ..self
        }
    }

    /// Returns the same response with one more header (replacing any
    /// existing value for that name)
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &BodyProducer {
        &self.body
    }

    pub fn trailers_maker(&self) -> &dyn TrailersMaker {
        self.trailers.as_ref()
    }

    /// 204 and 304 responses must not have a body
    pub fn means_empty_body(&self) -> bool {
        matches!(
            self.status,
            StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED
        )
    }

    /// Splits the response into its parts, setting `content-length` for
    /// bodies whose length is known up front
    pub fn into_parts(self) -> ResponseParts {
        let mut headers = self.headers;
        if let BodyProducer::Builder(bytes) = &self.body {
            headers
                .entry(header::CONTENT_LENGTH)
                .or_insert_with(|| HeaderValue::from(bytes.len()));
        }

        ResponseParts {
            status: self.status,
            headers,
            body: self.body,
            trailers: self.trailers,
        }
    }

    pub(crate) fn debug_print(&self) {
        debug!(code = %self.status, body = ?self.body, "sending response");
        for (name, value) in &self.headers {
            debug!(%name, value = ?value.to_str(), "response header");
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

/// A [Response] taken apart, ready to be sent
pub struct ResponseParts {
    pub status: StatusCode,
    pub headers: Headers,
    pub body: BodyProducer,
    pub trailers: Box<dyn TrailersMaker>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn with_trailers_maker_keeps_everything_else() {
        let res = Response::builder_body(StatusCode::CREATED, Headers::new(), "hello")
            .with_header(
                HeaderName::from_static("x-kind"),
                HeaderValue::from_static("greeting"),
            );

        let res = res.with_trailers_maker(FoldTrailers::new(
            (),
            |_, _| {},
            |_| {
                let mut trailers = Headers::new();
                trailers.insert("x-set", HeaderValue::from_static("yes"));
                trailers
            },
        ));

        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(res.headers().get("x-kind").unwrap(), "greeting");
        assert!(matches!(res.body(), BodyProducer::Builder(b) if &b[..] == b"hello"));

        let parts = res.into_parts();
        assert_eq!(parts.trailers.finish().get("x-set").unwrap(), "yes");
    }

    #[test]
    fn builder_bodies_announce_their_length() {
        let parts = Response::builder_body(StatusCode::OK, Headers::new(), "12345").into_parts();
        assert_eq!(parts.headers.get(header::CONTENT_LENGTH).unwrap(), "5");

        let mut headers = Headers::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("5"));
        let parts = Response::builder_body(StatusCode::OK, headers, "12345").into_parts();
        assert_eq!(parts.headers.get_all(header::CONTENT_LENGTH).iter().count(), 1);

        let parts = Response::no_body(StatusCode::NO_CONTENT, Headers::new()).into_parts();
        assert!(parts.headers.get(header::CONTENT_LENGTH).is_none());
    }

    #[test]
    fn bodiless_statuses() {
        assert!(Response::no_body(StatusCode::NO_CONTENT, Headers::new()).means_empty_body());
        assert!(Response::no_body(StatusCode::NOT_MODIFIED, Headers::new()).means_empty_body());
        assert!(!Response::no_body(StatusCode::OK, Headers::new()).means_empty_body());
    }
}
