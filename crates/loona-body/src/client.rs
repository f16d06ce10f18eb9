//! The client side: outgoing requests reuse the server's body producers
//! and trailers makers, incoming responses reuse [IncomingBody].

use std::{fmt, future::Future};

use b_x::BX;
use bytes::Bytes;
use http::{HeaderName, HeaderValue, Method, StatusCode, Uri};

use crate::{
    BodyProducer, BodyWriter, ClientAux, FileSpec, Headers, IncomingBody, NoTrailers,
    TrailersMaker,
};

/// A request a client sends. Like [crate::Response], it is never mutated
/// once built.
pub struct ClientRequest {
    method: Method,
    uri: Uri,
    headers: Headers,
    body: BodyProducer,
    trailers: Box<dyn TrailersMaker>,
}

impl ClientRequest {
    pub fn new(method: Method, uri: Uri, headers: Headers, body: BodyProducer) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
            trailers: Box::new(NoTrailers),
        }
    }

    pub fn no_body(method: Method, uri: Uri, headers: Headers) -> Self {
        Self::new(method, uri, headers, BodyProducer::Empty)
    }

    pub fn builder_body(method: Method, uri: Uri, headers: Headers, body: impl Into<Bytes>) -> Self {
        Self::new(method, uri, headers, BodyProducer::Builder(body.into()))
    }

    pub fn streaming<F, Fut>(method: Method, uri: Uri, headers: Headers, produce: F) -> Self
    where
        F: FnOnce(BodyWriter) -> Fut + 'static,
        Fut: Future<Output = Result<(), BX>> + 'static,
    {
        Self::new(method, uri, headers, BodyProducer::streaming(produce))
    }

    pub fn file(method: Method, uri: Uri, headers: Headers, spec: FileSpec) -> Self {
        Self::new(method, uri, headers, BodyProducer::File(spec))
    }

    pub fn with_trailers_maker(self, maker: impl TrailersMaker + 'static) -> Self {
        Self {
            trailers: Box::new(maker),
            ..self
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &BodyProducer {
        &self.body
    }

    pub fn into_parts(self) -> ClientRequestParts {
        ClientRequestParts {
            method: self.method,
            uri: self.uri,
            headers: self.headers,
            body: self.body,
            trailers: self.trailers,
        }
    }
}

impl fmt::Debug for ClientRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRequest")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

pub struct ClientRequestParts {
    pub method: Method,
    pub uri: Uri,
    pub headers: Headers,
    pub body: BodyProducer,
    pub trailers: Box<dyn TrailersMaker>,
}

/// A response a client receives
#[derive(Debug)]
pub struct ClientResponse {
    pub status: StatusCode,
    headers: Headers,
    body: IncomingBody,
}

impl ClientResponse {
    pub fn new(status: StatusCode, headers: Headers, body: IncomingBody) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn content_length(&self) -> Option<u64> {
        self.body.content_len()
    }

    pub fn body(&mut self) -> &mut IncomingBody {
        &mut self.body
    }
}

/// Issues requests over one connection
#[allow(async_fn_in_trait)] // we never require Send
pub trait Client {
    type Error: std::error::Error + 'static;

    /// Concurrency hints for this connection
    fn aux(&self) -> ClientAux;

    /// Sends `req`, then hands the response to `on_response`. The
    /// response body is only readable from within `on_response`.
    async fn send_request<F, Fut, T>(
        &self,
        req: ClientRequest,
        on_response: F,
    ) -> Result<T, Self::Error>
    where
        F: FnOnce(ClientResponse) -> Fut,
        Fut: Future<Output = Result<T, BX>>;
}
