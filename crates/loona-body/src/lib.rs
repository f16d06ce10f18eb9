//! Message bodies and trailers for an HTTP/2 engine.
//!
//! The engine (framing, HPACK, flow control, transport) assembles a
//! [Request] and hands it to a [ServerDriver] along with an [Aux] and a
//! [Responder]. The driver answers with a [Response] whose body is
//! produced chunk by chunk (see [BodyProducer]) and whose trailers are
//! folded over the chunks that were actually sent (see [TrailersMaker]).

mod types;
pub use types::*;

mod body;
pub use body::*;

mod drive;
pub use drive::*;

mod pread;
pub use pread::*;

mod push;
pub use push::*;

mod concurrency;
pub use concurrency::*;

mod config;
pub use config::*;

mod responder;
pub use responder::*;

pub mod client;

pub mod error;

/// re-exported so consumers can use whatever version we use
pub use bytes;
pub use http;

#[allow(async_fn_in_trait)] // we never require Send
pub trait ServerDriver {
    type Error: std::error::Error + 'static;

    /// Handle a single request. The request body is pulled through
    /// [Request::body], the response is sent with
    /// [Responder::send_response].
    async fn handle<E, M>(
        &self,
        req: Request,
        aux: Aux,
        respond: Responder<E, M, ExpectResponse>,
    ) -> Result<Responder<E, M, ResponseDone>, Self::Error>
    where
        E: Encoder,
        M: PositionReadMaker;
}
