use b_x::BX;
use http::StatusCode;
use tracing::{debug, warn};

use crate::{
    drive_body,
    error::{DriveError, PositionReadError},
    BodyConf, BodySink, DriveReport, Headers, PositionReadMaker, PushPromise, Response,
};

pub trait ResponseState {}

pub struct ExpectResponse;
impl ResponseState for ExpectResponse {}

pub struct ResponseDone {
    pub report: DriveReport,
}
impl ResponseState for ResponseDone {}

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum ResponderError<EncoderError> {
    #[error("interim response must have status code 1xx, got {actual}")]
    InterimResponseMustHaveStatusCode1xx { actual: StatusCode },

    #[error("final response must have status code >= 200, got {actual}")]
    FinalResponseMustHaveStatusCodeGreaterThanOrEqualTo200 { actual: StatusCode },

    #[error("{status} responses must not have a body")]
    BodyNotAllowed { status: StatusCode },

    #[error("encoder error: {0}")]
    EncoderError(EncoderError),

    #[error("body error: {0}")]
    Drive(DriveError<EncoderError>),

    /// The body's file failed. The stream was ended cleanly before this
    /// was returned, it's reported so the failure can be logged.
    #[error("file body failed, stream ended early: {0}")]
    Resource(PositionReadError),
}

impl<EncoderError> From<ResponderError<EncoderError>> for BX
where
    EncoderError: std::error::Error + 'static,
{
    fn from(e: ResponderError<EncoderError>) -> Self {
        BX::from_err(e)
    }
}

pub type ResponderResult<T, EncoderError> = Result<T, ResponderError<EncoderError>>;

/// The engine side of a response stream
#[allow(async_fn_in_trait)] // we never require Send
pub trait Encoder: BodySink {
    /// Announce a pushed response. The engine reserves a stream for it
    /// and serves `promise.into_response()` on that stream.
    async fn write_push_promise(&mut self, promise: PushPromise) -> Result<(), Self::Error>;

    /// Send the response head (final or interim)
    async fn write_response(&mut self, status: StatusCode, headers: Headers)
        -> Result<(), Self::Error>;
}

/// Lets a handler send exactly one final response (plus any number of
/// interim responses before it).
pub struct Responder<E, M, S>
where
    E: Encoder,
    M: PositionReadMaker,
    S: ResponseState,
{
    encoder: E,
    conf: BodyConf<M>,
    state: S,
}

impl<E, M> Responder<E, M, ExpectResponse>
where
    E: Encoder,
    M: PositionReadMaker,
{
    pub fn new(encoder: E, conf: BodyConf<M>) -> Self {
        Self {
            encoder,
            conf,
            state: ExpectResponse,
        }
    }

    /// Send an informational status code, cf. <https://httpwg.org/specs/rfc9110.html#status.1xx>
    /// Errors out if the response status is not 1xx
    pub async fn write_interim_response(
        &mut self,
        status: StatusCode,
        headers: Headers,
    ) -> ResponderResult<(), E::Error> {
        if !status.is_informational() {
            return Err(ResponderError::InterimResponseMustHaveStatusCode1xx { actual: status });
        }

        self.encoder
            .write_response(status, headers)
            .await
            .map_err(ResponderError::EncoderError)
    }

    /// Sends push promises first, then the response head, then drives
    /// the body to completion and ends the stream with the trailers the
    /// response's trailers maker computed.
    pub async fn send_response(
        mut self,
        res: Response,
        pushes: Vec<PushPromise>,
    ) -> ResponderResult<Responder<E, M, ResponseDone>, E::Error> {
        if res.status().is_informational() {
            return Err(
                ResponderError::FinalResponseMustHaveStatusCodeGreaterThanOrEqualTo200 {
                    actual: res.status(),
                },
            );
        }
        if res.means_empty_body() && !res.body().is_empty() {
            return Err(ResponderError::BodyNotAllowed {
                status: res.status(),
            });
        }

        for promise in pushes {
            debug!(path = %promise.path(), weight = promise.weight(), "push promise");
            self.encoder
                .write_push_promise(promise)
                .await
                .map_err(ResponderError::EncoderError)?;
        }

        res.debug_print();
        let parts = res.into_parts();
        self.encoder
            .write_response(parts.status, parts.headers)
            .await
            .map_err(ResponderError::EncoderError)?;

        let mut report = drive_body(parts.body, parts.trailers, &self.conf, &mut self.encoder)
            .await
            .map_err(ResponderError::Drive)?;

        if let Some(e) = report.resource_error.take() {
            warn!(error = %e, "response ended early");
            return Err(ResponderError::Resource(e));
        }

        Ok(Responder {
            encoder: self.encoder,
            conf: self.conf,
            state: ResponseDone { report },
        })
    }
}

impl<E, M> Responder<E, M, ResponseDone>
where
    E: Encoder,
    M: PositionReadMaker,
{
    pub fn report(&self) -> &DriveReport {
        &self.state.report
    }

    pub fn into_inner(self) -> E {
        self.encoder
    }
}
