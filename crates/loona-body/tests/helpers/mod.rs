use std::{cell::RefCell, convert::Infallible, future::Future, rc::Rc};

use b_x::BX;
use loona_body::{
    bytes::Bytes,
    http::StatusCode,
    BodySink, Encoder, Headers, PushPromise,
};

pub(crate) mod tracing_common;

/// Runs a test on a current-thread runtime, inside a `LocalSet`
pub(crate) fn run(test: impl Future<Output = Result<(), BX>>) {
    tracing_common::setup_tracing();

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let lset = tokio::task::LocalSet::new();
    if let Err(e) = lset.block_on(&rt, test) {
        panic!("Error: {e}");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Push { path: String, weight: u16 },
    Head(StatusCode),
    Chunk(Bytes),
    Flush,
    End { trailers: Vec<(String, String)> },
}

/// Records everything the responder asks of it. Push promises are kept
/// around so tests can serve them.
#[derive(Default, Clone)]
pub(crate) struct RecordingEncoder {
    pub(crate) events: Rc<RefCell<Vec<Event>>>,
    pub(crate) promises: Rc<RefCell<Vec<PushPromise>>>,
}

impl RecordingEncoder {
    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub(crate) fn chunks(&self) -> Vec<Bytes> {
        self.events
            .borrow()
            .iter()
            .filter_map(|ev| match ev {
                Event::Chunk(chunk) => Some(chunk.clone()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn trailers(&self) -> Option<Vec<(String, String)>> {
        self.events.borrow().iter().find_map(|ev| match ev {
            Event::End { trailers } => Some(trailers.clone()),
            _ => None,
        })
    }
}

impl BodySink for RecordingEncoder {
    type Error = Infallible;

    async fn write_body_chunk(&mut self, chunk: Bytes) -> Result<(), Self::Error> {
        self.events.borrow_mut().push(Event::Chunk(chunk));
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.events.borrow_mut().push(Event::Flush);
        Ok(())
    }

    async fn write_body_end(&mut self, trailers: Headers) -> Result<(), Self::Error> {
        let trailers = trailers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_owned()))
            .collect();
        self.events.borrow_mut().push(Event::End { trailers });
        Ok(())
    }
}

impl Encoder for RecordingEncoder {
    async fn write_push_promise(&mut self, promise: PushPromise) -> Result<(), Self::Error> {
        self.events.borrow_mut().push(Event::Push {
            path: promise.path().to_string(),
            weight: promise.weight(),
        });
        self.promises.borrow_mut().push(promise);
        Ok(())
    }

    async fn write_response(
        &mut self,
        status: StatusCode,
        _headers: Headers,
    ) -> Result<(), Self::Error> {
        self.events.borrow_mut().push(Event::Head(status));
        Ok(())
    }
}
