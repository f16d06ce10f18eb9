use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::Headers;

/// Something we receive from an http/2 peer: pieces of the body, or the
/// final trailers.
#[derive(Debug)]
enum IncomingMessage {
    Chunk(Bytes),
    Trailers(Headers),
}

type IncomingMessageResult = Result<IncomingMessage, BodyError>;

pub enum ChunkPosition {
    NotLast,
    Last,
}

/// The trailers of an incoming body. They only exist once the body has
/// been read to the end.
#[derive(Debug, Default)]
pub enum TrailerCell {
    /// The body hasn't been read to the end yet
    #[default]
    Pending,

    /// The body was read to the end: these are its trailers (empty if
    /// the peer didn't send any)
    Available(Headers),
}

impl TrailerCell {
    /// Returns the trailers, or `None` if the body isn't exhausted yet
    pub fn get(&self) -> Option<&Headers> {
        match self {
            TrailerCell::Pending => None,
            TrailerCell::Available(trailers) => Some(trailers),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, TrailerCell::Available(_))
    }

    // write-once: later fills are ignored
    fn fill(&mut self, trailers: Headers) {
        if let TrailerCell::Pending = self {
            *self = TrailerCell::Available(trailers);
        }
    }
}

/// Engine side of an incoming body: the engine pushes DATA payloads and
/// trailers in here as they are deframed.
pub struct BodySender {
    tx: mpsc::Sender<IncomingMessageResult>,

    // total bytes received, which we keep track of, because if the peer
    // announces a content-length and sends fewer or more bytes, we will
    // error out.
    total_received: u64,
    content_length: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum IncomingBodyError {
    #[error("received {data_length} bytes in data frames but content-length announced {content_length} bytes")]
    DataLengthDoesNotMatchContentLength {
        data_length: u64,
        content_length: u64,
    },

    #[error("overflow while calculating content length")]
    OverflowWhileCalculatingContentLength,

    /// The handler dropped the body, the stream should be cancelled
    #[error("body receiver is gone")]
    Cancel,
}

b_x::make_bxable!(IncomingBodyError);

impl BodySender {
    pub async fn send_chunk(
        &mut self,
        chunk: Bytes,
        which: ChunkPosition,
    ) -> Result<(), IncomingBodyError> {
        match self.total_received.checked_add(chunk.len() as u64) {
            Some(new_total) => {
                self.total_received = new_total;
            }
            None => return Err(IncomingBodyError::OverflowWhileCalculatingContentLength),
        }

        if let Some(content_length) = self.content_length {
            if self.total_received > content_length {
                return Err(IncomingBodyError::DataLengthDoesNotMatchContentLength {
                    data_length: self.total_received,
                    content_length,
                });
            }

            if matches!(which, ChunkPosition::Last) && self.total_received != content_length {
                return Err(IncomingBodyError::DataLengthDoesNotMatchContentLength {
                    data_length: self.total_received,
                    content_length,
                });
            }
        }

        // an empty chunk means end-of-body on the receiving side, so
        // empty DATA frames are not forwarded
        if chunk.is_empty() {
            return Ok(());
        }

        trace!(len = chunk.len(), total = self.total_received, "incoming chunk");
        if self
            .tx
            .send(Ok(IncomingMessage::Chunk(chunk)))
            .await
            .is_err()
        {
            // the body is being ignored, so the stream can be reset
            return Err(IncomingBodyError::Cancel);
        }
        Ok(())
    }

    /// Ends the body with trailers. If fewer bytes than the announced
    /// content-length were received, the reader gets an error instead.
    pub async fn send_trailers(self, trailers: Headers) -> Result<(), IncomingBodyError> {
        self.check_complete().await?;
        debug!(count = trailers.len(), "incoming trailers");
        let _ = self.tx.send(Ok(IncomingMessage::Trailers(trailers))).await;
        Ok(())
    }

    /// Ends the body without trailers. If fewer bytes than the announced
    /// content-length were received, the reader gets an error instead.
    pub async fn finish(self) -> Result<(), IncomingBodyError> {
        self.check_complete().await
    }

    /// The stream was reset: the reader gets an error instead of an end-of-body
    pub async fn reset(self) {
        let _ = self.tx.send(Err(BodyError::StreamReset)).await;
    }

    async fn check_complete(&self) -> Result<(), IncomingBodyError> {
        if let Some(content_length) = self.content_length {
            if self.total_received != content_length {
                let data_length = self.total_received;
                // a truncated body must not look complete to the handler
                let _ = self
                    .tx
                    .send(Err(BodyError::ContentLengthMismatch {
                        data_length,
                        content_length,
                    }))
                    .await;
                return Err(IncomingBodyError::DataLengthDoesNotMatchContentLength {
                    data_length,
                    content_length,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum BodyError {
    #[error("stream reset")]
    StreamReset,

    /// The body ended before (or after) the announced content-length
    #[error("body ended after {data_length} bytes but content-length announced {content_length} bytes")]
    ContentLengthMismatch {
        data_length: u64,
        content_length: u64,
    },
}

b_x::make_bxable!(BodyError);

/// Handler side of an incoming body (a server's request body, a client's
/// response body).
///
/// [IncomingBody::read_chunk] returns non-empty chunks until the body is
/// exhausted, then empty chunks forever. The trailers become available
/// once an empty chunk has been returned.
#[derive(Debug)]
pub struct IncomingBody {
    content_length: Option<u64>,
    rx: Option<mpsc::Receiver<IncomingMessageResult>>,
    // set once the body failed, every later read returns it again
    failed: Option<BodyError>,
    trailers: TrailerCell,
}

impl IncomingBody {
    /// Creates a connected pair: the engine keeps the sender, the handler
    /// gets the body. `capacity` is how many chunks can be buffered
    /// before [BodySender::send_chunk] waits for the reader.
    pub fn channel(content_length: Option<u64>, capacity: usize) -> (BodySender, IncomingBody) {
        let (tx, rx) = mpsc::channel(capacity);
        let sender = BodySender {
            tx,
            total_received: 0,
            content_length,
        };
        let body = IncomingBody {
            content_length,
            rx: Some(rx),
            failed: None,
            trailers: TrailerCell::Pending,
        };
        (sender, body)
    }

    /// A body with no bytes and no trailers
    pub fn empty() -> Self {
        Self {
            content_length: Some(0),
            rx: None,
            failed: None,
            trailers: TrailerCell::Pending,
        }
    }

    pub fn content_len(&self) -> Option<u64> {
        self.content_length
    }

    /// True once the end of the body has been observed
    pub fn eof(&self) -> bool {
        self.trailers.is_available()
    }

    pub async fn read_chunk(&mut self) -> Result<Bytes, BodyError> {
        if let Some(e) = &self.failed {
            return Err(e.clone());
        }

        let Some(rx) = self.rx.as_mut() else {
            self.trailers.fill(Headers::new());
            return Ok(Bytes::new());
        };

        match rx.recv().await {
            Some(Ok(IncomingMessage::Chunk(chunk))) => Ok(chunk),
            Some(Ok(IncomingMessage::Trailers(trailers))) => {
                self.rx = None;
                self.trailers.fill(trailers);
                Ok(Bytes::new())
            }
            Some(Err(e)) => {
                self.rx = None;
                self.failed = Some(e.clone());
                Err(e)
            }
            None => {
                self.rx = None;
                self.trailers.fill(Headers::new());
                Ok(Bytes::new())
            }
        }
    }

    /// Reads the whole body into memory
    pub async fn read_to_end(&mut self) -> Result<Bytes, BodyError> {
        let mut out = bytes::BytesMut::new();
        loop {
            let chunk = self.read_chunk().await?;
            if chunk.is_empty() {
                return Ok(out.freeze());
            }
            out.extend_from_slice(&chunk);
        }
    }

    pub fn trailers(&self) -> &TrailerCell {
        &self.trailers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn trailers_only_after_end_of_body() {
        let (mut tx, mut body) = IncomingBody::channel(Some(6), 4);
        tx.send_chunk("abc".into(), ChunkPosition::NotLast)
            .await
            .unwrap();
        tx.send_chunk("def".into(), ChunkPosition::NotLast)
            .await
            .unwrap();
        let mut trailers = Headers::new();
        trailers.insert("grpc-status", HeaderValue::from_static("0"));
        tx.send_trailers(trailers).await.unwrap();

        assert_eq!(&body.read_chunk().await.unwrap()[..], b"abc");
        assert!(body.trailers().get().is_none());
        assert_eq!(&body.read_chunk().await.unwrap()[..], b"def");
        assert!(!body.eof());

        assert!(body.read_chunk().await.unwrap().is_empty());
        assert!(body.eof());
        assert_eq!(
            body.trailers().get().unwrap().get("grpc-status").unwrap(),
            "0"
        );
    }

    #[tokio::test]
    async fn exhausted_body_stays_exhausted() {
        let (mut tx, mut body) = IncomingBody::channel(None, 4);
        tx.send_chunk("only".into(), ChunkPosition::Last)
            .await
            .unwrap();
        tx.finish().await.unwrap();

        assert_eq!(&body.read_chunk().await.unwrap()[..], b"only");
        for _ in 0..3 {
            assert!(body.read_chunk().await.unwrap().is_empty());
        }
        assert!(body.trailers().get().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_body_has_empty_trailers_after_first_read() {
        let mut body = IncomingBody::empty();
        assert!(!body.trailers().is_available());
        assert!(body.read_chunk().await.unwrap().is_empty());
        assert!(body.trailers().get().unwrap().is_empty());
    }

    #[tokio::test]
    async fn content_length_is_enforced() {
        let (mut tx, _body) = IncomingBody::channel(Some(3), 4);
        let res = tx.send_chunk("abcd".into(), ChunkPosition::NotLast).await;
        assert!(matches!(
            res,
            Err(IncomingBodyError::DataLengthDoesNotMatchContentLength {
                data_length: 4,
                content_length: 3
            })
        ));

        let (mut tx, _body) = IncomingBody::channel(Some(3), 4);
        let res = tx.send_chunk("ab".into(), ChunkPosition::Last).await;
        assert!(res.is_err());

        let (mut tx, _body) = IncomingBody::channel(Some(3), 4);
        tx.send_chunk("ab".into(), ChunkPosition::NotLast)
            .await
            .unwrap();
        assert!(tx.finish().await.is_err());
    }

    #[tokio::test]
    async fn truncated_body_is_an_error_for_the_reader() {
        let (mut tx, mut body) = IncomingBody::channel(Some(10), 4);
        tx.send_chunk("abc".into(), ChunkPosition::NotLast)
            .await
            .unwrap();
        let res = tx.finish().await;
        assert!(matches!(
            res,
            Err(IncomingBodyError::DataLengthDoesNotMatchContentLength {
                data_length: 3,
                content_length: 10
            })
        ));

        assert_eq!(&body.read_chunk().await.unwrap()[..], b"abc");
        for _ in 0..2 {
            assert!(matches!(
                body.read_chunk().await,
                Err(BodyError::ContentLengthMismatch {
                    data_length: 3,
                    content_length: 10
                })
            ));
        }
        assert!(!body.eof());
        assert!(body.trailers().get().is_none());
    }

    #[tokio::test]
    async fn truncated_body_with_trailers_is_an_error_too() {
        let (mut tx, mut body) = IncomingBody::channel(Some(6), 4);
        tx.send_chunk("abc".into(), ChunkPosition::NotLast)
            .await
            .unwrap();
        let mut trailers = Headers::new();
        trailers.insert("grpc-status", HeaderValue::from_static("0"));
        assert!(tx.send_trailers(trailers).await.is_err());

        assert!(body.read_to_end().await.is_err());
        assert!(body.trailers().get().is_none());
    }

    #[tokio::test]
    async fn dropped_reader_cancels() {
        let (mut tx, body) = IncomingBody::channel(None, 1);
        drop(body);
        let res = tx.send_chunk("x".into(), ChunkPosition::NotLast).await;
        assert!(matches!(res, Err(IncomingBodyError::Cancel)));
    }

    #[tokio::test]
    async fn reset_is_sticky() {
        let (tx, mut body) = IncomingBody::channel(None, 1);
        tx.reset().await;
        assert!(body.read_chunk().await.is_err());
        assert!(body.read_chunk().await.is_err());
        assert!(body.trailers().get().is_none());
    }
}
