use std::{fmt, future::Future, path::PathBuf, rc::Rc};

use b_x::BX;
use bytes::{Bytes, BytesMut};
use futures_util::future::LocalBoxFuture;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::{
    error::{ConfigError, ContractViolation, DriveError, PositionReadError},
    Headers, PositionRead, PositionReadMaker, SentinelGuard, TrailersMaker, TrailersTracker,
};

/// How the bytes of an outgoing body are obtained
pub enum BodyProducer {
    /// No body at all
    Empty,

    /// A body fully built in memory before sending. It is sent in
    /// buffer-sized chunks.
    Builder(Bytes),

    /// A body pushed by a closure through a [BodyWriter]
    Streaming(StreamingBody),

    /// A region of a file, read through a [PositionReadMaker]
    File(FileSpec),
}

impl BodyProducer {
    pub fn streaming<F, Fut>(produce: F) -> Self
    where
        F: FnOnce(BodyWriter) -> Fut + 'static,
        Fut: Future<Output = Result<(), BX>> + 'static,
    {
        BodyProducer::Streaming(StreamingBody(Box::new(move |writer| {
            let fut: LocalBoxFuture<'static, Result<(), BX>> = Box::pin(produce(writer));
            fut
        })))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            BodyProducer::Empty => true,
            BodyProducer::Builder(bytes) => bytes.is_empty(),
            BodyProducer::File(spec) => spec.count == 0,
            BodyProducer::Streaming(_) => false,
        }
    }
}

impl fmt::Debug for BodyProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyProducer::Empty => f.write_str("Empty"),
            BodyProducer::Builder(bytes) => f.debug_tuple("Builder").field(&bytes.len()).finish(),
            BodyProducer::Streaming(_) => f.write_str("Streaming"),
            BodyProducer::File(spec) => f.debug_tuple("File").field(spec).finish(),
        }
    }
}

/// A region of a file: `count` bytes starting at `offset`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    pub path: PathBuf,
    pub offset: u64,
    pub count: u64,
}

impl FileSpec {
    pub fn new(path: impl Into<PathBuf>, offset: u64, count: u64) -> Self {
        Self {
            path: path.into(),
            offset,
            count,
        }
    }
}

type ProduceFn = dyn FnOnce(BodyWriter) -> LocalBoxFuture<'static, Result<(), BX>>;

/// The closure behind [BodyProducer::Streaming]
pub struct StreamingBody(Box<ProduceFn>);

enum WriterEvent {
    Chunk(Bytes),
    Flush,
}

/// Handed to a streaming body producer. Every non-empty
/// [BodyWriter::write] becomes exactly one body chunk.
///
/// The writer is only valid while the producer runs: once it returns,
/// writes fail with [ContractViolation::WriterUsedAfterReturn].
pub struct BodyWriter {
    tx: mpsc::Sender<WriterEvent>,
}

impl BodyWriter {
    pub async fn write(&mut self, chunk: impl Into<Bytes>) -> Result<(), ContractViolation> {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return Ok(());
        }
        self.send(WriterEvent::Chunk(chunk)).await
    }

    /// Asks the engine to push out whatever it has buffered
    pub async fn flush(&mut self) -> Result<(), ContractViolation> {
        self.send(WriterEvent::Flush).await
    }

    async fn send(&mut self, ev: WriterEvent) -> Result<(), ContractViolation> {
        self.tx
            .send(ev)
            .await
            .map_err(|_| ContractViolation::WriterUsedAfterReturn)
    }
}

/// Where body chunks go: implemented by the engine for each stream.
#[allow(async_fn_in_trait)] // we never require Send
pub trait BodySink {
    type Error: std::error::Error + 'static;

    async fn write_body_chunk(&mut self, chunk: Bytes) -> Result<(), Self::Error>;

    async fn flush(&mut self) -> Result<(), Self::Error>;

    /// Ends the stream. Empty `trailers` means no trailing HEADERS frame.
    async fn write_body_end(&mut self, trailers: Headers) -> Result<(), Self::Error>;
}

/// What the body driver needs from the engine's configuration
pub struct BodyConf<M> {
    // never zero, chunking relies on it
    buffer_size: usize,
    maker: Rc<M>,
}

impl<M> BodyConf<M> {
    pub fn new(buffer_size: usize, maker: Rc<M>) -> Result<Self, ConfigError> {
        if buffer_size == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }
        Ok(Self { buffer_size, maker })
    }

    /// Largest chunk the driver hands to the sink
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn maker(&self) -> &Rc<M> {
        &self.maker
    }
}

impl<M> Clone for BodyConf<M> {
    fn clone(&self) -> Self {
        Self {
            buffer_size: self.buffer_size,
            maker: self.maker.clone(),
        }
    }
}

/// What happened while driving a body
#[derive(Debug, Default)]
pub struct DriveReport {
    /// Number of chunks handed to the sink (and folded into the trailers maker)
    pub chunks: u64,

    /// Number of body bytes handed to the sink
    pub bytes: u64,

    /// Number of trailer fields sent at the end of the body
    pub trailers: usize,

    /// If set, the file behind the body failed and the body was ended early
    pub resource_error: Option<PositionReadError>,
}

/// Drives `body` to completion: every chunk goes to `sink`, then to the
/// trailers maker, in order. Once the body is exhausted, the trailers are
/// computed and the sink is told the body ended.
///
/// A failing file (open or read) ends the body at that point, as if it
/// were exhausted; the failure is returned in [DriveReport::resource_error].
pub async fn drive_body<S, M>(
    body: BodyProducer,
    trailers: Box<dyn TrailersMaker>,
    conf: &BodyConf<M>,
    sink: &mut S,
) -> Result<DriveReport, DriveError<S::Error>>
where
    S: BodySink,
    M: PositionReadMaker,
{
    let mut out = Emitter {
        sink,
        tracker: TrailersTracker::new(trailers),
        report: DriveReport::default(),
    };

    match body {
        BodyProducer::Empty => {}
        BodyProducer::Builder(mut rest) => {
            while !rest.is_empty() {
                let n = std::cmp::min(rest.len(), conf.buffer_size);
                out.chunk(rest.split_to(n)).await?;
            }
        }
        BodyProducer::Streaming(streaming) => drive_streaming(streaming, &mut out).await?,
        BodyProducer::File(spec) => match drive_file(&spec, conf, &mut out).await {
            Ok(()) => {}
            Err(Interrupted::Resource(e)) => {
                warn!(path = %spec.path.display(), error = %e, "file body failed, ending body early");
                out.report.resource_error = Some(e);
            }
            Err(Interrupted::Fatal(e)) => return Err(e),
        },
    }

    let trailers = out.tracker.finish()?;
    out.report.trailers = trailers.len();
    debug!(
        chunks = out.report.chunks,
        bytes = out.report.bytes,
        trailers = out.report.trailers,
        "end of body"
    );
    out.sink
        .write_body_end(trailers)
        .await
        .map_err(DriveError::Sink)?;

    Ok(out.report)
}

struct Emitter<'a, S: BodySink> {
    sink: &'a mut S,
    tracker: TrailersTracker,
    report: DriveReport,
}

impl<S: BodySink> Emitter<'_, S> {
    async fn chunk(&mut self, chunk: Bytes) -> Result<(), DriveError<S::Error>> {
        if chunk.is_empty() {
            return Ok(());
        }

        let len = chunk.len();
        trace!(%len, "body chunk");
        self.sink
            .write_body_chunk(chunk.clone())
            .await
            .map_err(DriveError::Sink)?;
        self.tracker.fold(&chunk)?;

        self.report.chunks += 1;
        self.report.bytes += len as u64;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), DriveError<S::Error>> {
        self.sink.flush().await.map_err(DriveError::Sink)
    }
}

enum Interrupted<E> {
    Resource(PositionReadError),
    Fatal(DriveError<E>),
}

impl<E> From<DriveError<E>> for Interrupted<E> {
    fn from(e: DriveError<E>) -> Self {
        Interrupted::Fatal(e)
    }
}

async fn drive_file<S, M>(
    spec: &FileSpec,
    conf: &BodyConf<M>,
    out: &mut Emitter<'_, S>,
) -> Result<(), Interrupted<S::Error>>
where
    S: BodySink,
    M: PositionReadMaker,
{
    if spec.count == 0 {
        return Ok(());
    }

    let (mut reader, sentinel) = conf
        .maker
        .open(&spec.path)
        .await
        .map_err(Interrupted::Resource)?;
    debug!(path = %spec.path.display(), offset = spec.offset, count = spec.count, sentinel = sentinel.discipline(), "sending file region");

    // dropping the guard closes the file, whichever way we leave
    let guard = SentinelGuard::new(sentinel);

    let mut buf = BytesMut::with_capacity(conf.buffer_size);
    let mut offset = spec.offset;
    let mut remaining = spec.count;

    while remaining > 0 {
        let want = std::cmp::min(remaining, conf.buffer_size as u64) as usize;
        buf.clear();
        buf.resize(want, 0);

        let n = reader
            .read_at(offset, &mut buf[..want])
            .await
            .map_err(Interrupted::Resource)?;
        // a read that hits the end of the file still counts
        guard.on_read();
        if n == 0 {
            debug!(%offset, %remaining, "file ended before the announced count");
            break;
        }

        offset += n as u64;
        remaining -= n as u64;
        out.chunk(buf.split_to(n).freeze()).await?;

        if n < want {
            debug!(%offset, %remaining, "short read, file exhausted");
            break;
        }
    }

    Ok(())
}

async fn drive_streaming<S: BodySink>(
    streaming: StreamingBody,
    out: &mut Emitter<'_, S>,
) -> Result<(), DriveError<S::Error>> {
    let (tx, mut rx) = mpsc::channel::<WriterEvent>(1);
    let mut produce = std::pin::pin!((streaming.0)(BodyWriter { tx }));
    let mut producing = true;

    loop {
        tokio::select! {
            biased;

            ev = rx.recv() => match ev {
                Some(WriterEvent::Chunk(chunk)) => out.chunk(chunk).await?,
                Some(WriterEvent::Flush) => out.flush().await?,
                None => {
                    // the writer is gone, but the producer may not be done yet
                    if producing {
                        (&mut produce).await.map_err(DriveError::Producer)?;
                    }
                    break;
                }
            },
            res = &mut produce, if producing => {
                producing = false;
                // whatever was written before returning still gets sent,
                // anything after is refused
                rx.close();
                res.map_err(DriveError::Producer)?;
            }
        }
    }

    Ok(())
}
