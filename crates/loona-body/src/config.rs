use std::{io, rc::Rc};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::{error::ConfigError, BodyConf, FilePositionReadMaker};

/// HTTP/2's default SETTINGS_MAX_FRAME_SIZE
pub const DEFAULT_BUFFER_SIZE: usize = 16_384;

/// Sends a whole buffer to the peer
#[allow(async_fn_in_trait)] // we never require Send
pub trait SendAll {
    async fn send_all(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// Receives exactly `n` bytes from the peer
#[allow(async_fn_in_trait)] // we never require Send
pub trait RecvExact {
    async fn recv_exact(&mut self, n: usize) -> io::Result<Bytes>;
}

/// The I/O primitives an engine is parameterized over
pub struct Config<T, M = FilePositionReadMaker> {
    /// Buffer frames are serialized into, `buffer_size` bytes of capacity
    pub write_buffer: BytesMut,

    pub buffer_size: usize,

    /// Bulk send and bulk receive
    pub transport: T,

    /// Turns file bodies into position reads
    pub position_read_maker: Rc<M>,
}

impl<T> Config<T> {
    pub fn new(transport: T, buffer_size: usize) -> Result<Self, ConfigError> {
        if buffer_size == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }

        Ok(Self {
            write_buffer: BytesMut::with_capacity(buffer_size),
            buffer_size,
            transport,
            position_read_maker: Rc::new(FilePositionReadMaker),
        })
    }
}

impl<T, M> Config<T, M> {
    pub fn with_position_read_maker<M2>(self, maker: M2) -> Config<T, M2> {
        Config {
            write_buffer: self.write_buffer,
            buffer_size: self.buffer_size,
            transport: self.transport,
            position_read_maker: Rc::new(maker),
        }
    }

    /// What the body driver needs out of this config. Fails if
    /// `buffer_size` was set to zero after construction.
    pub fn body_conf(&self) -> Result<BodyConf<M>, ConfigError> {
        BodyConf::new(self.buffer_size, self.position_read_maker.clone())
    }
}

/// Adapts a byte stream (TCP, TLS, a pipe...) into [SendAll] and [RecvExact]
pub struct StreamTransport<S> {
    stream: S,
}

impl<S> StreamTransport<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S> SendAll for StreamTransport<S>
where
    S: AsyncWrite + Unpin,
{
    async fn send_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        trace!(len = bytes.len(), "send_all");
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }
}

impl<S> RecvExact for StreamTransport<S>
where
    S: AsyncRead + Unpin,
{
    async fn recv_exact(&mut self, n: usize) -> io::Result<Bytes> {
        recv_exact(&mut self.stream, n).await
    }
}

/// Reads until exactly `n` bytes have been received. A source that ends
/// early is an error, not a short result.
pub async fn recv_exact(reader: &mut (impl AsyncRead + Unpin), n: usize) -> io::Result<Bytes> {
    let mut buf = BytesMut::zeroed(n);
    let mut filled = 0;

    while filled < n {
        let read = reader.read(&mut buf[filled..]).await?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("wanted {n} bytes, source ended after {filled}"),
            ));
        }
        filled += read;
        trace!(%read, %filled, want = n, "recv_exact");
    }

    Ok(buf.freeze())
}
