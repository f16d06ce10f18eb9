use std::{
    cell::{Cell, RefCell},
    fmt,
    io::SeekFrom,
    path::{Path, PathBuf},
    rc::Rc,
    time::Duration,
};

use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
    time::Instant,
};
use tracing::{debug, trace};

use crate::error::{ContractViolation, PositionReadError};

/// Reads a byte range of a file at an explicit offset, independent of
/// any stream cursor.
#[allow(async_fn_in_trait)] // we never require Send
pub trait PositionRead {
    /// Reads up to `buf.len()` bytes starting at `offset`. Never reads
    /// past the end of the file: returns fewer bytes (possibly 0) when
    /// the range extends beyond it.
    async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, PositionReadError>;
}

/// Turns a path into a [PositionRead] plus the [Sentinel] that governs
/// its lifetime.
#[allow(async_fn_in_trait)] // we never require Send
pub trait PositionReadMaker {
    type Reader: PositionRead;

    async fn open(&self, path: &Path) -> Result<(Self::Reader, Sentinel), PositionReadError>;
}

/// Lifecycle handle for a position-read resource. Exactly one discipline
/// applies for the whole life of the resource.
pub enum Sentinel {
    /// Must be invoked once the resource is no longer needed (or has been
    /// idle for too long). Reads never invoke it.
    Closer(Box<dyn FnOnce()>),

    /// Must be invoked after every successful read to keep the resource
    /// alive. Closing is up to whoever handed out the sentinel.
    Refresher(Box<dyn Fn()>),
}

impl Sentinel {
    pub fn closer(close: impl FnOnce() + 'static) -> Self {
        Sentinel::Closer(Box::new(close))
    }

    pub fn refresher(refresh: impl Fn() + 'static) -> Self {
        Sentinel::Refresher(Box::new(refresh))
    }

    pub fn discipline(&self) -> &'static str {
        match self {
            Sentinel::Closer(_) => "closer",
            Sentinel::Refresher(_) => "refresher",
        }
    }
}

impl fmt::Debug for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Sentinel").field(&self.discipline()).finish()
    }
}

/// Scoped ownership of a [Sentinel]: a closer fires exactly once, when
/// the guard is closed or dropped (including when the future driving the
/// body is cancelled), a refresher fires after every successful read.
#[derive(Debug)]
pub struct SentinelGuard {
    sentinel: Option<Sentinel>,
}

impl SentinelGuard {
    pub fn new(sentinel: Sentinel) -> Self {
        Self {
            sentinel: Some(sentinel),
        }
    }

    /// Applies the sentinel's discipline after a successful read
    pub fn on_read(&self) {
        if let Some(Sentinel::Refresher(refresh)) = &self.sentinel {
            refresh();
        }
    }

    /// Explicitly refreshes: only legal for refreshers
    pub fn refresh(&self) -> Result<(), ContractViolation> {
        match &self.sentinel {
            Some(Sentinel::Refresher(refresh)) => {
                refresh();
                Ok(())
            }
            Some(other) => Err(ContractViolation::SentinelDiscipline {
                action: "refresh",
                discipline: other.discipline(),
            }),
            None => Ok(()),
        }
    }

    /// Explicitly closes: only legal for closers
    pub fn close(mut self) -> Result<(), ContractViolation> {
        match self.sentinel.take() {
            Some(Sentinel::Closer(close)) => {
                close();
                Ok(())
            }
            Some(other) => {
                let discipline = other.discipline();
                self.sentinel = Some(other);
                Err(ContractViolation::SentinelDiscipline {
                    action: "close",
                    discipline,
                })
            }
            None => Ok(()),
        }
    }
}

impl Drop for SentinelGuard {
    fn drop(&mut self) {
        if let Some(Sentinel::Closer(close)) = self.sentinel.take() {
            trace!("sentinel guard dropped, closing resource");
            close();
        }
    }
}

/// A file handle shared between a reader and its sentinel, so that the
/// sentinel can close the file out from under the reader.
struct SharedFile {
    path: PathBuf,
    file: RefCell<Option<File>>,
    closed: Cell<bool>,
}

impl SharedFile {
    fn new(path: &Path, file: File) -> Rc<Self> {
        Rc::new(Self {
            path: path.to_owned(),
            file: RefCell::new(Some(file)),
            closed: Cell::new(false),
        })
    }

    fn close(&self) {
        if !self.closed.replace(true) {
            debug!(path = %self.path.display(), "closing file");
            self.file.borrow_mut().take();
        }
    }

    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, PositionReadError> {
        // the file is taken out of the cell for the duration of the read,
        // so that no borrow is held across an await point
        let Some(mut file) = self.file.borrow_mut().take() else {
            return Err(PositionReadError::Closed {
                path: self.path.clone(),
            });
        };

        let res = read_fully_at(&mut file, offset, buf).await;
        if !self.closed.get() {
            *self.file.borrow_mut() = Some(file);
        }

        let n = res.map_err(|e| PositionReadError::from_io(&self.path, e))?;
        trace!(path = %self.path.display(), %offset, want = buf.len(), got = n, "read_at");
        Ok(n)
    }
}

async fn read_fully_at(file: &mut File, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
    file.seek(SeekFrom::Start(offset)).await?;

    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Reader handed out by the file-based makers
pub struct FileReader {
    shared: Rc<SharedFile>,
}

impl PositionRead for FileReader {
    async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, PositionReadError> {
        self.shared.read_at(offset, buf).await
    }
}

async fn open_shared(path: &Path) -> Result<Rc<SharedFile>, PositionReadError> {
    let file = File::open(path)
        .await
        .map_err(|e| PositionReadError::from_io(path, e))?;
    debug!(path = %path.display(), "opened file");
    Ok(SharedFile::new(path, file))
}

/// The reference position-read maker: opens the file on every call and
/// hands out a [Sentinel::Closer] that closes it.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilePositionReadMaker;

impl PositionReadMaker for FilePositionReadMaker {
    type Reader = FileReader;

    async fn open(&self, path: &Path) -> Result<(FileReader, Sentinel), PositionReadError> {
        let shared = open_shared(path).await?;
        let sentinel = Sentinel::closer({
            let shared = shared.clone();
            move || shared.close()
        });
        Ok((FileReader { shared }, sentinel))
    }
}

/// A position-read maker that hands out [Sentinel::Refresher]s: the file
/// is closed by a watchdog task once it hasn't been read from for `idle`.
///
/// [PositionReadMaker::open] spawns that task with
/// [tokio::task::spawn_local], so it must be called from within a
/// [tokio::task::LocalSet].
#[derive(Debug, Clone, Copy)]
pub struct IdleFilePositionReadMaker {
    pub idle: Duration,
}

impl IdleFilePositionReadMaker {
    pub fn new(idle: Duration) -> Self {
        Self { idle }
    }
}

impl PositionReadMaker for IdleFilePositionReadMaker {
    type Reader = FileReader;

    async fn open(&self, path: &Path) -> Result<(FileReader, Sentinel), PositionReadError> {
        let shared = open_shared(path).await?;
        let idle = self.idle;
        let deadline = Rc::new(Cell::new(Instant::now() + idle));

        tokio::task::spawn_local({
            let shared = shared.clone();
            let deadline = deadline.clone();
            async move {
                loop {
                    tokio::time::sleep_until(deadline.get()).await;
                    if shared.closed.get() {
                        break;
                    }
                    if deadline.get() <= Instant::now() {
                        debug!(path = %shared.path.display(), ?idle, "file idle, closing");
                        shared.close();
                        break;
                    }
                }
            }
        });

        let sentinel = Sentinel::refresher(move || deadline.set(Instant::now() + idle));
        Ok((FileReader { shared }, sentinel))
    }
}
