use std::{io, path::Path, path::PathBuf};

use b_x::{make_bxable, BX};

/// Programming defects in handler (or engine) code. These are reported
/// separately from I/O failures so that they don't get mistaken for a
/// flaky disk or a peer hanging up.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ContractViolation {
    /// A chunk was folded into a trailers maker that already produced
    /// its final trailers
    #[error("trailers maker received a body chunk after producing its final trailers")]
    FoldAfterFinal,

    /// Final trailers were requested twice
    #[error("trailers maker was asked for its final trailers more than once")]
    FinishedTwice,

    /// A streaming body writer was used after the producing closure returned
    #[error("streaming body writer used after the body producer returned")]
    WriterUsedAfterReturn,

    /// A sentinel action was invoked that doesn't belong to the
    /// sentinel's discipline (refreshing a closer, closing a refresher)
    #[error("cannot {action} a {discipline} sentinel")]
    SentinelDiscipline {
        action: &'static str,
        discipline: &'static str,
    },
}

make_bxable!(ContractViolation);

/// Failures of a position-read resource: opening the file, or reading from it.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum PositionReadError {
    #[error("file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The resource's sentinel already closed it
    #[error("position read resource for {path} is closed")]
    Closed { path: PathBuf },
}

impl PositionReadError {
    /// Classify an I/O error that happened while accessing `path`
    pub fn from_io(path: &Path, source: io::Error) -> Self {
        let path = path.to_owned();
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound { path },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            _ => Self::Io { path, source },
        }
    }
}

make_bxable!(PositionReadError);

/// Errors that can happen while driving a body producer to completion.
///
/// Resource errors are not part of this: a failing file ends the body
/// early and is reported in [crate::DriveReport] instead.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum DriveError<SinkError> {
    /// The engine-side sink refused a chunk, a flush or the end of body
    #[error("body sink error: {0}")]
    Sink(SinkError),

    /// A streaming producer returned an error
    #[error("body producer failed: {0}")]
    Producer(BX),

    #[error("contract violation: {0}")]
    Contract(#[from] ContractViolation),
}

impl<SinkError> From<DriveError<SinkError>> for BX
where
    SinkError: std::error::Error + 'static,
{
    fn from(e: DriveError<SinkError>) -> Self {
        BX::from_err(e)
    }
}

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("buffer size must be greater than zero")]
    ZeroBufferSize,
}

make_bxable!(ConfigError);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_io_errors_by_kind() {
        let path = Path::new("/nope");
        assert!(matches!(
            PositionReadError::from_io(path, io::ErrorKind::NotFound.into()),
            PositionReadError::NotFound { .. }
        ));
        assert!(matches!(
            PositionReadError::from_io(path, io::ErrorKind::PermissionDenied.into()),
            PositionReadError::PermissionDenied { .. }
        ));
        assert!(matches!(
            PositionReadError::from_io(path, io::ErrorKind::UnexpectedEof.into()),
            PositionReadError::Io { .. }
        ));
    }

    #[test]
    fn contract_violations_box_up() {
        let bx: BX = ContractViolation::FoldAfterFinal.into();
        assert!(bx.to_string().contains("after producing its final trailers"));
    }
}
