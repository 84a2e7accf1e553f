//! Demuxing and detection error handling.

use std::{
    borrow::Cow,
    error::Error,
    fmt,
    io::{Error as IoError, ErrorKind as IoErrorKind},
};

/// Errors encountered while reading, parsing, or seeking within a container.
///
/// A container *not* matching a given probe is never an error: probes report
/// this by returning `Ok(None)`. Likewise, recognised-but-unplayable content
/// is reported as [`DetectionResult::Unsupported`].
///
/// [`DetectionResult::Unsupported`]: crate::container::DetectionResult::Unsupported
#[derive(Debug)]
#[non_exhaustive]
pub enum DemuxError {
    /// The underlying byte source failed, or ended early.
    ///
    /// These are passed through unchanged from the stream, and are never retried.
    Io(IoError),
    /// The data was identified as a given container, but its structure is invalid.
    ///
    /// This is fatal for the track in question.
    Malformed(Cow<'static, str>),
    /// The container holds content which this crate cannot hand on to a decoder.
    Unsupported(String),
    /// A seek was requested which the stream or container cannot perform.
    Unseekable,
    /// A blocking read was preempted by a request sent through an [`Interrupter`].
    ///
    /// [`Interrupter`]: crate::input::Interrupter
    Cancelled,
}

impl DemuxError {
    /// Shorthand for a structural error with a fixed description.
    pub(crate) fn malformed(why: &'static str) -> Self {
        Self::Malformed(Cow::Borrowed(why))
    }

    /// Shorthand for a structural error with a computed description.
    pub(crate) fn malformed_owned(why: String) -> Self {
        Self::Malformed(Cow::Owned(why))
    }

    /// Returns whether this error was caused by the stream ending early.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == IoErrorKind::UnexpectedEof)
    }

    /// Returns whether this error represents a cancellation request, rather than a failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for DemuxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to demux stream: ")?;
        match self {
            Self::Io(e) => write!(f, "i/o error ({})", e),
            Self::Malformed(why) => write!(f, "malformed data ({})", why),
            Self::Unsupported(why) => write!(f, "unsupported content ({})", why),
            Self::Unseekable => write!(f, "stream cannot seek to requested position"),
            Self::Cancelled => write!(f, "read was interrupted"),
        }
    }
}

impl Error for DemuxError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IoError> for DemuxError {
    fn from(e: IoError) -> Self {
        if is_cancellation(&e) {
            Self::Cancelled
        } else {
            Self::Io(e)
        }
    }
}

impl From<DemuxError> for IoError {
    fn from(e: DemuxError) -> Self {
        match e {
            DemuxError::Io(e) => e,
            DemuxError::Cancelled => cancellation(),
            other => IoError::new(IoErrorKind::Other, other),
        }
    }
}

/// Marker carried inside an `io::Error` when a read is preempted.
///
/// `ErrorKind::Interrupted` can't be used for this, as `Read::read_exact`
/// silently retries on it.
#[derive(Debug)]
struct CancelledMarker;

impl fmt::Display for CancelledMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("read cancelled")
    }
}

impl Error for CancelledMarker {}

pub(crate) fn cancellation() -> IoError {
    IoError::new(IoErrorKind::Other, CancelledMarker)
}

fn is_cancellation(e: &IoError) -> bool {
    e.get_ref().map_or(false, |inner| inner.is::<CancelledMarker>())
}

/// Convenience type for demuxing operations.
pub type Result<T> = std::result::Result<T, DemuxError>;
