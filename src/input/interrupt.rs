use super::{metadata::TrackInfoProvider, SeekableStream};
use crate::error::{cancellation, Result};
use flume::{Receiver, Sender};
use parking_lot::Mutex;
use std::{
    io::{Read, Result as IoResult},
    sync::Arc,
};

/// A request which preempts any blocking read in progress on a track.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Interrupt {
    /// Move playback to the given timecode, in milliseconds.
    Seek(u64),
    /// End playback.
    Stop,
}

/// Sends [`Interrupt`]s to an [`InterruptibleStream`], from any thread.
#[derive(Clone, Debug)]
pub struct Interrupter {
    tx: Sender<Interrupt>,
    latch: Arc<Mutex<Option<Interrupt>>>,
}

impl Interrupter {
    /// Request that the stream's reader seeks to `timecode` (ms).
    ///
    /// Returns `false` if the stream has since been dropped.
    pub fn seek(&self, timecode: u64) -> bool {
        self.tx.send(Interrupt::Seek(timecode)).is_ok()
    }

    /// Request that the stream's reader stops.
    ///
    /// Returns `false` if the stream has since been dropped.
    pub fn stop(&self) -> bool {
        self.tx.send(Interrupt::Stop).is_ok()
    }

    /// Remove and return the interrupt which most recently preempted a read.
    ///
    /// Reads on the stream fail with [`DemuxError::Cancelled`] until this is called.
    ///
    /// [`DemuxError::Cancelled`]: crate::error::DemuxError::Cancelled
    pub fn take_latched(&self) -> Option<Interrupt> {
        self.latch.lock().take()
    }
}

/// A stream whose reads are cancelled when an [`Interrupter`] sends a request.
///
/// Every read first checks for pending requests: if one is present, it is
/// latched and the read fails with [`DemuxError::Cancelled`] without consuming
/// any data. The latched request is then serviced by whoever holds the
/// [`Interrupter`] (see [`drive`]).
///
/// [`DemuxError::Cancelled`]: crate::error::DemuxError::Cancelled
/// [`drive`]: crate::tracks::drive
pub struct InterruptibleStream<S> {
    inner: S,
    rx: Receiver<Interrupt>,
    latch: Arc<Mutex<Option<Interrupt>>>,
}

impl<S: SeekableStream> InterruptibleStream<S> {
    /// Wrap a stream, returning the handle used to interrupt it.
    pub fn new(inner: S) -> (Self, Interrupter) {
        let (tx, rx) = flume::unbounded();
        let latch = Arc::new(Mutex::new(None));

        (
            Self {
                inner,
                rx,
                latch: latch.clone(),
            },
            Interrupter { tx, latch },
        )
    }

    fn check(&self) -> IoResult<()> {
        let mut latch = self.latch.lock();

        if latch.is_none() {
            *latch = self.rx.try_recv().ok();
        }

        if latch.is_some() {
            Err(cancellation())
        } else {
            Ok(())
        }
    }

    /// Consume this wrapper, returning the inner stream.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: SeekableStream> Read for InterruptibleStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        self.check()?;
        self.inner.read(buf)
    }
}

impl<S: SeekableStream> SeekableStream for InterruptibleStream<S> {
    fn position(&self) -> u64 {
        self.inner.position()
    }

    fn content_length(&self) -> Option<u64> {
        self.inner.content_length()
    }

    fn can_seek_hard(&self) -> bool {
        self.inner.can_seek_hard()
    }

    fn max_skip_distance(&self) -> u64 {
        self.inner.max_skip_distance()
    }

    fn seek_hard(&mut self, position: u64) -> Result<()> {
        self.check()?;
        self.inner.seek_hard(position)
    }

    fn track_info_providers(&self) -> Vec<&dyn TrackInfoProvider> {
        self.inner.track_info_providers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::DemuxError, input::SourceStream, Config};

    #[test]
    fn read_fails_until_interrupt_is_taken() {
        let cfg = Config::default();
        let (mut stream, handle) =
            InterruptibleStream::new(SourceStream::from_memory(vec![7; 16], &cfg));

        let mut b = [0u8; 4];
        stream.read_exact(&mut b).unwrap();

        assert!(handle.seek(1000));
        let err: DemuxError = stream.read_exact(&mut b).unwrap_err().into();
        assert!(err.is_cancelled());
        assert_eq!(stream.position(), 4);

        assert_eq!(handle.take_latched(), Some(Interrupt::Seek(1000)));
        stream.read_exact(&mut b).unwrap();
        assert_eq!(stream.position(), 8);
    }
}
