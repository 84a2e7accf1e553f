//! Frame-by-frame access to the audio inside a detected container.
//!
//! Once a stream has been detected as [`Supported`], its [`ContainerDescriptor`]
//! builds a [`FrameProvider`] over a fresh stream. Providers are driven on a
//! single thread: [`FrameProvider::provide_frames`] blocks, handing packets to a
//! [`PacketSink`] until the track ends.
//!
//! To seek or stop a track while it is being read, wrap its stream in an
//! [`InterruptibleStream`] and run the provider using [`drive`].
//!
//! [`Supported`]: crate::container::DetectionResult::Supported
//! [`ContainerDescriptor`]: crate::container::ContainerDescriptor
//! [`InterruptibleStream`]: crate::input::InterruptibleStream

mod format;
mod packet;

pub use self::{format::*, packet::*};

use crate::{
    error::{DemuxError, Result},
    input::{Interrupt, Interrupter},
};
use tracing::debug;

/// Reads packets from a single audio track of a container.
pub trait FrameProvider: Send {
    /// Codec and layout of the packets produced by this provider.
    fn format(&self) -> &AudioFormat;

    /// Whether [`seek_to_timecode`] can succeed on this track.
    ///
    /// [`seek_to_timecode`]: FrameProvider::seek_to_timecode
    fn is_seekable(&self) -> bool;

    /// Read packets into `sink` until the end of the track.
    ///
    /// This returns early if `sink` or the underlying stream returns an error,
    /// including [`DemuxError::Cancelled`] if a read is interrupted. In this case,
    /// the provider remains valid and reading may be resumed (typically after a seek).
    fn provide_frames(&mut self, sink: &mut dyn PacketSink) -> Result<()>;

    /// Move to the given timecode (in milliseconds).
    ///
    /// Returns the timecode actually reached, which may be earlier than requested for
    /// containers which can only seek to certain points (such as keyframes, chunks,
    /// or fragments). Where a container has no coarse index, packets before
    /// the target are discarded during the next call to [`provide_frames`].
    ///
    /// [`provide_frames`]: FrameProvider::provide_frames
    fn seek_to_timecode(&mut self, timecode: u64) -> Result<u64>;
}

/// Run a frame provider to completion, servicing seek and stop requests.
///
/// `interrupter` must be the handle of the [`InterruptibleStream`] which the provider
/// reads from. Returns `Ok` once the track ends or a stop is requested.
///
/// [`InterruptibleStream`]: crate::input::InterruptibleStream
pub fn drive(
    provider: &mut dyn FrameProvider,
    sink: &mut dyn PacketSink,
    interrupter: &Interrupter,
) -> Result<()> {
    let mut pending_seek = None;

    loop {
        let outcome = match pending_seek.take() {
            Some(timecode) => provider.seek_to_timecode(timecode).map(|reached| {
                debug!("Seek to {}ms landed at {}ms.", timecode, reached);
            }),
            None => match provider.provide_frames(sink) {
                Ok(()) => return Ok(()),
                Err(e) => Err(e),
            },
        };

        match outcome {
            Ok(()) => {},
            Err(DemuxError::Cancelled) => match interrupter.take_latched() {
                Some(Interrupt::Seek(timecode)) => pending_seek = Some(timecode),
                Some(Interrupt::Stop) => return Ok(()),
                None => return Err(DemuxError::Cancelled),
            },
            Err(e) => return Err(e),
        }
    }
}
