use crate::error::{DemuxError, Result};
use flume::Sender;

/// Payload of a single demuxed packet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PacketData {
    /// One frame of compressed audio, to be handed to a decoder.
    Encoded(Vec<u8>),
    /// Decoded, interleaved, 16-bit PCM samples.
    Pcm(Vec<i16>),
}

/// A unit of audio produced by a [`FrameProvider`].
///
/// [`FrameProvider`]: super::FrameProvider
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Packet {
    /// Presentation time of the packet's first sample, in milliseconds.
    pub timecode: u64,
    /// Audio contents.
    pub data: PacketData,
}

impl Packet {
    /// A packet of encoded data.
    #[must_use]
    pub fn encoded(timecode: u64, data: Vec<u8>) -> Self {
        Self {
            timecode,
            data: PacketData::Encoded(data),
        }
    }

    /// A packet of decoded samples.
    #[must_use]
    pub fn pcm(timecode: u64, samples: Vec<i16>) -> Self {
        Self {
            timecode,
            data: PacketData::Pcm(samples),
        }
    }

    /// Length of the payload, in bytes for encoded data or samples for PCM.
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.data {
            PacketData::Encoded(v) => v.len(),
            PacketData::Pcm(v) => v.len(),
        }
    }

    /// Whether this packet carries no audio.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Destination for the packets produced by a [`FrameProvider`].
///
/// [`FrameProvider`]: super::FrameProvider
pub trait PacketSink {
    /// Accept the next packet in presentation order.
    ///
    /// Returning an error stops frame provision, passing the error to the caller.
    fn push(&mut self, packet: Packet) -> Result<()>;
}

impl PacketSink for Vec<Packet> {
    fn push(&mut self, packet: Packet) -> Result<()> {
        Vec::push(self, packet);
        Ok(())
    }
}

impl PacketSink for Sender<Packet> {
    fn push(&mut self, packet: Packet) -> Result<()> {
        // A dropped receiver means nobody is left to play the track.
        self.send(packet).map_err(|_| DemuxError::Cancelled)
    }
}
