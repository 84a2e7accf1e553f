/// The codec, and framing, of the packets produced by a [`FrameProvider`].
///
/// [`FrameProvider`]: super::FrameProvider
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Codec {
    /// Raw AAC access units.
    Aac {
        /// The `AudioSpecificConfig` required to initialise a decoder.
        decoder_config: Vec<u8>,
    },
    /// MPEG audio frames, including their headers.
    Mp3,
    /// Opus packets.
    Opus {
        /// Opus identification header (`OpusHead`, or the body of an MP4 `dOps` box).
        header: Vec<u8>,
        /// Number of samples (at 48kHz) to discard from the start of decoded output.
        pre_skip: u16,
    },
    /// Vorbis audio packets.
    Vorbis {
        /// Identification header packet.
        identification: Vec<u8>,
        /// Setup header packet, holding codebooks.
        setup: Vec<u8>,
    },
    /// Interleaved 16-bit signed PCM, already decoded.
    Pcm,
}

impl Codec {
    /// Short, human-readable name for this codec.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Aac { .. } => "aac",
            Self::Mp3 => "mp3",
            Self::Opus { .. } => "opus",
            Self::Vorbis { .. } => "vorbis",
            Self::Pcm => "pcm",
        }
    }
}

/// Properties of the audio held by a track.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AudioFormat {
    /// Codec of every packet in the track.
    pub codec: Codec,
    /// Sample rate of the track, in Hz.
    pub sample_rate: u32,
    /// Number of audio channels.
    pub channels: u16,
}

impl AudioFormat {
    /// Create a new audio format description.
    #[must_use]
    pub fn new(codec: Codec, sample_rate: u32, channels: u16) -> Self {
        Self {
            codec,
            sample_rate,
            channels,
        }
    }

    /// Shorthand for 16-bit interleaved PCM.
    #[must_use]
    pub fn pcm(sample_rate: u32, channels: u16) -> Self {
        Self::new(Codec::Pcm, sample_rate, channels)
    }
}
