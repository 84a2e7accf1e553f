//! Container format detection, and the parsers for each supported format.
//!
//! Each format is described by a [`ContainerProbe`], which can recognise the
//! format from the start of a stream, extract its track metadata, and later
//! build a [`FrameProvider`] for playback. Probes are held in a
//! [`ProbeRegistry`], and run in turn by a [`ContainerDetector`].
//!
//! ```rust,no_run
//! use chirp::{
//!     container::{ContainerDetector, DetectionResult, Hints, ProbeRegistry},
//!     input::{metadata::AudioReference, SourceStream},
//!     Config,
//! };
//!
//! let config = Config::default();
//! let detector = ContainerDetector::new(ProbeRegistry::default(), config.clone());
//!
//! let file = std::fs::File::open("song.flac").unwrap();
//! let mut stream = SourceStream::from_file(file, &config);
//! let reference = AudioReference::new("song.flac", None);
//! let hints = Hints::default().extension("flac");
//!
//! if let DetectionResult::Supported { descriptor, track_info } =
//!     detector.detect(&reference, &mut stream, &hints).unwrap()
//! {
//!     println!("{} ({:?})", track_info.title, track_info.length);
//!
//!     let file = std::fs::File::open("song.flac").unwrap();
//!     let stream = SourceStream::from_file(file, &config);
//!     let provider = descriptor
//!         .create_provider(&track_info, Box::new(stream), &config)
//!         .unwrap();
//! }
//! ```
//!
//! [`FrameProvider`]: crate::tracks::FrameProvider

pub mod adts;
mod detect;
pub mod flac;
mod hints;
pub mod matroska;
pub mod mp3;
pub mod mp4;
pub mod ogg;
pub mod playlist;
mod registry;
mod result;
pub(crate) mod util;
pub(crate) mod vorbis_comment;
pub mod wav;

pub use self::{detect::*, hints::*, registry::*, result::*};

use crate::{
    error::Result,
    input::{
        metadata::{AudioReference, TrackInfo},
        SeekableStream,
    },
    tracks::FrameProvider,
    Config,
};

/// Detection and demuxing support for a single container format.
///
/// Probes are stateless: any per-stream information needed to build a
/// [`FrameProvider`] is either encoded in the `settings` string of a
/// [`ProbeMatch::Supported`], or re-read from the stream.
pub trait ContainerProbe: Send + Sync {
    /// Short, unique name for this container format.
    fn name(&self) -> &'static str;

    /// Returns whether the given mime type or file extension is associated with this format.
    fn matches_hints(&self, hints: &Hints) -> bool;

    /// Attempt to recognise this format at the current position of `stream` (offset 0).
    ///
    /// Returns `Ok(None)` if the stream does not hold this format. Errors are
    /// only returned for I/O failures, cancellation, or streams which were
    /// recognised but whose headers are malformed.
    fn probe(
        &self,
        reference: &AudioReference,
        stream: &mut dyn SeekableStream,
        config: &Config,
    ) -> Result<Option<ProbeMatch>>;

    /// Build a frame provider for a stream previously detected by this probe.
    ///
    /// `stream` is positioned at offset 0.
    fn create_provider(
        &self,
        settings: &str,
        track_info: &TrackInfo,
        stream: Box<dyn SeekableStream>,
        config: &Config,
    ) -> Result<Box<dyn FrameProvider>>;
}

/// The outcome of a single [`ContainerProbe`] recognising a stream.
///
/// The [`ContainerDetector`] attaches the probe itself to form a [`DetectionResult`].
#[derive(Clone, Debug)]
pub enum ProbeMatch {
    /// The format was recognised, but its contents cannot be played.
    Unsupported(String),
    /// The stream is a reference (i.e., a playlist) to some other resource.
    Referred(AudioReference),
    /// The stream holds playable audio.
    Supported {
        /// Probe-specific data passed back to [`ContainerProbe::create_provider`].
        settings: String,
        /// Metadata describing the track.
        track_info: TrackInfo,
    },
}

impl ProbeMatch {
    /// Shorthand for a supported result with no settings.
    #[must_use]
    pub fn supported(track_info: TrackInfo) -> Self {
        Self::Supported {
            settings: String::new(),
            track_info,
        }
    }

    /// Shorthand for an unsupported result.
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::Unsupported(reason.into())
    }
}
