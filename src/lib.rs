#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
//! Chirp identifies the container format of an audio stream, reads its track
//! metadata, and splits it into timestamped packets ready for a decoder.
//!
//! The library offers:
//!  * Detection by content, using an ordered [`ProbeRegistry`] of format probes.
//!  MIME type and file extension hints reorder the probes, but never decide the result.
//!  * Track information (title, artist, duration, whether the source is a live stream)
//!  from each format's own tags: ID3v2, Vorbis comments, MP4 `ilst` atoms, and Matroska tags.
//!  * Frame providers for Matroska/WebM, MP4 (standard and fragmented), FLAC, Ogg
//!  (Opus, Vorbis, and FLAC), MP3, ADTS, and WAV, with seeking where the container allows it.
//!  * Resolution of M3U, PLS, and plain-text playlists to the stream they refer to.
//!
//! All parsing happens over a [`SeekableStream`], which can be built from any
//! symphonia [`MediaSource`]. Short forward seeks are satisfied by discarding
//! data, so unseekable network bodies can be detected and played without
//! reconnecting.
//!
//! ## Decoding
//! Chirp does not decode compressed audio. Packets of Opus, Vorbis, AAC, and MP3
//! are passed on as-is, alongside the codec setup data a decoder needs. FLAC
//! and WAV are the exceptions: their frames are delivered as 16-bit PCM.
//!
//! [`ProbeRegistry`]: container::ProbeRegistry
//! [`SeekableStream`]: input::SeekableStream
//! [`MediaSource`]: symphonia_core::io::MediaSource

#![warn(clippy::pedantic)]
#![allow(
    // Allowed as they are too pedantic
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::too_many_lines,
    clippy::cast_lossless,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    // TODO: would require significant rewriting of all existing docs
    clippy::missing_errors_doc,
)]

mod config;
pub mod constants;
pub mod container;
pub mod error;
pub mod input;
pub mod tracks;
pub(crate) mod tree;

#[cfg(test)]
use utils as test_utils;

pub use crate::{
    config::Config,
    container::{ContainerDetector, DetectionResult, Hints, ProbeRegistry},
    error::{DemuxError, Result},
};
