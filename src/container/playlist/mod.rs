//! Playlist files which refer to a single stream: M3U, PLS, and bare URLs.
//!
//! None of these hold audio. Each yields [`ProbeMatch::Referred`] with the
//! first playable entry, which should be loaded in place of the playlist.
//!
//! [`ProbeMatch::Referred`]: super::ProbeMatch::Referred

mod m3u;
mod plain;
mod pls;

pub use self::{m3u::M3uProbe, plain::PlainPlaylistProbe, pls::PlsProbe};

use crate::{
    error::{DemuxError, Result},
    input::SeekableStream,
    tracks::FrameProvider,
};
use std::io::Read;
use url::Url;

const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "icy"];

/// Reads up to `limit` bytes of text from the start of a playlist.
///
/// Invalid UTF-8 is replaced, and a leading byte order mark is removed.
pub(crate) fn read_text(stream: &mut dyn SeekableStream, limit: usize) -> Result<String> {
    let mut bytes = Vec::with_capacity(limit);
    stream.take(limit as u64).read_to_end(&mut bytes)?;

    let text = String::from_utf8_lossy(&bytes);
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

/// Parses `entry` as the URL of a stream, if it uses a supported scheme.
pub(crate) fn stream_url(entry: &str) -> Option<Url> {
    Url::parse(entry.trim())
        .ok()
        .filter(|url| SUPPORTED_SCHEMES.contains(&url.scheme()))
        .filter(|url| url.has_host())
}

/// Playlists are resolved during detection, and never played directly.
pub(crate) fn no_provider(name: &str) -> Result<Box<dyn FrameProvider>> {
    Err(DemuxError::Unsupported(format!(
        "{} playlists refer to other tracks, and cannot be played",
        name
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        container::{ContainerDetector, DetectionResult, Hints},
        input::{metadata::AudioReference, SourceStream},
        Config,
    };

    #[test]
    fn supported_schemes() {
        assert!(stream_url("http://example.com/live.mp3").is_some());
        assert!(stream_url("  icy://radio.example.com:8000/stream \r").is_some());
        assert!(stream_url("ftp://example.com/a.mp3").is_none());
        assert!(stream_url("file:///home/a.mp3").is_none());
        assert!(stream_url("not a url").is_none());
    }

    #[test]
    fn detector_refers_to_first_entry() {
        let playlist = "[playlist]\nFile1=https://example.com/one.aac\nTitle1=One\n";
        let mut stream = SourceStream::from_memory(playlist.into(), &Config::default());

        let result = ContainerDetector::default()
            .detect(
                &AudioReference::new("station.pls", None),
                &mut stream,
                &Hints::default(),
            )
            .unwrap();

        match result {
            DetectionResult::Referred { probe, reference } => {
                assert_eq!(probe.unwrap().name(), "pls");
                assert_eq!(reference.identifier, "https://example.com/one.aac");
                assert_eq!(reference.title.as_deref(), Some("One"));
            },
            other => panic!("unexpected result {:?}", other),
        }
    }
}
