use super::{no_provider, read_text, stream_url};
use crate::{
    constants::signatures,
    container::{util::matches_signature, ContainerProbe, Hints, ProbeMatch},
    error::Result,
    input::{
        metadata::{AudioReference, TrackInfo},
        SeekableStream,
    },
    tracks::FrameProvider,
    Config,
};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Default)]
struct Entry {
    file: Option<String>,
    title: Option<String>,
}

/// Splits `FileN=value` into (`file`, N, value), lowercasing the key.
fn numbered_key(line: &str) -> Option<(String, u32, &str)> {
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    let digits = key.find(|c: char| c.is_ascii_digit())?;
    let index = key[digits..].parse().ok()?;

    Some((key[..digits].to_ascii_lowercase(), index, value.trim()))
}

/// The lowest-numbered `FileN` entry with a stream URL.
fn first_entry(text: &str) -> Option<AudioReference> {
    let mut entries: BTreeMap<u32, Entry> = BTreeMap::new();

    for line in text.lines() {
        if let Some((key, index, value)) = numbered_key(line) {
            let entry = entries.entry(index).or_default();
            match key.as_str() {
                "file" => entry.file = Some(value.to_string()),
                "title" if !value.is_empty() => entry.title = Some(value.to_string()),
                _ => {},
            }
        }
    }

    entries.into_iter().find_map(|(_, entry)| {
        let url = stream_url(entry.file.as_deref()?)?;
        Some(AudioReference::new(url.as_str(), entry.title))
    })
}

/// Detection support for PLS playlists.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlsProbe;

impl ContainerProbe for PlsProbe {
    fn name(&self) -> &'static str {
        "pls"
    }

    fn matches_hints(&self, hints: &Hints) -> bool {
        hints.matches(&["audio/x-scpls", "audio/scpls"], &["pls"])
    }

    fn probe(
        &self,
        _reference: &AudioReference,
        stream: &mut dyn SeekableStream,
        config: &Config,
    ) -> Result<Option<ProbeMatch>> {
        let text = read_text(stream, config.head_buffer_len)?;

        if !matches_signature(text.trim_start().as_bytes(), signatures::PLS) {
            return Ok(None);
        }

        match first_entry(&text) {
            Some(reference) => {
                debug!("PLS playlist refers to {}.", reference.identifier);
                Ok(Some(ProbeMatch::Referred(reference)))
            },
            None => Ok(Some(ProbeMatch::unsupported(
                "PLS playlist has no supported entries",
            ))),
        }
    }

    fn create_provider(
        &self,
        _settings: &str,
        _track_info: &TrackInfo,
        _stream: Box<dyn SeekableStream>,
        _config: &Config,
    ) -> Result<Box<dyn FrameProvider>> {
        no_provider(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::SourceStream;

    fn probe(text: &str) -> Option<ProbeMatch> {
        let mut stream = SourceStream::from_memory(text.into(), &Config::default());
        PlsProbe
            .probe(&AudioReference::default(), &mut stream, &Config::default())
            .unwrap()
    }

    #[test]
    fn lowest_numbered_stream_wins() {
        let text = "[Playlist]\n\
                    NumberOfEntries=3\n\
                    File2=http://example.com/two\n\
                    Title2=Two\n\
                    File1=songs/one.mp3\n\
                    Title1=One\n\
                    File3=http://example.com/three\n\
                    Version=2\n";

        match probe(text) {
            Some(ProbeMatch::Referred(reference)) => {
                assert_eq!(reference.identifier, "http://example.com/two");
                assert_eq!(reference.title.as_deref(), Some("Two"));
            },
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn signature_and_empty_lists() {
        assert!(probe("[section]\nFile1=http://example.com/a\n").is_none());
        assert!(matches!(
            probe("[playlist]\nNumberOfEntries=0\n"),
            Some(ProbeMatch::Unsupported(_))
        ));
    }
}
