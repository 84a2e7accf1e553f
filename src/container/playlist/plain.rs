use super::{no_provider, read_text, stream_url};
use crate::{
    container::{ContainerProbe, Hints, ProbeMatch},
    error::Result,
    input::{
        metadata::{AudioReference, TrackInfo},
        SeekableStream,
    },
    tracks::FrameProvider,
    Config,
};
use tracing::debug;

/// Detection support for text files holding nothing but a stream URL.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainPlaylistProbe;

impl ContainerProbe for PlainPlaylistProbe {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn matches_hints(&self, hints: &Hints) -> bool {
        hints.matches(&["text/plain"], &["txt"])
    }

    fn probe(
        &self,
        _reference: &AudioReference,
        stream: &mut dyn SeekableStream,
        config: &Config,
    ) -> Result<Option<ProbeMatch>> {
        let text = read_text(stream, config.head_buffer_len)?;

        let url = match text.lines().map(str::trim).find(|line| !line.is_empty()) {
            Some(line) => stream_url(line),
            None => None,
        };

        Ok(url.map(|url| {
            debug!("Plain playlist refers to {}.", url);
            ProbeMatch::Referred(AudioReference::new(url.as_str(), None))
        }))
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
    use crate::{error::DemuxError, input::SourceStream};

    fn probe(text: &[u8]) -> Option<ProbeMatch> {
        let mut stream = SourceStream::from_memory(text.to_vec(), &Config::default());
        PlainPlaylistProbe
            .probe(&AudioReference::default(), &mut stream, &Config::default())
            .unwrap()
    }

    #[test]
    fn first_line_url() {
        match probe(b"\n\n  icy://radio.example.com:8000/live  \nignored\n") {
            Some(ProbeMatch::Referred(reference)) => {
                assert_eq!(reference.identifier, "icy://radio.example.com:8000/live");
                assert_eq!(reference.title, None);
            },
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn other_text_and_binary() {
        assert!(probe(b"hello\nhttp://example.com/a.mp3\n").is_none());
        assert!(probe(&[0xFF, 0xFB, 0x90, 0x44, 0, 0, 0]).is_none());
        assert!(probe(b"").is_none());
    }

    #[test]
    fn playlists_cannot_be_played() {
        let stream = Box::new(SourceStream::from_memory(vec![], &Config::default()));
        let track_info = crate::input::metadata::TrackInfoBuilder::new().build();

        assert!(matches!(
            PlainPlaylistProbe.create_provider("", &track_info, stream, &Config::default()),
            Err(DemuxError::Unsupported(_))
        ));
    }
}
