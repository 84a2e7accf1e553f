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

const HEADER: &str = "#EXTM3U";
const INFO: &str = "#EXTINF";

/// The first stream URL in an M3U playlist, titled by its preceding `#EXTINF` line.
fn first_entry(text: &str) -> Option<AudioReference> {
    let mut title = None;

    for line in text.lines().map(str::trim) {
        if let Some(info) = line.strip_prefix(INFO) {
            // #EXTINF:<duration>,<title>
            title = info
                .split_once(',')
                .map(|(_, t)| t.trim().to_string())
                .filter(|t| !t.is_empty());
        } else if line.is_empty() || line.starts_with('#') {
            continue;
        } else if let Some(url) = stream_url(line) {
            return Some(AudioReference::new(url.as_str(), title));
        } else {
            title = None;
        }
    }

    None
}

/// Detection support for M3U playlists.
///
/// Only extended M3U files (those beginning `#EXTM3U` or `#EXTINF`) are recognised.
#[derive(Clone, Copy, Debug, Default)]
pub struct M3uProbe;

impl ContainerProbe for M3uProbe {
    fn name(&self) -> &'static str {
        "m3u"
    }

    fn matches_hints(&self, hints: &Hints) -> bool {
        hints.matches(&["audio/mpegurl", "audio/x-mpegurl", "application/x-mpegurl"], &[
            "m3u", "m3u8",
        ])
    }

    fn probe(
        &self,
        _reference: &AudioReference,
        stream: &mut dyn SeekableStream,
        config: &Config,
    ) -> Result<Option<ProbeMatch>> {
        let text = read_text(stream, config.head_buffer_len)?;
        let start = text.trim_start();

        if !start.starts_with(HEADER) && !start.starts_with(INFO) {
            return Ok(None);
        }

        match first_entry(&text) {
            Some(reference) => {
                debug!("M3U playlist refers to {}.", reference.identifier);
                Ok(Some(ProbeMatch::Referred(reference)))
            },
            None => Ok(Some(ProbeMatch::unsupported(
                "M3U playlist has no supported entries",
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
        M3uProbe
            .probe(&AudioReference::default(), &mut stream, &Config::default())
            .unwrap()
    }

    #[test]
    fn titled_entry() {
        let text = "#EXTM3U\r\n\
                    #EXTINF:-1,Local File\r\n\
                    /music/local.mp3\r\n\
                    #EXTINF:-1,Night Radio\r\n\
                    http://radio.example.com/night\r\n\
                    http://radio.example.com/day\r\n";

        match probe(text) {
            Some(ProbeMatch::Referred(reference)) => {
                assert_eq!(reference.identifier, "http://radio.example.com/night");
                assert_eq!(reference.title.as_deref(), Some("Night Radio"));
            },
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn untitled_entry() {
        match probe("#EXTINF:12,\nhttps://example.com/a.ogg\n") {
            Some(ProbeMatch::Referred(reference)) => {
                assert_eq!(reference.identifier, "https://example.com/a.ogg");
                assert_eq!(reference.title, None);
            },
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn no_entries_is_unsupported() {
        assert!(matches!(
            probe("#EXTM3U\n#EXTINF:1,Nothing\nrelative/path.mp3\n"),
            Some(ProbeMatch::Unsupported(_))
        ));
    }

    #[test]
    fn plain_lists_are_not_m3u() {
        assert!(probe("http://example.com/a.mp3\n").is_none());
    }
}
