use super::{ContainerProbe, DetectionResult, Hints, ProbeRegistry};
use crate::{
    error::{DemuxError, Result},
    input::{metadata::AudioReference, HeadStream, SeekableStream},
    Config,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs every probe in a [`ProbeRegistry`] against a stream to identify its format.
///
/// Detection is performed in two passes: first over every probe which
/// matches the given [`Hints`], then over all remaining probes. Within each
/// pass, probes run in registry order and the first to recognise the stream wins.
///
/// Only the first [`Config::head_buffer_len`] bytes of the stream are held in
/// memory: probes which read beyond this will consume the underlying stream,
/// and probes which later rewind past the head will fail to seek.
#[derive(Clone, Debug)]
pub struct ContainerDetector {
    registry: ProbeRegistry,
    config: Config,
}

impl ContainerDetector {
    /// Create a detector over a set of probes.
    #[must_use]
    pub fn new(registry: ProbeRegistry, config: Config) -> Self {
        Self { registry, config }
    }

    /// The probes used by this detector.
    #[must_use]
    pub fn registry(&self) -> &ProbeRegistry {
        &self.registry
    }

    /// Identify the container format of `stream`, reading from its current position.
    ///
    /// Errors raised by individual probes are logged and treated as a failure
    /// to match, so that one misbehaving format cannot prevent detection of any
    /// other. Cancellation and I/O errors raised while buffering the head of
    /// the stream are returned to the caller.
    pub fn detect(
        &self,
        reference: &AudioReference,
        stream: &mut dyn SeekableStream,
        hints: &Hints,
    ) -> Result<DetectionResult> {
        let mut head = HeadStream::new(stream, self.config.head_buffer_len)?;
        let origin = head.position();

        let hinted =
            |probe: &Arc<dyn ContainerProbe>| hints.is_present() && probe.matches_hints(hints);

        let first_pass = self.registry.probes().iter().filter(|p| hinted(p));
        let second_pass = self.registry.probes().iter().filter(|p| !hinted(p));

        for probe in first_pass.chain(second_pass) {
            head.seek(origin)?;

            if let Some(result) = self.try_probe(probe, reference, &mut head)? {
                debug!(
                    "Detected {} as {} ({:?}).",
                    reference.identifier,
                    probe.name(),
                    result,
                );
                return Ok(result);
            }
        }

        debug!("No container format matched {}.", reference.identifier);

        Ok(DetectionResult::Unknown)
    }

    fn try_probe(
        &self,
        probe: &Arc<dyn ContainerProbe>,
        reference: &AudioReference,
        stream: &mut HeadStream<'_>,
    ) -> Result<Option<DetectionResult>> {
        match probe.probe(reference, stream, &self.config) {
            Ok(found) => Ok(found.map(|m| DetectionResult::from_match(probe.clone(), m))),
            Err(DemuxError::Cancelled) => Err(DemuxError::Cancelled),
            Err(e) if e.is_eof() => {
                debug!("Probe {} ran out of data: {}", probe.name(), e);
                Ok(None)
            },
            Err(e) => {
                warn!("Probe {} failed on {}: {}", probe.name(), reference.identifier, e);
                Ok(None)
            },
        }
    }
}

impl Default for ContainerDetector {
    fn default() -> Self {
        Self::new(ProbeRegistry::default(), Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        container::{wav::WavProbe, ProbeMatch},
        input::{metadata::TrackInfo, SourceStream},
        test_utils,
        tracks::FrameProvider,
    };

    struct BrokenProbe;

    impl ContainerProbe for BrokenProbe {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn matches_hints(&self, _hints: &Hints) -> bool {
            true
        }

        fn probe(
            &self,
            _reference: &AudioReference,
            stream: &mut dyn SeekableStream,
            _config: &Config,
        ) -> Result<Option<ProbeMatch>> {
            // Reads part of the head before failing.
            stream.skip_fully(7)?;
            Err(DemuxError::malformed("always broken"))
        }

        fn create_provider(
            &self,
            _settings: &str,
            _track_info: &TrackInfo,
            _stream: Box<dyn SeekableStream>,
            _config: &Config,
        ) -> Result<Box<dyn FrameProvider>> {
            Err(DemuxError::malformed("always broken"))
        }
    }

    struct CancelledProbe;

    impl ContainerProbe for CancelledProbe {
        fn name(&self) -> &'static str {
            "cancelled"
        }

        fn matches_hints(&self, _hints: &Hints) -> bool {
            false
        }

        fn probe(
            &self,
            _reference: &AudioReference,
            _stream: &mut dyn SeekableStream,
            _config: &Config,
        ) -> Result<Option<ProbeMatch>> {
            Err(DemuxError::Cancelled)
        }

        fn create_provider(
            &self,
            _settings: &str,
            _track_info: &TrackInfo,
            _stream: Box<dyn SeekableStream>,
            _config: &Config,
        ) -> Result<Box<dyn FrameProvider>> {
            Err(DemuxError::Cancelled)
        }
    }

    fn detect(registry: ProbeRegistry, bytes: Vec<u8>, hints: &Hints) -> Result<DetectionResult> {
        let cfg = Config::default();
        let detector = ContainerDetector::new(registry, cfg.clone());
        let mut stream = SourceStream::from_memory(bytes, &cfg);

        detector.detect(&AudioReference::new("test", None), &mut stream, hints)
    }

    #[test]
    fn wrong_hint_still_detects_real_format() {
        let wav = test_utils::wav_pcm16(44_100, 2, 4410);
        let hints = Hints::default().mime_type("audio/mpeg").extension("mp3");

        let result = detect(ProbeRegistry::default(), wav, &hints).unwrap();

        assert!(result.is_supported());
        assert_eq!(result.probe().map(|p| p.name()), Some("wav"));
    }

    #[test]
    fn failing_probe_is_treated_as_no_match() {
        let registry = ProbeRegistry::empty().with(BrokenProbe).with(WavProbe);
        let wav = test_utils::wav_pcm16(8000, 1, 80);

        let result = detect(registry, wav, &Hints::default().extension("wav")).unwrap();

        assert_eq!(result.probe().map(|p| p.name()), Some("wav"));
    }

    #[test]
    fn cancellation_is_propagated() {
        let registry = ProbeRegistry::empty().with(CancelledProbe).with(WavProbe);
        let wav = test_utils::wav_pcm16(8000, 1, 80);

        let result = detect(registry, wav, &Hints::default());

        assert!(matches!(result, Err(DemuxError::Cancelled)));
    }

    #[test]
    fn unrecognised_bytes_are_unknown() {
        let noise = vec![0x55; 4000];
        let result = detect(ProbeRegistry::default(), noise, &Hints::default()).unwrap();

        assert!(matches!(result, DetectionResult::Unknown));
        assert!(!result.is_container_detected());
    }

    #[test]
    fn end_to_end_wav_length() {
        let wav = test_utils::wav_pcm16(44_100, 2, 22_050);

        let result = detect(ProbeRegistry::default(), wav, &Hints::default()).unwrap();
        let info = result.track_info().unwrap();

        assert_eq!(info.length_ms(), Some(500));
        assert!(!info.is_stream);
    }
}
