use super::{ContainerProbe, ProbeMatch};
use crate::{
    error::Result,
    input::{
        metadata::{AudioReference, TrackInfo},
        SeekableStream,
    },
    tracks::FrameProvider,
    Config,
};
use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    sync::Arc,
};

/// A detected container format, paired with the settings needed to read it.
#[derive(Clone)]
pub struct ContainerDescriptor {
    /// The probe which recognised the stream.
    pub probe: Arc<dyn ContainerProbe>,
    /// Probe-specific settings, opaque to callers.
    pub settings: String,
}

impl ContainerDescriptor {
    /// Build a frame provider over `stream`, which must begin at offset 0 of the
    /// resource that was detected.
    pub fn create_provider(
        &self,
        track_info: &TrackInfo,
        stream: Box<dyn SeekableStream>,
        config: &Config,
    ) -> Result<Box<dyn FrameProvider>> {
        self.probe
            .create_provider(&self.settings, track_info, stream, config)
    }
}

impl Debug for ContainerDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ContainerDescriptor")
            .field("probe", &self.probe.name())
            .field("settings", &self.settings)
            .finish()
    }
}

/// The outcome of running format detection over a stream.
#[derive(Clone)]
#[non_exhaustive]
pub enum DetectionResult {
    /// No probe recognised the stream.
    Unknown,
    /// A container was recognised, but its contents cannot be played.
    Unsupported {
        /// The probe which recognised the container.
        probe: Arc<dyn ContainerProbe>,
        /// Why the contents cannot be played.
        reason: String,
    },
    /// The stream refers to another resource, which should be loaded instead.
    Referred {
        /// The probe which recognised the reference, if any.
        probe: Option<Arc<dyn ContainerProbe>>,
        /// The resource to load.
        reference: AudioReference,
    },
    /// The stream holds a playable track.
    Supported {
        /// Format of the stream.
        descriptor: ContainerDescriptor,
        /// Metadata of the track.
        track_info: TrackInfo,
    },
}

impl DetectionResult {
    pub(crate) fn from_match(probe: Arc<dyn ContainerProbe>, found: ProbeMatch) -> Self {
        match found {
            ProbeMatch::Unsupported(reason) => Self::Unsupported { probe, reason },
            ProbeMatch::Referred(reference) => Self::Referred {
                probe: Some(probe),
                reference,
            },
            ProbeMatch::Supported {
                settings,
                track_info,
            } => Self::Supported {
                descriptor: ContainerDescriptor { probe, settings },
                track_info,
            },
        }
    }

    /// The probe which recognised this stream, if any.
    #[must_use]
    pub fn probe(&self) -> Option<&Arc<dyn ContainerProbe>> {
        match self {
            Self::Unknown => None,
            Self::Unsupported { probe, .. } => Some(probe),
            Self::Referred { probe, .. } => probe.as_ref(),
            Self::Supported { descriptor, .. } => Some(&descriptor.probe),
        }
    }

    /// Returns whether a container format was recognised.
    #[must_use]
    pub fn is_container_detected(&self) -> bool {
        self.probe().is_some()
    }

    /// Returns whether a container was recognised with no reason to reject it.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.is_container_detected() && self.unsupported_reason().is_none()
    }

    /// Why a recognised container cannot be played.
    #[must_use]
    pub fn unsupported_reason(&self) -> Option<&str> {
        match self {
            Self::Unsupported { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// The resource which this stream refers to.
    #[must_use]
    pub fn reference(&self) -> Option<&AudioReference> {
        match self {
            Self::Referred { reference, .. } => Some(reference),
            _ => None,
        }
    }

    /// Metadata of the detected track.
    #[must_use]
    pub fn track_info(&self) -> Option<&TrackInfo> {
        match self {
            Self::Supported { track_info, .. } => Some(track_info),
            _ => None,
        }
    }
}

impl Debug for DetectionResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Unknown => f.write_str("Unknown"),
            Self::Unsupported { probe, reason } => f
                .debug_struct("Unsupported")
                .field("probe", &probe.name())
                .field("reason", reason)
                .finish(),
            Self::Referred { probe, reference } => f
                .debug_struct("Referred")
                .field("probe", &probe.as_ref().map(|p| p.name()))
                .field("reference", reference)
                .finish(),
            Self::Supported {
                descriptor,
                track_info,
            } => f
                .debug_struct("Supported")
                .field("descriptor", descriptor)
                .field("track_info", track_info)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{container::wav::WavProbe, input::metadata::TrackInfoBuilder};

    #[test]
    fn accessors_follow_variant() {
        let probe: Arc<dyn ContainerProbe> = Arc::new(WavProbe);

        let unknown = DetectionResult::Unknown;
        assert!(!unknown.is_container_detected());
        assert!(!unknown.is_supported());

        let unsupported =
            DetectionResult::from_match(probe.clone(), ProbeMatch::unsupported("a-law"));
        assert!(unsupported.is_container_detected());
        assert!(!unsupported.is_supported());
        assert_eq!(unsupported.unsupported_reason(), Some("a-law"));

        let referred = DetectionResult::Referred {
            probe: None,
            reference: AudioReference::new("http://example.com", None),
        };
        assert!(!referred.is_container_detected());
        assert!(referred.reference().is_some());

        let supported = DetectionResult::from_match(
            probe,
            ProbeMatch::supported(TrackInfoBuilder::new().build()),
        );
        assert!(supported.is_supported());
        assert!(supported.track_info().is_some());
        assert_eq!(supported.probe().map(|p| p.name()), Some("wav"));
    }
}
