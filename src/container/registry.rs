use super::{
    adts::AdtsProbe,
    flac::FlacProbe,
    matroska::MatroskaProbe,
    mp3::Mp3Probe,
    mp4::Mp4Probe,
    ogg::OggProbe,
    playlist::{M3uProbe, PlainPlaylistProbe, PlsProbe},
    wav::WavProbe,
    ContainerProbe,
};
use std::sync::Arc;

/// An ordered list of container probes.
///
/// Probes are tried in insertion order: formats with a fixed signature should
/// come before those detected heuristically (MP3 and ADTS frame sync).
#[derive(Clone)]
pub struct ProbeRegistry {
    probes: Vec<Arc<dyn ContainerProbe>>,
}

impl ProbeRegistry {
    /// A registry holding no probes.
    #[must_use]
    pub fn empty() -> Self {
        Self { probes: Vec::new() }
    }

    /// Adds a probe to the end of this registry.
    #[must_use]
    pub fn with(mut self, probe: impl ContainerProbe + 'static) -> Self {
        self.push(probe);
        self
    }

    /// Adds a probe to the end of this registry.
    pub fn push(&mut self, probe: impl ContainerProbe + 'static) {
        self.probes.push(Arc::new(probe));
    }

    /// Registered probes, in detection order.
    #[must_use]
    pub fn probes(&self) -> &[Arc<dyn ContainerProbe>] {
        &self.probes
    }

    /// Finds a probe by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Arc<dyn ContainerProbe>> {
        self.probes.iter().find(|p| p.name() == name)
    }
}

impl Default for ProbeRegistry {
    /// Every format supported by this crate.
    fn default() -> Self {
        Self::empty()
            .with(WavProbe)
            .with(MatroskaProbe)
            .with(Mp4Probe)
            .with(FlacProbe)
            .with(OggProbe)
            .with(M3uProbe)
            .with(PlsProbe)
            .with(PlainPlaylistProbe)
            .with(Mp3Probe)
            .with(AdtsProbe)
    }
}

impl std::fmt::Debug for ProbeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.probes.iter().map(|p| p.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_order() {
        let names: Vec<_> = ProbeRegistry::default()
            .probes()
            .iter()
            .map(|p| p.name())
            .collect();

        assert_eq!(names, vec![
            "wav", "matroska", "mp4", "flac", "ogg", "m3u", "pls", "plain", "mp3", "adts"
        ]);
    }
}
