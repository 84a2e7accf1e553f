use crate::constants::*;

use derivative::Derivative;

/// Configuration for container detection and frame provision.
#[derive(Clone, Derivative)]
#[derivative(Debug, PartialEq)]
#[non_exhaustive]
pub struct Config {
    /// Number of bytes from the start of a stream held in memory during detection.
    ///
    /// Every probe rewinds to offset 0 before it runs: while reads stay within this
    /// region, no I/O (or, for network sources, no reconnection) is triggered.
    ///
    /// Defaults to [`HEAD_BUFFER_LEN`] (1KiB).
    pub head_buffer_len: usize,

    /// Maximum forward distance covered by reading and discarding bytes when seeking.
    ///
    /// Seeks further than this, or any backward seek, use the stream's hard seek.
    /// This applies to [`SourceStream`]s created using this configuration.
    ///
    /// Defaults to [`MAX_SKIP_DISTANCE`] (512KiB).
    ///
    /// [`SourceStream`]: crate::input::SourceStream
    pub max_skip_distance: u64,

    /// Number of bytes examined when searching for a frame sync in MP3/ADTS streams.
    ///
    /// Defaults to [`FRAME_SCAN_DISTANCE`].
    pub frame_scan_distance: usize,

    /// Number of bytes at the tail of an OGG stream scanned to estimate its duration.
    ///
    /// Defaults to [`OGG_TAIL_SCAN_LEN`].
    pub ogg_tail_scan_len: u64,

    /// Number of audio frames placed into each PCM packet by WAV sources.
    ///
    /// Defaults to [`PCM_FRAMES_PER_PACKET`].
    pub pcm_frames_per_packet: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            head_buffer_len: HEAD_BUFFER_LEN,
            max_skip_distance: MAX_SKIP_DISTANCE,
            frame_scan_distance: FRAME_SCAN_DISTANCE,
            ogg_tail_scan_len: OGG_TAIL_SCAN_LEN,
            pcm_frames_per_packet: PCM_FRAMES_PER_PACKET,
        }
    }
}

impl Config {
    /// Sets this `Config`'s detection head buffer length.
    #[must_use]
    pub fn head_buffer_len(mut self, head_buffer_len: usize) -> Self {
        self.head_buffer_len = head_buffer_len;
        self
    }

    /// Sets this `Config`'s soft-seek threshold.
    #[must_use]
    pub fn max_skip_distance(mut self, max_skip_distance: u64) -> Self {
        self.max_skip_distance = max_skip_distance;
        self
    }

    /// Sets this `Config`'s frame sync scan distance.
    #[must_use]
    pub fn frame_scan_distance(mut self, frame_scan_distance: usize) -> Self {
        self.frame_scan_distance = frame_scan_distance;
        self
    }

    /// Sets this `Config`'s OGG duration scan length.
    #[must_use]
    pub fn ogg_tail_scan_len(mut self, ogg_tail_scan_len: u64) -> Self {
        self.ogg_tail_scan_len = ogg_tail_scan_len;
        self
    }

    /// Sets this `Config`'s PCM packet size.
    #[must_use]
    pub fn pcm_frames_per_packet(mut self, pcm_frames_per_packet: usize) -> Self {
        self.pcm_frames_per_packet = pcm_frames_per_packet.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let cfg = Config::default()
            .head_buffer_len(4096)
            .pcm_frames_per_packet(0);

        assert_eq!(cfg.head_buffer_len, 4096);
        assert_eq!(cfg.pcm_frames_per_packet, 1);
        assert_eq!(cfg.max_skip_distance, MAX_SKIP_DISTANCE);
        assert_ne!(cfg, Config::default());
    }
}
