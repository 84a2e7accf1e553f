//! Constants affecting container detection and demuxing.

/// Default number of bytes buffered from the start of a stream for format detection.
pub const HEAD_BUFFER_LEN: usize = 1024;

/// Default distance (in bytes) within which a forward seek is performed by reading and
/// discarding data, rather than by a hard seek.
///
/// Hard seeks on network streams typically require reconnection.
pub const MAX_SKIP_DISTANCE: u64 = 512 * 1024;

/// Default number of bytes to examine when searching for an MP3 or ADTS frame sync.
pub const FRAME_SCAN_DISTANCE: usize = 1000;

/// Default number of bytes at the end of an OGG stream to scan for its final page.
///
/// This is slightly larger than the maximum size of a single OGG page.
pub const OGG_TAIL_SCAN_LEN: u64 = 65_307 + 1024;

/// Default number of PCM frames placed in each packet by uncompressed formats.
pub const PCM_FRAMES_PER_PACKET: usize = 1024;

/// Sentinel used by some containers to mark an unknown or placeholder value.
pub(crate) const UNKNOWN_U64: u64 = u64::MAX;

/// Title given to tracks whose container carries no title tag.
pub const UNKNOWN_TITLE: &str = "Unknown title";

/// Author given to tracks whose container carries no artist tag.
pub const UNKNOWN_ARTIST: &str = "Unknown artist";

/// Signature bytes used by the fixed-magic probes.
///
/// `None` matches any byte.
pub mod signatures {
    /// `RIFF....WAVE`
    pub const WAV: &[Option<u8>] = &[
        Some(b'R'),
        Some(b'I'),
        Some(b'F'),
        Some(b'F'),
        None,
        None,
        None,
        None,
        Some(b'W'),
        Some(b'A'),
        Some(b'V'),
        Some(b'E'),
    ];

    /// EBML header id.
    pub const MATROSKA: &[Option<u8>] = &[Some(0x1A), Some(0x45), Some(0xDF), Some(0xA3)];

    /// `...?ftyp`
    pub const MP4: &[Option<u8>] = &[
        Some(0),
        Some(0),
        Some(0),
        None,
        Some(b'f'),
        Some(b't'),
        Some(b'y'),
        Some(b'p'),
    ];

    /// `fLaC`
    pub const FLAC: &[Option<u8>] = &[Some(b'f'), Some(b'L'), Some(b'a'), Some(b'C')];

    /// `OggS`
    pub const OGG: &[Option<u8>] = &[Some(b'O'), Some(b'g'), Some(b'g'), Some(b'S')];

    /// `ID3`
    pub const ID3: &[Option<u8>] = &[Some(b'I'), Some(b'D'), Some(b'3')];

    /// `[?laylist]`
    pub const PLS: &[Option<u8>] = &[
        Some(b'['),
        None,
        Some(b'l'),
        Some(b'a'),
        Some(b'y'),
        Some(b'l'),
        Some(b'i'),
        Some(b's'),
        Some(b't'),
        Some(b']'),
    ];
}
