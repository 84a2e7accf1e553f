use super::packet::{OggPacket, PacketReader};
use crate::{
    container::{
        flac::StreamInfo,
        util::{ms_to_samples, samples_to_ms},
        vorbis_comment::VorbisComments,
    },
    error::{DemuxError, Result},
    input::SeekableStream,
    tracks::{AudioFormat, Codec},
};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use tracing::debug;

const OPUS_RATE: u32 = 48_000;

const FLAC_MAPPING_LEN: usize = 13;
const FLAC_BLOCK_VORBIS_COMMENT: u8 = 4;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum OggCodecKind {
    Opus,
    Vorbis,
    Flac,
}

/// Everything learned from the header packets of a logical bitstream.
#[derive(Clone, Debug)]
pub(crate) struct OggTrack {
    pub kind: OggCodecKind,
    pub format: AudioFormat,
    pub tags: Option<VorbisComments>,
    /// Rate of the granule clock.
    pub granule_rate: u32,
    /// Granules to discard at the start of the stream.
    pub pre_skip: u64,
    pub flac_info: Option<StreamInfo>,
}

impl OggTrack {
    /// Reads and interprets all header packets, leaving `reader` at the first audio packet.
    pub fn read(reader: &mut PacketReader, stream: &mut dyn SeekableStream) -> Result<Self> {
        let first = next_header(reader, stream)?;

        let track = if first.data.starts_with(b"OpusHead") {
            read_opus(&first.data, reader, stream)?
        } else if first.data.starts_with(b"\x01vorbis") {
            read_vorbis(first.data, reader, stream)?
        } else if first.data.starts_with(b"\x7FFLAC") {
            read_flac(&first.data, reader, stream)?
        } else {
            let magic: String = first
                .data
                .iter()
                .take(8)
                .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
                .collect();
            return Err(DemuxError::Unsupported(format!(
                "unsupported OGG codec with identification {:?}",
                magic
            )));
        };

        debug!(
            "OGG {:?} bitstream: {}Hz, {} channels.",
            track.kind, track.format.sample_rate, track.format.channels,
        );

        Ok(track)
    }

    /// Converts a granule position into a stream timecode.
    pub fn granule_to_ms(&self, granule: u64) -> u64 {
        samples_to_ms(
            granule.saturating_sub(self.pre_skip),
            u64::from(self.granule_rate),
        )
    }

    /// Converts a stream timecode into a granule position.
    pub fn ms_to_granule(&self, timecode: u64) -> u64 {
        ms_to_samples(timecode, u64::from(self.granule_rate)) + self.pre_skip
    }
}

fn next_header(reader: &mut PacketReader, stream: &mut dyn SeekableStream) -> Result<OggPacket> {
    reader
        .next_packet(stream)?
        .ok_or_else(|| DemuxError::malformed("OGG stream ended within its headers"))
}

fn read_opus(
    head: &[u8],
    reader: &mut PacketReader,
    stream: &mut dyn SeekableStream,
) -> Result<OggTrack> {
    if head.len() < 19 {
        return Err(DemuxError::malformed("OpusHead too short"));
    }

    let channels = head[9];
    let pre_skip = LittleEndian::read_u16(&head[10..]);

    let tags = next_header(reader, stream)?;
    let tags = match tags.data.strip_prefix(b"OpusTags") {
        Some(body) => Some(VorbisComments::parse(body)?),
        None => return Err(DemuxError::malformed("missing OpusTags packet")),
    };

    Ok(OggTrack {
        kind: OggCodecKind::Opus,
        format: AudioFormat::new(
            Codec::Opus {
                header: head.to_vec(),
                pre_skip,
            },
            OPUS_RATE,
            u16::from(channels),
        ),
        tags,
        granule_rate: OPUS_RATE,
        pre_skip: u64::from(pre_skip),
        flac_info: None,
    })
}

fn read_vorbis(
    identification: Vec<u8>,
    reader: &mut PacketReader,
    stream: &mut dyn SeekableStream,
) -> Result<OggTrack> {
    if identification.len() < 30 {
        return Err(DemuxError::malformed("vorbis identification header too short"));
    }

    let channels = identification[11];
    let sample_rate = LittleEndian::read_u32(&identification[12..]);

    let comments = next_header(reader, stream)?;
    let tags = match comments.data.strip_prefix(b"\x03vorbis") {
        Some(body) => Some(VorbisComments::parse(body)?),
        None => return Err(DemuxError::malformed("missing vorbis comment header")),
    };

    let setup = next_header(reader, stream)?;
    if !setup.data.starts_with(b"\x05vorbis") {
        return Err(DemuxError::malformed("missing vorbis setup header"));
    }

    Ok(OggTrack {
        kind: OggCodecKind::Vorbis,
        format: AudioFormat::new(
            Codec::Vorbis {
                identification,
                setup: setup.data,
            },
            sample_rate,
            u16::from(channels),
        ),
        tags,
        granule_rate: sample_rate,
        pre_skip: 0,
        flac_info: None,
    })
}

fn read_flac(
    mapping: &[u8],
    reader: &mut PacketReader,
    stream: &mut dyn SeekableStream,
) -> Result<OggTrack> {
    // 0x7F "FLAC" major minor header-count "fLaC" block-header STREAMINFO
    if mapping.len() < FLAC_MAPPING_LEN + 4 || &mapping[9..13] != b"fLaC" {
        return Err(DemuxError::malformed("invalid FLAC-in-OGG mapping header"));
    }

    let header_count = BigEndian::read_u16(&mapping[7..]);
    let info = StreamInfo::parse(&mapping[FLAC_MAPPING_LEN + 4..])?;

    let mut tags = None;
    for _ in 0..header_count {
        let block = next_header(reader, stream)?;

        if block.data.first().map(|b| b & 0x7F) == Some(FLAC_BLOCK_VORBIS_COMMENT) {
            tags = block
                .data
                .get(4..)
                .map(VorbisComments::parse)
                .transpose()?;
        }
    }

    Ok(OggTrack {
        kind: OggCodecKind::Flac,
        format: AudioFormat::pcm(info.sample_rate, u16::from(info.channels)),
        tags,
        granule_rate: info.sample_rate,
        pre_skip: 0,
        flac_info: Some(info),
    })
}

/// Number of 48kHz samples held in an Opus packet, from its TOC byte.
pub(crate) fn opus_packet_samples(packet: &[u8]) -> u64 {
    let toc = match packet.first() {
        Some(&toc) => toc,
        None => return 0,
    };

    let config = toc >> 3;
    let frame_len = match config {
        0..=11 => [480, 960, 1920, 2880][usize::from(config % 4)],
        12..=15 => [480, 960][usize::from(config % 2)],
        _ => [120, 240, 480, 960][usize::from(config % 4)],
    };

    let frames = match toc & 0b11 {
        0 => 1,
        1 | 2 => 2,
        _ => packet.get(1).map_or(0, |&count| u64::from(count & 0x3F)),
    };

    frame_len * frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opus_toc_durations() {
        // CELT 20ms, one frame.
        assert_eq!(opus_packet_samples(&[0xF8, 0]), 960);
        // SILK 60ms, two frames.
        assert_eq!(opus_packet_samples(&[(3 << 3) | 1]), 5760);
        // Hybrid 10ms, arbitrary count of 5.
        assert_eq!(opus_packet_samples(&[(12 << 3) | 3, 5]), 2400);
        // CELT 2.5ms, one frame.
        assert_eq!(opus_packet_samples(&[16 << 3]), 120);
        assert_eq!(opus_packet_samples(&[]), 0);
    }
}
