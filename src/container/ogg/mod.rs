//! OGG streams carrying Opus, Vorbis, or FLAC.
//!
//! Only the first logical bitstream is played. Durations are found by
//! scanning the tail of the stream for its last page, and seeking uses a
//! table of page offsets built by scanning the whole stream on first use.

mod codec;
mod packet;
mod page;

pub use self::{
    packet::{OggPacket, PacketReader},
    page::{scan_pages, PageHeader, PageMark},
};

use self::{
    codec::{opus_packet_samples, OggCodecKind, OggTrack},
    page::NO_GRANULE,
};
use super::{
    flac::FrameDecoder,
    util::{check_next_bytes, read_vec},
    ContainerProbe,
    Hints,
    ProbeMatch,
};
use crate::{
    constants::signatures,
    error::{DemuxError, Result},
    input::{
        metadata::{AudioReference, TrackInfo, TrackInfoBuilder},
        SeekableStream,
    },
    tracks::{AudioFormat, FrameProvider, Packet, PacketSink},
    Config,
};
use std::io::Read;
use tracing::{debug, trace, warn};

const SCAN_CHUNK_LEN: usize = 64 * 1024;

/// Detection support for OGG streams.
#[derive(Clone, Copy, Debug, Default)]
pub struct OggProbe;

impl ContainerProbe for OggProbe {
    fn name(&self) -> &'static str {
        "ogg"
    }

    fn matches_hints(&self, hints: &Hints) -> bool {
        hints.matches(&["audio/ogg", "audio/opus", "application/ogg"], &[
            "ogg", "oga", "opus",
        ])
    }

    fn probe(
        &self,
        reference: &AudioReference,
        stream: &mut dyn SeekableStream,
        config: &Config,
    ) -> Result<Option<ProbeMatch>> {
        if !check_next_bytes(stream, signatures::OGG)? {
            return Ok(None);
        }

        stream.seek(0)?;

        let mut reader = PacketReader::new();
        let track = match OggTrack::read(&mut reader, stream) {
            Ok(track) => track,
            Err(DemuxError::Unsupported(reason)) => {
                return Ok(Some(ProbeMatch::Unsupported(reason)));
            },
            Err(e) => return Err(e),
        };

        let mut builder = TrackInfoBuilder::for_stream(reference, stream);
        if let Some(tags) = &track.tags {
            builder.apply(tags);
        }

        if let Some(serial) = reader.serial() {
            let last = last_granule(stream, serial, config.ogg_tail_scan_len)?;
            builder.set_length_ms(last.map(|granule| track.granule_to_ms(granule)));
        }

        Ok(Some(ProbeMatch::supported(builder.build())))
    }

    fn create_provider(
        &self,
        _settings: &str,
        _track_info: &TrackInfo,
        mut stream: Box<dyn SeekableStream>,
        _config: &Config,
    ) -> Result<Box<dyn FrameProvider>> {
        let mut reader = PacketReader::new();
        let track = OggTrack::read(&mut reader, &mut *stream)?;

        Ok(Box::new(OggProvider::new(stream, reader, track)))
    }
}

/// Finds the granule of the last page of bitstream `serial`, by scanning the end of the stream.
///
/// Returns `None` for streams of unknown length, or which cannot seek.
fn last_granule(
    stream: &mut dyn SeekableStream,
    serial: u32,
    tail_len: u64,
) -> Result<Option<u64>> {
    let len = match stream.content_length() {
        Some(len) if stream.can_seek_hard() => len,
        _ => return Ok(None),
    };

    let start = len.saturating_sub(tail_len).max(stream.position());
    stream.seek(start)?;

    let tail = read_vec(stream, len - start)?;
    let (pages, _) = scan_pages(&tail, start);

    let last = pages
        .iter()
        .rev()
        .find(|page| page.serial == serial && page.granule != NO_GRANULE)
        .map(|page| page.granule);

    trace!("Last OGG granule: {:?}.", last);

    Ok(last)
}

/// Start of a page, and the granule at which its first new packet begins.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct SeekEntry {
    offset: u64,
    granule: u64,
}

/// Reads packets from the first bitstream of an OGG stream.
pub struct OggProvider {
    stream: Box<dyn SeekableStream>,
    reader: PacketReader,
    track: OggTrack,
    flac: Option<FrameDecoder>,
    audio_start: u64,
    position: u64,
    seek_table: Option<Vec<SeekEntry>>,
}

impl OggProvider {
    fn new(stream: Box<dyn SeekableStream>, reader: PacketReader, track: OggTrack) -> Self {
        if !reader.at_page_end() {
            warn!("OGG audio data begins on the same page as its headers.");
        }

        Self {
            audio_start: stream.position(),
            stream,
            reader,
            flac: track.flac_info.map(FrameDecoder::new),
            track,
            position: 0,
            seek_table: None,
        }
    }

    fn build_seek_table(&mut self) -> Result<Vec<SeekEntry>> {
        let serial = self.reader.serial();

        self.stream.seek(self.audio_start)?;

        let mut table = Vec::new();
        let mut granule = 0;
        let mut buf = Vec::new();
        let mut base = self.audio_start;
        let mut chunk = vec![0u8; SCAN_CHUNK_LEN];

        loop {
            let read = self.stream.read(&mut chunk)?;
            if read == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..read]);

            let (pages, consumed) = scan_pages(&buf, base);

            for page in pages.iter().filter(|p| Some(p.serial) == serial) {
                table.push(SeekEntry {
                    offset: page.offset,
                    granule,
                });

                if page.granule != NO_GRANULE {
                    granule = page.granule;
                }
            }

            buf.drain(..consumed);
            base += consumed as u64;
        }

        debug!("Built OGG seek table with {} pages.", table.len());

        Ok(table)
    }
}

impl FrameProvider for OggProvider {
    fn format(&self) -> &AudioFormat {
        &self.track.format
    }

    fn is_seekable(&self) -> bool {
        self.stream.can_seek_hard()
    }

    fn provide_frames(&mut self, sink: &mut dyn PacketSink) -> Result<()> {
        while let Some(packet) = self.reader.next_packet(&mut *self.stream)? {
            if packet.data.is_empty() {
                continue;
            }

            match self.track.kind {
                OggCodecKind::Opus => {
                    let timecode = self.track.granule_to_ms(self.position);
                    self.position += opus_packet_samples(&packet.data);
                    sink.push(Packet::encoded(timecode, packet.data))?;
                },
                OggCodecKind::Vorbis => {
                    let timecode = self.track.granule_to_ms(packet.start_granule);
                    sink.push(Packet::encoded(timecode, packet.data))?;
                },
                OggCodecKind::Flac => {
                    if let Some(decoder) = &mut self.flac {
                        let frame = decoder.decode_packet(&packet.data)?;
                        let timecode = self.track.granule_to_ms(frame.first_sample);
                        sink.push(Packet::pcm(timecode, frame.samples))?;
                    }
                },
            }
        }

        Ok(())
    }

    fn seek_to_timecode(&mut self, timecode: u64) -> Result<u64> {
        if !self.stream.can_seek_hard() {
            return Err(DemuxError::Unseekable);
        }

        let table = match self.seek_table.take() {
            Some(table) => table,
            None => self.build_seek_table()?,
        };

        let target = self.track.ms_to_granule(timecode);
        let index = table.partition_point(|entry| entry.granule <= target);

        let entry = index
            .checked_sub(1)
            .and_then(|i| table.get(i))
            .copied()
            .unwrap_or(SeekEntry {
                offset: self.audio_start,
                granule: 0,
            });

        self.seek_table = Some(table);

        self.stream.seek(entry.offset)?;
        self.reader.reset(entry.granule);
        self.position = entry.granule;

        Ok(self.track.granule_to_ms(entry.granule))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        input::SourceStream,
        test_utils::{self, FlacInfo},
        tracks::{Codec, PacketData},
    };

    const SERIAL: u32 = 0x5EED;

    fn memory(bytes: Vec<u8>) -> Box<dyn SeekableStream> {
        Box::new(SourceStream::from_memory(bytes, &Config::default()))
    }

    fn probe(bytes: Vec<u8>) -> ProbeMatch {
        let mut stream = SourceStream::from_memory(bytes, &Config::default());
        OggProbe
            .probe(&AudioReference::new("x.ogg", None), &mut stream, &Config::default())
            .unwrap()
            .unwrap()
    }

    /// Opus headers, then three pages of two 20ms CELT packets each.
    fn opus_file(pre_skip: u16) -> Vec<u8> {
        let head = test_utils::opus_head(2, pre_skip);
        let tags = test_utils::opus_tags(&[("TITLE", "Opus Song"), ("ARTIST", "Opus Band")]);

        let mut out = test_utils::ogg_page(0x02, 0, SERIAL, 0, &[&head[..]]);
        out.extend(test_utils::ogg_page(0, 0, SERIAL, 1, &[&tags[..]]));

        let base = u64::from(pre_skip);
        for page in 0..3u8 {
            let flags = if page == 2 { 0x04 } else { 0 };
            let granule = base + 1920 * u64::from(page + 1);
            let first = [0xF8, page * 2];
            let second = [0xF8, page * 2 + 1];

            out.extend(test_utils::ogg_page(
                flags,
                granule,
                SERIAL,
                2 + u32::from(page),
                &[&first[..], &second[..]],
            ));
        }

        out
    }

    fn packet_ids(packets: &[Packet]) -> Vec<(u64, u8)> {
        packets
            .iter()
            .map(|p| match &p.data {
                PacketData::Encoded(data) => (p.timecode, data[1]),
                PacketData::Pcm(_) => panic!("expected encoded data"),
            })
            .collect()
    }

    #[test]
    fn opus_probe_reads_tags_and_duration() {
        match probe(opus_file(312)) {
            ProbeMatch::Supported { track_info, .. } => {
                assert_eq!(track_info.title, "Opus Song");
                assert_eq!(track_info.author, "Opus Band");
                assert_eq!(track_info.length_ms(), Some(120));
                assert!(!track_info.is_stream);
            },
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    #[ntest::timeout(10_000)]
    fn opus_packets_and_seeking() {
        let mut provider = OggProbe
            .create_provider(
                "",
                &TrackInfoBuilder::new().build(),
                memory(opus_file(0)),
                &Config::default(),
            )
            .unwrap();

        match &provider.format().codec {
            Codec::Opus { pre_skip, .. } => assert_eq!(*pre_skip, 0),
            other => panic!("unexpected codec {:?}", other),
        }
        assert_eq!(provider.format().channels, 2);

        let mut packets = vec![];
        provider.provide_frames(&mut packets).unwrap();
        assert_eq!(packet_ids(&packets), vec![
            (0, 0),
            (20, 1),
            (40, 2),
            (60, 3),
            (80, 4),
            (100, 5)
        ]);

        assert_eq!(provider.seek_to_timecode(50).unwrap(), 40);

        let mut packets = vec![];
        provider.provide_frames(&mut packets).unwrap();
        assert_eq!(packet_ids(&packets), vec![(40, 2), (60, 3), (80, 4), (100, 5)]);

        assert_eq!(provider.seek_to_timecode(0).unwrap(), 0);
    }

    #[test]
    fn vorbis_headers_are_exposed() {
        let mut identification = b"\x01vorbis".to_vec();
        identification.extend_from_slice(&0u32.to_le_bytes());
        identification.push(2);
        identification.extend_from_slice(&44_100u32.to_le_bytes());
        identification.extend_from_slice(&[0u8; 12]);
        identification.extend_from_slice(&[0xB8, 0x01]);

        let mut comments = b"\x03vorbis".to_vec();
        comments.extend(test_utils::vorbis_comments("chirp", &[("TITLE", "Vorbis Song")]));
        comments.push(1);

        let setup = b"\x05vorbis codebooks".to_vec();
        let audio = [0u8, 1, 2, 3];

        let mut bytes = test_utils::ogg_page(0x02, 0, SERIAL, 0, &[&identification[..]]);
        bytes.extend(test_utils::ogg_page(0, 0, SERIAL, 1, &[&comments[..], &setup[..]]));
        bytes.extend(test_utils::ogg_page(0x04, 44_100, SERIAL, 2, &[&audio[..]]));

        match probe(bytes.clone()) {
            ProbeMatch::Supported { track_info, .. } => {
                assert_eq!(track_info.title, "Vorbis Song");
                assert_eq!(track_info.length_ms(), Some(1000));
            },
            other => panic!("unexpected result {:?}", other),
        }

        let mut provider = OggProbe
            .create_provider(
                "",
                &TrackInfoBuilder::new().build(),
                memory(bytes),
                &Config::default(),
            )
            .unwrap();

        assert_eq!(provider.format().codec, Codec::Vorbis {
            identification,
            setup,
        });
        assert_eq!(provider.format().sample_rate, 44_100);

        let mut packets = vec![];
        provider.provide_frames(&mut packets).unwrap();
        assert_eq!(packets, vec![Packet::encoded(0, audio.to_vec())]);
    }

    #[test]
    #[ntest::timeout(10_000)]
    fn flac_in_ogg_is_decoded() {
        let info = FlacInfo {
            sample_rate: 8000,
            channels: 1,
            bits_per_sample: 16,
            block_size: 16,
            total_samples: 32,
        };

        let mut mapping = vec![0x7F];
        mapping.extend_from_slice(b"FLAC");
        mapping.extend_from_slice(&[1, 0, 0, 1]);
        mapping.extend_from_slice(b"fLaC");
        mapping.extend_from_slice(&[0, 0, 0, 34]);
        mapping.extend(test_utils::flac_stream_info(&info));

        let tags = test_utils::vorbis_comments("chirp", &[("TITLE", "Ogg Flac")]);
        let mut comment_block = vec![0x84, 0, 0, tags.len() as u8];
        comment_block.extend(tags);

        let first = test_utils::flac_constant_frame(&info, 0, 100);
        let second = test_utils::flac_constant_frame(&info, 1, -100);

        let mut bytes = test_utils::ogg_page(0x02, 0, SERIAL, 0, &[&mapping[..]]);
        bytes.extend(test_utils::ogg_page(0, 0, SERIAL, 1, &[&comment_block[..]]));
        bytes.extend(test_utils::ogg_page(0x04, 32, SERIAL, 2, &[&first[..], &second[..]]));

        match probe(bytes.clone()) {
            ProbeMatch::Supported { track_info, .. } => {
                assert_eq!(track_info.title, "Ogg Flac");
                assert_eq!(track_info.length_ms(), Some(4));
            },
            other => panic!("unexpected result {:?}", other),
        }

        let mut provider = OggProbe
            .create_provider(
                "",
                &TrackInfoBuilder::new().build(),
                memory(bytes),
                &Config::default(),
            )
            .unwrap();

        let mut packets = vec![];
        provider.provide_frames(&mut packets).unwrap();

        assert_eq!(packets, vec![
            Packet::pcm(0, vec![100; 16]),
            Packet::pcm(2, vec![-100; 16]),
        ]);
    }

    #[test]
    fn unknown_codec_is_unsupported() {
        let bytes = test_utils::ogg_page(0x06, 0, SERIAL, 0, &[&b"\x80theora"[..]]);

        match probe(bytes) {
            ProbeMatch::Unsupported(reason) => assert!(reason.contains("theora")),
            other => panic!("unexpected result {:?}", other),
        }
    }
}
