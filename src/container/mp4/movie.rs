//! The `moov` box: tracks, sample descriptions, sample tables, and tags.

use super::{
    boxes::{Mp4Box, Mp4Reader},
    fragment::SegmentIndex,
};
use crate::{
    container::util::text,
    error::{DemuxError, Result},
    tracks::Codec,
    tree::{TreeReader, TreeWalk},
};
use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use std::io::Read;
use tracing::{debug, trace};

const OBJECT_TYPE_AAC: u8 = 0x40;
const OBJECT_TYPE_MP3: u8 = 0x69;
const OBJECT_TYPE_MP1_AUDIO: u8 = 0x6B;
const MAX_DECODER_CONFIG_LEN: usize = 8;

const TAG_ES_DESCRIPTOR: u8 = 0x03;
const TAG_DECODER_CONFIG: u8 = 0x04;
const TAG_DECODER_SPECIFIC_INFO: u8 = 0x05;

const TAG_TITLE: [u8; 4] = [0xA9, b'n', b'a', b'm'];
const TAG_ARTIST: [u8; 4] = [0xA9, b'A', b'R', b'T'];

const OPUS_RATE: u32 = 48_000;

/// Codec and layout from a sound sample entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SampleEntry {
    /// A codec which can be passed on.
    Supported {
        /// Codec of the track.
        codec: Codec,
        /// Sample rate, in Hz.
        sample_rate: u32,
        /// Number of channels.
        channels: u16,
    },
    /// A codec which cannot, with a description of why.
    Unsupported(String),
}

/// One `stsc` run: chunks from `first_chunk` onwards hold `samples_per_chunk` samples.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChunkRun {
    /// 1-based index of the first chunk in this run.
    pub first_chunk: u32,
    /// Samples in each chunk of the run.
    pub samples_per_chunk: u32,
}

/// Raw contents of the `stbl` boxes needed to locate samples.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SampleTables {
    /// `stts`: (sample count, sample duration) runs.
    pub durations: Vec<(u32, u32)>,
    /// `stsc` runs.
    pub chunk_runs: Vec<ChunkRun>,
    /// `stsz` size shared by every sample, or 0 if sizes are listed.
    pub fixed_size: u32,
    /// `stsz` sample count.
    pub sample_count: u32,
    /// `stsz` per-sample sizes.
    pub sizes: Vec<u32>,
    /// `stco` or `co64` chunk offsets.
    pub chunk_offsets: Vec<u64>,
}

/// Per-track defaults from `mvex/trex`, used by fragments.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TrackDefaults {
    /// Default sample duration.
    pub duration: u32,
    /// Default sample size.
    pub size: u32,
}

/// A `trak` box.
#[derive(Clone, Debug, Default)]
pub struct Mp4Track {
    /// Track id, from `tkhd`.
    pub id: u32,
    /// Handler type, from `hdlr` (`soun` for audio).
    pub handler: [u8; 4],
    /// Media timescale, from `mdhd`.
    pub timescale: u32,
    /// Media duration in timescale units, from `mdhd`.
    pub duration: u64,
    /// The first sample description.
    pub entry: Option<SampleEntry>,
    /// Sample tables, empty for fragmented files.
    pub tables: SampleTables,
    /// Fragment defaults, if the movie is fragmented.
    pub defaults: TrackDefaults,
}

impl Mp4Track {
    /// Whether this is a sound track.
    #[must_use]
    pub fn is_audio(&self) -> bool {
        &self.handler == b"soun"
    }
}

/// Everything read from the top level of an MP4 file before its media data.
#[derive(Clone, Debug, Default)]
pub struct Mp4Movie {
    /// Tracks, in file order.
    pub tracks: Vec<Mp4Track>,
    /// Whether `moov/mvex` marks the file as fragmented.
    pub fragmented: bool,
    /// Title from `moov/udta/meta/ilst`.
    pub title: Option<String>,
    /// Artist from `moov/udta/meta/ilst`.
    pub artist: Option<String>,
    /// Index of fragments, from the first top-level `sidx`.
    pub segment_index: Option<SegmentIndex>,
    /// The box at which reading stopped (`mdat`, `free`, `moof`, or `emsg`).
    pub stopped_at: Option<Mp4Box>,
    moov_read: bool,
}

impl Mp4Movie {
    /// Reads top-level boxes until the media data is reached.
    pub fn read(reader: &mut Mp4Reader<'_>) -> Result<Self> {
        let root = Mp4Box::root(reader.stream().content_length());
        let mut movie = Self::default();

        movie.stopped_at = TreeWalk::<Mp4Reader<'_>, Self>::new()
            .on(*b"moov", read_moov)
            .on(*b"sidx", |r, b, movie| {
                if movie.segment_index.is_none() {
                    movie.segment_index = Some(SegmentIndex::read(r, b)?);
                }
                Ok(())
            })
            .stop_when(|b, movie| match &b.kind {
                b"mdat" | b"free" => movie.moov_read && !movie.fragmented,
                b"moof" | b"emsg" => true,
                _ => false,
            })
            .run(reader, &root, &mut movie)?;

        if !movie.moov_read {
            return Err(DemuxError::malformed("MP4 file has no moov box"));
        }

        debug!(
            "MP4 movie: {} tracks, fragmented: {}.",
            movie.tracks.len(),
            movie.fragmented
        );

        Ok(movie)
    }
}

fn read_moov(reader: &mut Mp4Reader<'_>, moov: &Mp4Box, movie: &mut Mp4Movie) -> Result<()> {
    movie.moov_read = true;

    TreeWalk::<Mp4Reader<'_>, Mp4Movie>::new()
        .on(*b"trak", read_trak)
        .on(*b"mvex", |r, b, movie| {
            movie.fragmented = true;
            TreeWalk::<Mp4Reader<'_>, Mp4Movie>::new()
                .on(*b"trex", read_trex)
                .run(r, b, movie)?;
            Ok(())
        })
        .on(*b"udta", |r, b, movie| {
            TreeWalk::<Mp4Reader<'_>, Mp4Movie>::new()
                .on(*b"meta", |r, b, movie| {
                    r.version_and_flags()?;
                    TreeWalk::<Mp4Reader<'_>, Mp4Movie>::new()
                        .on(*b"ilst", read_ilst)
                        .run(r, b, movie)?;
                    Ok(())
                })
                .run(r, b, movie)?;
            Ok(())
        })
        .run(reader, moov, movie)?;

    Ok(())
}

fn read_trex(reader: &mut Mp4Reader<'_>, _trex: &Mp4Box, movie: &mut Mp4Movie) -> Result<()> {
    reader.version_and_flags()?;
    let stream = reader.stream();

    let id = stream.read_u32::<BigEndian>()?;
    let _description_index = stream.read_u32::<BigEndian>()?;
    let defaults = TrackDefaults {
        duration: stream.read_u32::<BigEndian>()?,
        size: stream.read_u32::<BigEndian>()?,
    };

    // trex may precede or follow the trak boxes it applies to.
    match movie.tracks.iter_mut().find(|t| t.id == id) {
        Some(track) => track.defaults = defaults,
        None => movie.tracks.push(Mp4Track {
            id,
            defaults,
            ..Mp4Track::default()
        }),
    }

    Ok(())
}

fn read_ilst(reader: &mut Mp4Reader<'_>, ilst: &Mp4Box, movie: &mut Mp4Movie) -> Result<()> {
    while let Some(item) = reader.next_child(ilst)? {
        if item.kind == TAG_TITLE || item.kind == TAG_ARTIST {
            let mut value = None;
            TreeWalk::<Mp4Reader<'_>, Option<String>>::new()
                .on(*b"data", |r, b, value| {
                    let _data_type = r.stream().read_u32::<BigEndian>()?;
                    let _locale = r.stream().read_u32::<BigEndian>()?;
                    *value = Some(text(&r.read_rest(b)?));
                    Ok(())
                })
                .run(reader, &item, &mut value)?;

            if item.kind == TAG_TITLE {
                movie.title = movie.title.take().or(value);
            } else {
                movie.artist = movie.artist.take().or(value);
            }
        }

        reader.skip(&item)?;
    }

    Ok(())
}

fn read_trak(reader: &mut Mp4Reader<'_>, trak: &Mp4Box, movie: &mut Mp4Movie) -> Result<()> {
    let mut track = Mp4Track::default();

    TreeWalk::<Mp4Reader<'_>, Mp4Track>::new()
        .on(*b"tkhd", |r, _, track| {
            let (version, _) = r.version_and_flags()?;
            let stream = r.stream();
            if version == 1 {
                stream.read_u64::<BigEndian>()?;
                stream.read_u64::<BigEndian>()?;
            } else {
                stream.read_u32::<BigEndian>()?;
                stream.read_u32::<BigEndian>()?;
            }
            track.id = stream.read_u32::<BigEndian>()?;
            Ok(())
        })
        .on(*b"mdia", read_mdia)
        .run(reader, trak, &mut track)?;

    trace!(
        "MP4 track {}: handler {:?}, entry {:?}.",
        track.id,
        String::from_utf8_lossy(&track.handler),
        track.entry,
    );

    match movie.tracks.iter_mut().find(|t| t.id == track.id) {
        Some(existing) => {
            track.defaults = existing.defaults;
            *existing = track;
        },
        None => movie.tracks.push(track),
    }

    Ok(())
}

fn read_mdia(reader: &mut Mp4Reader<'_>, mdia: &Mp4Box, track: &mut Mp4Track) -> Result<()> {
    TreeWalk::<Mp4Reader<'_>, Mp4Track>::new()
        .on(*b"mdhd", |r, _, track| {
            let (version, _) = r.version_and_flags()?;
            let stream = r.stream();
            if version == 1 {
                stream.read_u64::<BigEndian>()?;
                stream.read_u64::<BigEndian>()?;
                track.timescale = stream.read_u32::<BigEndian>()?;
                track.duration = stream.read_u64::<BigEndian>()?;
            } else {
                stream.read_u32::<BigEndian>()?;
                stream.read_u32::<BigEndian>()?;
                track.timescale = stream.read_u32::<BigEndian>()?;
                track.duration = u64::from(stream.read_u32::<BigEndian>()?);
            }
            Ok(())
        })
        .on(*b"hdlr", |r, _, track| {
            r.version_and_flags()?;
            let stream = r.stream();
            let _pre_defined = stream.read_u32::<BigEndian>()?;
            stream.read_exact(&mut track.handler)?;
            Ok(())
        })
        .on(*b"minf", |r, b, track| {
            TreeWalk::<Mp4Reader<'_>, Mp4Track>::new()
                .on(*b"stbl", read_stbl)
                .run(r, b, track)?;
            Ok(())
        })
        .run(reader, mdia, track)?;

    Ok(())
}

fn read_stbl(reader: &mut Mp4Reader<'_>, stbl: &Mp4Box, track: &mut Mp4Track) -> Result<()> {
    TreeWalk::<Mp4Reader<'_>, Mp4Track>::new()
        .on(*b"stsd", read_stsd)
        .on(*b"stts", |r, b, track| {
            r.version_and_flags()?;
            let count = r.stream().read_u32::<BigEndian>()?;
            r.check_entries(b, count, 8)?;
            for _ in 0..count {
                let stream = r.stream();
                let run = (stream.read_u32::<BigEndian>()?, stream.read_u32::<BigEndian>()?);
                track.tables.durations.push(run);
            }
            Ok(())
        })
        .on(*b"stsc", |r, b, track| {
            r.version_and_flags()?;
            let count = r.stream().read_u32::<BigEndian>()?;
            r.check_entries(b, count, 12)?;
            for _ in 0..count {
                let stream = r.stream();
                let first_chunk = stream.read_u32::<BigEndian>()?;
                let samples_per_chunk = stream.read_u32::<BigEndian>()?;
                let _description_index = stream.read_u32::<BigEndian>()?;
                track.tables.chunk_runs.push(ChunkRun {
                    first_chunk,
                    samples_per_chunk,
                });
            }
            Ok(())
        })
        .on(*b"stsz", |r, b, track| {
            r.version_and_flags()?;
            track.tables.fixed_size = r.stream().read_u32::<BigEndian>()?;
            track.tables.sample_count = r.stream().read_u32::<BigEndian>()?;
            if track.tables.fixed_size == 0 {
                let count = track.tables.sample_count;
                r.check_entries(b, count, 4)?;
                for _ in 0..count {
                    let size = r.stream().read_u32::<BigEndian>()?;
                    track.tables.sizes.push(size);
                }
            }
            Ok(())
        })
        .on(*b"stco", |r, b, track| {
            r.version_and_flags()?;
            let count = r.stream().read_u32::<BigEndian>()?;
            r.check_entries(b, count, 4)?;
            for _ in 0..count {
                let offset = r.stream().read_u32::<BigEndian>()?;
                track.tables.chunk_offsets.push(u64::from(offset));
            }
            Ok(())
        })
        .on(*b"co64", |r, b, track| {
            r.version_and_flags()?;
            let count = r.stream().read_u32::<BigEndian>()?;
            r.check_entries(b, count, 8)?;
            for _ in 0..count {
                let offset = r.stream().read_u64::<BigEndian>()?;
                track.tables.chunk_offsets.push(offset);
            }
            Ok(())
        })
        .run(reader, stbl, track)?;

    Ok(())
}

fn read_stsd(reader: &mut Mp4Reader<'_>, stsd: &Mp4Box, track: &mut Mp4Track) -> Result<()> {
    reader.version_and_flags()?;
    let count = reader.stream().read_u32::<BigEndian>()?;

    if count == 0 || !track.is_audio() {
        return Ok(());
    }

    if let Some(entry) = reader.next_child(stsd)? {
        track.entry = Some(read_sound_entry(reader, &entry)?);
        reader.skip(&entry)?;
    }

    Ok(())
}

/// Codec-specific boxes found after the fixed fields of a sound sample entry.
#[derive(Default)]
struct EntryExtensions {
    esds: Option<Vec<u8>>,
    d_ops: Option<Vec<u8>>,
}

fn read_extensions(
    reader: &mut Mp4Reader<'_>,
    entry: &Mp4Box,
    found: &mut EntryExtensions,
) -> Result<()> {
    TreeWalk::<Mp4Reader<'_>, EntryExtensions>::new()
        .on(*b"esds", |r, b, found| {
            r.version_and_flags()?;
            found.esds = Some(r.read_rest(b)?);
            Ok(())
        })
        .on(*b"dOps", |r, b, found| {
            found.d_ops = Some(r.read_rest(b)?);
            Ok(())
        })
        // QuickTime files nest the decoder configuration in a `wave` box.
        .on(*b"wave", read_extensions)
        .run(reader, entry, found)?;

    Ok(())
}

fn read_sound_entry(reader: &mut Mp4Reader<'_>, entry: &Mp4Box) -> Result<SampleEntry> {
    let stream = reader.stream();

    // Reserved bytes and data reference index.
    let mut skipped = [0u8; 8];
    stream.read_exact(&mut skipped)?;

    let version = stream.read_u16::<BigEndian>()?;
    let _revision = stream.read_u16::<BigEndian>()?;
    let _vendor = stream.read_u32::<BigEndian>()?;
    let mut channels = stream.read_u16::<BigEndian>()?;
    let _sample_size = stream.read_u16::<BigEndian>()?;
    let _compression_id = stream.read_u16::<BigEndian>()?;
    let _packet_size = stream.read_u16::<BigEndian>()?;
    let mut sample_rate = stream.read_u32::<BigEndian>()? >> 16;

    match version {
        0 => {},
        1 => stream.skip_fully(16)?,
        2 => {
            let _struct_len = stream.read_u32::<BigEndian>()?;
            sample_rate = stream.read_f64::<BigEndian>()? as u32;
            channels = stream.read_u32::<BigEndian>()? as u16;
            stream.skip_fully(20)?;
        },
        _ => {
            return Ok(SampleEntry::Unsupported(format!(
                "unsupported sound sample entry version {}",
                version
            )))
        },
    }

    let mut found = EntryExtensions::default();
    read_extensions(reader, entry, &mut found)?;

    let codec = match (&entry.kind, found) {
        (
            b"mp4a",
            EntryExtensions {
                esds: Some(esds), ..
            },
        ) => match read_es_descriptor(&esds) {
            Ok(codec) => codec,
            Err(DemuxError::Unsupported(reason)) => return Ok(SampleEntry::Unsupported(reason)),
            Err(e) => return Err(e),
        },
        (
            b"Opus",
            EntryExtensions {
                d_ops: Some(d_ops), ..
            },
        ) => {
            if d_ops.len() < 11 {
                return Err(DemuxError::malformed("dOps box too short"));
            }
            sample_rate = OPUS_RATE;
            Codec::Opus {
                pre_skip: BigEndian::read_u16(&d_ops[2..4]),
                header: d_ops,
            }
        },
        (kind, _) => {
            return Ok(SampleEntry::Unsupported(format!(
                "unsupported MP4 audio codec {:?}",
                String::from_utf8_lossy(kind)
            )))
        },
    };

    Ok(SampleEntry::Supported {
        codec,
        sample_rate,
        channels,
    })
}

/// Reads the length field of an MPEG-4 descriptor: up to four bytes of 7 bits.
fn descriptor_len(data: &mut &[u8]) -> Result<usize> {
    let mut len = 0usize;

    for _ in 0..4 {
        let (&b, rest) = data
            .split_first()
            .ok_or_else(|| DemuxError::malformed("truncated ES descriptor"))?;
        *data = rest;
        len = (len << 7) | usize::from(b & 0x7F);
        if b & 0x80 == 0 {
            break;
        }
    }

    Ok(len)
}

/// Finds the descriptor with `tag` at the start of `data`, returning its body.
fn descriptor<'a>(data: &mut &'a [u8], tag: u8) -> Result<&'a [u8]> {
    let (&found, mut rest) = data
        .split_first()
        .ok_or_else(|| DemuxError::malformed("truncated ES descriptor"))?;

    if found != tag {
        return Err(DemuxError::malformed_owned(format!(
            "expected descriptor tag {:#04x}, found {:#04x}",
            tag, found
        )));
    }

    let len = descriptor_len(&mut rest)?;
    let body = rest
        .get(..len)
        .ok_or_else(|| DemuxError::malformed("ES descriptor overruns esds box"))?;
    *data = &rest[len..];

    Ok(body)
}

/// Interprets an `esds` payload.
pub(crate) fn read_es_descriptor(mut data: &[u8]) -> Result<Codec> {
    let mut es = descriptor(&mut data, TAG_ES_DESCRIPTOR)?;

    let flags = *es
        .get(2)
        .ok_or_else(|| DemuxError::malformed("truncated ES descriptor"))?;
    let mut skip = 3;
    if flags & 0x80 != 0 {
        skip += 2;
    }
    if flags & 0x40 != 0 {
        skip += 1 + usize::from(es.get(skip).copied().unwrap_or_default());
    }
    if flags & 0x20 != 0 {
        skip += 2;
    }
    es = es
        .get(skip..)
        .ok_or_else(|| DemuxError::malformed("truncated ES descriptor"))?;

    let mut config = descriptor(&mut es, TAG_DECODER_CONFIG)?;
    let object_type = *config
        .first()
        .ok_or_else(|| DemuxError::malformed("empty decoder config descriptor"))?;

    match object_type {
        OBJECT_TYPE_AAC => {
            config = config
                .get(13..)
                .ok_or_else(|| DemuxError::malformed("truncated decoder config descriptor"))?;
            let specific = descriptor(&mut config, TAG_DECODER_SPECIFIC_INFO)?;

            if specific.is_empty() || specific.len() > MAX_DECODER_CONFIG_LEN {
                return Err(DemuxError::malformed("invalid AAC decoder config length"));
            }

            Ok(Codec::Aac {
                decoder_config: specific.to_vec(),
            })
        },
        OBJECT_TYPE_MP3 | OBJECT_TYPE_MP1_AUDIO => Ok(Codec::Mp3),
        other => Err(DemuxError::Unsupported(format!(
            "unsupported MP4 object type {:#04x}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    #[test]
    fn aac_config_from_esds() {
        let esds = test_utils::esds_payload(0x40, &[0x12, 0x10]);
        assert_eq!(read_es_descriptor(&esds).unwrap(), Codec::Aac {
            decoder_config: vec![0x12, 0x10],
        });
    }

    #[test]
    fn mp3_and_unknown_object_types() {
        let mp3 = test_utils::esds_payload(0x6B, &[]);
        assert_eq!(read_es_descriptor(&mp3).unwrap(), Codec::Mp3);

        let vorbis = test_utils::esds_payload(0xDD, &[]);
        assert!(matches!(
            read_es_descriptor(&vorbis),
            Err(DemuxError::Unsupported(_))
        ));
    }

    #[test]
    fn long_descriptor_lengths() {
        let mut data: &[u8] = &[0x80, 0x80, 0x80, 0x05, 0xFF];
        assert_eq!(descriptor_len(&mut data).unwrap(), 5);
        assert_eq!(data, &[0xFF]);
    }
}
