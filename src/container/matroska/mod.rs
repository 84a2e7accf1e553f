//! Matroska and WebM files.
//!
//! Playback follows the first audio track with a supported codec. Seeking
//! uses the `Cues` index when one is present (loaded lazily via the
//! `SeekHead`), and otherwise rereads from the first cluster, discarding
//! blocks before the target.

mod block;
mod ebml;
mod header;

pub use self::{
    block::{Block, Lacing},
    ebml::{
        decode_vint,
        encode_vint,
        interpret_vint,
        vint_len,
        EbmlElement,
        EbmlReader,
        VarIntKind,
    },
    header::{cues_for_track, CuePoint, CueTable, MatroskaHeader, MatroskaTrack},
};

use self::{block::split_laces, header::read_cues};
use super::{
    adts::{audio_specific_config, sample_rate_index},
    util::check_next_bytes,
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
    tracks::{AudioFormat, Codec, FrameProvider, Packet, PacketSink},
    tree::{TreeReader, TreeWalk},
    Config,
};
use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, trace, warn};

/// Element ids used by the demuxer.
#[allow(missing_docs)]
pub mod ids {
    pub const EBML: u32 = 0x1A45_DFA3;
    pub const DOC_TYPE: u32 = 0x4282;
    pub const SEGMENT: u32 = 0x1853_8067;

    pub const SEEK_HEAD: u32 = 0x114D_9B74;
    pub const SEEK: u32 = 0x4DBB;
    pub const SEEK_ID: u32 = 0x53AB;
    pub const SEEK_POSITION: u32 = 0x53AC;

    pub const INFO: u32 = 0x1549_A966;
    pub const TIMECODE_SCALE: u32 = 0x2A_D7B1;
    pub const DURATION: u32 = 0x4489;
    pub const TITLE: u32 = 0x7BA9;

    pub const TRACKS: u32 = 0x1654_AE6B;
    pub const TRACK_ENTRY: u32 = 0xAE;
    pub const TRACK_NUMBER: u32 = 0xD7;
    pub const TRACK_TYPE: u32 = 0x83;
    pub const CODEC_ID: u32 = 0x86;
    pub const CODEC_PRIVATE: u32 = 0x63A2;
    pub const AUDIO: u32 = 0xE1;
    pub const SAMPLING_FREQUENCY: u32 = 0xB5;
    pub const CHANNELS: u32 = 0x9F;
    pub const BIT_DEPTH: u32 = 0x6264;

    pub const CLUSTER: u32 = 0x1F43_B675;
    pub const TIMECODE: u32 = 0xE7;
    pub const SIMPLE_BLOCK: u32 = 0xA3;
    pub const BLOCK_GROUP: u32 = 0xA0;
    pub const BLOCK: u32 = 0xA1;

    pub const CUES: u32 = 0x1C53_BB6B;
    pub const CUE_POINT: u32 = 0xBB;
    pub const CUE_TIME: u32 = 0xB3;
    pub const CUE_TRACK_POSITIONS: u32 = 0xB7;
    pub const CUE_TRACK: u32 = 0xF7;
    pub const CUE_CLUSTER_POSITION: u32 = 0xF1;

    pub const TAGS: u32 = 0x1254_C367;
    pub const TAG: u32 = 0x7373;
    pub const SIMPLE_TAG: u32 = 0x67C8;
    pub const TAG_NAME: u32 = 0x45A3;
    pub const TAG_STRING: u32 = 0x4487;

    pub const CHAPTERS: u32 = 0x1043_A770;
    pub const ATTACHMENTS: u32 = 0x1941_A469;
}

/// Segment-level elements, any of which ends a cluster of unknown size.
const SEGMENT_CHILDREN: &[u32] = &[
    ids::CLUSTER,
    ids::CUES,
    ids::TAGS,
    ids::CHAPTERS,
    ids::ATTACHMENTS,
    ids::SEEK_HEAD,
    ids::INFO,
    ids::TRACKS,
];

const DEFAULT_SAMPLE_RATE: u32 = 8000;
const OPUS_HEAD_LEN: usize = 19;

/// Maps the codec of `track` onto one we can hand out, or `None` if it is not supported.
fn codec_for(track: &MatroskaTrack) -> Result<Option<Codec>> {
    let id = track.codec_id.as_str();
    let private = &track.codec_private;

    let codec = if id == "A_OPUS" {
        if private.len() < OPUS_HEAD_LEN {
            return Err(DemuxError::malformed("Opus track without OpusHead"));
        }

        Codec::Opus {
            header: private.clone(),
            pre_skip: LittleEndian::read_u16(&private[10..12]),
        }
    } else if id == "A_VORBIS" {
        let headers = split_laces(Lacing::Xiph, private)?;
        if headers.len() != 3 {
            return Err(DemuxError::malformed("Vorbis track needs three header packets"));
        }

        Codec::Vorbis {
            identification: headers[0].to_vec(),
            setup: headers[2].to_vec(),
        }
    } else if id.starts_with("A_AAC") {
        let decoder_config = if private.is_empty() {
            legacy_aac_config(track)?
        } else {
            private.clone()
        };

        Codec::Aac { decoder_config }
    } else if id == "A_MPEG/L3" {
        Codec::Mp3
    } else {
        return Ok(None);
    };

    Ok(Some(codec))
}

/// Builds an `AudioSpecificConfig` for old files naming the AAC profile in their codec id.
fn legacy_aac_config(track: &MatroskaTrack) -> Result<Vec<u8>> {
    let profile = track.codec_id.rsplit('/').next().unwrap_or_default();

    let object_type = match profile {
        "MAIN" => 1,
        "LC" | "SBR" => 2,
        "SSR" => 3,
        "LTP" => 4,
        _ => return Err(DemuxError::malformed("AAC track without decoder configuration")),
    };

    let rate_index = sample_rate_index(track.sample_rate as u32)
        .ok_or_else(|| DemuxError::malformed("AAC track with a nonstandard sample rate"))?;

    Ok(audio_specific_config(object_type, rate_index, track.channels as u8))
}

/// Format of `track`, if it is an audio track with a supported codec.
fn track_format(track: &MatroskaTrack) -> Result<Option<AudioFormat>> {
    if !track.is_audio() {
        return Ok(None);
    }

    let codec = match codec_for(track)? {
        Some(codec) => codec,
        None => return Ok(None),
    };

    let sample_rate = match track.sample_rate as u32 {
        0 => DEFAULT_SAMPLE_RATE,
        rate => rate,
    };

    Ok(Some(AudioFormat::new(codec, sample_rate, track.channels.max(1) as u16)))
}

/// Picks the first audio track with a supported codec.
fn select_track(header: &MatroskaHeader) -> Result<(u64, AudioFormat)> {
    for track in &header.tracks {
        if let Some(format) = track_format(track)? {
            return Ok((track.number, format));
        }

        debug!("Skipping Matroska track {} with codec {}.", track.number, track.codec_id);
    }

    Err(DemuxError::Unsupported(
        "no supported audio track in Matroska file".into(),
    ))
}

/// Detection support for Matroska and WebM files.
#[derive(Clone, Copy, Debug, Default)]
pub struct MatroskaProbe;

impl ContainerProbe for MatroskaProbe {
    fn name(&self) -> &'static str {
        "matroska"
    }

    fn matches_hints(&self, hints: &Hints) -> bool {
        hints.matches(
            &[
                "audio/webm",
                "video/webm",
                "audio/x-matroska",
                "video/x-matroska",
            ],
            &["mka", "mkv", "webm"],
        )
    }

    fn probe(
        &self,
        reference: &AudioReference,
        stream: &mut dyn SeekableStream,
        _config: &Config,
    ) -> Result<Option<ProbeMatch>> {
        if !check_next_bytes(stream, signatures::MATROSKA)? {
            return Ok(None);
        }

        stream.seek(0)?;

        let selected = MatroskaHeader::read(&mut EbmlReader::new(stream))
            .and_then(|header| select_track(&header).map(|(number, _)| (header, number)));

        let (header, number) = match selected {
            Ok(selected) => selected,
            Err(DemuxError::Unsupported(reason)) => {
                return Ok(Some(ProbeMatch::Unsupported(reason)));
            },
            Err(e) => return Err(e),
        };

        let mut builder = TrackInfoBuilder::for_stream(reference, stream);
        builder
            .set_title(header.tag("TITLE").map(String::from))
            .set_title(header.title.clone())
            .set_author(header.tag("ARTIST").map(String::from))
            .set_isrc(header.tag("ISRC").map(String::from))
            .set_length_ms(header.duration_ms());

        Ok(Some(ProbeMatch::Supported {
            settings: number.to_string(),
            track_info: builder.build(),
        }))
    }

    fn create_provider(
        &self,
        settings: &str,
        _track_info: &TrackInfo,
        mut stream: Box<dyn SeekableStream>,
        _config: &Config,
    ) -> Result<Box<dyn FrameProvider>> {
        let header = MatroskaHeader::read(&mut EbmlReader::new(&mut *stream))?;

        let selected = settings.parse::<u64>().ok().and_then(|number| {
            header
                .tracks
                .iter()
                .find(|track| track.number == number)
        });

        let (number, format) = match selected {
            Some(track) => match track_format(track)? {
                Some(format) => (track.number, format),
                None => return Err(DemuxError::malformed("selected Matroska track is not audio")),
            },
            None => select_track(&header)?,
        };

        Ok(Box::new(MatroskaProvider::new(stream, header, number, format)))
    }
}

/// Where the provider is within the segment.
#[derive(Clone, Debug, Default)]
struct ReadState {
    cluster: Option<EbmlElement>,
    /// Segment child which was read while looking for the end of an unknown-size cluster.
    pending: Option<EbmlElement>,
    cluster_timecode: u64,
    /// Blocks before this timecode (in ms) are dropped.
    minimum_timecode: Option<u64>,
}

impl ReadState {
    fn emit(
        &mut self,
        header: &MatroskaHeader,
        track: u64,
        data: &[u8],
        sink: &mut dyn PacketSink,
    ) -> Result<()> {
        let block = Block::parse(data)?;
        if block.track != track {
            return Ok(());
        }

        let units = (self.cluster_timecode as i64 + i64::from(block.relative_timecode)).max(0);
        let timecode = header.units_to_ms(units as u64);

        if let Some(minimum) = self.minimum_timecode {
            if timecode < minimum {
                trace!("Dropping block at {}ms before seek target.", timecode);
                return Ok(());
            }
            self.minimum_timecode = None;
        }

        for frame in block.frames {
            sink.push(Packet::encoded(timecode, frame.to_vec()))?;
        }

        Ok(())
    }
}

/// Reads the blocks of one track from the clusters of a Matroska segment.
pub struct MatroskaProvider {
    stream: Box<dyn SeekableStream>,
    header: MatroskaHeader,
    segment: EbmlElement,
    track: u64,
    format: AudioFormat,
    cues: Option<CueTable>,
    state: ReadState,
}

impl MatroskaProvider {
    /// Create a provider over a stream positioned at the first cluster's payload.
    #[must_use]
    pub fn new(
        stream: Box<dyn SeekableStream>,
        header: MatroskaHeader,
        track: u64,
        format: AudioFormat,
    ) -> Self {
        let segment = header
            .segment
            .unwrap_or_else(|| EbmlElement::root(0, None));

        // Reading resumes inside the first cluster, if the header walk stopped there.
        let cluster = header
            .first_cluster
            .filter(|cluster| cluster.data_offset == stream.position());

        Self {
            stream,
            header,
            segment,
            track,
            format,
            cues: None,
            state: ReadState {
                cluster,
                ..ReadState::default()
            },
        }
    }

    fn load_cues(&mut self) -> Result<CueTable> {
        if let Some(raw) = &self.header.raw_cues {
            return Ok(cues_for_track(raw, self.track));
        }

        let offset = match self.header.cues_offset {
            Some(offset) => offset,
            None => return Ok(CueTable::default()),
        };

        let mut reader = EbmlReader::new(&mut *self.stream);
        reader.stream().seek(offset)?;

        let loaded = match reader.read_element()? {
            Some(element) if element.id == ids::CUES => read_cues(&mut reader, &element),
            _ => Err(DemuxError::malformed("SeekHead does not point at Cues")),
        };

        match loaded {
            Ok(raw) => Ok(cues_for_track(&raw, self.track)),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                warn!("Ignoring unreadable Matroska cues: {}.", e);
                Ok(CueTable::default())
            },
        }
    }
}

impl FrameProvider for MatroskaProvider {
    fn format(&self) -> &AudioFormat {
        &self.format
    }

    fn is_seekable(&self) -> bool {
        self.stream.can_seek_hard()
    }

    fn provide_frames(&mut self, sink: &mut dyn PacketSink) -> Result<()> {
        let mut reader = EbmlReader::new(&mut *self.stream);
        let state = &mut self.state;

        loop {
            let cluster = match state.cluster {
                Some(cluster) => cluster,
                None => {
                    let element = match state.pending.take() {
                        Some(element) => element,
                        None => match reader.next_child(&self.segment)? {
                            Some(element) => element,
                            None => return Ok(()),
                        },
                    };

                    if element.id == ids::CLUSTER {
                        trace!("Entering Matroska cluster at {}.", element.offset);
                        state.cluster = Some(element);
                        state.cluster_timecode = 0;
                    } else if element.size.is_none() {
                        debug!("Segment ends with element {:#x} of unknown size.", element.id);
                        return Ok(());
                    } else {
                        reader.skip(&element)?;
                    }

                    continue;
                },
            };

            let child = match reader.next_child(&cluster)? {
                Some(child) => child,
                None => {
                    state.cluster = None;
                    continue;
                },
            };

            if cluster.size.is_none() && SEGMENT_CHILDREN.contains(&child.id) {
                state.pending = Some(child);
                state.cluster = None;
                continue;
            }

            match child.id {
                ids::TIMECODE => state.cluster_timecode = reader.read_uint(&child)?,
                ids::SIMPLE_BLOCK => {
                    let data = reader.read_binary(&child)?;
                    state.emit(&self.header, self.track, &data, sink)?;
                },
                ids::BLOCK_GROUP => {
                    let mut blocks = Vec::new();
                    TreeWalk::<EbmlReader<'_>, Vec<Vec<u8>>>::new()
                        .on(ids::BLOCK, |r, e, blocks| {
                            blocks.push(r.read_binary(e)?);
                            Ok(())
                        })
                        .run(&mut reader, &child, &mut blocks)?;

                    for data in blocks {
                        state.emit(&self.header, self.track, &data, sink)?;
                    }
                },
                _ => {},
            }

            reader.skip(&child)?;
        }
    }

    fn seek_to_timecode(&mut self, timecode: u64) -> Result<u64> {
        if !self.stream.can_seek_hard() {
            return Err(DemuxError::Unseekable);
        }

        let cues = match self.cues.take() {
            Some(cues) => cues,
            None => self.load_cues()?,
        };

        let target = self.header.ms_to_units(timecode);
        let cue = cues.lookup(target);
        self.cues = Some(cues);

        self.state = ReadState::default();

        if let Some(cue) = cue {
            let offset = self.header.segment_data_offset() + cue.cluster_position;
            self.stream.seek(offset)?;

            return Ok(self.header.units_to_ms(cue.time));
        }

        let start = self
            .header
            .first_cluster
            .map_or_else(|| self.header.segment_data_offset(), |cluster| cluster.offset);
        self.stream.seek(start)?;

        self.state.minimum_timecode = Some(timecode);

        Ok(timecode)
    }
}
