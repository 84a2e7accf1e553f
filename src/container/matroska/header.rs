use super::{
    ebml::{EbmlElement, EbmlReader},
    ids,
};
use crate::{
    error::{DemuxError, Result},
    tree::{TreeReader, TreeWalk},
};
use tracing::{debug, trace};

const DEFAULT_TIMECODE_SCALE: u64 = 1_000_000;
const TRACK_TYPE_AUDIO: u64 = 2;

/// Parameters of one `TrackEntry`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MatroskaTrack {
    /// Track number, as referenced by blocks.
    pub number: u64,
    /// Track type (2 for audio).
    pub track_type: u64,
    /// Codec identifier, such as `A_OPUS`.
    pub codec_id: String,
    /// Codec-specific setup data.
    pub codec_private: Vec<u8>,
    /// Sample rate, in Hz.
    pub sample_rate: f64,
    /// Number of channels.
    pub channels: u64,
    /// Bits per sample, if given.
    pub bit_depth: u64,
}

impl MatroskaTrack {
    /// Whether this is an audio track.
    #[must_use]
    pub fn is_audio(&self) -> bool {
        self.track_type == TRACK_TYPE_AUDIO
    }
}

/// A cue: the cluster holding the block at `time`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CuePoint {
    /// Cue time, in timecode-scale units.
    pub time: u64,
    /// Cluster offset, relative to the start of the segment payload.
    pub cluster_position: u64,
}

/// Cue points of a single track, sorted by time.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CueTable {
    points: Vec<CuePoint>,
}

impl CueTable {
    /// Builds a table from unsorted cue points.
    #[must_use]
    pub fn new(mut points: Vec<CuePoint>) -> Self {
        points.sort_by_key(|point| point.time);
        Self { points }
    }

    /// Whether the table holds no cues.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Finds the last cue at or before `time`, or the first cue if all are later.
    #[must_use]
    pub fn lookup(&self, time: u64) -> Option<CuePoint> {
        let index = self.points.partition_point(|point| point.time <= time);
        self.points.get(index.saturating_sub(1)).copied()
    }
}

/// Everything read from the segment before its first cluster.
#[derive(Clone, Debug, Default)]
pub struct MatroskaHeader {
    /// The segment element.
    pub segment: Option<EbmlElement>,
    /// Nanoseconds per timecode unit.
    pub timecode_scale: u64,
    /// Duration, in timecode-scale units.
    pub duration: Option<f64>,
    /// Segment title.
    pub title: Option<String>,
    /// All track entries.
    pub tracks: Vec<MatroskaTrack>,
    /// `SimpleTag` name/value pairs.
    pub tags: Vec<(String, String)>,
    /// Absolute offset of the `Cues` element, if known.
    pub cues_offset: Option<u64>,
    /// Cue points of every track, if the `Cues` element preceded the first cluster.
    pub(crate) raw_cues: Option<Vec<(u64, CuePoint)>>,
    /// The first cluster, whose header was the last thing read.
    pub first_cluster: Option<EbmlElement>,
}

impl MatroskaHeader {
    /// Reads the EBML header and segment headers, stopping at the first cluster.
    ///
    /// Returns `Unsupported` for documents which are neither Matroska nor WebM.
    pub fn read(reader: &mut EbmlReader<'_>) -> Result<Self> {
        let ebml = match reader.read_element()? {
            Some(element) if element.id == ids::EBML => element,
            _ => return Err(DemuxError::malformed("missing EBML header")),
        };

        let mut doc_type = String::new();
        TreeWalk::<EbmlReader<'_>, String>::new()
            .on(ids::DOC_TYPE, |r, e, doc_type| {
                *doc_type = r.read_string(e)?;
                Ok(())
            })
            .run(reader, &ebml, &mut doc_type)?;
        reader.skip(&ebml)?;

        if doc_type != "matroska" && doc_type != "webm" {
            return Err(DemuxError::Unsupported(format!(
                "unsupported EBML document type {:?}",
                doc_type
            )));
        }

        let segment = loop {
            match reader.read_element()? {
                Some(element) if element.id == ids::SEGMENT => break element,
                Some(element) => reader.skip(&element)?,
                None => return Err(DemuxError::malformed("missing Matroska segment")),
            }
        };

        let mut header = Self {
            segment: Some(segment),
            timecode_scale: DEFAULT_TIMECODE_SCALE,
            ..Self::default()
        };

        let first_cluster = TreeWalk::<EbmlReader<'_>, Self>::new()
            .on(ids::SEEK_HEAD, read_seek_head)
            .on(ids::INFO, read_info)
            .on(ids::TRACKS, read_tracks)
            .on(ids::TAGS, read_tags)
            .on(ids::CUES, |r, e, header| {
                header.cues_offset = Some(e.offset);
                header.raw_cues = Some(read_cues(r, e)?);
                Ok(())
            })
            .stop_when(|e, _| e.id == ids::CLUSTER)
            .run(reader, &segment, &mut header)?;

        header.first_cluster = first_cluster;

        debug!(
            "Matroska segment: {} tracks, timecode scale {}, first cluster at {:?}.",
            header.tracks.len(),
            header.timecode_scale,
            header.first_cluster.map(|cluster| cluster.offset),
        );

        Ok(header)
    }

    /// Offset of the segment payload, from which cue and seek positions are measured.
    #[must_use]
    pub fn segment_data_offset(&self) -> u64 {
        self.segment.map_or(0, |segment| segment.data_offset)
    }

    /// Duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> Option<u64> {
        self.duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| (d * self.timecode_scale as f64 / 1_000_000.0) as u64)
    }

    /// Converts timecode-scale units into milliseconds.
    #[must_use]
    pub fn units_to_ms(&self, units: u64) -> u64 {
        (u128::from(units) * u128::from(self.timecode_scale) / 1_000_000) as u64
    }

    /// Converts milliseconds into timecode-scale units.
    #[must_use]
    pub fn ms_to_units(&self, ms: u64) -> u64 {
        (u128::from(ms) * 1_000_000 / u128::from(self.timecode_scale.max(1))) as u64
    }

    /// First value of a `SimpleTag`, compared case-insensitively.
    #[must_use]
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
struct SeekEntry {
    id: Vec<u8>,
    position: Option<u64>,
}

fn read_seek_head(
    reader: &mut EbmlReader<'_>,
    element: &EbmlElement,
    header: &mut MatroskaHeader,
) -> Result<()> {
    let mut entries: Vec<SeekEntry> = Vec::new();

    TreeWalk::<EbmlReader<'_>, Vec<SeekEntry>>::new()
        .on(ids::SEEK, |r, e, entries| {
            let mut entry = SeekEntry::default();
            TreeWalk::<EbmlReader<'_>, SeekEntry>::new()
                .on(ids::SEEK_ID, |r, e, entry| {
                    entry.id = r.read_binary(e)?;
                    Ok(())
                })
                .on(ids::SEEK_POSITION, |r, e, entry| {
                    entry.position = Some(r.read_uint(e)?);
                    Ok(())
                })
                .run(r, e, &mut entry)?;
            entries.push(entry);
            Ok(())
        })
        .run(reader, element, &mut entries)?;

    let cues_id = ids::CUES.to_be_bytes();
    let segment_start = header.segment_data_offset();

    for entry in entries {
        if entry.id == cues_id {
            if let Some(position) = entry.position {
                trace!("SeekHead locates Cues at segment offset {}.", position);
                if header.cues_offset.is_none() {
                    header.cues_offset = Some(segment_start + position);
                }
            }
        }
    }

    Ok(())
}

fn read_info(
    reader: &mut EbmlReader<'_>,
    element: &EbmlElement,
    header: &mut MatroskaHeader,
) -> Result<()> {
    TreeWalk::<EbmlReader<'_>, MatroskaHeader>::new()
        .on(ids::TIMECODE_SCALE, |r, e, header| {
            header.timecode_scale = r.read_uint(e)?.max(1);
            Ok(())
        })
        .on(ids::DURATION, |r, e, header| {
            header.duration = Some(r.read_float(e)?);
            Ok(())
        })
        .on(ids::TITLE, |r, e, header| {
            header.title = Some(r.read_string(e)?);
            Ok(())
        })
        .run(reader, element, header)?;

    Ok(())
}

fn read_tracks(
    reader: &mut EbmlReader<'_>,
    element: &EbmlElement,
    header: &mut MatroskaHeader,
) -> Result<()> {
    TreeWalk::<EbmlReader<'_>, MatroskaHeader>::new()
        .on(ids::TRACK_ENTRY, read_track_entry)
        .run(reader, element, header)?;

    Ok(())
}

fn read_track_entry(
    reader: &mut EbmlReader<'_>,
    element: &EbmlElement,
    header: &mut MatroskaHeader,
) -> Result<()> {
    let mut track = MatroskaTrack::default();

    TreeWalk::<EbmlReader<'_>, MatroskaTrack>::new()
        .on(ids::TRACK_NUMBER, |r, e, track| {
            track.number = r.read_uint(e)?;
            Ok(())
        })
        .on(ids::TRACK_TYPE, |r, e, track| {
            track.track_type = r.read_uint(e)?;
            Ok(())
        })
        .on(ids::CODEC_ID, |r, e, track| {
            track.codec_id = r.read_string(e)?;
            Ok(())
        })
        .on(ids::CODEC_PRIVATE, |r, e, track| {
            track.codec_private = r.read_binary(e)?;
            Ok(())
        })
        .on(ids::AUDIO, |r, e, track| {
            TreeWalk::<EbmlReader<'_>, MatroskaTrack>::new()
                .on(ids::SAMPLING_FREQUENCY, |r, e, track| {
                    track.sample_rate = r.read_float(e)?;
                    Ok(())
                })
                .on(ids::CHANNELS, |r, e, track| {
                    track.channels = r.read_uint(e)?;
                    Ok(())
                })
                .on(ids::BIT_DEPTH, |r, e, track| {
                    track.bit_depth = r.read_uint(e)?;
                    Ok(())
                })
                .run(r, e, track)?;
            Ok(())
        })
        .run(reader, element, &mut track)?;

    trace!("Matroska track {}: {} ({}).", track.number, track.codec_id, track.track_type);
    header.tracks.push(track);

    Ok(())
}

fn read_tags(
    reader: &mut EbmlReader<'_>,
    element: &EbmlElement,
    header: &mut MatroskaHeader,
) -> Result<()> {
    TreeWalk::<EbmlReader<'_>, MatroskaHeader>::new()
        .on(ids::TAG, |r, e, header| {
            TreeWalk::<EbmlReader<'_>, MatroskaHeader>::new()
                .on(ids::SIMPLE_TAG, read_simple_tag)
                .run(r, e, header)?;
            Ok(())
        })
        .run(reader, element, header)?;

    Ok(())
}

fn read_simple_tag(
    reader: &mut EbmlReader<'_>,
    element: &EbmlElement,
    header: &mut MatroskaHeader,
) -> Result<()> {
    let mut pair = (String::new(), String::new());

    TreeWalk::<EbmlReader<'_>, (String, String)>::new()
        .on(ids::TAG_NAME, |r, e, pair| {
            pair.0 = r.read_string(e)?;
            Ok(())
        })
        .on(ids::TAG_STRING, |r, e, pair| {
            pair.1 = r.read_string(e)?;
            Ok(())
        })
        .run(reader, element, &mut pair)?;

    if !pair.0.is_empty() {
        header.tags.push(pair);
    }

    Ok(())
}

/// Reads every cue point in a `Cues` element, as (track, cue) pairs.
pub(crate) fn read_cues(
    reader: &mut EbmlReader<'_>,
    element: &EbmlElement,
) -> Result<Vec<(u64, CuePoint)>> {
    let mut cues = Vec::new();

    TreeWalk::<EbmlReader<'_>, Vec<(u64, CuePoint)>>::new()
        .on(ids::CUE_POINT, read_cue_point)
        .run(reader, element, &mut cues)?;

    trace!("Read {} cue positions.", cues.len());

    Ok(cues)
}

#[derive(Default)]
struct RawCue {
    time: u64,
    positions: Vec<(u64, u64)>,
}

fn read_cue_point(
    reader: &mut EbmlReader<'_>,
    element: &EbmlElement,
    cues: &mut Vec<(u64, CuePoint)>,
) -> Result<()> {
    let mut cue = RawCue::default();

    TreeWalk::<EbmlReader<'_>, RawCue>::new()
        .on(ids::CUE_TIME, |r, e, cue| {
            cue.time = r.read_uint(e)?;
            Ok(())
        })
        .on(ids::CUE_TRACK_POSITIONS, |r, e, cue| {
            let mut position = (0, 0);
            TreeWalk::<EbmlReader<'_>, (u64, u64)>::new()
                .on(ids::CUE_TRACK, |r, e, position| {
                    position.0 = r.read_uint(e)?;
                    Ok(())
                })
                .on(ids::CUE_CLUSTER_POSITION, |r, e, position| {
                    position.1 = r.read_uint(e)?;
                    Ok(())
                })
                .run(r, e, &mut position)?;
            cue.positions.push(position);
            Ok(())
        })
        .run(reader, element, &mut cue)?;

    for (track, cluster_position) in cue.positions {
        cues.push((track, CuePoint {
            time: cue.time,
            cluster_position,
        }));
    }

    Ok(())
}

/// Cue table for one track from the cue points of all tracks.
#[must_use]
pub fn cues_for_track(raw: &[(u64, CuePoint)], track: u64) -> CueTable {
    CueTable::new(
        raw.iter()
            .filter(|(number, _)| *number == track)
            .map(|(_, cue)| *cue)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cue_lookup_takes_last_cue_before_target() {
        let table = CueTable::new(vec![
            CuePoint {
                time: 2000,
                cluster_position: 0xC,
            },
            CuePoint {
                time: 0,
                cluster_position: 0xA,
            },
            CuePoint {
                time: 1000,
                cluster_position: 0xB,
            },
        ]);

        assert_eq!(table.lookup(1500).unwrap().cluster_position, 0xB);
        assert_eq!(table.lookup(1000).unwrap().cluster_position, 0xB);
        assert_eq!(table.lookup(0).unwrap().cluster_position, 0xA);
        assert_eq!(table.lookup(9999).unwrap().cluster_position, 0xC);
        assert_eq!(CueTable::default().lookup(5), None);
    }

    #[test]
    fn cues_are_split_by_track() {
        let raw = vec![
            (1, CuePoint {
                time: 10,
                cluster_position: 1,
            }),
            (2, CuePoint {
                time: 10,
                cluster_position: 2,
            }),
        ];

        let table = cues_for_track(&raw, 2);
        assert_eq!(table.lookup(10).unwrap().cluster_position, 2);
    }
}
