//! Movie fragments (`moof`) and the segment index (`sidx`) used to seek between them.

use super::{
    boxes::{Mp4Box, Mp4Reader},
    movie::TrackDefaults,
};
use crate::{
    error::{DemuxError, Result},
    tree::TreeWalk,
};
use byteorder::{BigEndian, ReadBytesExt};
use std::convert::TryFrom;
use tracing::trace;

const TFHD_BASE_DATA_OFFSET: u32 = 0x01;
const TFHD_SAMPLE_DESCRIPTION_INDEX: u32 = 0x02;
const TFHD_DEFAULT_DURATION: u32 = 0x08;
const TFHD_DEFAULT_SIZE: u32 = 0x10;
const TFHD_DEFAULT_FLAGS: u32 = 0x20;

const TRUN_DATA_OFFSET: u32 = 0x01;
const TRUN_FIRST_SAMPLE_FLAGS: u32 = 0x04;
const TRUN_DURATION: u32 = 0x100;
const TRUN_SIZE: u32 = 0x200;
const TRUN_FLAGS: u32 = 0x400;
const TRUN_COMPOSITION_OFFSET: u32 = 0x800;

/// Upper bound on the samples of one track in a single `moof`.
const MAX_FRAGMENT_SAMPLES: usize = 1 << 20;

/// A subsegment listed in a `sidx` box.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IndexedSegment {
    /// Offset of the subsegment's first box.
    pub offset: u64,
    /// Presentation time of the subsegment's start, in index timescale units.
    pub time: u64,
}

/// The fragments of a file, from its first top-level `sidx` box.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SegmentIndex {
    /// Units per second of segment times.
    pub timescale: u32,
    /// Subsegments in file order.
    pub segments: Vec<IndexedSegment>,
    /// Total duration of all subsegments, in timescale units.
    pub duration: u64,
}

impl SegmentIndex {
    /// Reads a `sidx` box, accumulating its relative sizes and durations.
    pub fn read(reader: &mut Mp4Reader<'_>, sidx: &Mp4Box) -> Result<Self> {
        let (version, _) = reader.version_and_flags()?;
        let stream = reader.stream();

        let _reference_id = stream.read_u32::<BigEndian>()?;
        let timescale = stream.read_u32::<BigEndian>()?;

        let (earliest, first_offset) = if version == 0 {
            (
                u64::from(stream.read_u32::<BigEndian>()?),
                u64::from(stream.read_u32::<BigEndian>()?),
            )
        } else {
            (
                stream.read_u64::<BigEndian>()?,
                stream.read_u64::<BigEndian>()?,
            )
        };

        let _reserved = stream.read_u16::<BigEndian>()?;
        let count = stream.read_u16::<BigEndian>()?;
        reader.check_entries(sidx, u32::from(count), 12)?;

        let end = sidx
            .end
            .ok_or_else(|| DemuxError::malformed("sidx box of unknown size"))?;

        let mut offset = end
            .checked_add(first_offset)
            .ok_or_else(|| DemuxError::malformed("sidx offset out of range"))?;
        let mut time = earliest;
        let mut segments = Vec::with_capacity(usize::from(count));

        for _ in 0..count {
            let stream = reader.stream();
            let reference = stream.read_u32::<BigEndian>()?;
            let duration = stream.read_u32::<BigEndian>()?;
            let _sap = stream.read_u32::<BigEndian>()?;

            segments.push(IndexedSegment { offset, time });

            offset = offset
                .checked_add(u64::from(reference & 0x7FFF_FFFF))
                .ok_or_else(|| DemuxError::malformed("sidx offset out of range"))?;
            time = time
                .checked_add(u64::from(duration))
                .ok_or_else(|| DemuxError::malformed("sidx duration out of range"))?;
        }

        trace!("sidx lists {} segments at timescale {}.", segments.len(), timescale);

        Ok(Self {
            timescale,
            segments,
            duration: time - earliest,
        })
    }

    /// The last segment starting at or before `time`, or the first segment.
    #[must_use]
    pub fn lookup(&self, time: u64) -> Option<IndexedSegment> {
        let index = self.segments.partition_point(|segment| segment.time <= time);
        self.segments.get(index.saturating_sub(1)).copied()
    }
}

/// Location and duration of one sample in a fragment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FragmentSample {
    /// Offset of the sample data in the file.
    pub offset: u64,
    /// Size of the sample data.
    pub size: u32,
    /// Duration, in media timescale units.
    pub duration: u32,
}

/// The samples of one track within a `moof`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Fragment {
    /// Decode time of the first sample, from `tfdt`.
    pub base_time: Option<u64>,
    /// Samples in decoding order.
    pub samples: Vec<FragmentSample>,
}

struct FragmentState {
    moof_offset: u64,
    track_id: u32,
    defaults: TrackDefaults,
    fragment: Fragment,

    // Per-traf state.
    matches: bool,
    base_offset: u64,
    default_duration: u32,
    default_size: u32,
    next_offset: Option<u64>,
}

impl Fragment {
    /// Reads the samples of `track_id` from a `moof` box.
    pub fn read(
        reader: &mut Mp4Reader<'_>,
        moof: &Mp4Box,
        track_id: u32,
        defaults: TrackDefaults,
    ) -> Result<Self> {
        let mut state = FragmentState {
            moof_offset: moof.offset,
            track_id,
            defaults,
            fragment: Fragment::default(),
            matches: false,
            base_offset: moof.offset,
            default_duration: defaults.duration,
            default_size: defaults.size,
            next_offset: None,
        };

        TreeWalk::<Mp4Reader<'_>, FragmentState>::new()
            .on(*b"traf", |r, b, state| {
                state.matches = false;
                state.next_offset = None;

                TreeWalk::<Mp4Reader<'_>, FragmentState>::new()
                    .on(*b"tfhd", read_tfhd)
                    .on(*b"tfdt", |r, _, state| {
                        let (version, _) = r.version_and_flags()?;
                        let time = if version == 1 {
                            r.stream().read_u64::<BigEndian>()?
                        } else {
                            u64::from(r.stream().read_u32::<BigEndian>()?)
                        };
                        if state.matches {
                            state.fragment.base_time = Some(time);
                        }
                        Ok(())
                    })
                    .on(*b"trun", read_trun)
                    .run(r, b, state)?;
                Ok(())
            })
            .run(reader, moof, &mut state)?;

        Ok(state.fragment)
    }
}

fn read_tfhd(
    reader: &mut Mp4Reader<'_>,
    _tfhd: &Mp4Box,
    state: &mut FragmentState,
) -> Result<()> {
    let (_, flags) = reader.version_and_flags()?;
    let stream = reader.stream();

    let track_id = stream.read_u32::<BigEndian>()?;
    state.matches = track_id == state.track_id;
    state.base_offset = state.moof_offset;
    state.default_duration = state.defaults.duration;
    state.default_size = state.defaults.size;

    if flags & TFHD_BASE_DATA_OFFSET != 0 {
        state.base_offset = stream.read_u64::<BigEndian>()?;
    }
    if flags & TFHD_SAMPLE_DESCRIPTION_INDEX != 0 {
        stream.read_u32::<BigEndian>()?;
    }
    if flags & TFHD_DEFAULT_DURATION != 0 {
        state.default_duration = stream.read_u32::<BigEndian>()?;
    }
    if flags & TFHD_DEFAULT_SIZE != 0 {
        state.default_size = stream.read_u32::<BigEndian>()?;
    }
    if flags & TFHD_DEFAULT_FLAGS != 0 {
        stream.read_u32::<BigEndian>()?;
    }

    Ok(())
}

fn read_trun(
    reader: &mut Mp4Reader<'_>,
    trun: &Mp4Box,
    state: &mut FragmentState,
) -> Result<()> {
    if !state.matches {
        return Ok(());
    }

    let (_, flags) = reader.version_and_flags()?;
    let count = reader.stream().read_u32::<BigEndian>()?;

    let mut offset = state.next_offset.unwrap_or(state.base_offset);
    if flags & TRUN_DATA_OFFSET != 0 {
        let relative = i64::from(reader.stream().read_i32::<BigEndian>()?);
        offset = i64::try_from(state.base_offset)
            .ok()
            .and_then(|base| base.checked_add(relative))
            .and_then(|absolute| u64::try_from(absolute).ok())
            .ok_or_else(|| DemuxError::malformed("trun data offset out of range"))?;
    }
    if flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
        reader.stream().read_u32::<BigEndian>()?;
    }

    let per_sample = [TRUN_DURATION, TRUN_SIZE, TRUN_FLAGS, TRUN_COMPOSITION_OFFSET]
        .iter()
        .filter(|&&flag| flags & flag != 0)
        .count() as u64
        * 4;
    reader.check_entries(trun, count, per_sample)?;

    if state.fragment.samples.len().saturating_add(count as usize) > MAX_FRAGMENT_SAMPLES {
        return Err(DemuxError::malformed("trun declares too many samples"));
    }

    for _ in 0..count {
        let stream = reader.stream();

        let duration = if flags & TRUN_DURATION != 0 {
            stream.read_u32::<BigEndian>()?
        } else {
            state.default_duration
        };
        let size = if flags & TRUN_SIZE != 0 {
            stream.read_u32::<BigEndian>()?
        } else {
            state.default_size
        };
        if flags & TRUN_FLAGS != 0 {
            stream.read_u32::<BigEndian>()?;
        }
        if flags & TRUN_COMPOSITION_OFFSET != 0 {
            stream.read_u32::<BigEndian>()?;
        }

        state.fragment.samples.push(FragmentSample {
            offset,
            size,
            duration,
        });
        offset = offset
            .checked_add(u64::from(size))
            .ok_or_else(|| DemuxError::malformed("trun sample offset out of range"))?;
    }

    state.next_offset = Some(offset);

    Ok(())
}
