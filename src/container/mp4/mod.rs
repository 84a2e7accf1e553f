//! MP4 (ISO base media) files, standard and fragmented.
//!
//! Standard files index every sample up front in the `moov` box, so
//! seeking jumps straight to the chunk holding the target. Fragmented files
//! describe their samples in a `moof` box ahead of each fragment; these seek
//! by whole segments, using the file's `sidx` index, and are unseekable
//! without one.

mod boxes;
mod fragment;
mod movie;
mod sample_table;

pub use self::{
    boxes::{BoxType, Mp4Box, Mp4Reader},
    fragment::{Fragment, FragmentSample, IndexedSegment, SegmentIndex},
    movie::{ChunkRun, Mp4Movie, Mp4Track, SampleEntry, SampleTables, TrackDefaults},
    sample_table::{Chunk, ChunkTable},
};

use super::{
    util::{check_next_bytes, ms_to_samples, read_vec, samples_to_ms},
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
    tree::TreeReader,
    Config,
};
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Picks the track to play: the first sound track, which must have a supported codec.
fn select_track(movie: &Mp4Movie, id: Option<u32>) -> Result<(&Mp4Track, AudioFormat)> {
    let track = movie
        .tracks
        .iter()
        .filter(|t| t.is_audio())
        .find(|t| id.map_or(true, |id| t.id == id))
        .ok_or_else(|| DemuxError::Unsupported("no audio track in MP4 file".into()))?;

    match &track.entry {
        Some(SampleEntry::Supported {
            codec,
            sample_rate,
            channels,
        }) => Ok((
            track,
            AudioFormat::new(codec.clone(), *sample_rate, *channels),
        )),
        Some(SampleEntry::Unsupported(reason)) => Err(DemuxError::Unsupported(reason.clone())),
        None => Err(DemuxError::malformed("MP4 audio track has no sample description")),
    }
}

/// Length of `track` in milliseconds, if it can be found.
fn track_length_ms(movie: &Mp4Movie, track: &Mp4Track) -> Option<u64> {
    if track.duration > 0 && track.timescale > 0 {
        return Some(samples_to_ms(track.duration, u64::from(track.timescale)));
    }

    movie
        .segment_index
        .as_ref()
        .filter(|index| index.timescale > 0 && index.duration > 0)
        .map(|index| samples_to_ms(index.duration, u64::from(index.timescale)))
}

/// Detection support for MP4 files.
#[derive(Clone, Copy, Debug, Default)]
pub struct Mp4Probe;

impl ContainerProbe for Mp4Probe {
    fn name(&self) -> &'static str {
        "mp4"
    }

    fn matches_hints(&self, hints: &Hints) -> bool {
        hints.matches(&["audio/mp4", "audio/m4a", "audio/x-m4a", "video/mp4"], &[
            "mp4", "m4a", "m4b", "m4v", "mov",
        ])
    }

    fn probe(
        &self,
        reference: &AudioReference,
        stream: &mut dyn SeekableStream,
        _config: &Config,
    ) -> Result<Option<ProbeMatch>> {
        if !check_next_bytes(stream, signatures::MP4)? {
            return Ok(None);
        }

        stream.seek(0)?;

        let movie = Mp4Movie::read(&mut Mp4Reader::new(stream))?;

        let (track, _) = match select_track(&movie, None) {
            Ok(selected) => selected,
            Err(DemuxError::Unsupported(reason)) => {
                return Ok(Some(ProbeMatch::Unsupported(reason)));
            },
            Err(e) => return Err(e),
        };

        let mut builder = TrackInfoBuilder::for_stream(reference, stream);
        builder
            .set_title(movie.title.clone())
            .set_author(movie.artist.clone())
            .set_length_ms(track_length_ms(&movie, track));

        Ok(Some(ProbeMatch::Supported {
            settings: track.id.to_string(),
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
        let movie = Mp4Movie::read(&mut Mp4Reader::new(&mut *stream))?;
        let (track, format) = select_track(&movie, settings.parse().ok())?;

        if movie.fragmented {
            let track_id = track.id;
            let timescale = track.timescale;
            let defaults = track.defaults;

            Ok(Box::new(FragmentedProvider {
                start: movie.stopped_at.filter(|b| b.data_offset == stream.position()),
                stream,
                format,
                track_id,
                timescale,
                defaults,
                index: movie.segment_index,
                samples: VecDeque::new(),
                time: 0,
            }))
        } else {
            let table = ChunkTable::build(&track.tables)?;
            let timescale = track.timescale;

            Ok(Box::new(StandardProvider {
                stream,
                format,
                table,
                timescale,
                chunk: 0,
                sample: 0,
            }))
        }
    }
}

/// Reads samples of a non-fragmented track, chunk by chunk.
pub struct StandardProvider {
    stream: Box<dyn SeekableStream>,
    format: AudioFormat,
    table: ChunkTable,
    timescale: u32,
    chunk: usize,
    sample: usize,
}

impl FrameProvider for StandardProvider {
    fn format(&self) -> &AudioFormat {
        &self.format
    }

    fn is_seekable(&self) -> bool {
        self.stream.can_seek_hard()
    }

    fn provide_frames(&mut self, sink: &mut dyn PacketSink) -> Result<()> {
        while let Some(chunk) = self.table.chunks().get(self.chunk) {
            let mut offset = chunk.offset;
            let mut time = chunk.start;

            for &(size, duration) in &chunk.samples[..self.sample] {
                offset += u64::from(size);
                time += u64::from(duration);
            }

            for &(size, duration) in &chunk.samples[self.sample..] {
                self.stream.seek(offset)?;
                let data = read_vec(&mut *self.stream, u64::from(size))?;

                sink.push(Packet::encoded(
                    samples_to_ms(time, u64::from(self.timescale)),
                    data,
                ))?;

                offset += u64::from(size);
                time += u64::from(duration);
                self.sample += 1;
            }

            self.chunk += 1;
            self.sample = 0;
        }

        Ok(())
    }

    fn seek_to_timecode(&mut self, timecode: u64) -> Result<u64> {
        if !self.stream.can_seek_hard() {
            return Err(DemuxError::Unseekable);
        }

        let target = ms_to_samples(timecode, u64::from(self.timescale));
        let chunk = self.table.chunk_for_time(target);

        let start = self
            .table
            .chunks()
            .get(chunk)
            .map_or(0, |chunk| chunk.start);

        trace!("MP4 seek to {}ms lands on chunk {}.", timecode, chunk);

        self.chunk = chunk;
        self.sample = 0;

        Ok(samples_to_ms(start, u64::from(self.timescale)))
    }
}

/// Reads samples of one track from a sequence of movie fragments.
pub struct FragmentedProvider {
    stream: Box<dyn SeekableStream>,
    format: AudioFormat,
    track_id: u32,
    timescale: u32,
    defaults: TrackDefaults,
    index: Option<SegmentIndex>,
    /// Top-level box whose header has already been read.
    start: Option<Mp4Box>,
    /// Samples of the last `moof`, not yet read from the following `mdat`.
    samples: VecDeque<FragmentSample>,
    time: u64,
}

impl FrameProvider for FragmentedProvider {
    fn format(&self) -> &AudioFormat {
        &self.format
    }

    fn is_seekable(&self) -> bool {
        self.index.is_some() && self.stream.can_seek_hard()
    }

    fn provide_frames(&mut self, sink: &mut dyn PacketSink) -> Result<()> {
        let mut reader = Mp4Reader::new(&mut *self.stream);

        loop {
            let current = match self.start.take() {
                Some(current) => current,
                None => match reader.read_box(None)? {
                    Some(current) => current,
                    None => return Ok(()),
                },
            };

            match &current.kind {
                b"moof" => {
                    let fragment =
                        Fragment::read(&mut reader, &current, self.track_id, self.defaults)?;

                    if let Some(base) = fragment.base_time {
                        self.time = base;
                    }
                    let mut samples = fragment.samples;
                    samples.sort_by_key(|sample| sample.offset);
                    self.samples = samples.into();

                    trace!("Fragment with {} samples at {}.", self.samples.len(), self.time);
                },
                b"mdat" => {
                    let end = current.end.unwrap_or(u64::MAX);

                    while let Some(sample) = self.samples.front().copied() {
                        if sample.offset < current.data_offset
                            || sample.offset + u64::from(sample.size) > end
                        {
                            break;
                        }

                        reader.stream().seek(sample.offset)?;
                        let data = read_vec(reader.stream(), u64::from(sample.size))?;
                        let timecode = samples_to_ms(self.time, u64::from(self.timescale));

                        sink.push(Packet::encoded(timecode, data))?;

                        self.time += u64::from(sample.duration);
                        self.samples.pop_front();
                    }

                    if current.end.is_none() {
                        return Ok(());
                    }
                },
                _ => {},
            }

            reader.skip(&current)?;
        }
    }

    fn seek_to_timecode(&mut self, timecode: u64) -> Result<u64> {
        let index = match &self.index {
            Some(index) if self.stream.can_seek_hard() => index,
            _ => return Err(DemuxError::Unseekable),
        };

        let index_rate = u64::from(index.timescale);
        let segment = index
            .lookup(ms_to_samples(timecode, index_rate))
            .ok_or(DemuxError::Unseekable)?;

        debug!("Fragmented MP4 seek to {}ms lands at segment {:?}.", timecode, segment);

        self.stream.seek(segment.offset)?;
        self.start = None;
        self.samples.clear();
        // Fragments without tfdt continue from the segment's start.
        self.time = if index_rate == 0 {
            0
        } else {
            (u128::from(segment.time) * u128::from(self.timescale) / u128::from(index_rate)) as u64
        };

        Ok(samples_to_ms(segment.time, index_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        input::SourceStream,
        test_utils,
        tracks::{Codec, PacketData},
    };

    fn memory(bytes: Vec<u8>) -> Box<dyn SeekableStream> {
        Box::new(SourceStream::from_memory(bytes, &Config::default()))
    }

    fn probe(bytes: Vec<u8>) -> ProbeMatch {
        let mut stream = memory(bytes);
        Mp4Probe
            .probe(&AudioReference::new("x.m4a", None), &mut *stream, &Config::default())
            .unwrap()
            .unwrap()
    }

    fn provider(bytes: Vec<u8>) -> Box<dyn FrameProvider> {
        let track_info = TrackInfoBuilder::new().build();
        Mp4Probe
            .create_provider("", &track_info, memory(bytes), &Config::default())
            .unwrap()
    }

    fn packets(provider: &mut dyn FrameProvider) -> Vec<Packet> {
        let mut packets = vec![];
        provider.provide_frames(&mut packets).unwrap();
        packets
    }

    #[test]
    fn standard_file_probe_and_packets() {
        let file = test_utils::mp4_aac_file(&test_utils::Mp4Samples {
            timescale: 1000,
            durations: vec![250; 8],
            samples_per_chunk: 3,
            title: Some("Boxed Song"),
            artist: Some("Box Band"),
        });

        match probe(file.clone()) {
            ProbeMatch::Supported {
                settings,
                track_info,
            } => {
                assert_eq!(settings, "1");
                assert_eq!(track_info.title, "Boxed Song");
                assert_eq!(track_info.author, "Box Band");
                assert_eq!(track_info.length_ms(), Some(2000));
            },
            other => panic!("unexpected result {:?}", other),
        }

        let mut provider = provider(file);
        assert_eq!(provider.format().codec, Codec::Aac {
            decoder_config: vec![0x12, 0x10],
        });

        let packets = packets(&mut *provider);
        let timecodes: Vec<_> = packets.iter().map(|p| p.timecode).collect();
        assert_eq!(timecodes, vec![0, 250, 500, 750, 1000, 1250, 1500, 1750]);
        // Sample n holds n + 1 bytes of value n.
        assert_eq!(packets[4].data, PacketData::Encoded(vec![4; 5]));
    }

    #[test]
    fn standard_seek_lands_on_chunk_start() {
        let file = test_utils::mp4_aac_file(&test_utils::Mp4Samples {
            timescale: 1000,
            durations: vec![250; 8],
            samples_per_chunk: 3,
            title: None,
            artist: None,
        });
        let mut provider = provider(file);

        // Chunks start at 0, 750, and 1500ms.
        assert_eq!(provider.seek_to_timecode(1000).unwrap(), 750);
        let timecodes: Vec<_> = packets(&mut *provider).iter().map(|p| p.timecode).collect();
        assert_eq!(timecodes, vec![750, 1000, 1250, 1500, 1750]);

        assert_eq!(provider.seek_to_timecode(60_000).unwrap(), 1500);
    }

    #[test]
    fn fragmented_file_plays_and_seeks_by_segment() {
        let file = test_utils::fragmented_mp4_file(48_000, &[3, 2, 3], 1024, true);

        match probe(file.clone()) {
            ProbeMatch::Supported { track_info, .. } => {
                // 8 samples of 1024 at 48kHz.
                assert_eq!(track_info.length_ms(), Some(170));
            },
            other => panic!("unexpected result {:?}", other),
        }

        let mut provider = provider(file);
        assert!(provider.is_seekable());

        let all = packets(&mut *provider);
        assert_eq!(all.len(), 8);
        assert_eq!(all[3].timecode, 64);
        assert_eq!(all[3].data, PacketData::Encoded(vec![3; 4]));

        // The second segment starts at sample 3 (64ms).
        assert_eq!(provider.seek_to_timecode(100).unwrap(), 64);
        let after: Vec<_> = packets(&mut *provider).iter().map(|p| p.timecode).collect();
        assert_eq!(after, vec![64, 85, 106, 128, 149]);
    }

    #[test]
    fn fragmented_without_index_is_unseekable() {
        let file = test_utils::fragmented_mp4_file(48_000, &[2, 2], 1024, false);
        let mut provider = provider(file);

        assert!(!provider.is_seekable());
        assert!(matches!(
            provider.seek_to_timecode(10),
            Err(DemuxError::Unseekable)
        ));
        assert_eq!(packets(&mut *provider).len(), 4);
    }

    #[test]
    fn unsupported_codecs_are_reported() {
        let file = test_utils::mp4_file_with_entry(b"alac", &[]);
        assert!(matches!(probe(file), ProbeMatch::Unsupported(_)));
    }
}
