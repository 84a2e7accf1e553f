use super::movie::SampleTables;
use crate::error::{DemuxError, Result};

/// One chunk of consecutive samples.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Chunk {
    /// Offset of the first sample in the file.
    pub offset: u64,
    /// Start time of the first sample, in media timescale units.
    pub start: u64,
    /// (size, duration) of each sample, in order.
    pub samples: Vec<(u32, u32)>,
}

impl Chunk {
    /// Time just after the last sample, in media timescale units.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.start + self.samples.iter().map(|&(_, d)| u64::from(d)).sum::<u64>()
    }
}

/// Sample locations and times of a non-fragmented track, grouped by chunk.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ChunkTable {
    chunks: Vec<Chunk>,
}

/// Walks `stts` runs one sample at a time.
struct Durations<'a> {
    runs: &'a [(u32, u32)],
    left: u32,
}

impl Durations<'_> {
    fn next_duration(&mut self) -> u32 {
        while self.left == 0 {
            match self.runs.split_first() {
                Some((&(count, _), rest)) if count == 0 => self.runs = rest,
                Some((&(count, _), _)) => self.left = count,
                // Samples past the end of the table reuse its final duration.
                None => return 0,
            }
        }

        self.left -= 1;
        let duration = self.runs[0].1;
        if self.left == 0 {
            self.runs = &self.runs[1..];
        }
        duration
    }
}

impl ChunkTable {
    /// Expands the run-length coded sample tables into one entry per chunk.
    pub fn build(tables: &SampleTables) -> Result<Self> {
        let chunk_count = tables.chunk_offsets.len();
        let mut counts = vec![0u32; chunk_count];

        for (i, run) in tables.chunk_runs.iter().enumerate() {
            if run.first_chunk == 0 {
                return Err(DemuxError::malformed("stsc chunk indices start at 1"));
            }

            let first = run.first_chunk as usize - 1;
            let next = tables
                .chunk_runs
                .get(i + 1)
                .map_or(chunk_count, |r| (r.first_chunk as usize).saturating_sub(1));

            for count in counts.iter_mut().take(next.min(chunk_count)).skip(first) {
                *count = run.samples_per_chunk;
            }
        }

        let mut durations = Durations {
            runs: &tables.durations,
            left: 0,
        };
        let last_duration = tables.durations.last().map_or(0, |&(_, d)| d);

        let mut chunks = Vec::with_capacity(chunk_count);
        let mut sample = 0usize;
        let mut time = 0u64;

        for (&offset, &count) in tables.chunk_offsets.iter().zip(&counts) {
            if sample as u64 + u64::from(count) > u64::from(tables.sample_count) {
                return Err(DemuxError::malformed("stsc refers to more samples than stsz"));
            }

            let mut samples = Vec::with_capacity(count as usize);

            for _ in 0..count {
                let size = if tables.fixed_size != 0 {
                    tables.fixed_size
                } else {
                    *tables.sizes.get(sample).ok_or_else(|| {
                        DemuxError::malformed("stsc refers to more samples than stsz")
                    })?
                };

                let duration = match durations.next_duration() {
                    0 => last_duration,
                    d => d,
                };

                samples.push((size, duration));
                sample += 1;
            }

            let chunk = Chunk {
                offset,
                start: time,
                samples,
            };
            time = chunk.end();
            chunks.push(chunk);
        }

        Ok(Self { chunks })
    }

    /// All chunks, in decoding order.
    #[must_use]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Total duration, in media timescale units.
    #[must_use]
    pub fn duration(&self) -> u64 {
        self.chunks.last().map_or(0, Chunk::end)
    }

    /// Index of the chunk containing `time`, or the last chunk if `time` is past the end.
    #[must_use]
    pub fn chunk_for_time(&self, time: u64) -> usize {
        self.chunks
            .iter()
            .position(|chunk| chunk.end() > time)
            .unwrap_or_else(|| self.chunks.len().saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::mp4::movie::ChunkRun;

    fn tables() -> SampleTables {
        SampleTables {
            durations: vec![(3, 1024), (2, 512)],
            chunk_runs: vec![
                ChunkRun {
                    first_chunk: 1,
                    samples_per_chunk: 2,
                },
                ChunkRun {
                    first_chunk: 3,
                    samples_per_chunk: 1,
                },
            ],
            fixed_size: 0,
            sample_count: 5,
            sizes: vec![10, 11, 12, 13, 14],
            chunk_offsets: vec![100, 200, 300],
        }
    }

    #[test]
    fn chunk_runs_expand_per_chunk() {
        let table = ChunkTable::build(&tables()).unwrap();

        let counts: Vec<_> = table.chunks().iter().map(|c| c.samples.len()).collect();
        assert_eq!(counts, vec![2, 2, 1]);

        let starts: Vec<_> = table.chunks().iter().map(|c| c.start).collect();
        assert_eq!(starts, vec![0, 2048, 3584]);
        assert!(starts.windows(2).all(|w| w[0] <= w[1]));

        assert_eq!(table.chunks()[1].samples, vec![(12, 1024), (13, 512)]);
        assert_eq!(table.duration(), 4096);
    }

    #[test]
    fn chunk_lookup_by_time() {
        let table = ChunkTable::build(&tables()).unwrap();

        assert_eq!(table.chunk_for_time(0), 0);
        assert_eq!(table.chunk_for_time(2047), 0);
        assert_eq!(table.chunk_for_time(2048), 1);
        assert_eq!(table.chunk_for_time(99_999), 2);
    }

    #[test]
    fn missing_sizes_are_malformed() {
        let mut short = tables();
        short.sizes.truncate(3);

        assert!(ChunkTable::build(&short).is_err());
    }

    #[test]
    fn fixed_sizes_and_short_durations() {
        let mut fixed = tables();
        fixed.fixed_size = 7;
        fixed.sizes.clear();
        fixed.durations = vec![(1, 100)];

        let table = ChunkTable::build(&fixed).unwrap();
        assert_eq!(table.chunks()[2].samples, vec![(7, 100)]);
        assert_eq!(table.duration(), 500);
    }

    #[test]
    fn fixed_size_runs_beyond_sample_count_are_malformed() {
        let mut fixed = tables();
        fixed.fixed_size = 100;
        fixed.sizes.clear();
        fixed.sample_count = 2;
        fixed.chunk_runs = vec![ChunkRun {
            first_chunk: 1,
            samples_per_chunk: 5_000_000,
        }];

        assert!(matches!(
            ChunkTable::build(&fixed),
            Err(DemuxError::Malformed(_))
        ));
    }
}
