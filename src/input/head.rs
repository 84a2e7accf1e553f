use super::{metadata::TrackInfoProvider, SeekableStream};
use crate::error::{DemuxError, Result};
use std::io::{Read, Result as IoResult};

/// A stream which holds its first few bytes in memory, so that it can be
/// cheaply rewound to any position within them.
///
/// This is used during format detection: every probe begins by seeking to
/// offset `0`, which must not trigger a real seek (or reconnection) on the
/// underlying source. Reads beyond the head are passed through, repositioning
/// the inner stream as needed.
pub struct HeadStream<'a> {
    inner: &'a mut dyn SeekableStream,
    head: Vec<u8>,
    head_start: u64,
    position: u64,
}

impl<'a> HeadStream<'a> {
    /// Buffer up to `head_len` bytes from the current position of `inner`.
    ///
    /// The head is anchored to `inner`'s current position: positions reported by
    /// this stream remain absolute.
    pub fn new(inner: &'a mut dyn SeekableStream, head_len: usize) -> Result<Self> {
        let head_start = inner.position();
        let mut head = vec![0u8; head_len];
        let mut filled = 0;

        while filled < head_len {
            let read = inner.read(&mut head[filled..])?;
            if read == 0 {
                break;
            }
            filled += read;
        }

        head.truncate(filled);

        Ok(Self {
            inner,
            head,
            head_start,
            position: head_start,
        })
    }

    /// The buffered bytes at the start of this stream.
    #[must_use]
    pub fn head(&self) -> &[u8] {
        &self.head
    }

    fn head_end(&self) -> u64 {
        self.head_start + self.head.len() as u64
    }
}

impl Read for HeadStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.position < self.head_end() {
            let offset = (self.position - self.head_start) as usize;
            let available = &self.head[offset..];
            let len = available.len().min(buf.len());

            buf[..len].copy_from_slice(&available[..len]);
            self.position += len as u64;

            return Ok(len);
        }

        if self.inner.position() != self.position {
            self.inner.seek(self.position)?;
        }

        let read = self.inner.read(buf)?;
        self.position += read as u64;

        Ok(read)
    }
}

impl SeekableStream for HeadStream<'_> {
    fn position(&self) -> u64 {
        self.position
    }

    fn content_length(&self) -> Option<u64> {
        self.inner.content_length()
    }

    fn can_seek_hard(&self) -> bool {
        self.inner.can_seek_hard()
    }

    fn max_skip_distance(&self) -> u64 {
        self.inner.max_skip_distance()
    }

    fn seek_hard(&mut self, position: u64) -> Result<()> {
        // Inner repositioning is deferred until a read leaves the head.
        self.position = position;
        Ok(())
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        if position < self.head_start {
            return Err(DemuxError::Unseekable);
        }

        self.position = position;
        Ok(())
    }

    fn track_info_providers(&self) -> Vec<&dyn TrackInfoProvider> {
        self.inner.track_info_providers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{input::SourceStream, Config};
    use std::io::Cursor;
    use symphonia_core::io::ReadOnlySource;

    #[test]
    fn rewinds_within_head_and_reads_past_it() {
        let cfg = Config::default();
        let data: Vec<u8> = (0..100u8).collect();
        let mut source = SourceStream::from_memory(data, &cfg);
        let mut head = HeadStream::new(&mut source, 16).unwrap();

        let mut buf = [0u8; 32];
        head.read_exact(&mut buf).unwrap();
        assert_eq!(buf[31], 31);

        head.seek(0).unwrap();
        let mut b = [0u8; 1];
        head.read_exact(&mut b).unwrap();
        assert_eq!(b[0], 0);

        head.seek(15).unwrap();
        let mut two = [0u8; 2];
        head.read_exact(&mut two).unwrap();
        assert_eq!(two, [15, 16]);
        assert_eq!(head.position(), 17);
    }

    #[test]
    fn short_sources_fit_in_head() {
        let cfg = Config::default();
        let mut source = SourceStream::from_memory(vec![1, 2, 3], &cfg);
        let mut head = HeadStream::new(&mut source, 1024).unwrap();

        assert_eq!(head.head(), &[1, 2, 3]);
        let mut rest = Vec::new();
        head.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, vec![1, 2, 3]);
    }

    #[test]
    fn boxed_head_rewinds_over_unseekable_source() {
        let cfg = Config::default();
        let data: Vec<u8> = (0..64u8).collect();
        let mut source = SourceStream::new(ReadOnlySource::new(Cursor::new(data)), &cfg);
        let mut boxed = Box::new(HeadStream::new(&mut source, 16).unwrap());

        let mut buf = [0u8; 8];
        boxed.read_exact(&mut buf).unwrap();

        <Box<HeadStream<'_>> as SeekableStream>::seek(&mut boxed, 2).unwrap();
        let mut b = [0u8; 1];
        boxed.read_exact(&mut b).unwrap();
        assert_eq!(b[0], 2);

        <Box<HeadStream<'_>> as SeekableStream>::skip_fully(&mut boxed, 3).unwrap();
        assert_eq!(boxed.position(), 6);
    }
}
