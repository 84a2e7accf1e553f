use super::metadata::TrackInfoProvider;
use crate::{
    error::{DemuxError, Result},
    Config,
};
use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    io::{
        BufReader,
        Cursor,
        Error as IoError,
        ErrorKind as IoErrorKind,
        Read,
        Result as IoResult,
        Seek,
        SeekFrom,
    },
};
use symphonia_core::io::MediaSource;
use tracing::trace;

const SKIP_CHUNK_LEN: usize = 4096;
const SOURCE_BUFFER_LEN: usize = 1 << 15; // 32kb

/// A byte source with a known position, which may support seeking.
///
/// Implementors must track their position (in bytes from the start of the
/// resource) across every read and seek. Forward seeks are preferentially
/// performed by reading and discarding data when the distance is within
/// [`max_skip_distance`], as hard seeks may be expensive (i.e., force an HTTP
/// reconnection).
///
/// [`max_skip_distance`]: SeekableStream::max_skip_distance
pub trait SeekableStream: Read + Send {
    /// Current position of the stream, in bytes from the start.
    fn position(&self) -> u64;

    /// Total length of the stream, if known.
    fn content_length(&self) -> Option<u64>;

    /// Whether [`seek_hard`] is available on this stream.
    ///
    /// [`seek_hard`]: SeekableStream::seek_hard
    fn can_seek_hard(&self) -> bool;

    /// Largest forward distance which [`seek`] will cover by discarding data.
    ///
    /// [`seek`]: SeekableStream::seek
    fn max_skip_distance(&self) -> u64;

    /// Reposition the stream without reading intermediate data.
    fn seek_hard(&mut self, position: u64) -> Result<()>;

    /// Metadata sources embedded in the transport of this stream (e.g., ICY headers).
    fn track_info_providers(&self) -> Vec<&dyn TrackInfoProvider> {
        Vec::new()
    }

    /// Move to `position`, using a soft skip when it is close ahead, or a hard seek otherwise.
    fn seek(&mut self, position: u64) -> Result<()> {
        let current = self.position();

        if position == current {
            return Ok(());
        }

        if position > current && position - current <= self.max_skip_distance() {
            self.skip_fully(position - current)
        } else if self.can_seek_hard() {
            trace!("Hard seek from {} to {}.", current, position);
            self.seek_hard(position)
        } else if position > current {
            self.skip_fully(position - current)
        } else {
            Err(DemuxError::Unseekable)
        }
    }

    /// Read and discard exactly `count` bytes.
    fn skip_fully(&mut self, mut count: u64) -> Result<()> {
        let mut scratch = [0u8; SKIP_CHUNK_LEN];

        while count > 0 {
            let len = (count.min(SKIP_CHUNK_LEN as u64)) as usize;
            let read = self.read(&mut scratch[..len])?;

            if read == 0 {
                return Err(IoError::from(IoErrorKind::UnexpectedEof).into());
            }

            count -= read as u64;
        }

        Ok(())
    }

    /// Bytes left until the end of the stream, if its length is known.
    fn remaining(&self) -> Option<u64> {
        self.content_length()
            .map(|len| len.saturating_sub(self.position()))
    }
}

impl<S: SeekableStream + ?Sized> SeekableStream for Box<S> {
    fn position(&self) -> u64 {
        (**self).position()
    }

    fn content_length(&self) -> Option<u64> {
        (**self).content_length()
    }

    fn can_seek_hard(&self) -> bool {
        (**self).can_seek_hard()
    }

    fn max_skip_distance(&self) -> u64 {
        (**self).max_skip_distance()
    }

    fn seek_hard(&mut self, position: u64) -> Result<()> {
        (**self).seek_hard(position)
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        (**self).seek(position)
    }

    fn skip_fully(&mut self, count: u64) -> Result<()> {
        (**self).skip_fully(count)
    }

    fn track_info_providers(&self) -> Vec<&dyn TrackInfoProvider> {
        (**self).track_info_providers()
    }
}

impl<S: SeekableStream + ?Sized> SeekableStream for &mut S {
    fn position(&self) -> u64 {
        (**self).position()
    }

    fn content_length(&self) -> Option<u64> {
        (**self).content_length()
    }

    fn can_seek_hard(&self) -> bool {
        (**self).can_seek_hard()
    }

    fn max_skip_distance(&self) -> u64 {
        (**self).max_skip_distance()
    }

    fn seek_hard(&mut self, position: u64) -> Result<()> {
        (**self).seek_hard(position)
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        (**self).seek(position)
    }

    fn skip_fully(&mut self, count: u64) -> Result<()> {
        (**self).skip_fully(count)
    }

    fn track_info_providers(&self) -> Vec<&dyn TrackInfoProvider> {
        (**self).track_info_providers()
    }
}

/// A [`SeekableStream`] over any symphonia [`MediaSource`].
///
/// This covers local files, in-memory buffers, and any user-defined source
/// (e.g., an HTTP body). Reads are buffered internally.
pub struct SourceStream<S: MediaSource> {
    inner: BufReader<S>,
    position: u64,
    length: Option<u64>,
    seekable: bool,
    max_skip_distance: u64,
    providers: Vec<Box<dyn TrackInfoProvider>>,
}

impl<S: MediaSource> SourceStream<S> {
    /// Wrap a media source, using the soft-seek threshold from `config`.
    pub fn new(source: S, config: &Config) -> Self {
        let length = source.byte_len();
        let seekable = source.is_seekable();

        Self {
            inner: BufReader::with_capacity(SOURCE_BUFFER_LEN, source),
            position: 0,
            length,
            seekable,
            max_skip_distance: config.max_skip_distance,
            providers: Vec::new(),
        }
    }

    /// Attach a transport-level metadata source to this stream.
    #[must_use]
    pub fn with_provider(mut self, provider: impl TrackInfoProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// Consume this stream, returning the underlying source.
    pub fn into_inner(self) -> S {
        self.inner.into_inner()
    }
}

impl SourceStream<Cursor<Vec<u8>>> {
    /// A stream over an in-memory buffer.
    pub fn from_memory(buf: Vec<u8>, config: &Config) -> Self {
        Self::new(Cursor::new(buf), config)
    }
}

impl SourceStream<std::fs::File> {
    /// A stream over a local file.
    pub fn from_file(file: std::fs::File, config: &Config) -> Self {
        Self::new(file, config)
    }
}

impl<S: MediaSource> Read for SourceStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        let read = self.inner.read(buf)?;
        self.position += read as u64;
        Ok(read)
    }
}

impl<S: MediaSource> SeekableStream for SourceStream<S> {
    fn position(&self) -> u64 {
        self.position
    }

    fn content_length(&self) -> Option<u64> {
        self.length
    }

    fn can_seek_hard(&self) -> bool {
        self.seekable
    }

    fn max_skip_distance(&self) -> u64 {
        self.max_skip_distance
    }

    fn seek_hard(&mut self, position: u64) -> Result<()> {
        if !self.seekable {
            return Err(DemuxError::Unseekable);
        }

        self.position = self.inner.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    fn track_info_providers(&self) -> Vec<&dyn TrackInfoProvider> {
        self.providers
            .iter()
            .map(|provider| &**provider as &dyn TrackInfoProvider)
            .collect()
    }
}

impl<S: MediaSource> Debug for SourceStream<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("SourceStream")
            .field("position", &self.position)
            .field("length", &self.length)
            .field("seekable", &self.seekable)
            .field("max_skip_distance", &self.max_skip_distance)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia_core::io::ReadOnlySource;

    fn counting(len: usize) -> Vec<u8> {
        (0..len).map(|i| i as u8).collect()
    }

    #[test]
    fn soft_seek_forward_keeps_position() {
        let cfg = Config::default();
        let mut stream = SourceStream::from_memory(counting(300), &cfg);

        stream.seek(200).unwrap();
        assert_eq!(stream.position(), 200);

        let mut b = [0u8; 1];
        stream.read_exact(&mut b).unwrap();
        assert_eq!(b[0], 200);
    }

    #[test]
    fn backward_seek_uses_hard_seek() {
        let cfg = Config::default();
        let mut stream = SourceStream::from_memory(counting(300), &cfg);

        stream.skip_fully(250).unwrap();
        stream.seek(10).unwrap();

        let mut b = [0u8; 1];
        stream.read_exact(&mut b).unwrap();
        assert_eq!(b[0], 10);
        assert_eq!(stream.position(), 11);
    }

    #[test]
    fn unseekable_source_refuses_backward_seek() {
        let cfg = Config::default();
        let source = ReadOnlySource::new(Cursor::new(counting(64)));
        let mut stream = SourceStream::new(source, &cfg);

        stream.skip_fully(32).unwrap();
        assert!(matches!(stream.seek(0), Err(DemuxError::Unseekable)));
        assert!(stream.content_length().is_none());

        // Forward seeks beyond the skip threshold still work by discarding.
        let cfg = Config::default().max_skip_distance(4);
        let source = ReadOnlySource::new(Cursor::new(counting(64)));
        let mut stream = SourceStream::new(source, &cfg);
        stream.seek(40).unwrap();
        assert_eq!(stream.position(), 40);
    }

    #[test]
    fn skipping_past_end_is_eof() {
        let cfg = Config::default();
        let mut stream = SourceStream::from_memory(counting(8), &cfg);

        assert!(stream.skip_fully(9).unwrap_err().is_eof());
    }
}
