use crate::{
    error::{DemuxError, Result},
    input::SeekableStream,
};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::ErrorKind as IoErrorKind;

pub(crate) const PAGE_HEADER_LEN: usize = 27;

const FLAG_CONTINUED: u8 = 0x01;
const FLAG_FIRST: u8 = 0x02;
const FLAG_LAST: u8 = 0x04;

/// Granule value of pages on which no packet ends.
pub(crate) const NO_GRANULE: u64 = u64::MAX;

/// The fixed header and segment table of one OGG page.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PageHeader {
    /// Absolute offset of the page's `OggS` sync.
    pub offset: u64,
    /// Header flags (continued, first, last).
    pub flags: u8,
    /// Codec-defined position of the last packet completed on this page.
    pub granule: u64,
    /// Bitstream serial number.
    pub serial: u32,
    /// Page sequence number within its bitstream.
    pub sequence: u32,
    /// Page CRC, which is not verified.
    pub checksum: u32,
    /// Lacing values: one per segment.
    pub segments: Vec<u8>,
}

impl PageHeader {
    /// Reads the next page header, or `None` if the stream ends cleanly before it.
    pub fn read(stream: &mut dyn SeekableStream) -> Result<Option<Self>> {
        let offset = stream.position();
        let mut fixed = [0u8; PAGE_HEADER_LEN];

        match stream.read_exact(&mut fixed[..1]) {
            Ok(()) => {},
            Err(e) if e.kind() == IoErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        stream.read_exact(&mut fixed[1..])?;

        let header = Self::parse_fixed(&fixed, offset)
            .ok_or_else(|| DemuxError::malformed("invalid OGG page header"))?;

        let mut segments = vec![0u8; usize::from(fixed[26])];
        stream.read_exact(&mut segments)?;

        Ok(Some(Self { segments, ..header }))
    }

    /// Parses the fixed 27-byte header, leaving the segment table empty.
    pub(crate) fn parse_fixed(fixed: &[u8], offset: u64) -> Option<Self> {
        if fixed.len() < PAGE_HEADER_LEN || &fixed[..4] != b"OggS" || fixed[4] != 0 {
            return None;
        }

        let mut rest = &fixed[5..];

        Some(Self {
            offset,
            flags: rest.read_u8().ok()?,
            granule: rest.read_u64::<LittleEndian>().ok()?,
            serial: rest.read_u32::<LittleEndian>().ok()?,
            sequence: rest.read_u32::<LittleEndian>().ok()?,
            checksum: rest.read_u32::<LittleEndian>().ok()?,
            segments: Vec::new(),
        })
    }

    /// Whether the first packet on this page continues from the previous page.
    #[must_use]
    pub fn is_continued(&self) -> bool {
        self.flags & FLAG_CONTINUED != 0
    }

    /// Whether this is the first page of its bitstream.
    #[must_use]
    pub fn is_first(&self) -> bool {
        self.flags & FLAG_FIRST != 0
    }

    /// Whether this is the last page of its bitstream.
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.flags & FLAG_LAST != 0
    }

    /// Length of the header and segment table.
    #[must_use]
    pub fn header_len(&self) -> u64 {
        (PAGE_HEADER_LEN + self.segments.len()) as u64
    }

    /// Length of the page body.
    #[must_use]
    pub fn body_len(&self) -> u64 {
        self.segments.iter().map(|&s| u64::from(s)).sum()
    }

    /// Offset of the byte after this page.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.header_len() + self.body_len()
    }
}

/// A page found by raw scanning: enough to seek to it and to time it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PageMark {
    /// Absolute offset of the page.
    pub offset: u64,
    /// Granule position of the page.
    pub granule: u64,
    /// Bitstream serial number.
    pub serial: u32,
    /// Total length of the page.
    pub len: u64,
}

/// Finds every complete, plausible page in `buf` (which begins at `base` in the stream).
///
/// A candidate `OggS` sync is only accepted if its full segment table and
/// body lie within `buf`, which rules out most false syncs in packet data.
/// Also returns how many bytes of `buf` were consumed: any bytes after that
/// may hold the start of a page cut off by the end of the buffer.
pub fn scan_pages(buf: &[u8], base: u64) -> (Vec<PageMark>, usize) {
    let mut found = Vec::new();
    let mut i = 0;
    let mut truncated = None;

    while i + PAGE_HEADER_LEN <= buf.len() {
        match fit_page(&buf[i..]) {
            PageFit::Complete(len) => {
                found.push(PageMark {
                    offset: base + i as u64,
                    granule: LittleEndian::read_u64(&buf[i + 6..]),
                    serial: LittleEndian::read_u32(&buf[i + 14..]),
                    len: len as u64,
                });

                i += len;
                truncated = None;
            },
            PageFit::Truncated => {
                truncated.get_or_insert(i);
                i += 1;
            },
            PageFit::Invalid => i += 1,
        }
    }

    (found, truncated.unwrap_or(i))
}

enum PageFit {
    Complete(usize),
    Truncated,
    Invalid,
}

fn fit_page(buf: &[u8]) -> PageFit {
    if &buf[..4] != b"OggS" || buf[4] != 0 || buf[5] & !0x07 != 0 {
        return PageFit::Invalid;
    }

    let table_end = PAGE_HEADER_LEN + usize::from(buf[26]);
    let table = match buf.get(PAGE_HEADER_LEN..table_end) {
        Some(table) => table,
        None => return PageFit::Truncated,
    };

    let len = table_end + table.iter().map(|&s| usize::from(s)).sum::<usize>();

    if len <= buf.len() {
        PageFit::Complete(len)
    } else {
        PageFit::Truncated
    }
}
