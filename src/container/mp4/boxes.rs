//! MP4 box headers, and reading of the box tree.

use crate::{
    container::util::read_vec,
    error::{DemuxError, Result},
    input::SeekableStream,
    tree::{TreeNode, TreeReader},
};
use byteorder::{BigEndian, ReadBytesExt};
use std::{fmt, io::ErrorKind as IoErrorKind};
use tracing::trace;

/// Four-character code identifying a box.
pub type BoxType = [u8; 4];

/// Cursor describing one box: header position and payload extent.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Mp4Box {
    /// Box type.
    pub kind: BoxType,
    /// Offset of the box header.
    pub offset: u64,
    /// Offset of the box payload.
    pub data_offset: u64,
    /// Offset of the byte following the box, if known.
    pub end: Option<u64>,
}

impl Mp4Box {
    /// A synthetic box spanning the whole stream, used as the root of a walk.
    #[must_use]
    pub fn root(end: Option<u64>) -> Self {
        Self {
            kind: *b"root",
            offset: 0,
            data_offset: 0,
            end,
        }
    }

    /// Payload length, if known.
    #[must_use]
    pub fn payload_len(&self) -> Option<u64> {
        self.end.map(|end| end.saturating_sub(self.data_offset))
    }
}

impl fmt::Debug for Mp4Box {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mp4Box")
            .field("kind", &String::from_utf8_lossy(&self.kind))
            .field("offset", &self.offset)
            .field("data_offset", &self.data_offset)
            .field("end", &self.end)
            .finish()
    }
}

impl TreeNode for Mp4Box {
    type Tag = BoxType;

    fn tag(&self) -> BoxType {
        self.kind
    }
}

/// Reads MP4 boxes from a stream.
pub struct Mp4Reader<'a> {
    stream: &'a mut dyn SeekableStream,
}

impl<'a> Mp4Reader<'a> {
    /// Wrap a stream positioned at a box header.
    pub fn new(stream: &'a mut dyn SeekableStream) -> Self {
        Self { stream }
    }

    /// The underlying stream.
    pub fn stream(&mut self) -> &mut dyn SeekableStream {
        &mut *self.stream
    }

    /// Current position of the underlying stream.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.stream.position()
    }

    /// Reads the header of a box which must end by `limit`, or `None` at the end of the stream.
    ///
    /// A box of size 0 extends to `limit`.
    pub fn read_box(&mut self, limit: Option<u64>) -> Result<Option<Mp4Box>> {
        let offset = self.stream.position();

        let size = match self.stream.read_u32::<BigEndian>() {
            Ok(size) => u64::from(size),
            Err(e) if e.kind() == IoErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut kind = [0u8; 4];
        self.stream.read_exact(&mut kind)?;

        let end = match size {
            0 => limit,
            1 => {
                let large = self.stream.read_u64::<BigEndian>()?;
                if large < 16 {
                    return Err(DemuxError::malformed("MP4 box too small for its header"));
                }
                Some(offset + large)
            },
            size if size < 8 => {
                return Err(DemuxError::malformed("MP4 box too small for its header"));
            },
            size => Some(offset + size),
        };

        if let (Some(end), Some(limit)) = (end, limit) {
            if end > limit {
                return Err(DemuxError::malformed_owned(format!(
                    "MP4 box {:?} overruns its parent",
                    String::from_utf8_lossy(&kind)
                )));
            }
        }

        let found = Mp4Box {
            kind,
            offset,
            data_offset: self.stream.position(),
            end,
        };

        trace!("{:?}", found);

        Ok(Some(found))
    }

    /// Reads the version and flags fields of a full box.
    pub fn version_and_flags(&mut self) -> Result<(u8, u32)> {
        let word = self.stream.read_u32::<BigEndian>()?;
        Ok(((word >> 24) as u8, word & 0x00FF_FFFF))
    }

    /// Bytes left in `parent` after the current position.
    #[must_use]
    pub fn remaining(&self, parent: &Mp4Box) -> Option<u64> {
        parent
            .end
            .map(|end| end.saturating_sub(self.stream.position()))
    }

    /// Reads the rest of `parent`'s payload.
    pub fn read_rest(&mut self, parent: &Mp4Box) -> Result<Vec<u8>> {
        let len = self
            .remaining(parent)
            .ok_or_else(|| DemuxError::malformed("cannot read a box of unknown size"))?;
        read_vec(&mut *self.stream, len)
    }

    /// Checks that `count` entries of `entry_len` bytes fit in the rest of `parent`.
    pub fn check_entries(&self, parent: &Mp4Box, count: u32, entry_len: u64) -> Result<()> {
        match self.remaining(parent) {
            Some(left) if u64::from(count) * entry_len > left => Err(DemuxError::malformed_owned(
                format!(
                    "MP4 box {:?} declares more entries than it holds",
                    String::from_utf8_lossy(&parent.kind)
                ),
            )),
            _ => Ok(()),
        }
    }
}

impl TreeReader for Mp4Reader<'_> {
    type Node = Mp4Box;

    fn next_child(&mut self, parent: &Mp4Box) -> Result<Option<Mp4Box>> {
        if let Some(end) = parent.end {
            if self.stream.position() + 8 > end {
                return Ok(None);
            }
        }

        self.read_box(parent.end)
    }

    fn skip(&mut self, node: &Mp4Box) -> Result<()> {
        match node.end {
            Some(end) => self.stream.seek(end),
            None => Err(DemuxError::malformed("cannot skip an MP4 box of unknown size")),
        }
    }
}
