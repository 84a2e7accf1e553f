//! ID3v2 tags, as found at the start of MP3 (and sometimes ADTS) streams.
//!
//! Only the title and artist text frames are decoded. Everything else,
//! including unsynchronised data, is skipped over.

use crate::{
    container::util::read_vec,
    error::{DemuxError, Result},
    input::{metadata::TrackInfoProvider, SeekableStream},
};
use byteorder::{BigEndian, ByteOrder};
use tracing::{debug, trace};

const HEADER_LEN: u64 = 10;
const FOOTER_LEN: u64 = 10;

const FLAG_EXTENDED_HEADER: u8 = 0x40;
const FLAG_FOOTER: u8 = 0x10;

const ENCODING_LATIN1: u8 = 0;
const ENCODING_UTF16: u8 = 1;
const ENCODING_UTF16BE: u8 = 2;
const ENCODING_UTF8: u8 = 3;

/// Which track field an allow-listed text frame fills.
#[derive(Clone, Copy)]
enum Field {
    Title,
    Artist,
}

fn field_for(id: &[u8]) -> Option<Field> {
    match id {
        b"TIT2" | b"TT2" => Some(Field::Title),
        b"TPE1" | b"TP1" => Some(Field::Artist),
        _ => None,
    }
}

/// Decodes a 7-bit-per-byte sync-safe integer.
fn sync_safe(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0, |acc, &b| (acc << 7) | u32::from(b & 0x7F))
}

/// The interesting contents of an ID3v2 tag.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Id3Tag {
    /// Major version (2, 3, or 4).
    pub version: u8,
    /// Total length of the tag, including header and footer.
    pub len: u64,
    /// `TIT2`/`TT2`.
    pub title: Option<String>,
    /// `TPE1`/`TP1`.
    pub artist: Option<String>,
}

/// Reads an ID3v2 tag at the current position of `stream`, if one is present.
///
/// The first three bytes are always consumed. Without a tag, they are returned
/// so that a frame scan can begin with them; otherwise the stream is left just
/// after the tag.
pub(crate) fn read_leading_tag(
    stream: &mut dyn SeekableStream,
) -> Result<(Option<Id3Tag>, Vec<u8>)> {
    let mut magic = [0u8; 3];
    stream.read_exact(&mut magic)?;

    if &magic == b"ID3" {
        Ok((Some(Id3Tag::read(stream)?), Vec::new()))
    } else {
        Ok((None, magic.to_vec()))
    }
}

impl Id3Tag {
    /// Reads a tag whose `ID3` magic has just been consumed, leaving the stream after the tag.
    pub fn read(stream: &mut dyn SeekableStream) -> Result<Self> {
        let start = stream.position() - 3;
        let mut header = [0u8; HEADER_LEN as usize - 3];
        stream.read_exact(&mut header)?;

        let version = header[0];
        let flags = header[2];
        let size = u64::from(sync_safe(&header[3..7]));

        let mut tag = Self {
            version,
            len: HEADER_LEN + size,
            ..Self::default()
        };

        if version == 4 && flags & FLAG_FOOTER != 0 {
            tag.len += FOOTER_LEN;
        }

        if !(2..=4).contains(&version) {
            debug!("Skipping ID3v2.{} tag of {} bytes.", version, tag.len);
            stream.seek(start + tag.len)?;
            return Ok(tag);
        }

        let body = read_vec(stream, size)?;
        let frames = if version >= 3 && flags & FLAG_EXTENDED_HEADER != 0 {
            skip_extended_header(&body, version)?
        } else {
            &body[..]
        };

        tag.read_frames(frames);
        stream.seek(start + tag.len)?;

        debug!("ID3v2.{} tag: {:?}.", version, tag);

        Ok(tag)
    }

    fn read_frames(&mut self, mut data: &[u8]) {
        let (id_len, header_len) = if self.version == 2 { (3, 6) } else { (4, 10) };

        while data.len() >= header_len {
            let id = &data[..id_len];

            // Padding.
            if id[0] == 0 {
                break;
            }

            let size = match self.version {
                2 => sync_safe(&data[3..6]),
                3 => BigEndian::read_u32(&data[4..8]),
                _ => sync_safe(&data[4..8]),
            } as usize;

            let body = match data.get(header_len..header_len + size) {
                Some(body) => body,
                None => {
                    trace!("ID3 frame {:?} overruns its tag.", String::from_utf8_lossy(id));
                    break;
                },
            };

            if let Some(field) = field_for(id) {
                let value = decode_text(body);
                trace!("ID3 frame {:?}: {:?}.", String::from_utf8_lossy(id), value);

                let slot = match field {
                    Field::Title => &mut self.title,
                    Field::Artist => &mut self.artist,
                };
                if slot.is_none() {
                    *slot = value;
                }
            }

            data = &data[header_len + size..];
        }
    }
}

fn skip_extended_header(body: &[u8], version: u8) -> Result<&[u8]> {
    if body.len() < 4 {
        return Err(DemuxError::malformed("truncated ID3 extended header"));
    }

    // v3 sizes exclude the size field itself; v4 sizes are sync-safe and include it.
    let skip = if version == 3 {
        BigEndian::read_u32(&body[..4]) as usize + 4
    } else {
        sync_safe(&body[..4]) as usize
    };

    body.get(skip..)
        .ok_or_else(|| DemuxError::malformed("ID3 extended header overruns its tag"))
}

/// Decodes the body of a text frame: an encoding byte, then the text.
///
/// Text ends at the first terminator of the encoding's unit size.
fn decode_text(body: &[u8]) -> Option<String> {
    let (&encoding, text) = body.split_first()?;

    let value = match encoding {
        ENCODING_LATIN1 => until_nul(text, 1).iter().map(|&b| char::from(b)).collect(),
        ENCODING_UTF8 => String::from_utf8_lossy(until_nul(text, 1)).into_owned(),
        ENCODING_UTF16 | ENCODING_UTF16BE => {
            let text = until_nul(text, 2);
            let (big_endian, text) = match text {
                [0xFF, 0xFE, rest @ ..] => (false, rest),
                [0xFE, 0xFF, rest @ ..] => (true, rest),
                // Without a BOM, both forms are big-endian.
                _ => (true, text),
            };

            let units: Vec<u16> = text
                .chunks_exact(2)
                .map(|unit| {
                    if big_endian {
                        BigEndian::read_u16(unit)
                    } else {
                        u16::from_le_bytes([unit[0], unit[1]])
                    }
                })
                .collect();

            String::from_utf16_lossy(&units)
        },
        _ => return None,
    };

    Some(value)
}

/// Cuts `text` at the first all-zero unit of `unit_len` bytes.
fn until_nul(text: &[u8], unit_len: usize) -> &[u8] {
    let end = text
        .chunks(unit_len)
        .position(|unit| unit.iter().all(|&b| b == 0))
        .map_or(text.len(), |units| units * unit_len);

    &text[..end]
}

impl TrackInfoProvider for Id3Tag {
    fn title(&self) -> Option<String> {
        self.title.clone()
    }

    fn author(&self) -> Option<String> {
        self.artist.clone()
    }
}
