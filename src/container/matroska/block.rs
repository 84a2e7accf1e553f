use super::ebml::{decode_vint, VarIntKind};
use crate::error::{DemuxError, Result};

const FLAG_KEYFRAME: u8 = 0x80;

/// How the frames of a block are packed together.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Lacing {
    /// A single frame.
    None,
    /// Sizes as runs of bytes summed until one is below 255.
    Xiph,
    /// Frames of equal size.
    Fixed,
    /// First size as an EBML integer, then signed differences.
    Ebml,
}

impl Lacing {
    fn from_flags(flags: u8) -> Self {
        match (flags >> 1) & 0b11 {
            0 => Self::None,
            1 => Self::Xiph,
            2 => Self::Fixed,
            _ => Self::Ebml,
        }
    }
}

/// A parsed `SimpleBlock` or `Block`, borrowing its frames from the element payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Block<'a> {
    /// Number of the track this block belongs to.
    pub track: u64,
    /// Timecode relative to the enclosing cluster, in timecode-scale units.
    pub relative_timecode: i16,
    /// Whether the block was flagged as a keyframe (`SimpleBlock` only).
    pub keyframe: bool,
    /// Frames held in the block.
    pub frames: Vec<&'a [u8]>,
}

impl<'a> Block<'a> {
    /// Parses a block payload, splitting any laced frames.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let (track, track_len) = decode_vint(data, VarIntKind::Unsigned)
            .ok_or_else(|| DemuxError::malformed("invalid block track number"))?;

        let header = data
            .get(track_len..track_len + 3)
            .ok_or_else(|| DemuxError::malformed("truncated block header"))?;

        let relative_timecode = i16::from_be_bytes([header[0], header[1]]);
        let flags = header[2];
        let body = &data[track_len + 3..];

        let frames = match Lacing::from_flags(flags) {
            Lacing::None => vec![body],
            lacing => split_laces(lacing, body)?,
        };

        Ok(Self {
            track: track as u64,
            relative_timecode,
            keyframe: flags & FLAG_KEYFRAME != 0,
            frames,
        })
    }
}

pub(crate) fn split_laces(lacing: Lacing, body: &[u8]) -> Result<Vec<&[u8]>> {
    let (&count_minus_one, mut rest) = body
        .split_first()
        .ok_or_else(|| DemuxError::malformed("laced block without frame count"))?;

    let count = usize::from(count_minus_one) + 1;
    let mut sizes = Vec::with_capacity(count);

    match lacing {
        Lacing::Xiph => {
            for _ in 1..count {
                let mut size = 0usize;
                loop {
                    let (&b, tail) = rest
                        .split_first()
                        .ok_or_else(|| DemuxError::malformed("truncated Xiph lace sizes"))?;
                    rest = tail;
                    size += usize::from(b);
                    if b != 255 {
                        break;
                    }
                }
                sizes.push(size);
            }
        },
        Lacing::Ebml if count > 1 => {
            let (first, len) = decode_vint(rest, VarIntKind::Unsigned)
                .ok_or_else(|| DemuxError::malformed("invalid EBML lace size"))?;
            rest = &rest[len..];

            let mut size = first;
            sizes.push(size as usize);

            for _ in 2..count {
                let (delta, len) = decode_vint(rest, VarIntKind::LaceSigned)
                    .ok_or_else(|| DemuxError::malformed("invalid EBML lace delta"))?;
                rest = &rest[len..];

                size += delta;
                if size < 0 {
                    return Err(DemuxError::malformed("negative EBML lace size"));
                }
                sizes.push(size as usize);
            }
        },
        Lacing::Fixed => {
            if rest.len() % count != 0 {
                return Err(DemuxError::malformed("fixed lacing with uneven frames"));
            }
            sizes.resize(count - 1, rest.len() / count);
        },
        Lacing::Ebml | Lacing::None => {},
    }

    let explicit: usize = sizes.iter().sum();
    if explicit > rest.len() {
        return Err(DemuxError::malformed("lace sizes exceed block size"));
    }
    sizes.push(rest.len() - explicit);

    let mut frames = Vec::with_capacity(count);
    for size in sizes {
        let (frame, tail) = rest.split_at(size);
        frames.push(frame);
        rest = tail;
    }

    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::matroska::ebml::encode_vint;

    fn block(flags: u8, lace_header: &[u8], frames: &[&[u8]]) -> Vec<u8> {
        let mut out = vec![0x81, 0x00, 0x20, flags];
        out.extend_from_slice(lace_header);
        for frame in frames {
            out.extend_from_slice(frame);
        }
        out
    }

    #[test]
    fn unlaced_block() {
        let data = block(0x80, &[], &[&b"abc"[..]]);
        let parsed = Block::parse(&data).unwrap();

        assert_eq!(parsed.track, 1);
        assert_eq!(parsed.relative_timecode, 32);
        assert!(parsed.keyframe);
        assert_eq!(parsed.frames, vec![&b"abc"[..]]);
    }

    #[test]
    fn xiph_lacing() {
        let big = vec![9u8; 300];
        let frames: [&[u8]; 3] = [&big, &b"xy"[..], &b"last"[..]];
        // Three frames: sizes 300 (255 + 45) and 2, last implied.
        let data = block(0x02, &[2, 255, 45, 2], &frames);

        let parsed = Block::parse(&data).unwrap();
        assert!(!parsed.keyframe);
        assert_eq!(parsed.frames, frames.to_vec());
    }

    #[test]
    fn fixed_lacing() {
        let data = block(0x04, &[2], &[&b"aa"[..], &b"bb"[..], &b"cc"[..]]);
        let parsed = Block::parse(&data).unwrap();
        assert_eq!(parsed.frames, vec![&b"aa"[..], &b"bb"[..], &b"cc"[..]]);

        let uneven = block(0x04, &[1], &[&b"abc"[..]]);
        assert!(Block::parse(&uneven).is_err());
    }

    #[test]
    fn ebml_lacing() {
        let frames: [&[u8]; 4] = [&b"12345"[..], &b"123"[..], &b"1234567"[..], &b"12"[..]];

        let mut header = vec![3];
        header.extend(encode_vint(5, 1, VarIntKind::Unsigned).unwrap());
        header.extend(encode_vint(-2, 1, VarIntKind::LaceSigned).unwrap());
        header.extend(encode_vint(4, 2, VarIntKind::LaceSigned).unwrap());

        let data = block(0x06, &header, &frames);
        let parsed = Block::parse(&data).unwrap();
        assert_eq!(parsed.frames, frames.to_vec());
    }

    #[test]
    fn oversized_laces_are_malformed() {
        let data = block(0x02, &[1, 200], &[&b"short"[..]]);
        assert!(Block::parse(&data).is_err());
    }
}
