//! Vorbis comment blocks, shared by FLAC, Vorbis, and Opus.

use super::util::read_vec;
use crate::{error::Result, input::metadata::TrackInfoProvider};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Read;
use tracing::trace;

/// `KEY=value` tags, in stream order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct VorbisComments {
    pub vendor: String,
    pub tags: Vec<(String, String)>,
}

impl VorbisComments {
    /// Parses a comment block (without any codec-specific packet prefix).
    pub fn read<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let vendor_len = reader.read_u32::<LittleEndian>()?;
        let vendor = read_vec(reader, u64::from(vendor_len))?;
        let vendor = String::from_utf8_lossy(&vendor).into_owned();

        let count = reader.read_u32::<LittleEndian>()?;
        let mut tags = Vec::new();

        for _ in 0..count {
            let len = reader.read_u32::<LittleEndian>()?;
            let raw = read_vec(reader, u64::from(len))?;
            let entry = String::from_utf8_lossy(&raw);

            match entry.split_once('=') {
                Some((key, value)) => tags.push((key.to_string(), value.to_string())),
                None => trace!("Skipping vorbis comment without a key: {:?}", entry),
            }
        }

        Ok(Self { vendor, tags })
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Self::read(&mut &bytes[..])
    }

    /// First value for `key`, compared case-insensitively.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

impl TrackInfoProvider for VorbisComments {
    fn title(&self) -> Option<String> {
        self.get("TITLE").map(str::to_string)
    }

    fn author(&self) -> Option<String> {
        self.get("ARTIST").map(str::to_string)
    }

    fn isrc(&self) -> Option<String> {
        self.get("ISRC").map(str::to_string)
    }
}
