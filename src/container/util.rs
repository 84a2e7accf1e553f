//! Small reading helpers shared between container parsers.

use crate::{
    error::{DemuxError, Result},
    input::SeekableStream,
};
use std::io::{ErrorKind as IoErrorKind, Read};

/// Upper bound on any single header or metadata allocation made from a length field.
const MAX_HEADER_ALLOC: u64 = 16 * 1024 * 1024;

/// Reads `signature.len()` bytes, returning whether they match (`None` matches anything).
///
/// A stream which ends early simply does not match.
pub(crate) fn check_next_bytes(
    stream: &mut dyn SeekableStream,
    signature: &[Option<u8>],
) -> Result<bool> {
    let mut buf = vec![0u8; signature.len()];

    match stream.read_exact(&mut buf) {
        Ok(()) => {},
        Err(e) if e.kind() == IoErrorKind::UnexpectedEof => return Ok(false),
        Err(e) => return Err(e.into()),
    }

    Ok(matches_signature(&buf, signature))
}

/// Returns whether `bytes` begins with `signature`.
pub(crate) fn matches_signature(bytes: &[u8], signature: &[Option<u8>]) -> bool {
    bytes.len() >= signature.len()
        && signature
            .iter()
            .zip(bytes)
            .all(|(expected, actual)| expected.map_or(true, |e| e == *actual))
}

/// Reads exactly `len` bytes into a new buffer.
///
/// Implausibly large lengths are rejected as malformed, rather than allocated.
pub(crate) fn read_vec<R: Read + ?Sized>(stream: &mut R, len: u64) -> Result<Vec<u8>> {
    if len > MAX_HEADER_ALLOC {
        return Err(DemuxError::malformed_owned(format!(
            "declared length {} is too large",
            len
        )));
    }

    let mut out = vec![0u8; len as usize];
    stream.read_exact(&mut out)?;

    Ok(out)
}

/// Converts a count of samples at `rate` into milliseconds.
pub(crate) fn samples_to_ms(samples: u64, rate: u64) -> u64 {
    if rate == 0 {
        0
    } else {
        (u128::from(samples) * 1000 / u128::from(rate)) as u64
    }
}

/// Converts milliseconds into a count of samples at `rate`.
pub(crate) fn ms_to_samples(ms: u64, rate: u64) -> u64 {
    (u128::from(ms) * u128::from(rate) / 1000) as u64
}

/// Lossily decodes text, trimming trailing NUL bytes.
pub(crate) fn text(bytes: &[u8]) -> String {
    let end = bytes
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |last| last + 1);

    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{constants::signatures, input::SourceStream, Config};

    #[test]
    fn wildcard_signatures() {
        assert!(matches_signature(b"RIFF\x00\x01\x02\x03WAVE", signatures::WAV));
        assert!(!matches_signature(b"RIFX\x00\x01\x02\x03WAVE", signatures::WAV));
        assert!(!matches_signature(b"RIFF", signatures::WAV));
    }

    #[test]
    fn short_stream_is_no_match() {
        let cfg = Config::default();
        let mut stream = SourceStream::from_memory(b"fLa".to_vec(), &cfg);

        assert!(!check_next_bytes(&mut stream, signatures::FLAC).unwrap());
    }

    #[test]
    fn conversions() {
        assert_eq!(samples_to_ms(44_100, 44_100), 1000);
        assert_eq!(samples_to_ms(10, 0), 0);
        assert_eq!(ms_to_samples(1500, 48_000), 72_000);
        assert_eq!(text(b"abc\0\0"), "abc");
    }
}
