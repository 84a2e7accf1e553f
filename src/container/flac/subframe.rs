//! Per-channel subframe decoding, residual coding, and stereo decorrelation.

use crate::{
    error::{DemuxError, Result},
    input::bits::BitReader,
};
use std::io::Read;

const MAX_LPC_ORDER: usize = 32;

/// How the channels of a frame are coded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChannelAssignment {
    /// Each of `n` channels is coded separately.
    Independent(u8),
    /// Left channel, then side (`left - right`).
    LeftSide,
    /// Side (`left - right`), then right channel.
    RightSide,
    /// Mid (`(left + right) >> 1`), then side (`left - right`).
    MidSide,
}

impl ChannelAssignment {
    pub(crate) fn from_code(code: u32) -> Option<Self> {
        match code {
            0..=7 => Some(Self::Independent(code as u8 + 1)),
            8 => Some(Self::LeftSide),
            9 => Some(Self::RightSide),
            10 => Some(Self::MidSide),
            _ => None,
        }
    }

    /// Number of channels coded in the frame.
    #[must_use]
    pub fn channel_count(self) -> u8 {
        match self {
            Self::Independent(n) => n,
            _ => 2,
        }
    }

    /// Extra bit of precision needed by channel `index`, which is set for side channels.
    pub(crate) fn extra_bits(self, index: usize) -> u32 {
        match (self, index) {
            (Self::LeftSide, 1) | (Self::RightSide, 0) | (Self::MidSide, 1) => 1,
            _ => 0,
        }
    }
}

/// Decodes one subframe of `out.len()` samples with the given sample width.
pub(crate) fn read_subframe<R: Read>(
    bits: &mut BitReader<R>,
    mut bps: u32,
    out: &mut [i32],
) -> Result<()> {
    if bits.as_integer(1)? != 0 {
        return Err(DemuxError::malformed("subframe padding bit set"));
    }

    let kind = bits.as_integer(6)?;

    let wasted = if bits.as_integer(1)? == 1 {
        bits.read_all_zeroes()? + 1
    } else {
        0
    };

    if wasted >= bps {
        return Err(DemuxError::malformed("wasted bits exceed sample width"));
    }
    bps -= wasted;

    if bps > 32 {
        return Err(DemuxError::malformed("sample width exceeds 32 bits"));
    }

    match kind {
        0 => {
            let value = bits.as_signed_long(bps)? as i32;
            out.iter_mut().for_each(|s| *s = value);
        },
        1 =>
            for s in out.iter_mut() {
                *s = bits.as_signed_long(bps)? as i32;
            },
        8..=12 => {
            let order = (kind - 8) as usize;
            read_warmup(bits, bps, order, out)?;
            read_residual(bits, order, out)?;
            restore_fixed(order, out);
        },
        32..=63 => {
            let order = (kind - 31) as usize;
            read_warmup(bits, bps, order, out)?;

            let precision = bits.as_integer(4)?;
            if precision == 0b1111 {
                return Err(DemuxError::malformed("invalid LPC coefficient precision"));
            }

            let shift = bits.as_signed_integer(5)?;
            if shift < 0 {
                return Err(DemuxError::malformed("negative LPC shift"));
            }

            let mut coefficients = [0i32; MAX_LPC_ORDER];
            for c in coefficients.iter_mut().take(order) {
                *c = bits.as_signed_integer(precision + 1)?;
            }

            read_residual(bits, order, out)?;
            restore_lpc(&coefficients[..order], shift as u32, out);
        },
        _ => {
            return Err(DemuxError::malformed_owned(format!(
                "reserved subframe type {}",
                kind
            )))
        },
    }

    if wasted > 0 {
        out.iter_mut().for_each(|s| *s <<= wasted);
    }

    Ok(())
}

fn read_warmup<R: Read>(
    bits: &mut BitReader<R>,
    bps: u32,
    order: usize,
    out: &mut [i32],
) -> Result<()> {
    if order > out.len() {
        return Err(DemuxError::malformed("predictor order exceeds block size"));
    }

    for s in out.iter_mut().take(order) {
        *s = bits.as_signed_long(bps)? as i32;
    }

    Ok(())
}

/// Reads Rice-coded residuals into `out[order..]`.
pub(crate) fn read_residual<R: Read>(
    bits: &mut BitReader<R>,
    order: usize,
    out: &mut [i32],
) -> Result<()> {
    let (param_bits, escape) = match bits.as_integer(2)? {
        0 => (4, 0b1111),
        1 => (5, 0b1_1111),
        _ => return Err(DemuxError::malformed("reserved residual coding method")),
    };

    let partition_order = bits.as_integer(4)?;
    let partitions = 1usize << partition_order;
    let block_size = out.len();

    if block_size % partitions != 0 || block_size >> partition_order < order {
        return Err(DemuxError::malformed("residual partitions do not fit block"));
    }

    let per_partition = block_size >> partition_order;
    let mut index = order;

    for partition in 0..partitions {
        let count = if partition == 0 {
            per_partition - order
        } else {
            per_partition
        };

        let param = bits.as_integer(param_bits)?;
        let samples = &mut out[index..index + count];

        if param == escape {
            let width = bits.as_integer(5)?;
            for s in samples.iter_mut() {
                *s = bits.as_signed_integer(width)?;
            }
        } else {
            for s in samples.iter_mut() {
                let high = u64::from(bits.read_all_zeroes()?);
                let low = bits.as_long(param)?;
                let folded = (high << param) | low;

                *s = ((folded >> 1) as i64 ^ -((folded & 1) as i64)) as i32;
            }
        }

        index += count;
    }

    Ok(())
}

/// Adds the fixed polynomial prediction of `order` to each residual after the warmup.
pub(crate) fn restore_fixed(order: usize, x: &mut [i32]) {
    for i in order..x.len() {
        let predicted = match order {
            0 => 0,
            1 => x[i - 1],
            2 => 2i32.wrapping_mul(x[i - 1]).wrapping_sub(x[i - 2]),
            3 => 3i32
                .wrapping_mul(x[i - 1])
                .wrapping_sub(3i32.wrapping_mul(x[i - 2]))
                .wrapping_add(x[i - 3]),
            _ => 4i32
                .wrapping_mul(x[i - 1])
                .wrapping_sub(6i32.wrapping_mul(x[i - 2]))
                .wrapping_add(4i32.wrapping_mul(x[i - 3]))
                .wrapping_sub(x[i - 4]),
        };

        x[i] = x[i].wrapping_add(predicted);
    }
}

/// Adds the linear prediction from `coefficients` to each residual after the warmup.
pub(crate) fn restore_lpc(coefficients: &[i32], shift: u32, x: &mut [i32]) {
    let order = coefficients.len();

    for i in order..x.len() {
        let sum: i64 = coefficients
            .iter()
            .enumerate()
            .map(|(j, &c)| i64::from(c) * i64::from(x[i - 1 - j]))
            .sum();

        x[i] = x[i].wrapping_add((sum >> shift) as i32);
    }
}

/// Recovers left and right channels from an inter-channel coded pair.
pub(crate) fn decorrelate(assignment: ChannelAssignment, first: &mut [i32], second: &mut [i32]) {
    match assignment {
        ChannelAssignment::Independent(_) => {},
        ChannelAssignment::LeftSide =>
            for (left, side) in first.iter().zip(second.iter_mut()) {
                *side = left.wrapping_sub(*side);
            },
        ChannelAssignment::RightSide =>
            for (side, right) in first.iter_mut().zip(second.iter()) {
                *side = side.wrapping_add(*right);
            },
        ChannelAssignment::MidSide =>
            for (mid, side) in first.iter_mut().zip(second.iter_mut()) {
                let m = (*mid << 1) | (*side & 1);
                let s = *side;
                *mid = m.wrapping_add(s) >> 1;
                *side = m.wrapping_sub(s) >> 1;
            },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{input::bits::BitBufferReader, test_utils::BitWriter};

    const SIGNAL: [i32; 16] = [0, 3, 7, 12, 10, -4, -20, -9, 5, 100, -100, 42, 42, 41, 0, -1];

    fn fixed_residual(order: usize, x: &[i32]) -> Vec<i32> {
        let mut out = x.to_vec();
        for i in order..x.len() {
            let p = match order {
                0 => 0,
                1 => x[i - 1],
                2 => 2 * x[i - 1] - x[i - 2],
                3 => 3 * x[i - 1] - 3 * x[i - 2] + x[i - 3],
                _ => 4 * x[i - 1] - 6 * x[i - 2] + 4 * x[i - 3] - x[i - 4],
            };
            out[i] = x[i] - p;
        }
        out
    }

    #[test]
    fn fixed_prediction_round_trips() {
        for order in 0..=4 {
            let mut restored = fixed_residual(order, &SIGNAL);
            restore_fixed(order, &mut restored);
            assert_eq!(restored, SIGNAL, "order {}", order);
        }
    }

    #[test]
    fn lpc_prediction_round_trips() {
        let coefficients = [3, -1];
        let shift = 1;

        let mut residual = SIGNAL.to_vec();
        for i in 2..SIGNAL.len() {
            let sum = 3 * i64::from(SIGNAL[i - 1]) - i64::from(SIGNAL[i - 2]);
            residual[i] = SIGNAL[i] - (sum >> shift) as i32;
        }

        restore_lpc(&coefficients, shift, &mut residual);
        assert_eq!(residual, SIGNAL);
    }

    #[test]
    fn escaped_partition_reads_raw_values() {
        // Method 0, partition order 1: an escaped partition then a Rice partition.
        let mut w = BitWriter::new();
        w.write(0, 2);
        w.write(1, 4);

        w.write(0b1111, 4);
        w.write(12, 5);
        for v in &[-2000i64, 2047, -2048] {
            w.write_signed(*v, 12);
        }

        w.write(2, 4);
        for v in &[5i64, -3, 0, 1] {
            w.write_rice(*v, 2);
        }

        let bytes = w.finish();
        let mut reader = BitBufferReader::new(&bytes[..]);
        let mut out = [0i32; 8];
        read_residual(&mut reader, 1, &mut out).unwrap();

        assert_eq!(&out[1..], &[-2000, 2047, -2048, 5, -3, 0, 1]);
    }

    #[test]
    fn reserved_coding_method_is_malformed() {
        let bytes = [0b1000_0000];
        let mut reader = BitBufferReader::new(&bytes[..]);
        let mut out = [0i32; 4];

        assert!(matches!(
            read_residual(&mut reader, 0, &mut out),
            Err(DemuxError::Malformed(_))
        ));
    }

    #[test]
    fn stereo_decorrelation() {
        let left = [100, -7, 0, 32767, -32768];
        let right = [-50, 8, 1, 32767, 32767];

        let side: Vec<i32> = left.iter().zip(&right).map(|(l, r)| l - r).collect();
        let mid: Vec<i32> = left.iter().zip(&right).map(|(l, r)| (l + r) >> 1).collect();

        let (mut a, mut b) = (left.to_vec(), side.clone());
        decorrelate(ChannelAssignment::LeftSide, &mut a, &mut b);
        assert_eq!((a.as_slice(), b.as_slice()), (&left[..], &right[..]));

        let (mut a, mut b) = (side.clone(), right.to_vec());
        decorrelate(ChannelAssignment::RightSide, &mut a, &mut b);
        assert_eq!((a.as_slice(), b.as_slice()), (&left[..], &right[..]));

        let (mut a, mut b) = (mid, side);
        decorrelate(ChannelAssignment::MidSide, &mut a, &mut b);
        assert_eq!((a.as_slice(), b.as_slice()), (&left[..], &right[..]));
    }

    #[test]
    fn constant_and_verbatim_subframes() {
        let mut w = BitWriter::new();
        // CONSTANT, with one wasted bit: stored as 8-bit -3, shifted up once.
        w.write(0, 1);
        w.write(0, 6);
        w.write(1, 1);
        w.write(1, 1);
        w.write_signed(-3, 8);
        // VERBATIM at 4 bits.
        w.write(0, 1);
        w.write(1, 6);
        w.write(0, 1);
        for v in &[-8i64, 7, 0, 1] {
            w.write_signed(*v, 4);
        }

        let bytes = w.finish();
        let mut reader = BitBufferReader::new(&bytes[..]);

        let mut out = [0i32; 4];
        read_subframe(&mut reader, 9, &mut out).unwrap();
        assert_eq!(out, [-6; 4]);

        read_subframe(&mut reader, 4, &mut out).unwrap();
        assert_eq!(out, [-8, 7, 0, 1]);
    }
}
