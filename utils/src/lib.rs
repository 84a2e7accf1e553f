//! Builders for small, valid media files used throughout the test suite.
//!
//! Each builder writes just enough of its format for the demuxers to exercise
//! their parsing paths. Checksums are computed where the format defines them.

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};

/// MSB-first bit writer, the mirror image of the demuxers' bit readers.
#[derive(Clone, Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    current: u8,
    used: u32,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes the low `bits` bits of `value`.
    pub fn write(&mut self, value: u64, bits: u32) {
        for i in (0..bits).rev() {
            self.push_bit((value >> i) & 1 == 1);
        }
    }

    /// Writes `value` in two's complement over `bits` bits.
    pub fn write_signed(&mut self, value: i64, bits: u32) {
        let mask = if bits >= 64 { u64::MAX } else { (1 << bits) - 1 };
        self.write(value as u64 & mask, bits);
    }

    /// Writes a zigzag-folded Rice code with parameter `k`.
    pub fn write_rice(&mut self, value: i64, k: u32) {
        let folded = if value >= 0 {
            (value as u64) << 1
        } else {
            (((-value) as u64) << 1) - 1
        };

        for _ in 0..folded >> k {
            self.push_bit(false);
        }
        self.push_bit(true);
        self.write(folded & ((1 << k) - 1), k);
    }

    /// Writes a FLAC frame/sample number in its UTF-8-like coding.
    pub fn write_utf8_number(&mut self, value: u64) {
        if value < 0x80 {
            self.write(value, 8);
            return;
        }

        let len = (2..=7u32)
            .find(|len| value < 1 << ((7 - len) + 6 * (len - 1)))
            .expect("number too large for UTF-8 coding");

        let lead = (0xFF00u16 >> len) as u8 | (value >> (6 * (len - 1))) as u8;
        self.write(u64::from(lead), 8);

        for i in (0..len - 1).rev() {
            self.write(0x80 | ((value >> (6 * i)) & 0x3F), 8);
        }
    }

    /// Pads with zero bits to the next byte boundary.
    pub fn align(&mut self) {
        while self.used != 0 {
            self.push_bit(false);
        }
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.align();
        self.bytes
    }

    fn push_bit(&mut self, bit: bool) {
        self.current = (self.current << 1) | u8::from(bit);
        self.used += 1;

        if self.used == 8 {
            self.bytes.push(self.current);
            self.current = 0;
            self.used = 0;
        }
    }
}

fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |mut crc, &byte| {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x07 } else { crc << 1 };
        }
        crc
    })
}

fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |mut crc, &byte| {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x8005 } else { crc << 1 };
        }
        crc
    })
}

fn ogg_crc(data: &[u8]) -> u32 {
    data.iter().fold(0u32, |mut crc, &byte| {
        crc ^= u32::from(byte) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ 0x04C1_1DB7
            } else {
                crc << 1
            };
        }
        crc
    })
}

// WAV

/// A RIFF WAVE file with a plain `fmt ` chunk and the given sample data.
pub fn wav(format_tag: u16, channels: u16, sample_rate: u32, bits: u16, data: &[u8]) -> Vec<u8> {
    let block_align = channels * (bits / 8);
    let padded = data.len() + data.len() % 2;

    let mut out = b"RIFF".to_vec();
    out.write_u32::<LittleEndian>((4 + 24 + 8 + padded) as u32).unwrap();
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.write_u32::<LittleEndian>(16).unwrap();
    out.write_u16::<LittleEndian>(format_tag).unwrap();
    out.write_u16::<LittleEndian>(channels).unwrap();
    out.write_u32::<LittleEndian>(sample_rate).unwrap();
    out.write_u32::<LittleEndian>(sample_rate * u32::from(block_align)).unwrap();
    out.write_u16::<LittleEndian>(block_align).unwrap();
    out.write_u16::<LittleEndian>(bits).unwrap();

    out.extend_from_slice(b"data");
    out.write_u32::<LittleEndian>(data.len() as u32).unwrap();
    out.extend_from_slice(data);
    if data.len() % 2 == 1 {
        out.push(0);
    }

    out
}

/// 16-bit PCM holding a sawtooth, `frames` frames long.
pub fn wav_pcm16(sample_rate: u32, channels: u16, frames: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(frames as usize * usize::from(channels) * 2);

    for frame in 0..frames {
        let value = ((frame % 256) as i16 - 128) * 64;
        for _ in 0..channels {
            data.write_i16::<LittleEndian>(value).unwrap();
        }
    }

    wav(1, channels, sample_rate, 16, &data)
}

// Vorbis comments, Ogg, and Opus

/// A Vorbis comment block, without the framing bit used by Ogg Vorbis.
pub fn vorbis_comments(vendor: &str, tags: &[(&str, &str)]) -> Vec<u8> {
    let mut out = vec![];
    out.write_u32::<LittleEndian>(vendor.len() as u32).unwrap();
    out.extend_from_slice(vendor.as_bytes());
    out.write_u32::<LittleEndian>(tags.len() as u32).unwrap();

    for (key, value) in tags {
        let comment = format!("{}={}", key, value);
        out.write_u32::<LittleEndian>(comment.len() as u32).unwrap();
        out.extend_from_slice(comment.as_bytes());
    }

    out
}

/// An Ogg page with an explicit lacing table.
pub fn ogg_page_raw(
    flags: u8,
    granule: u64,
    serial: u32,
    sequence: u32,
    segments: &[u8],
    body: &[u8],
) -> Vec<u8> {
    let mut out = b"OggS".to_vec();
    out.push(0);
    out.push(flags);
    out.write_u64::<LittleEndian>(granule).unwrap();
    out.write_u32::<LittleEndian>(serial).unwrap();
    out.write_u32::<LittleEndian>(sequence).unwrap();
    out.write_u32::<LittleEndian>(0).unwrap();
    out.push(segments.len() as u8);
    out.extend_from_slice(segments);
    out.extend_from_slice(body);

    let crc = ogg_crc(&out);
    out[22..26].copy_from_slice(&crc.to_le_bytes());

    out
}

/// An Ogg page holding whole packets.
pub fn ogg_page(
    flags: u8,
    granule: u64,
    serial: u32,
    sequence: u32,
    packets: &[&[u8]],
) -> Vec<u8> {
    let mut segments = vec![];
    let mut body = vec![];

    for packet in packets {
        segments.extend(std::iter::repeat(255).take(packet.len() / 255));
        segments.push((packet.len() % 255) as u8);
        body.extend_from_slice(packet);
    }

    ogg_page_raw(flags, granule, serial, sequence, &segments, &body)
}

/// An `OpusHead` packet at 48kHz, channel mapping family 0.
pub fn opus_head(channels: u8, pre_skip: u16) -> Vec<u8> {
    let mut out = b"OpusHead".to_vec();
    out.push(1);
    out.push(channels);
    out.write_u16::<LittleEndian>(pre_skip).unwrap();
    out.write_u32::<LittleEndian>(48_000).unwrap();
    out.write_i16::<LittleEndian>(0).unwrap();
    out.push(0);
    out
}

/// An `OpusTags` packet.
pub fn opus_tags(tags: &[(&str, &str)]) -> Vec<u8> {
    let mut out = b"OpusTags".to_vec();
    out.extend(vorbis_comments("chirp", tags));
    out
}

// FLAC

/// Stream parameters for generated FLAC data.
#[derive(Clone, Copy, Debug)]
pub struct FlacInfo {
    pub sample_rate: u32,
    pub channels: u8,
    pub bits_per_sample: u8,
    /// Fixed block size of every frame.
    pub block_size: u16,
    pub total_samples: u64,
}

/// The 34-byte body of a `STREAMINFO` block.
pub fn flac_stream_info(info: &FlacInfo) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write(u64::from(info.block_size), 16);
    w.write(u64::from(info.block_size), 16);
    w.write(0, 24);
    w.write(0, 24);
    w.write(u64::from(info.sample_rate), 20);
    w.write(u64::from(info.channels - 1), 3);
    w.write(u64::from(info.bits_per_sample - 1), 5);
    w.write(info.total_samples, 36);

    let mut out = w.finish();
    out.extend_from_slice(&[0; 16]);
    out
}

fn flac_block(out: &mut Vec<u8>, kind: u8, last: bool, body: &[u8]) {
    out.push(kind | if last { 0x80 } else { 0 });
    out.write_u24::<BigEndian>(body.len() as u32).unwrap();
    out.extend_from_slice(body);
}

/// The `fLaC` marker and metadata blocks of a native FLAC stream.
///
/// `points` are (sample, byte offset) seek points. A trailing `PADDING` block
/// is added if `padding` is set.
pub fn flac_header(
    info: &FlacInfo,
    points: &[(u64, u64)],
    tags: Option<&[(&str, &str)]>,
    padding: bool,
) -> Vec<u8> {
    let mut blocks: Vec<(u8, Vec<u8>)> = vec![(0, flac_stream_info(info))];

    if !points.is_empty() {
        let mut table = vec![];
        for &(sample, offset) in points {
            table.write_u64::<BigEndian>(sample).unwrap();
            table.write_u64::<BigEndian>(offset).unwrap();
            table.write_u16::<BigEndian>(info.block_size).unwrap();
        }
        blocks.push((3, table));
    }

    if let Some(tags) = tags {
        blocks.push((4, vorbis_comments("chirp", tags)));
    }

    if padding {
        blocks.push((1, vec![0; 32]));
    }

    let mut out = b"fLaC".to_vec();
    let count = blocks.len();
    for (i, (kind, body)) in blocks.into_iter().enumerate() {
        flac_block(&mut out, kind, i + 1 == count, &body);
    }

    out
}

/// A fixed-blocksize frame in which every channel holds a `CONSTANT` subframe of `value`.
pub fn flac_constant_frame(info: &FlacInfo, index: u64, value: i64) -> Vec<u8> {
    let block_size = u64::from(info.block_size);
    let bps = u32::from(info.bits_per_sample);

    let block_code = match block_size {
        192 => 1,
        576 | 1152 | 2304 | 4608 => 2 + (block_size / 576).trailing_zeros(),
        256 | 512 | 1024 | 2048 | 4096 | 8192 | 16384 | 32768 => {
            8 + (block_size / 256).trailing_zeros()
        },
        1..=256 => 6,
        _ => 7,
    };

    let rate_code = match info.sample_rate {
        88_200 => 1,
        176_400 => 2,
        192_000 => 3,
        8000 => 4,
        16_000 => 5,
        22_050 => 6,
        24_000 => 7,
        32_000 => 8,
        44_100 => 9,
        48_000 => 10,
        96_000 => 11,
        _ => 0,
    };

    let size_code = match bps {
        8 => 1,
        12 => 2,
        16 => 4,
        20 => 5,
        24 => 6,
        32 => 7,
        _ => 0,
    };

    let mut w = BitWriter::new();
    w.write(0xFFF8, 16);
    w.write(u64::from(block_code), 4);
    w.write(rate_code, 4);
    w.write(u64::from(info.channels - 1), 4);
    w.write(size_code, 3);
    w.write(0, 1);
    w.write_utf8_number(index);
    match block_code {
        6 => w.write(block_size - 1, 8),
        7 => w.write(block_size - 1, 16),
        _ => {},
    }

    let mut out = w.finish();
    out.push(crc8(&out));

    let mut w = BitWriter::new();
    for _ in 0..info.channels {
        w.write(0, 1);
        w.write(0, 6);
        w.write(0, 1);
        w.write_signed(value, bps);
    }
    out.extend(w.finish());

    let crc = crc16(&out);
    out.write_u16::<BigEndian>(crc).unwrap();

    out
}

// EBML

fn ebml_id(id: u32) -> Vec<u8> {
    let bytes = id.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(3);
    bytes[skip..].to_vec()
}

fn ebml_size(size: u64) -> Vec<u8> {
    let len = (1..=8u32)
        .find(|len| size < (1 << (7 * len)) - 1)
        .expect("element too large");

    let marked = size | (1 << (7 * len));
    marked.to_be_bytes()[8 - len as usize..].to_vec()
}

/// An element with a known size.
pub fn ebml_element(id: u32, data: &[u8]) -> Vec<u8> {
    let mut out = ebml_id(id);
    out.extend(ebml_size(data.len() as u64));
    out.extend_from_slice(data);
    out
}

/// The header of a master element whose size is unknown.
pub fn ebml_unknown_size(id: u32) -> Vec<u8> {
    let mut out = ebml_id(id);
    out.push(0x01);
    out.extend_from_slice(&[0xFF; 7]);
    out
}

/// A master element holding `children`.
pub fn ebml_master(id: u32, children: &[Vec<u8>]) -> Vec<u8> {
    ebml_element(id, &children.concat())
}

/// An unsigned integer element, in as few bytes as possible.
pub fn ebml_uint(id: u32, value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(7);
    ebml_element(id, &bytes[skip..])
}

// MP4

/// A box with a 32-bit size.
pub fn mp4_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = vec![];
    out.write_u32::<BigEndian>(8 + body.len() as u32).unwrap();
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    out
}

/// A box with a 64-bit size.
pub fn mp4_large_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = vec![];
    out.write_u32::<BigEndian>(1).unwrap();
    out.extend_from_slice(kind);
    out.write_u64::<BigEndian>(16 + body.len() as u64).unwrap();
    out.extend_from_slice(body);
    out
}

/// A box with version and flags ahead of `body`.
pub fn full_box(kind: &[u8; 4], version: u8, flags: u32, body: &[u8]) -> Vec<u8> {
    let mut data = vec![version];
    data.write_u24::<BigEndian>(flags).unwrap();
    data.extend_from_slice(body);
    mp4_box(kind, &data)
}

fn descriptor(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![tag, body.len() as u8];
    out.extend_from_slice(body);
    out
}

/// The body of an `esds` box after its version and flags.
pub fn esds_payload(object_type: u8, decoder_config: &[u8]) -> Vec<u8> {
    let mut config = vec![object_type, 0x15];
    config.extend_from_slice(&[0; 3]);
    config.extend_from_slice(&[0; 8]);
    if !decoder_config.is_empty() {
        config.extend(descriptor(0x05, decoder_config));
    }

    let mut es = vec![0, 1, 0];
    es.extend(descriptor(0x04, &config));
    es.extend(descriptor(0x06, &[0x02]));

    descriptor(0x03, &es)
}

/// A `sidx` box at `timescale`, with (referenced size, duration) entries.
pub fn sidx(timescale: u32, first_offset: u32, references: &[(u32, u32)]) -> Vec<u8> {
    let mut body = vec![];
    body.write_u32::<BigEndian>(1).unwrap();
    body.write_u32::<BigEndian>(timescale).unwrap();
    body.write_u32::<BigEndian>(0).unwrap();
    body.write_u32::<BigEndian>(first_offset).unwrap();
    body.write_u16::<BigEndian>(0).unwrap();
    body.write_u16::<BigEndian>(references.len() as u16).unwrap();

    for &(size, duration) in references {
        body.write_u32::<BigEndian>(size).unwrap();
        body.write_u32::<BigEndian>(duration).unwrap();
        body.write_u32::<BigEndian>(0x9000_0000).unwrap();
    }

    full_box(b"sidx", 0, 0, &body)
}

/// A `moof` for one track, with (duration, size) samples whose data
/// starts right after the header of an `mdat` following this box.
pub fn moof(
    track_id: u32,
    sequence: u32,
    base_time: Option<u64>,
    samples: &[(u32, u32)],
) -> Vec<u8> {
    let build = |data_offset: i32| {
        let mut mfhd = vec![];
        mfhd.write_u32::<BigEndian>(sequence).unwrap();

        let mut tfhd = vec![];
        tfhd.write_u32::<BigEndian>(track_id).unwrap();

        let mut trun = vec![];
        trun.write_u32::<BigEndian>(samples.len() as u32).unwrap();
        trun.write_i32::<BigEndian>(data_offset).unwrap();
        for &(duration, size) in samples {
            trun.write_u32::<BigEndian>(duration).unwrap();
            trun.write_u32::<BigEndian>(size).unwrap();
        }

        let mut traf = full_box(b"tfhd", 0, 0, &tfhd);
        if let Some(time) = base_time {
            traf.extend(full_box(b"tfdt", 1, 0, &time.to_be_bytes()));
        }
        traf.extend(full_box(b"trun", 0, 0x301, &trun));

        let mut body = full_box(b"mfhd", 0, 0, &mfhd);
        body.extend(mp4_box(b"traf", &traf));
        mp4_box(b"moof", &body)
    };

    let len = build(0).len();
    build(len as i32 + 8)
}

fn ftyp() -> Vec<u8> {
    mp4_box(b"ftyp", b"M4A \0\0\0\0isomiso2")
}

fn sound_entry(kind: &[u8; 4], extensions: &[u8]) -> Vec<u8> {
    let mut body = vec![0; 6];
    body.write_u16::<BigEndian>(1).unwrap();
    body.write_u16::<BigEndian>(0).unwrap();
    body.write_u16::<BigEndian>(0).unwrap();
    body.write_u32::<BigEndian>(0).unwrap();
    body.write_u16::<BigEndian>(2).unwrap();
    body.write_u16::<BigEndian>(16).unwrap();
    body.write_u16::<BigEndian>(0).unwrap();
    body.write_u16::<BigEndian>(0).unwrap();
    body.write_u32::<BigEndian>(44_100 << 16).unwrap();
    body.extend_from_slice(extensions);

    mp4_box(kind, &body)
}

fn aac_entry() -> Vec<u8> {
    let mut esds = vec![0; 4];
    esds.extend(esds_payload(0x40, &[0x12, 0x10]));
    sound_entry(b"mp4a", &mp4_box(b"esds", &esds))
}

fn count_table(kind: &[u8; 4], entries: &[Vec<u32>]) -> Vec<u8> {
    let mut body = vec![];
    body.write_u32::<BigEndian>(entries.len() as u32).unwrap();
    for entry in entries {
        for &field in entry {
            body.write_u32::<BigEndian>(field).unwrap();
        }
    }
    full_box(kind, 0, 0, &body)
}

struct Tables<'a> {
    durations: &'a [u32],
    sizes: &'a [u32],
    samples_per_chunk: u32,
    chunk_offsets: &'a [u32],
}

fn stbl(entry: &[u8], tables: &Tables<'_>) -> Vec<u8> {
    let mut stsd = vec![];
    stsd.write_u32::<BigEndian>(1).unwrap();
    stsd.extend_from_slice(entry);

    let mut stts: Vec<Vec<u32>> = vec![];
    for &duration in tables.durations {
        match stts.last_mut() {
            Some(run) if run[1] == duration => run[0] += 1,
            _ => stts.push(vec![1, duration]),
        }
    }

    let count = tables.sizes.len() as u32;
    let per_chunk = tables.samples_per_chunk.max(1);
    let full = count / per_chunk;
    let mut stsc = vec![];
    if full > 0 {
        stsc.push(vec![1, per_chunk, 1]);
    }
    if count % per_chunk != 0 {
        stsc.push(vec![full + 1, count % per_chunk, 1]);
    }

    let mut stsz = vec![];
    stsz.write_u32::<BigEndian>(0).unwrap();
    stsz.write_u32::<BigEndian>(count).unwrap();
    for &size in tables.sizes {
        stsz.write_u32::<BigEndian>(size).unwrap();
    }

    let stco: Vec<Vec<u32>> = tables.chunk_offsets.iter().map(|&o| vec![o]).collect();

    let mut body = full_box(b"stsd", 0, 0, &stsd);
    body.extend(count_table(b"stts", &stts));
    body.extend(count_table(b"stsc", &stsc));
    body.extend(full_box(b"stsz", 0, 0, &stsz));
    body.extend(count_table(b"stco", &stco));

    mp4_box(b"stbl", &body)
}

fn trak(id: u32, timescale: u32, duration: u32, stbl: &[u8]) -> Vec<u8> {
    let mut tkhd = vec![0; 8];
    tkhd.write_u32::<BigEndian>(id).unwrap();
    tkhd.extend_from_slice(&[0; 68]);

    let mut mdhd = vec![0; 8];
    mdhd.write_u32::<BigEndian>(timescale).unwrap();
    mdhd.write_u32::<BigEndian>(duration).unwrap();
    mdhd.extend_from_slice(&[0x55, 0xC4, 0, 0]);

    let mut hdlr = vec![0; 4];
    hdlr.extend_from_slice(b"soun");
    hdlr.extend_from_slice(&[0; 12]);
    hdlr.extend_from_slice(b"Sound\0");

    let minf = mp4_box(b"minf", stbl);

    let mut mdia = full_box(b"mdhd", 0, 0, &mdhd);
    mdia.extend(full_box(b"hdlr", 0, 0, &hdlr));
    mdia.extend(minf);

    let mut body = full_box(b"tkhd", 0, 3, &tkhd);
    body.extend(mp4_box(b"mdia", &mdia));
    mp4_box(b"trak", &body)
}

fn ilst_item(kind: [u8; 4], value: &str) -> Vec<u8> {
    let mut data = vec![];
    data.write_u32::<BigEndian>(1).unwrap();
    data.write_u32::<BigEndian>(0).unwrap();
    data.extend_from_slice(value.as_bytes());
    mp4_box(&kind, &mp4_box(b"data", &data))
}

fn udta(title: Option<&str>, artist: Option<&str>) -> Vec<u8> {
    let mut ilst = vec![];
    if let Some(title) = title {
        ilst.extend(ilst_item([0xA9, b'n', b'a', b'm'], title));
    }
    if let Some(artist) = artist {
        ilst.extend(ilst_item([0xA9, b'A', b'R', b'T'], artist));
    }

    let meta = full_box(b"meta", 0, 0, &mp4_box(b"ilst", &ilst));
    mp4_box(b"udta", &meta)
}

/// Parameters of a generated standard (non-fragmented) AAC file.
#[derive(Clone, Debug)]
pub struct Mp4Samples<'a> {
    pub timescale: u32,
    /// Duration of each sample; sample `n` holds `n + 1` bytes of value `n`.
    pub durations: Vec<u32>,
    pub samples_per_chunk: u32,
    pub title: Option<&'a str>,
    pub artist: Option<&'a str>,
}

fn standard_file(entry: &[u8], samples: &Mp4Samples<'_>) -> Vec<u8> {
    let count = samples.durations.len();
    let sizes: Vec<u32> = (1..=count as u32).collect();
    let per_chunk = samples.samples_per_chunk.max(1) as usize;
    let duration = samples.durations.iter().sum();

    let mut data = vec![];
    for n in 0..count {
        data.extend(std::iter::repeat(n as u8).take(n + 1));
    }

    let build = |mdat_data_start: u32| {
        let chunk_offsets: Vec<u32> = (0..count)
            .step_by(per_chunk)
            .map(|first| mdat_data_start + sizes[..first].iter().sum::<u32>())
            .collect();

        let tables = Tables {
            durations: &samples.durations,
            sizes: &sizes,
            samples_per_chunk: per_chunk as u32,
            chunk_offsets: &chunk_offsets,
        };

        let mut mvhd = vec![0; 8];
        mvhd.write_u32::<BigEndian>(samples.timescale).unwrap();
        mvhd.write_u32::<BigEndian>(duration).unwrap();
        mvhd.extend_from_slice(&[0; 80]);

        let mut moov = full_box(b"mvhd", 0, 0, &mvhd);
        moov.extend(trak(1, samples.timescale, duration, &stbl(entry, &tables)));
        moov.extend(udta(samples.title, samples.artist));

        let mut out = ftyp();
        out.extend(mp4_box(b"moov", &moov));
        out
    };

    let head_len = build(0).len() as u32;
    let mut out = build(head_len + 8);
    out.extend(mp4_box(b"mdat", &data));
    out
}

/// A standard AAC file, with its `moov` ahead of its media data.
pub fn mp4_aac_file(samples: &Mp4Samples<'_>) -> Vec<u8> {
    standard_file(&aac_entry(), samples)
}

/// A two-sample file whose sound track uses a sample entry of type `kind`.
pub fn mp4_file_with_entry(kind: &[u8; 4], extensions: &[u8]) -> Vec<u8> {
    standard_file(&sound_entry(kind, extensions), &Mp4Samples {
        timescale: 1000,
        durations: vec![20; 2],
        samples_per_chunk: 2,
        title: None,
        artist: None,
    })
}

/// A fragmented AAC file: one `moof`/`mdat` pair per entry of `segments`,
/// holding that many samples of `duration` each. Sample `n` holds `n + 1`
/// bytes of value `n`. With `with_sidx`, a segment index precedes the fragments.
pub fn fragmented_mp4_file(
    timescale: u32,
    segments: &[u32],
    duration: u32,
    with_sidx: bool,
) -> Vec<u8> {
    let empty = Tables {
        durations: &[],
        sizes: &[],
        samples_per_chunk: 1,
        chunk_offsets: &[],
    };

    let mut trex = vec![];
    for field in &[1, 1, duration, 0, 0] {
        trex.write_u32::<BigEndian>(*field).unwrap();
    }

    let mut mvhd = vec![0; 8];
    mvhd.write_u32::<BigEndian>(timescale).unwrap();
    mvhd.write_u32::<BigEndian>(0).unwrap();
    mvhd.extend_from_slice(&[0; 80]);

    let mut moov = full_box(b"mvhd", 0, 0, &mvhd);
    moov.extend(trak(1, timescale, 0, &stbl(&aac_entry(), &empty)));
    moov.extend(mp4_box(b"mvex", &full_box(b"trex", 0, 0, &trex)));

    let mut fragments = vec![];
    let mut n = 0u32;
    let mut time = 0u64;

    for (index, &count) in segments.iter().enumerate() {
        let samples: Vec<(u32, u32)> = (n..n + count).map(|n| (duration, n + 1)).collect();

        let mut data = vec![];
        for sample in n..n + count {
            data.extend(std::iter::repeat(sample as u8).take(sample as usize + 1));
        }

        let mut fragment = moof(1, index as u32 + 1, Some(time), &samples);
        fragment.extend(mp4_box(b"mdat", &data));
        fragments.push(fragment);

        n += count;
        time += u64::from(count * duration);
    }

    let mut out = ftyp();
    out.extend(mp4_box(b"moov", &moov));

    if with_sidx {
        let references: Vec<(u32, u32)> = fragments
            .iter()
            .zip(segments)
            .map(|(fragment, &count)| (fragment.len() as u32, count * duration))
            .collect();
        out.extend(sidx(timescale, 0, &references));
    }

    out.extend(fragments.concat());
    out
}

// MPEG audio, ID3, and ADTS

/// A 384-byte MPEG-1 Layer III frame (128kbps, 48kHz, joint stereo) whose body is `fill`.
pub fn mp3_frame(fill: u8) -> Vec<u8> {
    let mut out = vec![0xFF, 0xFB, 0x94, 0x44];
    out.resize(384, fill);
    out
}

/// A silent frame carrying a Xing-style tag with frame count, byte count, and table.
pub fn mp3_xing_frame(tag: &[u8; 4], frames: u32, bytes: u32, toc: &[u8]) -> Vec<u8> {
    let mut out = mp3_frame(0);

    let mut fields = tag.to_vec();
    fields.write_u32::<BigEndian>(0x0F).unwrap();
    fields.write_u32::<BigEndian>(frames).unwrap();
    fields.write_u32::<BigEndian>(bytes).unwrap();
    fields.extend_from_slice(&toc[..100]);
    fields.write_u32::<BigEndian>(50).unwrap();

    out[36..36 + fields.len()].copy_from_slice(&fields);
    out
}

fn sync_safe(value: u32, len: usize) -> Vec<u8> {
    (0..len)
        .rev()
        .map(|i| ((value >> (7 * i)) & 0x7F) as u8)
        .collect()
}

/// The body of a text frame in the given encoding (0, 1 with a BOM, or 3).
pub fn id3_text(encoding: u8, text: &str) -> Vec<u8> {
    let mut out = vec![encoding];

    match encoding {
        0 => out.extend(text.chars().map(|c| c as u8)),
        1 => {
            out.extend_from_slice(&[0xFF, 0xFE]);
            for unit in text.encode_utf16() {
                out.extend_from_slice(&unit.to_le_bytes());
            }
        },
        2 => {
            for unit in text.encode_utf16() {
                out.extend_from_slice(&unit.to_be_bytes());
            }
        },
        _ => out.extend_from_slice(text.as_bytes()),
    }

    out
}

/// An ID3v2 tag of major `version` holding `frames` of (id, body).
pub fn id3v2(version: u8, frames: &[(&[u8], Vec<u8>)]) -> Vec<u8> {
    let mut body = vec![];

    for (id, data) in frames {
        body.extend_from_slice(id);
        match version {
            2 => body.extend(sync_safe(data.len() as u32, 3)),
            3 => body.write_u32::<BigEndian>(data.len() as u32).unwrap(),
            _ => body.extend(sync_safe(data.len() as u32, 4)),
        }
        if version > 2 {
            body.extend_from_slice(&[0, 0]);
        }
        body.extend_from_slice(data);
    }

    let mut out = b"ID3".to_vec();
    out.extend_from_slice(&[version, 0, 0]);
    out.extend(sync_safe(body.len() as u32, 4));
    out.extend(body);
    out
}

/// An AAC-LC ADTS frame carrying `payload`, optionally with a CRC.
pub fn adts_frame(rate_index: u8, channels: u8, crc: bool, payload: &[u8]) -> Vec<u8> {
    let header_len = if crc { 9 } else { 7 };

    let mut w = BitWriter::new();
    w.write(0xFFF, 12);
    w.write(0, 1);
    w.write(0, 2);
    w.write(u64::from(!crc), 1);
    w.write(1, 2);
    w.write(u64::from(rate_index), 4);
    w.write(0, 1);
    w.write(u64::from(channels), 3);
    w.write(0, 4);
    w.write((header_len + payload.len()) as u64, 13);
    w.write(0x7FF, 11);
    w.write(0, 2);
    if crc {
        w.write(0, 16);
    }

    let mut out = w.finish();
    out.extend_from_slice(payload);
    out
}
