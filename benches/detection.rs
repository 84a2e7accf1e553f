use chirp::{
    container::{ContainerDetector, DetectionResult, Hints},
    input::{metadata::AudioReference, SourceStream},
    Config,
};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use utils::FlacInfo;

fn flac_file(frames: u64) -> Vec<u8> {
    let info = FlacInfo {
        sample_rate: 44_100,
        channels: 2,
        bits_per_sample: 16,
        block_size: 4096,
        total_samples: 4096 * frames,
    };

    let mut out = utils::flac_header(&info, &[], Some(&[("TITLE", "Bench")][..]), true);
    for i in 0..frames {
        out.extend(utils::flac_constant_frame(&info, i, (i as i64 % 64) * 100));
    }
    out
}

fn mp3_file(frames: u8) -> Vec<u8> {
    let mut out = utils::id3v2(3, &[(&b"TIT2"[..], utils::id3_text(3, "Bench"))]);
    out.extend((0..frames).flat_map(utils::mp3_frame));
    out
}

fn detect(detector: &ContainerDetector, bytes: Vec<u8>, hints: &Hints) -> DetectionResult {
    let mut stream = SourceStream::from_memory(bytes, &Config::default());
    detector
        .detect(&AudioReference::new("bench", None), &mut stream, hints)
        .unwrap()
}

pub fn detection(c: &mut Criterion) {
    let detector = ContainerDetector::default();
    let inputs = [
        ("wav", utils::wav_pcm16(44_100, 2, 44_100)),
        ("flac", flac_file(8)),
        ("mp3", mp3_file(40)),
    ];

    let mut group = c.benchmark_group("Detection (no hints)");

    for (name, bytes) in &inputs {
        group.bench_with_input(BenchmarkId::from_parameter(name), bytes, |b, bytes| {
            b.iter_batched(
                || bytes.clone(),
                |bytes| black_box(detect(&detector, bytes, &Hints::default())),
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();

    // The MP3 probe runs last without hints: compare against a hinted run.
    let mut group = c.benchmark_group("Detection (hinted)");
    let hints = Hints::default().extension("mp3");
    let bytes = mp3_file(40);

    group.bench_function("mp3", |b| {
        b.iter_batched(
            || bytes.clone(),
            |bytes| black_box(detect(&detector, bytes, &hints)),
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

pub fn flac_decoding(c: &mut Criterion) {
    let config = Config::default();
    let detector = ContainerDetector::default();
    let bytes = flac_file(32);

    let descriptor = match detect(&detector, bytes.clone(), &Hints::default()) {
        DetectionResult::Supported {
            descriptor,
            track_info,
        } => (descriptor, track_info),
        other => panic!("FLAC bench file not detected: {:?}", other),
    };

    c.bench_function("FLAC frame decoding", |b| {
        b.iter_batched(
            || {
                let stream = Box::new(SourceStream::from_memory(bytes.clone(), &config));
                descriptor
                    .0
                    .create_provider(&descriptor.1, stream, &config)
                    .unwrap()
            },
            |mut provider| {
                let mut packets = vec![];
                provider.provide_frames(&mut packets).unwrap();
                black_box(packets)
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, detection, flac_decoding);
criterion_main!(benches);
