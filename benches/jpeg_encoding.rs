//! JPEG Encoding Benchmarks
//!
//! Measures libjpeg-turbo compression of BGRx desktop frames per chroma
//! subsampling mode and resolution.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use lamco_mjpeg_server::capture::{PixelFormat, RawFrame};
use lamco_mjpeg_server::video::{ChromaSubsampling, EncoderConfig, FrameEncoder};

/// BGRx gradient with a moving offset, roughly desktop-like for the encoder
fn generate_bgrx_frame(width: usize, height: usize, frame_num: u32) -> Vec<u8> {
    let mut data = vec![0u8; width * height * 4];
    let offset = (frame_num * 10) as usize;

    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) * 4;
            data[idx] = (((x + offset) * 255) / width) as u8;
            data[idx + 1] = (((y + offset) * 255) / height) as u8;
            data[idx + 2] = ((x ^ y) & 0xFF) as u8;
            data[idx + 3] = 0;
        }
    }
    data
}

fn bench_subsampling_modes(c: &mut Criterion) {
    let mut group = c.benchmark_group("jpeg_encode_1080p");
    let (width, height) = (1920usize, 1080usize);
    let data = generate_bgrx_frame(width, height, 0);
    group.throughput(Throughput::Bytes(data.len() as u64));

    let modes = [
        ChromaSubsampling::Yuv444,
        ChromaSubsampling::Yuv422,
        ChromaSubsampling::Yuv420,
        ChromaSubsampling::Yuv440,
        ChromaSubsampling::Gray,
    ];

    for subsampling in modes {
        let mut encoder = FrameEncoder::new(EncoderConfig {
            quality: 75,
            subsampling,
        })
        .unwrap();
        let frame = RawFrame::new(
            &data,
            width as u32,
            height as u32,
            (width * 4) as u32,
            PixelFormat::BGRx,
        );

        group.bench_function(BenchmarkId::new("subsampling", subsampling.as_str()), |b| {
            b.iter(|| black_box(encoder.encode(black_box(&frame)).unwrap()))
        });
    }

    group.finish();
}

fn bench_resolutions(c: &mut Criterion) {
    let mut group = c.benchmark_group("jpeg_encode_420");
    let resolutions = [(640, 480, "480p"), (1280, 720, "720p"), (1920, 1080, "1080p"), (3840, 2160, "2160p")];

    let mut encoder = FrameEncoder::new(EncoderConfig::default()).unwrap();
    for (width, height, name) in resolutions {
        let data = generate_bgrx_frame(width, height, 1);
        let frame = RawFrame::new(
            &data,
            width as u32,
            height as u32,
            (width * 4) as u32,
            PixelFormat::BGRx,
        );
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_function(BenchmarkId::new("resolution", name), |b| {
            b.iter(|| black_box(encoder.encode(black_box(&frame)).unwrap()))
        });
    }

    group.finish();
}

fn bench_quality(c: &mut Criterion) {
    let mut group = c.benchmark_group("jpeg_encode_quality");
    let (width, height) = (1280usize, 720usize);
    let data = generate_bgrx_frame(width, height, 2);
    let frame = RawFrame::new(
        &data,
        width as u32,
        height as u32,
        (width * 4) as u32,
        PixelFormat::BGRx,
    );

    for quality in [30u8, 50, 75, 90, 100] {
        let mut encoder = FrameEncoder::new(EncoderConfig {
            quality,
            subsampling: ChromaSubsampling::Yuv420,
        })
        .unwrap();
        group.bench_function(BenchmarkId::new("quality", quality), |b| {
            b.iter(|| black_box(encoder.encode(black_box(&frame)).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_subsampling_modes, bench_resolutions, bench_quality);
criterion_main!(benches);
