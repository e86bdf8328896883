//! Line codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use paws_protocol::{Encoder, LineDecoder, Method, Request, Response};

fn create_test_request(payload_size: usize) -> Request {
    Request::new("bench-1", Method::Put, "/feeds/42")
        .with_header("X-PachubeApiKey", "bench-key")
        .with_body(Some(
            serde_json::json!({
                "title": "bench",
                "datastreams": [{ "id": "temp", "current_value": "x".repeat(payload_size) }],
            })
            .to_string(),
        ))
}

fn create_test_response(payload_size: usize) -> Response {
    Response::new("bench-1", 200).with_body(
        serde_json::json!({
            "id": 42,
            "title": "bench",
            "datastreams": [{ "id": "temp", "current_value": "x".repeat(payload_size) }],
        })
        .to_string(),
    )
}

fn bench_request_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_encode");

    for size in [100, 1000, 10000] {
        let request = create_test_request(size);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &request, |b, request| {
            b.iter(|| black_box(Encoder::encode_request(request).unwrap()));
        });
    }

    group.finish();
}

fn bench_response_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("response_decode");

    for size in [100, 1000, 10000] {
        let encoded = Encoder::encode_response(&create_test_response(size)).unwrap();

        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| {
                let mut decoder = LineDecoder::new();
                decoder.extend(encoded);
                black_box(decoder.decode_response().unwrap())
            });
        });
    }

    group.finish();
}

fn bench_split_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("split_stream");

    // 100 frames delivered in reads of a fixed size.
    let mut stream = Vec::new();
    for i in 0..100 {
        let response = Response::new(format!("t-{}", i), 200).with_body("{\"id\":1}");
        stream.extend_from_slice(&Encoder::encode_response(&response).unwrap());
    }

    for chunk in [16, 512, 8192] {
        group.throughput(Throughput::Bytes(stream.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &chunk, |b, &chunk| {
            b.iter(|| {
                let mut decoder = LineDecoder::new();
                let mut frames = 0;
                for piece in stream.chunks(chunk) {
                    frames += decoder.feed::<Response>(piece).len();
                }
                black_box(frames)
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_request_encode,
    bench_response_decode,
    bench_split_stream
);
criterion_main!(benches);
