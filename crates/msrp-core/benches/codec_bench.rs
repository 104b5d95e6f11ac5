use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use msrp_core::codec::{decode, encode_request};
use msrp_core::{ByteRange, Flag, Header, Method, Request, StreamFramer};

fn send_request(body_len: usize) -> Request {
    let mut request = Request::new(
        Method::Send,
        vec!["msrp://bob.example.com:8888/9di4eae923wzd;tcp".into()],
        vec!["msrp://alicepc.example.com:7777/iau39soe2843z;tcp".into()],
    );
    request.headers.push(Header::MessageId("87652491".into()));
    request.byte_range = Some(ByteRange::new(1, body_len as u64, body_len as u64));
    request.content_type = Some("text/plain".into());
    request.body = Some(vec![b'x'; body_len]);
    request.flag = Flag::End;
    request
}

fn bench_encode(c: &mut Criterion) {
    let sizes: Vec<(usize, &str)> = vec![(0, "empty"), (256, "256_bytes"), (2048, "2048_bytes"), (16384, "16k")];

    let mut group = c.benchmark_group("encode_send");
    for (size, name) in sizes {
        let request = send_request(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut request = request.clone();
                encode_request(black_box(&mut request))
            })
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let frame = encode_request(&mut send_request(2048));

    let mut group = c.benchmark_group("decode_send");
    group.throughput(Throughput::Bytes(frame.len() as u64));
    group.bench_function("2048_bytes", |b| b.iter(|| decode(black_box(&frame))));
    group.finish();
}

fn bench_framer(c: &mut Criterion) {
    let mut stream = Vec::new();
    for _ in 0..64 {
        stream.extend(encode_request(&mut send_request(2048)));
    }

    let mut group = c.benchmark_group("stream_framer");
    group.throughput(Throughput::Bytes(stream.len() as u64));
    group.bench_function("64_frames_in_4k_reads", |b| {
        b.iter(|| {
            let mut framer = StreamFramer::default();
            let mut frames = 0;
            for piece in stream.chunks(4096) {
                framer.push(black_box(piece));
                while let Ok(Some(_)) = framer.next_frame() {
                    frames += 1;
                }
            }
            frames
        })
    });
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_framer);
criterion_main!(benches);
