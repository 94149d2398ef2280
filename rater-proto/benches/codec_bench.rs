use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::black_box;
use criterion::criterion_group;
use criterion::criterion_main;

use rater_proto::Command;
use rater_proto::Quota;
use rater_proto::ReplyDecoder;

const ALLOWED: &[u8] = b"*5\r\n:0\r\n:15\r\n:14\r\n:-1\r\n:60\r\n";
const LIMITED: &[u8] = b"*5\r\n:1\r\n:15\r\n:0\r\n:30\r\n:45\r\n";

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    let quota = Quota {
        burst: 15,
        rate: 30,
        period: 60,
        quantity: 1,
    };

    for key_len in [8usize, 64, 1024, 65535] {
        let key = vec![b'k'; key_len];
        group.bench_with_input(BenchmarkId::from_parameter(key_len), &key, |b, key| {
            b.iter(|| Command::new(black_box(key), quota).encode())
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for (name, reply) in [("allowed", ALLOWED), ("limited", LIMITED)] {
        group.bench_function(format!("{name}/whole"), |b| {
            b.iter(|| {
                let mut decoder = ReplyDecoder::new();
                let _ = decoder.decode(black_box(reply));
                *decoder.reply()
            })
        });

        group.bench_function(format!("{name}/bytewise"), |b| {
            b.iter(|| {
                let mut decoder = ReplyDecoder::new();
                for chunk in black_box(reply).chunks(1) {
                    let _ = decoder.decode(chunk);
                }
                *decoder.reply()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
