use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use patchstore::encode::{EncodePool, EncodeTask};

fn candidate_tasks(new_data: &[u8], depth: u16) -> Vec<EncodeTask> {
    (1..=depth)
        .map(|tag| {
            let mut base = new_data.to_vec();
            // Perturb the base proportionally to its distance.
            for i in (0..base.len()).step_by(64 * tag as usize) {
                base[i] = base[i].wrapping_add(tag as u8);
            }
            EncodeTask {
                tag,
                base: Bytes::from(base),
            }
        })
        .collect()
}

fn criterion_benchmark(c: &mut Criterion) {
    let new_data: Vec<u8> = (0..64 * 1024u32).map(|i| (i % 251) as u8).collect();
    let sequential = EncodePool::new(0);
    let parallel = EncodePool::new(4);

    c.bench_function("encode_4_candidates_sequential", |b| {
        b.iter(|| {
            let out = sequential.execute(
                Bytes::from(new_data.clone()),
                true,
                candidate_tasks(&new_data, 4),
            );
            black_box(out)
        })
    });

    c.bench_function("encode_4_candidates_parallel", |b| {
        b.iter(|| {
            let out = parallel.execute(
                Bytes::from(new_data.clone()),
                true,
                candidate_tasks(&new_data, 4),
            );
            black_box(out)
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
