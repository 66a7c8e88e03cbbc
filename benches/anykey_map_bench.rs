use anykey_map::{Aggregate, Key, Map};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::collections::VecDeque;
use std::time::Duration;

fn lcg(mut s: u64) -> impl Iterator<Item = u64> {
    std::iter::from_fn(move || {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        Some(s)
    })
}

fn key(n: u64) -> String {
    format!("k{:016x}", n)
}

// Small nested aggregate keyed by `n`, with a self-reference every 4th key.
fn aggregate_key(n: u64) -> Key {
    let inner = Aggregate::from_keys([Key::from(key(n)), Key::from((n % 97) as i64)]);
    let outer = Aggregate::from_keys([Key::from(n as i64), Key::from(inner)]);
    if n % 4 == 0 {
        outer.push(&outer);
    }
    Key::from(outer)
}

fn bench_insert_fresh_100k(c: &mut Criterion) {
    c.bench_function("map::insert_fresh_100k", |b| {
        b.iter_batched(
            Map::<u64>::new,
            |mut m| {
                for (i, x) in lcg(1).take(100_000).enumerate() {
                    m.set(key(x), i as u64);
                }
                black_box(m)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_insert_int_100k(c: &mut Criterion) {
    c.bench_function("map::insert_int_100k", |b| {
        b.iter_batched(
            Map::<u64>::new,
            |mut m| {
                for (i, x) in lcg(2).take(100_000).enumerate() {
                    m.set(x as i64, i as u64);
                }
                black_box(m)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_get_hit_10k(c: &mut Criterion) {
    c.bench_function("map::get_hit_10k_on_100k", |b| {
        let mut m = Map::new();
        let keys: Vec<_> = lcg(7).take(100_000).map(key).collect();
        for (i, k) in keys.iter().enumerate() {
            m.set(k.as_str(), i as u64);
        }
        // Precompute 10k random query keys using LCG
        let n = keys.len();
        let mut s = 0x9e3779b97f4a7c15u64;
        let queries: Vec<Key> = (0..10_000)
            .map(|_| {
                s = s.wrapping_mul(2862933555777941757).wrapping_add(3037000493);
                Key::from(keys[(s as usize) % n].as_str())
            })
            .collect();
        b.iter(|| {
            for k in &queries {
                black_box(m.get(k));
            }
        })
    });
}

fn bench_get_miss_10k(c: &mut Criterion) {
    c.bench_function("map::get_miss_10k_on_100k", |b| {
        let mut m = Map::new();
        for (i, x) in lcg(11).take(100_000).enumerate() {
            m.set(key(x), i as u64);
        }
        let mut miss = lcg(0xdead_beef);
        b.iter(|| {
            for k in miss.by_ref().take(10_000) {
                black_box(m.get(key(k)));
            }
        })
    });
}

fn bench_aggregate_keys_10k(c: &mut Criterion) {
    c.bench_function("map::aggregate_set_get_10k", |b| {
        let keys: Vec<Key> = lcg(13).take(10_000).map(aggregate_key).collect();
        b.iter_batched(
            Map::<u64>::new,
            |mut m| {
                for (i, k) in keys.iter().enumerate() {
                    m.set(k, i as u64);
                }
                for k in &keys {
                    black_box(m.get(k));
                }
                black_box(m)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_delete_insert_churn(c: &mut Criterion) {
    c.bench_function("map::delete_insert_churn_100k", |b| {
        b.iter_batched(
            || {
                let mut m = Map::new();
                let mut order = VecDeque::with_capacity(10_000);
                for (i, x) in lcg(17).take(10_000).enumerate() {
                    m.set(x as i64, i as u64);
                    order.push_back(x as i64);
                }
                (m, order)
            },
            |(mut m, mut order)| {
                // Delete the oldest and append a fresh key; compaction runs
                // whenever tombstones outnumber live entries.
                for x in lcg(19).take(100_000) {
                    if let Some(oldest) = order.pop_front() {
                        m.delete(oldest);
                    }
                    m.set(x as i64, x);
                    order.push_back(x as i64);
                }
                black_box(m)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_iter_100k(c: &mut Criterion) {
    c.bench_function("map::iter_all_100k", |b| {
        let mut m = Map::new();
        for (i, x) in lcg(999).take(100_000).enumerate() {
            m.set(key(x), i as u64);
        }
        b.iter(|| {
            let mut sum = 0u64;
            for v in m.values() {
                sum = sum.wrapping_add(*v);
            }
            black_box(sum)
        })
    });
}

fn bench_config() -> Criterion {
    Criterion::default()
        .sample_size(12)
        .measurement_time(Duration::from_secs(5))
        .warm_up_time(Duration::from_secs(1))
}

criterion_group! {
    name = benches_insert;
    config = bench_config();
    targets = bench_insert_fresh_100k, bench_insert_int_100k, bench_aggregate_keys_10k
}
criterion_group! {
    name = benches_ops;
    config = bench_config();
    targets = bench_get_hit_10k,
              bench_get_miss_10k,
              bench_delete_insert_churn,
              bench_iter_100k
}
criterion_main!(benches_insert, benches_ops);
