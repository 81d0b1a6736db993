use std::hint::black_box;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Bencher, Criterion};
use microtape::{Tape, TapeOptions};
use tempfile::TempDir;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
  tokio::runtime::Builder::new_multi_thread()
    .worker_threads(2)
    .enable_all()
    .build()
    .unwrap()
}

// Helper to open a tape in a temporary directory for isolated benchmark runs.
fn setup_tape(rt: &Runtime, writers: usize, flush_interval: Duration) -> (Tape, TempDir) {
  let dir = tempfile::tempdir().unwrap();
  let mut opts = TapeOptions::new(dir.path().join("bench.tape"));
  opts.writer_concurrency = writers;
  opts.flush_interval = flush_interval;
  let tape = rt.block_on(Tape::open(opts)).unwrap();
  (tape, dir)
}

fn bench_appends(c: &mut Criterion) {
  let rt = runtime();
  let mut group = c.benchmark_group("Append Operations");
  let payload = vec![0u8; 256]; // A realistic 256-byte payload

  // --- Single Append Benchmarks ---
  // One caller waiting on every write: latency is bounded by the flush interval.

  group.bench_function("append_single_1ms", |b: &mut Bencher| {
    let (tape, _dir) = setup_tape(&rt, 1, Duration::from_millis(1));
    b.iter(|| {
      rt.block_on(tape.append(black_box(payload.clone()))).unwrap();
    });
    rt.block_on(tape.close()).unwrap();
  });

  // --- Group Commit Benchmarks ---
  // Submit 100, then wait for all: one sync covers most of the burst.

  for writers in [1usize, 4] {
    group.bench_function(format!("submit_burst_100_writers_{}", writers), |b: &mut Bencher| {
      let (tape, _dir) = setup_tape(&rt, writers, Duration::from_millis(1));
      b.iter(|| {
        rt.block_on(async {
          let mut handles = Vec::with_capacity(100);
          for _ in 0..100 {
            handles.push(tape.submit(black_box(payload.clone())).await.unwrap());
          }
          for handle in handles {
            handle.durable().await.unwrap();
          }
        });
      });
      rt.block_on(tape.close()).unwrap();
    });
  }

  group.finish();
}

criterion_group!(benches, bench_appends);
criterion_main!(benches);
