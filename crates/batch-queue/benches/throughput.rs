use batch_queue::bounded;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

const MSG_PER_PRODUCER: u64 = 1_000_000;
const QUEUE_CAPACITY: usize = 2048; // default max queue size of the batch processor
const DRAIN_BATCH: usize = 512; // default max export batch size

fn bench_uncontended_enqueue(c: &mut Criterion) {
    let mut group = c.benchmark_group("enqueue");
    group.throughput(Throughput::Elements(QUEUE_CAPACITY as u64));

    group.bench_function("fill_then_drain", |b| {
        let (producer, mut consumer) = bounded::<u64>(QUEUE_CAPACITY);
        let mut out = Vec::with_capacity(QUEUE_CAPACITY);
        b.iter(|| {
            for i in 0..QUEUE_CAPACITY as u64 {
                black_box(producer.enqueue(i));
            }
            out.clear();
            consumer.drain_into(QUEUE_CAPACITY, &mut out);
            black_box(&out);
        });
    });

    group.bench_function("overflow_drop", |b| {
        let (producer, _consumer) = bounded::<u64>(QUEUE_CAPACITY);
        for i in 0..QUEUE_CAPACITY as u64 {
            let _ = producer.enqueue(i);
        }
        b.iter(|| black_box(producer.enqueue(black_box(7))));
    });

    group.finish();
}

fn bench_mpsc(c: &mut Criterion) {
    let mut group = c.benchmark_group("mpsc");

    for num_producers in [1usize, 2, 4, 8] {
        let total_msgs = MSG_PER_PRODUCER * num_producers as u64;
        group.throughput(Throughput::Elements(total_msgs));

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}P_1C", num_producers)),
            &num_producers,
            |b, &n| {
                b.iter(|| {
                    let (producer, mut consumer) = bounded::<u64>(QUEUE_CAPACITY);
                    let done = Arc::new(AtomicBool::new(false));

                    let handles: Vec<_> = (0..n)
                        .map(|_| {
                            let p = producer.clone();
                            thread::spawn(move || {
                                for i in 0..MSG_PER_PRODUCER {
                                    black_box(p.enqueue(i));
                                }
                            })
                        })
                        .collect();

                    // Consumer drains in export-sized batches until producers finish
                    let done_flag = Arc::clone(&done);
                    let waiter = thread::spawn(move || {
                        for h in handles {
                            h.join().unwrap();
                        }
                        done_flag.store(true, Ordering::Release);
                    });

                    let mut out = Vec::with_capacity(DRAIN_BATCH);
                    let mut drained = 0u64;
                    while !done.load(Ordering::Acquire) {
                        out.clear();
                        drained += consumer.drain_into(DRAIN_BATCH, &mut out) as u64;
                    }
                    out.clear();
                    drained += consumer.drain_into(usize::MAX, &mut out) as u64;
                    waiter.join().unwrap();
                    black_box(drained);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_uncontended_enqueue, bench_mpsc);
criterion_main!(benches);
