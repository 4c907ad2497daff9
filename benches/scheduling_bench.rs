// benches/scheduling_bench.rs
// Throughput benchmarks for the two hot paths callers hit per scheduling
// tick: uncontended priority-inheriting mutex acquire/release, and mailbox
// send/recv. Mirrors the teacher's `criterion_group!`/`criterion_main!`
// bench-per-hot-path shape (e.g. `knhk-etl`'s json_parsing_bench.rs).

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rtsched::{EventBus, Mailbox, PiMutex, TaskHandle};

fn bench_pi_mutex_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("pi_mutex_uncontended");

    group.bench_function("acquire_release_no_inheritance", |b| {
        let bus = EventBus::new();
        let mutex = PiMutex::new(false);
        let task = TaskHandle::standalone("bench-task", 1);
        b.iter(|| {
            black_box(mutex.acquire(&task, &bus, None));
            black_box(mutex.release(&task, &bus));
        });
    });

    group.bench_function("acquire_release_with_inheritance", |b| {
        let bus = EventBus::new();
        let mutex = PiMutex::new(true);
        let task = TaskHandle::standalone("bench-task", 1);
        b.iter(|| {
            black_box(mutex.acquire(&task, &bus, None));
            black_box(mutex.release(&task, &bus));
        });
    });

    group.finish();
}

fn bench_mailbox_send_recv(c: &mut Criterion) {
    let mut group = c.benchmark_group("mailbox_send_recv");

    for depth in [1usize, 16, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let mailbox = Mailbox::new(None);
            b.iter(|| {
                for i in 0..depth {
                    black_box(mailbox.send(serde_json::json!(i)));
                }
                for _ in 0..depth {
                    black_box(mailbox.recv());
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pi_mutex_uncontended, bench_mailbox_send_recv);
criterion_main!(benches);
