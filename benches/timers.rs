use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use eventloop::{EventLoop, Next, Repeat};

fn timer_churn(c: &mut Criterion) {
    c.bench_function("schedule_cancel_1000", |b| {
        b.iter(|| {
            let mut evloop = EventLoop::new();

            let ids: Vec<_> = (0..1000)
                .map(|_| {
                    evloop.schedule_timer(Duration::from_secs(1), Repeat::Forever, |_, _| {
                        Next::Continue
                    })
                })
                .collect();

            for id in ids {
                evloop.cancel_timer(id);
            }
        })
    });
}

criterion_group!(benches, timer_churn);
criterion_main!(benches);
