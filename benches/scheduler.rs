use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use millrace::{Scheduler, Task};

const N_VALUES: usize = 100_000;

fn sum_batch(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    for value in values {
        sum += (value * value).sqrt();
    }
    sum
}

pub fn bench_nano_task_batches(c: &mut Criterion) {
    let scheduler = Arc::new(Scheduler::new(Scheduler::default_worker_count()));
    let values: Arc<Vec<f64>> = Arc::new((0..N_VALUES).map(|idx| idx as f64).collect());

    for batch_size in [10_usize, 100, 1_000, 10_000] {
        c.bench_function(&format!("scheduler_nano_tasks_batch_{batch_size}"), |b| {
            b.iter(|| {
                for start in (0..values.len()).step_by(batch_size) {
                    let end = (start + batch_size).min(values.len());
                    let values = Arc::clone(&values);
                    scheduler.submit("math", 0, move || {
                        black_box(sum_batch(&values[start..end]));
                        Ok(())
                    });
                }
                scheduler.process(false).unwrap();
            });
        });
    }
}

pub fn bench_task_resume_overhead(c: &mut Criterion) {
    let values: Arc<Vec<f64>> = Arc::new((0..N_VALUES).map(|idx| idx as f64).collect());

    for batch_size in [100_usize, 10_000] {
        c.bench_function(&format!("coro_task_batch_{batch_size}"), |b| {
            b.iter(|| {
                for start in (0..values.len()).step_by(batch_size) {
                    let end = (start + batch_size).min(values.len());
                    let values = Arc::clone(&values);
                    let task = Task::new(async move {
                        Ok(black_box(sum_batch(&values[start..end])))
                    });
                    task.resume();
                    black_box(task.result().unwrap());
                }
            });
        });
    }
}

criterion_group!(
    benches,
    bench_nano_task_batches,
    bench_task_resume_overhead
);
criterion_main!(benches);
