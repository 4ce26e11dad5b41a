use rand::{Rng, thread_rng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use turnq::MpmcQueue;

/// This example will demonstrate a multi producer / multi consumer pipeline. The values
/// `0..NUM_VALUES` are partitioned round-robin among the producers, pushed with randomized
/// pacing and summed by the consumers. The delivered checksum must match regardless of how
/// the threads interleave.

const NUM_VALUES: u64 = 100_000;
const NUM_WORKERS: u64 = 4;

fn main() -> anyhow::Result<()> {
    let queue = MpmcQueue::new(64)?;
    let sum = AtomicU64::new(0);

    thread::scope(|s| {
        for i in 0..NUM_WORKERS {
            let queue = &queue;
            s.spawn(move || {
                for value in (i..NUM_VALUES).step_by(NUM_WORKERS as usize) {
                    queue.push(value);
                    // uneven producers exercise the positional handoff
                    if thread_rng().gen_ratio(1, 10_000) {
                        thread::sleep(Duration::from_micros(thread_rng().gen_range(1..50)));
                    }
                }
            });
        }
        for i in 0..NUM_WORKERS {
            let (queue, sum) = (&queue, &sum);
            s.spawn(move || {
                let mut local = 0u64;
                for _ in (i..NUM_VALUES).step_by(NUM_WORKERS as usize) {
                    local += queue.pop();
                }
                sum.fetch_add(local, Ordering::Relaxed);
            });
        }
    });

    let expected = NUM_VALUES * (NUM_VALUES - 1) / 2;
    let delivered = sum.load(Ordering::Relaxed);
    println!("delivered checksum: {delivered}, expected: {expected}");
    assert_eq!(expected, delivered);

    Ok(())
}
