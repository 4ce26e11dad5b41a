use std::thread;
use turnq::MpmcQueue;

/// This example will demonstrate basic handoff: two consumer threads block on an empty
/// queue until the main thread publishes a value for each of them.

fn main() -> anyhow::Result<()> {
    let queue = MpmcQueue::new(10)?;

    thread::scope(|s| {
        s.spawn(|| {
            let value: u64 = queue.pop();
            println!("consumer a received {value}");
        });
        s.spawn(|| {
            let value: u64 = queue.pop();
            println!("consumer b received {value}");
        });

        queue.push(1);
        queue.push(2);
    });

    Ok(())
}
