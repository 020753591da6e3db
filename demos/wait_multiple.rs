use countdown_scheduler::{CountdownTimer, Scheduler};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let scheduler = Arc::new(Scheduler::new());
    scheduler.start_ticker(Duration::from_millis(100)).await?;

    let timer = Arc::new(CountdownTimer::new("shared_deadline", Duration::from_secs(2)));
    timer.start(&scheduler).await?;

    // Several tasks block on the same timer; the single terminal broadcast
    // wakes all of them.
    let mut waiters = Vec::new();
    for id in 1..=3 {
        let timer = Arc::clone(&timer);
        waiters.push(tokio::spawn(async move {
            let (outcome, elapsed) = timer.wait().await?;
            println!("[waiter {}] woke with {} after {:?}", id, outcome, elapsed);
            anyhow::Ok(())
        }));
    }

    for waiter in waiters {
        waiter.await??;
    }

    scheduler.stop_ticker().await?;
    Ok(())
}
