use countdown_scheduler::{CountdownTimer, Scheduler};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let scheduler = Arc::new(Scheduler::new());
    scheduler.start_ticker(Duration::from_millis(100)).await?;

    let timer = Arc::new(CountdownTimer::with_completion(
        "breakfast_egg",
        Duration::from_secs(3),
        move |outcome, elapsed| {
            Box::pin(async move {
                println!("Completion callback: {} after {:?}", outcome, elapsed);
                Ok(())
            })
        },
    ));

    timer.start(&scheduler).await?;
    println!("Timer started, waiting for it to finish ...");

    let (outcome, elapsed) = timer.wait().await?;
    println!("Woke up: {} after {:?}", outcome, elapsed);

    scheduler.stop_ticker().await?;
    Ok(())
}
