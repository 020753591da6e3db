use countdown_scheduler::{CountdownTimer, Scheduler, TimerState};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let scheduler = Arc::new(Scheduler::new());
    scheduler.start_ticker(Duration::from_millis(50)).await?;

    let timer = Arc::new(CountdownTimer::new("workout", Duration::from_secs(2)));
    timer
        .on_state(TimerState::Paused, |_state, elapsed| {
            Box::pin(async move {
                println!("Paused after running for {:?}", elapsed);
                Ok(())
            })
        })
        .await?;

    timer.start(&scheduler).await?;
    tokio::time::sleep(Duration::from_millis(500)).await;

    timer.pause(&scheduler).await?;
    let frozen = timer.remaining().await;
    println!("Remaining is frozen at {:?}", frozen);

    // No time elapses while paused
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(timer.remaining().await, frozen);

    timer.resume(&scheduler).await?;
    let (outcome, elapsed) = timer.wait().await?;
    println!("{} after {:?} of running time", outcome, elapsed);

    scheduler.stop_ticker().await?;
    Ok(())
}
