use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::sleep;

use super::*;

fn drain(rx: &mut UnboundedReceiver<TimerEvent>) -> Vec<TimerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn tick(generation: u64, remaining_seconds: u32) -> TimerEvent {
    TimerEvent {
        generation,
        kind: TimerEventKind::Tick { remaining_seconds },
    }
}

fn completed(generation: u64) -> TimerEvent {
    TimerEvent {
        generation,
        kind: TimerEventKind::Completed,
    }
}

#[tokio::test(start_paused = true)]
async fn counts_down_once_per_second_and_completes_once() {
    let (timer, mut rx) = DwellTimer::new();
    let generation = timer.start(3);
    assert!(timer.is_running());
    assert_eq!(timer.progress(), 0.0);

    sleep(Duration::from_millis(1500)).await;
    assert_eq!(drain(&mut rx), vec![tick(generation, 2)]);
    assert_eq!(timer.snapshot().remaining_seconds, 2);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(
        drain(&mut rx),
        vec![tick(generation, 1), tick(generation, 0), completed(generation)]
    );
    assert!(!timer.is_running());
    assert_eq!(timer.progress(), 1.0);

    sleep(Duration::from_secs(5)).await;
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancel_suppresses_completion() {
    let (timer, mut rx) = DwellTimer::new();
    let generation = timer.start(10);
    timer.cancel();
    assert!(!timer.is_running());
    assert!(timer.generation() > generation);

    sleep(Duration::from_secs(11)).await;
    assert!(drain(&mut rx).is_empty());

    timer.cancel();
    assert!(!timer.is_running());
    assert_eq!(timer.snapshot().total_seconds, 0);
}

#[tokio::test(start_paused = true)]
async fn restart_discards_the_superseded_run() {
    let (timer, mut rx) = DwellTimer::new();
    let first = timer.start(2);
    sleep(Duration::from_millis(1500)).await;
    assert_eq!(drain(&mut rx), vec![tick(first, 1)]);

    let second = timer.restart(2);
    assert_ne!(first, second);
    sleep(Duration::from_millis(2500)).await;
    let events = drain(&mut rx);
    assert!(events.iter().all(|event| event.generation == second));
    assert_eq!(
        events,
        vec![tick(second, 1), tick(second, 0), completed(second)]
    );
}

#[tokio::test(start_paused = true)]
async fn zero_length_run_completes_immediately() {
    let (timer, mut rx) = DwellTimer::new();
    let generation = timer.start(0);
    assert!(!timer.is_running());
    assert_eq!(drain(&mut rx), vec![completed(generation)]);
    assert_eq!(timer.progress(), 0.0);
}

#[tokio::test(start_paused = true)]
async fn negative_duration_is_rejected() {
    let (timer, mut rx) = DwellTimer::new();
    assert_eq!(
        timer.start_checked(-1),
        Err(TimerError::InvalidArgument(-1))
    );
    assert!(!timer.is_running());
    assert!(drain(&mut rx).is_empty());

    timer.start_checked(4).expect("non-negative duration");
    assert_eq!(timer.snapshot().total_seconds, 4);
}

#[test]
fn progress_fraction_bounds() {
    assert_eq!(progress(10, 10), 0.0);
    assert_eq!(progress(10, 0), 1.0);
    assert_eq!(progress(4, 3), 0.25);
    assert_eq!(progress(0, 0), 0.0);
}
