use std::sync::Arc;
use std::time::Duration;

use fcad::adapters::{SimulatedEnumerator, Simulator};
use fcad::core::{DriveEvents, DriveMonitor};
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;

const POLL: Duration = Duration::from_millis(100);
const WINDOW: Duration = Duration::from_millis(1000);

fn watch() -> (DriveEvents, Simulator, CancellationToken) {
    let (enumerator, simulator) = SimulatedEnumerator::new();
    let token = CancellationToken::new();
    let events = DriveMonitor::new(Arc::new(enumerator), POLL, WINDOW)
        .with_cancellation(token.clone())
        .watch();
    (events, simulator, token)
}

#[tokio::test(start_paused = true)]
async fn already_attached_volume_is_reported_after_settling() {
    let (mut events, simulator, _token) = watch();
    simulator.add_device("/media/CARD");

    let start = Instant::now();
    let event = timeout(Duration::from_secs(5), events.next())
        .await
        .expect("no drive event")
        .expect("monitor stopped");

    assert_eq!(event.volume.label, "CARD");
    assert!(start.elapsed() >= WINDOW);
}

#[tokio::test(start_paused = true)]
async fn flickering_volume_produces_a_single_event() {
    let (mut events, simulator, _token) = watch();

    let flicker = simulator.clone();
    tokio::spawn(async move {
        flicker.add_device("/media/CARD");
        sleep(Duration::from_millis(350)).await;
        flicker.remove_device("/media/CARD");
        sleep(Duration::from_millis(300)).await;
        flicker.add_device("/media/CARD");
    });

    let start = Instant::now();
    let event = timeout(Duration::from_secs(5), events.next())
        .await
        .expect("no drive event")
        .expect("monitor stopped");
    assert_eq!(event.volume.root.to_str(), Some("/media/CARD"));
    // The window restarted when the card came back at 650ms.
    assert!(start.elapsed() >= Duration::from_millis(1650));

    let again = timeout(Duration::from_secs(10), events.next()).await;
    assert!(again.is_err(), "still-attached volume was reported twice");
}

#[tokio::test(start_paused = true)]
async fn reattached_volume_is_reported_again() {
    let (mut events, simulator, _token) = watch();
    simulator.add_device("/media/CARD");
    timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap()
        .unwrap();

    simulator.remove_device("/media/CARD");
    // Let the monitor observe the detach before the card returns.
    let _ = timeout(Duration::from_millis(500), events.next()).await;
    simulator.add_device("/media/CARD");

    let event = timeout(Duration::from_secs(5), events.next()).await.unwrap();
    assert!(event.is_some());
}

#[tokio::test(start_paused = true)]
async fn cancellation_ends_the_sequence() {
    let (mut events, _simulator, token) = watch();

    let canceller = token.clone();
    tokio::spawn(async move {
        sleep(Duration::from_secs(2)).await;
        canceller.cancel();
    });

    let next = timeout(Duration::from_secs(5), events.next()).await.unwrap();
    assert!(next.is_none());
}
