//! Expiry sweeps

mod common;

use std::time::Duration;

use common::{Harness, sign};
use rendezvous::{
    assertion::AssertionAction, models::SessionStatus, reaper::ExpiryReaper,
};

fn reaper_for(h: &Harness, interval: Duration) -> bool {
    ExpiryReaper::new(h.shared_store(), h.registry.clone(), interval).is_ok()
}

#[tokio::test]
async fn test_interval_must_fit_a_quarter_of_ttl() {
    let h = Harness::new(Duration::from_secs(120));

    assert!(!reaper_for(&h, Duration::from_secs(31)));
    assert!(!reaper_for(&h, Duration::ZERO));
    assert!(reaper_for(&h, Duration::from_secs(30)));
}

#[tokio::test]
async fn test_interval_must_be_whole_seconds() {
    let h = Harness::new(Duration::from_secs(8));

    assert!(!reaper_for(&h, Duration::from_millis(500)));
    assert!(!reaper_for(&h, Duration::from_millis(1500)));
    assert!(reaper_for(&h, Duration::from_secs(1)));
    assert!(reaper_for(&h, Duration::from_secs(2)));

    // A ttl below four seconds leaves no valid interval at all
    let short = Harness::new(Duration::from_secs(2));
    assert!(!reaper_for(&short, Duration::from_millis(500)));
    assert!(!reaper_for(&short, Duration::from_secs(1)));
}

#[tokio::test]
async fn test_sweep_expires_only_lapsed_pending_sessions() {
    let h = Harness::new(Duration::from_secs(4));
    let (user_id, device) = h.user_with_device();
    let reaper =
        ExpiryReaper::new(h.shared_store(), h.registry.clone(), Duration::from_secs(1)).unwrap();

    // Sessions from a short-lived registry over the same store
    let short = h.registry_with_ttl(Duration::from_millis(100));
    let lapsing = short.create(user_id).await.unwrap();
    let also_lapsing = short.create(user_id).await.unwrap();
    let decided = short.create(user_id).await.unwrap();
    let assertion = sign(&device, &decided.id, AssertionAction::Confirm);
    h.registry.confirm(&decided.id, &assertion).await.unwrap();

    assert_eq!(reaper.sweep_once().await.unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(reaper.sweep_once().await.unwrap(), 2);
    // Re-sweeping is a no-op
    assert_eq!(reaper.sweep_once().await.unwrap(), 0);

    for id in [&lapsing.id, &also_lapsing.id] {
        let stored = h.registry.get(id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Expired);
    }
    let stored = h.registry.get(&decided.id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Confirmed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scheduled_sweep_expires_abandoned_session() {
    let ttl = Duration::from_secs(4);
    let interval = Duration::from_secs(1);
    let h = Harness::with_margin(ttl, Duration::from_secs(10));
    let (user_id, _) = h.user_with_device();

    let reaper = ExpiryReaper::new(h.shared_store(), h.registry.clone(), interval).unwrap();
    let handle = reaper.start().await.unwrap();

    let session = h.registry.create(user_id).await.unwrap();
    let subscription = h.watcher.subscribe(&session.id).await.unwrap();

    // Nobody decides: after ttl plus a couple of sweeps the session is gone
    tokio::time::sleep(ttl + interval * 3).await;

    let stored = h.registry.get(&session.id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Expired);
    assert_eq!(
        subscription.wait_terminal().await.unwrap(),
        SessionStatus::Expired
    );

    handle.stop().await.unwrap();
}
