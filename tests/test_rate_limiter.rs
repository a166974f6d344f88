//! Rate limiter contract shared by the local and distributed variants

use chrono::{TimeZone, Utc};
use std::sync::Arc;

use keyguard::domain::auth::ApiKeyId;
use keyguard::domain::clock::ManualClock;
use keyguard::infrastructure::{
    DistributedRateLimiter, InMemoryStore, LocalRateLimiter, RateLimitKey, RateLimiter,
};

const WINDOW_MS: u64 = 60_000;

struct Limiters {
    clock: Arc<ManualClock>,
    store: Arc<InMemoryStore>,
    local: Arc<LocalRateLimiter>,
    distributed: Arc<DistributedRateLimiter>,
}

fn limiters() -> Limiters {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 14, 15, 0, 0).unwrap()));
    let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
    let local = Arc::new(LocalRateLimiter::with_clock(clock.clone()));
    let distributed = Arc::new(DistributedRateLimiter::new(
        store.clone(),
        Arc::new(LocalRateLimiter::with_clock(clock.clone())),
        "test",
        clock.clone(),
    ));
    Limiters {
        clock,
        store,
        local,
        distributed,
    }
}

async fn two_per_window(limiter: &dyn RateLimiter, clock: &ManualClock) {
    let key = RateLimitKey::ApiKey(ApiKeyId::generate());

    let first = limiter.check(&key, 2, WINDOW_MS).await;
    assert!(first.allowed);
    assert_eq!((first.limit, first.remaining), (2, 1));

    let second = limiter.check(&key, 2, WINDOW_MS).await;
    assert!(second.allowed);
    assert_eq!(second.remaining, 0);

    let third = limiter.check(&key, 2, WINDOW_MS).await;
    assert!(!third.allowed);
    assert_eq!(third.remaining, 0);
    assert_eq!(third.retry_after, Some(60));

    clock.advance(chrono::Duration::milliseconds(WINDOW_MS as i64));
    assert!(limiter.check(&key, 2, WINDOW_MS).await.allowed);
}

#[tokio::test]
async fn test_local_two_per_window() {
    let l = limiters();
    two_per_window(l.local.as_ref(), &l.clock).await;
}

#[tokio::test]
async fn test_distributed_two_per_window() {
    let l = limiters();
    two_per_window(l.distributed.as_ref(), &l.clock).await;
}

#[tokio::test]
async fn test_distributed_window_slides() {
    let l = limiters();
    let key = RateLimitKey::ApiKey(ApiKeyId::generate());

    assert!(l.distributed.check(&key, 2, WINDOW_MS).await.allowed);
    l.clock.advance(chrono::Duration::seconds(30));
    let second = l.distributed.check(&key, 2, WINDOW_MS).await;
    assert!(second.allowed);
    // Capacity returns when the first attempt leaves the window
    assert_eq!(second.reset_at, Utc.with_ymd_and_hms(2024, 3, 14, 15, 1, 0).unwrap());

    l.clock.advance(chrono::Duration::seconds(31));
    // The first attempt has left the window, the second has not
    assert!(l.distributed.check(&key, 2, WINDOW_MS).await.allowed);
    assert!(!l.distributed.check(&key, 2, WINDOW_MS).await.allowed);
}

async fn concurrent_admissions(limiter: Arc<dyn RateLimiter>) -> usize {
    let key = RateLimitKey::ApiKey(ApiKeyId::generate());
    let mut handles = Vec::new();
    for _ in 0..50 {
        let limiter = limiter.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move { limiter.check(&key, 5, WINDOW_MS).await.allowed }));
    }

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }
    admitted
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_checks_never_exceed_max() {
    let l = limiters();
    assert_eq!(concurrent_admissions(l.local.clone()).await, 5);
    assert_eq!(concurrent_admissions(l.distributed.clone()).await, 5);
}

#[tokio::test]
async fn test_store_outage_falls_back_to_local_window() {
    let l = limiters();
    let key = RateLimitKey::ApiKey(ApiKeyId::generate());
    l.store.set_available(false);

    assert!(l.distributed.check(&key, 2, WINDOW_MS).await.allowed);
    assert!(l.distributed.check(&key, 2, WINDOW_MS).await.allowed);
    assert!(!l.distributed.check(&key, 2, WINDOW_MS).await.allowed);
}

#[tokio::test]
async fn test_reset_clears_both_tiers() {
    let l = limiters();
    let id = ApiKeyId::generate();
    let key = RateLimitKey::ApiKey(id);
    let endpoint = RateLimitKey::Endpoint(id, "POST /v1/reports".to_string());

    let limiters: [Arc<dyn RateLimiter>; 2] = [l.local.clone(), l.distributed.clone()];
    for limiter in limiters {
        limiter.check(&key, 1, WINDOW_MS).await;
        limiter.check(&endpoint, 1, WINDOW_MS).await;
        assert!(!limiter.check(&key, 1, WINDOW_MS).await.allowed);

        limiter.reset(&id).await;
        assert!(limiter.check(&key, 1, WINDOW_MS).await.allowed);
        assert!(limiter.check(&endpoint, 1, WINDOW_MS).await.allowed);
    }
}
