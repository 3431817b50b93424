/*!
 * Tests for the shared rate governor under concurrent workers
 */

use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tokio::time::Instant;

use transkit::translation::rate_limit::{Permit, RateGovernor, RateLimits};

async fn acquire_all(governor: Arc<RateGovernor>, workers: usize, per_worker: usize, tokens: impl Fn() -> u64) -> Vec<Permit> {
    let stop = Arc::new(AtomicBool::new(false));
    let mut handles = Vec::new();
    for _ in 0..workers {
        let governor = Arc::clone(&governor);
        let stop = Arc::clone(&stop);
        let costs: Vec<u64> = (0..per_worker).map(|_| tokens()).collect();
        handles.push(tokio::spawn(async move {
            let mut permits = Vec::new();
            for cost in costs {
                if let Some(permit) = governor.acquire(cost, &stop).await {
                    permits.push(permit);
                }
            }
            permits
        }));
    }

    let mut permits: Vec<Permit> = futures::future::join_all(handles)
        .await
        .into_iter()
        .flat_map(|result| result.unwrap())
        .collect();
    permits.sort_by_key(|permit| permit.granted_at);
    permits
}

/// Grants falling in `[start, start + window)`
fn in_window(permits: &[Permit], start: Instant, window: Duration) -> impl Iterator<Item = &Permit> {
    permits
        .iter()
        .filter(move |permit| permit.granted_at >= start && permit.granted_at < start + window)
}

#[tokio::test(start_paused = true)]
async fn test_acquire_withRandomWorkersAndBudget_shouldNeverExceedRequestsPerWindow() {
    let mut rng = rand::rng();
    for _ in 0..10 {
        let workers = rng.random_range(1..8);
        let budget = rng.random_range(1..5u32);
        let window = Duration::from_millis(rng.random_range(100..5_000));
        let per_worker = rng.random_range(1..6);

        let governor = Arc::new(RateGovernor::new(RateLimits::per_minute(Some(budget), None), window));
        let permits = acquire_all(Arc::clone(&governor), workers, per_worker, || 1).await;

        assert_eq!(permits.len(), workers * per_worker);
        for permit in &permits {
            let admitted = in_window(&permits, permit.granted_at, window).count();
            assert!(admitted <= budget as usize, "{} grants within {:?}, budget {}", admitted, window, budget);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_acquire_withTokenBudget_shouldKeepWindowTotalsWithinBudget() {
    let budget = 100u64;
    let window = Duration::from_secs(2);
    let governor = Arc::new(RateGovernor::new(RateLimits::per_minute(None, Some(budget)), window));

    let permits = acquire_all(Arc::clone(&governor), 4, 5, || rand::rng().random_range(1..=budget)).await;

    assert_eq!(permits.len(), 20);
    for permit in &permits {
        let spent: u64 = in_window(&permits, permit.granted_at, window).map(|p| p.tokens).sum();
        assert!(spent <= budget, "{} tokens within {:?}", spent, window);
    }
}

#[tokio::test(start_paused = true)]
async fn test_acquire_withoutLimits_shouldGrantImmediately() {
    let governor = Arc::new(RateGovernor::unlimited());
    let permits = acquire_all(Arc::clone(&governor), 8, 10, || 1_000).await;

    assert_eq!(permits.len(), 80);
    assert!(permits.iter().all(|permit| permit.waited == Duration::ZERO));
    assert_eq!(governor.granted_count(), 80);
}
