//! Generic retry-with-backoff combinator shared by every stage. Capability
//! ports already enforce their own per-call `deadline`, so this combinator's
//! only job is bounding attempt count and sleeping between them — the same
//! separation of concerns the teacher keeps between a scraper's HTTP client
//! (owns its own timeout) and its reconnect loop (owns backoff).

use std::future::Future;
use std::time::Duration;

/// Calls `op` until it succeeds or `max_retries` additional attempts have
/// been exhausted, sleeping `backoff[attempt]` between tries (clamped to the
/// last entry once attempts exceed the schedule's length). Returns the last
/// error if every attempt fails.
pub async fn retry_with_backoff<T, E, F, Fut>(max_retries: u32, backoff: &[Duration], mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= max_retries {
                    return Err(err);
                }
                let delay = backoff
                    .get(attempt as usize)
                    .or_else(|| backoff.last())
                    .copied()
                    .unwrap_or(Duration::ZERO);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_immediately_without_sleeping() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_with_backoff(2, &[Duration::from_millis(1)], || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(7) }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_up_to_the_budget_then_gives_up() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_with_backoff(2, &[Duration::from_millis(1), Duration::from_millis(1)], || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("still failing") }
        })
        .await;
        assert_eq!(result, Err("still failing"));
        assert_eq!(calls.load(Ordering::SeqCst), 3, "initial attempt plus two retries");
    }

    #[tokio::test]
    async fn recovers_on_a_later_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_with_backoff(2, &[Duration::from_millis(1)], || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 1 { Err("not yet") } else { Ok(42) } }
        })
        .await;
        assert_eq!(result, Ok(42));
    }
}
