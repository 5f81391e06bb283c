//! Bounded fan-out within a tick.

use std::future::Future;

use futures::stream::{self, StreamExt, TryStreamExt};

/// Runs `f` over `items` with at most `concurrency` calls in flight.
///
/// Results keep the input order. The first error is returned once every
/// call that was already started has settled; nothing is left running.
///
/// # Errors
///
/// Returns the first error produced by `f`.
pub async fn for_each_bounded<I, T, R, E, F, Fut>(
    items: I,
    concurrency: usize,
    f: F,
) -> Result<Vec<R>, E>
where
    I: IntoIterator<Item = T>,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    let results: Vec<Result<R, E>> = stream::iter(items)
        .map(f)
        .buffered(concurrency.max(1))
        .collect()
        .await;
    stream::iter(results).try_collect().await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let out = for_each_bounded(0..10u64, 3, |i| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10 * (10 - i))).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, String>(i * 2)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, (0..10).map(|i| i * 2).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_error_after_all_settled() {
        let done = Arc::new(AtomicUsize::new(0));
        let result = for_each_bounded(0..5, 2, |i| {
            let done = Arc::clone(&done);
            async move {
                done.fetch_add(1, Ordering::SeqCst);
                if i == 1 {
                    Err(format!("item {i} failed"))
                } else {
                    Ok(i)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap_err(), "item 1 failed");
        assert_eq!(done.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_zero_concurrency_still_progresses() {
        let out = for_each_bounded(vec![1, 2], 0, |i| async move { Ok::<_, ()>(i) })
            .await
            .unwrap();
        assert_eq!(out, vec![1, 2]);
    }
}
