//! Batching and bounded-concurrency helpers shared by the passes.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::PipelineResult;

/// Process items in fixed-size batches, sequentially.
///
/// Used for catalog endpoints that accept many ids per request.
pub async fn run_batched<T, F, Fut>(items: Vec<T>, batch_size: usize, mut f: F) -> PipelineResult<()>
where
    F: FnMut(Vec<T>) -> Fut,
    Fut: Future<Output = PipelineResult<()>>,
{
    let mut items = items.into_iter();
    loop {
        let batch: Vec<T> = items.by_ref().take(batch_size).collect();
        if batch.is_empty() {
            return Ok(());
        }
        f(batch).await?;
    }
}

/// Run one future per item with at most `limit` in flight.
///
/// The first error aborts the remaining work and is returned.
pub async fn run_with_concurrency_limit<T, F, Fut>(
    items: Vec<T>,
    limit: usize,
    f: F,
) -> PipelineResult<()>
where
    T: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = PipelineResult<()>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit));
    let mut set = JoinSet::new();

    for item in items {
        // acquire only fails when the semaphore is closed, which we never do
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("concurrency-limit semaphore unexpectedly closed");
        let fut = f(item);
        set.spawn(async move {
            let _permit = permit;
            fut.await
        });
    }

    while let Some(joined) = set.join_next().await {
        joined??;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn batches_cover_all_items() {
        let seen = Arc::new(AtomicUsize::new(0));
        let sizes = Arc::new(std::sync::Mutex::new(Vec::new()));
        let items: Vec<u32> = (0..7).collect();
        run_batched(items, 3, |batch| {
            let seen = seen.clone();
            let sizes = sizes.clone();
            async move {
                seen.fetch_add(batch.len(), Ordering::SeqCst);
                sizes.lock().unwrap().push(batch.len());
                Ok(())
            }
        })
        .await
        .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 7);
        assert_eq!(*sizes.lock().unwrap(), vec![3, 3, 1]);
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_limit() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let items: Vec<u32> = (0..20).collect();

        let (active2, peak2) = (active.clone(), peak.clone());
        run_with_concurrency_limit(items, 4, move |_| {
            let active = active2.clone();
            let peak = peak2.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn first_error_propagates() {
        let items: Vec<u32> = (0..4).collect();
        let result = run_with_concurrency_limit(items, 2, |i| async move {
            if i == 2 {
                Err(crate::PipelineError::Stop("boom".into()))
            } else {
                Ok(())
            }
        })
        .await;
        assert!(result.is_err());
    }
}
