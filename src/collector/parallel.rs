//! Bounded-parallel fetch orchestrator
//!
//! Runs one fetch per item with at most `worker_limit` calls in flight and
//! pairs every result with its item's key. Errors are returned per item; the
//! orchestrator never swallows or short-circuits them.

use crate::error::{ApiError, BatchError, Operation};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;

/// Run `op` once for every item.
///
/// A `worker_limit` of 0 runs the items strictly one after another. Results are
/// keyed by `key(item)`; when two items share a key the last to finish wins,
/// so callers pass deduplicated items.
pub async fn run<T, K, V, E, KF, F, Fut>(
    items: impl IntoIterator<Item = T>,
    worker_limit: usize,
    key: KF,
    op: F,
) -> HashMap<K, Result<V, E>>
where
    K: Eq + Hash,
    KF: Fn(&T) -> K,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<V, E>>,
{
    let width = worker_limit.max(1);

    stream::iter(items.into_iter().map(|item| {
        let k = key(&item);
        let fut = op(item);
        async move { (k, fut.await) }
    }))
    .buffer_unordered(width)
    .collect()
    .await
}

/// Split batch results into successes and a [`BatchError`] listing every
/// failed item, if any
pub fn partition<K, V>(
    operation: Operation,
    results: HashMap<K, Result<V, ApiError>>,
) -> (HashMap<K, V>, Option<BatchError>)
where
    K: Eq + Hash + ToString,
{
    let mut ok = HashMap::with_capacity(results.len());
    let mut failures = Vec::new();

    for (k, result) in results {
        match result {
            Ok(v) => {
                ok.insert(k, v);
            }
            Err(e) => {
                tracing::warn!("{} failed for {}: {}", operation, k.to_string(), e);
                failures.push((k.to_string(), e));
            }
        }
    }

    let err = (!failures.is_empty()).then(|| {
        failures.sort_by(|a, b| a.0.cmp(&b.0));
        BatchError {
            operation,
            failures,
        }
    });

    (ok, err)
}
