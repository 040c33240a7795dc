//! Single-Flight Gate (C7, spec.md §4.7): concurrent callers for the same
//! fingerprint join one in-flight fetch instead of issuing a duplicate
//! fan-out query. Grounded on the teacher's `scheduler::rate_limits`
//! per-key lock map shape, adapted to broadcast-join semantics.

use crate::model::Fingerprint;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

struct Inflight<T> {
    tx: broadcast::Sender<T>,
    waiters: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

/// Keyed by fingerprint; `T` is the shared, cloneable result type (a
/// fan-out `QueryResult` wrapped in `Arc`, typically).
pub struct SingleFlightGate<T: Clone + Send + Sync + 'static> {
    inflight: Mutex<HashMap<Fingerprint, Inflight<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Default for SingleFlightGate<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the shared waiter count on drop — covering both normal
/// completion and the caller's own future being dropped (client
/// disconnect, request timeout). When the count reaches zero, the
/// in-flight fetch is cancelled (spec.md §4.7, "the last cancelling
/// waiter cancels the fetch").
struct WaiterGuard {
    waiters: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        if self.waiters.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.cancel.cancel();
        }
    }
}

impl<T: Clone + Send + Sync + 'static> SingleFlightGate<T> {
    pub fn new() -> Self {
        Self { inflight: Mutex::new(HashMap::new()) }
    }

    /// Runs `fetch` for `key` unless another caller is already fetching
    /// it, in which case this call joins that caller's result. If every
    /// waiter's future is dropped before the fetch completes (the last one
    /// cancelling), the shared fetch is cancelled rather than left to run
    /// to completion unobserved.
    pub async fn run<F, Fut>(self: &Arc<Self>, key: Fingerprint, fetch: F) -> Arc<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = T> + Send + 'static,
    {
        let (mut rx, waiters, cancel) = {
            let mut guard = self.inflight.lock().await;
            if let Some(inflight) = guard.get(&key) {
                inflight.waiters.fetch_add(1, Ordering::SeqCst);
                (inflight.tx.subscribe(), inflight.waiters.clone(), inflight.cancel.clone())
            } else {
                let (tx, rx) = broadcast::channel(1);
                let waiters = Arc::new(AtomicUsize::new(1));
                let cancel = CancellationToken::new();
                guard.insert(key, Inflight { tx: tx.clone(), waiters: waiters.clone(), cancel: cancel.clone() });
                drop(guard);

                let gate = self.clone();
                let fetch_cancel = cancel.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        result = fetch() => {
                            gate.inflight.lock().await.remove(&key);
                            let _ = tx.send(result);
                        }
                        _ = fetch_cancel.cancelled() => {
                            gate.inflight.lock().await.remove(&key);
                            // Dropping `tx` here closes the channel with no
                            // value — fine, since cancellation only fires
                            // once every waiter has already given up.
                        }
                    }
                });
                (rx, waiters, cancel)
            }
        };

        let _guard = WaiterGuard { waiters, cancel };

        match rx.recv().await {
            Ok(value) => Arc::new(value),
            Err(_) => Arc::new(unreachable_cancelled()),
        }
    }
}

/// Reached only if this waiter's own fetch future somehow resolves after
/// cancellation without the guard having dropped it first — cancellation
/// only fires once every waiter is gone, so no live caller should ever
/// observe this branch in practice.
fn unreachable_cancelled<T>() -> T {
    panic!("single-flight sender dropped without a result")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn concurrent_callers_join_one_fetch() {
        let gate = Arc::new(SingleFlightGate::<u32>::new());
        let calls = Arc::new(AtomicU32::new(0));
        let key = Fingerprint([1; 32]);

        let mut handles = Vec::new();
        for _ in 0..5 {
            let gate = gate.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                gate.run(key, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    42u32
                })
                .await
            }));
        }

        for h in handles {
            assert_eq!(*h.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sequential_calls_refetch_after_completion() {
        let gate = Arc::new(SingleFlightGate::<u32>::new());
        let calls = Arc::new(AtomicU32::new(0));
        let key = Fingerprint([2; 32]);

        for _ in 0..2 {
            let calls = calls.clone();
            gate.run(key, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                7u32
            })
            .await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
