//! Per-key request coalescing
//!
//! Concurrent callers asking for the same key share one execution. The
//! work runs on its own tokio task, so a caller that is cancelled only
//! detaches; the work still finishes and every remaining waiter gets the
//! result.

use crate::error::{KilnError, KilnResult};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

type InFlight<T> = Shared<BoxFuture<'static, Option<T>>>;
type FlightMap<T> = Arc<Mutex<HashMap<String, InFlight<T>>>>;

/// Coalesces concurrent work by key
pub struct Flight<T: Clone + Send + Sync + 'static> {
    inflight: FlightMap<T>,
}

impl<T: Clone + Send + Sync + 'static> Flight<T> {
    /// Create an empty coalescer
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run `work` for `key`, or join the execution already in flight.
    ///
    /// `work` is only called (and its future only polled) when no other
    /// caller holds the key. Callers arriving after completion start a new
    /// execution, so `work` should re-check any persistent cache first.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> KilnResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let shared = {
            let mut map = lock(&self.inflight);
            match map.get(key) {
                Some(existing) => {
                    debug!("Joining in-flight work for {}", short(key));
                    existing.clone()
                }
                None => {
                    let fut = work();
                    let guard = Removal {
                        map: Arc::clone(&self.inflight),
                        key: key.to_string(),
                    };
                    // The map lock is held until after insert, so the task
                    // cannot remove its entry before it exists.
                    let handle = tokio::spawn(async move {
                        let _guard = guard;
                        fut.await
                    });
                    let shared = async move { handle.await.ok() }.boxed().shared();
                    map.insert(key.to_string(), shared.clone());
                    shared
                }
            }
        };

        shared
            .await
            .ok_or_else(|| KilnError::Internal(format!("work for {} panicked", short(key))))
    }

    /// Number of keys currently in flight
    pub fn in_flight(&self) -> usize {
        lock(&self.inflight).len()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Flight<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the key when the work task ends, including by panic
struct Removal<T: Clone + Send + Sync + 'static> {
    map: FlightMap<T>,
    key: String,
}

impl<T: Clone + Send + Sync + 'static> Drop for Removal<T> {
    fn drop(&mut self) {
        lock(&self.map).remove(&self.key);
    }
}

fn lock<T: Clone + Send + Sync + 'static>(
    map: &Mutex<HashMap<String, InFlight<T>>>,
) -> MutexGuard<'_, HashMap<String, InFlight<T>>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn short(key: &str) -> &str {
    &key[..12.min(key.len())]
}
