//! Per-key deduplication of concurrent async work
//!
//! The first caller for a key spawns the work on the runtime; later callers
//! for the same key subscribe to its outcome. The work runs detached from the
//! callers, so a caller that is dropped mid-wait does not cancel it and the
//! remaining waiters still get the result.

use crate::error::{RegistryError, Result};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tracing::debug;

pub struct SingleFlight<T> {
    in_flight: Arc<Mutex<HashMap<String, broadcast::Sender<Result<T>>>>>,
}

impl<T> Clone for SingleFlight<T> {
    fn clone(&self) -> Self {
        Self {
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `make_work()` for `key` unless a run is already in flight, in which
    /// case wait for that run instead. `make_work` is only called by the
    /// caller that starts a run.
    pub async fn run<F, Fut>(&self, key: &str, make_work: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut receiver = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.entry(key.to_string()) {
                Entry::Occupied(entry) => {
                    debug!(key, "Joining in-flight computation");
                    entry.get().subscribe()
                }
                Entry::Vacant(entry) => {
                    let (sender, receiver) = broadcast::channel(1);
                    entry.insert(sender);

                    let work = make_work();
                    let in_flight = Arc::clone(&self.in_flight);
                    let key = key.to_string();
                    tokio::spawn(async move {
                        // Inner task so a panic in the work still reaches the waiters.
                        let outcome = match tokio::spawn(work).await {
                            Ok(outcome) => outcome,
                            Err(e) => Err(RegistryError::from(e)),
                        };
                        if let Some(sender) = in_flight.lock().await.remove(&key) {
                            // No receivers left is fine: every caller went away.
                            let _ = sender.send(outcome);
                        }
                    });
                    receiver
                }
            }
        };

        receiver.recv().await.map_err(|e| {
            RegistryError::Internal(format!("in-flight computation for '{}' was lost: {}", key, e))
        })?
    }

    /// Number of keys with a run in flight.
    pub async fn in_flight(&self) -> usize {
        self.in_flight.lock().await.len()
    }
}
