use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;

struct Call<T> {
    id: u64,
    future: Shared<BoxFuture<'static, Option<T>>>,
}

type Calls<T> = Arc<Mutex<HashMap<String, Call<T>>>>;

/// Join-or-start coordination of named operations.
///
/// The first caller for a key starts the operation; callers arriving while
/// it is in flight await the same future and get a clone of its output. The
/// key is released as the operation completes, so nothing is cached: the next
/// caller starts a new round. Operations run on their own task and must be
/// started from within a tokio runtime. A round whose task panics or is
/// aborted yields `None` to its callers and releases the key.
pub struct SingleFlight<T> {
    calls: Calls<T>,
    next_id: AtomicU64,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            calls: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `start()` unless an operation for `key` is already in flight.
    ///
    /// Returns the output, `None` if the round never produced one, and whether
    /// this caller joined an existing round. Dropping the returned future
    /// stops waiting without cancelling the operation for other callers.
    pub async fn run<F, Fut>(&self, key: &str, start: F) -> (Option<T>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (future, joined) = {
            let mut calls = lock(&self.calls);
            match calls.get(key) {
                Some(call) => (call.future.clone(), true),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let release = Release {
                        calls: self.calls.clone(),
                        key: key.to_owned(),
                        id,
                    };
                    let work = start();
                    // runs to completion even if every waiter goes away
                    let round = tokio::spawn(async move {
                        let _release = release;
                        work.await
                    });
                    let future = async move { round.await.ok() }.boxed().shared();
                    calls.insert(
                        key.to_owned(),
                        Call {
                            id,
                            future: future.clone(),
                        },
                    );
                    (future, false)
                }
            }
        };
        (future.await, joined)
    }

    #[cfg(test)]
    pub(crate) fn in_flight(&self, key: &str) -> bool {
        lock(&self.calls).contains_key(key)
    }
}

fn lock<T>(calls: &Calls<T>) -> MutexGuard<'_, HashMap<String, Call<T>>> {
    calls.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Frees the key of one round once its task ends, however it ends.
struct Release<T> {
    calls: Calls<T>,
    key: String,
    id: u64,
}

impl<T> Drop for Release<T> {
    fn drop(&mut self) {
        let mut calls = lock(&self.calls);
        if calls.get(&self.key).is_some_and(|call| call.id == self.id) {
            calls.remove(&self.key);
        }
    }
}
