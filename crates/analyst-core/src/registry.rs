use analyst_protocol::JobStatus;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// What a status callback wants after handling one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    Keep,
    Unregister,
}

pub type StatusCallback =
    Arc<dyn Fn(JobStatus) -> BoxFuture<'static, CallbackOutcome> + Send + Sync>;

/// Wrap an async closure as a [`StatusCallback`].
pub fn callback<F, Fut>(f: F) -> StatusCallback
where
    F: Fn(JobStatus) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallbackOutcome> + Send + 'static,
{
    Arc::new(move |status| f(status).boxed())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u64);

const IDLE: u8 = 0;
const BUSY: u8 = 1;
const RETIRED: u8 = 2;

/// One `(job id, callback)` pair. Cloned handles share the run state, so a
/// stale snapshot can never run a callback that is in flight or retired.
#[derive(Clone)]
pub struct Registration {
    pub id: CallbackId,
    pub job_id: String,
    callback: StatusCallback,
    state: Arc<AtomicU8>,
}

impl Registration {
    /// Claim the callback for one invocation. Fails while another invocation
    /// is running or once the callback has been retired.
    pub fn try_begin(&self) -> bool {
        self.state
            .compare_exchange(IDLE, BUSY, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish(&self) {
        let _ = self
            .state
            .compare_exchange(BUSY, IDLE, Ordering::AcqRel, Ordering::Acquire);
    }

    pub fn is_retired(&self) -> bool {
        self.state.load(Ordering::Acquire) == RETIRED
    }

    fn retire(&self) {
        self.state.store(RETIRED, Ordering::Release);
    }

    pub fn invoke(&self, status: JobStatus) -> BoxFuture<'static, CallbackOutcome> {
        (self.callback)(status)
    }
}

/// Concurrency-safe multimap of job id to status callbacks.
#[derive(Default)]
pub struct CallbackRegistry {
    inner: Mutex<HashMap<String, Vec<Registration>>>,
    next_id: AtomicU64,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, job_id: &str, callback: StatusCallback) -> CallbackId {
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let reg = Registration {
            id,
            job_id: job_id.to_string(),
            callback,
            state: Arc::new(AtomicU8::new(IDLE)),
        };
        self.inner
            .lock()
            .entry(job_id.to_string())
            .or_default()
            .push(reg);
        id
    }

    /// Remove one callback; it will not be invoked again.
    pub fn remove(&self, job_id: &str, id: CallbackId) -> bool {
        let mut map = self.inner.lock();
        let Some(list) = map.get_mut(job_id) else {
            return false;
        };
        let before = list.len();
        list.retain(|reg| {
            if reg.id == id {
                reg.retire();
                false
            } else {
                true
            }
        });
        let removed = list.len() != before;
        if list.is_empty() {
            map.remove(job_id);
        }
        removed
    }

    /// Drop every callback registered for `job_id`; returns how many.
    pub fn remove_all(&self, job_id: &str) -> usize {
        let removed = self.inner.lock().remove(job_id).unwrap_or_default();
        for reg in &removed {
            reg.retire();
        }
        removed.len()
    }

    /// Distinct job ids with at least one callback, sorted.
    pub fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn callbacks_for(&self, job_id: &str) -> Vec<Registration> {
        self.inner
            .lock()
            .get(job_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.inner.lock().contains_key(job_id)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Total number of registered callbacks.
    pub fn len(&self) -> usize {
        self.inner.lock().values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keep() -> StatusCallback {
        callback(|_| async { CallbackOutcome::Keep })
    }

    #[test]
    fn multimap_add_and_remove() {
        let reg = CallbackRegistry::new();
        let a1 = reg.add("job-a", keep());
        let _a2 = reg.add("job-a", keep());
        reg.add("job-b", keep());
        assert_eq!(reg.len(), 3);
        assert_eq!(reg.job_ids(), vec!["job-a", "job-b"]);

        assert!(reg.remove("job-a", a1));
        assert!(!reg.remove("job-a", a1));
        assert_eq!(reg.callbacks_for("job-a").len(), 1);

        assert_eq!(reg.remove_all("job-a"), 1);
        assert!(!reg.contains("job-a"));
        assert_eq!(reg.remove_all("job-b"), 1);
        assert!(reg.is_empty());
    }

    #[test]
    fn removed_handles_cannot_begin() {
        let reg = CallbackRegistry::new();
        let id = reg.add("job-a", keep());
        let stale = reg.callbacks_for("job-a").remove(0);

        assert!(stale.try_begin());
        assert!(!stale.try_begin());
        stale.finish();

        reg.remove("job-a", id);
        assert!(stale.is_retired());
        assert!(!stale.try_begin());
    }

    #[tokio::test]
    async fn invoke_runs_the_closure() {
        let reg = CallbackRegistry::new();
        reg.add(
            "job-a",
            callback(|status: JobStatus| async move {
                if status.is_finished() {
                    CallbackOutcome::Unregister
                } else {
                    CallbackOutcome::Keep
                }
            }),
        );
        let handle = reg.callbacks_for("job-a").remove(0);
        assert_eq!(
            handle.invoke(JobStatus::new("job-a", 2, 1)).await,
            CallbackOutcome::Keep
        );
        assert_eq!(
            handle.invoke(JobStatus::new("job-a", 2, 2)).await,
            CallbackOutcome::Unregister
        );
    }
}
