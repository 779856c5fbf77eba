use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::fingerprint::RequestFingerprint;

/// Opaque identifier of one transport task (or of one logical request while
/// it is registered for cancellation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Cancel action for a registered task. Consumed when fired, so it can run at
/// most once.
pub struct CancelHandle {
    task: TaskHandle,
    action: Box<dyn FnOnce() + Send>,
}

impl CancelHandle {
    pub fn new(task: TaskHandle, action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            task,
            action: Box::new(action),
        }
    }

    pub fn task(&self) -> TaskHandle {
        self.task
    }

    fn fire(self) {
        (self.action)()
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("task", &self.task)
            .finish_non_exhaustive()
    }
}

/// Thread-safe map from request fingerprint to the cancel handles of the
/// requests currently in flight under it.
///
/// Every operation holds the lock only long enough to insert or take entries;
/// cancel actions always run after the lock is released.
#[derive(Default)]
pub struct CancellableTaskRegistry {
    entries: Mutex<HashMap<RequestFingerprint, Vec<CancelHandle>>>,
    next_handle: AtomicU64,
}

impl CancellableTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_handle(&self) -> TaskHandle {
        TaskHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn register(&self, identity: RequestFingerprint, handle: CancelHandle) {
        debug!(fingerprint = %identity, task = %handle.task(), "registry.register");
        self.lock().entry(identity).or_default().push(handle);
    }

    /// Cancels every task registered under `identity` and forgets them.
    /// Returns false when nothing was registered.
    pub fn cancel(&self, identity: &RequestFingerprint) -> bool {
        let handles = self.lock().remove(identity);
        match handles {
            Some(handles) if !handles.is_empty() => {
                debug!(fingerprint = %identity, count = handles.len(), "registry.cancel");
                for handle in handles {
                    handle.fire();
                }
                true
            }
            _ => false,
        }
    }

    /// Forgets every task under `identity` without cancelling them.
    pub fn remove(&self, identity: &RequestFingerprint) {
        self.lock().remove(identity);
    }

    /// Forgets the single task `task` under `identity`, leaving any other
    /// request with the same fingerprint registered. Returns false if the
    /// task was already gone (completed or cancelled).
    pub fn release(&self, identity: &RequestFingerprint, task: TaskHandle) -> bool {
        let mut entries = self.lock();
        let Some(handles) = entries.get_mut(identity) else {
            return false;
        };
        let before = handles.len();
        handles.retain(|h| h.task() != task);
        let released = handles.len() != before;
        if handles.is_empty() {
            entries.remove(identity);
        }
        released
    }

    pub fn contains(&self, identity: &RequestFingerprint) -> bool {
        self.lock().contains_key(identity)
    }

    /// Number of registered tasks across all fingerprints.
    pub fn len(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RequestFingerprint, Vec<CancelHandle>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::types::HttpMethod;

    fn fp(path: &str) -> RequestFingerprint {
        RequestFingerprint::new(HttpMethod::Get, path, &HashMap::new())
    }

    fn counting_handle(registry: &CancellableTaskRegistry, fired: &Arc<AtomicUsize>) -> CancelHandle {
        let fired = Arc::clone(fired);
        CancelHandle::new(registry.next_handle(), move || {
            fired.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn cancel_fires_once_and_removes() {
        let registry = CancellableTaskRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        registry.register(fp("/a"), counting_handle(&registry, &fired));

        assert!(registry.cancel(&fp("/a")));
        assert!(!registry.cancel(&fp("/a")));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn release_only_drops_matching_task() {
        let registry = CancellableTaskRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let first = counting_handle(&registry, &fired);
        let first_task = first.task();
        registry.register(fp("/a"), first);
        registry.register(fp("/a"), counting_handle(&registry, &fired));

        assert!(registry.release(&fp("/a"), first_task));
        assert!(!registry.release(&fp("/a"), first_task));
        assert_eq!(registry.len(), 1);

        assert!(registry.cancel(&fp("/a")));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_does_not_fire() {
        let registry = CancellableTaskRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        registry.register(fp("/a"), counting_handle(&registry, &fired));
        registry.remove(&fp("/a"));
        assert!(!registry.contains(&fp("/a")));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn concurrent_cancel_and_release_fire_at_most_once() {
        for _ in 0..200 {
            let registry = Arc::new(CancellableTaskRegistry::new());
            let fired = Arc::new(AtomicUsize::new(0));
            let handle = counting_handle(&registry, &fired);
            let task = handle.task();
            registry.register(fp("/race"), handle);

            let canceller = {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.cancel(&fp("/race")))
            };
            let releaser = {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.release(&fp("/race"), task))
            };
            let cancelled = canceller.join().unwrap();
            let released = releaser.join().unwrap();

            assert!(cancelled ^ released, "exactly one side must win");
            assert_eq!(fired.load(Ordering::SeqCst), usize::from(cancelled));
            assert!(registry.is_empty());
        }
    }
}
