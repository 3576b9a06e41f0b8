//! Completion barrier: run a continuation once a fixed set of named events
//! have all happened, in whatever order they arrive.

use relay_types::{RelayError, RelayResult};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::debug;

type Continuation = Box<dyn FnOnce() + Send>;

struct BarrierState {
    flags: BTreeMap<String, bool>,
    continuation: Option<Continuation>,
}

struct BarrierInner {
    state: Mutex<BarrierState>,
    done: watch::Sender<bool>,
}

/// A set of named flags with a one-shot continuation. Clones share state.
#[derive(Clone)]
pub struct CompletionBarrier {
    inner: Arc<BarrierInner>,
}

impl std::fmt::Debug for CompletionBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionBarrier")
            .field("pending", &self.pending())
            .field("complete", &self.is_complete())
            .finish()
    }
}

impl CompletionBarrier {
    /// Track `names`; `continuation` runs exactly once, after the last one
    /// is marked. With no names it runs immediately.
    pub fn new<I, S, F>(names: I, continuation: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnOnce() + Send + 'static,
    {
        let flags: BTreeMap<String, bool> = names.into_iter().map(|n| (n.into(), false)).collect();
        let (done, _) = watch::channel(false);
        let barrier = Self {
            inner: Arc::new(BarrierInner {
                state: Mutex::new(BarrierState {
                    flags,
                    continuation: Some(Box::new(continuation)),
                }),
                done,
            }),
        };
        barrier.fire_if_complete();
        barrier
    }

    /// Set the flag `name`. Marking twice is a no-op. Returns whether this
    /// call completed the barrier.
    pub fn mark(&self, name: &str) -> RelayResult<bool> {
        {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            match state.flags.get_mut(name) {
                Some(flag) => *flag = true,
                None => return Err(RelayError::UnknownBarrierFlag(name.to_string())),
            }
        }
        debug!(flag = name, "Barrier flag set");
        Ok(self.fire_if_complete())
    }

    pub fn is_complete(&self) -> bool {
        *self.inner.done.borrow()
    }

    /// Names not yet marked, sorted.
    pub fn pending(&self) -> Vec<String> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .flags
            .iter()
            .filter(|(_, set)| !**set)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Wait until every flag is set and the continuation has run.
    pub async fn wait(&self) {
        let mut done = self.inner.done.subscribe();
        let _ = done.wait_for(|done| *done).await;
    }

    fn fire_if_complete(&self) -> bool {
        let continuation = {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            if !state.flags.values().all(|set| *set) {
                return false;
            }
            state.continuation.take()
        };
        // The lock is released before running user code.
        match continuation {
            Some(continuation) => {
                continuation();
                self.inner.done.send_replace(true);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(names: &[&str]) -> (CompletionBarrier, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let barrier = CompletionBarrier::new(names.iter().copied(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (barrier, runs)
    }

    #[test]
    fn test_runs_once_in_any_order() {
        for order in [["a", "b"], ["b", "a"]] {
            let (barrier, runs) = counting(&["a", "b"]);
            assert!(!barrier.mark(order[0]).unwrap());
            assert_eq!(runs.load(Ordering::SeqCst), 0);
            assert!(barrier.mark(order[1]).unwrap());
            assert_eq!(runs.load(Ordering::SeqCst), 1);
            assert!(!barrier.mark(order[0]).unwrap());
            assert!(!barrier.mark(order[1]).unwrap());
            assert_eq!(runs.load(Ordering::SeqCst), 1);
            assert!(barrier.is_complete());
        }
    }

    #[test]
    fn test_unknown_flag_rejected() {
        let (barrier, runs) = counting(&["a"]);
        assert!(matches!(
            barrier.mark("z"),
            Err(RelayError::UnknownBarrierFlag(name)) if name == "z"
        ));
        assert_eq!(barrier.pending(), vec!["a".to_string()]);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_barrier_fires_immediately() {
        let (barrier, runs) = counting(&[]);
        assert!(barrier.is_complete());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wait_wakes_on_completion() {
        let (barrier, _runs) = counting(&["x", "y"]);
        let waiter = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.wait().await })
        };
        barrier.mark("y").unwrap();
        barrier.mark("x").unwrap();
        waiter.await.unwrap();
        assert!(barrier.pending().is_empty());
    }
}
