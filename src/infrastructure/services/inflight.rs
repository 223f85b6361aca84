//! At most one request in flight per logical action

use crate::domain::shared::generation::{Generation, GenerationTracker};
use std::future::Future;
use std::sync::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::debug;

/// Starting a new run aborts the previous one; a superseded run resolves to `None`
pub struct ActionSlot {
    name: &'static str,
    state: Mutex<SlotState>,
}

struct SlotState {
    generations: GenerationTracker<&'static str>,
    running: Option<AbortHandle>,
}

/// A run that holds the slot from the moment it was started
pub struct Claim<T> {
    generation: Generation,
    task: JoinHandle<T>,
}

impl ActionSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(SlotState {
                generations: GenerationTracker::new(),
                running: None,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Spawn `action` and take the slot right away, aborting the previous run
    ///
    /// Ordering between runs follows the order of `start` calls, not the
    /// order in which their results are awaited.
    pub fn start<F>(&self, action: F) -> Option<Claim<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let task = tokio::spawn(action);
        let generation = self.install(task.abort_handle())?;
        Some(Claim { generation, task })
    }

    /// Wait for a started run; `None` if it was superseded or cancelled
    pub async fn settle<T>(&self, claim: Claim<T>) -> Option<T> {
        let outcome = claim.task.await;

        if !self.finish(claim.generation) {
            debug!("Discarding stale {} result ({})", self.name, claim.generation);
            return None;
        }

        outcome.ok()
    }

    /// Run `action` as the only live instance of this slot
    pub async fn run<F>(&self, action: F) -> Option<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let claim = self.start(action)?;
        self.settle(claim).await
    }

    /// Abort whatever is running
    pub fn cancel(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.generations.retire(&self.name);
            if let Some(running) = state.running.take() {
                running.abort();
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.state.lock().map(|s| s.running.is_some()).unwrap_or(false)
    }

    fn install(&self, handle: AbortHandle) -> Option<Generation> {
        let Ok(mut state) = self.state.lock() else {
            handle.abort();
            return None;
        };
        let generation = state.generations.advance(self.name);
        if let Some(previous) = state.running.replace(handle) {
            debug!("Aborting previous {} request", self.name);
            previous.abort();
        }
        Some(generation)
    }

    fn finish(&self, generation: Generation) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        if !state.generations.is_current(&self.name, generation) {
            return false;
        }
        state.running = None;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_single_run_returns_output() {
        let slot = ActionSlot::new("assistant");
        assert_eq!(slot.run(async { 7 }).await, Some(7));
        assert!(!slot.is_busy());
    }

    #[tokio::test]
    async fn test_new_run_supersedes_pending_one() {
        let slot = Arc::new(ActionSlot::new("assistant"));

        let first = {
            let slot = slot.clone();
            tokio::spawn(async move {
                slot.run(async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "first"
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(slot.is_busy());

        let second = slot.run(async { "second" }).await;

        assert_eq!(second, Some("second"));
        assert_eq!(first.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_start_order_decides_the_winner() {
        let slot = ActionSlot::new("assistant");

        let first = slot.start(async { "first" }).unwrap();
        let second = slot.start(async { "second" }).unwrap();

        // settling out of order does not revive the older run
        assert_eq!(slot.settle(second).await, Some("second"));
        assert_eq!(slot.settle(first).await, None);
        assert!(!slot.is_busy());
    }

    #[tokio::test]
    async fn test_cancel_discards_result() {
        let slot = Arc::new(ActionSlot::new("translate"));

        let pending = {
            let slot = slot.clone();
            tokio::spawn(async move {
                slot.run(async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        slot.cancel();
        assert_eq!(pending.await.unwrap(), None);
        assert!(!slot.is_busy());
    }
}
