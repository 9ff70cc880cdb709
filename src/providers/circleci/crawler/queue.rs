use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

/// Shared work-list with a completion barrier.
///
/// `outstanding` counts tasks that were pushed but not yet marked done,
/// whether they are still queued or being processed. The queue is drained
/// once that count reaches zero; at that point no task can produce new
/// work, so waiting consumers are released.
pub(super) struct TaskQueue<T> {
    state: Mutex<QueueState<T>>,
    changed: Notify,
}

struct QueueState<T> {
    pending: VecDeque<T>,
    outstanding: usize,
}

impl<T> TaskQueue<T> {
    pub(super) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                outstanding: 0,
            }),
            changed: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn push(&self, task: T) {
        {
            let mut state = self.lock();
            state.outstanding += 1;
            state.pending.push_back(task);
        }
        self.changed.notify_waiters();
    }

    /// Marks one previously returned task as processed.
    pub(super) fn task_done(&self) {
        let drained = {
            let mut state = self.lock();
            debug_assert!(state.outstanding > 0, "task_done without a task");
            state.outstanding = state.outstanding.saturating_sub(1);
            state.outstanding == 0
        };
        if drained {
            self.changed.notify_waiters();
        }
    }

    pub(super) fn outstanding(&self) -> usize {
        self.lock().outstanding
    }

    /// Next queued task, or `None` once the queue is drained.
    pub(super) async fn next(&self) -> Option<T> {
        loop {
            let changed = self.changed.notified();
            tokio::pin!(changed);
            // Register before inspecting the state so a push or the final
            // task_done between the check and the await is not missed.
            changed.as_mut().enable();
            {
                let mut state = self.lock();
                if let Some(task) = state.pending.pop_front() {
                    return Some(task);
                }
                if state.outstanding == 0 {
                    return None;
                }
            }
            changed.await;
        }
    }

    /// Blocks until every task ever pushed has been marked done.
    pub(super) async fn join(&self) {
        loop {
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();
            let drained = self.lock().outstanding == 0;
            if drained {
                return;
            }
            changed.await;
        }
    }
}
