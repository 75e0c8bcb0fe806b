//! Two-class priority queue with a concurrency limit
//!
//! Jobs are keyed by [`ResourceKey`]. A key lives in at most one of the low
//! queue, the high queue or the active set. Adding a key that is already
//! known never duplicates it; a low-priority key re-added as high is
//! promoted instead.

use crate::{Priority, ResourceKey};
use futures::future::{BoxFuture, FutureExt};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// Deferred unit of work, handed its slot when dispatched
type Job = Box<dyn FnOnce(ActiveSlot) -> BoxFuture<'static, ()> + Send>;

/// Outcome of [`TaskQueue::add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The key was new and has been queued
    Queued,
    /// The key was queued as low priority and moved to the high queue
    Promoted,
    /// The key is already queued in a class at least as high
    AlreadyQueued,
    /// The key is currently running
    AlreadyActive,
}

impl Admission {
    /// Check if the call changed the queue
    pub fn changed(self) -> bool {
        matches!(self, Admission::Queued | Admission::Promoted)
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Jobs waiting in the high queue
    pub queued_high: usize,
    /// Jobs waiting in the low queue
    pub queued_low: usize,
    /// Jobs currently running
    pub active: usize,
    /// Concurrency limit
    pub limit: usize,
    /// Jobs dispatched since creation
    pub dispatched: u64,
    /// Promotions since creation
    pub promoted: u64,
}

impl QueueStats {
    /// Total queued jobs
    pub fn queued(&self) -> usize {
        self.queued_high + self.queued_low
    }
}

#[derive(Default)]
struct QueueState {
    low: IndexMap<ResourceKey, Job>,
    high: IndexMap<ResourceKey, Job>,
    active: HashSet<ResourceKey>,
    drain_scheduled: bool,
    dispatched: u64,
    promoted: u64,
}

impl QueueState {
    fn queued(&self) -> usize {
        self.low.len() + self.high.len()
    }

    /// High first, FIFO within a class
    fn pop_next(&mut self) -> Option<(ResourceKey, Job)> {
        self.high
            .shift_remove_index(0)
            .or_else(|| self.low.shift_remove_index(0))
    }
}

struct QueueInner {
    limit: usize,
    state: Mutex<QueueState>,
}

/// Priority queue that runs a limited number of jobs at a time.
///
/// Dispatch is always deferred to the tokio runtime: `add` only records the
/// job and schedules a drain, so jobs added within the same scheduler turn
/// are ordered by class before the first one starts. Cloning the queue is
/// cheap and every clone shares the same state.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl TaskQueue {
    /// Create a queue running at most `limit` jobs at once (minimum 1)
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                limit: limit.max(1),
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a job to the queue.
    ///
    /// The slot is held until the job settles. Must be called from within a
    /// tokio runtime.
    pub fn add<F, Fut>(&self, key: ResourceKey, work: F, priority: Priority) -> Admission
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.add_with_slot(
            key,
            move |slot| async move {
                let _slot = slot;
                work().await;
            },
            priority,
        )
    }

    /// Add a job that receives its [`ActiveSlot`] when dispatched.
    ///
    /// The job may release the slot before it finishes; otherwise the slot
    /// is released when the job settles.
    pub fn add_with_slot<F, Fut>(&self, key: ResourceKey, work: F, priority: Priority) -> Admission
    where
        F: FnOnce(ActiveSlot) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let admission = {
            let mut state = self.state();

            let admission = if state.active.contains(&key) {
                Admission::AlreadyActive
            } else if state.high.contains_key(&key) {
                Admission::AlreadyQueued
            } else if state.low.contains_key(&key) {
                if priority.is_high() {
                    // Keep the job that was queued first
                    match state.low.shift_remove(&key) {
                        Some(job) => {
                            state.high.insert(key.clone(), job);
                            state.promoted += 1;
                            Admission::Promoted
                        }
                        None => Admission::AlreadyQueued,
                    }
                } else {
                    Admission::AlreadyQueued
                }
            } else {
                let job: Job = Box::new(move |slot| work(slot).boxed());
                match priority {
                    Priority::High => state.high.insert(key.clone(), job),
                    Priority::Low => state.low.insert(key.clone(), job),
                };
                Admission::Queued
            };

            if admission.changed() && !state.drain_scheduled {
                state.drain_scheduled = true;
                let queue = self.clone();
                tokio::spawn(async move {
                    queue.state().drain_scheduled = false;
                    queue.drain();
                });
            }

            admission
        };

        trace!("queue add {} ({}): {:?}", key, priority, admission);
        admission
    }

    /// Dispatch queued jobs until the limit is reached or the queue is empty
    fn drain(&self) {
        let ready: Vec<(ResourceKey, Job)> = {
            let mut state = self.state();
            let mut ready = Vec::new();

            while state.active.len() < self.inner.limit {
                let Some((key, job)) = state.pop_next() else {
                    break;
                };
                state.active.insert(key.clone());
                state.dispatched += 1;
                ready.push((key, job));
            }

            ready
        };

        for (key, job) in ready {
            debug!("Dispatching preload job for {}", key);
            let slot = ActiveSlot {
                queue: self.clone(),
                key,
            };
            tokio::spawn(job(slot));
        }
    }

    fn release(&self, key: &ResourceKey) {
        self.state().active.remove(key);
        self.drain();
    }

    /// Check if a key is queued or running
    pub fn has(&self, key: &ResourceKey) -> bool {
        let state = self.state();
        state.active.contains(key) || state.high.contains_key(key) || state.low.contains_key(key)
    }

    /// Check if a key is running
    pub fn is_active(&self, key: &ResourceKey) -> bool {
        self.state().active.contains(key)
    }

    /// Class a key is queued in, if it is waiting
    pub fn queued_priority(&self, key: &ResourceKey) -> Option<Priority> {
        let state = self.state();
        if state.high.contains_key(key) {
            Some(Priority::High)
        } else if state.low.contains_key(key) {
            Some(Priority::Low)
        } else {
            None
        }
    }

    /// Number of queued jobs (both classes)
    pub fn len(&self) -> usize {
        self.state().queued()
    }

    /// Check if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of running jobs
    pub fn active_count(&self) -> usize {
        self.state().active.len()
    }

    /// Concurrency limit
    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// Drop every queued job. Running jobs are not affected.
    pub fn clear(&self) -> usize {
        let (low, high) = {
            let mut state = self.state();
            (
                std::mem::take(&mut state.low),
                std::mem::take(&mut state.high),
            )
        };
        let dropped = low.len() + high.len();
        if dropped > 0 {
            debug!("Dropped {} queued preload jobs", dropped);
        }
        dropped
    }

    /// Get queue statistics
    pub fn stats(&self) -> QueueStats {
        let state = self.state();
        QueueStats {
            queued_high: state.high.len(),
            queued_low: state.low.len(),
            active: state.active.len(),
            limit: self.inner.limit,
            dispatched: state.dispatched,
            promoted: state.promoted,
        }
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Occupied slot of a running job.
///
/// Frees the slot and refills it when dropped. A job owns its slot, so the
/// slot is freed when the job settles, including when it panics.
pub struct ActiveSlot {
    queue: TaskQueue,
    key: ResourceKey,
}

impl ActiveSlot {
    /// Key occupying the slot
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Free the slot before the job finishes
    pub fn release(self) {
        drop(self);
    }
}

impl std::fmt::Debug for ActiveSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ActiveSlot").field(&self.key).finish()
    }
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.queue.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{mpsc, oneshot};

    fn key(s: &str) -> ResourceKey {
        ResourceKey::from(s)
    }

    fn recorder(
        queue: &TaskQueue,
        tx: &mpsc::UnboundedSender<&'static str>,
        name: &'static str,
        priority: Priority,
    ) -> Admission {
        let tx = tx.clone();
        queue.add(
            key(name),
            move || async move {
                let _ = tx.send(name);
            },
            priority,
        )
    }

    async fn collect(rx: &mut mpsc::UnboundedReceiver<&'static str>, n: usize) -> Vec<&'static str> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(rx.recv().await.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_high_dispatches_before_low() {
        let queue = TaskQueue::new(1);
        let (tx, mut rx) = mpsc::unbounded_channel();

        recorder(&queue, &tx, "a", Priority::Low);
        recorder(&queue, &tx, "b", Priority::Low);
        recorder(&queue, &tx, "c", Priority::High);

        assert_eq!(collect(&mut rx, 3).await, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_repeated_adds_run_once() {
        let queue = TaskQueue::new(1);
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();

        for _ in 0..5 {
            let runs = runs.clone();
            queue.add(
                key("same"),
                move || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                },
                Priority::Low,
            );
        }
        recorder(&queue, &tx, "after", Priority::Low);

        collect(&mut rx, 1).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_promotion_moves_low_job() {
        let queue = TaskQueue::new(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        let blocker_tx = tx.clone();
        queue.add(
            key("blocker"),
            move || async move {
                let _ = gate_rx.await;
                let _ = blocker_tx.send("blocker");
            },
            Priority::Low,
        );
        tokio::task::yield_now().await;
        assert!(queue.is_active(&key("blocker")));

        recorder(&queue, &tx, "a", Priority::Low);
        recorder(&queue, &tx, "b", Priority::Low);
        assert_eq!(recorder(&queue, &tx, "b", Priority::High), Admission::Promoted);
        assert_eq!(queue.queued_priority(&key("b")), Some(Priority::High));
        assert_eq!(queue.len(), 2);

        gate_tx.send(()).unwrap();
        assert_eq!(collect(&mut rx, 3).await, vec!["blocker", "b", "a"]);
        assert_eq!(queue.stats().promoted, 1);

        // b ran exactly once even though it was added twice
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_high_is_never_demoted() {
        let queue = TaskQueue::new(1);
        let (tx, _rx) = mpsc::unbounded_channel();

        assert_eq!(recorder(&queue, &tx, "k", Priority::High), Admission::Queued);
        assert_eq!(recorder(&queue, &tx, "k", Priority::Low), Admission::AlreadyQueued);
        assert_eq!(recorder(&queue, &tx, "k", Priority::High), Admission::AlreadyQueued);
        assert_eq!(queue.queued_priority(&key("k")), Some(Priority::High));
    }

    #[tokio::test]
    async fn test_active_key_is_not_requeued() {
        let queue = TaskQueue::new(2);
        let (tx, _rx) = mpsc::unbounded_channel();
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        queue.add(
            key("slow"),
            move || async move {
                let _ = gate_rx.await;
            },
            Priority::Low,
        );
        tokio::task::yield_now().await;

        assert_eq!(recorder(&queue, &tx, "slow", Priority::High), Admission::AlreadyActive);
        assert!(queue.has(&key("slow")));
        assert_eq!(queue.len(), 0);

        gate_tx.send(()).unwrap();
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let queue = TaskQueue::new(3);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();

        for i in 0..12 {
            let current = current.clone();
            let peak = peak.clone();
            let tx = tx.clone();
            let priority = Priority::from(i % 3 == 0);
            queue.add(
                key(&format!("job-{}", i)),
                move || async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    for _ in 0..3 {
                        tokio::task::yield_now().await;
                    }
                    current.fetch_sub(1, Ordering::SeqCst);
                    let _ = tx.send("done");
                },
                priority,
            );
        }

        collect(&mut rx, 12).await;
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 2);
        assert_eq!(queue.stats().dispatched, 12);
    }

    #[tokio::test]
    async fn test_panicking_job_frees_its_slot() {
        let queue = TaskQueue::new(1);
        let (tx, mut rx) = mpsc::unbounded_channel();

        queue.add(
            key("broken"),
            || async {
                panic!("job failed");
            },
            Priority::High,
        );
        recorder(&queue, &tx, "next", Priority::Low);

        assert_eq!(collect(&mut rx, 1).await, vec!["next"]);
        tokio::task::yield_now().await;
        assert_eq!(queue.active_count(), 0);
    }

    #[tokio::test]
    async fn test_clear_drops_queued_only() {
        let queue = TaskQueue::new(1);
        let (tx, _rx) = mpsc::unbounded_channel();
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        queue.add(
            key("running"),
            move || async move {
                let _ = gate_rx.await;
            },
            Priority::Low,
        );
        tokio::task::yield_now().await;
        recorder(&queue, &tx, "waiting", Priority::Low);

        assert_eq!(queue.clear(), 1);
        assert!(queue.is_active(&key("running")));
        assert!(!queue.has(&key("waiting")));

        gate_tx.send(()).unwrap();
    }

    #[tokio::test]
    async fn test_released_slot_refills_before_job_ends() {
        let queue = TaskQueue::new(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        queue.add_with_slot(
            key("first"),
            move |slot| async move {
                assert_eq!(slot.key(), &key("first"));
                slot.release();
                let _ = gate_rx.await;
            },
            Priority::Low,
        );
        recorder(&queue, &tx, "second", Priority::Low);

        // The first job is still waiting on its gate
        assert_eq!(collect(&mut rx, 1).await, vec!["second"]);
        assert!(!queue.has(&key("first")));

        gate_tx.send(()).unwrap();
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        assert_eq!(TaskQueue::new(0).limit(), 1);
    }
}
