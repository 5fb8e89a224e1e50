//! Priority task queue shared by the enrichment workers, mirrored into storage.
//!
//! At most one task per token is pending at a time. The in-memory heap uses
//! lazy deletion: replacing a token's task bumps its sequence number and the
//! old heap entry is skipped when it surfaces. A task stays in the durable
//! table while in flight, so a crash mid-stage re-runs that stage on restore.

use super::stage::StageTable;
use super::task::{EnrichmentTask, PriorityClass};
use crate::clock::Clock;
use crate::storage::{QueueEntry, Storage};
use crate::types::Address;
use anyhow::{Context, Result};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, info, warn};

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<Reverse<(i64, u64, Address)>>,
    pending: HashMap<Address, (u64, EnrichmentTask)>,
    in_flight: HashSet<Address>,
    next_seq: u64,
}

impl QueueState {
    fn insert(&mut self, task: EnrichmentTask) {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.heap
            .push(Reverse((task.ordering_score(), seq, task.token.clone())));
        self.pending.insert(task.token.clone(), (seq, task));
    }

    /// Drop heap entries that no longer match a pending task.
    fn clean_top(&mut self) {
        loop {
            let superseded = match self.heap.peek() {
                Some(Reverse((_, seq, token))) => self
                    .pending
                    .get(token)
                    .map_or(true, |(current, _)| current != seq),
                None => false,
            };
            if !superseded {
                break;
            }
            self.heap.pop();
        }
    }

    fn peek(&mut self) -> Option<&EnrichmentTask> {
        self.clean_top();
        let Reverse((_, _, token)) = self.heap.peek()?;
        self.pending.get(token).map(|(_, task)| task)
    }
}

/// Outcome counts of a restore pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    pub stale: usize,
    pub corrupt: usize,
    /// Entries whose delete failed; they stay durable and are retried on the next restore
    pub failed: usize,
}

pub struct TaskQueue {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl TaskQueue {
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            storage,
            clock,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        })
    }

    fn entry_for(task: &EnrichmentTask) -> Result<QueueEntry> {
        Ok(QueueEntry {
            token: task.token.clone(),
            ordering_score: task.ordering_score(),
            payload: serde_json::to_string(task).context("Failed to encode task")?,
        })
    }

    /// Persist then enqueue. Replaces any pending task for the same token.
    pub async fn push(&self, task: EnrichmentTask) -> Result<()> {
        self.storage
            .upsert_queue_entry(&Self::entry_for(&task)?)
            .await?;
        debug!(
            "Queued {} stage {} at {}",
            task.token, task.stage, task.scheduled_time
        );
        self.state.lock().await.insert(task);
        self.notify.notify_one();
        Ok(())
    }

    /// Take the earliest task if it is due at `now`.
    pub async fn pop_due(&self, now: u64) -> Option<EnrichmentTask> {
        let mut state = self.state.lock().await;
        if state.peek()?.ready_time() > now {
            return None;
        }
        let Reverse((_, _, token)) = state.heap.pop()?;
        let (_, task) = state.pending.remove(&token)?;
        state.in_flight.insert(token);
        Some(task)
    }

    async fn next_ready_time(&self) -> Option<u64> {
        self.state.lock().await.peek().map(|task| task.ready_time())
    }

    /// Wait for the next due task. Returns `None` once shutdown is signalled.
    pub async fn next_due(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        idle_poll: Duration,
    ) -> Option<EnrichmentTask> {
        loop {
            if *shutdown.borrow() {
                return None;
            }
            let now = self.clock.now_ms();
            if let Some(task) = self.pop_due(now).await {
                return Some(task);
            }

            let wait = match self.next_ready_time().await {
                Some(at) => Duration::from_millis(at.saturating_sub(now)).min(idle_poll),
                None => idle_poll,
            };

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    /// Finish an in-flight task: enqueue its successor, or drop its durable entry.
    pub async fn complete(&self, token: &str, next: Option<EnrichmentTask>) -> Result<()> {
        let result = match next {
            Some(task) => self.push(task).await,
            None => self.storage.delete_queue_entry(token).await,
        };
        self.state.lock().await.in_flight.remove(token);
        result
    }

    /// Move a pending task to `now` with urgent priority.
    ///
    /// Returns false when nothing is pending, including when a worker already
    /// took the task. The state lock is held across the durable write so a
    /// concurrent `pop_due` cannot take the task between lookup and replacement.
    pub async fn pull_forward(&self, token: &str, now: u64) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some((_, pending)) = state.pending.get(token) else {
            return Ok(false);
        };

        let mut task = pending.clone();
        task.scheduled_time = task.scheduled_time.min(now);
        task.retry_at = None;
        task.priority = PriorityClass::Urgent;
        self.storage
            .upsert_queue_entry(&Self::entry_for(&task)?)
            .await?;
        info!("Pulling {} forward to stage {} now", token, task.stage);
        state.insert(task);
        drop(state);
        self.notify.notify_one();
        Ok(true)
    }

    /// Reload pending tasks after a restart.
    ///
    /// Undecodable entries and entries that are already stale are deleted one
    /// by one; survivors get their ordering score recomputed. A storage error
    /// on one entry is counted and never stops the rest from loading.
    pub async fn restore(&self, stages: &StageTable) -> Result<RestoreReport> {
        let entries = self.storage.load_queue_entries().await?;
        let now = self.clock.now_ms();
        let mut report = RestoreReport::default();

        for entry in entries {
            let task = match serde_json::from_str::<EnrichmentTask>(&entry.payload) {
                Ok(task) if task.token == entry.token => task,
                Ok(_) | Err(_) => {
                    warn!("Dropping corrupt queue entry for {}", entry.token);
                    if self.drop_entry(&entry.token, &mut report).await {
                        report.corrupt += 1;
                    }
                    continue;
                }
            };

            let Some(stage) = stages.get(task.stage) else {
                warn!(
                    "Dropping queue entry for {}: stage {} no longer exists",
                    task.token, task.stage
                );
                if self.drop_entry(&entry.token, &mut report).await {
                    report.corrupt += 1;
                }
                continue;
            };

            if task.age_ms(now) > stage.max_staleness_ms() {
                debug!("Dropping stale {} stage {}", task.token, stage.name);
                if self.drop_entry(&entry.token, &mut report).await {
                    report.stale += 1;
                }
                continue;
            }

            if task.ordering_score() != entry.ordering_score {
                let written = match Self::entry_for(&task) {
                    Ok(rescored) => self.storage.upsert_queue_entry(&rescored).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    warn!("Failed to re-score queue entry for {}: {:#}", task.token, e);
                }
            }
            self.state.lock().await.insert(task);
            report.restored += 1;
        }

        info!(
            "Queue restored: {} tasks, {} stale dropped, {} corrupt dropped, {} storage failures",
            report.restored, report.stale, report.corrupt, report.failed
        );
        if report.restored > 0 {
            self.notify.notify_one();
        }
        Ok(report)
    }

    /// Delete one durable entry during restore. Returns false (and counts it) on failure.
    async fn drop_entry(&self, token: &str, report: &mut RestoreReport) -> bool {
        match self.storage.delete_queue_entry(token).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to delete queue entry for {}: {:#}", token, e);
                report.failed += 1;
                false
            }
        }
    }

    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn in_flight_len(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    pub async fn is_tracked(&self, token: &str) -> bool {
        let state = self.state.lock().await;
        state.pending.contains_key(token) || state.in_flight.contains(token)
    }

    pub async fn pending_task(&self, token: &str) -> Option<EnrichmentTask> {
        self.state
            .lock()
            .await
            .pending
            .get(token)
            .map(|(_, task)| task.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::SqliteStorage;

    async fn create_test_queue(now: u64) -> (Arc<TaskQueue>, Arc<SqliteStorage>, Arc<ManualClock>) {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(now));
        let queue = TaskQueue::new(storage.clone(), clock.clone());
        (queue, storage, clock)
    }

    #[tokio::test]
    async fn test_pop_respects_time_then_priority() {
        let (queue, _, _) = create_test_queue(0).await;
        queue
            .push(EnrichmentTask::first_stage("normal", 0, 5_000, PriorityClass::Normal))
            .await
            .unwrap();
        queue
            .push(EnrichmentTask::first_stage("urgent", 0, 5_000, PriorityClass::Urgent))
            .await
            .unwrap();
        queue
            .push(EnrichmentTask::first_stage("later", 1_000, 5_000, PriorityClass::Urgent))
            .await
            .unwrap();

        assert!(queue.pop_due(4_999).await.is_none());
        assert_eq!(queue.pop_due(5_000).await.unwrap().token, "urgent");
        assert_eq!(queue.pop_due(5_000).await.unwrap().token, "normal");
        assert!(queue.pop_due(5_000).await.is_none());
        assert_eq!(queue.pop_due(6_000).await.unwrap().token, "later");
        assert_eq!(queue.in_flight_len().await, 3);
    }

    #[tokio::test]
    async fn test_push_replaces_pending_task() {
        let (queue, storage, _) = create_test_queue(0).await;
        queue
            .push(EnrichmentTask::first_stage("mint", 0, 5_000, PriorityClass::Normal))
            .await
            .unwrap();
        queue
            .push(EnrichmentTask::first_stage("mint", 0, 1_000, PriorityClass::Normal))
            .await
            .unwrap();

        assert_eq!(queue.pending_len().await, 1);
        assert_eq!(queue.pop_due(1_000).await.unwrap().scheduled_time, 1_000);
        assert!(queue.pop_due(10_000).await.is_none());
        assert_eq!(storage.load_queue_entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_complete_without_successor_removes_durable_entry() {
        let (queue, storage, _) = create_test_queue(0).await;
        queue
            .push(EnrichmentTask::first_stage("mint", 0, 0, PriorityClass::Normal))
            .await
            .unwrap();
        let task = queue.pop_due(0).await.unwrap();
        assert_eq!(storage.load_queue_entries().await.unwrap().len(), 1);

        queue.complete(&task.token, None).await.unwrap();
        assert!(storage.load_queue_entries().await.unwrap().is_empty());
        assert!(!queue.is_tracked("mint").await);
    }

    #[tokio::test]
    async fn test_pull_forward_makes_task_urgent_and_due() {
        let (queue, _, _) = create_test_queue(0).await;
        queue
            .push(EnrichmentTask::first_stage("mint", 0, 60_000, PriorityClass::Normal))
            .await
            .unwrap();

        assert!(queue.pull_forward("mint", 2_000).await.unwrap());
        assert!(!queue.pull_forward("unknown", 2_000).await.unwrap());

        let task = queue.pop_due(2_000).await.unwrap();
        assert_eq!(task.priority, PriorityClass::Urgent);
        assert_eq!(task.scheduled_time, 2_000);
    }

    #[tokio::test]
    async fn test_pull_forward_leaves_in_flight_task_alone() {
        let (queue, storage, _) = create_test_queue(0).await;
        queue
            .push(EnrichmentTask::first_stage("mint", 0, 0, PriorityClass::Normal))
            .await
            .unwrap();
        let task = queue.pop_due(0).await.unwrap();

        assert!(!queue.pull_forward("mint", 1_000).await.unwrap());
        assert_eq!(queue.pending_len().await, 0);
        assert!(queue.pop_due(1_000).await.is_none());

        queue.complete(&task.token, None).await.unwrap();
        assert!(storage.load_queue_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_is_held_until_its_backoff_expires() {
        let (queue, _, _) = create_test_queue(0).await;
        let task = EnrichmentTask::first_stage("mint", 0, 5_000, PriorityClass::Normal);
        queue.push(task.retry(1, 7_000)).await.unwrap();

        assert!(queue.pop_due(6_999).await.is_none());
        let popped = queue.pop_due(7_000).await.unwrap();
        assert_eq!(popped.scheduled_time, 5_000);
        assert_eq!(popped.attempts, 1);
    }

    #[tokio::test]
    async fn test_next_due_returns_none_on_shutdown() {
        let (queue, _, _) = create_test_queue(0).await;
        let (tx, mut rx) = watch::channel(false);
        let handle = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next_due(&mut rx, Duration::from_millis(20)).await })
        };
        tx.send(true).unwrap();
        assert!(handle.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restore_drops_corrupt_and_stale_entries() {
        let (queue, storage, _) = create_test_queue(100_000).await;
        let stages = StageTable::default();

        let fresh = EnrichmentTask::first_stage("fresh", 95_000, 5_000, PriorityClass::Normal);
        let stale = EnrichmentTask::first_stage("stale", 0, 5_000, PriorityClass::Normal);
        for task in [&fresh, &stale] {
            storage
                .upsert_queue_entry(&QueueEntry {
                    token: task.token.clone(),
                    ordering_score: 1,
                    payload: serde_json::to_string(task).unwrap(),
                })
                .await
                .unwrap();
        }
        storage
            .upsert_queue_entry(&QueueEntry {
                token: "broken".to_string(),
                ordering_score: 0,
                payload: "{not json".to_string(),
            })
            .await
            .unwrap();

        let report = queue.restore(&stages).await.unwrap();
        assert_eq!(
            report,
            RestoreReport {
                restored: 1,
                stale: 1,
                corrupt: 1,
                failed: 0
            }
        );

        let entries = storage.load_queue_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].ordering_score, fresh.ordering_score());
        assert_eq!(queue.pending_task("fresh").await, Some(fresh));
    }
}
