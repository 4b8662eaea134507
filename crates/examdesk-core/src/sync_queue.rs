//! Answer synchronisation.
//!
//! Short and essay answers are debounced per question: each change replaces
//! the pending write for that question and restarts its quiet period. At most
//! one buffered write per question is in flight; the next one waits for it.
//! All other updates are written straight away. Failures are reported and
//! never retried or rolled back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{broadcast, Mutex as WriteMutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SyncFailure;
use crate::model::{AnswerPayload, AnswerUpdate, ExamId, QuestionId, SyncPolicy};
use crate::traits::SessionService;

/// What happened to a submitted update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Held until the quiet period elapses.
    Scheduled,
    /// Acknowledged by the service.
    Written,
}

struct PendingWrite {
    seq: u64,
    payload: AnswerPayload,
    timer: JoinHandle<()>,
}

type Registry = Arc<Mutex<HashMap<QuestionId, PendingWrite>>>;

/// Held for the duration of a buffered write to one question.
type WriteLock = Arc<WriteMutex<()>>;

/// Per-session write queue in front of [`SessionService::upsert_answer`].
pub struct AnswerSyncQueue {
    exam_id: ExamId,
    service: Arc<dyn SessionService>,
    quiet_period: Duration,
    pending: Registry,
    write_locks: Mutex<HashMap<QuestionId, WriteLock>>,
    next_seq: AtomicU64,
    failures: broadcast::Sender<SyncFailure>,
}

impl AnswerSyncQueue {
    pub fn new(exam_id: ExamId, service: Arc<dyn SessionService>, quiet_period: Duration) -> Self {
        let (failures, _) = broadcast::channel(32);
        Self {
            exam_id,
            service,
            quiet_period,
            pending: Arc::new(Mutex::new(HashMap::new())),
            write_locks: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            failures,
        }
    }

    /// Failures of debounced writes, which have no caller to return to.
    pub fn subscribe_failures(&self) -> broadcast::Receiver<SyncFailure> {
        self.failures.subscribe()
    }

    /// Queue or write one update according to `policy`.
    ///
    /// Doubt flags are always written immediately.
    pub async fn submit(&self, update: AnswerUpdate, policy: SyncPolicy) -> Result<Submission, SyncFailure> {
        match (update, policy) {
            (AnswerUpdate::Payload { question_id, payload }, SyncPolicy::Buffered) => {
                self.schedule(question_id, payload);
                Ok(Submission::Scheduled)
            }
            (update, _) => {
                write(self.service.as_ref(), self.exam_id, &update).await?;
                Ok(Submission::Written)
            }
        }
    }

    fn write_lock(&self, question_id: QuestionId) -> WriteLock {
        let mut locks = self.write_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            locks
                .entry(question_id)
                .or_insert_with(|| Arc::new(WriteMutex::new(()))),
        )
    }

    fn schedule(&self, question_id: QuestionId, payload: AnswerPayload) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let write_lock = self.write_lock(question_id);
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.remove(&question_id) {
            previous.timer.abort();
        }

        let registry = Arc::clone(&self.pending);
        let service = Arc::clone(&self.service);
        let failures = self.failures.clone();
        let exam_id = self.exam_id;
        let quiet_period = self.quiet_period;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(quiet_period).await;
            // The payload stays replaceable until the previous write lands.
            let _in_flight = write_lock.lock_owned().await;
            let payload = {
                let mut pending = registry.lock().unwrap_or_else(PoisonError::into_inner);
                match pending.get(&question_id) {
                    Some(entry) if entry.seq == seq => pending.remove(&question_id).map(|e| e.payload),
                    _ => None,
                }
            };
            let Some(payload) = payload else {
                return;
            };
            let update = AnswerUpdate::Payload {
                question_id,
                payload,
            };
            if let Err(failure) = write(service.as_ref(), exam_id, &update).await {
                let _ = failures.send(failure);
            }
        });

        debug!(question_id, seq, "buffered answer scheduled");
        pending.insert(
            question_id,
            PendingWrite {
                seq,
                payload,
                timer,
            },
        );
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn has_pending(&self, question_id: QuestionId) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&question_id)
    }

    /// Write every pending buffered answer now, concurrently, after any
    /// write already in flight for the same question has landed.
    pub async fn flush_all(&self) -> Vec<SyncFailure> {
        let mut drained: HashMap<QuestionId, AnswerPayload> = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending
                .drain()
                .map(|(question_id, entry)| {
                    entry.timer.abort();
                    (question_id, entry.payload)
                })
                .collect()
        };
        let jobs: Vec<(QuestionId, WriteLock, Option<AnswerPayload>)> = {
            let locks = self.write_locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks
                .iter()
                .map(|(question_id, lock)| (*question_id, Arc::clone(lock), drained.remove(question_id)))
                .collect()
        };
        let count = jobs.iter().filter(|(_, _, payload)| payload.is_some()).count();
        if count > 0 {
            debug!(count, "flushing buffered answers");
        }

        let service = self.service.as_ref();
        let exam_id = self.exam_id;
        let writes = jobs.into_iter().map(|(question_id, lock, payload)| async move {
            let _in_flight = lock.lock().await;
            match payload {
                Some(payload) => {
                    let update = AnswerUpdate::Payload {
                        question_id,
                        payload,
                    };
                    write(service, exam_id, &update).await
                }
                None => Ok(()),
            }
        });
        join_all(writes)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect()
    }

    /// Drop every pending buffered write without sending it. Returns how many
    /// were discarded.
    pub fn cancel_all(&self) -> usize {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let discarded = pending.len();
        for (_, entry) in pending.drain() {
            entry.timer.abort();
        }
        if discarded > 0 {
            warn!(discarded, "discarding unsent buffered answers");
        }
        discarded
    }
}

impl Drop for AnswerSyncQueue {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

async fn write(
    service: &dyn SessionService,
    exam_id: ExamId,
    update: &AnswerUpdate,
) -> Result<(), SyncFailure> {
    let question_id = update.question_id();
    match service.upsert_answer(exam_id, update).await {
        Ok(()) => {
            debug!(question_id, "answer synced");
            Ok(())
        }
        Err(e) => {
            warn!(question_id, error = %e, "answer sync failed");
            Err(SyncFailure::answer(question_id, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SessionStatus;
    use crate::testing::MockSessionService;

    fn queue() -> (Arc<MockSessionService>, AnswerSyncQueue) {
        let service = Arc::new(MockSessionService::new(SessionStatus::InProgress));
        let queue = AnswerSyncQueue::new(1, service.clone(), Duration::from_millis(1000));
        (service, queue)
    }

    fn essay(text: &str) -> AnswerUpdate {
        AnswerUpdate::Payload {
            question_id: 4,
            payload: AnswerPayload::Essay(text.into()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn keystroke_burst_writes_final_value_once() {
        let (service, queue) = queue();
        for text in ["h", "he", "hel", "hell", "hello"] {
            let result = queue.submit(essay(text), SyncPolicy::Buffered).await.unwrap();
            assert_eq!(result, Submission::Scheduled);
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert!(service.writes().is_empty());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(service.writes(), vec![essay("hello")]);
        assert_eq!(queue.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn each_change_restarts_the_quiet_period() {
        let (service, queue) = queue();
        queue.submit(essay("a"), SyncPolicy::Buffered).await.unwrap();
        tokio::time::sleep(Duration::from_millis(900)).await;
        queue.submit(essay("ab"), SyncPolicy::Buffered).await.unwrap();
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(service.writes().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(service.writes(), vec![essay("ab")]);
    }

    #[tokio::test(start_paused = true)]
    async fn questions_debounce_independently() {
        let (service, queue) = queue();
        queue.submit(essay("essay"), SyncPolicy::Buffered).await.unwrap();
        let short = AnswerUpdate::Payload {
            question_id: 3,
            payload: AnswerPayload::Short("short".into()),
        };
        queue.submit(short.clone(), SyncPolicy::Buffered).await.unwrap();
        assert_eq!(queue.pending_count(), 2);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(service.writes().len(), 2);
    }

    #[tokio::test]
    async fn immediate_updates_are_written_in_order() {
        let (service, queue) = queue();
        let first = AnswerUpdate::Payload {
            question_id: 1,
            payload: AnswerPayload::Single("A".into()),
        };
        let second = AnswerUpdate::Doubt {
            question_id: 1,
            is_doubt: true,
        };
        assert_eq!(
            queue.submit(first.clone(), SyncPolicy::Immediate).await.unwrap(),
            Submission::Written
        );
        queue.submit(second.clone(), SyncPolicy::Buffered).await.unwrap();
        assert_eq!(service.writes(), vec![first, second]);
    }

    #[tokio::test]
    async fn immediate_failure_is_returned() {
        let (service, queue) = queue();
        service.fail_upserts.store(true, Ordering::SeqCst);
        let err = queue
            .submit(
                AnswerUpdate::Payload {
                    question_id: 1,
                    payload: AnswerPayload::Single("B".into()),
                },
                SyncPolicy::Immediate,
            )
            .await
            .unwrap_err();
        assert_eq!(err.question_id(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn buffered_failure_is_broadcast_without_retry() {
        let (service, queue) = queue();
        let mut failures = queue.subscribe_failures();
        service.fail_upserts.store(true, Ordering::SeqCst);

        queue.submit(essay("lost"), SyncPolicy::Buffered).await.unwrap();
        let failure = failures.recv().await.unwrap();
        assert_eq!(failure.question_id(), Some(4));

        service.fail_upserts.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(service.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_discards_pending_writes() {
        let (service, queue) = queue();
        queue.submit(essay("draft"), SyncPolicy::Buffered).await.unwrap();
        assert_eq!(queue.cancel_all(), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(service.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_write_is_not_overtaken_by_a_newer_value() {
        let (service, queue) = queue();
        service.upsert_delays.lock().unwrap().push_back(Duration::from_secs(5));

        queue.submit(essay("a"), SyncPolicy::Buffered).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(!queue.has_pending(4));

        queue.submit(essay("ab"), SyncPolicy::Buffered).await.unwrap();
        assert!(queue.has_pending(4));
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(service.writes().is_empty());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(service.writes(), vec![essay("a"), essay("ab")]);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_waits_for_the_write_in_flight() {
        let (service, queue) = queue();
        service.upsert_delays.lock().unwrap().push_back(Duration::from_secs(5));

        queue.submit(essay("a"), SyncPolicy::Buffered).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        queue.submit(essay("ab"), SyncPolicy::Buffered).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert!(queue.flush_all().await.is_empty());
        assert!(!queue.has_pending(4));
        assert_eq!(service.writes(), vec![essay("a"), essay("ab")]);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(service.writes().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_with_nothing_pending_still_waits_for_landing() {
        let (service, queue) = queue();
        service.upsert_delays.lock().unwrap().push_back(Duration::from_secs(5));

        queue.submit(essay("only"), SyncPolicy::Buffered).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(queue.pending_count(), 0);

        assert!(queue.flush_all().await.is_empty());
        assert_eq!(service.writes(), vec![essay("only")]);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_sends_pending_writes_now() {
        let (service, queue) = queue();
        queue.submit(essay("final"), SyncPolicy::Buffered).await.unwrap();
        assert!(queue.flush_all().await.is_empty());
        assert_eq!(service.writes(), vec![essay("final")]);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(service.writes().len(), 1);
    }
}
