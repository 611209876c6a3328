//! Worker pool running one task per active conversation

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::domain::ConversationError;

/// Runs conversation workers, optionally capped to a maximum number of
/// concurrent conversations with a bounded wait queue in front.
///
/// With a cap in place, a submission first tries to grab a free worker
/// slot; if none is free it joins the wait queue, and if the queue is full
/// too it is rejected. Without a cap every submission starts immediately.
pub struct WorkerPool {
    limiter: Option<Arc<Semaphore>>,
    queue_capacity: usize,
    queued: Arc<AtomicUsize>,
    tracker: TaskTracker,
    shut_down: AtomicBool,
}

impl WorkerPool {
    pub fn new(max_concurrent: Option<usize>, queue_capacity: usize) -> Self {
        Self {
            limiter: max_concurrent.map(|max| Arc::new(Semaphore::new(max))),
            queue_capacity,
            queued: Arc::new(AtomicUsize::new(0)),
            tracker: TaskTracker::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Submit one conversation worker, instrumented with the given span.
    ///
    /// Returns the wait-queue depth observed at submission (zero when the
    /// worker starts immediately), or a rejection error when the pool is
    /// saturated or already shut down.
    pub fn submit<F>(&self, span: tracing::Span, task: F) -> Result<usize, ConversationError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(ConversationError::Rejected(
                "worker pool is shut down".to_string(),
            ));
        }
        let Some(limiter) = &self.limiter else {
            self.tracker.spawn(task.instrument(span));
            return Ok(0);
        };
        match limiter.clone().try_acquire_owned() {
            Ok(permit) => {
                self.tracker.spawn(
                    async move {
                        let _permit = permit;
                        task.await;
                    }
                    .instrument(span),
                );
                Ok(self.queued.load(Ordering::SeqCst))
            }
            Err(_) => {
                if self.queued.load(Ordering::SeqCst) >= self.queue_capacity {
                    return Err(ConversationError::Rejected(format!(
                        "all workers busy and wait queue is full (capacity {})",
                        self.queue_capacity
                    )));
                }
                let depth = self.queued.fetch_add(1, Ordering::SeqCst) + 1;
                let limiter = limiter.clone();
                let queued = self.queued.clone();
                self.tracker.spawn(
                    async move {
                        let permit = limiter.acquire_owned().await;
                        queued.fetch_sub(1, Ordering::SeqCst);
                        let Ok(_permit) = permit else {
                            return;
                        };
                        task.await;
                    }
                    .instrument(span),
                );
                Ok(depth)
            }
        }
    }

    /// Stop accepting submissions and wait up to `timeout` for all running
    /// workers to finish. Returns whether the pool drained in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.shut_down.store(true, Ordering::SeqCst);
        self.tracker.close();
        tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok()
    }
}
