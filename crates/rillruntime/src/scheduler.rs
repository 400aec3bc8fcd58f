use rillcore::{CancelFlavour, Fei, JobId, PoolHandle, Scheduler};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Tokio-backed timeout scheduler
///
/// Each job is a spawned task sleeping for the requested delay, then
/// posting a timeout-flavoured cancel into the pool. Unscheduling cancels
/// the job's token before the timer fires.
pub struct TokioScheduler {
    pool: PoolHandle,
    jobs: Arc<Mutex<HashMap<JobId, CancellationToken>>>,
}

impl TokioScheduler {
    pub fn new(pool: PoolHandle) -> Self {
        Self {
            pool,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of jobs currently pending.
    pub fn job_count(&self) -> usize {
        self.jobs.lock().expect("scheduler lock poisoned").len()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, fei: Fei) -> JobId {
        let job_id = Uuid::new_v4().to_string();
        let token = CancellationToken::new();

        self.jobs
            .lock()
            .expect("scheduler lock poisoned")
            .insert(job_id.clone(), token.clone());

        let pool = self.pool.clone();
        let jobs = self.jobs.clone();
        let id = job_id.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    tracing::debug!("Timeout job {} firing for {}", id, fei);
                    if let Err(e) = pool.cancel_expression(fei, CancelFlavour::Timeout) {
                        tracing::warn!("Timeout job {} could not reach the pool: {}", id, e);
                    }
                }
            }
            jobs.lock().expect("scheduler lock poisoned").remove(&id);
        });

        job_id
    }

    fn unschedule(&self, job: &JobId) {
        if let Some(token) = self
            .jobs
            .lock()
            .expect("scheduler lock poisoned")
            .remove(job)
        {
            token.cancel();
        }
    }
}
