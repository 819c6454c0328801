use crate::module::execute::model::JobRecord;
use crate::module::execute::schema::JobStatus;
use crate::service::queue_service::{
    ConnectionStatus, JobQueue, JobTransition, NewJob, TransitionFeed,
};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

const TRANSITION_BUFFER: usize = 1024;

#[derive(Debug)]
pub struct InMemoryJobQueue {
    inner: Mutex<MemoryQueueInner>,
    transitions: broadcast::Sender<JobTransition>,
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);
        Self {
            inner: Mutex::new(MemoryQueueInner::default()),
            transitions,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryQueueInner {
    last_id: u64,
    jobs_by_id: HashMap<String, JobRecord>,
    failed: Vec<JobRecord>,
    closed: bool,
}

impl InMemoryJobQueue {
    fn lock(&self) -> Result<MutexGuard<'_, MemoryQueueInner>, String> {
        self.inner
            .lock()
            .map_err(|_| "memory queue lock poisoned".to_string())
    }

    // Called with the state lock held so a reader never sees a status before its event.
    fn announce(&self, job: &JobRecord) {
        let _ = self.transitions.send(JobTransition {
            job_id: job.id.clone(),
            status: job.status,
            return_value: job.return_value.clone(),
            failed_reason: job.failed_reason.clone(),
        });
    }

    pub fn mark_active(&self, job_id: &str) -> Result<JobRecord, String> {
        let mut inner = self.lock()?;
        let job = inner
            .jobs_by_id
            .get_mut(job_id)
            .ok_or_else(|| format!("job {job_id} is not in the primary index"))?;
        job.status = JobStatus::Active;
        job.attempts_made += 1;
        job.processed_on = Some(Utc::now().timestamp_millis());
        let job = job.clone();
        self.announce(&job);
        Ok(job)
    }

    pub fn complete(&self, job_id: &str, return_value: Value) -> Result<JobRecord, String> {
        let mut inner = self.lock()?;
        let job = inner
            .jobs_by_id
            .get_mut(job_id)
            .ok_or_else(|| format!("job {job_id} is not in the primary index"))?;
        job.status = JobStatus::Completed;
        job.finished_on = Some(Utc::now().timestamp_millis());
        job.return_value = Some(return_value);
        let job = job.clone();
        self.announce(&job);
        Ok(job)
    }

    // Failed jobs leave the primary index and are only reachable through `get_failed`.
    pub fn fail(&self, job_id: &str, reason: &str) -> Result<JobRecord, String> {
        let mut inner = self.lock()?;
        let mut job = inner
            .jobs_by_id
            .remove(job_id)
            .ok_or_else(|| format!("job {job_id} is not in the primary index"))?;
        job.status = JobStatus::Failed;
        job.finished_on = Some(Utc::now().timestamp_millis());
        job.failed_reason = Some(reason.to_string());
        inner.failed.push(job.clone());
        self.announce(&job);
        Ok(job)
    }

    pub fn evict(&self, job_id: &str) -> bool {
        match self.lock() {
            Ok(mut inner) => {
                let before = inner.failed.len();
                inner.failed.retain(|j| j.id != job_id);
                inner.jobs_by_id.remove(job_id).is_some() || inner.failed.len() != before
            }
            Err(_) => false,
        }
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn add(&self, job: NewJob) -> Result<JobRecord, String> {
        let mut inner = self.lock()?;
        if inner.closed {
            return Err("queue is closed".to_string());
        }

        inner.last_id += 1;
        let record = JobRecord {
            id: inner.last_id.to_string(),
            name: job.name,
            data: job.data,
            timestamp: Utc::now().timestamp_millis(),
            status: JobStatus::Waiting,
            attempts_made: 0,
            processed_on: None,
            finished_on: None,
            return_value: None,
            failed_reason: None,
            traceparent: job.traceparent,
        };
        inner.jobs_by_id.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, String> {
        Ok(self.lock()?.jobs_by_id.get(job_id).cloned())
    }

    async fn get_failed(&self) -> Result<Vec<JobRecord>, String> {
        Ok(self.lock()?.failed.clone())
    }

    async fn get_failed_job(&self, job_id: &str) -> Result<Option<JobRecord>, String> {
        Ok(self.lock()?.failed.iter().find(|j| j.id == job_id).cloned())
    }

    async fn transitions(&self) -> Result<TransitionFeed, String> {
        let rx = self.transitions.subscribe();
        let feed = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(transition) => return Some((transition, rx)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "job transition feed lagged");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });
        Ok(feed.boxed())
    }

    async fn status(&self) -> ConnectionStatus {
        match self.lock() {
            Ok(inner) if !inner.closed => ConnectionStatus::Ready,
            _ => ConnectionStatus::Failed,
        }
    }

    async fn close(&self) {
        if let Ok(mut inner) = self.lock() {
            inner.closed = true;
        }
    }
}
