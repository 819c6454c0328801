use crate::module::execute::error::ExecuteError;
use crate::module::execute::model::{
    EXECUTE_JOB_NAME, JobRecord, ResolvedExecutionTask, TracingOptions,
};
use crate::module::execute::schema::{JobEvent, JobStatus, SubmitExecutionResponse};
use crate::service::metrics_service;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::FutureExt;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Reconnecting,
    Ready,
    Failed,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Reconnecting => "reconnecting",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    pub data: Value,
    pub traceparent: Option<String>,
}

// A status change reported by the queue's processor side.
#[derive(Debug, Clone, PartialEq)]
pub struct JobTransition {
    pub job_id: String,
    pub status: JobStatus,
    pub return_value: Option<Value>,
    pub failed_reason: Option<String>,
}

pub type TransitionFeed = BoxStream<'static, JobTransition>;

#[async_trait]
pub trait JobQueue: Debug + Send + Sync {
    async fn add(&self, job: NewJob) -> Result<JobRecord, String>;

    // Primary index only: waiting, active and completed jobs.
    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, String>;

    async fn get_failed(&self) -> Result<Vec<JobRecord>, String>;

    async fn get_failed_job(&self, job_id: &str) -> Result<Option<JobRecord>, String> {
        Ok(self.get_failed().await?.into_iter().find(|j| j.id == job_id))
    }

    // Every transition of every job, from the moment the feed is opened.
    async fn transitions(&self) -> Result<TransitionFeed, String>;

    async fn status(&self) -> ConnectionStatus;

    async fn close(&self);
}

pub async fn submit_execution_job(
    queue: &dyn JobQueue,
    task: &ResolvedExecutionTask,
    tracing_opts: &TracingOptions,
) -> Result<SubmitExecutionResponse, ExecuteError> {
    let data = serde_json::to_value(task.to_job_data())
        .map_err(|e| ExecuteError::EnqueueFailed(format!("payload encode failed: {e}")))?;

    let job = queue
        .add(NewJob {
            name: EXECUTE_JOB_NAME.to_string(),
            data,
            traceparent: tracing_opts.traceparent.clone(),
        })
        .await
        .map_err(|e| {
            metrics_service::inc_enqueue_failures();
            metrics_service::set_last_error_ts(Utc::now().timestamp());
            error!(cert_id = %task.cert_id(), error = %e, "execution job enqueue failed");
            ExecuteError::EnqueueFailed(e)
        })?;

    metrics_service::inc_jobs_submitted();
    info!(
        job_id = %job.id,
        cert_id = %task.cert_id(),
        cross_subnet_message_id = %task.cross_subnet_message_id(),
        "execution job queued"
    );
    Ok(SubmitExecutionResponse {
        id: job.id,
        timestamp: job.timestamp,
    })
}

pub async fn get_job_by_id(queue: &dyn JobQueue, job_id: &str) -> Result<JobRecord, ExecuteError> {
    if let Some(job) = queue.get_job(job_id).await.map_err(ExecuteError::Queue)? {
        return Ok(job);
    }

    queue
        .get_failed_job(job_id)
        .await
        .map_err(ExecuteError::Queue)?
        .ok_or(ExecuteError::JobNotFound)
}

/// Streams one event per status change of `job_id`, starting with its current state.
///
/// Changes come from the queue's transition feed. `poll_interval` drives a slower
/// lookup that notices eviction and covers backends whose feed is unavailable or
/// has closed. The stream ends after a terminal status or once the job is gone.
pub async fn subscribe_to_job(
    queue: Arc<dyn JobQueue>,
    job_id: &str,
    tracing_opts: TracingOptions,
    poll_interval: Duration,
) -> Result<impl Stream<Item = JobEvent> + Send + 'static, ExecuteError> {
    // The feed is opened before the snapshot so nothing between the two is lost.
    let feed = match queue.transitions().await {
        Ok(feed) => Some(feed),
        Err(e) => {
            warn!(job_id = %job_id, error = %e, "job transition feed unavailable; polling only");
            None
        }
    };
    let current = get_job_by_id(queue.as_ref(), job_id).await?;
    metrics_service::inc_subscriptions_opened();
    debug!(job_id = %job_id, status = current.status.as_str(), "job subscription opened");

    let mut watch = JobWatch {
        queue,
        job_id: job_id.to_string(),
        traceparent: tracing_opts.traceparent,
        ticker: interval_at(Instant::now() + poll_interval, poll_interval),
        feed,
        backlog: VecDeque::new(),
        last_status: None,
        finished: false,
    };
    watch.ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    watch.push(current.status, current.return_value, current.failed_reason);
    watch.drain_feed();

    Ok(stream::unfold(watch, |mut watch| async move {
        let event = watch.next_event().await?;
        Some((event, watch))
    }))
}

struct JobWatch {
    queue: Arc<dyn JobQueue>,
    job_id: String,
    traceparent: Option<String>,
    ticker: Interval,
    feed: Option<TransitionFeed>,
    backlog: VecDeque<JobEvent>,
    last_status: Option<JobStatus>,
    finished: bool,
}

impl JobWatch {
    async fn next_event(&mut self) -> Option<JobEvent> {
        loop {
            if let Some(event) = self.backlog.pop_front() {
                return Some(event);
            }
            if self.finished {
                return None;
            }

            let delivered = match self.feed.as_mut() {
                Some(feed) => tokio::select! {
                    biased;
                    next = feed.next() => Some(next),
                    _ = self.ticker.tick() => None,
                },
                None => {
                    self.ticker.tick().await;
                    None
                }
            };

            match delivered {
                Some(Some(transition)) => self.record(transition),
                Some(None) => {
                    warn!(job_id = %self.job_id, "job transition feed closed; polling only");
                    self.feed = None;
                }
                None => self.poll().await,
            }
        }
    }

    async fn poll(&mut self) {
        match get_job_by_id(self.queue.as_ref(), &self.job_id).await {
            Ok(job) => {
                if self.last_status == Some(job.status) {
                    return;
                }
                // Anything the feed already holds is older than this snapshot.
                self.drain_feed();
                self.push(job.status, job.return_value, job.failed_reason);
            }
            Err(ExecuteError::JobNotFound) => {
                self.drain_feed();
                debug!(job_id = %self.job_id, "watched job left the queue");
                self.finished = true;
            }
            Err(e) => warn!(job_id = %self.job_id, error = %e, "job poll failed"),
        }
    }

    fn drain_feed(&mut self) {
        while let Some(feed) = self.feed.as_mut() {
            match feed.next().now_or_never() {
                Some(Some(transition)) => self.record(transition),
                Some(None) => self.feed = None,
                None => break,
            }
        }
    }

    fn record(&mut self, transition: JobTransition) {
        if transition.job_id == self.job_id {
            self.push(
                transition.status,
                transition.return_value,
                transition.failed_reason,
            );
        }
    }

    fn push(&mut self, status: JobStatus, return_value: Option<Value>, failed_reason: Option<String>) {
        if self.finished || self.last_status == Some(status) {
            return;
        }
        self.last_status = Some(status);
        self.finished = status.is_terminal();
        self.backlog.push_back(JobEvent {
            job_id: self.job_id.clone(),
            status,
            timestamp: Utc::now().timestamp_millis(),
            return_value,
            failed_reason,
            traceparent: self.traceparent.clone(),
        });
    }
}
