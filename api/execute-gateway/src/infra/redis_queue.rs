use crate::config::db::RedisConfig;
use crate::module::execute::model::JobRecord;
use crate::module::execute::schema::JobStatus;
use crate::service::queue_service::{
    ConnectionStatus, JobQueue, JobTransition, NewJob, TransitionFeed,
};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::StreamExt;
use redis::Client as RedisClient;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisError, RedisResult};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

// Bull-style layout: `<prefix>:<queue>:id` counter, one hash per job, `wait` and
// `active` lists, `completed` and `failed` sorted sets. The processor moves ids
// between those collections and publishes each move on `<prefix>:<queue>:<status>`;
// this side only creates jobs and reads them.
pub struct RedisJobQueue {
    client: RedisClient,
    config: RedisConfig,
    conn: Mutex<Option<MultiplexedConnection>>,
    ever_connected: AtomicBool,
    closed: AtomicBool,
}

impl fmt::Debug for RedisJobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisJobQueue")
            .field("url", &self.config.url)
            .field("queue", &self.config.queue_key())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

type JobSnapshot = (HashMap<String, String>, Option<f64>, Option<f64>, Option<i64>);

#[derive(Debug, Clone, Copy)]
enum Attempts {
    Once,
    RetryOnReconnect,
}

impl RedisJobQueue {
    pub fn open(config: RedisConfig) -> Result<Self, String> {
        let client =
            RedisClient::open(config.url.clone()).map_err(|e| format!("redis init failed: {e}"))?;
        Ok(Self {
            client,
            config,
            conn: Mutex::new(None),
            ever_connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{suffix}", self.config.queue_key())
    }

    async fn connection(&self) -> Result<MultiplexedConnection, String> {
        if self.closed.load(Ordering::Acquire) {
            return Err("queue client is closed".to_string());
        }

        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        let conn = timeout(CONNECT_TIMEOUT, self.client.get_multiplexed_async_connection())
            .await
            .map_err(|_| "redis connect timed out".to_string())?
            .map_err(|e| format!("redis connect failed: {e}"))?;
        if self.ever_connected.swap(true, Ordering::AcqRel) {
            info!(url = %self.config.url, "redis connection re-established");
        } else {
            info!(url = %self.config.url, "redis connection established");
        }
        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn reset_connection(&self) {
        *self.conn.lock().await = None;
    }

    // A dead cached connection is dropped so the next call dials again. Only
    // idempotent reads are re-run on the fresh connection.
    async fn query<T, F, Fut>(&self, what: &str, attempts: Attempts, op: F) -> Result<T, String>
    where
        F: Fn(MultiplexedConnection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let mut retry = matches!(attempts, Attempts::RetryOnReconnect);
        loop {
            let conn = self.connection().await?;
            match op(conn).await {
                Ok(value) => return Ok(value),
                Err(e) if is_connection_lost(&e) => {
                    warn!(error = %e, op = what, "redis connection lost");
                    self.reset_connection().await;
                    if !retry {
                        return Err(format!("{what} failed: {e}"));
                    }
                    retry = false;
                }
                Err(e) => return Err(format!("{what} failed: {e}")),
            }
        }
    }

    async fn read_job(&self, job_id: &str) -> Result<Option<JobRecord>, String> {
        let (hash, completed, failed, active): JobSnapshot = self
            .query("job lookup", Attempts::RetryOnReconnect, |mut conn| async move {
                redis::pipe()
                    .hgetall(self.key(job_id))
                    .zscore(self.key("completed"), job_id)
                    .zscore(self.key("failed"), job_id)
                    .cmd("LPOS")
                    .arg(self.key("active"))
                    .arg(job_id)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        if hash.is_empty() {
            return Ok(None);
        }
        let status = if failed.is_some() {
            JobStatus::Failed
        } else if completed.is_some() {
            JobStatus::Completed
        } else if active.is_some() {
            JobStatus::Active
        } else {
            JobStatus::Waiting
        };
        job_from_hash(job_id, &hash, status).map(Some)
    }
}

fn is_connection_lost(e: &RedisError) -> bool {
    e.is_connection_dropped() || e.is_io_error() || e.is_unrecoverable_error()
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn add(&self, job: NewJob) -> Result<JobRecord, String> {
        let id: u64 = self
            .query("job id allocation", Attempts::Once, |mut conn| async move {
                conn.incr(self.key("id"), 1).await
            })
            .await?;
        let id = id.to_string();
        let timestamp = Utc::now().timestamp_millis();

        let data = serde_json::to_string(&job.data).map_err(|e| format!("job data encode failed: {e}"))?;
        let opts = json!({ "traceparent": job.traceparent }).to_string();
        let fields = [
            ("name", job.name.clone()),
            ("data", data),
            ("opts", opts),
            ("timestamp", timestamp.to_string()),
            ("attemptsMade", "0".to_string()),
        ];

        let id_ref = id.as_str();
        let fields_ref = &fields;
        let _: () = self
            .query("queue push", Attempts::Once, |mut conn| async move {
                redis::pipe()
                    .atomic()
                    .hset_multiple(self.key(id_ref), fields_ref)
                    .ignore()
                    .lpush(self.key("wait"), id_ref)
                    .ignore()
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        debug!(job_id = %id, queue = %self.config.queue_key(), "job added");

        Ok(JobRecord {
            id,
            name: job.name,
            data: job.data,
            timestamp,
            status: JobStatus::Waiting,
            attempts_made: 0,
            processed_on: None,
            finished_on: None,
            return_value: None,
            failed_reason: None,
            traceparent: job.traceparent,
        })
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, String> {
        let job = self.read_job(job_id).await?;
        Ok(job.filter(|j| j.status != JobStatus::Failed))
    }

    async fn get_failed(&self) -> Result<Vec<JobRecord>, String> {
        let ids: Vec<String> = self
            .query("failed set scan", Attempts::RetryOnReconnect, |mut conn| async move {
                conn.zrange(self.key("failed"), 0, -1).await
            })
            .await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids_ref = &ids;
        let hashes: Vec<HashMap<String, String>> = self
            .query("failed job lookup", Attempts::RetryOnReconnect, |mut conn| async move {
                let mut pipe = redis::pipe();
                for id in ids_ref {
                    pipe.hgetall(self.key(id));
                }
                pipe.query_async(&mut conn).await
            })
            .await?;

        ids.iter()
            .zip(hashes.iter())
            .filter(|(_, hash)| !hash.is_empty())
            .map(|(id, hash)| job_from_hash(id, hash, JobStatus::Failed))
            .collect()
    }

    async fn get_failed_job(&self, job_id: &str) -> Result<Option<JobRecord>, String> {
        let job = self.read_job(job_id).await?;
        Ok(job.filter(|j| j.status == JobStatus::Failed))
    }

    async fn transitions(&self) -> Result<TransitionFeed, String> {
        if self.closed.load(Ordering::Acquire) {
            return Err("queue client is closed".to_string());
        }
        let mut pubsub = timeout(CONNECT_TIMEOUT, self.client.get_async_pubsub())
            .await
            .map_err(|_| "redis pubsub connect timed out".to_string())?
            .map_err(|e| format!("redis pubsub connect failed: {e}"))?;
        for status in [JobStatus::Active, JobStatus::Completed, JobStatus::Failed] {
            pubsub
                .subscribe(self.key(status.as_str()))
                .await
                .map_err(|e| format!("redis subscribe failed: {e}"))?;
        }

        let queue_key = self.config.queue_key();
        let feed = pubsub.into_on_message().filter_map(move |msg| {
            let transition = msg
                .get_payload::<String>()
                .ok()
                .and_then(|payload| parse_transition(&queue_key, msg.get_channel_name(), &payload));
            async move { transition }
        });
        Ok(feed.boxed())
    }

    async fn status(&self) -> ConnectionStatus {
        if self.closed.load(Ordering::Acquire) {
            return ConnectionStatus::Failed;
        }
        match self.connection().await {
            Ok(mut conn) => {
                let pong: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
                match pong {
                    Ok(_) => ConnectionStatus::Ready,
                    Err(e) => {
                        warn!(error = %e, "redis ping failed");
                        self.reset_connection().await;
                        ConnectionStatus::Reconnecting
                    }
                }
            }
            Err(e) => {
                debug!(error = %e, "redis not connected");
                if self.ever_connected.load(Ordering::Acquire) {
                    ConnectionStatus::Reconnecting
                } else {
                    ConnectionStatus::Connecting
                }
            }
        }
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.reset_connection().await;
            info!(queue = %self.config.queue_key(), "queue client closed");
        }
    }
}

// Bull publishes the bare id when a job becomes active and `{"jobId", "val"}`
// when it finishes, where `val` is the return value or the failure reason.
fn parse_transition(queue_key: &str, channel: &str, payload: &str) -> Option<JobTransition> {
    let event = channel.strip_prefix(queue_key)?.strip_prefix(':')?;
    let status = JobStatus::parse(event)?;

    let (job_id, val) = match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(mut body)) => {
            let job_id = match body.remove("jobId")? {
                Value::String(id) => id,
                Value::Number(id) => id.to_string(),
                _ => return None,
            };
            (job_id, body.remove("val"))
        }
        _ => (payload.to_string(), None),
    };

    let (return_value, failed_reason) = match status {
        JobStatus::Completed => (val, None),
        JobStatus::Failed => (
            None,
            val.map(|v| match v {
                Value::String(reason) => reason,
                other => other.to_string(),
            }),
        ),
        _ => (None, None),
    };
    Some(JobTransition {
        job_id,
        status,
        return_value,
        failed_reason,
    })
}

fn job_from_hash(
    job_id: &str,
    hash: &HashMap<String, String>,
    status: JobStatus,
) -> Result<JobRecord, String> {
    let data = match hash.get("data") {
        Some(raw) => serde_json::from_str(raw).map_err(|e| format!("job {job_id} data is not json: {e}"))?,
        None => Value::Null,
    };
    let traceparent = hash
        .get("opts")
        .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        .and_then(|opts| opts.get("traceparent").and_then(Value::as_str).map(ToOwned::to_owned));
    let return_value = hash
        .get("returnvalue")
        .map(|raw| serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone())));

    Ok(JobRecord {
        id: job_id.to_string(),
        name: hash.get("name").cloned().unwrap_or_default(),
        data,
        timestamp: read_i64(hash, "timestamp").unwrap_or_default(),
        status,
        attempts_made: read_i64(hash, "attemptsMade").unwrap_or_default().max(0) as u32,
        processed_on: read_i64(hash, "processedOn"),
        finished_on: read_i64(hash, "finishedOn"),
        return_value,
        failed_reason: hash.get("failedReason").cloned().filter(|s| !s.is_empty()),
        traceparent,
    })
}

fn read_i64(hash: &HashMap<String, String>, field: &str) -> Option<i64> {
    hash.get(field).and_then(|v| v.parse::<i64>().ok())
}
