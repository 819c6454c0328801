use crate::module::execute::error::ExecuteError;
use crate::service::queue_service::{ConnectionStatus, JobQueue};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 1000;

/// Blocks until the queue backend reports `ready`.
///
/// The backend is checked once, then re-checked up to `max_retries` times while it is
/// still connecting or reconnecting, sleeping `interval` before each re-check. Any
/// other state, or an exhausted budget, fails with `RedisNotAvailable`.
pub async fn await_ready(
    queue: &dyn JobQueue,
    max_retries: u32,
    interval: Duration,
) -> Result<(), ExecuteError> {
    let mut retries = max_retries;
    loop {
        let status = queue.status().await;
        debug!(status = status.as_str(), "redis connection status");

        match status {
            ConnectionStatus::Ready => {
                info!(retries_used = max_retries - retries, "queue backend ready");
                return Ok(());
            }
            ConnectionStatus::Connecting | ConnectionStatus::Reconnecting if retries > 0 => {
                debug!(retries, "retrying redis connection establishment");
                retries -= 1;
                sleep(interval).await;
            }
            _ => {
                error!(status = status.as_str(), max_retries, "queue backend not available");
                return Err(ExecuteError::RedisNotAvailable);
            }
        }
    }
}
