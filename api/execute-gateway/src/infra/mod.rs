pub mod memory_queue;
pub mod redis_queue;

use crate::config::db::RedisConfig;
use crate::config::environment::{AppConfig, QueueBackend};
use crate::service::queue_service::JobQueue;
use memory_queue::InMemoryJobQueue;
use redis_queue::RedisJobQueue;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct InfraClients {
    pub queue: Arc<dyn JobQueue>,
}

impl InfraClients {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    pub async fn shutdown(&self) {
        self.queue.close().await;
    }
}

pub fn init_infra(config: &AppConfig) -> Result<InfraClients, String> {
    let queue: Arc<dyn JobQueue> = match config.queue_backend {
        QueueBackend::Redis => Arc::new(RedisJobQueue::open(RedisConfig::from_app(config))?),
        QueueBackend::Memory => Arc::new(InMemoryJobQueue::default()),
    };
    Ok(InfraClients::new(queue))
}
