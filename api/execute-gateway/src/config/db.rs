use crate::config::environment::AppConfig;

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub queue_name: String,
    pub key_prefix: String,
}

impl RedisConfig {
    pub fn from_app(app: &AppConfig) -> Self {
        Self {
            url: format!("redis://{}:{}", app.redis_host, app.redis_port),
            queue_name: app.queue_name.clone(),
            key_prefix: app.queue_prefix.clone(),
        }
    }

    pub fn queue_key(&self) -> String {
        format!("{}:{}", self.key_prefix, self.queue_name)
    }
}
