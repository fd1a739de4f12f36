//! The three job adapters (C8/C9/C10) plus the plain webhook dispatcher,
//! unified behind a closed union rather than a duck-typed trait object
//! (§9): each worker process picks its variant once at boot from its job
//! type and never needs to downcast.

pub mod email;
pub mod messaging;
pub mod script;
pub mod webhook;

pub use email::EmailAdapter;
pub use messaging::MessagingAdapter;
pub use script::ScriptAdapter;
pub use webhook::WebhookAdapter;

use crate::cache::{RedisPool, RedisRateLimiter};
use crate::config::Config;
use crate::models::JobType;
use crate::{Error, Result};

/// The closed set of adapters a worker process can be built around, picked
/// once at boot by job type.
pub enum Adapter {
    Email(EmailAdapter),
    Messaging(MessagingAdapter),
    Webhook(WebhookAdapter),
    Script(ScriptAdapter),
}

impl Adapter {
    /// Build the adapter variant appropriate for `job_type`.
    pub async fn for_job_type(job_type: JobType, config: &Config) -> Result<Self> {
        match job_type {
            JobType::Email => Ok(Adapter::Email(EmailAdapter::new(config.email.clone()).await?)),
            JobType::Whatsapp => Ok(Adapter::Messaging(MessagingAdapter::new(config.messaging.clone()))),
            JobType::Sms | JobType::Notification => Ok(Adapter::Webhook(WebhookAdapter::new(
                config.webhooks.sms_url.clone(),
                config.webhooks.notification_url.clone(),
            ))),
            JobType::Cronjob => {
                let redis_config = crate::cache::RedisConfig::from(&config.redis);
                let redis_pool = RedisPool::new(redis_config.clone()).await?;
                let rate_limiter = RedisRateLimiter::new(redis_pool, redis_config).await?;
                Ok(Adapter::Script(ScriptAdapter::new(
                    config.script_runner.clone(),
                    rate_limiter,
                    config.rate_limit.clone(),
                ).await?))
            }
        }
    }

    /// Execute a job's payload and return its result, or an error the
    /// worker loop converts into a failed job.
    pub async fn execute(
        &mut self,
        job_type: JobType,
        worker_id: i64,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        match self {
            Adapter::Email(adapter) => {
                let request: email::SendEmailRequest = serde_json::from_value(payload.clone())?;
                let result = adapter.send(request).await?;
                Ok(serde_json::to_value(result)?)
            }
            Adapter::Messaging(adapter) => {
                let request: messaging::SendMessageRequest = serde_json::from_value(payload.clone())?;
                let result = adapter.send(request).await?;
                Ok(serde_json::to_value(result)?)
            }
            Adapter::Webhook(adapter) => adapter.dispatch(job_type, worker_id, payload).await,
            Adapter::Script(adapter) => {
                let script_name = payload
                    .get("script")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| Error::validation("cronjob payload must include a \"script\" field"))?;
                let task_id = payload
                    .get("taskId")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("worker-{}-{}", worker_id, script_name));

                let result = adapter.run(&task_id, script_name).await?;
                Ok(serde_json::to_value(result)?)
            }
        }
    }
}
