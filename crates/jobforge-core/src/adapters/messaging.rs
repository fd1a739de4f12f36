//! Messaging Adapter (C9): primary HTTP gateway with external fallback,
//! serialized per endpoint.
//!
//! §9 redesigns the chained-future idiom into a per-endpoint single-slot
//! task queue: each base URL gets its own unbounded FIFO with exactly one
//! active consumer, so sends to the same endpoint are strictly ordered
//! (property 6 in §8) while different endpoints proceed in parallel.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::config::MessagingConfig;
use crate::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageRequest {
    pub number: Option<String>,
    pub group_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendMessageResult {
    pub delivered_via: &'static str,
}

struct QueuedSend {
    request: SendMessageRequest,
    reply: oneshot::Sender<Result<SendMessageResult>>,
}

/// Serializes sends to each base URL through its own single-consumer task
/// queue.
pub struct MessagingAdapter {
    config: MessagingConfig,
    client: reqwest::Client,
    queues: DashMap<String, mpsc::UnboundedSender<QueuedSend>>,
}

impl MessagingAdapter {
    pub fn new(config: MessagingConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            queues: DashMap::new(),
        }
    }

    pub async fn send(&self, request: SendMessageRequest) -> Result<SendMessageResult> {
        if request.number.is_none() && request.group_id.is_none() {
            return Err(Error::validation("number or groupId is required"));
        }

        let endpoint = request
            .base_url
            .clone()
            .unwrap_or_else(|| self.config.gateway_url.clone());

        let (reply_tx, reply_rx) = oneshot::channel();
        self.queue_for(&endpoint)
            .send(QueuedSend {
                request,
                reply: reply_tx,
            })
            .map_err(|_| Error::adapter_failure("messaging endpoint queue closed"))?;

        reply_rx
            .await
            .map_err(|_| Error::adapter_failure("messaging endpoint queue dropped reply"))?
    }

    fn queue_for(&self, endpoint: &str) -> mpsc::UnboundedSender<QueuedSend> {
        if let Some(sender) = self.queues.get(endpoint) {
            return sender.clone();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.queues.insert(endpoint.to_string(), tx.clone());

        let endpoint = endpoint.to_string();
        let client = self.client.clone();
        let config = self.config.clone();
        tokio::spawn(endpoint_consumer(endpoint, client, config, rx));

        tx
    }
}

async fn endpoint_consumer(
    endpoint: String,
    client: reqwest::Client,
    config: MessagingConfig,
    mut rx: mpsc::UnboundedReceiver<QueuedSend>,
) {
    let mut initialized = false;

    while let Some(queued) = rx.recv().await {
        if !initialized {
            initialized = probe_ready(&client, &endpoint).await;
        }

        let delay = queued.request.delay_ms.unwrap_or(config.default_delay_ms);
        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;

        let result = send_once(&client, &endpoint, &queued.request)
            .await
            .or_else(|primary_err| {
                warn!(endpoint, error = %primary_err, "primary messaging gateway send failed, trying fallback inline");
                Err(primary_err)
            });

        let outcome = match result {
            Ok(result) => Ok(result),
            Err(primary_err) => send_via_secondary(&client, &config, &queued.request)
                .await
                .map_err(|secondary_err| {
                    Error::adapter_failure(format!(
                        "primary failed ({}); secondary failed ({})",
                        primary_err, secondary_err
                    ))
                }),
        };

        let _ = queued.reply.send(outcome);
    }

    debug!(endpoint, "messaging endpoint queue drained, consumer exiting");
}

async fn probe_ready(client: &reqwest::Client, base_url: &str) -> bool {
    match client.get(format!("{}/status", base_url)).send().await {
        Ok(resp) => {
            if let Ok(body) = resp.json::<serde_json::Value>().await {
                matches!(body.get("status").and_then(|s| s.as_str()), Some("ready") | Some("connecting"))
            } else {
                false
            }
        }
        Err(_) => false,
    }
}

async fn send_once(
    client: &reqwest::Client,
    base_url: &str,
    request: &SendMessageRequest,
) -> Result<SendMessageResult> {
    let path = if request.group_id.is_some() {
        "send-group-message"
    } else {
        "send-message"
    };

    let target = request.group_id.clone().or_else(|| request.number.clone()).unwrap();
    let body = serde_json::json!({
        "target": target,
        "message": request.message,
    });

    let response = client
        .post(format!("{}/{}", base_url, path))
        .json(&body)
        .send()
        .await
        .map_err(|e| Error::Network(e.to_string()))?;

    if response.status().is_success() {
        Ok(SendMessageResult { delivered_via: "primary" })
    } else {
        Err(Error::adapter_failure(format!(
            "primary gateway returned {}",
            response.status()
        )))
    }
}

async fn send_via_secondary(
    client: &reqwest::Client,
    config: &MessagingConfig,
    request: &SendMessageRequest,
) -> Result<SendMessageResult> {
    let Some(secondary_url) = &config.secondary_gateway_url else {
        return Err(Error::adapter_failure("no secondary gateway configured"));
    };

    let target = request.group_id.clone().or_else(|| request.number.clone()).unwrap();
    let body = serde_json::json!({
        "target": target,
        "message": request.message,
    });

    let mut req = client.post(secondary_url).json(&body);
    if let Some(token) = &config.secondary_gateway_token {
        req = req.bearer_auth(token);
    }

    let response = req.send().await.map_err(|e| Error::Network(e.to_string()))?;

    if response.status().is_success() {
        Ok(SendMessageResult { delivered_via: "secondary" })
    } else {
        Err(Error::adapter_failure(format!(
            "secondary gateway returned {}",
            response.status()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn rejects_request_without_target() {
        let adapter = MessagingAdapter::new(MessagingConfig {
            gateway_url: "http://127.0.0.1:1".to_string(),
            default_delay_ms: 0,
            secondary_gateway_url: None,
            secondary_gateway_token: None,
        });

        let err = adapter
            .send(SendMessageRequest {
                number: None,
                group_id: None,
                message: "hi".to_string(),
                base_url: None,
                delay_ms: Some(0),
            })
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn falls_back_to_secondary_when_primary_fails() {
        let primary = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "ready"})))
            .mount(&primary)
            .await;
        Mock::given(method("POST"))
            .and(path("/send-message"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&primary)
            .await;

        let secondary = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&secondary)
            .await;

        let adapter = MessagingAdapter::new(MessagingConfig {
            gateway_url: primary.uri(),
            default_delay_ms: 0,
            secondary_gateway_url: Some(secondary.uri()),
            secondary_gateway_token: None,
        });

        let result = adapter
            .send(SendMessageRequest {
                number: Some("+15555550100".to_string()),
                group_id: None,
                message: "hi".to_string(),
                base_url: None,
                delay_ms: Some(0),
            })
            .await
            .unwrap();

        assert_eq!(result.delivered_via, "secondary");
    }
}
