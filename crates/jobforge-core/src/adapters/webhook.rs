//! Webhook dispatch for SMS/NOTIFICATION jobs: POST the payload to the
//! configured per-type URL with {Content-Type, X-Job-Type, X-Worker-ID}.

use crate::models::JobType;
use crate::{Error, Result};

pub struct WebhookAdapter {
    client: reqwest::Client,
    sms_url: Option<String>,
    notification_url: Option<String>,
}

impl WebhookAdapter {
    pub fn new(sms_url: Option<String>, notification_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            sms_url,
            notification_url,
        }
    }

    pub async fn dispatch(
        &self,
        job_type: JobType,
        worker_id: i64,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let url = match job_type {
            JobType::Sms => self.sms_url.as_ref(),
            JobType::Notification => self.notification_url.as_ref(),
            other => return Err(Error::adapter_failure(format!("no webhook configured for {}", other))),
        }
        .ok_or_else(|| Error::adapter_failure(format!("no webhook URL configured for {}", job_type)))?;

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Job-Type", job_type.as_str())
            .header("X-Worker-ID", worker_id.to_string())
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::adapter_failure(format!(
                "webhook returned {}",
                response.status()
            )));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| Error::Network(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn dispatch_includes_job_type_and_worker_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-Job-Type", "SMS"))
            .and(header("X-Worker-ID", "7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let adapter = WebhookAdapter::new(Some(server.uri()), None);
        let result = adapter
            .dispatch(JobType::Sms, 7, &serde_json::json!({"to": "+1"}))
            .await
            .unwrap();

        assert_eq!(result, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn dispatch_fails_without_configured_url() {
        let adapter = WebhookAdapter::new(None, None);
        let err = adapter
            .dispatch(JobType::Sms, 1, &serde_json::json!({"to": "+1"}))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 500);
    }
}
