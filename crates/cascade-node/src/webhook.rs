//! Outbound webhook delivery and retry.
//!
//! Every attempt, first delivery or retry, is recorded as a
//! [`WebhookEvent`] with the outcome it produced. Transport failures
//! are captured in the record, not raised — a webhook must never break
//! the operation that triggered it.

use crate::error::{Error, Result};
use crate::models::WebhookEvent;
use crate::storage::Storage;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of one send, before it is logged.
struct SendOutcome {
    success: bool,
    status: Option<u16>,
    body: Option<String>,
}

/// Result of retrying one recorded event.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RetryOutcome {
    pub event_id: Uuid,
    pub success: bool,
}

/// Webhook delivery over HTTP.
pub struct WebhookDelivery {
    storage: Arc<Storage>,
    client: reqwest::Client,
}

impl WebhookDelivery {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            client: reqwest::Client::new(),
        }
    }

    async fn send(&self, url: &str, payload: &Value) -> SendOutcome {
        let response = self
            .client
            .post(url)
            .json(payload)
            .timeout(DELIVERY_TIMEOUT)
            .send()
            .await;

        match response {
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                SendOutcome {
                    success: status.is_success(),
                    status: Some(status.as_u16()),
                    body: Some(body),
                }
            }
            Err(e) => SendOutcome {
                success: false,
                status: None,
                body: Some(e.to_string()),
            },
        }
    }

    /// Deliver `payload` to the service's webhook URL, recording the
    /// attempt. Returns the recorded event, or `None` when the service
    /// has no webhook configured.
    pub async fn notify(&self, service_id: Uuid, payload: &Value) -> Result<Option<WebhookEvent>> {
        let service = self
            .storage
            .get_service(service_id)?
            .ok_or_else(|| Error::NotFound(format!("service {}", service_id)))?;

        let Some(url) = service.webhook_url else {
            return Ok(None);
        };

        let outcome = self.send(&url, payload).await;
        let event = WebhookEvent::new(
            service_id,
            url,
            payload.to_string(),
            outcome.status,
            outcome.body,
            outcome.success,
            1,
        );
        self.storage.put_webhook_event(&event)?;

        if !outcome.success {
            tracing::warn!(service = %service_id, status = ?outcome.status, "webhook delivery failed");
        }

        Ok(Some(event))
    }

    /// Re-send one recorded event, logging a new attempt.
    pub async fn retry_event(&self, event_id: Uuid) -> Result<bool> {
        let event = self
            .storage
            .get_webhook_event(event_id)?
            .ok_or_else(|| Error::NotFound(format!("webhook event {}", event_id)))?;
        let service = self
            .storage
            .get_service(event.service_id)?
            .ok_or_else(|| Error::NotFound(format!("service {}", event.service_id)))?;
        let url = service.webhook_url.ok_or_else(|| {
            Error::InvalidInput("service has no webhook url configured".to_string())
        })?;

        let payload: Value = serde_json::from_str(&event.payload)?;
        let outcome = self.send(&url, &payload).await;

        let retried = WebhookEvent::new(
            event.service_id,
            url,
            event.payload.clone(),
            outcome.status,
            outcome.body,
            outcome.success,
            event.attempt + 1,
        );
        self.storage.put_webhook_event(&retried)?;

        Ok(outcome.success)
    }

    /// Re-send every failed event of a service.
    pub async fn retry_failed(&self, service_id: Uuid) -> Result<Vec<RetryOutcome>> {
        let failed = self.storage.failed_webhook_events(service_id)?;

        let mut results = Vec::with_capacity(failed.len());
        for event in failed {
            let success = self.retry_event(event.id).await?;
            results.push(RetryOutcome {
                event_id: event.id,
                success,
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExternalService;
    use httpmock::prelude::*;
    use tempfile::tempdir;

    fn tenant_with_hook(storage: &Storage, url: &str) -> ExternalService {
        let service = ExternalService::new("hooked".to_string(), Some(url.to_string()));
        storage.put_service(&service).unwrap();
        service
    }

    #[tokio::test]
    async fn notify_records_success() {
        let server = MockServer::start_async().await;
        let hook = server
            .mock_async(|when, then| {
                when.method(POST).path("/hook");
                then.status(200).body("ok");
            })
            .await;

        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let service = tenant_with_hook(&storage, &server.url("/hook"));
        let delivery = WebhookDelivery::new(Arc::clone(&storage));

        let payload = serde_json::json!({"event": "referral.registered"});
        let event = delivery.notify(service.id, &payload).await.unwrap().unwrap();

        hook.assert_async().await;
        assert!(event.success);
        assert_eq!(event.response_status, Some(200));
        assert_eq!(event.attempt, 1);
    }

    #[tokio::test]
    async fn notify_without_url_is_a_noop() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let service = ExternalService::new("quiet".to_string(), None);
        storage.put_service(&service).unwrap();
        let delivery = WebhookDelivery::new(Arc::clone(&storage));

        let sent = delivery
            .notify(service.id, &serde_json::json!({}))
            .await
            .unwrap();
        assert!(sent.is_none());
        assert!(storage
            .webhook_events_by_service(service.id)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn failed_delivery_is_recorded_and_retryable() {
        let server = MockServer::start_async().await;
        let failing = server
            .mock_async(|when, then| {
                when.method(POST).path("/hook");
                then.status(502).body("bad gateway");
            })
            .await;

        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let service = tenant_with_hook(&storage, &server.url("/hook"));
        let delivery = WebhookDelivery::new(Arc::clone(&storage));

        let event = delivery
            .notify(service.id, &serde_json::json!({"n": 1}))
            .await
            .unwrap()
            .unwrap();
        assert!(!event.success);
        assert_eq!(event.response_status, Some(502));
        failing.delete_async().await;

        // Endpoint recovers; the retry succeeds and logs attempt 2.
        server
            .mock_async(|when, then| {
                when.method(POST).path("/hook");
                then.status(200);
            })
            .await;

        let outcomes = delivery.retry_failed(service.id).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].success);

        let events = storage.webhook_events_by_service(service.id).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|e| e.attempt == 2 && e.success));
    }

    #[tokio::test]
    async fn retry_unknown_event_is_not_found() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let delivery = WebhookDelivery::new(storage);

        let err = delivery.retry_event(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
