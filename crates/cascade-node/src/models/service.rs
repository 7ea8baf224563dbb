//! Tenant service, webhook event, audit log, and archival models.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A tenant of the node: an external service that enrolls users and
/// records referrals through the API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalService {
    pub id: Uuid,

    /// Unique name across the node
    pub service_name: String,

    /// Key presented in the `X-API-Key` header
    pub api_key: String,

    /// Where referral notifications are POSTed, if anywhere
    pub webhook_url: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl ExternalService {
    /// Register a tenant with a freshly generated API key.
    pub fn new(service_name: String, webhook_url: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            service_name,
            api_key: Self::generate_api_key(),
            webhook_url,
            created_at: Utc::now(),
        }
    }

    /// 48 hex chars of fresh randomness.
    pub fn generate_api_key() -> String {
        let mut bytes = [0u8; 24];
        rand::thread_rng().fill(&mut bytes[..]);
        hex::encode(bytes)
    }
}

/// One webhook delivery attempt and its recorded outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub service_id: Uuid,

    /// URL the payload was sent to at the time of the attempt
    pub url: String,

    /// JSON payload as sent
    pub payload: String,

    pub response_status: Option<u16>,
    pub response_body: Option<String>,
    pub success: bool,

    /// 1 for the original delivery, incremented per retry
    pub attempt: u32,

    pub created_at: DateTime<Utc>,
}

impl WebhookEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        service_id: Uuid,
        url: String,
        payload: String,
        response_status: Option<u16>,
        response_body: Option<String>,
        success: bool,
        attempt: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            service_id,
            url,
            payload,
            response_status,
            response_body,
            success,
            attempt,
            created_at: Utc::now(),
        }
    }
}

/// Audit log entry scoped to a service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventLogEntry {
    pub id: Uuid,
    pub service_id: Uuid,
    pub event_type: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl EventLogEntry {
    pub fn new(service_id: Uuid, event_type: &str, message: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            service_id,
            event_type: event_type.to_string(),
            message,
            created_at: Utc::now(),
        }
    }
}

/// Frozen copy of a tenant written during archival.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchivedService {
    pub id: Uuid,
    pub original_service_id: Uuid,
    pub service_name: String,
    pub api_key: String,
    pub webhook_url: Option<String>,
    pub archived_at: DateTime<Utc>,
}

impl ArchivedService {
    pub fn from_service(service: &ExternalService) -> Self {
        Self {
            id: Uuid::new_v4(),
            original_service_id: service.id,
            service_name: service.service_name.clone(),
            api_key: service.api_key.clone(),
            webhook_url: service.webhook_url.clone(),
            archived_at: Utc::now(),
        }
    }
}

/// Frozen copy of a referral code written during archival.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchivedCode {
    pub id: Uuid,
    pub original_code_id: Uuid,
    pub service_id: Uuid,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl ArchivedCode {
    pub fn from_code(code: &super::ReferralCode) -> Self {
        Self {
            id: Uuid::new_v4(),
            original_code_id: code.id,
            service_id: code.service_id,
            code: code.code.clone(),
            created_at: code.created_at,
            expires_at: code.expires_at,
            is_active: code.is_active,
        }
    }
}

/// Frozen copy of a webhook event written during archival.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchivedWebhookEvent {
    pub id: Uuid,
    pub original_event_id: Uuid,
    pub service_id: Uuid,
    pub payload: String,
    pub response_status: Option<u16>,
    pub success: bool,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

impl ArchivedWebhookEvent {
    pub fn from_event(event: &WebhookEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            original_event_id: event.id,
            service_id: event.service_id,
            payload: event.payload.clone(),
            response_status: event.response_status,
            success: event.success,
            attempt: event.attempt,
            created_at: event.created_at,
        }
    }
}
