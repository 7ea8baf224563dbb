//! Tenant directory: service registration, webhook configuration,
//! audit logs, and whole-service archival.

use crate::error::{Error, Result};
use crate::models::{
    ArchivedCode, ArchivedService, ArchivedWebhookEvent, EventLogEntry, ExternalService,
};
use crate::storage::Storage;
use std::sync::Arc;
use uuid::Uuid;

/// Summary returned by [`ServiceDirectory::archive_service`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct ArchiveSummary {
    pub archived: bool,
    pub codes: usize,
    pub webhook_events: usize,
    pub referrals: usize,
}

/// Registration and lifecycle of tenant services.
pub struct ServiceDirectory {
    storage: Arc<Storage>,
}

impl ServiceDirectory {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Register a tenant. Names are unique; the generated API key is
    /// returned once as part of the record.
    pub fn register_service(
        &self,
        service_name: &str,
        webhook_url: Option<String>,
    ) -> Result<ExternalService> {
        if self.storage.service_by_name(service_name)?.is_some() {
            return Err(Error::InvalidInput(format!(
                "service name already registered: {}",
                service_name
            )));
        }

        let service = ExternalService::new(service_name.to_string(), webhook_url);
        self.storage.put_service(&service)?;

        tracing::info!(service = %service.id, name = %service.service_name, "tenant registered");
        Ok(service)
    }

    /// Replace a tenant's webhook URL (or clear it with `None`).
    pub fn update_webhook(
        &self,
        service_id: Uuid,
        webhook_url: Option<String>,
    ) -> Result<ExternalService> {
        let mut service = self
            .storage
            .get_service(service_id)?
            .ok_or_else(|| Error::NotFound(format!("service {}", service_id)))?;
        service.webhook_url = webhook_url;
        self.storage.put_service(&service)?;
        Ok(service)
    }

    pub fn get_service(&self, service_id: Uuid) -> Result<Option<ExternalService>> {
        self.storage.get_service(service_id)
    }

    pub fn service_by_api_key(&self, api_key: &str) -> Result<Option<ExternalService>> {
        self.storage.service_by_api_key(api_key)
    }

    /// Append an audit log entry for a service.
    pub fn log_event(&self, service_id: Uuid, event_type: &str, message: String) -> Result<()> {
        self.storage
            .put_event_log(&EventLogEntry::new(service_id, event_type, message))
    }

    /// Audit log of a service, newest first.
    pub fn logs(&self, service_id: Uuid, event_type: Option<&str>) -> Result<Vec<EventLogEntry>> {
        self.storage.event_logs(service_id, event_type)
    }

    /// Archive a whole tenant: freeze the service, its codes, and its
    /// webhook events into archived records, then delete the live rows
    /// including every referral edge of the service. The audit log
    /// stays behind as the record of what happened.
    pub fn archive_service(&self, service_id: Uuid) -> Result<ArchiveSummary> {
        let service = self
            .storage
            .get_service(service_id)?
            .ok_or_else(|| Error::NotFound(format!("service {}", service_id)))?;

        self.storage
            .put_archived_service(&ArchivedService::from_service(&service))?;

        let codes = self.storage.codes_by_service(service_id)?;
        for code in &codes {
            self.storage.put_archived_code(&ArchivedCode::from_code(code))?;
            self.storage.delete_code(code)?;
        }

        let events = self.storage.webhook_events_by_service(service_id)?;
        for event in &events {
            self.storage
                .put_archived_webhook_event(&ArchivedWebhookEvent::from_event(event))?;
            self.storage.delete_webhook_event(event)?;
        }

        let referrals = self.storage.referrals_by_service(service_id)?;
        for referral in &referrals {
            self.storage.delete_referral(referral)?;
        }

        self.storage.delete_service(&service)?;

        self.log_event(
            service_id,
            "archive",
            format!("Service archived (name={})", service.service_name),
        )?;
        tracing::info!(service = %service_id, name = %service.service_name, "tenant archived");

        Ok(ArchiveSummary {
            archived: true,
            codes: codes.len(),
            webhook_events: events.len(),
            referrals: referrals.len(),
        })
    }
}
