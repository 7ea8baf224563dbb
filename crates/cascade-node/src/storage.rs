//! Persistent storage using RocksDB.
//!
//! All records are JSON under `prefix:{id}` keys. Secondary lookups go
//! through index keys whose value is the primary record's id. The
//! `parent:{service}:{referred}` key is special: its existence is the
//! uniqueness constraint "at most one parent per node per service" —
//! the registration path checks it before writing and the resolver
//! reads parents through it.

use crate::error::{Error, Result};
use crate::models::{
    ArchivedCode, ArchivedService, ArchivedWebhookEvent, CodeUsage, EventLogEntry,
    ExternalService, Referral, ReferralCode, User, UserServiceLink, WebhookEvent,
};
use cascade_graph::{ParentLink, ParentSource};
use rocksdb::{Options, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use uuid::Uuid;

/// Storage backend for all Cascade records.
pub struct Storage {
    db: DB,
}

impl Storage {
    /// Open or create storage at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }

    fn put_record<T: Serialize>(&self, key: &str, record: &T) -> Result<()> {
        let value = serde_json::to_vec(record)?;
        self.db.put(key.as_bytes(), value)?;
        Ok(())
    }

    fn get_record<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.db.get(key.as_bytes())? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// Collect every record stored directly under `prefix`.
    fn records_under<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        let mut records = Vec::new();
        let iter = self.db.prefix_iterator(prefix.as_bytes());
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }

    /// Collect the record ids an index prefix points at.
    fn ids_under(&self, prefix: &str) -> Result<Vec<Uuid>> {
        let mut ids = Vec::new();
        let iter = self.db.prefix_iterator(prefix.as_bytes());
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let id = Uuid::parse_str(&String::from_utf8_lossy(&value))
                .map_err(|_| Error::Storage(format!("malformed index value under {}", prefix)))?;
            ids.push(id);
        }
        Ok(ids)
    }

    fn put_index(&self, key: &str, id: Uuid) -> Result<()> {
        self.db.put(key.as_bytes(), id.to_string().as_bytes())?;
        Ok(())
    }

    // --- Referrals ---

    /// Store a referral edge and its index keys.
    pub fn put_referral(&self, referral: &Referral) -> Result<()> {
        self.put_record(&format!("referral:{}", referral.id), referral)?;
        self.put_index(
            &format!("parent:{}:{}", referral.service_id, referral.referred_id),
            referral.id,
        )?;
        self.put_index(
            &format!(
                "referrer:{}:{}:{}",
                referral.service_id, referral.referrer_id, referral.id
            ),
            referral.id,
        )?;
        self.put_index(
            &format!("svc-referral:{}:{}", referral.service_id, referral.id),
            referral.id,
        )?;
        Ok(())
    }

    /// Get a referral edge by id.
    pub fn get_referral(&self, id: Uuid) -> Result<Option<Referral>> {
        self.get_record(&format!("referral:{}", id))
    }

    /// The unique edge where `referred` is the invited party, if any.
    pub fn parent_edge(&self, service: Uuid, referred: Uuid) -> Result<Option<Referral>> {
        let key = format!("parent:{}:{}", service, referred);
        let Some(value) = self.db.get(key.as_bytes())? else {
            return Ok(None);
        };
        let id = Uuid::parse_str(&String::from_utf8_lossy(&value))
            .map_err(|_| Error::Storage("malformed parent index value".to_string()))?;
        self.get_referral(id)
    }

    /// Edges registered by `referrer` within `service`.
    pub fn referrals_by_referrer(&self, service: Uuid, referrer: Uuid) -> Result<Vec<Referral>> {
        let ids = self.ids_under(&format!("referrer:{}:{}:", service, referrer))?;
        self.load_referrals(ids)
    }

    /// Every edge in `service`.
    pub fn referrals_by_service(&self, service: Uuid) -> Result<Vec<Referral>> {
        let ids = self.ids_under(&format!("svc-referral:{}:", service))?;
        self.load_referrals(ids)
    }

    fn load_referrals(&self, ids: Vec<Uuid>) -> Result<Vec<Referral>> {
        let mut referrals = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(referral) = self.get_referral(id)? {
                referrals.push(referral);
            }
        }
        Ok(referrals)
    }

    /// Delete an edge and its index keys.
    pub fn delete_referral(&self, referral: &Referral) -> Result<()> {
        self.db
            .delete(format!("referral:{}", referral.id).as_bytes())?;
        self.db.delete(
            format!("parent:{}:{}", referral.service_id, referral.referred_id).as_bytes(),
        )?;
        self.db.delete(
            format!(
                "referrer:{}:{}:{}",
                referral.service_id, referral.referrer_id, referral.id
            )
            .as_bytes(),
        )?;
        self.db
            .delete(format!("svc-referral:{}:{}", referral.service_id, referral.id).as_bytes())?;
        Ok(())
    }

    // --- External services ---

    /// Store a tenant and its lookup keys.
    pub fn put_service(&self, service: &ExternalService) -> Result<()> {
        self.put_record(&format!("service:{}", service.id), service)?;
        self.put_index(
            &format!("service-name:{}", service.service_name),
            service.id,
        )?;
        self.put_index(&format!("apikey:{}", service.api_key), service.id)?;
        Ok(())
    }

    /// Get a tenant by id.
    pub fn get_service(&self, id: Uuid) -> Result<Option<ExternalService>> {
        self.get_record(&format!("service:{}", id))
    }

    /// Get a tenant by unique name.
    pub fn service_by_name(&self, name: &str) -> Result<Option<ExternalService>> {
        let key = format!("service-name:{}", name);
        let Some(value) = self.db.get(key.as_bytes())? else {
            return Ok(None);
        };
        let id = Uuid::parse_str(&String::from_utf8_lossy(&value))
            .map_err(|_| Error::Storage("malformed service-name index value".to_string()))?;
        self.get_service(id)
    }

    /// Get a tenant by API key.
    pub fn service_by_api_key(&self, api_key: &str) -> Result<Option<ExternalService>> {
        let key = format!("apikey:{}", api_key);
        let Some(value) = self.db.get(key.as_bytes())? else {
            return Ok(None);
        };
        let id = Uuid::parse_str(&String::from_utf8_lossy(&value))
            .map_err(|_| Error::Storage("malformed apikey index value".to_string()))?;
        self.get_service(id)
    }

    /// Delete a tenant and its lookup keys.
    pub fn delete_service(&self, service: &ExternalService) -> Result<()> {
        self.db
            .delete(format!("service:{}", service.id).as_bytes())?;
        self.db
            .delete(format!("service-name:{}", service.service_name).as_bytes())?;
        self.db
            .delete(format!("apikey:{}", service.api_key).as_bytes())?;
        Ok(())
    }

    // --- Users ---

    /// Store a user and the per-service external-id key.
    pub fn put_user(&self, user: &User) -> Result<()> {
        self.put_record(&format!("user:{}", user.id), user)?;
        self.put_index(
            &format!("user-ext:{}:{}", user.service_id, user.external_user_id),
            user.id,
        )?;
        Ok(())
    }

    /// Get a user by id.
    pub fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        self.get_record(&format!("user:{}", id))
    }

    /// Get a user by the tenant's own identifier.
    pub fn user_by_external_id(&self, service: Uuid, external_id: &str) -> Result<Option<User>> {
        let key = format!("user-ext:{}:{}", service, external_id);
        let Some(value) = self.db.get(key.as_bytes())? else {
            return Ok(None);
        };
        let id = Uuid::parse_str(&String::from_utf8_lossy(&value))
            .map_err(|_| Error::Storage("malformed user-ext index value".to_string()))?;
        self.get_user(id)
    }

    /// Store a user-service membership link.
    pub fn put_membership(&self, link: &UserServiceLink) -> Result<()> {
        self.put_record(&format!("membership:{}:{}", link.user_id, link.id), link)?;
        self.put_record(&format!("svc-member:{}:{}", link.service_id, link.id), link)
    }

    /// Services a user belongs to.
    pub fn memberships_of_user(&self, user: Uuid) -> Result<Vec<UserServiceLink>> {
        self.records_under(&format!("membership:{}:", user))
    }

    /// Users enrolled in a service.
    pub fn members_of_service(&self, service: Uuid) -> Result<Vec<UserServiceLink>> {
        self.records_under(&format!("svc-member:{}:", service))
    }

    // --- Referral codes ---

    /// Store a code and its index keys.
    pub fn put_code(&self, code: &ReferralCode) -> Result<()> {
        self.put_record(&format!("code:{}", code.id), code)?;
        self.put_index(
            &format!("code-str:{}:{}", code.service_id, code.code),
            code.id,
        )?;
        self.put_index(&format!("svc-code:{}:{}", code.service_id, code.id), code.id)?;
        Ok(())
    }

    /// Get a code by id.
    pub fn get_code(&self, id: Uuid) -> Result<Option<ReferralCode>> {
        self.get_record(&format!("code:{}", id))
    }

    /// Get a code by its string, scoped to one service.
    pub fn code_by_string(&self, service: Uuid, code: &str) -> Result<Option<ReferralCode>> {
        let key = format!("code-str:{}:{}", service, code);
        let Some(value) = self.db.get(key.as_bytes())? else {
            return Ok(None);
        };
        let id = Uuid::parse_str(&String::from_utf8_lossy(&value))
            .map_err(|_| Error::Storage("malformed code-str index value".to_string()))?;
        self.get_code(id)
    }

    /// Every code issued for a service.
    pub fn codes_by_service(&self, service: Uuid) -> Result<Vec<ReferralCode>> {
        let ids = self.ids_under(&format!("svc-code:{}:", service))?;
        let mut codes = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(code) = self.get_code(id)? {
                codes.push(code);
            }
        }
        Ok(codes)
    }

    /// Delete a code, its index keys, and its usage history.
    pub fn delete_code(&self, code: &ReferralCode) -> Result<()> {
        self.db.delete(format!("code:{}", code.id).as_bytes())?;
        self.db
            .delete(format!("code-str:{}:{}", code.service_id, code.code).as_bytes())?;
        self.db
            .delete(format!("svc-code:{}:{}", code.service_id, code.id).as_bytes())?;
        self.clear_code_usage(code.id)?;
        Ok(())
    }

    /// Record one use of a code.
    pub fn put_code_usage(&self, usage: &CodeUsage) -> Result<()> {
        self.put_record(
            &format!("code-usage:{}:{}", usage.referral_code_id, usage.id),
            usage,
        )
    }

    /// Usage history of a code.
    pub fn code_usage_history(&self, code: Uuid) -> Result<Vec<CodeUsage>> {
        self.records_under(&format!("code-usage:{}:", code))
    }

    /// Drop every usage record of a code.
    pub fn clear_code_usage(&self, code: Uuid) -> Result<()> {
        for usage in self.code_usage_history(code)? {
            self.db
                .delete(format!("code-usage:{}:{}", code, usage.id).as_bytes())?;
        }
        Ok(())
    }

    // --- Webhook events ---

    /// Store a webhook delivery record.
    pub fn put_webhook_event(&self, event: &WebhookEvent) -> Result<()> {
        self.put_record(&format!("webhook-event:{}", event.id), event)?;
        self.put_index(
            &format!("svc-webhook:{}:{}", event.service_id, event.id),
            event.id,
        )?;
        Ok(())
    }

    /// Get a webhook delivery record by id.
    pub fn get_webhook_event(&self, id: Uuid) -> Result<Option<WebhookEvent>> {
        self.get_record(&format!("webhook-event:{}", id))
    }

    /// Every delivery record for a service.
    pub fn webhook_events_by_service(&self, service: Uuid) -> Result<Vec<WebhookEvent>> {
        let ids = self.ids_under(&format!("svc-webhook:{}:", service))?;
        let mut events = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(event) = self.get_webhook_event(id)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Delivery records that have not yet succeeded.
    pub fn failed_webhook_events(&self, service: Uuid) -> Result<Vec<WebhookEvent>> {
        let mut events = self.webhook_events_by_service(service)?;
        events.retain(|e| !e.success);
        Ok(events)
    }

    /// Delete a delivery record and its index key.
    pub fn delete_webhook_event(&self, event: &WebhookEvent) -> Result<()> {
        self.db
            .delete(format!("webhook-event:{}", event.id).as_bytes())?;
        self.db
            .delete(format!("svc-webhook:{}:{}", event.service_id, event.id).as_bytes())?;
        Ok(())
    }

    // --- Audit log ---

    /// Append an audit log entry.
    pub fn put_event_log(&self, entry: &EventLogEntry) -> Result<()> {
        self.put_record(
            &format!("event-log:{}:{}", entry.service_id, entry.id),
            entry,
        )
    }

    /// Audit log for a service, newest first, optionally filtered by type.
    pub fn event_logs(&self, service: Uuid, event_type: Option<&str>) -> Result<Vec<EventLogEntry>> {
        let mut entries: Vec<EventLogEntry> =
            self.records_under(&format!("event-log:{}:", service))?;
        if let Some(wanted) = event_type {
            entries.retain(|e| e.event_type == wanted);
        }
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    // --- Archival ---

    pub fn put_archived_service(&self, archived: &ArchivedService) -> Result<()> {
        self.put_record(&format!("archived-service:{}", archived.id), archived)
    }

    pub fn archived_services(&self) -> Result<Vec<ArchivedService>> {
        self.records_under("archived-service:")
    }

    pub fn put_archived_code(&self, archived: &ArchivedCode) -> Result<()> {
        self.put_record(
            &format!("archived-code:{}:{}", archived.service_id, archived.id),
            archived,
        )
    }

    pub fn archived_codes_by_service(&self, service: Uuid) -> Result<Vec<ArchivedCode>> {
        self.records_under(&format!("archived-code:{}:", service))
    }

    pub fn put_archived_webhook_event(&self, archived: &ArchivedWebhookEvent) -> Result<()> {
        self.put_record(
            &format!("archived-webhook:{}:{}", archived.service_id, archived.id),
            archived,
        )
    }

    pub fn archived_webhook_events_by_service(
        &self,
        service: Uuid,
    ) -> Result<Vec<ArchivedWebhookEvent>> {
        self.records_under(&format!("archived-webhook:{}:", service))
    }
}

/// The resolver reads parents straight off the `parent:` index.
impl ParentSource for Storage {
    type Error = Error;

    fn parent_of(&self, node: Uuid, service: Uuid) -> Result<Option<ParentLink>> {
        Ok(self.parent_edge(service, node)?.map(|edge| ParentLink {
            referrer_id: edge.referrer_id,
            level: edge.level,
        }))
    }
}
