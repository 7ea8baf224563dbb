//! Referral registration and queries.
//!
//! `register` is the only legal way to create an edge. It holds a
//! per-service lock across the whole check-then-insert window, so two
//! concurrent registrations in the same service can never jointly close
//! a cycle or hand one node two parents. Registrations for different
//! services never contend.

use crate::error::{Error, Result};
use crate::models::{EventLogEntry, Referral};
use crate::storage::Storage;
use crate::webhook::WebhookDelivery;
use cascade_graph::{assign_level, detect_cycle, Mutation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// A candidate edge submitted for registration.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterReferral {
    pub referrer_id: Uuid,
    pub referred_id: Uuid,
    pub service_id: Uuid,
    pub referral_code_id: Option<Uuid>,
}

/// Grouped count of edges per referrer.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReferrerCount {
    pub referrer_id: Uuid,
    pub count: u64,
}

/// Grouped count of edges per level.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LevelCount {
    pub level: u32,
    pub count: u64,
}

/// Registration orchestration and read queries over the referral graph.
pub struct ReferralService {
    storage: Arc<Storage>,
    notifier: Option<Arc<WebhookDelivery>>,
    /// One async mutex per service; serializes check-then-insert.
    registration_locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl ReferralService {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            notifier: None,
            registration_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a webhook notifier; deliveries are best-effort and never
    /// fail a registration.
    pub fn with_notifier(mut self, notifier: Arc<WebhookDelivery>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    fn service_lock(&self, service: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .registration_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(service).or_default())
    }

    /// Drop a service's registration lock entry. Called when a tenant
    /// is archived; the map would otherwise grow for the node's whole
    /// lifetime. An in-flight registration keeps its own `Arc` clone.
    pub fn forget_service(&self, service: Uuid) {
        let mut locks = self
            .registration_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.remove(&service);
    }

    /// Register a new referral edge, or reject it.
    ///
    /// Rejections: referrer == referred, referred already has a parent
    /// in this service, or the edge would close a cycle. Exactly one
    /// store insert happens on success.
    pub async fn register(&self, req: RegisterReferral) -> Result<Referral> {
        if req.referrer_id == req.referred_id {
            return Err(Error::InvalidInput(
                "referrer and referred must be distinct users".to_string(),
            ));
        }

        let lock = self.service_lock(req.service_id);
        let guard = lock.lock().await;

        if self
            .storage
            .parent_edge(req.service_id, req.referred_id)?
            .is_some()
        {
            return Err(Error::InvalidInput(
                "referred user already has a parent in this service".to_string(),
            ));
        }

        detect_cycle(
            self.storage.as_ref(),
            req.referrer_id,
            req.referred_id,
            req.service_id,
        )?;

        let level = assign_level(self.storage.as_ref(), req.referrer_id, req.service_id)?;

        let referral = Referral::new(
            req.referrer_id,
            req.referred_id,
            req.service_id,
            req.referral_code_id,
            level,
        );
        self.storage.put_referral(&referral)?;

        self.storage.put_event_log(&EventLogEntry::new(
            req.service_id,
            Mutation::Insert.as_str(),
            format!(
                "referral {}: {} -> {} at level {}",
                referral.id, referral.referrer_id, referral.referred_id, referral.level
            ),
        ))?;

        // The graph is consistent once the insert and audit entry are
        // down; webhook delivery must not hold up other registrations.
        drop(guard);

        tracing::info!(
            referral = %referral.id,
            service = %referral.service_id,
            level = referral.level,
            "referral registered"
        );

        if let Some(notifier) = &self.notifier {
            let payload = serde_json::json!({
                "event": "referral.registered",
                "referral": referral,
            });
            if let Err(e) = notifier.notify(req.service_id, &payload).await {
                tracing::warn!(service = %req.service_id, "webhook notification failed: {}", e);
            }
        }

        Ok(referral)
    }

    /// Administrative level override.
    ///
    /// Sets `level` directly on an existing edge. Deliberately does NOT
    /// re-check cycle-freedom or recompute descendants' levels — the
    /// derived levels downstream of this edge may afterwards disagree
    /// with the chain-based computation. The audit log records the
    /// mutation as an admin override to keep that bypass visible.
    pub fn force_level(&self, referral_id: Uuid, new_level: u32) -> Result<Referral> {
        if new_level < 1 {
            return Err(Error::InvalidInput("level must be >= 1".to_string()));
        }

        let mut referral = self
            .storage
            .get_referral(referral_id)?
            .ok_or_else(|| Error::NotFound(format!("referral {}", referral_id)))?;

        referral.level = new_level;
        self.storage.put_referral(&referral)?;

        self.storage.put_event_log(&EventLogEntry::new(
            referral.service_id,
            Mutation::AdminOverride.as_str(),
            format!("referral {} level forced to {}", referral.id, new_level),
        ))?;

        Ok(referral)
    }

    /// Edges registered by `user` in `service`.
    pub fn referrals_of(&self, user: Uuid, service: Uuid) -> Result<Vec<Referral>> {
        self.storage.referrals_by_referrer(service, user)
    }

    /// The user's direct parent edge, as a zero-or-one element list.
    pub fn parent_chain(&self, user: Uuid, service: Uuid) -> Result<Vec<Referral>> {
        Ok(self
            .storage
            .parent_edge(service, user)?
            .into_iter()
            .collect())
    }

    /// Referrers ranked by edge count, descending, capped at `limit`.
    pub fn top_referrers(&self, service: Uuid, limit: usize) -> Result<Vec<ReferrerCount>> {
        let mut counts: HashMap<Uuid, u64> = HashMap::new();
        for referral in self.storage.referrals_by_service(service)? {
            *counts.entry(referral.referrer_id).or_default() += 1;
        }

        let mut ranked: Vec<ReferrerCount> = counts
            .into_iter()
            .map(|(referrer_id, count)| ReferrerCount { referrer_id, count })
            .collect();
        ranked.sort_by(|a, b| b.count.cmp(&a.count).then(a.referrer_id.cmp(&b.referrer_id)));
        ranked.truncate(limit);
        Ok(ranked)
    }

    /// Edge counts per level, ascending by level.
    pub fn stats(&self, service: Uuid) -> Result<Vec<LevelCount>> {
        let mut counts: HashMap<u32, u64> = HashMap::new();
        for referral in self.storage.referrals_by_service(service)? {
            *counts.entry(referral.level).or_default() += 1;
        }

        let mut stats: Vec<LevelCount> = counts
            .into_iter()
            .map(|(level, count)| LevelCount { level, count })
            .collect();
        stats.sort_by_key(|s| s.level);
        Ok(stats)
    }

    /// All edges of a service, for export.
    pub fn all_referrals(&self, service: Uuid) -> Result<Vec<Referral>> {
        self.storage.referrals_by_service(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn service_over(storage: Arc<Storage>) -> ReferralService {
        ReferralService::new(storage)
    }

    fn request(referrer: Uuid, referred: Uuid, service: Uuid) -> RegisterReferral {
        RegisterReferral {
            referrer_id: referrer,
            referred_id: referred,
            service_id: service,
            referral_code_id: None,
        }
    }

    #[tokio::test]
    async fn chain_levels_increase_and_loop_is_rejected() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let referrals = service_over(storage);

        let service = Uuid::new_v4();
        let [a, b, c, d] = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];

        let ab = referrals.register(request(a, b, service)).await.unwrap();
        let bc = referrals.register(request(b, c, service)).await.unwrap();
        let cd = referrals.register(request(c, d, service)).await.unwrap();
        assert_eq!(ab.level, 1);
        assert_eq!(bc.level, 2);
        assert_eq!(cd.level, 3);

        let err = referrals.register(request(d, a, service)).await.unwrap_err();
        assert!(matches!(err, Error::Cycle));
    }

    #[tokio::test]
    async fn reverse_edge_is_rejected() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let referrals = service_over(storage);

        let service = Uuid::new_v4();
        let [a, b] = [Uuid::new_v4(), Uuid::new_v4()];

        referrals.register(request(a, b, service)).await.unwrap();
        let err = referrals.register(request(b, a, service)).await.unwrap_err();
        assert!(matches!(err, Error::Cycle));
    }

    #[tokio::test]
    async fn self_referral_is_invalid() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let referrals = service_over(storage);

        let a = Uuid::new_v4();
        let err = referrals
            .register(request(a, a, Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn second_parent_is_rejected_even_with_other_code() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let referrals = service_over(storage);

        let service = Uuid::new_v4();
        let [a, b, c] = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];

        referrals.register(request(a, b, service)).await.unwrap();

        // Same referred user, different referrer and a code attached:
        // the (referred, service) uniqueness constraint still rejects it.
        let mut dup = request(c, b, service);
        dup.referral_code_id = Some(Uuid::new_v4());
        let err = referrals.register(dup).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn graphs_are_independent_across_services() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let referrals = service_over(storage);

        let [s1, s2] = [Uuid::new_v4(), Uuid::new_v4()];
        let [a, b] = [Uuid::new_v4(), Uuid::new_v4()];

        referrals.register(request(a, b, s1)).await.unwrap();
        // Reverse direction is fine in a different service, at level 1.
        let edge = referrals.register(request(b, a, s2)).await.unwrap();
        assert_eq!(edge.level, 1);
    }

    #[tokio::test]
    async fn force_level_validates_and_leaves_others_alone() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let referrals = service_over(Arc::clone(&storage));

        let service = Uuid::new_v4();
        let [a, b, c] = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];

        let ab = referrals.register(request(a, b, service)).await.unwrap();
        let bc = referrals.register(request(b, c, service)).await.unwrap();

        let err = referrals.force_level(ab.id, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let err = referrals.force_level(Uuid::new_v4(), 5).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let updated = referrals.force_level(ab.id, 7).unwrap();
        assert_eq!(updated.level, 7);

        // No cascade: the child edge keeps its derived level.
        let child = storage.get_referral(bc.id).unwrap().unwrap();
        assert_eq!(child.level, 2);
    }

    #[tokio::test]
    async fn force_level_is_audited_as_admin_override() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let referrals = service_over(Arc::clone(&storage));

        let service = Uuid::new_v4();
        let edge = referrals
            .register(request(Uuid::new_v4(), Uuid::new_v4(), service))
            .await
            .unwrap();
        referrals.force_level(edge.id, 4).unwrap();

        let overrides = storage.event_logs(service, Some("admin_override")).unwrap();
        assert_eq!(overrides.len(), 1);
        let inserts = storage.event_logs(service, Some("insert")).unwrap();
        assert_eq!(inserts.len(), 1);
    }

    #[tokio::test]
    async fn top_referrers_and_stats_group_correctly() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let referrals = service_over(storage);

        let service = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        // A refers three users, one of whom (B) refers one more.
        let first = referrals
            .register(request(a, b, service))
            .await
            .unwrap();
        referrals
            .register(request(a, Uuid::new_v4(), service))
            .await
            .unwrap();
        referrals
            .register(request(a, Uuid::new_v4(), service))
            .await
            .unwrap();
        referrals
            .register(request(b, Uuid::new_v4(), service))
            .await
            .unwrap();
        assert_eq!(first.level, 1);

        let top = referrals.top_referrers(service, 10).unwrap();
        assert_eq!(top[0].referrer_id, a);
        assert_eq!(top[0].count, 3);
        assert_eq!(top[1].referrer_id, b);
        assert_eq!(top[1].count, 1);

        let top_one = referrals.top_referrers(service, 1).unwrap();
        assert_eq!(top_one.len(), 1);

        let stats = referrals.stats(service).unwrap();
        assert_eq!(
            stats,
            vec![
                LevelCount { level: 1, count: 3 },
                LevelCount { level: 2, count: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn forced_max_level_blocks_child_derivation() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let referrals = service_over(storage);

        let service = Uuid::new_v4();
        let [a, b, c] = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];

        let ab = referrals.register(request(a, b, service)).await.unwrap();
        referrals.force_level(ab.id, u32::MAX).unwrap();

        // B's derived child level would wrap; the registration is
        // rejected instead of panicking or storing a wrapped level.
        let err = referrals.register(request(b, c, service)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(storage_len(&referrals, service), 1);
    }

    fn storage_len(referrals: &ReferralService, service: Uuid) -> usize {
        referrals.storage.referrals_by_service(service).unwrap().len()
    }

    #[tokio::test]
    async fn forget_service_prunes_lock_entry() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let referrals = service_over(storage);

        let service = Uuid::new_v4();
        referrals
            .register(request(Uuid::new_v4(), Uuid::new_v4(), service))
            .await
            .unwrap();
        assert!(referrals
            .registration_locks
            .lock()
            .unwrap()
            .contains_key(&service));

        referrals.forget_service(service);
        assert!(referrals.registration_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn parent_chain_is_direct_parent_only() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let referrals = service_over(storage);

        let service = Uuid::new_v4();
        let [a, b, c] = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];

        referrals.register(request(a, b, service)).await.unwrap();
        referrals.register(request(b, c, service)).await.unwrap();

        assert!(referrals.parent_chain(a, service).unwrap().is_empty());
        let chain = referrals.parent_chain(c, service).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].referrer_id, b);
    }
}
