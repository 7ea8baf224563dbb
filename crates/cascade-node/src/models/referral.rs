//! Referral edge model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One referral relationship: referrer invited referred, within one
/// tenant service.
///
/// `level` is derived at registration time (1 for a root referrer, else
/// the referrer's own level as a referred party plus one) and is never
/// recomputed afterwards. The administrative override can set it
/// directly, bypassing derivation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Referral {
    /// Unique identifier, assigned at creation
    pub id: Uuid,

    /// Who invited
    pub referrer_id: Uuid,

    /// Who was invited
    pub referred_id: Uuid,

    /// Tenant service the edge belongs to; graphs never cross services
    pub service_id: Uuid,

    /// Code used at registration, if any. No graph semantics.
    pub referral_code_id: Option<Uuid>,

    /// Referral generation, 1-indexed
    pub level: u32,

    /// Creation timestamp, immutable
    pub registered_at: DateTime<Utc>,
}

impl Referral {
    /// Create a new edge with a fresh id and the current timestamp.
    pub fn new(
        referrer_id: Uuid,
        referred_id: Uuid,
        service_id: Uuid,
        referral_code_id: Option<Uuid>,
        level: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            referrer_id,
            referred_id,
            service_id,
            referral_code_id,
            level,
            registered_at: Utc::now(),
        }
    }
}
