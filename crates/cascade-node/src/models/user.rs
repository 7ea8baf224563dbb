//! User and service-membership models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A participant enrolled through an external service.
///
/// `external_user_id` is the caller's own identifier for the user and is
/// unique within one service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Internal identifier
    pub id: Uuid,

    /// The tenant's identifier for this user
    pub external_user_id: String,

    /// Service the user was first enrolled through
    pub service_id: Uuid,

    /// Enrollment timestamp
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Enroll a user with a fresh id.
    pub fn new(external_user_id: String, service_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_user_id,
            service_id,
            created_at: Utc::now(),
        }
    }
}

/// Membership of a user in a service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserServiceLink {
    pub id: Uuid,
    pub user_id: Uuid,
    pub service_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl UserServiceLink {
    pub fn new(user_id: Uuid, service_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            service_id,
            created_at: Utc::now(),
        }
    }
}
