//! User enrollment and membership queries.

use crate::error::{Error, Result};
use crate::models::{User, UserServiceLink};
use crate::storage::Storage;
use std::sync::Arc;
use uuid::Uuid;

/// User registry scoped by tenant service.
pub struct UserRegistry {
    storage: Arc<Storage>,
}

impl UserRegistry {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Enroll a user under a tenant's external identifier. The
    /// identifier is unique per service; re-enrollment is rejected.
    pub fn register_user(&self, external_user_id: &str, service_id: Uuid) -> Result<User> {
        if self
            .storage
            .user_by_external_id(service_id, external_user_id)?
            .is_some()
        {
            return Err(Error::InvalidInput("user already exists".to_string()));
        }

        let user = User::new(external_user_id.to_string(), service_id);
        self.storage.put_user(&user)?;
        self.storage
            .put_membership(&UserServiceLink::new(user.id, service_id))?;
        Ok(user)
    }

    /// Memberships of one user across services.
    pub fn user_memberships(&self, user_id: Uuid) -> Result<Vec<UserServiceLink>> {
        self.storage.memberships_of_user(user_id)
    }

    /// Users enrolled in one service.
    pub fn service_members(&self, service_id: Uuid) -> Result<Vec<UserServiceLink>> {
        self.storage.members_of_service(service_id)
    }
}
