//! Referral code lifecycle.

use crate::error::{Error, Result};
use crate::models::{CodeUsage, ReferralCode};
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Attempts at drawing an unused code string before giving up. The
/// space is 36^9; a collision streak this long means the RNG is broken.
const CODE_DRAW_ATTEMPTS: usize = 8;

/// Issuance and validation of referral codes.
pub struct CodeService {
    storage: Arc<Storage>,
}

impl CodeService {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    fn draw_unique(
        &self,
        user_id: Uuid,
        service_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
        usage_limit: Option<u32>,
    ) -> Result<ReferralCode> {
        for _ in 0..CODE_DRAW_ATTEMPTS {
            let code = ReferralCode::new(user_id, service_id, expires_at, usage_limit);
            if self
                .storage
                .code_by_string(service_id, &code.code)?
                .is_none()
            {
                return Ok(code);
            }
        }
        Err(Error::Storage(
            "could not draw an unused code string".to_string(),
        ))
    }

    /// Issue a single code.
    pub fn create_code(
        &self,
        user_id: Uuid,
        service_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
        usage_limit: Option<u32>,
    ) -> Result<ReferralCode> {
        let code = self.draw_unique(user_id, service_id, expires_at, usage_limit)?;
        self.storage.put_code(&code)?;
        Ok(code)
    }

    /// Issue `count` codes for one user in one batch.
    pub fn mass_generate(
        &self,
        user_id: Uuid,
        service_id: Uuid,
        count: usize,
    ) -> Result<Vec<ReferralCode>> {
        let mut codes = Vec::with_capacity(count);
        for _ in 0..count {
            let code = self.draw_unique(user_id, service_id, None, None)?;
            self.storage.put_code(&code)?;
            codes.push(code);
        }
        Ok(codes)
    }

    /// Resolve a code string and check it is usable right now.
    pub fn validate_code(&self, service_id: Uuid, code: &str) -> Result<ReferralCode> {
        let code = self
            .storage
            .code_by_string(service_id, code)?
            .ok_or_else(|| Error::InvalidInput("invalid code".to_string()))?;

        if !code.is_active {
            return Err(Error::InvalidInput("code is not active".to_string()));
        }
        if code.is_expired(Utc::now()) {
            return Err(Error::InvalidInput("code expired".to_string()));
        }
        Ok(code)
    }

    /// Deactivate a code; validation will reject it afterwards.
    pub fn deactivate_code(&self, code_id: Uuid) -> Result<ReferralCode> {
        let mut code = self
            .storage
            .get_code(code_id)?
            .ok_or_else(|| Error::NotFound(format!("referral code {}", code_id)))?;
        code.is_active = false;
        self.storage.put_code(&code)?;
        Ok(code)
    }

    /// Replace a code's expiry and usage limit.
    pub fn update_limits(
        &self,
        code_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
        usage_limit: Option<u32>,
    ) -> Result<ReferralCode> {
        let mut code = self
            .storage
            .get_code(code_id)?
            .ok_or_else(|| Error::NotFound(format!("referral code {}", code_id)))?;
        code.expires_at = expires_at;
        code.usage_limit = usage_limit;
        self.storage.put_code(&code)?;
        Ok(code)
    }

    /// Every code issued for a service.
    pub fn codes_by_service(&self, service_id: Uuid) -> Result<Vec<ReferralCode>> {
        self.storage.codes_by_service(service_id)
    }

    /// Codes that have been deactivated.
    pub fn inactive_codes(&self, service_id: Uuid) -> Result<Vec<ReferralCode>> {
        let mut codes = self.storage.codes_by_service(service_id)?;
        codes.retain(|c| !c.is_active);
        Ok(codes)
    }

    /// Record one use of a code.
    pub fn log_usage(&self, code_id: Uuid, user_id: Uuid) -> Result<CodeUsage> {
        if self.storage.get_code(code_id)?.is_none() {
            return Err(Error::NotFound(format!("referral code {}", code_id)));
        }
        let usage = CodeUsage::new(code_id, user_id);
        self.storage.put_code_usage(&usage)?;
        Ok(usage)
    }

    /// Usage history of a code.
    pub fn usage_history(&self, code_id: Uuid) -> Result<Vec<CodeUsage>> {
        self.storage.code_usage_history(code_id)
    }

    /// Drop a code's usage history.
    pub fn clear_usage(&self, code_id: Uuid) -> Result<()> {
        self.storage.clear_code_usage(code_id)
    }
}
