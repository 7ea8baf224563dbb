//! Referral code models.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// An issued referral code, unique per (code string, service).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferralCode {
    pub id: Uuid,

    /// Code string handed to users, format `XXXXXX-XXX`
    pub code: String,

    /// Owner of the code
    pub user_id: Uuid,

    /// Service the code is valid in
    pub service_id: Uuid,

    /// Expiry; `None` means the code never expires
    pub expires_at: Option<DateTime<Utc>>,

    /// Maximum number of uses; `None` means unlimited
    pub usage_limit: Option<u32>,

    pub is_active: bool,

    pub created_at: DateTime<Utc>,
}

impl ReferralCode {
    /// Issue a code with a freshly generated code string.
    pub fn new(
        user_id: Uuid,
        service_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
        usage_limit: Option<u32>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: Self::generate_code(),
            user_id,
            service_id,
            expires_at,
            usage_limit,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    /// Generate a code string of the form `ABC123-XYZ`.
    pub fn generate_code() -> String {
        let mut rng = rand::thread_rng();
        let mut segment = |len: usize| -> String {
            (0..len)
                .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
                .collect()
        };
        let head = segment(6);
        let tail = segment(3);
        format!("{}-{}", head, tail)
    }

    /// Whether the code has passed its expiry time.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expiry) if expiry < now)
    }
}

/// One recorded use of a referral code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeUsage {
    pub id: Uuid,
    pub referral_code_id: Uuid,
    pub used_by_user_id: Uuid,
    pub used_at: DateTime<Utc>,
}

impl CodeUsage {
    pub fn new(referral_code_id: Uuid, used_by_user_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            referral_code_id,
            used_by_user_id,
            used_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn code_string_shape() {
        let code = ReferralCode::generate_code();
        assert_eq!(code.len(), 10);
        let (head, tail) = code.split_once('-').expect("missing separator");
        assert_eq!(head.len(), 6);
        assert_eq!(tail.len(), 3);
        assert!(code
            .chars()
            .all(|c| c == '-' || c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn new_code_is_active() {
        let code = ReferralCode::new(Uuid::new_v4(), Uuid::new_v4(), None, None);
        assert!(code.is_active);
        assert!(code.expires_at.is_none());
        assert!(code.usage_limit.is_none());
    }

    #[test]
    fn expiry_check() {
        let now = Utc::now();
        let expired = ReferralCode::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Some(now - Duration::hours(1)),
            None,
        );
        let live = ReferralCode::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Some(now + Duration::hours(1)),
            None,
        );
        let eternal = ReferralCode::new(Uuid::new_v4(), Uuid::new_v4(), None, None);

        assert!(expired.is_expired(now));
        assert!(!live.is_expired(now));
        assert!(!eternal.is_expired(now));
    }
}
