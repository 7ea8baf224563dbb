//! Record types persisted by the Cascade node.
//!
//! # Core Types
//!
//! - [`Referral`] - One referral edge (referrer → referred) within a service
//! - [`ReferralCode`] - An issued referral code with expiry and usage limits
//! - [`User`] - A participant enrolled by an external service
//! - [`ExternalService`] - A tenant of the node
//!
//! # Supporting Types
//!
//! - [`UserServiceLink`] - Membership of a user in a service
//! - [`CodeUsage`] - One recorded use of a referral code
//! - [`WebhookEvent`] - One webhook delivery attempt and its outcome
//! - [`EventLogEntry`] - Audit log entry scoped to a service
//! - [`ArchivedService`], [`ArchivedCode`], [`ArchivedWebhookEvent`] -
//!   frozen copies written during whole-service archival

mod code;
mod referral;
mod service;
mod user;

pub use code::{CodeUsage, ReferralCode};
pub use referral::Referral;
pub use service::{
    ArchivedCode, ArchivedService, ArchivedWebhookEvent, EventLogEntry, ExternalService,
    WebhookEvent,
};
pub use user::{User, UserServiceLink};
