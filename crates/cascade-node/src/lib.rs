//! Cascade Node - Multi-Tenant Referral Tracking Backend
//!
//! External services register users, issue referral codes, and record
//! referral relationships. The referral graph integrity engine
//! (cascade-graph) keeps every per-service graph acyclic and assigns
//! each edge its hierarchical level at registration time.
//!
//! # Architecture
//!
//! - **Models**: Persisted record types (Referral, ReferralCode, User, ...)
//! - **Storage**: RocksDB-backed persistent storage with index keys
//! - **Referrals**: Registration orchestration over the graph engine
//! - **Codes / Users / Directory**: Tenant-scoped plumbing services
//! - **Webhook**: Outbound notifications with retry
//! - **API**: HTTP endpoints, gated by per-tenant API keys
//!
//! # Example
//!
//! ```no_run
//! use cascade_node::{Node, NodeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NodeConfig::default();
//!     let node = Node::new(config)?;
//!     node.run().await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod codes;
pub mod directory;
pub mod error;
pub mod export;
pub mod models;
pub mod node;
pub mod referrals;
pub mod storage;
pub mod users;
pub mod webhook;

pub use error::{Error, Result};
pub use models::{
    CodeUsage, EventLogEntry, ExternalService, Referral, ReferralCode, User, UserServiceLink,
    WebhookEvent,
};
pub use node::{Node, NodeConfig};
pub use storage::Storage;
