//! Referral graph integrity engine.
//!
//! A referral graph is a directed graph of edges (referrer → referred),
//! scoped to one tenant service. The graph must stay acyclic, and every
//! edge carries a 1-indexed `level` — its distance in generations from a
//! root referrer.
//!
//! Both properties are maintained *incrementally*: acyclicity is checked
//! only when an edge is inserted, and an edge's level is derived from its
//! referrer's own parent edge rather than by walking to a root. This
//! means the whole guarantee rests on every insert going through this
//! crate — the resolver trusts the levels already in the store.
//!
//! The resolver never touches storage directly. It reads parent edges
//! through the [`ParentSource`] trait, so the node crate can back it with
//! whatever store it likes and tests can back it with a hash map.

mod resolver;

pub use resolver::{assign_level, detect_cycle, ResolveError, MAX_CHAIN_DEPTH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A node's parent edge, as seen by the resolver.
///
/// "Parent" means the unique edge in which the node appears as the
/// referred party. A node with no parent link is a root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentLink {
    /// Who referred this node.
    pub referrer_id: Uuid,
    /// The level of the parent edge itself.
    pub level: u32,
}

/// Read access to parent edges, the only store contract the resolver needs.
///
/// Implementations must return at most one link per (node, service) pair;
/// the registration path enforces that uniqueness at insert time.
pub trait ParentSource {
    type Error;

    /// The unique edge in `service` where `node` is the referred party,
    /// or `None` if the node is a root (or unknown).
    fn parent_of(&self, node: Uuid, service: Uuid) -> Result<Option<ParentLink>, Self::Error>;
}

/// How an edge mutation came about.
///
/// `AdminOverride` marks the administrative level correction, which
/// bypasses cycle checks and level derivation entirely and can leave
/// derived levels inconsistent. Keeping the two paths as distinct
/// variants makes that bypass visible wherever mutations are recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutation {
    /// A resolver-validated insert.
    Insert,
    /// A direct level write that skips the resolver.
    AdminOverride,
}

impl Mutation {
    /// Stable label used in audit log entries.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mutation::Insert => "insert",
            Mutation::AdminOverride => "admin_override",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_labels() {
        assert_eq!(Mutation::Insert.as_str(), "insert");
        assert_eq!(Mutation::AdminOverride.as_str(), "admin_override");
    }
}
