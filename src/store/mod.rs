//! Graph storage for resolved expressions.
//!
//! Two backends implement [`GraphStore`]:
//!
//! - [`MemGraphStore`]: concurrent maps (DashMap) plus a petgraph
//!   subsumption graph; all data is lost on process exit
//! - [`DurableGraphStore`]: the same in-memory graph, written through to
//!   ACID transactions (redb) and reloaded on open
//!
//! The graph holds one node per known id. Edges run from parent to child and
//! only ever connect direct subsumers; an id with an equivalence link has no
//! edges of its own and is reached through its representative.

pub mod durable;
pub mod mem;
pub mod traverse;

use std::collections::BTreeSet;

use crate::error::StoreError;
use crate::expression::CanonicalForm;
use crate::id::ExpressionId;

pub use durable::DurableGraphStore;
pub use mem::MemGraphStore;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Persistent mapping from canonical forms to ids, plus the subsumption graph.
///
/// Writes for one id are idempotent when retried with identical arguments.
/// An id carries either one equivalence link or one parent/child edge set;
/// mixing the two, or replacing either with different values, fails with
/// [`StoreError::Conflict`]. Reads reflect every committed write.
pub trait GraphStore: Send + Sync {
    /// Allocate a fresh generated id for `canonical`.
    ///
    /// Fails with [`StoreError::Duplicate`] carrying the existing id if the
    /// form is already stored.
    fn store_expression(&self, canonical: &CanonicalForm) -> StoreResult<ExpressionId>;

    fn expression_id(&self, canonical: &CanonicalForm) -> StoreResult<Option<ExpressionId>>;

    /// The canonical form stored for a generated id.
    fn canonical_form(&self, id: ExpressionId) -> StoreResult<Option<CanonicalForm>>;

    /// Forget a generated id: its canonical mapping, links and edges.
    /// The id itself is never handed out again.
    fn remove_expression(&self, id: ExpressionId) -> StoreResult<()>;

    /// Add a node for a precoordinated concept. Returns `true` if the
    /// concept was not known before.
    fn register_concept(&self, id: ExpressionId) -> StoreResult<bool>;

    fn contains(&self, id: ExpressionId) -> bool;

    /// Whether `id` has its equivalence link or edge set recorded. A stored
    /// expression without one was allocated but never placed in the graph.
    fn is_placed(&self, id: ExpressionId) -> bool;

    /// Link `id` to the equivalent expression that represents it.
    fn store_equivalence(&self, id: ExpressionId, representative: ExpressionId)
    -> StoreResult<()>;

    /// Follow equivalence links from `id`. Returns `id` itself when it has
    /// no link.
    fn representative_of(&self, id: ExpressionId) -> ExpressionId;

    /// Record the direct parents and children of `id`.
    ///
    /// Any existing edge `p → c` with `p` in `parents` and `c` in `children`
    /// is removed: `id` now sits between them.
    fn store_parents_and_children(
        &self,
        id: ExpressionId,
        parents: &BTreeSet<ExpressionId>,
        children: &BTreeSet<ExpressionId>,
    ) -> StoreResult<()>;

    fn parents(&self, id: ExpressionId) -> StoreResult<BTreeSet<ExpressionId>>;

    fn children(&self, id: ExpressionId) -> StoreResult<BTreeSet<ExpressionId>>;

    fn ancestors(&self, id: ExpressionId) -> StoreResult<BTreeSet<ExpressionId>>;

    fn descendants(&self, id: ExpressionId) -> StoreResult<BTreeSet<ExpressionId>>;

    /// Every stored expression, in id order.
    fn all_expressions(&self) -> StoreResult<Vec<(ExpressionId, CanonicalForm)>>;

    fn stats(&self) -> StoreStats;
}

/// Counts reported by [`GraphStore::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    /// Stored post-coordinated expressions.
    pub expressions: usize,
    /// Graph nodes, expressions and concepts alike.
    pub nodes: usize,
    pub edges: usize,
    pub equivalences: usize,
    /// Next generated id the store would allocate.
    pub next_id: u64,
}
