//! Classification: the boundary to the subsumption oracle.
//!
//! - [`ClassificationAdapter`]: the contract every classifier implements
//! - [`ConceptTable`]: handle ↔ id mapping owned by the adapter
//! - [`StructuralClassifier`]: reference classifier (structural subsumption)
//! - [`Oracle`]: worker thread that serializes adapter access and bounds
//!   every call with a timeout

pub mod definition;
pub mod oracle;
pub mod structural;
pub mod table;

use std::collections::BTreeSet;

use crate::error::ClassifyError;
use crate::id::ExpressionId;

pub use definition::{Definition, Relationship, RelationshipValue};
pub use oracle::Oracle;
pub use structural::StructuralClassifier;
pub use table::{ConceptRef, ConceptTable};

/// Result type for classifier operations.
pub type ClassifyResult<T> = std::result::Result<T, ClassifyError>;

/// A classification oracle.
///
/// Results reflect the definitions as of the last [`flush`](Self::flush).
/// Implementations need not be safe under concurrent mutation; the
/// [`Oracle`] worker guarantees callers never interleave.
pub trait ClassificationAdapter: Send {
    /// Register or replace a definition. Takes effect at the next flush.
    fn define_concept(&mut self, id: ExpressionId, definition: Definition) -> ClassifyResult<()>;

    /// Remove a definition. Takes effect at the next flush.
    fn retract_concept(&mut self, id: ExpressionId) -> ClassifyResult<()>;

    /// Commit pending definitions so subsequent queries reflect them.
    fn flush(&mut self) -> ClassifyResult<()>;

    /// Concepts equivalent to `id`, including `id` itself.
    fn equivalent_concepts(&self, id: ExpressionId) -> ClassifyResult<BTreeSet<ConceptRef>>;

    fn direct_super_concepts(&self, id: ExpressionId) -> ClassifyResult<BTreeSet<ConceptRef>>;

    fn direct_sub_concepts(&self, id: ExpressionId) -> ClassifyResult<BTreeSet<ConceptRef>>;

    fn concept_table(&self) -> &ConceptTable;
}

/// Classification facts for one concept, mapped back to repository ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationResult {
    pub equivalent_concepts: BTreeSet<ExpressionId>,
    pub direct_parents: BTreeSet<ExpressionId>,
    pub direct_children: BTreeSet<ExpressionId>,
}

/// Define `id`, flush, and collect its classification.
///
/// Handles that map to no repository id (the `TOP`/`NOTHING` artifacts, or
/// anything the table does not know) are dropped here.
pub fn classify_definition(
    adapter: &mut dyn ClassificationAdapter,
    id: ExpressionId,
    definition: Definition,
) -> ClassifyResult<ClassificationResult> {
    adapter.define_concept(id, definition)?;
    adapter.flush()?;
    classification_of(adapter, id)
}

/// Collect the current classification of an already-flushed concept.
pub fn classification_of(
    adapter: &dyn ClassificationAdapter,
    id: ExpressionId,
) -> ClassifyResult<ClassificationResult> {
    let equivalents = adapter.equivalent_concepts(id)?;
    let supers = adapter.direct_super_concepts(id)?;
    let subs = adapter.direct_sub_concepts(id)?;

    let table = adapter.concept_table();
    let resolve = |refs: BTreeSet<ConceptRef>, role: &str| -> BTreeSet<ExpressionId> {
        let mut out = BTreeSet::new();
        for concept in refs {
            match table.expression_id(concept) {
                Some(mapped) => {
                    out.insert(mapped);
                }
                None => tracing::trace!(%id, %concept, role, "dropping unmapped concept"),
            }
        }
        out
    };

    Ok(ClassificationResult {
        equivalent_concepts: resolve(equivalents, "equivalent"),
        direct_parents: resolve(supers, "parent"),
        direct_children: resolve(subs, "child"),
    })
}
