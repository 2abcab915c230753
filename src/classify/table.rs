//! Concept table: bidirectional `ExpressionId` ↔ [`ConceptRef`] mapping.
//!
//! Classifiers name concepts by their own handles. The table is the single
//! place where those handles are mapped back to repository ids, so nothing
//! has to recover an id by picking apart a generated concept name.

use std::collections::HashMap;

use crate::id::ExpressionId;

/// Classifier-side handle for a concept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConceptRef(u64);

impl ConceptRef {
    /// The universal concept. Reported as the direct super concept of
    /// anything with no other subsumer; maps to no expression.
    pub const TOP: ConceptRef = ConceptRef(0);
    /// The empty concept. Reported as the direct sub concept of anything
    /// with no other subsumee; maps to no expression.
    pub const NOTHING: ConceptRef = ConceptRef(1);

    const FIRST_CONCEPT: u64 = 2;

    pub fn is_artifact(self) -> bool {
        self.0 < Self::FIRST_CONCEPT
    }
}

impl std::fmt::Display for ConceptRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            ConceptRef::TOP => write!(f, "concept:TOP"),
            ConceptRef::NOTHING => write!(f, "concept:NOTHING"),
            ConceptRef(raw) => write!(f, "concept:{raw}"),
        }
    }
}

/// Bidirectional mapping between repository ids and classifier handles.
///
/// Entries are never removed: a retracted concept keeps its handle so a
/// later redefinition maps to the same [`ConceptRef`].
#[derive(Debug)]
pub struct ConceptTable {
    by_id: HashMap<ExpressionId, ConceptRef>,
    by_ref: HashMap<ConceptRef, ExpressionId>,
    next: u64,
}

impl ConceptTable {
    pub fn new() -> Self {
        Self {
            by_id: HashMap::new(),
            by_ref: HashMap::new(),
            next: ConceptRef::FIRST_CONCEPT,
        }
    }

    /// Get the handle for `id`, allocating one on first use.
    pub fn intern(&mut self, id: ExpressionId) -> ConceptRef {
        if let Some(existing) = self.by_id.get(&id) {
            return *existing;
        }
        let handle = ConceptRef(self.next);
        self.next += 1;
        self.by_id.insert(id, handle);
        self.by_ref.insert(handle, id);
        handle
    }

    /// Look up the handle for `id` without allocating.
    pub fn concept_ref(&self, id: ExpressionId) -> Option<ConceptRef> {
        self.by_id.get(&id).copied()
    }

    /// Map a handle back to its id. Artifacts and unknown handles map to `None`.
    pub fn expression_id(&self, concept: ConceptRef) -> Option<ExpressionId> {
        self.by_ref.get(&concept).copied()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl Default for ConceptTable {
    fn default() -> Self {
        Self::new()
    }
}
