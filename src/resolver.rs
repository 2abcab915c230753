//! Identity resolution: expression in, stable id out.
//!
//! Resolution canonicalizes the expression and looks it up. A novel
//! expression gets a freshly allocated id, is classified by the oracle,
//! and is either linked to an equivalent expression or placed in the
//! subsumption graph between its direct parents and children.
//!
//! One writer resolves at a time. The commit gate is held for writing
//! from id allocation until the graph write, and for reading by every
//! read, so no reader sees an id whose classification is not stored yet.
//! A failed resolution is rolled back; its id is burnt, never reused.
//! If the rollback itself cannot remove the mapping, the id stays stored
//! but unplaced, and the next resolution of the same expression classifies
//! it again instead of returning it.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard};

use crate::classify::{ClassificationResult, Definition, Oracle, classify_definition};
use crate::error::{RepoResult, StoreError};
use crate::expression::{CanonicalForm, Expression, canonicalize};
use crate::id::ExpressionId;
use crate::store::{GraphStore, StoreResult};

/// Resolves expressions to ids against a store and a classification oracle.
pub struct IdentityResolver {
    store: Arc<dyn GraphStore>,
    writer: Mutex<Oracle>,
    commit: RwLock<()>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn GraphStore>, oracle: Oracle) -> Self {
        Self {
            store,
            writer: Mutex::new(oracle),
            commit: RwLock::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// Hold the commit gate for reading while the guard lives.
    pub fn read_gate(&self) -> RwLockReadGuard<'_, ()> {
        self.commit.read().expect("commit gate poisoned")
    }

    /// Exclusive access to the oracle, serialized with resolutions.
    pub(crate) fn oracle(&self) -> MutexGuard<'_, Oracle> {
        self.writer.lock().expect("resolver writer lock poisoned")
    }

    /// Look up an expression without resolving it.
    pub fn lookup(&self, expression: &Expression) -> RepoResult<Option<ExpressionId>> {
        let canonical = canonicalize(expression);
        if let Some(id) = canonical.as_concept_id() {
            return Ok(Some(id));
        }
        let _read = self.read_gate();
        let id = self.store.expression_id(&canonical)?;
        Ok(id.filter(|&id| self.store.is_placed(id)))
    }

    /// Resolve an expression to its id, creating and classifying it if new.
    pub fn resolve(&self, expression: &Expression) -> RepoResult<ExpressionId> {
        let canonical = canonicalize(expression);

        // A bare code is its own id: a concept, or a stored expression's id.
        if let Some(id) = canonical.as_concept_id() {
            tracing::trace!(%id, "precoordinated concept");
            return Ok(id);
        }

        {
            let _read = self.read_gate();
            if let Some(id) = self.store.expression_id(&canonical)? {
                if self.store.is_placed(id) {
                    tracing::debug!(%id, %canonical, "expression already stored");
                    return Ok(id);
                }
            }
        }

        let oracle = self.oracle();
        let _commit = self.commit.write().expect("commit gate poisoned");

        let id = match self.store.expression_id(&canonical)? {
            // Another writer may have stored it while we waited.
            Some(id) if self.store.is_placed(id) => {
                tracing::debug!(%id, %canonical, "expression stored by a concurrent writer");
                return Ok(id);
            }
            Some(id) => {
                tracing::warn!(%id, %canonical, "resuming expression that was never placed");
                id
            }
            None => match self.store.store_expression(&canonical) {
                Ok(id) => {
                    tracing::debug!(%id, %canonical, "allocated expression id");
                    id
                }
                Err(StoreError::Duplicate { existing, .. }) if self.store.is_placed(existing) => {
                    return Ok(existing);
                }
                Err(StoreError::Duplicate { existing, .. }) => existing,
                Err(e) => return Err(e.into()),
            },
        };

        let definition = Definition::from_expression(expression);
        match self.classify_and_record(&oracle, id, definition) {
            Ok(()) => {
                tracing::info!(%id, %canonical, "new expression stored");
                Ok(id)
            }
            Err(e) => {
                self.rollback(&oracle, id, &canonical);
                Err(e)
            }
        }
    }

    fn classify_and_record(
        &self,
        oracle: &Oracle,
        id: ExpressionId,
        definition: Definition,
    ) -> RepoResult<()> {
        let classification =
            oracle.run(move |adapter| classify_definition(adapter, id, definition))?;
        tracing::debug!(
            %id,
            equivalents = classification.equivalent_concepts.len(),
            parents = classification.direct_parents.len(),
            children = classification.direct_children.len(),
            "expression classified"
        );
        record_classification(self.store.as_ref(), id, &classification)?;
        Ok(())
    }

    fn rollback(&self, oracle: &Oracle, id: ExpressionId, canonical: &CanonicalForm) {
        tracing::warn!(%id, %canonical, "resolution failed, rolling back");
        let retracted = oracle.submit(move |adapter| {
            if let Err(e) = adapter.retract_concept(id) {
                tracing::warn!(%id, error = %e, "failed to retract concept");
            }
        });
        if let Err(e) = retracted {
            tracing::warn!(%id, error = %e, "could not queue retraction");
        }
        if let Err(e) = self.store.remove_expression(id) {
            tracing::warn!(%id, error = %e, "failed to remove canonical mapping");
        }
    }
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("store", &self.store.stats())
            .finish_non_exhaustive()
    }
}

/// Persist a classification for `id`.
///
/// With an equivalent other than `id`, link `id` to the representative
/// (precoordinated first, then smallest id; followed through any existing
/// link). Otherwise record the direct parents and children, each mapped to
/// its representative.
pub(crate) fn record_classification(
    store: &dyn GraphStore,
    id: ExpressionId,
    classification: &ClassificationResult,
) -> StoreResult<()> {
    let representative = classification
        .equivalent_concepts
        .iter()
        .copied()
        .filter(|&other| other != id)
        .min_by_key(|other| other.representative_key())
        .map(|chosen| store.representative_of(chosen))
        // An equivalent already linked back to `id` leaves `id` as the representative.
        .filter(|&representative| representative != id);

    if let Some(representative) = representative {
        tracing::debug!(%id, %representative, "linking equivalent expression");
        return store.store_equivalence(id, representative);
    }

    let representatives = |ids: &BTreeSet<ExpressionId>| -> BTreeSet<ExpressionId> {
        ids.iter()
            .map(|&other| store.representative_of(other))
            .filter(|&other| other != id)
            .collect()
    };
    let parents = representatives(&classification.direct_parents);
    let children = representatives(&classification.direct_children);
    store.store_parents_and_children(id, &parents, &children)
}
