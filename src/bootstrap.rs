//! Bringing a classifier up to date with the store at open.
//!
//! The classifier starts empty. Bootstrap defines every ontology concept
//! and replays every stored expression, skipping (and logging) records that
//! fail, then flushes once. Ontology concepts the store has not seen yet
//! are registered afterwards and linked into the graph. A stored expression
//! that was allocated but never placed in the graph (an interrupted
//! resolution) is classified and placed as well.

use crate::classify::{ClassificationAdapter, Definition, classification_of};
use crate::error::RepoResult;
use crate::expression::parse_expression;
use crate::id::ExpressionId;
use crate::ontology::Ontology;
use crate::resolver::record_classification;
use crate::store::GraphStore;

/// Counts from one bootstrap run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct BootstrapReport {
    pub concepts_defined: usize,
    pub concepts_registered: usize,
    pub expressions_replayed: usize,
    /// Stored expressions that had never been placed in the graph.
    pub expressions_repaired: usize,
    pub records_skipped: usize,
}

impl std::fmt::Display for BootstrapReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} concepts defined ({} new), {} expressions replayed ({} repaired), {} skipped",
            self.concepts_defined,
            self.concepts_registered,
            self.expressions_replayed,
            self.expressions_repaired,
            self.records_skipped
        )
    }
}

pub fn bootstrap(
    adapter: &mut dyn ClassificationAdapter,
    store: &dyn GraphStore,
    ontology: &Ontology,
) -> RepoResult<BootstrapReport> {
    let mut report = BootstrapReport::default();
    let mut new_concepts: Vec<ExpressionId> = Vec::new();
    let mut unplaced: Vec<ExpressionId> = Vec::new();

    for concept in &ontology.concepts {
        // Validated when the ontology was loaded.
        let Some(id) = concept.expression_id() else {
            report.records_skipped += 1;
            continue;
        };
        let definition = match concept.definition() {
            Ok(definition) => definition,
            Err(e) => {
                tracing::warn!(%id, error = %e, "skipping concept with unparseable definition");
                report.records_skipped += 1;
                continue;
            }
        };
        if let Err(e) = adapter.define_concept(id, definition) {
            tracing::warn!(%id, error = %e, "skipping concept the classifier rejected");
            report.records_skipped += 1;
            continue;
        }
        report.concepts_defined += 1;
        if !store.contains(id) {
            new_concepts.push(id);
        }
    }

    for (id, canonical) in store.all_expressions()? {
        let expression = match parse_expression(canonical.as_str()) {
            Ok(expression) => expression,
            Err(e) => {
                tracing::warn!(%id, %canonical, error = %e, "skipping unparseable stored expression");
                report.records_skipped += 1;
                continue;
            }
        };
        if let Err(e) = adapter.define_concept(id, Definition::from_expression(&expression)) {
            tracing::warn!(%id, error = %e, "skipping stored expression the classifier rejected");
            report.records_skipped += 1;
            continue;
        }
        report.expressions_replayed += 1;
        if !store.is_placed(id) {
            unplaced.push(id);
        }
    }

    adapter.flush()?;

    for id in new_concepts {
        store.register_concept(id)?;
        match classification_of(adapter, id) {
            Ok(classification) => {
                record_classification(store, id, &classification)?;
                report.concepts_registered += 1;
            }
            Err(e) => {
                tracing::warn!(%id, error = %e, "concept registered without classification");
                report.records_skipped += 1;
            }
        }
    }

    for id in unplaced {
        match classification_of(adapter, id) {
            Ok(classification) => {
                record_classification(store, id, &classification)?;
                tracing::info!(%id, "placed expression left over from an interrupted resolution");
                report.expressions_repaired += 1;
            }
            Err(e) => {
                tracing::warn!(%id, error = %e, "stored expression left unplaced");
                report.records_skipped += 1;
            }
        }
    }

    tracing::info!(
        concepts = report.concepts_defined,
        registered = report.concepts_registered,
        replayed = report.expressions_replayed,
        repaired = report.expressions_repaired,
        skipped = report.records_skipped,
        "bootstrap complete"
    );
    Ok(report)
}
