//! Structural subsumption classifier.
//!
//! A small reference oracle: every concept is expanded into a normal form
//! (the primitive names it carries, closed upward over told parents, plus
//! its relationships with normalized values) and subsumption is decided by
//! comparing normal forms. This is sound for the conjunctive, existential
//! fragment used by compositional expressions over a primitive hierarchy.
//! It is not a general description-logic reasoner: it knows no general
//! concept inclusions, role chains or disjointness.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use rayon::prelude::*;

use crate::error::ClassifyError;
use crate::id::ExpressionId;

use super::definition::{Definition, Relationship, RelationshipValue};
use super::table::{ConceptRef, ConceptTable};
use super::{ClassificationAdapter, ClassifyResult};

#[derive(Debug, Clone, Default)]
struct NormalForm {
    /// Primitive names, closed upward.
    prims: BTreeSet<ExpressionId>,
    ungrouped: Vec<NormalRel>,
    groups: Vec<Vec<NormalRel>>,
}

#[derive(Debug, Clone)]
struct NormalRel {
    attribute: ExpressionId,
    /// The attribute and everything above it in the attribute hierarchy.
    attribute_names: Arc<BTreeSet<ExpressionId>>,
    value: Arc<NormalForm>,
}

impl NormalForm {
    fn atom(id: ExpressionId) -> Self {
        Self {
            prims: [id].into_iter().collect(),
            ..Default::default()
        }
    }

    fn merge(&mut self, other: &NormalForm) {
        self.prims.extend(other.prims.iter().copied());
        self.ungrouped.extend(other.ungrouped.iter().cloned());
        self.groups.extend(other.groups.iter().cloned());
    }

    fn all_rels(&self) -> impl Iterator<Item = &NormalRel> {
        self.ungrouped.iter().chain(self.groups.iter().flatten())
    }

    /// Groups, plus every ungrouped relationship as a group of its own.
    fn candidate_groups(&self) -> impl Iterator<Item = &[NormalRel]> {
        self.groups
            .iter()
            .map(Vec::as_slice)
            .chain(self.ungrouped.iter().map(std::slice::from_ref))
    }
}

/// `sub ⊑ sup` by structural comparison.
fn subsumes(sup: &NormalForm, sub: &NormalForm) -> bool {
    sup.prims.is_subset(&sub.prims)
        && sup
            .ungrouped
            .iter()
            .all(|r| sub.all_rels().any(|s| rel_subsumes(r, s)))
        && sup.groups.iter().all(|group| {
            sub.candidate_groups()
                .any(|candidate| group.iter().all(|r| candidate.iter().any(|s| rel_subsumes(r, s))))
        })
}

fn rel_subsumes(sup: &NormalRel, sub: &NormalRel) -> bool {
    sub.attribute_names.contains(&sup.attribute) && subsumes(&sup.value, &sub.value)
}

/// Reference classifier over the in-process concept set.
pub struct StructuralClassifier {
    committed: HashMap<ExpressionId, Definition>,
    pending: HashMap<ExpressionId, Option<Definition>>,
    normal: HashMap<ExpressionId, Arc<NormalForm>>,
    /// Concepts whose normalization failed at the last flush, with the
    /// concept the cycle was detected at.
    failed: HashMap<ExpressionId, ExpressionId>,
    /// Ids mentioned by any committed definition.
    referenced: HashSet<ExpressionId>,
    table: ConceptTable,
}

impl StructuralClassifier {
    pub fn new() -> Self {
        Self {
            committed: HashMap::new(),
            pending: HashMap::new(),
            normal: HashMap::new(),
            failed: HashMap::new(),
            referenced: HashSet::new(),
            table: ConceptTable::new(),
        }
    }

    /// Number of classified concepts.
    pub fn len(&self) -> usize {
        self.normal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.normal.is_empty()
    }

    /// Pending definitions that only add brand-new, unreferenced concepts
    /// can be normalized without touching anything already classified.
    fn is_incremental(&self) -> bool {
        self.pending.iter().all(|(id, def)| {
            def.is_some() && !self.committed.contains_key(id) && !self.referenced.contains(id)
        })
    }

    fn normal_form(&self, id: ExpressionId) -> ClassifyResult<&Arc<NormalForm>> {
        if let Some(at) = self.failed.get(&id) {
            return Err(ClassifyError::CyclicDefinition { id: at.get() });
        }
        self.normal
            .get(&id)
            .ok_or(ClassifyError::UnknownConcept { id: id.get() })
    }

    /// Strict subsumers and subsumees of `id`, plus its equivalents.
    fn neighbourhood(&self, id: ExpressionId) -> ClassifyResult<Neighbourhood> {
        let target = self.normal_form(id)?;
        let related: Vec<(ExpressionId, bool, bool)> = self
            .normal
            .par_iter()
            .filter(|(other, _)| **other != id)
            .filter_map(|(other, nf)| {
                let up = subsumes(nf, target);
                let down = subsumes(target, nf);
                (up || down).then_some((*other, up, down))
            })
            .collect();

        let mut hood = Neighbourhood::default();
        for (other, up, down) in related {
            match (up, down) {
                (true, true) => hood.equivalents.push(other),
                (true, false) => hood.supers.push(other),
                (false, true) => hood.subs.push(other),
                (false, false) => {}
            }
        }
        Ok(hood)
    }

    /// Keep the members of `candidates` with no strictly closer member:
    /// `closer(a, b)` says `a` lies strictly between the target and `b`.
    fn most_direct(
        &self,
        candidates: &[ExpressionId],
        closer: impl Fn(&NormalForm, &NormalForm) -> bool + Sync,
    ) -> BTreeSet<ExpressionId> {
        candidates
            .par_iter()
            .filter(|&&c| {
                let c_nf = &self.normal[&c];
                !candidates.iter().any(|&d| {
                    d != c && {
                        let d_nf = &self.normal[&d];
                        closer(d_nf, c_nf) && !closer(c_nf, d_nf)
                    }
                })
            })
            .copied()
            .collect()
    }

    fn to_refs(&self, ids: impl IntoIterator<Item = ExpressionId>) -> BTreeSet<ConceptRef> {
        ids.into_iter()
            .filter_map(|id| self.table.concept_ref(id))
            .collect()
    }
}

#[derive(Debug, Default)]
struct Neighbourhood {
    equivalents: Vec<ExpressionId>,
    supers: Vec<ExpressionId>,
    subs: Vec<ExpressionId>,
}

/// Normalizes committed definitions with memoization and cycle detection.
struct Normalizer<'a> {
    definitions: &'a HashMap<ExpressionId, Definition>,
    memo: HashMap<ExpressionId, Arc<NormalForm>>,
    visiting: HashSet<ExpressionId>,
}

impl<'a> Normalizer<'a> {
    fn new(
        definitions: &'a HashMap<ExpressionId, Definition>,
        memo: HashMap<ExpressionId, Arc<NormalForm>>,
    ) -> Self {
        Self {
            definitions,
            memo,
            visiting: HashSet::new(),
        }
    }

    fn concept(&mut self, id: ExpressionId) -> ClassifyResult<Arc<NormalForm>> {
        if let Some(nf) = self.memo.get(&id) {
            return Ok(Arc::clone(nf));
        }
        let Some(definition) = self.definitions.get(&id) else {
            return Ok(Arc::new(NormalForm::atom(id)));
        };
        if !self.visiting.insert(id) {
            return Err(ClassifyError::CyclicDefinition { id: id.get() });
        }

        let result = self.definition(definition);
        self.visiting.remove(&id);

        let mut nf = result?;
        if definition.primitive {
            nf.prims.insert(id);
        }
        let nf = Arc::new(nf);
        self.memo.insert(id, Arc::clone(&nf));
        Ok(nf)
    }

    fn definition(&mut self, definition: &Definition) -> ClassifyResult<NormalForm> {
        let mut nf = NormalForm::default();
        for parent in &definition.parents {
            let parent_nf = self.concept(*parent)?;
            nf.merge(&parent_nf);
        }
        for rel in &definition.ungrouped {
            nf.ungrouped.push(self.relationship(rel)?);
        }
        for group in &definition.groups {
            let rels = group
                .iter()
                .map(|rel| self.relationship(rel))
                .collect::<ClassifyResult<Vec<_>>>()?;
            nf.groups.push(rels);
        }
        Ok(nf)
    }

    fn relationship(&mut self, rel: &Relationship) -> ClassifyResult<NormalRel> {
        let mut names = self.concept(rel.attribute)?.prims.clone();
        names.insert(rel.attribute);
        let value = match &rel.value {
            RelationshipValue::Concept(id) => self.concept(*id)?,
            RelationshipValue::Nested(nested) => Arc::new(self.definition(nested)?),
        };
        Ok(NormalRel {
            attribute: rel.attribute,
            attribute_names: Arc::new(names),
            value,
        })
    }
}

impl Default for StructuralClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StructuralClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuralClassifier")
            .field("classified", &self.normal.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl ClassificationAdapter for StructuralClassifier {
    fn define_concept(&mut self, id: ExpressionId, definition: Definition) -> ClassifyResult<()> {
        self.table.intern(id);
        self.pending.insert(id, Some(definition));
        Ok(())
    }

    fn retract_concept(&mut self, id: ExpressionId) -> ClassifyResult<()> {
        self.pending.insert(id, None);
        Ok(())
    }

    fn flush(&mut self) -> ClassifyResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let incremental = self.is_incremental();
        for (id, definition) in std::mem::take(&mut self.pending) {
            match definition {
                Some(def) => {
                    self.committed.insert(id, def);
                }
                None => {
                    self.committed.remove(&id);
                }
            }
        }

        let (targets, seed): (Vec<ExpressionId>, _) = if incremental {
            let targets = self
                .committed
                .keys()
                .filter(|id| !self.normal.contains_key(id))
                .copied()
                .collect();
            (targets, std::mem::take(&mut self.normal))
        } else {
            self.failed.clear();
            (self.committed.keys().copied().collect(), HashMap::new())
        };

        let mut normalizer = Normalizer::new(&self.committed, seed);
        for id in targets {
            if let Err(err) = normalizer.concept(id) {
                let at = match err {
                    ClassifyError::CyclicDefinition { id: at } => {
                        ExpressionId::new(at).unwrap_or(id)
                    }
                    _ => id,
                };
                tracing::warn!(%id, cycle_at = %at, "concept definition could not be normalized");
                self.failed.insert(id, at);
            }
        }

        // Only committed concepts are classified; atoms seen while
        // normalizing are not concepts in their own right.
        let mut memo = normalizer.memo;
        memo.retain(|id, _| self.committed.contains_key(id) && !self.failed.contains_key(id));
        self.normal = memo;

        self.referenced = self
            .committed
            .values()
            .flat_map(Definition::referenced_concepts)
            .collect();

        tracing::debug!(
            classified = self.normal.len(),
            failed = self.failed.len(),
            incremental,
            "classifier flushed"
        );
        Ok(())
    }

    fn equivalent_concepts(&self, id: ExpressionId) -> ClassifyResult<BTreeSet<ConceptRef>> {
        let hood = self.neighbourhood(id)?;
        Ok(self.to_refs(std::iter::once(id).chain(hood.equivalents)))
    }

    fn direct_super_concepts(&self, id: ExpressionId) -> ClassifyResult<BTreeSet<ConceptRef>> {
        let hood = self.neighbourhood(id)?;
        // `d` is closer than `c` when `d ⊑ c`.
        let direct = self.most_direct(&hood.supers, |d, c| subsumes(c, d));
        if direct.is_empty() {
            return Ok([ConceptRef::TOP].into_iter().collect());
        }
        Ok(self.to_refs(direct))
    }

    fn direct_sub_concepts(&self, id: ExpressionId) -> ClassifyResult<BTreeSet<ConceptRef>> {
        let hood = self.neighbourhood(id)?;
        // `d` is closer than `c` when `c ⊑ d`.
        let direct = self.most_direct(&hood.subs, |d, c| subsumes(d, c));
        if direct.is_empty() {
            return Ok([ConceptRef::NOTHING].into_iter().collect());
        }
        Ok(self.to_refs(direct))
    }

    fn concept_table(&self) -> &ConceptTable {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::parse_expression;
    use crate::id::GENERATED_BASE;

    fn id(raw: u64) -> ExpressionId {
        ExpressionId::new(raw).unwrap()
    }

    fn gen_id(n: u64) -> ExpressionId {
        id(GENERATED_BASE + n)
    }

    fn ids(c: &StructuralClassifier, refs: BTreeSet<ConceptRef>) -> Vec<u64> {
        refs.into_iter()
            .filter_map(|r| c.concept_table().expression_id(r))
            .map(ExpressionId::get)
            .collect()
    }

    fn expr(text: &str) -> Definition {
        Definition::from_expression(&parse_expression(text).unwrap())
    }

    /// 1 root; 2 disorder ⊑ 1; 3 site ⊑ 1; 4 heart ⊑ 3; 5 lung ⊑ 3;
    /// 6 cardiac disorder ≡ 2 : 100 = 4; 100, 101 attributes, 101 ⊑ 100.
    fn small_ontology() -> StructuralClassifier {
        let mut c = StructuralClassifier::new();
        c.define_concept(id(1), Definition::primitive_child_of([])).unwrap();
        c.define_concept(id(2), Definition::primitive_child_of([id(1)])).unwrap();
        c.define_concept(id(3), Definition::primitive_child_of([id(1)])).unwrap();
        c.define_concept(id(4), Definition::primitive_child_of([id(3)])).unwrap();
        c.define_concept(id(5), Definition::primitive_child_of([id(3)])).unwrap();
        c.define_concept(id(100), Definition::primitive_child_of([])).unwrap();
        c.define_concept(id(101), Definition::primitive_child_of([id(100)])).unwrap();
        c.define_concept(id(6), expr("2 : 100 = 4")).unwrap();
        c.flush().unwrap();
        c
    }

    #[test]
    fn told_hierarchy_is_classified() {
        let c = small_ontology();
        assert_eq!(ids(&c, c.direct_super_concepts(id(4)).unwrap()), vec![3]);
        assert_eq!(ids(&c, c.direct_sub_concepts(id(3)).unwrap()), vec![4, 5]);
        assert_eq!(c.direct_super_concepts(id(1)).unwrap(), BTreeSet::from([ConceptRef::TOP]));
    }

    #[test]
    fn defined_concept_is_placed_below_its_parent() {
        let c = small_ontology();
        assert_eq!(ids(&c, c.direct_super_concepts(id(6)).unwrap()), vec![2]);
        assert_eq!(ids(&c, c.direct_sub_concepts(id(2)).unwrap()), vec![6]);
    }

    #[test]
    fn equivalent_expression_is_detected() {
        let mut c = small_ontology();
        c.define_concept(gen_id(0), expr("2 : 100 = 4")).unwrap();
        c.flush().unwrap();
        let eq = ids(&c, c.equivalent_concepts(gen_id(0)).unwrap());
        assert_eq!(eq, vec![6, GENERATED_BASE]);
    }

    #[test]
    fn more_specific_value_is_subsumed() {
        let mut c = small_ontology();
        // 2 : 101 = 4 with 101 ⊑ 100 is a kind of 6.
        c.define_concept(gen_id(1), expr("2 : 101 = 4")).unwrap();
        // 2 : 100 = 3 is more general than 6.
        c.define_concept(gen_id(2), expr("2 : 100 = 3")).unwrap();
        c.flush().unwrap();

        assert_eq!(ids(&c, c.direct_super_concepts(gen_id(1)).unwrap()), vec![6]);
        assert_eq!(ids(&c, c.direct_super_concepts(id(6)).unwrap()), vec![GENERATED_BASE + 2]);
        assert_eq!(ids(&c, c.direct_super_concepts(gen_id(2)).unwrap()), vec![2]);
        assert_eq!(ids(&c, c.direct_sub_concepts(gen_id(2)).unwrap()), vec![6]);
    }

    #[test]
    fn groups_must_match_together() {
        let mut c = small_ontology();
        c.define_concept(gen_id(1), expr("2 : { 100 = 4, 101 = 5 }")).unwrap();
        c.define_concept(gen_id(2), expr("2 : { 100 = 4 }, { 101 = 5 }")).unwrap();
        c.define_concept(gen_id(3), expr("2 : { 100 = 4, 100 = 5 }")).unwrap();
        c.flush().unwrap();

        // One group with both relationships subsumes a group-split variant? No:
        // gen 2 has them in separate groups, so it is not below gen 1.
        let supers_of_2 = ids(&c, c.direct_super_concepts(gen_id(2)).unwrap());
        assert!(!supers_of_2.contains(&(GENERATED_BASE + 1)));
        // gen 1 (101 ⊑ 100) is below gen 3.
        let supers_of_1 = ids(&c, c.direct_super_concepts(gen_id(1)).unwrap());
        assert!(supers_of_1.contains(&(GENERATED_BASE + 3)));
    }

    #[test]
    fn nothing_reported_for_leaves() {
        let c = small_ontology();
        assert_eq!(
            c.direct_sub_concepts(id(5)).unwrap(),
            BTreeSet::from([ConceptRef::NOTHING])
        );
    }

    #[test]
    fn unflushed_concept_is_unknown() {
        let mut c = small_ontology();
        c.define_concept(gen_id(9), expr("1 : 100 = 5")).unwrap();
        assert!(matches!(
            c.equivalent_concepts(gen_id(9)),
            Err(ClassifyError::UnknownConcept { .. })
        ));
    }

    #[test]
    fn retract_removes_concept() {
        let mut c = small_ontology();
        c.define_concept(gen_id(1), expr("2 : 100 = 5")).unwrap();
        c.flush().unwrap();
        assert!(c.equivalent_concepts(gen_id(1)).is_ok());

        c.retract_concept(gen_id(1)).unwrap();
        c.flush().unwrap();
        assert!(matches!(
            c.equivalent_concepts(gen_id(1)),
            Err(ClassifyError::UnknownConcept { .. })
        ));
        assert_eq!(ids(&c, c.direct_sub_concepts(id(2)).unwrap()), vec![6]);
    }

    #[test]
    fn cyclic_definitions_fail_only_their_members() {
        let mut c = StructuralClassifier::new();
        c.define_concept(id(1), Definition::primitive_child_of([id(2)])).unwrap();
        c.define_concept(id(2), Definition::primitive_child_of([id(1)])).unwrap();
        c.define_concept(id(3), Definition::primitive_child_of([])).unwrap();
        c.flush().unwrap();

        assert!(matches!(
            c.equivalent_concepts(id(1)),
            Err(ClassifyError::CyclicDefinition { .. })
        ));
        assert!(c.equivalent_concepts(id(3)).is_ok());
    }

    #[test]
    fn incremental_flush_matches_full_recompute() {
        let mut c = small_ontology();
        c.define_concept(gen_id(1), expr("2 : 100 = 5")).unwrap();
        c.flush().unwrap();
        let incremental = ids(&c, c.direct_super_concepts(gen_id(1)).unwrap());

        // Redefining an existing concept forces a full recompute.
        c.define_concept(id(5), Definition::primitive_child_of([id(3)])).unwrap();
        c.flush().unwrap();
        let full = ids(&c, c.direct_super_concepts(gen_id(1)).unwrap());
        assert_eq!(incremental, full);
        assert_eq!(full, vec![2]);
    }
}
