//! In-memory graph store backed by DashMap and petgraph.
//!
//! Provides the fastest possible lookups and is the working set of the
//! durable store as well. All data is lost on process exit.

use std::collections::BTreeSet;
use std::sync::RwLock;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use petgraph::Direction;
use petgraph::stable_graph::NodeIndex;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::expression::CanonicalForm;
use crate::id::{ExpressionId, IdAllocator};

use super::traverse::{self, SubsumptionGraph};
use super::{GraphStore, StoreResult, StoreStats};

/// How a stored id hangs in the graph. Each id has at most one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Link {
    /// Equivalent to another expression, which represents it.
    Equivalent(ExpressionId),
    /// Placed below `parents` and above `children`.
    Edges {
        parents: BTreeSet<ExpressionId>,
        children: BTreeSet<ExpressionId>,
    },
}

impl Link {
    pub fn equivalent(&self) -> Option<ExpressionId> {
        match self {
            Link::Equivalent(rep) => Some(*rep),
            Link::Edges { .. } => None,
        }
    }
}

/// Concurrent in-memory graph store.
pub struct MemGraphStore {
    by_canonical: DashMap<CanonicalForm, ExpressionId>,
    by_id: DashMap<ExpressionId, CanonicalForm>,
    links: DashMap<ExpressionId, Link>,
    /// Representative → ids linked directly to it.
    aliases: DashMap<ExpressionId, BTreeSet<ExpressionId>>,
    graph: RwLock<SubsumptionGraph>,
    node_index: DashMap<ExpressionId, NodeIndex>,
    allocator: IdAllocator,
}

impl MemGraphStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_allocator(IdAllocator::new())
    }

    pub(crate) fn with_allocator(allocator: IdAllocator) -> Self {
        Self {
            by_canonical: DashMap::new(),
            by_id: DashMap::new(),
            links: DashMap::new(),
            aliases: DashMap::new(),
            graph: RwLock::new(SubsumptionGraph::default()),
            node_index: DashMap::new(),
            allocator,
        }
    }

    /// Ensure a node exists for the given id, returning its NodeIndex.
    fn ensure_node(&self, id: ExpressionId) -> NodeIndex {
        if let Some(idx) = self.node_index.get(&id) {
            return *idx.value();
        }
        let mut graph = self.graph.write().expect("graph lock poisoned");
        self.ensure_node_in(&mut graph, id)
    }

    fn ensure_node_in(&self, graph: &mut SubsumptionGraph, id: ExpressionId) -> NodeIndex {
        // Double-check under the write lock.
        if let Some(idx) = self.node_index.get(&id) {
            return *idx.value();
        }
        let idx = graph.add_node(id);
        self.node_index.insert(id, idx);
        idx
    }

    fn require(&self, id: ExpressionId) -> StoreResult<NodeIndex> {
        self.node_index
            .get(&id)
            .map(|idx| *idx.value())
            .ok_or(StoreError::NotFound { id: id.get() })
    }

    /// Current link of `id`, if any.
    pub fn link(&self, id: ExpressionId) -> Option<Link> {
        self.links.get(&id).map(|l| l.value().clone())
    }

    /// Validate writing `new` as the link of `id`.
    ///
    /// Returns `true` if the identical link is already recorded.
    pub(crate) fn check_link(&self, id: ExpressionId, new: &Link) -> StoreResult<bool> {
        self.require(id)?;
        match new {
            Link::Equivalent(rep) => {
                if self.representative_of(*rep) == id {
                    return Err(conflict(id, format!("equivalence with {rep} would form a cycle")));
                }
            }
            Link::Edges { parents, children } => {
                if parents.contains(&id) || children.contains(&id) {
                    return Err(conflict(id, "an expression cannot be its own parent or child"));
                }
            }
        }
        match self.links.get(&id) {
            None => Ok(false),
            Some(existing) if existing.value() == new => Ok(true),
            Some(existing) => Err(conflict(
                id,
                match existing.value() {
                    Link::Equivalent(rep) => format!("already equivalent to {rep}"),
                    Link::Edges { .. } => "parent/child edges already recorded".to_string(),
                },
            )),
        }
    }

    /// Edges `p → c` that storing `parents`/`children` for a new id would
    /// make indirect.
    pub(crate) fn redundant_edges(
        &self,
        parents: &BTreeSet<ExpressionId>,
        children: &BTreeSet<ExpressionId>,
    ) -> Vec<(ExpressionId, ExpressionId)> {
        let graph = self.graph.read().expect("graph lock poisoned");
        let mut out = Vec::new();
        for &p in parents {
            let Some(p_idx) = self.node_index.get(&p).map(|i| *i.value()) else {
                continue;
            };
            for &c in children {
                let Some(c_idx) = self.node_index.get(&c).map(|i| *i.value()) else {
                    continue;
                };
                if graph.find_edge(p_idx, c_idx).is_some() {
                    out.push((p, c));
                }
            }
        }
        out
    }

    /// Validate registering `id` as a concept. Returns `true` if it is new.
    pub(crate) fn check_concept(&self, id: ExpressionId) -> StoreResult<bool> {
        if !id.is_precoordinated() {
            return Err(conflict(id, "generated ids are only allocated by store_expression"));
        }
        Ok(!self.node_index.contains_key(&id))
    }

    /// Every edge touching `id`, as `(parent, child)` pairs.
    pub(crate) fn incident_edges(&self, id: ExpressionId) -> Vec<(ExpressionId, ExpressionId)> {
        let Some(node) = self.node_index.get(&id).map(|i| *i.value()) else {
            return Vec::new();
        };
        let graph = self.graph.read().expect("graph lock poisoned");
        let parents = traverse::adjacent(&graph, node, Direction::Incoming);
        let children = traverse::adjacent(&graph, node, Direction::Outgoing);
        parents
            .into_iter()
            .map(|p| (p, id))
            .chain(children.into_iter().map(|c| (id, c)))
            .collect()
    }

    pub(crate) fn insert_link(&self, id: ExpressionId, link: Link) {
        match &link {
            Link::Equivalent(rep) => {
                self.ensure_node(*rep);
                self.aliases.entry(*rep).or_default().insert(id);
            }
            Link::Edges { parents, children } => {
                let mut graph = self.graph.write().expect("graph lock poisoned");
                let node = self.ensure_node_in(&mut graph, id);
                let parent_nodes: Vec<NodeIndex> = parents
                    .iter()
                    .map(|&p| self.ensure_node_in(&mut graph, p))
                    .collect();
                let child_nodes: Vec<NodeIndex> = children
                    .iter()
                    .map(|&c| self.ensure_node_in(&mut graph, c))
                    .collect();

                for &p in &parent_nodes {
                    for &c in &child_nodes {
                        while let Some(edge) = graph.find_edge(p, c) {
                            graph.remove_edge(edge);
                        }
                    }
                    graph.update_edge(p, node, ());
                }
                for &c in &child_nodes {
                    graph.update_edge(node, c, ());
                }
            }
        }
        self.links.insert(id, link);
    }

    /// `ids` plus every id linked to one of them as an equivalent.
    fn with_aliases(&self, ids: BTreeSet<ExpressionId>) -> BTreeSet<ExpressionId> {
        let mut out = ids.clone();
        let mut pending: Vec<ExpressionId> = ids.into_iter().collect();
        while let Some(id) = pending.pop() {
            if let Some(linked) = self.aliases.get(&id) {
                for &alias in linked.value() {
                    if out.insert(alias) {
                        pending.push(alias);
                    }
                }
            }
        }
        out
    }

    fn neighbourhood(
        &self,
        id: ExpressionId,
        direction: Direction,
        transitive: bool,
    ) -> StoreResult<BTreeSet<ExpressionId>> {
        self.require(id)?;
        let start = self.require(self.representative_of(id))?;
        let found = {
            let graph = self.graph.read().expect("graph lock poisoned");
            if transitive {
                traverse::reachable(&graph, start, direction)
            } else {
                traverse::adjacent(&graph, start, direction)
            }
        };
        Ok(self.with_aliases(found))
    }

    // -- restore hooks used when loading a durable store ----------------

    pub(crate) fn restore_expression(&self, id: ExpressionId, canonical: CanonicalForm) {
        self.by_canonical.insert(canonical.clone(), id);
        self.by_id.insert(id, canonical);
        self.ensure_node(id);
    }

    pub(crate) fn restore_link(&self, id: ExpressionId, link: Link) {
        self.ensure_node(id);
        if let Link::Equivalent(rep) = &link {
            self.ensure_node(*rep);
            self.aliases.entry(*rep).or_default().insert(id);
        }
        self.links.insert(id, link);
    }

    pub(crate) fn restore_edge(&self, parent: ExpressionId, child: ExpressionId) {
        let mut graph = self.graph.write().expect("graph lock poisoned");
        let p = self.ensure_node_in(&mut graph, parent);
        let c = self.ensure_node_in(&mut graph, child);
        graph.update_edge(p, c, ());
    }
}

fn conflict(id: ExpressionId, message: impl Into<String>) -> StoreError {
    StoreError::Conflict {
        id: id.get(),
        message: message.into(),
    }
}

impl Default for MemGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemGraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemGraphStore")
            .field("expressions", &self.by_id.len())
            .field("nodes", &self.node_index.len())
            .finish()
    }
}

impl GraphStore for MemGraphStore {
    fn store_expression(&self, canonical: &CanonicalForm) -> StoreResult<ExpressionId> {
        match self.by_canonical.entry(canonical.clone()) {
            Entry::Occupied(entry) => Err(StoreError::Duplicate {
                canonical: canonical.to_string(),
                existing: *entry.get(),
            }),
            Entry::Vacant(entry) => {
                let id = self.allocator.next_id()?;
                entry.insert(id);
                self.by_id.insert(id, canonical.clone());
                self.ensure_node(id);
                Ok(id)
            }
        }
    }

    fn expression_id(&self, canonical: &CanonicalForm) -> StoreResult<Option<ExpressionId>> {
        Ok(self.by_canonical.get(canonical).map(|id| *id.value()))
    }

    fn canonical_form(&self, id: ExpressionId) -> StoreResult<Option<CanonicalForm>> {
        Ok(self.by_id.get(&id).map(|c| c.value().clone()))
    }

    fn remove_expression(&self, id: ExpressionId) -> StoreResult<()> {
        let Some((_, canonical)) = self.by_id.remove(&id) else {
            return Err(StoreError::NotFound { id: id.get() });
        };
        self.by_canonical.remove(&canonical);
        if let Some((_, Link::Equivalent(rep))) = self.links.remove(&id) {
            if let Some(mut linked) = self.aliases.get_mut(&rep) {
                linked.remove(&id);
            }
        }
        if let Some((_, idx)) = self.node_index.remove(&id) {
            let mut graph = self.graph.write().expect("graph lock poisoned");
            graph.remove_node(idx);
        }
        Ok(())
    }

    fn register_concept(&self, id: ExpressionId) -> StoreResult<bool> {
        if !self.check_concept(id)? {
            return Ok(false);
        }
        let mut graph = self.graph.write().expect("graph lock poisoned");
        if self.node_index.contains_key(&id) {
            return Ok(false);
        }
        self.ensure_node_in(&mut graph, id);
        Ok(true)
    }

    fn contains(&self, id: ExpressionId) -> bool {
        self.node_index.contains_key(&id)
    }

    fn is_placed(&self, id: ExpressionId) -> bool {
        self.links.contains_key(&id)
    }

    fn store_equivalence(
        &self,
        id: ExpressionId,
        representative: ExpressionId,
    ) -> StoreResult<()> {
        let link = Link::Equivalent(representative);
        if self.check_link(id, &link)? {
            return Ok(());
        }
        self.insert_link(id, link);
        Ok(())
    }

    fn representative_of(&self, id: ExpressionId) -> ExpressionId {
        let mut current = id;
        while let Some(next) = self.links.get(&current).and_then(|l| l.value().equivalent()) {
            current = next;
        }
        current
    }

    fn store_parents_and_children(
        &self,
        id: ExpressionId,
        parents: &BTreeSet<ExpressionId>,
        children: &BTreeSet<ExpressionId>,
    ) -> StoreResult<()> {
        let link = Link::Edges {
            parents: parents.clone(),
            children: children.clone(),
        };
        if self.check_link(id, &link)? {
            return Ok(());
        }
        self.insert_link(id, link);
        Ok(())
    }

    fn parents(&self, id: ExpressionId) -> StoreResult<BTreeSet<ExpressionId>> {
        self.neighbourhood(id, Direction::Incoming, false)
    }

    fn children(&self, id: ExpressionId) -> StoreResult<BTreeSet<ExpressionId>> {
        self.neighbourhood(id, Direction::Outgoing, false)
    }

    fn ancestors(&self, id: ExpressionId) -> StoreResult<BTreeSet<ExpressionId>> {
        self.neighbourhood(id, Direction::Incoming, true)
    }

    fn descendants(&self, id: ExpressionId) -> StoreResult<BTreeSet<ExpressionId>> {
        self.neighbourhood(id, Direction::Outgoing, true)
    }

    fn all_expressions(&self) -> StoreResult<Vec<(ExpressionId, CanonicalForm)>> {
        let mut out: Vec<(ExpressionId, CanonicalForm)> = self
            .by_id
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        out.sort_by_key(|(id, _)| *id);
        Ok(out)
    }

    fn stats(&self) -> StoreStats {
        let edges = self.graph.read().expect("graph lock poisoned").edge_count();
        StoreStats {
            expressions: self.by_id.len(),
            nodes: self.node_index.len(),
            edges,
            equivalences: self
                .links
                .iter()
                .filter(|l| l.value().equivalent().is_some())
                .count(),
            next_id: self.allocator.peek_next(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{canonicalize, parse_expression};
    use crate::id::GENERATED_BASE;

    fn id(raw: u64) -> ExpressionId {
        ExpressionId::new(raw).unwrap()
    }

    fn canon(text: &str) -> CanonicalForm {
        canonicalize(&parse_expression(text).unwrap())
    }

    fn set(raw: &[u64]) -> BTreeSet<ExpressionId> {
        raw.iter().map(|&r| id(r)).collect()
    }

    fn raw(ids: BTreeSet<ExpressionId>) -> Vec<u64> {
        ids.into_iter().map(ExpressionId::get).collect()
    }

    /// 1 → 2 → 3, concepts only.
    fn chain() -> MemGraphStore {
        let store = MemGraphStore::new();
        for raw in 1..=3 {
            store.register_concept(id(raw)).unwrap();
        }
        store.restore_edge(id(1), id(2));
        store.restore_edge(id(2), id(3));
        store
    }

    #[test]
    fn store_and_lookup_expression() {
        let store = MemGraphStore::new();
        let form = canon("1 : 2 = 3");
        let new = store.store_expression(&form).unwrap();
        assert_eq!(new.get(), GENERATED_BASE);
        assert_eq!(store.expression_id(&form).unwrap(), Some(new));
        assert_eq!(store.canonical_form(new).unwrap(), Some(form));
        assert!(store.contains(new));
    }

    #[test]
    fn expression_is_placed_once_linked() {
        let store = chain();
        let edged = store.store_expression(&canon("2 : 9 = 9")).unwrap();
        let aliased = store.store_expression(&canon("2 : 9 = 8")).unwrap();
        assert!(!store.is_placed(edged));

        // An empty edge set still places the expression.
        store.store_parents_and_children(edged, &BTreeSet::new(), &BTreeSet::new()).unwrap();
        store.store_equivalence(aliased, id(2)).unwrap();
        assert!(store.is_placed(edged));
        assert!(store.is_placed(aliased));
        assert!(!store.is_placed(id(1)));
    }

    #[test]
    fn duplicate_allocation_reports_existing_id() {
        let store = MemGraphStore::new();
        let form = canon("1 : 2 = 3");
        let first = store.store_expression(&form).unwrap();
        match store.store_expression(&form) {
            Err(StoreError::Duplicate { existing, .. }) => assert_eq!(existing, first),
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[test]
    fn concurrent_allocation_yields_one_id() {
        let store = std::sync::Arc::new(MemGraphStore::new());
        let form = canon("1 : 2 = 3");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = std::sync::Arc::clone(&store);
                let form = form.clone();
                std::thread::spawn(move || match store.store_expression(&form) {
                    Ok(id) => id,
                    Err(StoreError::Duplicate { existing, .. }) => existing,
                    Err(e) => panic!("unexpected error: {e}"),
                })
            })
            .collect();
        let ids: BTreeSet<ExpressionId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.stats().expressions, 1);
    }

    #[test]
    fn removed_ids_are_not_reused() {
        let store = MemGraphStore::new();
        let form = canon("1 : 2 = 3");
        let first = store.store_expression(&form).unwrap();
        store.remove_expression(first).unwrap();
        assert_eq!(store.expression_id(&form).unwrap(), None);
        assert!(!store.contains(first));

        let second = store.store_expression(&form).unwrap();
        assert!(second > first);
    }

    #[test]
    fn remove_unknown_is_not_found() {
        let store = MemGraphStore::new();
        assert!(matches!(
            store.remove_expression(id(GENERATED_BASE + 7)),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn register_concept_rejects_generated_ids() {
        let store = MemGraphStore::new();
        assert!(store.register_concept(id(5)).unwrap());
        assert!(!store.register_concept(id(5)).unwrap());
        assert!(matches!(
            store.register_concept(id(GENERATED_BASE)),
            Err(StoreError::Conflict { .. })
        ));
    }

    #[test]
    fn inserting_between_parent_and_child_removes_direct_edge() {
        let store = chain();
        let new = store.store_expression(&canon("2 : 9 = 9")).unwrap();
        store
            .store_parents_and_children(new, &set(&[2]), &set(&[3]))
            .unwrap();

        assert_eq!(raw(store.children(id(2)).unwrap()), vec![new.get()]);
        assert_eq!(raw(store.parents(id(3)).unwrap()), vec![new.get()]);
        assert_eq!(raw(store.descendants(id(1)).unwrap()), vec![2, 3, new.get()]);
    }

    #[test]
    fn edge_writes_are_idempotent_and_exclusive() {
        let store = chain();
        let new = store.store_expression(&canon("2 : 9 = 9")).unwrap();
        store.store_parents_and_children(new, &set(&[2]), &set(&[])).unwrap();
        store.store_parents_and_children(new, &set(&[2]), &set(&[])).unwrap();
        assert!(matches!(
            store.store_parents_and_children(new, &set(&[1]), &set(&[])),
            Err(StoreError::Conflict { .. })
        ));
        assert!(matches!(
            store.store_equivalence(new, id(2)),
            Err(StoreError::Conflict { .. })
        ));
    }

    #[test]
    fn equivalence_is_idempotent_and_rejects_a_second_target() {
        let store = chain();
        let new = store.store_expression(&canon("3 : 9 = 9")).unwrap();
        store.store_equivalence(new, id(3)).unwrap();
        store.store_equivalence(new, id(3)).unwrap();
        assert!(matches!(
            store.store_equivalence(new, id(2)),
            Err(StoreError::Conflict { .. })
        ));
        assert_eq!(store.stats().equivalences, 1);
    }

    #[test]
    fn equivalent_ids_traverse_from_their_representative() {
        let store = chain();
        let alias = store.store_expression(&canon("2 : 9 = 9")).unwrap();
        store.store_equivalence(alias, id(2)).unwrap();

        assert_eq!(store.representative_of(alias), id(2));
        assert_eq!(raw(store.parents(alias).unwrap()), vec![1]);
        assert_eq!(raw(store.descendants(alias).unwrap()), vec![3]);
        // The alias shows up wherever its representative does.
        assert_eq!(raw(store.children(id(1)).unwrap()), vec![2, alias.get()]);
    }

    #[test]
    fn equivalence_chains_are_followed_but_cycles_rejected() {
        let store = chain();
        let a = store.store_expression(&canon("2 : 8 = 8")).unwrap();
        let b = store.store_expression(&canon("2 : 9 = 9")).unwrap();
        store.store_equivalence(a, id(2)).unwrap();
        store.store_equivalence(b, a).unwrap();
        assert_eq!(store.representative_of(b), id(2));
        assert!(store.descendants(id(1)).unwrap().contains(&b));

        let c = store.store_expression(&canon("2 : 7 = 7")).unwrap();
        store.store_equivalence(c, b).unwrap();
        assert!(matches!(
            store.store_equivalence(id(2), c),
            Err(StoreError::Conflict { .. })
        ));
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let store = chain();
        for result in [
            store.parents(id(99)),
            store.children(id(99)),
            store.ancestors(id(99)),
            store.descendants(id(99)),
        ] {
            assert!(matches!(result, Err(StoreError::NotFound { id: 99 })));
        }
    }

    #[test]
    fn all_expressions_in_id_order() {
        let store = MemGraphStore::new();
        let a = store.store_expression(&canon("1 : 2 = 3")).unwrap();
        let b = store.store_expression(&canon("1 : 2 = 4")).unwrap();
        let all = store.all_expressions().unwrap();
        assert_eq!(all.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(all[1].1.as_str(), "1:2=4");
    }
}
