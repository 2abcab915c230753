//! ACID-durable graph store backed by redb.
//!
//! Every write is committed in a single redb transaction before it is
//! applied to the in-memory working set, so a failed commit leaves both
//! untouched. On open, the tables are read back into a [`MemGraphStore`]
//! and all reads are served from it.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};

use crate::error::StoreError;
use crate::expression::CanonicalForm;
use crate::id::{ExpressionId, GENERATED_BASE, IdAllocator};

use super::mem::{Link, MemGraphStore};
use super::{GraphStore, StoreResult, StoreStats};

/// Generated id → canonical form.
const EXPRESSIONS: TableDefinition<u64, &str> = TableDefinition::new("expressions");
/// Id → bincode-encoded [`Link`].
const LINKS: TableDefinition<u64, &[u8]> = TableDefinition::new("links");
/// `(parent, child)` subsumption edges.
const EDGES: TableDefinition<(u64, u64), ()> = TableDefinition::new("edges");
/// Registered precoordinated concepts.
const CONCEPTS: TableDefinition<u64, ()> = TableDefinition::new("concepts");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const NEXT_ID_KEY: &str = "next_id";
const DB_FILE: &str = "exprepo.redb";

fn redb_err<E: std::fmt::Display>(context: &'static str) -> impl FnOnce(E) -> StoreError {
    move |e| StoreError::Redb {
        message: format!("{context} failed: {e}"),
    }
}

/// Graph store persisted with redb.
///
/// Writes are serialized by an internal lock; reads go straight to the
/// in-memory working set.
pub struct DurableGraphStore {
    db: Database,
    mem: MemGraphStore,
    write: Mutex<()>,
}

impl DurableGraphStore {
    /// Open or create a store in the given directory.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| StoreError::Io { source: e })?;
        let db_path = data_dir.join(DB_FILE);
        let db = Database::create(&db_path).map_err(|e| StoreError::Redb {
            message: format!("failed to open redb at {}: {e}", db_path.display()),
        })?;

        // Make sure every table exists so read transactions can open them.
        let txn = db.begin_write().map_err(redb_err("begin_write"))?;
        txn.open_table(EXPRESSIONS).map_err(redb_err("open_table"))?;
        txn.open_table(LINKS).map_err(redb_err("open_table"))?;
        txn.open_table(EDGES).map_err(redb_err("open_table"))?;
        txn.open_table(CONCEPTS).map_err(redb_err("open_table"))?;
        txn.open_table(META).map_err(redb_err("open_table"))?;
        txn.commit().map_err(redb_err("commit"))?;

        let mem = Self::load(&db)?;
        let stats = mem.stats();
        tracing::info!(
            path = %db_path.display(),
            expressions = stats.expressions,
            nodes = stats.nodes,
            edges = stats.edges,
            "opened durable store"
        );

        Ok(Self {
            db,
            mem,
            write: Mutex::new(()),
        })
    }

    fn load(db: &Database) -> StoreResult<MemGraphStore> {
        let txn = db.begin_read().map_err(redb_err("begin_read"))?;

        let meta = txn.open_table(META).map_err(redb_err("open_table"))?;
        let next_id = meta
            .get(NEXT_ID_KEY)
            .map_err(redb_err("get"))?
            .map(|guard| guard.value())
            .unwrap_or(GENERATED_BASE);
        let mem = MemGraphStore::with_allocator(IdAllocator::starting_from(next_id));

        let concepts = txn.open_table(CONCEPTS).map_err(redb_err("open_table"))?;
        for entry in concepts.iter().map_err(redb_err("iter"))? {
            let (key, _) = entry.map_err(redb_err("iter"))?;
            mem.register_concept(stored_id(key.value())?)?;
        }

        let expressions = txn.open_table(EXPRESSIONS).map_err(redb_err("open_table"))?;
        for entry in expressions.iter().map_err(redb_err("iter"))? {
            let (key, value) = entry.map_err(redb_err("iter"))?;
            mem.restore_expression(
                stored_id(key.value())?,
                CanonicalForm::from_stored(value.value().to_string()),
            );
        }

        let links = txn.open_table(LINKS).map_err(redb_err("open_table"))?;
        for entry in links.iter().map_err(redb_err("iter"))? {
            let (key, value) = entry.map_err(redb_err("iter"))?;
            let link: Link =
                bincode::deserialize(value.value()).map_err(|e| StoreError::Serialization {
                    message: format!("failed to deserialize link: {e}"),
                })?;
            mem.restore_link(stored_id(key.value())?, link);
        }

        let edges = txn.open_table(EDGES).map_err(redb_err("open_table"))?;
        for entry in edges.iter().map_err(redb_err("iter"))? {
            let (key, _) = entry.map_err(redb_err("iter"))?;
            let (parent, child) = key.value();
            mem.restore_edge(stored_id(parent)?, stored_id(child)?);
        }

        Ok(mem)
    }

    /// Run `f` inside one write transaction and commit it.
    fn transact(&self, f: impl FnOnce(&WriteTransaction) -> StoreResult<()>) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(redb_err("begin_write"))?;
        f(&txn)?;
        txn.commit().map_err(redb_err("commit"))
    }

    fn write_link(&self, txn: &WriteTransaction, id: ExpressionId, link: &Link) -> StoreResult<()> {
        let encoded = bincode::serialize(link).map_err(|e| StoreError::Serialization {
            message: format!("failed to serialize link: {e}"),
        })?;
        let mut table = txn.open_table(LINKS).map_err(redb_err("open_table"))?;
        table
            .insert(id.get(), encoded.as_slice())
            .map_err(redb_err("insert"))?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write.lock().expect("store write lock poisoned")
    }
}

fn stored_id(raw: u64) -> StoreResult<ExpressionId> {
    ExpressionId::new(raw).ok_or_else(|| StoreError::Serialization {
        message: "stored id is zero".into(),
    })
}

impl std::fmt::Debug for DurableGraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableGraphStore")
            .field("mem", &self.mem)
            .finish()
    }
}

impl GraphStore for DurableGraphStore {
    fn store_expression(&self, canonical: &CanonicalForm) -> StoreResult<ExpressionId> {
        let _guard = self.lock();
        let id = self.mem.store_expression(canonical)?;
        let persisted = self.transact(|txn| {
            let mut expressions = txn.open_table(EXPRESSIONS).map_err(redb_err("open_table"))?;
            expressions
                .insert(id.get(), canonical.as_str())
                .map_err(redb_err("insert"))?;
            let mut meta = txn.open_table(META).map_err(redb_err("open_table"))?;
            meta.insert(NEXT_ID_KEY, id.get().saturating_add(1))
                .map_err(redb_err("insert"))?;
            Ok(())
        });
        if let Err(e) = persisted {
            self.mem.remove_expression(id)?;
            return Err(e);
        }
        Ok(id)
    }

    fn expression_id(&self, canonical: &CanonicalForm) -> StoreResult<Option<ExpressionId>> {
        self.mem.expression_id(canonical)
    }

    fn canonical_form(&self, id: ExpressionId) -> StoreResult<Option<CanonicalForm>> {
        self.mem.canonical_form(id)
    }

    fn remove_expression(&self, id: ExpressionId) -> StoreResult<()> {
        let _guard = self.lock();
        if self.mem.canonical_form(id)?.is_none() {
            return Err(StoreError::NotFound { id: id.get() });
        }
        let incident = self.mem.incident_edges(id);
        self.transact(|txn| {
            let mut expressions = txn.open_table(EXPRESSIONS).map_err(redb_err("open_table"))?;
            expressions.remove(id.get()).map_err(redb_err("remove"))?;
            let mut links = txn.open_table(LINKS).map_err(redb_err("open_table"))?;
            links.remove(id.get()).map_err(redb_err("remove"))?;
            let mut edges = txn.open_table(EDGES).map_err(redb_err("open_table"))?;
            for (p, c) in &incident {
                edges.remove((p.get(), c.get())).map_err(redb_err("remove"))?;
            }
            Ok(())
        })?;
        self.mem.remove_expression(id)
    }

    fn register_concept(&self, id: ExpressionId) -> StoreResult<bool> {
        let _guard = self.lock();
        if !self.mem.check_concept(id)? {
            return Ok(false);
        }
        self.transact(|txn| {
            let mut concepts = txn.open_table(CONCEPTS).map_err(redb_err("open_table"))?;
            concepts.insert(id.get(), ()).map_err(redb_err("insert"))?;
            Ok(())
        })?;
        self.mem.register_concept(id)
    }

    fn contains(&self, id: ExpressionId) -> bool {
        self.mem.contains(id)
    }

    fn is_placed(&self, id: ExpressionId) -> bool {
        self.mem.is_placed(id)
    }

    fn store_equivalence(
        &self,
        id: ExpressionId,
        representative: ExpressionId,
    ) -> StoreResult<()> {
        let _guard = self.lock();
        let link = Link::Equivalent(representative);
        if self.mem.check_link(id, &link)? {
            return Ok(());
        }
        self.transact(|txn| self.write_link(txn, id, &link))?;
        self.mem.insert_link(id, link);
        Ok(())
    }

    fn representative_of(&self, id: ExpressionId) -> ExpressionId {
        self.mem.representative_of(id)
    }

    fn store_parents_and_children(
        &self,
        id: ExpressionId,
        parents: &BTreeSet<ExpressionId>,
        children: &BTreeSet<ExpressionId>,
    ) -> StoreResult<()> {
        let _guard = self.lock();
        let link = Link::Edges {
            parents: parents.clone(),
            children: children.clone(),
        };
        if self.mem.check_link(id, &link)? {
            return Ok(());
        }
        let redundant = self.mem.redundant_edges(parents, children);

        self.transact(|txn| {
            self.write_link(txn, id, &link)?;
            let mut edges = txn.open_table(EDGES).map_err(redb_err("open_table"))?;
            for (p, c) in &redundant {
                edges.remove((p.get(), c.get())).map_err(redb_err("remove"))?;
            }
            for p in parents {
                edges.insert((p.get(), id.get()), ()).map_err(redb_err("insert"))?;
            }
            for c in children {
                edges.insert((id.get(), c.get()), ()).map_err(redb_err("insert"))?;
            }
            Ok(())
        })?;

        if !redundant.is_empty() {
            tracing::debug!(%id, removed = redundant.len(), "dropped edges made indirect");
        }
        self.mem.insert_link(id, link);
        Ok(())
    }

    fn parents(&self, id: ExpressionId) -> StoreResult<BTreeSet<ExpressionId>> {
        self.mem.parents(id)
    }

    fn children(&self, id: ExpressionId) -> StoreResult<BTreeSet<ExpressionId>> {
        self.mem.children(id)
    }

    fn ancestors(&self, id: ExpressionId) -> StoreResult<BTreeSet<ExpressionId>> {
        self.mem.ancestors(id)
    }

    fn descendants(&self, id: ExpressionId) -> StoreResult<BTreeSet<ExpressionId>> {
        self.mem.descendants(id)
    }

    fn all_expressions(&self) -> StoreResult<Vec<(ExpressionId, CanonicalForm)>> {
        self.mem.all_expressions()
    }

    fn stats(&self) -> StoreStats {
        self.mem.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{canonicalize, parse_expression};
    use tempfile::TempDir;

    fn id(raw: u64) -> ExpressionId {
        ExpressionId::new(raw).unwrap()
    }

    fn canon(text: &str) -> CanonicalForm {
        canonicalize(&parse_expression(text).unwrap())
    }

    fn set(raw: &[u64]) -> BTreeSet<ExpressionId> {
        raw.iter().map(|&r| id(r)).collect()
    }

    #[test]
    fn expressions_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let form = canon("1 : 2 = 3");
        let stored = {
            let store = DurableGraphStore::open(dir.path()).unwrap();
            store.store_expression(&form).unwrap()
        };

        let store = DurableGraphStore::open(dir.path()).unwrap();
        assert_eq!(store.expression_id(&form).unwrap(), Some(stored));
        assert_eq!(store.canonical_form(stored).unwrap(), Some(form));

        // The allocator resumes after the last persisted id.
        let next = store.store_expression(&canon("1 : 2 = 4")).unwrap();
        assert!(next > stored);
    }

    #[test]
    fn graph_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let (between, alias) = {
            let store = DurableGraphStore::open(dir.path()).unwrap();
            store.register_concept(id(1)).unwrap();
            store.register_concept(id(2)).unwrap();
            store
                .store_parents_and_children(id(2), &set(&[1]), &set(&[]))
                .unwrap();

            let between = store.store_expression(&canon("1 : 5 = 5")).unwrap();
            store
                .store_parents_and_children(between, &set(&[1]), &set(&[2]))
                .unwrap();
            let alias = store.store_expression(&canon("1 : 6 = 6")).unwrap();
            store.store_equivalence(alias, between).unwrap();
            (between, alias)
        };

        let store = DurableGraphStore::open(dir.path()).unwrap();
        assert_eq!(store.children(id(1)).unwrap(), BTreeSet::from([between, alias]));
        assert_eq!(store.parents(id(2)).unwrap(), BTreeSet::from([between, alias]));
        assert_eq!(store.representative_of(alias), between);
        assert!(store.descendants(id(1)).unwrap().contains(&alias));
        assert!(matches!(
            store.store_equivalence(alias, id(2)),
            Err(StoreError::Conflict { .. })
        ));
    }

    #[test]
    fn removed_expression_stays_removed() {
        let dir = TempDir::new().unwrap();
        let form = canon("1 : 2 = 3");
        let burnt = {
            let store = DurableGraphStore::open(dir.path()).unwrap();
            store.register_concept(id(1)).unwrap();
            let burnt = store.store_expression(&form).unwrap();
            store
                .store_parents_and_children(burnt, &set(&[1]), &set(&[]))
                .unwrap();
            store.remove_expression(burnt).unwrap();
            burnt
        };

        let store = DurableGraphStore::open(dir.path()).unwrap();
        assert_eq!(store.expression_id(&form).unwrap(), None);
        assert!(!store.contains(burnt));
        assert!(store.children(id(1)).unwrap().is_empty());
        assert!(store.store_expression(&form).unwrap() > burnt);
    }

    #[test]
    fn registered_concepts_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = DurableGraphStore::open(dir.path()).unwrap();
            assert!(store.register_concept(id(404684003)).unwrap());
        }
        let store = DurableGraphStore::open(dir.path()).unwrap();
        assert!(store.contains(id(404684003)));
        assert!(!store.register_concept(id(404684003)).unwrap());
    }
}
