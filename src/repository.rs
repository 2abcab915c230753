//! Repository facade: the public entry point.
//!
//! Owns the graph store, the classifier worker and the resolver, and
//! exposes text-level operations: resolve an expression, run a query,
//! navigate the subsumption graph.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::bootstrap::{BootstrapReport, bootstrap};
use crate::classify::{ClassificationAdapter, Oracle, StructuralClassifier};
use crate::config::RepositoryConfig;
use crate::error::{RepoError, RepoResult};
use crate::export::{ConceptExport, ExpressionExport, RepositoryExport};
use crate::expression::{CanonicalForm, canonicalize, parse_expression, parse_query};
use crate::id::ExpressionId;
use crate::ontology::Ontology;
use crate::query::QueryEvaluator;
use crate::resolver::IdentityResolver;
use crate::store::{DurableGraphStore, GraphStore, MemGraphStore};

/// A post-coordinated expression repository.
pub struct Repository {
    config: RepositoryConfig,
    resolver: IdentityResolver,
    /// Ontology concepts and their terms.
    concepts: BTreeMap<ExpressionId, Option<String>>,
    bootstrap: BootstrapReport,
}

impl Repository {
    /// Open a repository with the structural classifier.
    pub fn open(config: RepositoryConfig) -> RepoResult<Self> {
        Self::with_adapter(config, Box::new(StructuralClassifier::new()))
    }

    /// Open a repository with a caller-supplied classifier.
    ///
    /// The adapter should be empty: it is bootstrapped from the ontology
    /// and the store before the repository is returned.
    pub fn with_adapter(
        config: RepositoryConfig,
        mut adapter: Box<dyn ClassificationAdapter>,
    ) -> RepoResult<Self> {
        let ontology = match &config.ontology.path {
            Some(path) => Ontology::load(path)?,
            None => Ontology::default(),
        };

        let store: Arc<dyn GraphStore> = match &config.store.data_dir {
            Some(dir) => Arc::new(DurableGraphStore::open(dir)?),
            None => Arc::new(MemGraphStore::new()),
        };

        tracing::info!(
            data_dir = ?config.store.data_dir,
            ontology_concepts = ontology.len(),
            timeout_ms = config.classifier.timeout_ms,
            "opening expression repository"
        );

        let report = bootstrap(adapter.as_mut(), store.as_ref(), &ontology)?;
        let oracle = Oracle::spawn(adapter, config.classifier.timeout())?;

        let concepts = ontology
            .concepts
            .into_iter()
            .filter_map(|c| Some((c.expression_id()?, c.term)))
            .collect();

        Ok(Self {
            config,
            resolver: IdentityResolver::new(store, oracle),
            concepts,
            bootstrap: report,
        })
    }

    /// Resolve expression text to its id, storing and classifying it if new.
    pub fn resolve_expression_id(&self, text: &str) -> RepoResult<ExpressionId> {
        let expression = parse_expression(text)?;
        self.resolver.resolve(&expression)
    }

    /// Evaluate a query. Expressions it mentions are resolved.
    pub fn run_query(&self, text: &str) -> RepoResult<BTreeSet<ExpressionId>> {
        let query = parse_query(text)?;
        QueryEvaluator::new(&self.resolver).evaluate(&query)
    }

    pub fn parents(&self, id: ExpressionId) -> RepoResult<BTreeSet<ExpressionId>> {
        let _read = self.resolver.read_gate();
        self.store().parents(id).map_err(RepoError::from_lookup)
    }

    pub fn children(&self, id: ExpressionId) -> RepoResult<BTreeSet<ExpressionId>> {
        let _read = self.resolver.read_gate();
        self.store().children(id).map_err(RepoError::from_lookup)
    }

    pub fn ancestors(&self, id: ExpressionId) -> RepoResult<BTreeSet<ExpressionId>> {
        let _read = self.resolver.read_gate();
        self.store().ancestors(id).map_err(RepoError::from_lookup)
    }

    pub fn descendants(&self, id: ExpressionId) -> RepoResult<BTreeSet<ExpressionId>> {
        let _read = self.resolver.read_gate();
        self.store().descendants(id).map_err(RepoError::from_lookup)
    }

    /// Always fails: rendering an id back to human-readable text is not
    /// supported.
    pub fn expression_text(&self, _id: ExpressionId) -> RepoResult<String> {
        Err(RepoError::Unsupported {
            operation: "expression_text".into(),
        })
    }

    /// Canonical form of expression text, without storing anything.
    pub fn canonical_form(&self, text: &str) -> RepoResult<CanonicalForm> {
        Ok(canonicalize(&parse_expression(text)?))
    }

    /// Term of an ontology concept.
    pub fn term(&self, id: ExpressionId) -> Option<&str> {
        self.concepts.get(&id).and_then(|t| t.as_deref())
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn bootstrap_report(&self) -> BootstrapReport {
        self.bootstrap
    }

    fn store(&self) -> &dyn GraphStore {
        self.resolver.store().as_ref()
    }

    pub fn info(&self) -> RepositoryInfo {
        let stats = {
            let _read = self.resolver.read_gate();
            self.store().stats()
        };
        RepositoryInfo {
            persistent: self.config.store.data_dir.is_some(),
            timeout_ms: self.config.classifier.timeout_ms,
            concepts: self.concepts.len(),
            expressions: stats.expressions,
            nodes: stats.nodes,
            edges: stats.edges,
            equivalences: stats.equivalences,
            next_id: stats.next_id,
        }
    }

    /// Snapshot every ontology concept and stored expression.
    pub fn export(&self) -> RepoResult<RepositoryExport> {
        let _read = self.resolver.read_gate();
        let store = self.store();

        let concepts = self
            .concepts
            .iter()
            .map(|(id, term)| ConceptExport {
                id: id.get(),
                term: term.clone(),
            })
            .collect();

        let mut expressions = Vec::new();
        for (id, canonical) in store.all_expressions()? {
            let representative = store.representative_of(id);
            let export = if representative != id {
                ExpressionExport {
                    id: id.get(),
                    canonical: canonical.into_string(),
                    equivalent_to: Some(representative.get()),
                    parents: Vec::new(),
                    children: Vec::new(),
                }
            } else {
                ExpressionExport {
                    id: id.get(),
                    canonical: canonical.into_string(),
                    equivalent_to: None,
                    parents: store.parents(id)?.into_iter().map(ExpressionId::get).collect(),
                    children: store.children(id)?.into_iter().map(ExpressionId::get).collect(),
                }
            };
            expressions.push(export);
        }

        Ok(RepositoryExport {
            concepts,
            expressions,
        })
    }
}

/// Summary information about a repository.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RepositoryInfo {
    pub persistent: bool,
    pub timeout_ms: u64,
    pub concepts: usize,
    pub expressions: usize,
    pub nodes: usize,
    pub edges: usize,
    pub equivalences: usize,
    pub next_id: u64,
}

impl std::fmt::Display for RepositoryInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "expression repository info")?;
        writeln!(f, "  concepts:      {}", self.concepts)?;
        writeln!(f, "  expressions:   {}", self.expressions)?;
        writeln!(f, "  nodes:         {}", self.nodes)?;
        writeln!(f, "  edges:         {}", self.edges)?;
        writeln!(f, "  equivalences:  {}", self.equivalences)?;
        writeln!(f, "  next id:       {}", self.next_id)?;
        writeln!(f, "  timeout (ms):  {}", self.timeout_ms)?;
        writeln!(f, "  persistent:    {}", self.persistent)?;
        Ok(())
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("config", &self.config)
            .field("resolver", &self.resolver)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyntaxError;

    fn id(raw: u64) -> ExpressionId {
        ExpressionId::new(raw).unwrap()
    }

    #[test]
    fn memory_only_repository_starts_empty() {
        let repo = Repository::open(RepositoryConfig::memory_only()).unwrap();
        let info = repo.info();
        assert!(!info.persistent);
        assert_eq!(info.expressions, 0);
        assert_eq!(info.concepts, 0);
        assert_eq!(repo.bootstrap_report(), BootstrapReport::default());
    }

    #[test]
    fn syntax_errors_surface() {
        let repo = Repository::open(RepositoryConfig::memory_only()).unwrap();
        assert!(matches!(
            repo.resolve_expression_id("1 : = 2"),
            Err(RepoError::Syntax(_))
        ));
        assert!(matches!(
            repo.run_query("< (1 OR 2)"),
            Err(RepoError::Syntax(SyntaxError::DescendantOperand))
        ));
    }

    #[test]
    fn expression_text_is_unsupported() {
        let repo = Repository::open(RepositoryConfig::memory_only()).unwrap();
        assert!(matches!(
            repo.expression_text(id(1)),
            Err(RepoError::Unsupported { .. })
        ));
    }

    #[test]
    fn canonical_form_does_not_store() {
        let repo = Repository::open(RepositoryConfig::memory_only()).unwrap();
        let form = repo.canonical_form("2 : 5 = 6, 3 = 4").unwrap();
        assert_eq!(form.as_str(), "2:3=4,5=6");
        assert_eq!(repo.info().expressions, 0);
    }

    #[test]
    fn navigation_of_unknown_id_is_not_found() {
        let repo = Repository::open(RepositoryConfig::memory_only()).unwrap();
        assert!(matches!(repo.parents(id(42)), Err(RepoError::NotFound { id: 42 })));
        assert!(matches!(repo.descendants(id(42)), Err(RepoError::NotFound { id: 42 })));
    }

    #[test]
    fn info_display() {
        let repo = Repository::open(RepositoryConfig::memory_only()).unwrap();
        let text = repo.info().to_string();
        assert!(text.contains("expressions:   0"));
        assert!(text.contains("persistent:    false"));
    }
}
