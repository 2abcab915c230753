//! Query trees and their evaluation.
//!
//! A query is built from expressions with three operators: `<` (strict
//! descendants), `<<` (descendants and the expression itself) and `OR`
//! (union). Every expression operand is resolved, so evaluating a query can
//! store expressions it mentions for the first time.

use std::collections::BTreeSet;

use crate::error::{RepoError, RepoResult, SyntaxError};
use crate::expression::Expression;
use crate::id::ExpressionId;
use crate::resolver::IdentityResolver;

/// A parsed query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryNode {
    Expr(Expression),
    Union(Vec<QueryNode>),
    /// Strict descendants of a single expression.
    Desc(Box<QueryNode>),
    /// Descendants of a single expression, plus the expression.
    DescSelf(Box<QueryNode>),
}

impl QueryNode {
    /// The expression operand of a descendant operator.
    fn descendant_operand(&self) -> Result<&Expression, SyntaxError> {
        match self {
            QueryNode::Expr(expression) => Ok(expression),
            _ => Err(SyntaxError::DescendantOperand),
        }
    }
}

/// Evaluates query trees against a resolver.
#[derive(Debug, Clone, Copy)]
pub struct QueryEvaluator<'a> {
    resolver: &'a IdentityResolver,
}

impl<'a> QueryEvaluator<'a> {
    pub fn new(resolver: &'a IdentityResolver) -> Self {
        Self { resolver }
    }

    pub fn evaluate(&self, node: &QueryNode) -> RepoResult<BTreeSet<ExpressionId>> {
        match node {
            QueryNode::Expr(expression) => {
                Ok(BTreeSet::from([self.resolver.resolve(expression)?]))
            }
            QueryNode::Union(children) => {
                let mut out = BTreeSet::new();
                for child in children {
                    out.extend(self.evaluate(child)?);
                }
                Ok(out)
            }
            QueryNode::Desc(child) => {
                let id = self.resolver.resolve(child.descendant_operand()?)?;
                self.descendants(id)
            }
            QueryNode::DescSelf(child) => {
                let id = self.resolver.resolve(child.descendant_operand()?)?;
                let mut out = self.descendants(id)?;
                out.insert(id);
                Ok(out)
            }
        }
    }

    fn descendants(&self, id: ExpressionId) -> RepoResult<BTreeSet<ExpressionId>> {
        let _read = self.resolver.read_gate();
        self.resolver
            .store()
            .descendants(id)
            .map_err(RepoError::from_lookup)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::classify::{
        ClassificationAdapter, Definition, Oracle, StructuralClassifier, classification_of,
    };
    use crate::expression::{parse_expression, parse_query};
    use crate::resolver::record_classification;
    use crate::store::{GraphStore, MemGraphStore};

    fn id(raw: u64) -> ExpressionId {
        ExpressionId::new(raw).unwrap()
    }

    /// 1 ⊒ 2 ⊒ 3, 1 ⊒ 4.
    fn resolver() -> IdentityResolver {
        let store: Arc<dyn GraphStore> = Arc::new(MemGraphStore::new());
        let mut classifier = StructuralClassifier::new();
        let concepts = [(1, vec![]), (2, vec![1]), (3, vec![2]), (4, vec![1])];
        for (raw, parents) in &concepts {
            let def = Definition::primitive_child_of(parents.iter().map(|&p| id(p)));
            classifier.define_concept(id(*raw), def).unwrap();
        }
        classifier.flush().unwrap();
        for (raw, _) in &concepts {
            store.register_concept(id(*raw)).unwrap();
            let classification = classification_of(&classifier, id(*raw)).unwrap();
            record_classification(store.as_ref(), id(*raw), &classification).unwrap();
        }
        let oracle = Oracle::spawn(Box::new(classifier), Some(Duration::from_secs(10))).unwrap();
        IdentityResolver::new(store, oracle)
    }

    fn run(resolver: &IdentityResolver, text: &str) -> RepoResult<Vec<u64>> {
        let query = parse_query(text)?;
        let ids = QueryEvaluator::new(resolver).evaluate(&query)?;
        Ok(ids.into_iter().map(ExpressionId::get).collect())
    }

    #[test]
    fn expression_query_returns_its_id() {
        let r = resolver();
        assert_eq!(run(&r, "3").unwrap(), vec![3]);
    }

    #[test]
    fn descendants_exclude_self() {
        let r = resolver();
        assert_eq!(run(&r, "< 1").unwrap(), vec![2, 3, 4]);
        assert!(run(&r, "< 3").unwrap().is_empty());
    }

    #[test]
    fn descendants_or_self_include_self() {
        let r = resolver();
        assert_eq!(run(&r, "<< 2").unwrap(), vec![2, 3]);
    }

    #[test]
    fn union_deduplicates() {
        let r = resolver();
        assert_eq!(run(&r, "<< 2 OR < 1 or 3").unwrap(), vec![2, 3, 4]);
    }

    #[test]
    fn descendants_reach_new_expressions() {
        let r = resolver();
        let new = r.resolve(&parse_expression("3 : 4 = 4").unwrap()).unwrap();
        let result = run(&r, "< 2").unwrap();
        assert!(result.contains(&3));
        assert!(result.contains(&new.get()));
    }

    #[test]
    fn descendant_of_nested_query_is_rejected() {
        let r = resolver();
        for text in ["< (2 OR 3)", "<< < 2", "< < 1"] {
            let err = run(&r, text).unwrap_err();
            assert!(
                matches!(err, RepoError::Syntax(SyntaxError::DescendantOperand)),
                "{text}: {err:?}"
            );
        }
    }

    #[test]
    fn unknown_concept_is_not_found() {
        let r = resolver();
        assert!(matches!(run(&r, "< 999"), Err(RepoError::NotFound { id: 999 })));
    }
}
