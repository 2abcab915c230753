//! Concept definitions as consumed by a classifier.
//!
//! A [`Definition`] is the description-logic reading of an expression: the
//! conjunction of its focus concepts, existential relationships outside any
//! group, and relationship groups. Precoordinated concepts loaded from the
//! ontology are usually `primitive` (necessary conditions only);
//! post-coordinated expressions are always fully defined.

use std::collections::BTreeSet;

use crate::expression::{Attribute, AttributeValue, Expression};
use crate::id::ExpressionId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Definition {
    /// Named concepts in the conjunction.
    pub parents: BTreeSet<ExpressionId>,
    pub ungrouped: BTreeSet<Relationship>,
    pub groups: BTreeSet<BTreeSet<Relationship>>,
    /// Primitive definitions state necessary conditions only: nothing is
    /// inferred to be subsumed by a primitive concept unless it names it.
    pub primitive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Relationship {
    pub attribute: ExpressionId,
    pub value: RelationshipValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelationshipValue {
    Concept(ExpressionId),
    Nested(Box<Definition>),
}

impl Definition {
    /// Translate an expression tree into a fully-defined definition.
    pub fn from_expression(expression: &Expression) -> Self {
        let parents = expression.focus.iter().map(|c| c.id).collect();
        let ungrouped = expression
            .refinement
            .attributes
            .iter()
            .map(Relationship::from_attribute)
            .collect();
        let groups = expression
            .refinement
            .groups
            .iter()
            .map(|g| g.attributes.iter().map(Relationship::from_attribute).collect())
            .collect();

        Self {
            parents,
            ungrouped,
            groups,
            primitive: false,
        }
    }

    /// A primitive concept with the given told parents and no relationships.
    pub fn primitive_child_of(parents: impl IntoIterator<Item = ExpressionId>) -> Self {
        Self {
            parents: parents.into_iter().collect(),
            primitive: true,
            ..Default::default()
        }
    }

    pub fn with_primitive(mut self, primitive: bool) -> Self {
        self.primitive = primitive;
        self
    }

    /// Every concept id this definition mentions, at any depth.
    pub fn referenced_concepts(&self) -> BTreeSet<ExpressionId> {
        let mut out = BTreeSet::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references(&self, out: &mut BTreeSet<ExpressionId>) {
        out.extend(self.parents.iter().copied());
        for rel in self.ungrouped.iter().chain(self.groups.iter().flatten()) {
            out.insert(rel.attribute);
            match &rel.value {
                RelationshipValue::Concept(id) => {
                    out.insert(*id);
                }
                RelationshipValue::Nested(nested) => nested.collect_references(out),
            }
        }
    }
}

impl Relationship {
    fn from_attribute(attribute: &Attribute) -> Self {
        let value = match &attribute.value {
            AttributeValue::Concept(c) => RelationshipValue::Concept(c.id),
            AttributeValue::Expression(nested) => match nested.as_single_concept() {
                Some(id) => RelationshipValue::Concept(id),
                None => RelationshipValue::Nested(Box::new(Definition::from_expression(nested))),
            },
        };
        Self {
            attribute: attribute.name.id,
            value,
        }
    }
}
