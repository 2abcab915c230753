//! Expression tree produced by the parser.
//!
//! Mirrors the compositional grammar: one or more focus concepts, refined by
//! ungrouped attributes and attribute groups. Attribute values are either a
//! concept reference or a nested expression.

use crate::id::ExpressionId;

/// A concept code with its optional human-readable term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConceptReference {
    pub id: ExpressionId,
    /// The `|term|` text, if one was written. Ignored for identity.
    pub term: Option<String>,
}

impl ConceptReference {
    pub fn new(id: ExpressionId) -> Self {
        Self { id, term: None }
    }

    pub fn with_term(mut self, term: impl Into<String>) -> Self {
        self.term = Some(term.into());
        self
    }
}

/// The value side of an attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Concept(ConceptReference),
    Expression(Box<Expression>),
}

/// An `name = value` refinement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: ConceptReference,
    pub value: AttributeValue,
}

/// A `{ ... }` group of attributes that hold together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeGroup {
    pub attributes: Vec<Attribute>,
}

/// The part after the `:`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Refinement {
    /// Attributes written outside any group.
    pub attributes: Vec<Attribute>,
    pub groups: Vec<AttributeGroup>,
}

impl Refinement {
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.groups.is_empty()
    }
}

/// A (possibly post-coordinated) expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    /// Focus concepts, joined by `+` in the text. Never empty.
    pub focus: Vec<ConceptReference>,
    pub refinement: Refinement,
}

impl Expression {
    /// A bare single-concept expression.
    pub fn concept(id: ExpressionId) -> Self {
        Self {
            focus: vec![ConceptReference::new(id)],
            refinement: Refinement::default(),
        }
    }

    /// The concept id if this expression is a single unrefined focus concept.
    pub fn as_single_concept(&self) -> Option<ExpressionId> {
        let (first, rest) = self.focus.split_first()?;
        (self.refinement.is_empty() && rest.iter().all(|c| c.id == first.id)).then_some(first.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> ExpressionId {
        ExpressionId::new(raw).unwrap()
    }

    #[test]
    fn single_concept_detection() {
        assert_eq!(Expression::concept(id(5)).as_single_concept(), Some(id(5)));

        let refined = Expression {
            focus: vec![ConceptReference::new(id(5))],
            refinement: Refinement {
                attributes: vec![Attribute {
                    name: ConceptReference::new(id(1)),
                    value: AttributeValue::Concept(ConceptReference::new(id(2))),
                }],
                groups: vec![],
            },
        };
        assert_eq!(refined.as_single_concept(), None);

        let conjunction = Expression {
            focus: vec![ConceptReference::new(id(5)), ConceptReference::new(id(6))],
            refinement: Refinement::default(),
        };
        assert_eq!(conjunction.as_single_concept(), None);

        let repeated = Expression {
            focus: vec![ConceptReference::new(id(5)), ConceptReference::new(id(5))],
            refinement: Refinement::default(),
        };
        assert_eq!(repeated.as_single_concept(), Some(id(5)));
    }

    #[test]
    fn concept_reference_term() {
        let r = ConceptReference::new(id(73211009)).with_term("Diabetes mellitus");
        assert_eq!(r.term.as_deref(), Some("Diabetes mellitus"));
    }
}
