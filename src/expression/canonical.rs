//! Canonical form: an order-independent string for an expression.
//!
//! Focus concepts are sorted numerically; attributes, attribute groups and
//! the attributes inside a group are sorted as rendered strings. Duplicates
//! collapse, terms are dropped and no whitespace is emitted. The output is
//! itself valid expression syntax.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::id::ExpressionId;

use super::ast::{Attribute, AttributeValue, Expression};

/// Normalized string form of an expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalForm(String);

impl CanonicalForm {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap text read back from storage. The text is trusted to be a
    /// canonical form written by this crate.
    pub(crate) fn from_stored(text: String) -> Self {
        Self(text)
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// The id this form denotes directly, if it is a bare concept code.
    pub fn as_concept_id(&self) -> Option<ExpressionId> {
        if self.0.is_empty() || !self.0.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        self.0.parse::<u64>().ok().and_then(ExpressionId::new)
    }
}

impl std::fmt::Display for CanonicalForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalForm {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Canonicalize an expression tree. Pure and total.
pub fn canonicalize(expression: &Expression) -> CanonicalForm {
    CanonicalForm(render_expression(expression))
}

fn render_expression(expression: &Expression) -> String {
    let focus: BTreeSet<u64> = expression.focus.iter().map(|c| c.id.get()).collect();
    let mut out = focus
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join("+");

    let refinement = &expression.refinement;
    if refinement.is_empty() {
        return out;
    }

    let ungrouped = render_attribute_set(&refinement.attributes);
    let groups: BTreeSet<String> = refinement
        .groups
        .iter()
        .map(|g| format!("{{{}}}", render_attribute_set(&g.attributes).join(",")))
        .collect();

    let parts: Vec<String> = ungrouped.into_iter().chain(groups).collect();
    out.push(':');
    out.push_str(&parts.join(","));
    out
}

/// Rendered attributes, sorted and de-duplicated.
fn render_attribute_set(attributes: &[Attribute]) -> Vec<String> {
    let rendered: BTreeSet<String> = attributes.iter().map(render_attribute).collect();
    rendered.into_iter().collect()
}

fn render_attribute(attribute: &Attribute) -> String {
    let value = match &attribute.value {
        AttributeValue::Concept(c) => c.id.to_string(),
        AttributeValue::Expression(nested) => match nested.as_single_concept() {
            Some(id) => id.to_string(),
            None => format!("({})", render_expression(nested)),
        },
    };
    format!("{}={}", attribute.name.id, value)
}
