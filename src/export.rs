//! Export types for serializing repository state.
//!
//! These types give a flat, JSON-friendly view of every stored expression
//! and where it sits in the subsumption graph.

use serde::{Deserialize, Serialize};

/// Exported expression with its graph placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpressionExport {
    /// Generated expression ID.
    pub id: u64,
    /// Canonical form.
    pub canonical: String,
    /// Representative this expression is equivalent to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equivalent_to: Option<u64>,
    /// Direct parents (empty for equivalent expressions).
    #[serde(default)]
    pub parents: Vec<u64>,
    /// Direct children (empty for equivalent expressions).
    #[serde(default)]
    pub children: Vec<u64>,
}

/// Exported precoordinated concept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptExport {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
}

/// Full repository export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryExport {
    pub concepts: Vec<ConceptExport>,
    pub expressions: Vec<ExpressionExport>,
}

impl RepositoryExport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
