//! Precoordinated concept files.
//!
//! An ontology file is TOML with one `[[concept]]` table per concept:
//!
//! ```toml
//! [[concept]]
//! id = 404684003
//! term = "Clinical finding"
//! definition = "138875005"   # expression: told parents and refinements
//! primitive = true           # default
//! ```
//!
//! A concept without a `definition` is a primitive root.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::classify::Definition;
use crate::error::{ConfigError, SyntaxError};
use crate::expression::parse_expression;
use crate::id::ExpressionId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ontology {
    #[serde(default, rename = "concept")]
    pub concepts: Vec<OntologyConcept>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OntologyConcept {
    pub id: u64,
    #[serde(default)]
    pub term: Option<String>,
    #[serde(default)]
    pub definition: Option<String>,
    #[serde(default = "default_primitive")]
    pub primitive: bool,
}

fn default_primitive() -> bool {
    true
}

impl Ontology {
    /// Load and validate an ontology file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml(&content, path)
    }

    /// Parse and validate ontology text; `origin` is only used in error messages.
    pub fn from_toml(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        let ontology: Ontology = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.display().to_string(),
            message: e.to_string(),
        })?;
        ontology.validate()?;
        Ok(ontology)
    }

    /// Ids must be precoordinated and unique.
    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for concept in &self.concepts {
            let id = concept.expression_id().ok_or_else(|| ConfigError::Invalid {
                message: format!(
                    "concept id {} is not a precoordinated id (must be positive and below 2^60)",
                    concept.id
                ),
            })?;
            if !seen.insert(id) {
                return Err(ConfigError::Invalid {
                    message: format!("concept {id} is listed more than once"),
                });
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }
}

impl OntologyConcept {
    pub fn expression_id(&self) -> Option<ExpressionId> {
        ExpressionId::new(self.id).filter(|id| id.is_precoordinated())
    }

    /// The classifier definition of this concept.
    pub fn definition(&self) -> Result<Definition, SyntaxError> {
        match &self.definition {
            None => Ok(Definition::primitive_child_of([]).with_primitive(self.primitive)),
            Some(text) => {
                let expression = parse_expression(text)?;
                Ok(Definition::from_expression(&expression).with_primitive(self.primitive))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[concept]]
        id = 138875005
        term = "SNOMED CT Concept"

        [[concept]]
        id = 404684003
        term = "Clinical finding"
        definition = "138875005"

        [[concept]]
        id = 22298006
        definition = "404684003 : 363698007 = 80891009"
        primitive = false
    "#;

    #[test]
    fn parses_concepts_with_defaults() {
        let ontology = Ontology::from_toml(SAMPLE, Path::new("sample.toml")).unwrap();
        assert_eq!(ontology.len(), 3);
        assert!(ontology.concepts[0].primitive);
        assert_eq!(ontology.concepts[1].term.as_deref(), Some("Clinical finding"));
        assert!(!ontology.concepts[2].primitive);
    }

    #[test]
    fn definitions_follow_the_expression() {
        let ontology = Ontology::from_toml(SAMPLE, Path::new("sample.toml")).unwrap();

        let root = ontology.concepts[0].definition().unwrap();
        assert!(root.primitive);
        assert!(root.parents.is_empty());

        let finding = ontology.concepts[1].definition().unwrap();
        assert!(finding.primitive);
        assert!(finding.parents.contains(&ExpressionId::new(138875005).unwrap()));

        let defined = ontology.concepts[2].definition().unwrap();
        assert!(!defined.primitive);
        assert_eq!(defined.ungrouped.len(), 1);
    }

    #[test]
    fn bad_definition_is_a_syntax_error() {
        let concept = OntologyConcept {
            id: 5,
            term: None,
            definition: Some("5 : =".into()),
            primitive: true,
        };
        assert!(concept.definition().is_err());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let text = "[[concept]]\nid = 1\n[[concept]]\nid = 1\n";
        let err = Ontology::from_toml(text, Path::new("dup.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn generated_range_ids_are_rejected() {
        let text = format!("[[concept]]\nid = {}\n", crate::id::GENERATED_BASE);
        let err = Ontology::from_toml(&text, Path::new("big.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn empty_file_is_empty_ontology() {
        let ontology = Ontology::from_toml("", Path::new("empty.toml")).unwrap();
        assert!(ontology.is_empty());
    }
}
