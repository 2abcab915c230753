//! Compositional expressions: syntax tree, parser and canonical form.
//!
//! - [`ast`]: the expression tree
//! - [`lexer`] / [`parser`]: text to tree, for expressions and queries
//! - [`canonical`]: tree to order-independent [`CanonicalForm`]

pub mod ast;
pub mod canonical;
pub mod error;
pub mod lexer;
pub mod parser;

pub use ast::{Attribute, AttributeGroup, AttributeValue, ConceptReference, Expression, Refinement};
pub use canonical::{CanonicalForm, canonicalize};
pub use error::SyntaxError;
pub use parser::{parse_expression, parse_query};
