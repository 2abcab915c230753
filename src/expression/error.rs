//! Syntax errors for expression and query text.
//!
//! Follows the repository's miette pattern: every variant carries
//! `#[diagnostic(code(...), help(...))]` so the caller knows what went wrong
//! and where.

use miette::Diagnostic;
use thiserror::Error;

/// Malformed expression or query text, or a malformed query composition.
///
/// Syntax errors are always returned to the caller and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum SyntaxError {
    #[error("unexpected character '{ch}' at offset {position}")]
    #[diagnostic(
        code(exprepo::syntax::character),
        help(
            "Expressions are built from concept ids, optional |terms|, and the \
             operators + : = , {{ }} ( ). Queries add <, << and OR."
        )
    )]
    UnexpectedCharacter { ch: char, position: usize },

    #[error("unterminated term starting at offset {position}")]
    #[diagnostic(
        code(exprepo::syntax::term),
        help("Close the term with a second '|', e.g. 73211009 |Diabetes mellitus|.")
    )]
    UnterminatedTerm { position: usize },

    #[error("invalid concept id \"{text}\" at offset {position}")]
    #[diagnostic(
        code(exprepo::syntax::concept_id),
        help("Concept ids are positive integers that fit in 64 bits.")
    )]
    InvalidConceptId { text: String, position: usize },

    #[error("expected {expected}, found {found} at offset {position}")]
    #[diagnostic(code(exprepo::syntax::unexpected_token))]
    UnexpectedToken {
        found: String,
        expected: String,
        position: usize,
    },

    #[error("unexpected end of input, expected {expected}")]
    #[diagnostic(code(exprepo::syntax::unexpected_end))]
    UnexpectedEnd { expected: String },

    #[error("empty attribute group at offset {position}")]
    #[diagnostic(
        code(exprepo::syntax::empty_group),
        help("An attribute group must contain at least one attribute.")
    )]
    EmptyGroup { position: usize },

    #[error("nesting deeper than {limit} levels at offset {position}")]
    #[diagnostic(
        code(exprepo::syntax::too_deep),
        help("Flatten the expression or query; nested values and parentheses are limited.")
    )]
    NestingTooDeep { limit: usize, position: usize },

    #[error("descendant operator requires a single expression operand, not a nested query")]
    #[diagnostic(
        code(exprepo::syntax::descendant_operand),
        help("Apply < or << to each expression separately and combine the results with OR.")
    )]
    DescendantOperand,
}
