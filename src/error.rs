//! Rich diagnostic error types for the expression repository.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so users know exactly what
//! went wrong and how to fix it.

use miette::Diagnostic;
use thiserror::Error;

use crate::id::ExpressionId;

pub use crate::expression::error::SyntaxError;

/// Top-level error type for the repository.
///
/// Each subsystem variant wraps its own error type, preserving the full
/// diagnostic chain through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum RepoError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Syntax(#[from] SyntaxError),

    #[error("unknown expression id: {id}")]
    #[diagnostic(
        code(exprepo::not_found),
        help(
            "No expression or concept with this id is known to the repository. \
             Resolve the expression first, or load the concept through the ontology file."
        )
    )]
    NotFound { id: u64 },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Classification(#[from] ClassifyError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error("operation not supported: {operation}")]
    #[diagnostic(
        code(exprepo::unsupported),
        help("This operation is intentionally not implemented by the repository.")
    )]
    Unsupported { operation: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("I/O error: {source}")]
    #[diagnostic(
        code(exprepo::store::io),
        help(
            "A filesystem operation failed. Check that the data directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("redb transaction error: {message}")]
    #[diagnostic(
        code(exprepo::store::redb),
        help(
            "The embedded database encountered a transaction error. \
             The resolution was aborted; retrying is safe."
        )
    )]
    Redb { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(exprepo::store::serde),
        help(
            "Failed to serialize or deserialize a stored record. \
             The data directory may have been written by an incompatible version."
        )
    )]
    Serialization { message: String },

    #[error("canonical form already stored as {existing}: {canonical}")]
    #[diagnostic(
        code(exprepo::store::duplicate),
        help("Another writer allocated an id for this expression first. Use the existing id.")
    )]
    Duplicate {
        canonical: String,
        existing: ExpressionId,
    },

    #[error("conflicting graph write for {id}: {message}")]
    #[diagnostic(
        code(exprepo::store::conflict),
        help(
            "An id carries either one equivalence link or a parent/child edge set, never both, \
             and neither may be replaced with different values."
        )
    )]
    Conflict { id: u64, message: String },

    #[error("id not found in store: {id}")]
    #[diagnostic(
        code(exprepo::store::not_found),
        help("The id has never been stored or registered.")
    )]
    NotFound { id: u64 },

    #[error("generated id space exhausted")]
    #[diagnostic(
        code(exprepo::store::exhausted),
        help("No further generated ids can be allocated. This requires 2^63 allocations.")
    )]
    IdSpaceExhausted,
}

// ---------------------------------------------------------------------------
// Classification errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ClassifyError {
    #[error("classifier did not answer within {timeout_ms} ms")]
    #[diagnostic(
        code(exprepo::classify::timeout),
        help(
            "The classification oracle timed out. The resolution was rolled back; \
             retry later or raise `classifier.timeout_ms`."
        )
    )]
    Timeout { timeout_ms: u64 },

    #[error("classifier unavailable: {message}")]
    #[diagnostic(
        code(exprepo::classify::unavailable),
        help("The classifier worker has stopped. Restart the repository.")
    )]
    Unavailable { message: String },

    #[error("concept {id} is not classified")]
    #[diagnostic(
        code(exprepo::classify::unknown_concept),
        help("Define the concept and flush the classifier before querying it.")
    )]
    UnknownConcept { id: u64 },

    #[error("cyclic definition through concept {id}")]
    #[diagnostic(
        code(exprepo::classify::cyclic),
        help("A concept's definition refers back to itself. Fix the ontology file.")
    )]
    CyclicDefinition { id: u64 },

    #[error("inconsistent classification result: {message}")]
    #[diagnostic(
        code(exprepo::classify::inconsistent),
        help("The classifier returned results that cannot be applied to the subsumption graph.")
    )]
    Inconsistent { message: String },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read {path}")]
    #[diagnostic(
        code(exprepo::config::read),
        help("Ensure the file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    #[diagnostic(
        code(exprepo::config::parse),
        help("Check the TOML syntax of the file.")
    )]
    Parse { path: String, message: String },

    #[error("invalid configuration: {message}")]
    #[diagnostic(code(exprepo::config::invalid), help("{message}"))]
    Invalid { message: String },
}

/// Convenience alias for functions returning repository results.
pub type RepoResult<T> = std::result::Result<T, RepoError>;

impl RepoError {
    /// Turn a store-level `NotFound` into the caller-facing `NotFound`.
    pub(crate) fn from_lookup(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { id } => RepoError::NotFound { id },
            other => RepoError::Store(other),
        }
    }
}
