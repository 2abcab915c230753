// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # exprepo
//!
//! A repository for post-coordinated clinical terminology expressions.
//! Every distinct expression gets one stable id, is classified against a
//! concept ontology, and takes its place in a subsumption graph that can be
//! navigated and queried.
//!
//! ## Architecture
//!
//! - **Expressions** (`expression`): lexer, parser and canonical form
//! - **Classification** (`classify`): adapter trait, structural classifier,
//!   timeout-bounded worker thread
//! - **Storage** (`store`): DashMap + petgraph in memory, redb on disk
//! - **Resolution** (`resolver`): canonicalize → look up → allocate →
//!   classify → link, with rollback on failure
//! - **Queries** (`query`): `<`, `<<` and `OR` over resolved expressions
//!
//! ## Library usage
//!
//! ```no_run
//! use exprepo::config::RepositoryConfig;
//! use exprepo::repository::Repository;
//!
//! let config = RepositoryConfig::with_data_dir("/var/lib/exprepo")
//!     .with_ontology("/etc/exprepo/concepts.toml");
//! let repo = Repository::open(config).unwrap();
//! let id = repo
//!     .resolve_expression_id("64572001 : 363698007 = 80891009")
//!     .unwrap();
//! let below = repo.run_query(&format!("< {id}")).unwrap();
//! ```

pub mod bootstrap;
pub mod classify;
pub mod config;
pub mod error;
pub mod export;
pub mod expression;
pub mod id;
pub mod ontology;
pub mod query;
pub mod repository;
pub mod resolver;
pub mod store;
