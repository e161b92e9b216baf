#![forbid(unsafe_code)]

//! Domain compilation pipeline.
//!
//! A [`Domain`] is normalized against the registry into a [`DomainNode`],
//! compiled into a [`QueryPlan`] (with row rules and the flush set) and
//! serialized by the emitter into SQL text plus positional parameters.

/// Surface and normalized domain trees.
///
/// Holds the operator vocabulary, the prefix list parser and the combinator
/// object (`&`, `|`, `!`).
pub mod ast;

/// Domain → plan compiler.
pub mod compiler;

/// Plan → SQL text.
pub mod emit;

/// Structural and access errors raised before any database round-trip.
pub mod errors;

/// Canonicalization of surface domains.
pub mod normalize;

/// ORDER BY and GROUP BY handling.
pub mod order;

/// Relational query plan.
pub mod plan;

/// Strategy selection for relational hops.
pub mod resolver;

/// Literal values bound as SQL parameters.
pub mod value;

pub use ast::{Domain, DomainItem, DomainNode, Operator};
pub use compiler::{CompiledQuery, Compiler};
pub use emit::{emit, Statement};
pub use errors::DomainError;
pub use normalize::{normalize, normalize_with, NormalizeLimits};
pub use plan::QueryPlan;
pub use value::Value;
