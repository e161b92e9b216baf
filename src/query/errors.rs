#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

/// Structured errors raised while parsing, normalizing or compiling a domain.
///
/// All of them are detected before any database round-trip.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Prefix arity mismatch, bad leaf shape or an unusable value.
    #[error("malformed domain: {reason}")]
    Malformed { reason: String },
    /// The operator string is not part of the domain language.
    #[error("invalid operator '{op}'")]
    InvalidOperator { op: String },
    /// The operator exists but the field does not accept it.
    #[error("operator '{op}' is not supported on {model}.{field}")]
    OperatorNotSupported {
        model: String,
        field: String,
        op: &'static str,
    },
    #[error("unknown model '{model}'")]
    UnknownModel { model: String },
    #[error("unknown field '{field}' on model '{model}'")]
    UnknownField { model: String, field: String },
    /// Non-stored field without a related path or a search method.
    #[error("field {model}.{field} is not searchable")]
    NotSearchable { model: String, field: String },
    /// The principal is not a member of the field's groups.
    #[error("access to field {model}.{field} denied")]
    AccessDenied { model: String, field: String },
    #[error("domain exceeds depth {max} (got {depth})")]
    TooDeep { depth: usize, max: usize },
    #[error("domain exceeds {max} nodes (got {nodes})")]
    TooLarge { nodes: usize, max: usize },
    #[error("in() list exceeds maximum of {max} literals")]
    InListTooLarge { max: usize },
    #[error("invalid order specification '{spec}'")]
    InvalidOrder { spec: String },
    #[error("invalid property name '{name}'")]
    InvalidPropertyName { name: String },
    #[error("invalid aggregate '{spec}'")]
    InvalidAggregate { spec: String },
}

impl DomainError {
    /// Builds a [`DomainError::Malformed`] from any message.
    pub fn malformed(reason: impl Into<String>) -> Self {
        DomainError::Malformed {
            reason: reason.into(),
        }
    }

    pub(crate) fn unknown_field(model: &str, field: &str) -> Self {
        DomainError::UnknownField {
            model: model.to_owned(),
            field: field.to_owned(),
        }
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Malformed { .. } => "MalformedDomain",
            DomainError::InvalidOperator { .. } => "MalformedDomain",
            DomainError::OperatorNotSupported { .. } => "MalformedDomain",
            DomainError::UnknownModel { .. } => "UnknownModel",
            DomainError::UnknownField { .. } => "UnknownField",
            DomainError::NotSearchable { .. } => "NotSearchable",
            DomainError::AccessDenied { .. } => "AccessDenied",
            DomainError::TooDeep { .. } => "DomainTooDeep",
            DomainError::TooLarge { .. } => "DomainTooLarge",
            DomainError::InListTooLarge { .. } => "InListTooLarge",
            DomainError::InvalidOrder { .. } => "InvalidOrder",
            DomainError::InvalidPropertyName { .. } => "MalformedDomain",
            DomainError::InvalidAggregate { .. } => "InvalidAggregate",
        }
    }
}

/// Convenience wrapper that formats domain errors with their codes.
pub struct DomainErrorWithCode<'a>(pub &'a DomainError);

impl fmt::Display for DomainErrorWithCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.code(), self.0)
    }
}
