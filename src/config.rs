//! Engine configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{OrmError, Result};
use crate::query::normalize::NormalizeLimits;

/// Tunables of the compiler and the storage backend.
///
/// Every field has a default, so a TOML document only needs the keys it
/// overrides:
///
/// ```toml
/// max_domain_depth = 32
/// default_lang = "fr_FR"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Maximum nesting depth of a domain, relational hops included.
    pub max_domain_depth: usize,
    /// Maximum node count of a domain.
    pub max_domain_nodes: usize,
    /// Maximum number of literals in one `in` list.
    pub max_in_values: usize,
    /// Generated table aliases longer than this are shortened with a hash.
    pub max_alias_len: usize,
    /// Language used for translatable fields when the transaction sets none.
    pub default_lang: Option<String>,
    /// Makes SQLite `LIKE` case-sensitive so `like` and `ilike` differ.
    pub case_sensitive_like: bool,
    /// Enables `PRAGMA foreign_keys` on SQLite connections.
    pub foreign_keys: bool,
    /// Records per flush UPDATE and per id-list SELECT. A batched UPDATE binds
    /// three parameters per record, so this stays well under SQLite's
    /// variable limit.
    pub batch_size: usize,
}

/// Largest accepted [`EngineOptions::batch_size`].
pub const MAX_BATCH_SIZE: usize = 10_000;

impl Default for EngineOptions {
    fn default() -> Self {
        let limits = NormalizeLimits::default();
        Self {
            max_domain_depth: limits.max_depth,
            max_domain_nodes: limits.max_nodes,
            max_in_values: limits.max_in_values,
            max_alias_len: 63,
            default_lang: None,
            case_sensitive_like: true,
            foreign_keys: true,
            batch_size: 1_000,
        }
    }
}

impl EngineOptions {
    /// Parses options from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let options: EngineOptions =
            toml::from_str(text).map_err(|err| OrmError::Config(format!("invalid engine options: {err}")))?;
        options.validate()?;
        Ok(options)
    }

    /// Reads options from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Normalizer budgets derived from these options.
    pub fn limits(&self) -> NormalizeLimits {
        NormalizeLimits::from(self)
    }

    fn validate(&self) -> Result<()> {
        if self.max_alias_len < 24 {
            return Err(OrmError::Config(format!(
                "max_alias_len must be at least 24 (got {})",
                self.max_alias_len
            )));
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(OrmError::Config(format!(
                "batch_size must be between 1 and {MAX_BATCH_SIZE} (got {})",
                self.batch_size
            )));
        }
        if self.max_domain_depth == 0 || self.max_domain_nodes == 0 {
            return Err(OrmError::Config("domain budgets must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_documents_keep_defaults() {
        let options = EngineOptions::from_toml_str("default_lang = \"fr_FR\"\nmax_domain_depth = 8").expect("parse");
        assert_eq!(options.default_lang.as_deref(), Some("fr_FR"));
        assert_eq!(options.max_domain_depth, 8);
        assert_eq!(options.max_alias_len, 63);
        assert!(options.case_sensitive_like);
    }

    #[test]
    fn rejects_tiny_alias_limit() {
        let err = EngineOptions::from_toml_str("max_alias_len = 4").unwrap_err();
        assert!(matches!(err, OrmError::Config(_)));
    }

    #[test]
    fn batch_size_is_bounded() {
        assert_eq!(EngineOptions::default().batch_size, 1_000);
        for text in ["batch_size = 0", "batch_size = 20000"] {
            let err = EngineOptions::from_toml_str(text).unwrap_err();
            assert!(matches!(err, OrmError::Config(_)), "{text}");
        }
        assert_eq!(EngineOptions::from_toml_str("batch_size = 50").expect("parse").batch_size, 50);
    }

    #[test]
    fn unknown_types_are_config_errors() {
        let err = EngineOptions::from_toml_str("max_domain_depth = \"deep\"").unwrap_err();
        assert!(matches!(err, OrmError::Config(_)));
    }
}
