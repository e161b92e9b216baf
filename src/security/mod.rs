//! Row-level rules and field-level access.
//!
//! For a given model the effective rule domain is
//! `AND(global rules) AND OR(group rules of the principal's groups)`.
//! A model without applicable rules is unrestricted; superusers bypass both
//! row rules and field groups.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::error::{OrmError, Result};
use crate::query::ast::{Condition, Domain, LeafValue};
use crate::query::errors::DomainError;
use crate::query::value::Value;
use crate::schema::FieldDescriptor;
use crate::types::RecordId;

/// String literal replaced by the principal's id inside rule domains.
pub const UID_PLACEHOLDER: &str = "$uid";

/// The user a transaction acts for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    /// User id.
    pub uid: RecordId,
    /// Group identifiers (`base.group_user`).
    pub groups: BTreeSet<String>,
    /// Bypasses row rules and field groups.
    pub superuser: bool,
}

impl Principal {
    /// Regular user without groups.
    pub fn user(uid: RecordId) -> Self {
        Self {
            uid,
            groups: BTreeSet::new(),
            superuser: false,
        }
    }

    /// Superuser.
    pub fn superuser() -> Self {
        Self {
            uid: 1,
            groups: BTreeSet::new(),
            superuser: true,
        }
    }

    /// Adds groups.
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }

    /// Membership test.
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }
}

/// One record rule.
#[derive(Clone, Debug, PartialEq)]
pub struct RowRule {
    /// Display name.
    pub name: String,
    /// Restricted model.
    pub model: String,
    /// Records visible under the rule.
    pub domain: Domain,
    /// Groups the rule applies to; empty makes the rule global.
    pub groups: Vec<String>,
}

impl RowRule {
    /// Global rule.
    pub fn global(name: impl Into<String>, model: impl Into<String>, domain: Domain) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            domain,
            groups: Vec::new(),
        }
    }

    /// Rule restricted to members of `groups`.
    pub fn for_groups<I, S>(name: impl Into<String>, model: impl Into<String>, domain: Domain, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            model: model.into(),
            domain,
            groups: groups.into_iter().map(Into::into).collect(),
        }
    }

    fn is_global(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Rules indexed by model, in declaration order.
#[derive(Clone, Debug, Default)]
pub struct RuleSet {
    by_model: FxHashMap<String, Vec<RowRule>>,
}

impl RuleSet {
    /// Empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule.
    pub fn with_rule(mut self, rule: RowRule) -> Self {
        self.add(rule);
        self
    }

    /// Adds a rule.
    pub fn add(&mut self, rule: RowRule) {
        self.by_model.entry(rule.model.clone()).or_default().push(rule);
    }

    /// Rules declared for `model`.
    pub fn rules_for(&self, model: &str) -> &[RowRule] {
        self.by_model.get(model).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Parses rules from TOML:
    ///
    /// ```toml
    /// [[rules]]
    /// name = "own orders"
    /// model = "sale.order"
    /// domain = '[["user_id", "=", "$uid"]]'
    /// groups = ["sales.user"]
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let doc: RulesDoc =
            toml::from_str(text).map_err(|err| OrmError::Config(format!("invalid rules document: {err}")))?;
        let mut set = RuleSet::new();
        for spec in doc.rules {
            let domain = Domain::parse(&spec.domain)?;
            set.add(RowRule {
                name: spec.name,
                model: spec.model,
                domain,
                groups: spec.groups,
            });
        }
        Ok(set)
    }

    /// Reads a TOML rules file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

#[derive(Debug, Deserialize)]
struct RulesDoc {
    #[serde(default)]
    rules: Vec<RuleSpec>,
}

#[derive(Debug, Deserialize)]
struct RuleSpec {
    name: String,
    model: String,
    domain: String,
    #[serde(default)]
    groups: Vec<String>,
}

/// Principal plus the rules that constrain it.
#[derive(Clone, Debug)]
pub struct AccessContext {
    principal: Principal,
    rules: Arc<RuleSet>,
}

impl AccessContext {
    /// Binds a principal to a rule set.
    pub fn new(principal: Principal, rules: Arc<RuleSet>) -> Self {
        Self { principal, rules }
    }

    /// Superuser context without rules.
    pub fn superuser() -> Self {
        Self::new(Principal::superuser(), Arc::new(RuleSet::new()))
    }

    /// The acting principal.
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Whether rules and field groups are skipped.
    pub fn is_superuser(&self) -> bool {
        self.principal.superuser
    }

    /// Combined rule domain for `model`, or `None` when the principal is not
    /// restricted on it.
    pub fn rule_domain(&self, model: &str) -> Option<Domain> {
        if self.principal.superuser {
            return None;
        }
        let rules = self.rules.rules_for(model);
        let globals: Vec<Domain> = rules
            .iter()
            .filter(|rule| rule.is_global())
            .map(|rule| self.bind(&rule.domain))
            .collect();
        let grouped: Vec<Domain> = rules
            .iter()
            .filter(|rule| !rule.is_global() && rule.groups.iter().any(|g| self.principal.in_group(g)))
            .map(|rule| self.bind(&rule.domain))
            .collect();
        if globals.is_empty() && grouped.is_empty() {
            return None;
        }
        let mut parts = globals;
        if !grouped.is_empty() {
            parts.push(Domain::Or(grouped));
        }
        Some(Domain::And(parts))
    }

    /// Fails with `AccessDenied` when the field's groups exclude the principal.
    pub fn check_field(&self, field: &FieldDescriptor) -> std::result::Result<(), DomainError> {
        if self.principal.superuser
            || field.groups.is_empty()
            || field.groups.iter().any(|g| self.principal.in_group(g))
        {
            return Ok(());
        }
        Err(DomainError::AccessDenied {
            model: field.owner_model.clone(),
            field: field.name.clone(),
        })
    }

    fn bind(&self, domain: &Domain) -> Domain {
        substitute_uid(domain, self.principal.uid)
    }
}

fn substitute_uid(domain: &Domain, uid: RecordId) -> Domain {
    let swap = |v: &Value| match v {
        Value::String(s) if s == UID_PLACEHOLDER => Value::Int(uid),
        other => other.clone(),
    };
    match domain {
        Domain::Condition(cond) => Domain::Condition(Condition {
            path: cond.path.clone(),
            operator: cond.operator,
            value: match &cond.value {
                LeafValue::Scalar(v) => LeafValue::Scalar(swap(v)),
                LeafValue::List(values) => LeafValue::List(values.iter().map(swap).collect()),
                LeafValue::Domain(sub) => LeafValue::Domain(Box::new(substitute_uid(sub, uid))),
            },
        }),
        Domain::And(children) => Domain::And(children.iter().map(|c| substitute_uid(c, uid)).collect()),
        Domain::Or(children) => Domain::Or(children.iter().map(|c| substitute_uid(c, uid)).collect()),
        Domain::Not(child) => Domain::Not(Box::new(substitute_uid(child, uid))),
    }
}
