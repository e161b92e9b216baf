//! Static field metadata.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::query::ast::{Domain, Operand, Operator};
use crate::query::errors::DomainError;
use crate::types::FieldKey;

/// Structural kind of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Plain column.
    Scalar,
    /// Foreign key to one record of the target model.
    Many2one,
    /// Reverse side of a many2one on the target model.
    One2many,
    /// Link table between two models.
    Many2many,
    /// JSON object holding free-form keys, searched as `field.key`.
    Property,
}

/// Semantic value type of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// Short single-line string.
    Char,
    /// Unbounded string.
    Text,
    /// Markup stored as text; searched like `Text`.
    Html,
    /// 64-bit integer.
    Integer,
    /// Double precision number.
    Float,
    /// Amount; stored as a float.
    Monetary,
    /// NULL reads as false.
    Boolean,
    /// Calendar date as ISO-8601 text, so text order is date order.
    Date,
    /// Timestamp as ISO-8601 text.
    Datetime,
    /// One key out of a fixed list.
    Selection,
    /// Opaque blob; only set/unset checks are searchable.
    Binary,
    /// JSON document stored as text.
    Json,
    /// Primary keys and relational columns.
    Id,
}

impl ValueType {
    /// SQLite column affinity used when creating tables.
    pub fn sql_type(self) -> &'static str {
        match self {
            ValueType::Char
            | ValueType::Text
            | ValueType::Html
            | ValueType::Selection
            | ValueType::Date
            | ValueType::Datetime
            | ValueType::Json => "TEXT",
            ValueType::Integer | ValueType::Id => "INTEGER",
            ValueType::Boolean => "BOOLEAN",
            ValueType::Float | ValueType::Monetary => "REAL",
            ValueType::Binary => "BLOB",
        }
    }

    fn is_textual(self) -> bool {
        matches!(
            self,
            ValueType::Char | ValueType::Text | ValueType::Html | ValueType::Selection
        )
    }
}

/// Many2many link table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkTable {
    /// Link table name.
    pub table: String,
    /// Column referencing the owner model.
    pub column1: String,
    /// Column referencing the target model.
    pub column2: String,
}

/// Custom search method for a non-stored field: rewrites a condition on the
/// field into a domain over its model.
pub trait SearchMethod: Send + Sync {
    /// Returns the replacement domain for `field operator operand`.
    fn search(&self, operator: Operator, operand: &Operand) -> Result<Domain, DomainError>;
}

impl<F> SearchMethod for F
where
    F: Fn(Operator, &Operand) -> Result<Domain, DomainError> + Send + Sync,
{
    fn search(&self, operator: Operator, operand: &Operand) -> Result<Domain, DomainError> {
        self(operator, operand)
    }
}

const SCALAR_OPERATORS: &[Operator] = &[
    Operator::Eq,
    Operator::Ne,
    Operator::Lt,
    Operator::Le,
    Operator::Gt,
    Operator::Ge,
    Operator::In,
    Operator::NotIn,
    Operator::Like,
    Operator::NotLike,
    Operator::ILike,
    Operator::NotILike,
    Operator::EqLike,
    Operator::NotEqLike,
    Operator::EqILike,
    Operator::NotEqILike,
];

const EQUALITY_OPERATORS: &[Operator] = &[Operator::Eq, Operator::Ne, Operator::In, Operator::NotIn];

const MANY2ONE_OPERATORS: &[Operator] = &[
    Operator::Eq,
    Operator::Ne,
    Operator::Lt,
    Operator::Le,
    Operator::Gt,
    Operator::Ge,
    Operator::In,
    Operator::NotIn,
    Operator::Like,
    Operator::NotLike,
    Operator::ILike,
    Operator::NotILike,
    Operator::EqLike,
    Operator::NotEqLike,
    Operator::EqILike,
    Operator::NotEqILike,
    Operator::Any,
    Operator::NotAny,
    Operator::AnyUnchecked,
    Operator::NotAnyUnchecked,
    Operator::ChildOf,
    Operator::ParentOf,
];

const X2MANY_OPERATORS: &[Operator] = &[
    Operator::Eq,
    Operator::Ne,
    Operator::In,
    Operator::NotIn,
    Operator::Like,
    Operator::NotLike,
    Operator::ILike,
    Operator::NotILike,
    Operator::EqLike,
    Operator::NotEqLike,
    Operator::EqILike,
    Operator::NotEqILike,
    Operator::Any,
    Operator::NotAny,
    Operator::AnyUnchecked,
    Operator::NotAnyUnchecked,
    Operator::ChildOf,
    Operator::ParentOf,
];

/// Immutable metadata of one model field, shared through `Arc`.
#[derive(Clone)]
pub struct FieldDescriptor {
    /// Field name.
    pub name: String,
    /// Model declaring the field. Filled in by the registry builder.
    pub owner_model: String,
    /// Structural kind.
    pub kind: FieldKind,
    /// Semantic type.
    pub value_type: ValueType,
    /// Target model of relational fields.
    pub target_model: Option<String>,
    /// Column name; defaults to the field name.
    pub column: String,
    /// Backed by a column (or a link table for many2many).
    pub stored: bool,
    /// Hops through this field ignore the target's row rules.
    pub bypass_access: bool,
    /// Column holds a JSON object keyed by language code.
    pub translatable: bool,
    /// NOT NULL column.
    pub required: bool,
    /// Groups allowed to read the field; empty means everyone.
    pub groups: Vec<String>,
    /// Dotted path this field mirrors (`partner_id.city`).
    pub related: Option<String>,
    /// Many2one on the target model backing a one2many.
    pub inverse_name: Option<String>,
    /// Link table of a many2many; defaulted by the registry builder.
    pub link: Option<LinkTable>,
    /// Search method of a non-stored field.
    pub search: Option<Arc<dyn SearchMethod>>,
}

impl FieldDescriptor {
    /// Stored scalar field.
    pub fn scalar(name: impl Into<String>, value_type: ValueType) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            owner_model: String::new(),
            kind: FieldKind::Scalar,
            value_type,
            target_model: None,
            stored: true,
            bypass_access: false,
            translatable: false,
            required: false,
            groups: Vec::new(),
            related: None,
            inverse_name: None,
            link: None,
            search: None,
        }
    }

    /// Stored `char` field.
    pub fn char(name: impl Into<String>) -> Self {
        Self::scalar(name, ValueType::Char)
    }

    /// Foreign key to `target`.
    pub fn many2one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: FieldKind::Many2one,
            target_model: Some(target.into()),
            ..Self::scalar(name, ValueType::Id)
        }
    }

    /// Reverse of the many2one `inverse` on `target`.
    pub fn one2many(name: impl Into<String>, target: impl Into<String>, inverse: impl Into<String>) -> Self {
        Self {
            kind: FieldKind::One2many,
            target_model: Some(target.into()),
            inverse_name: Some(inverse.into()),
            stored: false,
            ..Self::scalar(name, ValueType::Id)
        }
    }

    /// Many2many to `target` through a link table.
    pub fn many2many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: FieldKind::Many2many,
            target_model: Some(target.into()),
            ..Self::scalar(name, ValueType::Id)
        }
    }

    /// JSON property bag.
    pub fn property(name: impl Into<String>) -> Self {
        Self {
            kind: FieldKind::Property,
            ..Self::scalar(name, ValueType::Json)
        }
    }

    /// Overrides the column name.
    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    /// Sets an explicit link table.
    pub fn with_link(mut self, table: impl Into<String>, column1: impl Into<String>, column2: impl Into<String>) -> Self {
        self.link = Some(LinkTable {
            table: table.into(),
            column1: column1.into(),
            column2: column2.into(),
        });
        self
    }

    /// Hops through this field ignore the target's row rules.
    pub fn bypass_access(mut self) -> Self {
        self.bypass_access = true;
        self
    }

    /// Marks the field translatable.
    pub fn translatable(mut self) -> Self {
        self.translatable = true;
        self
    }

    /// Marks the column NOT NULL.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Restricts read access to members of `groups`.
    pub fn groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    /// Non-stored field mirroring the dotted `path`.
    pub fn related(mut self, path: impl Into<String>) -> Self {
        self.related = Some(path.into());
        self.stored = false;
        self
    }

    /// Non-stored field searched through `method`.
    pub fn computed_with_search(mut self, method: impl SearchMethod + 'static) -> Self {
        self.stored = false;
        self.search = Some(Arc::new(method));
        self
    }

    /// Non-stored field without a search method.
    pub fn computed(mut self) -> Self {
        self.stored = false;
        self
    }

    /// Target model name; empty for non-relational fields.
    pub fn target(&self) -> &str {
        self.target_model.as_deref().unwrap_or("")
    }

    /// many2one, one2many or many2many.
    pub fn is_relational(&self) -> bool {
        matches!(
            self.kind,
            FieldKind::Many2one | FieldKind::One2many | FieldKind::Many2many
        )
    }

    /// one2many or many2many.
    pub fn is_x2many(&self) -> bool {
        matches!(self.kind, FieldKind::One2many | FieldKind::Many2many)
    }

    /// Whether conditions on this field can be compiled at all.
    pub fn is_searchable(&self) -> bool {
        self.stored || self.related.is_some() || self.search.is_some() || self.kind == FieldKind::One2many
    }

    /// Whether the column may hold NULL.
    pub fn can_be_null(&self) -> bool {
        !self.required
    }

    /// Operators accepted on the field.
    pub fn default_operators(&self) -> &'static [Operator] {
        match self.kind {
            FieldKind::Many2one => MANY2ONE_OPERATORS,
            FieldKind::One2many | FieldKind::Many2many => X2MANY_OPERATORS,
            FieldKind::Property => SCALAR_OPERATORS,
            FieldKind::Scalar => match self.value_type {
                ValueType::Boolean | ValueType::Binary => EQUALITY_OPERATORS,
                _ => SCALAR_OPERATORS,
            },
        }
    }

    /// True when `like` comparisons make sense on the column.
    pub fn is_textual(&self) -> bool {
        self.kind == FieldKind::Scalar && self.value_type.is_textual()
    }

    /// `(owner_model, name)`.
    pub fn key(&self) -> FieldKey {
        FieldKey::new(self.owner_model.clone(), self.name.clone())
    }
}

impl PartialEq for FieldDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.owner_model == other.owner_model && self.name == other.name
    }
}

impl Eq for FieldDescriptor {}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("owner_model", &self.owner_model)
            .field("kind", &self.kind)
            .field("value_type", &self.value_type)
            .field("target_model", &self.target_model)
            .field("stored", &self.stored)
            .field("bypass_access", &self.bypass_access)
            .field("translatable", &self.translatable)
            .field("search", &self.search.is_some())
            .finish_non_exhaustive()
    }
}
