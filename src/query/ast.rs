//! Domain syntax trees.
//!
//! [`Domain`] is the user-facing surface: it is either parsed from the
//! prefix ("Polish") list form or built with the `&`, `|` and `!` operators.
//! [`DomainNode`] is the canonical tree produced by
//! [`normalize`](crate::query::normalize::normalize), where every leaf is bound
//! to field descriptors from the registry.

use std::fmt;
use std::ops::{BitAnd, BitOr, Not};
use std::str::FromStr;
use std::sync::Arc;

use crate::query::errors::DomainError;
use crate::query::value::Value;
use crate::schema::FieldDescriptor;
use crate::types::RecordId;

/// Comparison operators of the domain language.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operator {
    /// `=`
    Eq,
    /// `!=` (also spelled `<>`)
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `in`
    In,
    /// `not in`
    NotIn,
    /// `like`
    Like,
    /// `not like`
    NotLike,
    /// `ilike`
    ILike,
    /// `not ilike`
    NotILike,
    /// `=like`
    EqLike,
    /// `not =like`
    NotEqLike,
    /// `=ilike`
    EqILike,
    /// `not =ilike`
    NotEqILike,
    /// `any`
    Any,
    /// `not any`
    NotAny,
    /// `any!`: like `any` but bypasses row rules on the hop.
    AnyUnchecked,
    /// `not any!`
    NotAnyUnchecked,
    /// `child_of`: the record or one of its ancestors is among the values.
    ChildOf,
    /// `parent_of`: the record or one of its descendants is among the values.
    ParentOf,
    /// `=?`: TRUE when the value is unset, `=` otherwise.
    EqIfSet,
}

impl Operator {
    /// Every operator, in declaration order.
    pub const ALL: [Operator; 23] = [
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
        Operator::EqIfSet,
    ];

    /// Canonical spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::In => "in",
            Operator::NotIn => "not in",
            Operator::Like => "like",
            Operator::NotLike => "not like",
            Operator::ILike => "ilike",
            Operator::NotILike => "not ilike",
            Operator::EqLike => "=like",
            Operator::NotEqLike => "not =like",
            Operator::EqILike => "=ilike",
            Operator::NotEqILike => "not =ilike",
            Operator::Any => "any",
            Operator::NotAny => "not any",
            Operator::AnyUnchecked => "any!",
            Operator::NotAnyUnchecked => "not any!",
            Operator::ChildOf => "child_of",
            Operator::ParentOf => "parent_of",
            Operator::EqIfSet => "=?",
        }
    }

    /// Native negated form, when one exists without changing NULL semantics.
    ///
    /// The `like` family and the inequalities have none: negating them
    /// requires an explicit `Not` wrapper.
    pub fn negate(self) -> Option<Operator> {
        match self {
            Operator::Eq => Some(Operator::Ne),
            Operator::Ne => Some(Operator::Eq),
            Operator::In => Some(Operator::NotIn),
            Operator::NotIn => Some(Operator::In),
            Operator::Any => Some(Operator::NotAny),
            Operator::NotAny => Some(Operator::Any),
            Operator::AnyUnchecked => Some(Operator::NotAnyUnchecked),
            Operator::NotAnyUnchecked => Some(Operator::AnyUnchecked),
            _ => None,
        }
    }

    /// True for the `not ...` / `!=` spellings.
    pub fn is_negative(self) -> bool {
        matches!(
            self,
            Operator::Ne
                | Operator::NotIn
                | Operator::NotLike
                | Operator::NotILike
                | Operator::NotEqLike
                | Operator::NotEqILike
                | Operator::NotAny
                | Operator::NotAnyUnchecked
        )
    }

    /// Positive counterpart of a negative `like` operator.
    pub fn positive_like(self) -> Operator {
        match self {
            Operator::NotLike => Operator::Like,
            Operator::NotILike => Operator::ILike,
            Operator::NotEqLike => Operator::EqLike,
            Operator::NotEqILike => Operator::EqILike,
            other => other,
        }
    }

    /// `like`, `ilike`, `=like`, `=ilike` and their negations.
    pub fn is_like(self) -> bool {
        matches!(
            self,
            Operator::Like
                | Operator::NotLike
                | Operator::ILike
                | Operator::NotILike
                | Operator::EqLike
                | Operator::NotEqLike
                | Operator::EqILike
                | Operator::NotEqILike
        )
    }

    /// Case-insensitive members of the `like` family.
    pub fn is_case_insensitive(self) -> bool {
        matches!(
            self,
            Operator::ILike | Operator::NotILike | Operator::EqILike | Operator::NotEqILike
        )
    }

    /// `like`/`ilike` (and negations) wrap the value in `%...%`.
    pub fn wraps_wildcards(self) -> bool {
        matches!(
            self,
            Operator::Like | Operator::NotLike | Operator::ILike | Operator::NotILike
        )
    }

    /// `<`, `<=`, `>`, `>=`.
    pub fn is_inequality(self) -> bool {
        matches!(
            self,
            Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge
        )
    }

    /// The four relational quantifiers.
    pub fn is_any(self) -> bool {
        matches!(
            self,
            Operator::Any | Operator::NotAny | Operator::AnyUnchecked | Operator::NotAnyUnchecked
        )
    }

    /// `any!` / `not any!`.
    pub fn is_unchecked(self) -> bool {
        matches!(self, Operator::AnyUnchecked | Operator::NotAnyUnchecked)
    }

    /// `child_of` / `parent_of`.
    pub fn is_hierarchy(self) -> bool {
        matches!(self, Operator::ChildOf | Operator::ParentOf)
    }
}

impl FromStr for Operator {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        if lowered == "<>" {
            return Ok(Operator::Ne);
        }
        if lowered == "==" {
            return Ok(Operator::Eq);
        }
        Operator::ALL
            .into_iter()
            .find(|op| op.as_str() == lowered)
            .ok_or_else(|| DomainError::InvalidOperator { op: s.to_owned() })
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Right-hand side of a surface condition.
#[derive(Clone, Debug, PartialEq)]
pub enum LeafValue {
    /// Single literal.
    Scalar(Value),
    /// Literal list (`in`, `not in`).
    List(Vec<Value>),
    /// Nested domain (`any` family).
    Domain(Box<Domain>),
}

impl From<Value> for LeafValue {
    fn from(value: Value) -> Self {
        LeafValue::Scalar(value)
    }
}

impl From<&str> for LeafValue {
    fn from(value: &str) -> Self {
        LeafValue::Scalar(value.into())
    }
}

impl From<String> for LeafValue {
    fn from(value: String) -> Self {
        LeafValue::Scalar(value.into())
    }
}

impl From<i64> for LeafValue {
    fn from(value: i64) -> Self {
        LeafValue::Scalar(value.into())
    }
}

impl From<i32> for LeafValue {
    fn from(value: i32) -> Self {
        LeafValue::Scalar(value.into())
    }
}

impl From<f64> for LeafValue {
    fn from(value: f64) -> Self {
        LeafValue::Scalar(value.into())
    }
}

impl From<bool> for LeafValue {
    fn from(value: bool) -> Self {
        LeafValue::Scalar(value.into())
    }
}

impl From<Vec<Value>> for LeafValue {
    fn from(value: Vec<Value>) -> Self {
        LeafValue::List(value)
    }
}

impl From<Vec<RecordId>> for LeafValue {
    fn from(value: Vec<RecordId>) -> Self {
        LeafValue::List(value.into_iter().map(Value::Int).collect())
    }
}

impl From<Vec<&str>> for LeafValue {
    fn from(value: Vec<&str>) -> Self {
        LeafValue::List(value.into_iter().map(Value::from).collect())
    }
}

impl From<Domain> for LeafValue {
    fn from(value: Domain) -> Self {
        LeafValue::Domain(Box::new(value))
    }
}

/// A `path operator value` triple of the surface language.
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    /// Dotted field path relative to the model being searched.
    pub path: String,
    /// Comparison operator.
    pub operator: Operator,
    /// Right-hand side.
    pub value: LeafValue,
}

/// Surface domain as written by callers.
#[derive(Clone, Debug, PartialEq)]
pub enum Domain {
    /// Single condition.
    Condition(Condition),
    /// Conjunction. Empty means TRUE.
    And(Vec<Domain>),
    /// Disjunction. Empty means FALSE.
    Or(Vec<Domain>),
    /// Negation.
    Not(Box<Domain>),
}

impl Domain {
    /// The domain matching every record.
    pub fn all() -> Domain {
        Domain::And(Vec::new())
    }

    /// The domain matching no record.
    pub fn none() -> Domain {
        Domain::Or(Vec::new())
    }

    /// Builds a condition.
    pub fn cond(path: impl Into<String>, operator: Operator, value: impl Into<LeafValue>) -> Domain {
        Domain::Condition(Condition {
            path: path.into(),
            operator,
            value: value.into(),
        })
    }

    /// Shorthand for `path = value`.
    pub fn eq(path: impl Into<String>, value: impl Into<LeafValue>) -> Domain {
        Domain::cond(path, Operator::Eq, value)
    }

    /// Records where at least one related record through `path` matches `sub`,
    /// with the row rules of the related model applied.
    pub fn any(path: impl Into<String>, sub: Domain) -> Domain {
        Domain::cond(path, Operator::Any, sub)
    }

    /// Negation of [`Domain::any`].
    pub fn not_any(path: impl Into<String>, sub: Domain) -> Domain {
        Domain::cond(path, Operator::NotAny, sub)
    }

    /// Like [`Domain::any`] but evaluated through a join that ignores the row
    /// rules of the related model.
    pub fn any_unchecked(path: impl Into<String>, sub: Domain) -> Domain {
        Domain::cond(path, Operator::AnyUnchecked, sub)
    }

    /// Negation of [`Domain::any_unchecked`].
    pub fn not_any_unchecked(path: impl Into<String>, sub: Domain) -> Domain {
        Domain::cond(path, Operator::NotAnyUnchecked, sub)
    }

    /// True for the literal TRUE domain (`And([])`).
    pub fn is_true(&self) -> bool {
        matches!(self, Domain::And(children) if children.is_empty())
    }

    /// True for the literal FALSE domain (`Or([])`).
    pub fn is_false(&self) -> bool {
        matches!(self, Domain::Or(children) if children.is_empty())
    }

    /// Parses the prefix list form.
    ///
    /// Top-level terms without an operator are joined by an implicit AND.
    pub fn from_prefix(items: Vec<DomainItem>) -> Result<Domain, DomainError> {
        let mut iter = items.into_iter().peekable();
        let mut terms = Vec::new();
        while iter.peek().is_some() {
            terms.push(parse_prefix_term(&mut iter)?);
        }
        Ok(match terms.len() {
            1 => terms.pop().unwrap_or_else(Domain::all),
            _ => Domain::And(terms),
        })
    }

    /// Parses the JSON list form, e.g.
    /// `["|", ["name", "ilike", "jack"], ["partner_id.city", "=", "Oslo"]]`.
    pub fn from_json(json: &serde_json::Value) -> Result<Domain, DomainError> {
        let items = json
            .as_array()
            .ok_or_else(|| DomainError::malformed("a domain must be a JSON array"))?;
        let mut parsed = Vec::with_capacity(items.len());
        for item in items {
            parsed.push(DomainItem::from_json(item)?);
        }
        Domain::from_prefix(parsed)
    }

    /// Parses a domain from JSON text.
    pub fn parse(text: &str) -> Result<Domain, DomainError> {
        let json: serde_json::Value = serde_json::from_str(text)
            .map_err(|err| DomainError::malformed(format!("invalid JSON: {err}")))?;
        Domain::from_json(&json)
    }

    /// Renders the prefix list form. `any!` leaves render with their
    /// operator even though the list parser refuses them.
    pub fn to_json(&self) -> serde_json::Value {
        let mut out = Vec::new();
        self.push_prefix(&mut out);
        serde_json::Value::Array(out)
    }

    fn push_prefix(&self, out: &mut Vec<serde_json::Value>) {
        match self {
            Domain::Condition(cond) => {
                let value = match &cond.value {
                    LeafValue::Scalar(v) => v.to_json(),
                    LeafValue::List(values) => {
                        serde_json::Value::Array(values.iter().map(Value::to_json).collect())
                    }
                    LeafValue::Domain(sub) => sub.to_json(),
                };
                out.push(serde_json::json!([cond.path, cond.operator.as_str(), value]));
            }
            Domain::Not(child) => {
                out.push(serde_json::Value::from("!"));
                child.push_prefix(out);
            }
            Domain::And(children) | Domain::Or(children) => {
                let (op, empty) = match self {
                    Domain::And(_) => ("&", (1, "=", 1)),
                    _ => ("|", (0, "=", 1)),
                };
                if children.is_empty() {
                    out.push(serde_json::json!([empty.0, empty.1, empty.2]));
                    return;
                }
                for _ in 1..children.len() {
                    out.push(serde_json::Value::from(op));
                }
                for child in children {
                    child.push_prefix(out);
                }
            }
        }
    }
}

fn parse_prefix_term(
    iter: &mut std::iter::Peekable<std::vec::IntoIter<DomainItem>>,
) -> Result<Domain, DomainError> {
    let item = iter
        .next()
        .ok_or_else(|| DomainError::malformed("prefix operator is missing an operand"))?;
    match item {
        DomainItem::Leaf(cond) => Ok(Domain::Condition(cond)),
        DomainItem::True => Ok(Domain::all()),
        DomainItem::False => Ok(Domain::none()),
        DomainItem::Not => Ok(!parse_prefix_term(iter)?),
        DomainItem::And => {
            let left = parse_prefix_term(iter)?;
            let right = parse_prefix_term(iter)?;
            Ok(left & right)
        }
        DomainItem::Or => {
            let left = parse_prefix_term(iter)?;
            let right = parse_prefix_term(iter)?;
            Ok(left | right)
        }
    }
}

/// One element of the prefix list form.
#[derive(Clone, Debug, PartialEq)]
pub enum DomainItem {
    /// `&`: binary AND of the next two terms.
    And,
    /// `|`: binary OR of the next two terms.
    Or,
    /// `!`: negation of the next term.
    Not,
    /// The constant leaf `(1, '=', 1)`.
    True,
    /// The constant leaf `(0, '=', 1)`.
    False,
    /// A `(path, operator, value)` triple.
    Leaf(Condition),
}

impl DomainItem {
    /// Builds a leaf item from its three components. `any!` is refused here:
    /// unchecked hops are only reachable through [`Domain::any_unchecked`].
    pub fn leaf(path: &str, operator: &str, value: impl Into<LeafValue>) -> Result<Self, DomainError> {
        let operator: Operator = operator
            .parse()
            .map_err(|_| DomainError::malformed(format!("invalid operator '{operator}' in leaf on '{path}'")))?;
        if operator.is_unchecked() {
            return Err(DomainError::malformed(format!(
                "operator '{operator}' is not accepted in list domains"
            )));
        }
        if path.is_empty() || path.split('.').any(str::is_empty) {
            return Err(DomainError::malformed(format!("invalid field path '{path}'")));
        }
        Ok(DomainItem::Leaf(Condition {
            path: path.to_owned(),
            operator,
            value: value.into(),
        }))
    }

    fn from_json(json: &serde_json::Value) -> Result<Self, DomainError> {
        match json {
            serde_json::Value::String(op) => match op.as_str() {
                "&" => Ok(DomainItem::And),
                "|" => Ok(DomainItem::Or),
                "!" => Ok(DomainItem::Not),
                other => Err(DomainError::malformed(format!(
                    "unknown prefix operator '{other}'"
                ))),
            },
            serde_json::Value::Array(parts) => {
                let [path, operator, value] = parts.as_slice() else {
                    return Err(DomainError::malformed(format!(
                        "a leaf must have 3 elements, got {}",
                        parts.len()
                    )));
                };
                if let (Some(l), Some("="), Some(r)) = (path.as_i64(), operator.as_str(), value.as_i64()) {
                    if r == 1 && (l == 0 || l == 1) {
                        return Ok(if l == 1 { DomainItem::True } else { DomainItem::False });
                    }
                }
                let path = path
                    .as_str()
                    .ok_or_else(|| DomainError::malformed("leaf path must be a string"))?;
                let operator_text = operator
                    .as_str()
                    .ok_or_else(|| DomainError::malformed("leaf operator must be a string"))?;
                let parsed: Operator = operator_text.parse().map_err(|_| {
                    DomainError::malformed(format!("invalid operator '{operator_text}' in leaf on '{path}'"))
                })?;
                let value = if parsed.is_any() {
                    match value {
                        serde_json::Value::Array(_) => LeafValue::Domain(Box::new(Domain::from_json(value)?)),
                        _ => {
                            return Err(DomainError::malformed(format!(
                                "operator '{parsed}' expects a nested domain"
                            )))
                        }
                    }
                } else {
                    json_leaf_value(value)?
                };
                DomainItem::leaf(path, operator_text, value)
            }
            other => Err(DomainError::malformed(format!(
                "unexpected domain element {other}"
            ))),
        }
    }
}

fn json_leaf_value(json: &serde_json::Value) -> Result<LeafValue, DomainError> {
    match json {
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| {
                Value::from_json(item)
                    .ok_or_else(|| DomainError::malformed(format!("list element {item} is not a scalar")))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(LeafValue::List),
        other => Value::from_json(other)
            .map(LeafValue::Scalar)
            .ok_or_else(|| DomainError::malformed(format!("value {other} is not a scalar"))),
    }
}

impl BitAnd for Domain {
    type Output = Domain;

    fn bitand(self, rhs: Domain) -> Domain {
        let mut children = Vec::new();
        for side in [self, rhs] {
            match side {
                Domain::And(inner) => children.extend(inner),
                other => children.push(other),
            }
        }
        Domain::And(children)
    }
}

impl BitOr for Domain {
    type Output = Domain;

    fn bitor(self, rhs: Domain) -> Domain {
        let mut children = Vec::new();
        for side in [self, rhs] {
            match side {
                Domain::Or(inner) => children.extend(inner),
                other => children.push(other),
            }
        }
        Domain::Or(children)
    }
}

impl Not for Domain {
    type Output = Domain;

    fn not(self) -> Domain {
        Domain::Not(Box::new(self))
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// Right-hand side of a normalized leaf.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    /// Single literal (`like` family, inequalities).
    Value(Value),
    /// Literal list (`in`, `not in`).
    List(Vec<Value>),
}

impl Operand {
    /// Values of an `in` list, or the single value as a one-element slice.
    pub fn values(&self) -> &[Value] {
        match self {
            Operand::Value(v) => std::slice::from_ref(v),
            Operand::List(values) => values,
        }
    }
}

/// Normalized leaf condition.
#[derive(Clone, Debug, PartialEq)]
pub struct Leaf {
    /// Fields traversed from the searched model; the last one is compared.
    pub path: Vec<Arc<FieldDescriptor>>,
    /// Key inside a property-bag field (`props.color` → `color`).
    pub property: Option<String>,
    /// Never `=`/`!=` nor an `any` operator after normalization.
    pub operator: Operator,
    /// Compared literal(s).
    pub operand: Operand,
}

impl Leaf {
    /// The compared field; `None` only for a hand-built leaf with an empty path.
    pub fn field(&self) -> Option<&Arc<FieldDescriptor>> {
        self.path.last()
    }

    /// Dotted rendering of the path, including the property key.
    pub fn dotted_path(&self) -> String {
        let mut out = self
            .path
            .iter()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join(".");
        if let Some(prop) = &self.property {
            out.push('.');
            out.push_str(prop);
        }
        out
    }
}

/// Normalized relational quantifier.
#[derive(Clone, Debug, PartialEq)]
pub struct AnyNode {
    /// Relational field the quantifier traverses.
    pub path_head: Arc<FieldDescriptor>,
    /// Condition over the target model of `path_head`.
    pub subdomain: Box<DomainNode>,
    /// `any!`: join-based, no row rules on the hop.
    pub strict: bool,
    /// `not any`.
    pub negated: bool,
}

/// Canonical domain tree.
#[derive(Clone, Debug, PartialEq)]
pub enum DomainNode {
    /// Leaf comparison.
    Leaf(Leaf),
    /// Flattened conjunction; empty is TRUE.
    And(Vec<DomainNode>),
    /// Flattened disjunction; empty is FALSE.
    Or(Vec<DomainNode>),
    /// Only ever wraps a leaf whose operator has no native negation.
    Not(Box<DomainNode>),
    /// Relational quantifier.
    Any(AnyNode),
}

impl DomainNode {
    /// TRUE.
    pub fn truthy() -> DomainNode {
        DomainNode::And(Vec::new())
    }

    /// FALSE.
    pub fn falsy() -> DomainNode {
        DomainNode::Or(Vec::new())
    }

    /// True for `And([])`.
    pub fn is_true(&self) -> bool {
        matches!(self, DomainNode::And(children) if children.is_empty())
    }

    /// True for `Or([])`.
    pub fn is_false(&self) -> bool {
        matches!(self, DomainNode::Or(children) if children.is_empty())
    }

    /// Number of nodes in the tree.
    pub fn node_count(&self) -> usize {
        match self {
            DomainNode::Leaf(_) => 1,
            DomainNode::And(children) | DomainNode::Or(children) => {
                1 + children.iter().map(DomainNode::node_count).sum::<usize>()
            }
            DomainNode::Not(child) => 1 + child.node_count(),
            DomainNode::Any(any) => 1 + any.subdomain.node_count(),
        }
    }

    /// Converts back to the surface form. Normalizing the result yields an
    /// equal tree.
    pub fn to_domain(&self) -> Domain {
        match self {
            DomainNode::Leaf(leaf) => Domain::Condition(Condition {
                path: leaf.dotted_path(),
                operator: leaf.operator,
                value: match &leaf.operand {
                    Operand::Value(v) => LeafValue::Scalar(v.clone()),
                    Operand::List(values) => LeafValue::List(values.clone()),
                },
            }),
            DomainNode::And(children) => Domain::And(children.iter().map(DomainNode::to_domain).collect()),
            DomainNode::Or(children) => Domain::Or(children.iter().map(DomainNode::to_domain).collect()),
            DomainNode::Not(child) => !child.to_domain(),
            DomainNode::Any(any) => {
                let operator = match (any.strict, any.negated) {
                    (false, false) => Operator::Any,
                    (false, true) => Operator::NotAny,
                    (true, false) => Operator::AnyUnchecked,
                    (true, true) => Operator::NotAnyUnchecked,
                };
                Domain::cond(any.path_head.name.clone(), operator, any.subdomain.to_domain())
            }
        }
    }
}

impl fmt::Display for DomainNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_domain())
    }
}
