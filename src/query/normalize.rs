//! Canonicalization of surface domains.
//!
//! The normalizer binds every path to field descriptors, pushes negations
//! down to the leaves (De Morgan), flattens nested `And`/`Or`, folds the
//! TRUE/FALSE constants and rewrites the relational shorthands into explicit
//! `Any` nodes. Sibling order is preserved: two leaves on the same field are
//! kept as independent terms.

use std::sync::Arc;

use crate::config::EngineOptions;
use crate::query::ast::{AnyNode, Condition, Domain, DomainNode, Leaf, LeafValue, Operand, Operator};
use crate::query::errors::DomainError;
use crate::query::value::Value;
use crate::schema::{FieldDescriptor, FieldKind, Registry, ValueType};

type NormalizeResult<T> = Result<T, DomainError>;

/// Budgets protecting the compiler from degenerate trees.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NormalizeLimits {
    /// Maximum nesting depth of the surface tree, relational hops included.
    pub max_depth: usize,
    /// Maximum node count of the surface tree.
    pub max_nodes: usize,
    /// Maximum number of literals in one `in` list.
    pub max_in_values: usize,
}

impl Default for NormalizeLimits {
    fn default() -> Self {
        Self {
            max_depth: 64,
            max_nodes: 10_000,
            max_in_values: 10_000,
        }
    }
}

impl From<&EngineOptions> for NormalizeLimits {
    fn from(options: &EngineOptions) -> Self {
        Self {
            max_depth: options.max_domain_depth,
            max_nodes: options.max_domain_nodes,
            max_in_values: options.max_in_values,
        }
    }
}

/// Normalizes `domain` against `model` with the default limits.
pub fn normalize(registry: &Registry, model: &str, domain: &Domain) -> NormalizeResult<DomainNode> {
    normalize_with(registry, model, domain, &NormalizeLimits::default())
}

/// Normalizes `domain` against `model`.
pub fn normalize_with(
    registry: &Registry,
    model: &str,
    domain: &Domain,
    limits: &NormalizeLimits,
) -> NormalizeResult<DomainNode> {
    registry.model(model)?;
    let stats = domain_stats(domain);
    if stats.nodes > limits.max_nodes {
        return Err(DomainError::TooLarge {
            nodes: stats.nodes,
            max: limits.max_nodes,
        });
    }
    if stats.depth > limits.max_depth {
        return Err(DomainError::TooDeep {
            depth: stats.depth,
            max: limits.max_depth,
        });
    }
    let normalizer = Normalizer { registry, limits };
    Ok(normalizer.simplify(model, domain, false, 0)?.into_node())
}

/// Negates a normalized tree, keeping it normalized.
pub fn negate(node: DomainNode) -> DomainNode {
    match node {
        DomainNode::Leaf(mut leaf) => {
            if leaf.path.len() > 1 {
                let head = leaf.path.remove(0);
                return make_any(head, DomainNode::Leaf(leaf), false, true);
            }
            if leaf.field().map_or(true, |f| f.search.is_some()) {
                return DomainNode::Not(Box::new(DomainNode::Leaf(leaf)));
            }
            match leaf.operator.negate() {
                Some(op) => {
                    leaf.operator = op;
                    DomainNode::Leaf(leaf)
                }
                None => DomainNode::Not(Box::new(DomainNode::Leaf(leaf))),
            }
        }
        DomainNode::Not(inner) => *inner,
        DomainNode::And(children) => combine(false, children.into_iter().map(negate).collect()),
        DomainNode::Or(children) => combine(true, children.into_iter().map(negate).collect()),
        DomainNode::Any(any) => DomainNode::Any(AnyNode {
            negated: !any.negated,
            ..any
        }),
    }
}

enum Simplified {
    True,
    False,
    Node(DomainNode),
}

impl Simplified {
    fn from_node(node: DomainNode) -> Self {
        if node.is_true() {
            Simplified::True
        } else if node.is_false() {
            Simplified::False
        } else {
            Simplified::Node(node)
        }
    }

    fn into_node(self) -> DomainNode {
        match self {
            Simplified::True => DomainNode::truthy(),
            Simplified::False => DomainNode::falsy(),
            Simplified::Node(node) => node,
        }
    }
}

fn combine(conjunction: bool, children: Vec<DomainNode>) -> DomainNode {
    let mut flattened = Vec::with_capacity(children.len());
    for child in children {
        match Simplified::from_node(child) {
            Simplified::True if conjunction => {}
            Simplified::False if !conjunction => {}
            Simplified::True => return DomainNode::truthy(),
            Simplified::False => return DomainNode::falsy(),
            Simplified::Node(DomainNode::And(grand)) if conjunction => flattened.extend(grand),
            Simplified::Node(DomainNode::Or(grand)) if !conjunction => flattened.extend(grand),
            Simplified::Node(node) => flattened.push(node),
        }
    }
    if flattened.len() == 1 {
        if let Some(only) = flattened.pop() {
            return only;
        }
    }
    if conjunction {
        DomainNode::And(flattened)
    } else {
        DomainNode::Or(flattened)
    }
}

fn make_any(head: Arc<FieldDescriptor>, subdomain: DomainNode, strict: bool, negated: bool) -> DomainNode {
    if subdomain.is_false() {
        return if negated { DomainNode::truthy() } else { DomainNode::falsy() };
    }
    DomainNode::Any(AnyNode {
        path_head: head,
        subdomain: Box::new(subdomain),
        strict,
        negated,
    })
}

fn leaf(field: &Arc<FieldDescriptor>, operator: Operator, operand: Operand) -> DomainNode {
    DomainNode::Leaf(Leaf {
        path: vec![field.clone()],
        property: None,
        operator,
        operand,
    })
}

struct Normalizer<'a> {
    registry: &'a Registry,
    limits: &'a NormalizeLimits,
}

impl Normalizer<'_> {
    fn simplify(&self, model: &str, domain: &Domain, negated: bool, depth: usize) -> NormalizeResult<Simplified> {
        self.check_depth(depth)?;
        match domain {
            Domain::Not(child) => self.simplify(model, child, !negated, depth + 1),
            Domain::And(children) | Domain::Or(children) => {
                // De Morgan: a negated AND is an OR of negated children.
                let conjunction = matches!(domain, Domain::And(_)) != negated;
                let mut nodes = Vec::with_capacity(children.len());
                for child in children {
                    nodes.push(self.simplify(model, child, negated, depth + 1)?.into_node());
                }
                Ok(Simplified::from_node(combine(conjunction, nodes)))
            }
            Domain::Condition(cond) => {
                let node = self.condition(model, cond, depth)?;
                Ok(Simplified::from_node(if negated { negate(node) } else { node }))
            }
        }
    }

    fn check_depth(&self, depth: usize) -> NormalizeResult<()> {
        if depth > self.limits.max_depth {
            return Err(DomainError::TooDeep {
                depth,
                max: self.limits.max_depth,
            });
        }
        Ok(())
    }

    fn condition(&self, model: &str, cond: &Condition, depth: usize) -> NormalizeResult<DomainNode> {
        let segments: Vec<&str> = cond.path.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(DomainError::malformed(format!("invalid field path '{}'", cond.path)));
        }
        if cond.operator == Operator::EqIfSet {
            if is_unset(&cond.value) {
                // Still resolved so typos are reported.
                self.resolve_path(model, &segments, Operator::Eq, &LeafValue::Scalar(Value::Null), depth)?;
                return Ok(DomainNode::truthy());
            }
            return self.resolve_path(model, &segments, Operator::Eq, &cond.value, depth);
        }
        self.resolve_path(model, &segments, cond.operator, &cond.value, depth)
    }

    fn resolve_path(
        &self,
        model: &str,
        segments: &[&str],
        operator: Operator,
        value: &LeafValue,
        depth: usize,
    ) -> NormalizeResult<DomainNode> {
        self.check_depth(depth)?;
        let field = self.registry.field(model, segments[0])?;
        let rest = &segments[1..];

        if let (Some(related), false) = (&field.related, field.stored) {
            let mut spliced: Vec<&str> = related.split('.').collect();
            spliced.extend_from_slice(rest);
            return self.resolve_path(model, &spliced, operator, value, depth + 1);
        }

        if rest.is_empty() {
            return self.field_condition(field, operator, value, depth);
        }

        match field.kind {
            FieldKind::Property => {
                let [key] = rest else {
                    return Err(DomainError::malformed(format!(
                        "property path '{}.{}' must name a single key",
                        field.name,
                        rest.join(".")
                    )));
                };
                self.property_condition(field, key, operator, value)
            }
            FieldKind::Many2one | FieldKind::One2many | FieldKind::Many2many => {
                if !field.is_searchable() {
                    return Err(not_searchable(field));
                }
                let sub = self.resolve_path(field.target(), rest, operator, value, depth + 1)?;
                Ok(match sub {
                    DomainNode::Leaf(mut leaf) => {
                        leaf.path.insert(0, field.clone());
                        DomainNode::Leaf(leaf)
                    }
                    other => make_any(field.clone(), other, false, false),
                })
            }
            FieldKind::Scalar => Err(DomainError::malformed(format!(
                "cannot traverse non-relational field {}.{}",
                field.owner_model, field.name
            ))),
        }
    }

    fn field_condition(
        &self,
        field: &Arc<FieldDescriptor>,
        operator: Operator,
        value: &LeafValue,
        depth: usize,
    ) -> NormalizeResult<DomainNode> {
        if operator.is_any() {
            if !field.is_relational() {
                return Err(unsupported(field, operator));
            }
            if !field.is_searchable() {
                return Err(not_searchable(field));
            }
            let sub = match value {
                LeafValue::Domain(sub) => self.simplify(field.target(), sub, false, depth + 1)?.into_node(),
                LeafValue::List(ids) => self.id_condition(field.target(), Operator::In, ids.clone())?,
                LeafValue::Scalar(v) => {
                    return Err(DomainError::malformed(format!(
                        "operator '{operator}' expects a domain, got {}",
                        v.type_name()
                    )))
                }
            };
            return Ok(make_any(field.clone(), sub, operator.is_unchecked(), operator.is_negative()));
        }
        if operator.is_hierarchy() {
            return self.hierarchy_condition(field, operator, value);
        }

        if !field.is_searchable() {
            return Err(not_searchable(field));
        }
        if !field.default_operators().contains(&operator) {
            return Err(unsupported(field, operator));
        }
        let (operator, operand) = self.canonical(field, operator, value)?;

        if field.search.is_some() {
            return Ok(leaf(field, operator, operand));
        }

        match field.kind {
            FieldKind::Many2one => self.many2one_condition(field, operator, operand),
            FieldKind::One2many | FieldKind::Many2many => self.x2many_condition(field, operator, operand),
            FieldKind::Property => {
                // Without a key only set/unset checks make sense on the bag.
                match (&operator, &operand) {
                    (Operator::In | Operator::NotIn, Operand::List(values))
                        if values.iter().all(|v| v.is_null() || *v == Value::Bool(false)) =>
                    {
                        Ok(self.in_condition(field, operator, nulls_only(values)))
                    }
                    _ => Err(unsupported(field, operator)),
                }
            }
            FieldKind::Scalar => self.scalar_condition(field, operator, operand),
        }
    }

    /// `=`/`!=` become `in`/`not in` over a one-element list; `like` values
    /// must be strings.
    fn canonical(
        &self,
        field: &FieldDescriptor,
        operator: Operator,
        value: &LeafValue,
    ) -> NormalizeResult<(Operator, Operand)> {
        let operand = match value {
            LeafValue::Scalar(v) => Operand::Value(v.clone()),
            LeafValue::List(values) => Operand::List(values.clone()),
            LeafValue::Domain(_) => {
                return Err(DomainError::malformed(format!(
                    "operator '{operator}' on '{}' does not take a domain",
                    field.name
                )))
            }
        };
        let (operator, operand) = match (operator, operand) {
            (Operator::Eq, Operand::Value(v)) | (Operator::In, Operand::Value(v)) => {
                (Operator::In, Operand::List(vec![v]))
            }
            (Operator::Ne, Operand::Value(v)) | (Operator::NotIn, Operand::Value(v)) => {
                (Operator::NotIn, Operand::List(vec![v]))
            }
            (Operator::Eq, list @ Operand::List(_)) => (Operator::In, list),
            (Operator::Ne, list @ Operand::List(_)) => (Operator::NotIn, list),
            (op, Operand::List(_)) if op != Operator::In && op != Operator::NotIn => {
                return Err(DomainError::malformed(format!(
                    "operator '{op}' on '{}' does not take a list",
                    field.name
                )))
            }
            (op, operand) => (op, operand),
        };
        if let Operand::List(values) = &operand {
            if values.len() > self.limits.max_in_values {
                return Err(DomainError::InListTooLarge {
                    max: self.limits.max_in_values,
                });
            }
            if values.iter().any(|v| matches!(v, Value::Ids(_))) {
                return Err(DomainError::malformed("record id lists cannot be nested"));
            }
        }
        if operator.is_like() && !matches!(&operand, Operand::Value(Value::String(_))) {
            return Err(DomainError::malformed(format!(
                "operator '{operator}' on '{}' expects a string",
                field.name
            )));
        }
        Ok((operator, operand))
    }

    fn in_condition(&self, field: &Arc<FieldDescriptor>, operator: Operator, values: Vec<Value>) -> DomainNode {
        if values.is_empty() {
            return if operator == Operator::In {
                DomainNode::falsy()
            } else {
                DomainNode::truthy()
            };
        }
        leaf(field, operator, Operand::List(values))
    }

    fn scalar_condition(
        &self,
        field: &Arc<FieldDescriptor>,
        operator: Operator,
        operand: Operand,
    ) -> NormalizeResult<DomainNode> {
        match operand {
            Operand::List(values) => {
                let values: Vec<Value> = match field.value_type {
                    // NULL reads as false on boolean columns.
                    ValueType::Boolean => values
                        .into_iter()
                        .map(|v| if v.is_null() { Value::Bool(false) } else { v })
                        .collect(),
                    ValueType::Binary => {
                        if values.iter().any(|v| !v.is_null() && *v != Value::Bool(false)) {
                            return Err(unsupported(field, operator));
                        }
                        nulls_only(&values)
                    }
                    _ => values
                        .into_iter()
                        .map(|v| if v == Value::Bool(false) { Value::Null } else { v })
                        .collect(),
                };
                Ok(self.in_condition(field, operator, values))
            }
            Operand::Value(v) => {
                if v.is_null() || (matches!(v, Value::Bool(_)) && operator.is_inequality()) {
                    return Err(DomainError::malformed(format!(
                        "operator '{operator}' on '{}' needs a comparable value",
                        field.name
                    )));
                }
                Ok(leaf(field, operator, Operand::Value(v)))
            }
        }
    }

    fn many2one_condition(
        &self,
        field: &Arc<FieldDescriptor>,
        operator: Operator,
        operand: Operand,
    ) -> NormalizeResult<DomainNode> {
        if operator.is_like() {
            return self.name_search(field, operator, operand);
        }
        let Operand::List(values) = operand else {
            return match operand {
                Operand::Value(Value::Int(_)) => Ok(leaf(field, operator, operand)),
                _ => Err(DomainError::malformed(format!(
                    "operator '{operator}' on many2one '{}' expects a record id",
                    field.name
                ))),
            };
        };
        if values.iter().any(|v| v.as_str().is_some()) {
            if !values.iter().all(|v| v.as_str().is_some()) {
                return Err(DomainError::malformed(format!(
                    "many2one '{}' cannot mix names and ids",
                    field.name
                )));
            }
            let positive = self.name_condition(field, Operator::In, Operand::List(values))?;
            return Ok(if operator == Operator::NotIn { negate(positive) } else { positive });
        }
        // `in [True]` means "is set".
        if values == [Value::Bool(true)] {
            let flipped = if operator == Operator::In { Operator::NotIn } else { Operator::In };
            return Ok(leaf(field, flipped, Operand::List(vec![Value::Null])));
        }
        let values = values
            .into_iter()
            .map(|v| match v {
                Value::Null | Value::Bool(false) => Ok(Value::Null),
                Value::Int(id) => Ok(Value::Int(id)),
                other => Err(DomainError::malformed(format!(
                    "many2one '{}' expects record ids, got {}",
                    field.name,
                    other.type_name()
                ))),
            })
            .collect::<NormalizeResult<Vec<_>>>()?;
        Ok(self.in_condition(field, operator, values))
    }

    fn x2many_condition(
        &self,
        field: &Arc<FieldDescriptor>,
        operator: Operator,
        operand: Operand,
    ) -> NormalizeResult<DomainNode> {
        if operator.is_like() {
            return self.name_search(field, operator, operand);
        }
        let Operand::List(values) = operand else {
            return Err(unsupported(field, operator));
        };
        let mut ids = Vec::new();
        let mut names = Vec::new();
        let (mut empty, mut nonempty) = (false, false);
        for value in values {
            match value {
                Value::Null | Value::Bool(false) => empty = true,
                Value::Bool(true) => nonempty = true,
                Value::Int(_) => ids.push(value),
                Value::String(_) => names.push(value),
                other => {
                    return Err(DomainError::malformed(format!(
                        "x2many '{}' expects record ids, got {}",
                        field.name,
                        other.type_name()
                    )))
                }
            }
        }
        let mut parts = Vec::new();
        if !ids.is_empty() {
            parts.push(make_any(
                field.clone(),
                self.id_condition(field.target(), Operator::In, ids)?,
                false,
                false,
            ));
        }
        if !names.is_empty() {
            parts.push(self.name_condition(field, Operator::In, Operand::List(names))?);
        }
        if empty {
            parts.push(make_any(field.clone(), DomainNode::truthy(), false, true));
        }
        if nonempty {
            parts.push(make_any(field.clone(), DomainNode::truthy(), false, false));
        }
        let positive = combine(false, parts);
        Ok(if operator == Operator::NotIn { negate(positive) } else { positive })
    }

    /// `rel like 'x'` searches the target's record name; negative operators
    /// become `not any (rec_name positive-like 'x')` so unset relations match.
    fn name_search(
        &self,
        field: &Arc<FieldDescriptor>,
        operator: Operator,
        operand: Operand,
    ) -> NormalizeResult<DomainNode> {
        let positive = self.name_condition(field, operator.positive_like(), operand)?;
        Ok(if operator.is_negative() { negate(positive) } else { positive })
    }

    fn name_condition(
        &self,
        field: &Arc<FieldDescriptor>,
        operator: Operator,
        operand: Operand,
    ) -> NormalizeResult<DomainNode> {
        let target = self.registry.model(field.target())?;
        let value = match operand {
            Operand::Value(v) => LeafValue::Scalar(v),
            Operand::List(values) => LeafValue::List(values),
        };
        let sub = self.resolve_path(&target.name, &[target.rec_name.as_str()], operator, &value, 0)?;
        Ok(match sub {
            DomainNode::Leaf(mut leaf) if field.kind == FieldKind::Many2one => {
                leaf.path.insert(0, field.clone());
                DomainNode::Leaf(leaf)
            }
            other => make_any(field.clone(), other, false, false),
        })
    }

    /// `child_of`/`parent_of` end up as a leaf on the self-referencing
    /// many2one that defines the hierarchy; the compiler expands it.
    /// Integers are record ids, strings search the record name.
    fn hierarchy_condition(
        &self,
        field: &Arc<FieldDescriptor>,
        operator: Operator,
        value: &LeafValue,
    ) -> NormalizeResult<DomainNode> {
        let values = match value {
            LeafValue::Scalar(Value::Bool(false)) => return Ok(DomainNode::falsy()),
            LeafValue::Scalar(v) => vec![v.clone()],
            LeafValue::List(values) => values.clone(),
            LeafValue::Domain(_) => {
                return Err(DomainError::malformed(format!(
                    "operator '{operator}' on '{}' does not take a domain",
                    field.name
                )))
            }
        };
        if values.is_empty() {
            return Ok(DomainNode::falsy());
        }
        if values.len() > self.limits.max_in_values {
            return Err(DomainError::InListTooLarge {
                max: self.limits.max_in_values,
            });
        }
        if let Some(bad) = values.iter().find(|v| !matches!(v, Value::Int(_) | Value::String(_))) {
            return Err(DomainError::malformed(format!(
                "operator '{operator}' expects record ids or names, got {}",
                bad.type_name()
            )));
        }

        if field.name == "id" {
            let model = self.registry.model(&field.owner_model)?;
            let Some(parent) = &model.parent_name else {
                return Err(DomainError::malformed(format!(
                    "model '{}' has no parent field for '{operator}'",
                    model.name
                )));
            };
            let parent = self.registry.field(&model.name, parent)?;
            return self.hierarchy_condition(parent, operator, &LeafValue::List(values));
        }
        if !field.is_relational() {
            return Err(unsupported(field, operator));
        }
        if !field.is_searchable() {
            return Err(not_searchable(field));
        }
        if field.kind == FieldKind::Many2one && field.target() == field.owner_model {
            if !field.stored {
                return Err(not_searchable(field));
            }
            return Ok(leaf(field, operator, Operand::List(values)));
        }
        let id = self.registry.field(field.target(), "id")?;
        let sub = self.hierarchy_condition(id, operator, &LeafValue::List(values))?;
        Ok(make_any(field.clone(), sub, false, false))
    }

    fn id_condition(&self, model: &str, operator: Operator, ids: Vec<Value>) -> NormalizeResult<DomainNode> {
        let id = self.registry.field(model, "id")?;
        if let Some(bad) = ids.iter().find(|v| v.as_int().is_none()) {
            return Err(DomainError::malformed(format!(
                "expected record ids, got {}",
                bad.type_name()
            )));
        }
        Ok(self.in_condition(id, operator, ids))
    }

    fn property_condition(
        &self,
        field: &Arc<FieldDescriptor>,
        key: &str,
        operator: Operator,
        value: &LeafValue,
    ) -> NormalizeResult<DomainNode> {
        if !is_identifier(key) {
            return Err(DomainError::InvalidPropertyName { name: key.to_owned() });
        }
        if operator.is_any() || operator.is_hierarchy() {
            return Err(unsupported(field, operator));
        }
        let (operator, operand) = self.canonical(field, operator, value)?;
        if let Operand::List(values) = &operand {
            if values.is_empty() {
                return Ok(self.in_condition(field, operator, Vec::new()));
            }
        }
        Ok(DomainNode::Leaf(Leaf {
            path: vec![field.clone()],
            property: Some(key.to_owned()),
            operator,
            operand,
        }))
    }
}

/// Falsy right-hand sides of `=?`.
fn is_unset(value: &LeafValue) -> bool {
    match value {
        LeafValue::Scalar(v) => match v {
            Value::Null | Value::Bool(false) => true,
            Value::Int(i) => *i == 0,
            Value::Float(f) => *f == 0.0,
            Value::String(s) => s.is_empty(),
            Value::Bytes(bytes) => bytes.is_empty(),
            Value::Ids(ids) => ids.is_empty(),
            Value::Bool(true) => false,
        },
        LeafValue::List(values) => values.is_empty(),
        LeafValue::Domain(_) => false,
    }
}

fn nulls_only(values: &[Value]) -> Vec<Value> {
    if values.is_empty() {
        Vec::new()
    } else {
        vec![Value::Null]
    }
}

/// Property keys end up inside a JSON path literal.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn not_searchable(field: &FieldDescriptor) -> DomainError {
    DomainError::NotSearchable {
        model: field.owner_model.clone(),
        field: field.name.clone(),
    }
}

fn unsupported(field: &FieldDescriptor, operator: Operator) -> DomainError {
    DomainError::OperatorNotSupported {
        model: field.owner_model.clone(),
        field: field.name.clone(),
        op: operator.as_str(),
    }
}

struct DomainStats {
    nodes: usize,
    depth: usize,
}

fn domain_stats(domain: &Domain) -> DomainStats {
    match domain {
        Domain::Condition(cond) => match &cond.value {
            LeafValue::Domain(sub) => {
                let stats = domain_stats(sub);
                DomainStats {
                    nodes: stats.nodes + 1,
                    depth: stats.depth + 1,
                }
            }
            _ => DomainStats { nodes: 1, depth: 1 },
        },
        Domain::And(children) | Domain::Or(children) => {
            let mut nodes = 1;
            let mut max_depth = 0;
            for child in children {
                let stats = domain_stats(child);
                nodes += stats.nodes;
                max_depth = max_depth.max(stats.depth);
            }
            DomainStats {
                nodes,
                depth: max_depth + 1,
            }
        }
        Domain::Not(child) => {
            let stats = domain_stats(child);
            DomainStats {
                nodes: stats.nodes + 1,
                depth: stats.depth + 1,
            }
        }
    }
}
