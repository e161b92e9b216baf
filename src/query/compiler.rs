//! Domain → [`QueryPlan`] compilation.
//!
//! The compiler walks a normalized tree, asks the resolver how to evaluate
//! each relational hop, injects row rules on every scope that touches a
//! restricted model and records every `(model, field)` whose pending writes
//! must reach storage before the statement runs.

use std::collections::BTreeSet;
use std::sync::Arc;

use rustc_hash::FxHashSet;
use tracing::trace;

use crate::config::EngineOptions;
use crate::query::ast::{DomainNode, Leaf, Operand, Operator};
use crate::query::emit::{emit, Statement};
use crate::query::errors::DomainError;
use crate::query::normalize::{is_identifier, normalize_with};
use crate::query::plan::{AliasKey, CmpOp, Expr, Hierarchy, Predicate, QueryPlan, SelectItem, TableRef};
use crate::query::resolver::{self, HopStrategy};
use crate::query::value::Value;
use crate::schema::{FieldDescriptor, FieldKind, ModelDef, Registry, ValueType};
use crate::security::AccessContext;
use crate::types::FieldKey;

pub(super) type CompileResult<T> = Result<T, DomainError>;

/// Output of a compilation: the plan and the fields to flush before running it.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledQuery {
    /// Root plan.
    pub plan: QueryPlan,
    /// Every stored `(model, field)` the statement reads, rule and order
    /// fields included.
    pub to_flush: BTreeSet<FieldKey>,
}

impl CompiledQuery {
    /// Emits the SQL statement.
    pub fn statement(&self) -> Statement {
        emit(&self.plan)
    }
}

/// A table alias bound to the model it exposes.
#[derive(Clone, Debug)]
pub(super) struct Scope {
    pub(super) model: Arc<ModelDef>,
    pub(super) alias: String,
    pub(super) key: AliasKey,
}

/// Single-use compiler; one instance per statement.
pub struct Compiler<'a> {
    pub(super) registry: &'a Registry,
    pub(super) access: &'a AccessContext,
    pub(super) options: &'a EngineOptions,
    lang: Option<String>,
    pub(super) to_flush: BTreeSet<FieldKey>,
    used_aliases: FxHashSet<String>,
    ruled_aliases: FxHashSet<String>,
    pub(super) sudo: usize,
}

impl<'a> Compiler<'a> {
    /// New compiler for one statement.
    pub fn new(registry: &'a Registry, access: &'a AccessContext, options: &'a EngineOptions) -> Self {
        Self {
            registry,
            access,
            options,
            lang: options.default_lang.clone(),
            to_flush: BTreeSet::new(),
            used_aliases: FxHashSet::default(),
            ruled_aliases: FxHashSet::default(),
            sudo: 0,
        }
    }

    /// Language used for translatable fields.
    pub fn with_lang(mut self, lang: Option<&str>) -> Self {
        if let Some(lang) = lang {
            self.lang = Some(lang.to_owned());
        }
        self
    }

    /// Compiles a search: `SELECT id FROM model WHERE domain AND rules ORDER BY ...`.
    pub fn compile_search(
        mut self,
        model: &str,
        domain: &DomainNode,
        order: Option<&str>,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<CompiledQuery, DomainError> {
        let model = self.registry.model(model)?.clone();
        let (mut plan, scope) = self.new_plan(&model, AliasKey::root(&model.table));
        plan.select.push(SelectItem::expr(Expr::column(&scope.alias, "id")));
        let predicate = self.compile_node(&mut plan, &scope, domain)?;
        plan.where_tree = self.inject_rules(&mut plan, &scope, predicate)?;
        let order = order.map(str::trim).filter(|o| !o.is_empty()).unwrap_or(&model.order);
        self.apply_order(&mut plan, &scope, order)?;
        plan.limit = limit;
        plan.offset = offset;
        trace!(
            model = %model.name,
            joins = plan.join_count(),
            subqueries = plan.subquery_count(),
            "ormql.compile.search"
        );
        Ok(CompiledQuery {
            plan,
            to_flush: self.to_flush,
        })
    }

    /// Compiles a grouped aggregation.
    ///
    /// `groupby` names stored fields of `model`; `aggregates` are written
    /// `field:func`. Every row also carries `__count`.
    pub fn compile_read_group(
        mut self,
        model: &str,
        domain: &DomainNode,
        groupby: &[String],
        aggregates: &[String],
        order: Option<&str>,
    ) -> Result<CompiledQuery, DomainError> {
        let model = self.registry.model(model)?.clone();
        let (mut plan, scope) = self.new_plan(&model, AliasKey::root(&model.table));
        let predicate = self.compile_node(&mut plan, &scope, domain)?;
        plan.where_tree = self.inject_rules(&mut plan, &scope, predicate)?;
        self.apply_grouping(&mut plan, &scope, groupby, aggregates, order)?;
        trace!(model = %model.name, groups = groupby.len(), "ormql.compile.read_group");
        Ok(CompiledQuery {
            plan,
            to_flush: self.to_flush,
        })
    }

    pub(super) fn new_plan(&mut self, model: &Arc<ModelDef>, key: AliasKey) -> (QueryPlan, Scope) {
        let alias = self.allocate_alias(&key);
        let plan = QueryPlan::new(
            Some(model.name.clone()),
            key.clone(),
            TableRef {
                table: model.table.clone(),
                alias: alias.clone(),
            },
        );
        let scope = Scope {
            model: model.clone(),
            alias,
            key,
        };
        (plan, scope)
    }

    /// Derives an alias from the path signature, suffixed when the name is
    /// already taken in this statement.
    pub(super) fn allocate_alias(&mut self, key: &AliasKey) -> String {
        let base = key.alias_name(self.options.max_alias_len);
        let mut alias = base.clone();
        let mut n = 1;
        while !self.used_aliases.insert(alias.clone()) {
            n += 1;
            alias = format!("{base}_{n}");
        }
        alias
    }

    pub(super) fn compile_node(&mut self, plan: &mut QueryPlan, scope: &Scope, node: &DomainNode) -> CompileResult<Predicate> {
        match node {
            DomainNode::Leaf(leaf) => self.compile_leaf(plan, scope, leaf),
            DomainNode::And(children) => self.compile_nary(plan, scope, children, true),
            DomainNode::Or(children) => self.compile_nary(plan, scope, children, false),
            DomainNode::Not(inner) => Ok(Predicate::not_true(self.compile_node(plan, scope, inner)?)),
            DomainNode::Any(any) => {
                self.compile_hop(plan, scope, &any.path_head, &any.subdomain, any.strict, any.negated)
            }
        }
    }

    /// Compiles siblings, merging those that go through the same relational
    /// head when one subquery can evaluate them together.
    fn compile_nary(
        &mut self,
        plan: &mut QueryPlan,
        scope: &Scope,
        children: &[DomainNode],
        conjunction: bool,
    ) -> CompileResult<Predicate> {
        struct Group<'n> {
            head: Option<Arc<FieldDescriptor>>,
            negated: bool,
            first: &'n DomainNode,
            rests: Vec<DomainNode>,
        }

        let mut groups: Vec<Group<'_>> = Vec::with_capacity(children.len());
        for child in children {
            match self.mergeable(child, conjunction) {
                Some((head, rest, negated)) => {
                    let existing = groups
                        .iter_mut()
                        .find(|g| g.negated == negated && matches!(&g.head, Some(h) if h.name == head.name));
                    match existing {
                        Some(group) => group.rests.push(rest),
                        None => groups.push(Group {
                            head: Some(head),
                            negated,
                            first: child,
                            rests: vec![rest],
                        }),
                    }
                }
                None => groups.push(Group {
                    head: None,
                    negated: false,
                    first: child,
                    rests: Vec::new(),
                }),
            }
        }

        let mut parts = Vec::with_capacity(groups.len());
        for group in groups {
            let predicate = match (&group.head, group.rests.len()) {
                (Some(head), n) if n > 1 => {
                    // `not any a AND not any b` is `not any (a OR b)`.
                    let merged = if conjunction != group.negated {
                        DomainNode::And(group.rests)
                    } else {
                        DomainNode::Or(group.rests)
                    };
                    self.compile_hop(plan, scope, head, &merged, false, group.negated)?
                }
                _ => self.compile_node(plan, scope, group.first)?,
            };
            parts.push(predicate);
        }
        Ok(if conjunction {
            Predicate::and(parts)
        } else {
            Predicate::or(parts)
        })
    }

    /// Relational head, remaining condition and negation of a sibling that
    /// may share a subquery with others through the same head.
    fn mergeable(&self, node: &DomainNode, conjunction: bool) -> Option<(Arc<FieldDescriptor>, DomainNode, bool)> {
        let (head, rest, negated) = match node {
            DomainNode::Leaf(leaf) if leaf.path.len() > 1 => (
                leaf.path[0].clone(),
                DomainNode::Leaf(Leaf {
                    path: leaf.path[1..].to_vec(),
                    ..leaf.clone()
                }),
                false,
            ),
            DomainNode::Any(any) if !any.strict => (any.path_head.clone(), (*any.subdomain).clone(), any.negated),
            _ => return None,
        };
        let merge = match resolver::strategy(&head, false) {
            // A many2one reaches at most one row: AND and OR both distribute.
            HopStrategy::Subquery => true,
            // EXISTS distributes over OR, NOT EXISTS over AND.
            HopStrategy::Exists => negated == conjunction,
            HopStrategy::Join => false,
        };
        merge.then_some((head, rest, negated))
    }

    fn compile_leaf(&mut self, plan: &mut QueryPlan, scope: &Scope, leaf: &Leaf) -> CompileResult<Predicate> {
        if leaf.path.len() > 1 {
            let rest = DomainNode::Leaf(Leaf {
                path: leaf.path[1..].to_vec(),
                ..leaf.clone()
            });
            return self.compile_hop(plan, scope, &leaf.path[0], &rest, false, false);
        }
        let Some(field) = leaf.field().cloned() else {
            return Err(DomainError::malformed("condition without a field"));
        };
        self.check_field(&field)?;

        if let Some(method) = &field.search {
            let domain = method.search(leaf.operator, &leaf.operand)?;
            let node = normalize_with(self.registry, &field.owner_model, &domain, &self.options.limits())?;
            return self.compile_node(plan, scope, &node);
        }

        self.mark_read(&field);
        if leaf.operator.is_hierarchy() {
            return self.hierarchy_sql(scope, &field, leaf);
        }
        let expr = self.field_expr(scope, &field, leaf.property.as_deref())?;
        let nullable = leaf.property.is_some() || field.can_be_null();
        let boolean = leaf.property.is_none() && field.value_type == ValueType::Boolean;
        condition_sql(expr, leaf.operator, &leaf.operand, nullable, boolean)
    }

    /// `parent` is the self-referencing many2one the hierarchy follows.
    /// The walk itself runs without row rules; the outer scope keeps its own.
    fn hierarchy_sql(&mut self, scope: &Scope, parent: &FieldDescriptor, leaf: &Leaf) -> CompileResult<Predicate> {
        let (names, ids): (Vec<&Value>, Vec<&Value>) =
            leaf.operand.values().iter().partition(|v| v.as_str().is_some());
        let model = self.registry.model(&parent.owner_model)?.clone();
        let name_field = self.registry.field(&model.name, &model.rec_name)?.clone();
        if !names.is_empty() {
            if !name_field.stored || name_field.translatable {
                return Err(DomainError::malformed(format!(
                    "'{}' cannot be searched by name in a hierarchy",
                    model.name
                )));
            }
            self.mark_read(&name_field);
        }
        Ok(Predicate::InHierarchy(Box::new(Hierarchy {
            expr: Expr::column(&scope.alias, "id"),
            table: model.table.clone(),
            parent_column: parent.column.clone(),
            ids: ids.into_iter().cloned().collect(),
            name_column: name_field.column.clone(),
            names: names
                .into_iter()
                .filter_map(Value::as_str)
                .map(|name| Value::String(format!("%{name}%")))
                .collect(),
            descend: leaf.operator == Operator::ChildOf,
        })))
    }

    pub(super) fn check_field(&self, field: &FieldDescriptor) -> CompileResult<()> {
        if self.sudo > 0 {
            return Ok(());
        }
        self.access.check_field(field)
    }

    /// Records that the statement reads `field`.
    pub(super) fn mark_read(&mut self, field: &FieldDescriptor) {
        match field.kind {
            FieldKind::One2many => {
                if let Some(inverse) = &field.inverse_name {
                    self.to_flush.insert(FieldKey::new(field.target(), inverse.clone()));
                }
            }
            _ if field.stored && field.name != "id" => {
                self.to_flush.insert(field.key());
            }
            _ => {}
        }
    }

    pub(super) fn field_expr(&self, scope: &Scope, field: &FieldDescriptor, property: Option<&str>) -> CompileResult<Expr> {
        if let Some(key) = property {
            return Ok(Expr::JsonKey {
                alias: scope.alias.clone(),
                column: field.column.clone(),
                key: key.to_owned(),
            });
        }
        if field.translatable {
            let lang = self.lang.clone().unwrap_or_else(|| "en_US".to_owned());
            if !is_identifier(&lang) {
                return Err(DomainError::malformed(format!("invalid language code '{lang}'")));
            }
            return Ok(Expr::Translated {
                alias: scope.alias.clone(),
                column: field.column.clone(),
                lang,
            });
        }
        Ok(Expr::column(&scope.alias, &field.column))
    }

    /// ANDs the compiled rule domain of the scope's model, at most once per alias.
    pub(super) fn inject_rules(&mut self, plan: &mut QueryPlan, scope: &Scope, base: Predicate) -> CompileResult<Predicate> {
        if self.sudo > 0 || self.access.is_superuser() {
            return Ok(base);
        }
        if !self.ruled_aliases.insert(scope.alias.clone()) {
            return Ok(base);
        }
        let Some(rule_domain) = self.access.rule_domain(&scope.model.name) else {
            return Ok(base);
        };
        let node = normalize_with(self.registry, &scope.model.name, &rule_domain, &self.options.limits())?;
        // Rule domains are evaluated without rules of their own.
        self.sudo += 1;
        let rule = self.compile_node(plan, scope, &node);
        self.sudo -= 1;
        trace!(model = %scope.model.name, alias = %scope.alias, "ormql.compile.rules");
        Ok(Predicate::and(vec![base, rule?]))
    }
}

/// SQL for a single-field condition.
fn condition_sql(
    expr: Expr,
    operator: Operator,
    operand: &Operand,
    nullable: bool,
    boolean: bool,
) -> CompileResult<Predicate> {
    match operator {
        Operator::In | Operator::NotIn => {
            let mut null_in = false;
            let mut params = Vec::new();
            for value in operand.values() {
                if value.is_null() {
                    null_in = true;
                } else {
                    params.push(value.clone());
                }
            }
            // NULL reads as false on boolean columns.
            if boolean && params.contains(&Value::Bool(false)) {
                null_in = true;
            }
            let positive = operator == Operator::In;
            if params.is_empty() {
                return Ok(match (positive, null_in) {
                    (true, true) => Predicate::IsNull(expr),
                    (false, true) => Predicate::IsNotNull(expr),
                    (true, false) => Predicate::False,
                    (false, false) => Predicate::True,
                });
            }
            let list = Predicate::InList {
                expr: expr.clone(),
                values: params,
                negated: !positive,
            };
            Ok(match (positive, null_in) {
                (true, true) => Predicate::or(vec![list, Predicate::IsNull(expr)]),
                (true, false) => list,
                (false, true) => list,
                (false, false) if nullable => Predicate::or(vec![Predicate::IsNull(expr), list]),
                (false, false) => list,
            })
        }
        op if op.is_like() => {
            let Operand::Value(Value::String(raw)) = operand else {
                return Err(DomainError::malformed(format!("operator '{op}' expects a string")));
            };
            let pattern = if op.wraps_wildcards() {
                format!("%{raw}%")
            } else {
                raw.clone()
            };
            let negative = op.is_negative();
            let compare = Predicate::Compare {
                expr: expr.clone(),
                op: if negative { CmpOp::NotLike } else { CmpOp::Like },
                value: Value::String(pattern),
                fold_case: op.is_case_insensitive(),
            };
            Ok(if negative && nullable {
                Predicate::or(vec![compare, Predicate::IsNull(expr)])
            } else {
                compare
            })
        }
        Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => {
            let Operand::Value(value) = operand else {
                return Err(DomainError::malformed(format!("operator '{operator}' expects a single value")));
            };
            let op = match operator {
                Operator::Lt => CmpOp::Lt,
                Operator::Le => CmpOp::Le,
                Operator::Gt => CmpOp::Gt,
                _ => CmpOp::Ge,
            };
            Ok(Predicate::Compare {
                expr,
                op,
                value: value.clone(),
                fold_case: false,
            })
        }
        Operator::Eq | Operator::Ne => {
            // Only reachable from search methods returning raw leaves.
            let Operand::Value(value) = operand else {
                return Err(DomainError::malformed(format!("operator '{operator}' expects a single value")));
            };
            let list = Operand::List(vec![value.clone()]);
            let op = if operator == Operator::Eq { Operator::In } else { Operator::NotIn };
            condition_sql(expr, op, &list, nullable, boolean)
        }
        other => Err(DomainError::malformed(format!(
            "operator '{other}' cannot be compiled on a column"
        ))),
    }
}
