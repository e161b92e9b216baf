//! ORDER BY and GROUP BY clauses.

use crate::query::compiler::{CompileResult, Compiler, Scope};
use crate::query::errors::DomainError;
use crate::query::normalize::is_identifier;
use crate::query::plan::{AggregateFunc, Expr, NullsOrder, OrderTerm, QueryPlan, SelectExpr, SelectItem};
use crate::schema::FieldKind;

/// Output column holding the group size in `read_group` rows.
pub const COUNT_COLUMN: &str = "__count";

/// Ordering by a many2one follows the target's `rec_name`, which may itself be
/// a many2one; this bounds that chain.
const MAX_ORDER_HOPS: usize = 8;

/// One parsed term of an order spec.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderSpec {
    /// Dotted field path.
    pub path: Vec<String>,
    /// `desc`.
    pub descending: bool,
    /// Explicit NULL placement.
    pub nulls: Option<NullsOrder>,
}

/// Parses `"field [asc|desc] [nulls first|last], ..."`.
pub fn parse_order(spec: &str) -> Result<Vec<OrderSpec>, DomainError> {
    parse_terms(spec, |name| name.split('.').all(is_identifier))
}

/// Same grammar as [`parse_order`]; `accept` decides which names may be
/// sorted on.
fn parse_terms(spec: &str, accept: impl Fn(&str) -> bool) -> Result<Vec<OrderSpec>, DomainError> {
    let invalid = || DomainError::InvalidOrder { spec: spec.to_owned() };
    let mut terms = Vec::new();
    for term in spec.split(',') {
        let words: Vec<String> = term.split_whitespace().map(str::to_ascii_lowercase).collect();
        let Some((path, rest)) = term.split_whitespace().next().zip(words.get(1..)) else {
            return Err(invalid());
        };
        if !accept(path) {
            return Err(invalid());
        }
        let path: Vec<String> = path.split('.').map(str::to_owned).collect();
        let rest: Vec<&str> = rest.iter().map(String::as_str).collect();
        let (descending, rest) = match rest.as_slice() {
            ["desc", tail @ ..] => (true, tail),
            ["asc", tail @ ..] => (false, tail),
            tail => (false, tail),
        };
        let nulls = match rest {
            [] => None,
            ["nulls", "first"] => Some(NullsOrder::First),
            ["nulls", "last"] => Some(NullsOrder::Last),
            _ => return Err(invalid()),
        };
        terms.push(OrderSpec {
            path,
            descending,
            nulls,
        });
    }
    Ok(terms)
}

impl Compiler<'_> {
    /// Appends the ORDER BY terms of `spec` to `plan`.
    pub(super) fn apply_order(&mut self, plan: &mut QueryPlan, scope: &Scope, spec: &str) -> CompileResult<()> {
        for term in parse_order(spec)? {
            let path: Vec<&str> = term.path.iter().map(String::as_str).collect();
            let exprs = self.order_exprs(plan, scope, &path, spec, 0)?;
            plan.order_terms.extend(exprs.into_iter().map(|expr| OrderTerm {
                expr,
                descending: term.descending,
                nulls: term.nulls,
            }));
        }
        Ok(())
    }

    /// Sort expressions for a dotted path. Many2one hops are LEFT JOINs and
    /// never carry row rules.
    fn order_exprs(
        &mut self,
        plan: &mut QueryPlan,
        scope: &Scope,
        path: &[&str],
        spec: &str,
        hops: usize,
    ) -> CompileResult<Vec<Expr>> {
        let invalid = || DomainError::InvalidOrder { spec: spec.to_owned() };
        if hops > MAX_ORDER_HOPS {
            return Err(invalid());
        }
        let Some((name, rest)) = path.split_first() else {
            return Err(invalid());
        };
        let field = self.registry.field(&scope.model.name, name)?.clone();
        self.check_field(&field)?;

        if let (Some(related), false) = (&field.related, field.stored) {
            let mut spliced: Vec<&str> = related.split('.').collect();
            spliced.extend_from_slice(rest);
            return self.order_exprs(plan, scope, &spliced, spec, hops + 1);
        }
        if !field.stored {
            return Err(invalid());
        }

        match field.kind {
            FieldKind::Scalar if rest.is_empty() => {
                self.mark_read(&field);
                Ok(vec![self.field_expr(scope, &field, None)?])
            }
            FieldKind::Many2one => {
                self.mark_read(&field);
                let target = self.registry.model(field.target())?.clone();
                let key = scope.key.child(&field.name);
                let alias = self.join(plan, scope, &field, &target, key.clone());
                let inner = Scope {
                    model: target.clone(),
                    alias,
                    key,
                };
                if rest.is_empty() {
                    let rec_name = [target.rec_name.as_str()];
                    self.order_exprs(plan, &inner, &rec_name, spec, hops + 1)
                } else {
                    self.order_exprs(plan, &inner, rest, spec, hops + 1)
                }
            }
            _ => Err(invalid()),
        }
    }

    /// Projection, GROUP BY and ORDER BY of a `read_group`.
    pub(super) fn apply_grouping(
        &mut self,
        plan: &mut QueryPlan,
        scope: &Scope,
        groupby: &[String],
        aggregates: &[String],
        order: Option<&str>,
    ) -> CompileResult<()> {
        let mut outputs = Vec::new();
        for name in groupby {
            let field = self.registry.field(&scope.model.name, name)?.clone();
            self.check_field(&field)?;
            if !field.stored || field.is_x2many() || field.kind == FieldKind::Property {
                return Err(DomainError::InvalidAggregate { spec: name.clone() });
            }
            self.mark_read(&field);
            let expr = self.field_expr(scope, &field, None)?;
            plan.select.push(SelectItem::named(SelectExpr::Expr(expr.clone()), name.clone()));
            plan.group_by.push(expr);
            outputs.push(name.clone());
        }
        plan.select.push(SelectItem::named(SelectExpr::CountStar, COUNT_COLUMN));
        outputs.push(COUNT_COLUMN.to_owned());

        for spec in aggregates {
            let invalid = || DomainError::InvalidAggregate { spec: spec.clone() };
            let (name, func) = spec.split_once(':').ok_or_else(invalid)?;
            let func = AggregateFunc::parse(spec, func)?;
            let field = self.registry.field(&scope.model.name, name)?.clone();
            self.check_field(&field)?;
            if !field.stored || field.is_x2many() || field.kind == FieldKind::Property {
                return Err(invalid());
            }
            self.mark_read(&field);
            let expr = self.field_expr(scope, &field, None)?;
            plan.select.push(SelectItem::named(SelectExpr::Aggregate { func, expr }, spec.clone()));
            outputs.push(spec.clone());
        }

        match order.map(str::trim).filter(|o| !o.is_empty()) {
            Some(spec) => {
                // Only projected outputs can be sorted on, aggregates included.
                for term in parse_terms(spec, |name| outputs.iter().any(|o| o == name))? {
                    let name = term.path.join(".");
                    plan.order_terms.push(OrderTerm {
                        expr: Expr::Output(name),
                        descending: term.descending,
                        nulls: term.nulls,
                    });
                }
            }
            None => {
                let terms: Vec<OrderTerm> = plan
                    .group_by
                    .iter()
                    .map(|expr| OrderTerm {
                        expr: expr.clone(),
                        descending: false,
                        nulls: None,
                    })
                    .collect();
                plan.order_terms.extend(terms);
            }
        }
        Ok(())
    }
}
