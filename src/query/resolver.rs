//! Relational hops: LEFT JOIN, `IN (subquery)` or correlated `EXISTS`.

use std::sync::Arc;

use crate::query::ast::DomainNode;
use crate::query::compiler::{CompileResult, Compiler, Scope};
use crate::query::errors::DomainError;
use crate::query::plan::{AliasKey, Expr, Join, Predicate, QueryPlan, SelectExpr, SelectItem, TableRef};
use crate::schema::{FieldDescriptor, FieldKind, ModelDef};

/// How a hop through a relational field is evaluated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HopStrategy {
    /// LEFT JOIN on the parent plan; no row rules on the target.
    Join,
    /// `fk IN (SELECT id FROM target WHERE ...)`.
    Subquery,
    /// Correlated `EXISTS`.
    Exists,
}

/// Strategy for a hop through `field`. `strict` is set by `any!`.
pub fn strategy(field: &FieldDescriptor, strict: bool) -> HopStrategy {
    match field.kind {
        FieldKind::Many2one if strict || field.bypass_access => HopStrategy::Join,
        FieldKind::Many2one => HopStrategy::Subquery,
        _ => HopStrategy::Exists,
    }
}

impl Compiler<'_> {
    /// Compiles `sub` (over the target of `head`) as seen from `scope`.
    pub(super) fn compile_hop(
        &mut self,
        plan: &mut QueryPlan,
        scope: &Scope,
        head: &Arc<FieldDescriptor>,
        sub: &DomainNode,
        strict: bool,
        negated: bool,
    ) -> CompileResult<Predicate> {
        self.check_field(head)?;
        self.mark_read(head);
        let target = self.registry.model(head.target())?.clone();
        let key = scope.key.child(&head.name);
        let ruled = !strict && !head.bypass_access;
        match strategy(head, strict) {
            HopStrategy::Join => self.join_hop(plan, scope, head, &target, key, sub, negated),
            HopStrategy::Subquery => self.subquery_hop(plan, scope, head, &target, key, sub, ruled, negated),
            HopStrategy::Exists if head.kind == FieldKind::One2many => {
                self.one2many_hop(plan, scope, head, &target, key, sub, ruled, negated)
            }
            HopStrategy::Exists => self.many2many_hop(plan, scope, head, &target, key, sub, ruled, negated),
        }
    }

    /// Alias of the LEFT JOIN through `head`, added on first use.
    pub(super) fn join(
        &mut self,
        plan: &mut QueryPlan,
        scope: &Scope,
        head: &FieldDescriptor,
        target: &ModelDef,
        key: AliasKey,
    ) -> String {
        if let Some(join) = plan.join_for(&key) {
            return join.table.alias.clone();
        }
        let alias = self.allocate_alias(&key);
        plan.joins.push(Join {
            key,
            model: target.name.clone(),
            table: TableRef {
                table: target.table.clone(),
                alias: alias.clone(),
            },
            left: Expr::column(&scope.alias, &head.column),
            right: Expr::column(&alias, "id"),
        });
        alias
    }

    #[allow(clippy::too_many_arguments)]
    fn join_hop(
        &mut self,
        plan: &mut QueryPlan,
        scope: &Scope,
        head: &FieldDescriptor,
        target: &Arc<ModelDef>,
        key: AliasKey,
        sub: &DomainNode,
        negated: bool,
    ) -> CompileResult<Predicate> {
        let alias = self.join(plan, scope, head, target, key.clone());
        let inner = Scope {
            model: target.clone(),
            alias: alias.clone(),
            key,
        };
        let condition = self.compile_node(plan, &inner, sub)?;
        let id = Expr::column(&alias, "id");
        Ok(if negated {
            Predicate::or(vec![Predicate::IsNull(id), Predicate::not_true(condition)])
        } else if head.required {
            condition
        } else {
            Predicate::and(vec![Predicate::IsNotNull(id), condition])
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn subquery_hop(
        &mut self,
        plan: &mut QueryPlan,
        scope: &Scope,
        head: &FieldDescriptor,
        target: &Arc<ModelDef>,
        key: AliasKey,
        sub: &DomainNode,
        ruled: bool,
        negated: bool,
    ) -> CompileResult<Predicate> {
        let fk = Expr::column(&scope.alias, &head.column);
        let (mut sub_plan, inner) = self.new_plan(target, key.clone());
        sub_plan.select.push(SelectItem::expr(Expr::column(&inner.alias, "id")));
        let condition = self.filtered(&mut sub_plan, &inner, sub, ruled)?;

        match condition {
            Predicate::True if sub_plan.joins.is_empty() => {
                return Ok(if negated {
                    Predicate::IsNull(fk)
                } else {
                    Predicate::IsNotNull(fk)
                })
            }
            Predicate::False => return Ok(if negated { Predicate::True } else { Predicate::False }),
            _ => {}
        }
        sub_plan.where_tree = condition;
        let subquery = plan.add_subquery(key, sub_plan);
        let membership = Predicate::InSubquery {
            expr: fk.clone(),
            subquery,
            negated,
        };
        Ok(if negated && head.can_be_null() {
            Predicate::or(vec![Predicate::IsNull(fk), membership])
        } else {
            membership
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn one2many_hop(
        &mut self,
        plan: &mut QueryPlan,
        scope: &Scope,
        head: &FieldDescriptor,
        target: &Arc<ModelDef>,
        key: AliasKey,
        sub: &DomainNode,
        ruled: bool,
        negated: bool,
    ) -> CompileResult<Predicate> {
        let inverse = head
            .inverse_name
            .as_deref()
            .ok_or_else(|| DomainError::malformed(format!("one2many '{}' has no inverse", head.name)))?;
        let inverse = self.registry.field(&target.name, inverse)?.clone();
        let (mut sub_plan, inner) = self.new_plan(target, key.clone());
        sub_plan.select.push(SelectItem {
            expr: SelectExpr::One,
            alias: None,
        });
        let condition = self.filtered(&mut sub_plan, &inner, sub, ruled)?;
        if condition == Predicate::False {
            return Ok(if negated { Predicate::True } else { Predicate::False });
        }
        let correlation = Predicate::ColumnsEqual(
            Expr::column(&inner.alias, &inverse.column),
            Expr::column(&scope.alias, "id"),
        );
        sub_plan.where_tree = Predicate::and(vec![correlation, condition]);
        let subquery = plan.add_subquery(key, sub_plan);
        Ok(Predicate::Exists { subquery, negated })
    }

    #[allow(clippy::too_many_arguments)]
    fn many2many_hop(
        &mut self,
        plan: &mut QueryPlan,
        scope: &Scope,
        head: &FieldDescriptor,
        target: &Arc<ModelDef>,
        key: AliasKey,
        sub: &DomainNode,
        ruled: bool,
        negated: bool,
    ) -> CompileResult<Predicate> {
        let link = head
            .link
            .clone()
            .ok_or_else(|| DomainError::malformed(format!("many2many '{}' has no link table", head.name)))?;
        let link_alias = self.allocate_alias(&key);
        let mut link_plan = QueryPlan::new(
            None,
            key.clone(),
            TableRef {
                table: link.table.clone(),
                alias: link_alias.clone(),
            },
        );
        link_plan.select.push(SelectItem {
            expr: SelectExpr::One,
            alias: None,
        });

        let target_key = key.child(&target.table);
        let (mut target_plan, inner) = self.new_plan(target, target_key.clone());
        target_plan.select.push(SelectItem::expr(Expr::column(&inner.alias, "id")));
        let condition = self.filtered(&mut target_plan, &inner, sub, ruled)?;

        let membership = match condition {
            Predicate::False => return Ok(if negated { Predicate::True } else { Predicate::False }),
            Predicate::True if target_plan.joins.is_empty() => Predicate::True,
            condition => {
                target_plan.where_tree = condition;
                let subquery = link_plan.add_subquery(target_key, target_plan);
                Predicate::InSubquery {
                    expr: Expr::column(&link_alias, &link.column2),
                    subquery,
                    negated: false,
                }
            }
        };
        let correlation = Predicate::ColumnsEqual(
            Expr::column(&link_alias, &link.column1),
            Expr::column(&scope.alias, "id"),
        );
        link_plan.where_tree = Predicate::and(vec![correlation, membership]);
        let subquery = plan.add_subquery(key, link_plan);
        Ok(Predicate::Exists { subquery, negated })
    }

    /// Condition of a subquery over the target, rules included when `ruled`.
    fn filtered(&mut self, plan: &mut QueryPlan, scope: &Scope, sub: &DomainNode, ruled: bool) -> CompileResult<Predicate> {
        let condition = self.compile_node(plan, scope, sub)?;
        if ruled {
            self.inject_rules(plan, scope, condition)
        } else {
            Ok(condition)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineOptions;
    use crate::query::ast::{Domain, Operator};
    use crate::query::normalize::normalize;
    use crate::schema::fixtures::sale_registry;
    use crate::security::AccessContext;

    fn sql(model: &str, domain: Domain) -> String {
        let registry = sale_registry();
        let options = EngineOptions::default();
        let access = AccessContext::superuser();
        let node = normalize(&registry, model, &domain).expect("normalize");
        Compiler::new(&registry, &access, &options)
            .compile_search(model, &node, Some("id"), None, None)
            .expect("compile")
            .statement()
            .sql
    }

    #[test]
    fn strategies_follow_the_field() {
        let registry = sale_registry();
        let partner = registry.field("sale.order", "partner_id").expect("field");
        let invoice = registry.field("sale.order", "invoice_partner_id").expect("field");
        let lines = registry.field("sale.order", "line_ids").expect("field");
        assert_eq!(strategy(partner, false), HopStrategy::Subquery);
        assert_eq!(strategy(partner, true), HopStrategy::Join);
        assert_eq!(strategy(invoice, false), HopStrategy::Join);
        assert_eq!(strategy(lines, true), HopStrategy::Exists);
    }

    #[test]
    fn bypass_many2one_joins_once() {
        let sql = sql(
            "sale.order",
            Domain::eq("invoice_partner_id.name", "a") | Domain::eq("invoice_partner_id.city", "b"),
        );
        assert_eq!(sql.matches("LEFT JOIN").count(), 1);
        assert!(sql.contains(
            r#"LEFT JOIN "res_partner" AS "sale_order__invoice_partner_id" ON ("sale_order"."invoice_partner_id" = "sale_order__invoice_partner_id"."id")"#
        ));
    }

    #[test]
    fn many2one_siblings_share_a_subquery() {
        let sql = sql(
            "sale.order",
            Domain::eq("partner_id.name", "a") & Domain::eq("partner_id.city", "b"),
        );
        assert_eq!(sql.matches("SELECT").count(), 2);
        assert!(sql.contains(r#""sale_order"."partner_id" IN (SELECT "sale_order__partner_id"."id" FROM "res_partner""#));
    }

    #[test]
    fn one2many_exists_is_correlated() {
        let sql = sql("sale.order", Domain::cond("line_ids.qty", Operator::Gt, 3i64));
        assert!(sql.contains(
            r#"EXISTS (SELECT 1 FROM "sale_order_line" AS "sale_order__line_ids" WHERE ("sale_order__line_ids"."order_id" = "sale_order"."id" AND "sale_order__line_ids"."qty" > ?))"#
        ));
    }

    #[test]
    fn many2many_without_condition_only_checks_the_link() {
        let sql = sql("sale.order", Domain::cond("tag_ids", Operator::NotIn, vec![crate::query::value::Value::Null]));
        assert!(sql.contains(r#"WHERE EXISTS (SELECT 1 FROM "sale_order_sale_tag_rel" AS "sale_order__tag_ids" WHERE "sale_order__tag_ids"."sale_order_id" = "sale_order"."id")"#));
    }

    #[test]
    fn negated_one2many_siblings_share_one_not_exists() {
        let desk = || Domain::not_any("line_ids", Domain::eq("product", "desk"));
        let big = || Domain::not_any("line_ids", Domain::cond("qty", Operator::Gt, 3i64));

        let merged = sql("sale.order", desk() & big());
        assert_eq!(merged.matches("NOT EXISTS").count(), 1, "{merged}");
        assert!(merged.contains(r#"("sale_order__line_ids"."product" IN (?) OR "sale_order__line_ids"."qty" > ?)"#));

        let apart = sql("sale.order", desk() | big());
        assert_eq!(apart.matches("NOT EXISTS").count(), 2, "{apart}");
    }

    #[test]
    fn negated_nullable_many2one_matches_unset_rows() {
        let sql = sql("sale.order", Domain::not_any("partner_id", Domain::eq("city", "x")));
        assert!(sql.contains(r#"("sale_order"."partner_id" IS NULL OR "sale_order"."partner_id" NOT IN (SELECT"#));
    }
}
