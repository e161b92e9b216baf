//! SQL text generation.
//!
//! The emitter is the only place that produces SQL text. Output is a pure
//! function of the plan: identifiers are double-quoted, literals are bound as
//! positional `?` parameters in text order.

use std::fmt::Write as _;

use xxhash_rust::xxh64::Xxh64;

use crate::query::plan::{
    AggregateFunc, Expr, Hierarchy, NullsOrder, Predicate, QueryPlan, SelectExpr, SelectItem,
};
use crate::query::value::Value;

/// SQL text with its bound parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
    /// SQL text with `?` placeholders.
    pub sql: String,
    /// Parameters in placeholder order.
    pub params: Vec<Value>,
}

impl Statement {
    /// Statement without parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Deterministic hash of the SQL text and parameters.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = Xxh64::new(0);
        hasher.update(self.sql.as_bytes());
        for param in &self.params {
            hasher.update(&[0]);
            hasher.update(param.to_string().as_bytes());
        }
        hasher.digest()
    }
}

/// Serializes a plan into a statement.
pub fn emit(plan: &QueryPlan) -> Statement {
    let mut emitter = Emitter::default();
    emitter.plan(plan);
    Statement {
        sql: emitter.sql,
        params: emitter.params,
    }
}

/// Double-quotes an identifier.
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[derive(Default)]
struct Emitter {
    sql: String,
    params: Vec<Value>,
}

impl Emitter {
    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    fn bind(&mut self, value: &Value) {
        self.sql.push('?');
        self.params.push(value.clone());
    }

    fn plan(&mut self, plan: &QueryPlan) {
        self.push("SELECT ");
        if plan.select.is_empty() {
            self.push("1");
        }
        for (i, item) in plan.select.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.select_item(item);
        }
        let _ = write!(
            self.sql,
            " FROM {} AS {}",
            quote(&plan.base.table),
            quote(&plan.base.alias)
        );
        for join in &plan.joins {
            let _ = write!(
                self.sql,
                " LEFT JOIN {} AS {} ON (",
                quote(&join.table.table),
                quote(&join.table.alias)
            );
            self.expr(&join.left);
            self.push(" = ");
            self.expr(&join.right);
            self.push(")");
        }
        if plan.where_tree != Predicate::True {
            self.push(" WHERE ");
            self.predicate(plan, &plan.where_tree);
        }
        if !plan.group_by.is_empty() {
            self.push(" GROUP BY ");
            for (i, expr) in plan.group_by.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.expr(expr);
            }
        }
        if !plan.order_terms.is_empty() {
            self.push(" ORDER BY ");
            for (i, term) in plan.order_terms.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.expr(&term.expr);
                if term.descending {
                    self.push(" DESC");
                }
                match term.nulls {
                    Some(NullsOrder::First) => self.push(" NULLS FIRST"),
                    Some(NullsOrder::Last) => self.push(" NULLS LAST"),
                    None => {}
                }
            }
        }
        match (plan.limit, plan.offset) {
            (Some(limit), offset) => {
                let _ = write!(self.sql, " LIMIT {limit}");
                if let Some(offset) = offset {
                    let _ = write!(self.sql, " OFFSET {offset}");
                }
            }
            (None, Some(offset)) => {
                let _ = write!(self.sql, " LIMIT -1 OFFSET {offset}");
            }
            (None, None) => {}
        }
    }

    fn select_item(&mut self, item: &SelectItem) {
        match &item.expr {
            SelectExpr::Expr(expr) => self.expr(expr),
            SelectExpr::One => self.push("1"),
            SelectExpr::CountStar => self.push("COUNT(*)"),
            SelectExpr::Aggregate { func, expr } => {
                let (open, close) = match func {
                    AggregateFunc::Sum => ("SUM(", ")"),
                    AggregateFunc::Avg => ("AVG(", ")"),
                    AggregateFunc::Min | AggregateFunc::BoolAnd => ("MIN(", ")"),
                    AggregateFunc::Max | AggregateFunc::BoolOr => ("MAX(", ")"),
                    AggregateFunc::Count => ("COUNT(", ")"),
                    AggregateFunc::CountDistinct => ("COUNT(DISTINCT ", ")"),
                };
                self.push(open);
                self.expr(expr);
                self.push(close);
            }
        }
        if let Some(alias) = &item.alias {
            let _ = write!(self.sql, " AS {}", quote(alias));
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Column { alias, column } => {
                let _ = write!(self.sql, "{}.{}", quote(alias), quote(column));
            }
            Expr::JsonKey { alias, column, key } => {
                let _ = write!(
                    self.sql,
                    "json_extract({}.{}, '$.{key}')",
                    quote(alias),
                    quote(column)
                );
            }
            Expr::Translated { alias, column, lang } => {
                let col = format!("{}.{}", quote(alias), quote(column));
                if lang == "en_US" {
                    let _ = write!(self.sql, "json_extract({col}, '$.en_US')");
                } else {
                    let _ = write!(
                        self.sql,
                        "COALESCE(json_extract({col}, '$.{lang}'), json_extract({col}, '$.en_US'))"
                    );
                }
            }
            Expr::Output(name) => self.push(&quote(name)),
        }
    }

    fn predicate(&mut self, plan: &QueryPlan, predicate: &Predicate) {
        match predicate {
            Predicate::True => self.push("TRUE"),
            Predicate::False => self.push("FALSE"),
            Predicate::And(parts) | Predicate::Or(parts) => {
                let sep = if matches!(predicate, Predicate::And(_)) { " AND " } else { " OR " };
                self.push("(");
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        self.push(sep);
                    }
                    self.predicate(plan, part);
                }
                self.push(")");
            }
            Predicate::NotTrue(inner) => {
                let wrapped = !matches!(**inner, Predicate::And(_) | Predicate::Or(_));
                if wrapped {
                    self.push("(");
                }
                self.predicate(plan, inner);
                if wrapped {
                    self.push(")");
                }
                self.push(" IS NOT TRUE");
            }
            Predicate::Compare {
                expr,
                op,
                value,
                fold_case,
            } => {
                if *fold_case {
                    self.push("LOWER(");
                    self.expr(expr);
                    let _ = write!(self.sql, ") {} LOWER(", op.as_sql());
                    self.bind(value);
                    self.push(")");
                } else {
                    self.expr(expr);
                    let _ = write!(self.sql, " {} ", op.as_sql());
                    self.bind(value);
                }
            }
            Predicate::InList {
                expr,
                values,
                negated,
            } => {
                self.expr(expr);
                self.push(if *negated { " NOT IN (" } else { " IN (" });
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.bind(value);
                }
                self.push(")");
            }
            Predicate::IsNull(expr) => {
                self.expr(expr);
                self.push(" IS NULL");
            }
            Predicate::IsNotNull(expr) => {
                self.expr(expr);
                self.push(" IS NOT NULL");
            }
            Predicate::InSubquery {
                expr,
                subquery,
                negated,
            } => {
                self.expr(expr);
                self.push(if *negated { " NOT IN (" } else { " IN (" });
                match plan.subquery(*subquery) {
                    Some(sub) => self.plan(&sub.plan),
                    None => self.push("SELECT NULL WHERE FALSE"),
                }
                self.push(")");
            }
            Predicate::Exists { subquery, negated } => {
                self.push(if *negated { "NOT EXISTS (" } else { "EXISTS (" });
                match plan.subquery(*subquery) {
                    Some(sub) => self.plan(&sub.plan),
                    None => self.push("SELECT 1 WHERE FALSE"),
                }
                self.push(")");
            }
            Predicate::ColumnsEqual(left, right) => {
                self.expr(left);
                self.push(" = ");
                self.expr(right);
            }
            Predicate::InHierarchy(hierarchy) => self.hierarchy(hierarchy),
        }
    }

    /// Recursive CTE walking the parent column from the seed rows. `UNION`
    /// drops revisited rows, so cycles terminate.
    fn hierarchy(&mut self, hierarchy: &Hierarchy) {
        let table = quote(&hierarchy.table);
        let parent = quote(&hierarchy.parent_column);
        self.expr(&hierarchy.expr);
        let _ = write!(
            self.sql,
            r#" IN (WITH RECURSIVE "_hierarchy"("id") AS (SELECT "id" FROM {table} WHERE "#
        );
        let mut seeds = 0;
        if !hierarchy.ids.is_empty() {
            self.push(r#""id" IN ("#);
            for (i, id) in hierarchy.ids.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.bind(id);
            }
            self.push(")");
            seeds += 1;
        }
        for name in &hierarchy.names {
            if seeds > 0 {
                self.push(" OR ");
            }
            let _ = write!(self.sql, "LOWER({}) LIKE LOWER(", quote(&hierarchy.name_column));
            self.bind(name);
            self.push(")");
            seeds += 1;
        }
        if seeds == 0 {
            self.push("FALSE");
        }
        if hierarchy.descend {
            let _ = write!(
                self.sql,
                r#" UNION SELECT "_node"."id" FROM {table} AS "_node" JOIN "_hierarchy" ON "_node".{parent} = "_hierarchy"."id""#
            );
        } else {
            let _ = write!(
                self.sql,
                r#" UNION SELECT "_node".{parent} FROM {table} AS "_node" JOIN "_hierarchy" ON "_node"."id" = "_hierarchy"."id" WHERE "_node".{parent} IS NOT NULL"#
            );
        }
        self.push(r#") SELECT "id" FROM "_hierarchy")"#);
    }
}
