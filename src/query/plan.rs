//! Relational query plan built by the compiler and serialized by the emitter.
//!
//! Plans are recursive: every correlated subquery is itself a [`QueryPlan`]
//! owned by the plan whose WHERE tree references it through a [`SubqueryId`].

use smallvec::SmallVec;
use xxhash_rust::xxh64::Xxh64;

use crate::query::errors::DomainError;
use crate::query::value::Value;

/// Join path signature: the root table followed by the traversed field names.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AliasKey(SmallVec<[String; 4]>);

impl AliasKey {
    /// Key of a root table.
    pub fn root(table: &str) -> Self {
        let mut segments = SmallVec::new();
        segments.push(table.to_owned());
        AliasKey(segments)
    }

    /// Key one hop further through `field`.
    pub fn child(&self, field: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(field.to_owned());
        AliasKey(segments)
    }

    /// Root table followed by field names.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// SQL alias derived from the signature (`sale_order__partner_id`).
    /// Names longer than `max_len` keep a prefix and append a hash of the full
    /// signature.
    pub fn alias_name(&self, max_len: usize) -> String {
        let joined = self.0.join("__");
        if joined.len() <= max_len {
            return joined;
        }
        let mut hasher = Xxh64::new(0);
        hasher.update(joined.as_bytes());
        let suffix = format!("{:016x}", hasher.digest());
        let mut keep = max_len.saturating_sub(suffix.len() + 1);
        while !joined.is_char_boundary(keep) {
            keep -= 1;
        }
        format!("{}_{suffix}", &joined[..keep])
    }
}

/// Table reference with its alias.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableRef {
    /// Table name.
    pub table: String,
    /// Alias used everywhere in the statement.
    pub alias: String,
}

/// Scalar SQL expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    /// `"alias"."column"`.
    Column {
        /// Table alias.
        alias: String,
        /// Column name.
        column: String,
    },
    /// `json_extract("alias"."column", '$.key')`; `key` is an identifier.
    JsonKey {
        /// Table alias.
        alias: String,
        /// JSON column.
        column: String,
        /// Object key.
        key: String,
    },
    /// Translated value with an `en_US` fallback.
    Translated {
        /// Table alias.
        alias: String,
        /// JSON column keyed by language.
        column: String,
        /// Requested language code.
        lang: String,
    },
    /// Reference to an output column of the SELECT list.
    Output(String),
}

impl Expr {
    /// `"alias"."column"`.
    pub fn column(alias: &str, column: &str) -> Self {
        Expr::Column {
            alias: alias.to_owned(),
            column: column.to_owned(),
        }
    }
}

/// Binary comparison operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    /// `=`
    Eq,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `LIKE`
    Like,
    /// `NOT LIKE`
    NotLike,
}

impl CmpOp {
    /// SQL spelling.
    pub fn as_sql(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Like => "LIKE",
            CmpOp::NotLike => "NOT LIKE",
        }
    }
}

/// Index of a subquery inside the plan that owns the predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubqueryId(pub usize);

/// WHERE tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    /// `TRUE`
    True,
    /// `FALSE`
    False,
    /// Conjunction.
    And(Vec<Predicate>),
    /// Disjunction.
    Or(Vec<Predicate>),
    /// `(p) IS NOT TRUE`: true when `p` is false or NULL.
    NotTrue(Box<Predicate>),
    /// `expr op ?`, with `LOWER()` on both sides when `fold_case` is set.
    Compare {
        /// Left-hand side.
        expr: Expr,
        /// Operator.
        op: CmpOp,
        /// Bound parameter.
        value: Value,
        /// Case-insensitive comparison.
        fold_case: bool,
    },
    /// `expr [NOT] IN (?, ...)`.
    InList {
        /// Left-hand side.
        expr: Expr,
        /// Bound parameters; never empty.
        values: Vec<Value>,
        /// `NOT IN`.
        negated: bool,
    },
    /// `expr IS NULL`.
    IsNull(Expr),
    /// `expr IS NOT NULL`.
    IsNotNull(Expr),
    /// `expr [NOT] IN (SELECT ...)`.
    InSubquery {
        /// Left-hand side.
        expr: Expr,
        /// Subquery of the owning plan.
        subquery: SubqueryId,
        /// `NOT IN`.
        negated: bool,
    },
    /// `[NOT] EXISTS (SELECT ...)`.
    Exists {
        /// Subquery of the owning plan.
        subquery: SubqueryId,
        /// `NOT EXISTS`.
        negated: bool,
    },
    /// `left = right`, used for correlation.
    ColumnsEqual(Expr, Expr),
    /// `expr IN (WITH RECURSIVE ...)` over a self-referencing table.
    InHierarchy(Box<Hierarchy>),
}

/// Transitive closure of a parent relation, seeded by ids or names.
#[derive(Clone, Debug, PartialEq)]
pub struct Hierarchy {
    /// Compared id expression of the outer scope.
    pub expr: Expr,
    /// Table holding the hierarchy.
    pub table: String,
    /// Column pointing at the parent row.
    pub parent_column: String,
    /// Seed record ids.
    pub ids: Vec<Value>,
    /// Column matched against `names`.
    pub name_column: String,
    /// `LIKE` patterns selecting further seeds, case-insensitively.
    pub names: Vec<Value>,
    /// Walk towards children (`child_of`) rather than parents.
    pub descend: bool,
}

impl Predicate {
    /// Conjunction folding constants and nested conjunctions.
    pub fn and(parts: Vec<Predicate>) -> Predicate {
        let mut out = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Predicate::True => {}
                Predicate::False => return Predicate::False,
                Predicate::And(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Predicate::True,
            1 => out.pop().unwrap_or(Predicate::True),
            _ => Predicate::And(out),
        }
    }

    /// Disjunction folding constants and nested disjunctions.
    pub fn or(parts: Vec<Predicate>) -> Predicate {
        let mut out = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Predicate::False => {}
                Predicate::True => return Predicate::True,
                Predicate::Or(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Predicate::False,
            1 => out.pop().unwrap_or(Predicate::False),
            _ => Predicate::Or(out),
        }
    }

    /// NULL-aware negation.
    pub fn not_true(inner: Predicate) -> Predicate {
        match inner {
            Predicate::True => Predicate::False,
            Predicate::False => Predicate::True,
            Predicate::NotTrue(p) if is_two_valued(&p) => *p,
            other => Predicate::NotTrue(Box::new(other)),
        }
    }
}

fn is_two_valued(p: &Predicate) -> bool {
    matches!(
        p,
        Predicate::IsNull(_)
            | Predicate::IsNotNull(_)
            | Predicate::Exists { .. }
            | Predicate::InHierarchy(_)
            | Predicate::True
            | Predicate::False
    )
}

/// Aggregate functions of `read_group`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregateFunc {
    /// `SUM`
    Sum,
    /// `AVG`
    Avg,
    /// `MIN`
    Min,
    /// `MAX`
    Max,
    /// `COUNT(expr)`
    Count,
    /// `COUNT(DISTINCT expr)`
    CountDistinct,
    /// All values true.
    BoolAnd,
    /// Any value true.
    BoolOr,
}

impl AggregateFunc {
    /// Parses the `func` part of `field:func`.
    pub fn parse(spec: &str, func: &str) -> Result<Self, DomainError> {
        Ok(match func {
            "sum" => AggregateFunc::Sum,
            "avg" => AggregateFunc::Avg,
            "min" => AggregateFunc::Min,
            "max" => AggregateFunc::Max,
            "count" => AggregateFunc::Count,
            "count_distinct" => AggregateFunc::CountDistinct,
            "bool_and" => AggregateFunc::BoolAnd,
            "bool_or" => AggregateFunc::BoolOr,
            _ => {
                return Err(DomainError::InvalidAggregate {
                    spec: spec.to_owned(),
                })
            }
        })
    }
}

/// Projected expression.
#[derive(Clone, Debug, PartialEq)]
pub enum SelectExpr {
    /// Plain expression.
    Expr(Expr),
    /// Literal `1` for EXISTS subqueries.
    One,
    /// `COUNT(*)`.
    CountStar,
    /// Aggregate over an expression.
    Aggregate {
        /// Function.
        func: AggregateFunc,
        /// Argument.
        expr: Expr,
    },
}

/// One entry of the SELECT list.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectItem {
    /// Projected expression.
    pub expr: SelectExpr,
    /// Output name (`AS "..."`).
    pub alias: Option<String>,
}

impl SelectItem {
    /// Unnamed expression.
    pub fn expr(expr: Expr) -> Self {
        Self {
            expr: SelectExpr::Expr(expr),
            alias: None,
        }
    }

    /// Named projection.
    pub fn named(expr: SelectExpr, alias: impl Into<String>) -> Self {
        Self {
            expr,
            alias: Some(alias.into()),
        }
    }
}

/// NULL placement in ORDER BY.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NullsOrder {
    /// `NULLS FIRST`
    First,
    /// `NULLS LAST`
    Last,
}

/// One ORDER BY term.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderTerm {
    /// Sorted expression.
    pub expr: Expr,
    /// `DESC`.
    pub descending: bool,
    /// Explicit NULL placement.
    pub nulls: Option<NullsOrder>,
}

/// `LEFT JOIN table AS alias ON left = right`.
#[derive(Clone, Debug, PartialEq)]
pub struct Join {
    /// Path signature the alias was derived from.
    pub key: AliasKey,
    /// Joined model.
    pub model: String,
    /// Joined table and alias.
    pub table: TableRef,
    /// Foreign key on the parent alias.
    pub left: Expr,
    /// Primary key on the joined alias.
    pub right: Expr,
}

/// Correlated subquery owned by a plan.
#[derive(Clone, Debug, PartialEq)]
pub struct Subquery {
    /// Path signature of the hop that produced it.
    pub key: AliasKey,
    /// The nested plan.
    pub plan: QueryPlan,
}

/// SELECT statement under construction.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryPlan {
    /// Model of the base table; `None` for many2many link tables.
    pub model: Option<String>,
    /// Path signature of the base table.
    pub key: AliasKey,
    /// Base table.
    pub base: TableRef,
    /// SELECT list.
    pub select: Vec<SelectItem>,
    /// LEFT JOINs in first-encountered (dependency) order.
    pub joins: Vec<Join>,
    /// WHERE tree.
    pub where_tree: Predicate,
    /// GROUP BY expressions.
    pub group_by: Vec<Expr>,
    /// ORDER BY terms.
    pub order_terms: Vec<OrderTerm>,
    /// Subqueries referenced from `where_tree`.
    pub subqueries: Vec<Subquery>,
    /// LIMIT.
    pub limit: Option<u64>,
    /// OFFSET.
    pub offset: Option<u64>,
}

impl QueryPlan {
    /// Empty plan over `base`.
    pub fn new(model: Option<String>, key: AliasKey, base: TableRef) -> Self {
        Self {
            model,
            key,
            base,
            select: Vec::new(),
            joins: Vec::new(),
            where_tree: Predicate::True,
            group_by: Vec::new(),
            order_terms: Vec::new(),
            subqueries: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Existing join for a path signature.
    pub fn join_for(&self, key: &AliasKey) -> Option<&Join> {
        self.joins.iter().find(|join| &join.key == key)
    }

    /// Registers a subquery and returns its handle.
    pub fn add_subquery(&mut self, key: AliasKey, plan: QueryPlan) -> SubqueryId {
        self.subqueries.push(Subquery { key, plan });
        SubqueryId(self.subqueries.len() - 1)
    }

    /// Resolves a subquery handle.
    pub fn subquery(&self, id: SubqueryId) -> Option<&Subquery> {
        self.subqueries.get(id.0)
    }

    /// Total number of subqueries, nested ones included.
    pub fn subquery_count(&self) -> usize {
        self.subqueries
            .iter()
            .map(|sub| 1 + sub.plan.subquery_count())
            .sum()
    }

    /// Total number of joins, including those inside subqueries.
    pub fn join_count(&self) -> usize {
        self.joins.len()
            + self
                .subqueries
                .iter()
                .map(|sub| sub.plan.join_count())
                .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_names_follow_the_path() {
        let key = AliasKey::root("sale_order").child("partner_id").child("country_id");
        assert_eq!(key.alias_name(63), "sale_order__partner_id__country_id");
    }

    #[test]
    fn long_aliases_are_hashed_deterministically() {
        let mut key = AliasKey::root("sale_order");
        for _ in 0..8 {
            key = key.child("partner_id");
        }
        let alias = key.alias_name(63);
        assert!(alias.len() <= 63);
        assert_eq!(alias, key.alias_name(63));
        assert!(alias.starts_with("sale_order__partner_id"));
        let other = AliasKey::root("sale_order").child("x".repeat(80).as_str());
        assert_ne!(other.alias_name(63), alias);
    }

    #[test]
    fn predicate_helpers_fold_constants() {
        let leaf = Predicate::IsNull(Expr::column("t", "a"));
        assert_eq!(Predicate::and(vec![Predicate::True, leaf.clone()]), leaf);
        assert_eq!(Predicate::and(vec![Predicate::False, leaf.clone()]), Predicate::False);
        assert_eq!(Predicate::or(vec![Predicate::False, leaf.clone()]), leaf);
        assert_eq!(Predicate::or(vec![]), Predicate::False);
        assert_eq!(Predicate::not_true(Predicate::True), Predicate::False);
        assert_eq!(
            Predicate::not_true(Predicate::not_true(leaf.clone())),
            leaf
        );
    }
}
