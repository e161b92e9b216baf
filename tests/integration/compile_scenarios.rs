#![allow(missing_docs)]

mod support;

use std::sync::Arc;

use ormql::query::normalize;
use ormql::{AccessContext, Domain, Engine, EngineOptions, Operator, Principal, RowRule, RuleSet, SearchOptions, Value};
use proptest::prelude::*;
use support::sales_registry;

fn engine() -> Engine {
    Engine::new(sales_registry(), EngineOptions::default())
}

fn partner_rules() -> AccessContext {
    let rules = RuleSet::new().with_rule(RowRule::global("oslo only", "res.partner", Domain::eq("city", "Oslo")));
    AccessContext::new(Principal::user(7), Arc::new(rules))
}

fn sql_of(engine: &Engine, access: &AccessContext, model: &str, domain: &Domain) -> (String, Vec<Value>) {
    let compiled = engine
        .compile(access, model, domain, &SearchOptions::default(), None)
        .expect("compile");
    let statement = compiled.statement();
    (statement.sql, statement.params)
}

#[test]
fn unchecked_relation_compiles_to_a_guarded_join() {
    let engine = engine();
    let domain = Domain::cond("invoice_partner_id.name", Operator::Like, "jack");
    let (sql, params) = sql_of(&engine, &partner_rules(), "sale.order", &domain);

    assert!(sql.contains(
        r#"LEFT JOIN "res_partner" AS "sale_order__invoice_partner_id" ON ("sale_order"."invoice_partner_id" = "sale_order__invoice_partner_id"."id")"#
    ));
    assert!(sql.contains(r#""sale_order__invoice_partner_id"."id" IS NOT NULL"#));
    assert!(sql.contains(r#""sale_order__invoice_partner_id"."name" LIKE ?"#));
    assert!(!sql.contains("Oslo"), "rules never apply to a bypass join: {sql}");
    assert_eq!(params, vec![Value::from("%jack%")]);

    let strict = Domain::any_unchecked("partner_id", Domain::cond("name", Operator::Like, "jack"));
    let (sql, params) = sql_of(&engine, &partner_rules(), "sale.order", &strict);
    assert!(sql.contains(r#"LEFT JOIN "res_partner" AS "sale_order__partner_id""#));
    assert!(sql.contains(r#""sale_order__partner_id"."id" IS NOT NULL"#));
    assert_eq!(params, vec![Value::from("%jack%")]);
}

#[test]
fn ruled_relation_compiles_to_a_subquery_with_the_rule() {
    let engine = engine();
    let domain = Domain::cond("partner_id.name", Operator::Like, "jack");
    let (sql, params) = sql_of(&engine, &partner_rules(), "sale.order", &domain);

    assert!(!sql.contains("JOIN"), "{sql}");
    assert!(sql.contains(
        r#""sale_order"."partner_id" IN (SELECT "sale_order__partner_id"."id" FROM "res_partner" AS "sale_order__partner_id" WHERE "#
    ));
    assert!(sql.contains(r#""sale_order__partner_id"."name" LIKE ?"#));
    assert!(sql.contains(r#""sale_order__partner_id"."city" IN (?)"#));
    assert_eq!(params, vec![Value::from("%jack%"), Value::from("Oslo")]);
}

#[test]
fn repeated_equalities_stay_independent_terms() {
    let engine = engine();
    let domain = Domain::parse(r#"[["name", "=", "x"], ["name", "=", "y"]]"#).expect("parse");
    let (sql, params) = sql_of(&engine, &AccessContext::superuser(), "sale.order", &domain);

    assert_eq!(sql.matches(r#""sale_order"."name" IN (?)"#).count(), 2, "{sql}");
    assert!(sql.contains(" AND "));
    assert_eq!(params, vec![Value::from("x"), Value::from("y")]);
}

#[test]
fn joins_are_reused_across_leaves_on_the_same_path() {
    let engine = engine();
    let domain = Domain::eq("invoice_partner_id.name", "a")
        & (Domain::eq("invoice_partner_id.city", "b") | Domain::eq("invoice_partner_id.city", "c"));
    let (sql, _) = sql_of(&engine, &AccessContext::superuser(), "sale.order", &domain);
    assert_eq!(sql.matches("LEFT JOIN").count(), 1, "{sql}");
}

#[test]
fn negation_is_pushed_down_before_compiling() {
    let engine = engine();
    let access = AccessContext::superuser();
    let negated_or = !(Domain::eq("state", "done") | Domain::eq("name", "x"));
    let conjunction = !Domain::eq("state", "done") & !Domain::eq("name", "x");
    assert_eq!(
        sql_of(&engine, &access, "sale.order", &negated_or),
        sql_of(&engine, &access, "sale.order", &conjunction)
    );
    let (sql, _) = sql_of(&engine, &access, "sale.order", &negated_or);
    assert!(sql.contains(r#""sale_order"."state" NOT IN (?)"#));
    assert!(!sql.contains("NOT ("), "{sql}");
}

#[test]
fn compilation_is_deterministic() {
    let engine = engine();
    let access = partner_rules();
    let domain = Domain::cond("partner_id.name", Operator::ILike, "j")
        | Domain::any("line_ids", Domain::cond("qty", Operator::Gt, 2))
        | Domain::eq("tag_ids.name", "vip");
    let search = SearchOptions::default().order("amount desc").limit(10);
    let first = engine.compile(&access, "sale.order", &domain, &search, None).expect("compile");
    let second = engine.compile(&access, "sale.order", &domain, &search, None).expect("compile");
    assert_eq!(first.statement(), second.statement());
    assert_eq!(first.statement().fingerprint(), second.statement().fingerprint());
    assert_eq!(first.to_flush, second.to_flush);
}

#[test]
fn invalid_domains_report_a_code() {
    let engine = engine();
    let access = AccessContext::superuser();
    let unknown = engine
        .compile(&access, "sale.order", &Domain::eq("nope", 1), &SearchOptions::default(), None)
        .expect_err("unknown field");
    assert_eq!(unknown.as_domain().map(|e| e.code()), Some("UnknownField"));

    let order = engine
        .compile(
            &access,
            "sale.order",
            &Domain::all(),
            &SearchOptions::default().order("amount sideways"),
            None,
        )
        .expect_err("bad order");
    assert_eq!(order.as_domain().map(|e| e.code()), Some("InvalidOrder"));
}

fn leaf() -> impl Strategy<Value = Domain> {
    prop_oneof![
        "[a-z]{0,3}".prop_map(|s| Domain::eq("name", s)),
        "[a-z]{1,3}".prop_map(|s| Domain::cond("name", Operator::ILike, s)),
        prop::sample::select(vec!["draft", "done"]).prop_map(|s| Domain::cond("state", Operator::Ne, s)),
        (0i64..100).prop_map(|n| Domain::cond("amount", Operator::Ge, n)),
        "[a-z]{1,3}".prop_map(|s| Domain::cond("partner_id.name", Operator::Like, s)),
        (0i64..5).prop_map(|n| Domain::cond("line_ids.qty", Operator::Lt, n)),
        "[a-z]{1,3}".prop_map(|s| Domain::any_unchecked("invoice_partner_id", Domain::eq("city", s))),
        (1i64..5).prop_map(|n| Domain::cond("line_ids.categ_id", Operator::ChildOf, n)),
        "[a-z]{0,2}".prop_map(|s| Domain::cond("state", Operator::EqIfSet, s)),
    ]
}

fn domain() -> impl Strategy<Value = Domain> {
    leaf().prop_recursive(4, 24, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 1..4).prop_map(Domain::And),
            prop::collection::vec(inner.clone(), 1..4).prop_map(Domain::Or),
            inner.prop_map(|d| !d),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn normalization_is_idempotent(domain in domain()) {
        let registry = sales_registry();
        let once = normalize(&registry, "sale.order", &domain).expect("normalize");
        let twice = normalize(&registry, "sale.order", &once.to_domain()).expect("normalize");
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn parameters_match_placeholders(domain in domain()) {
        let engine = engine();
        let compiled = engine
            .compile(&partner_rules(), "sale.order", &domain, &SearchOptions::default(), None)
            .expect("compile");
        let statement = compiled.statement();
        prop_assert_eq!(statement.sql.matches('?').count(), statement.params.len());
    }
}
