#![allow(missing_docs)]

mod support;

use std::sync::Arc;

use ormql::{AccessContext, Domain, Operator, Principal, RowRule, RuleSet, SqliteBackend, Transaction};
use support::{engine_with_backend, seed, Seed};

fn session(access: AccessContext) -> (Transaction<SqliteBackend>, Seed) {
    let (engine, backend) = engine_with_backend();
    let mut tx = engine.begin(backend, AccessContext::superuser()).expect("begin");
    let seeded = seed(&mut tx);
    let backend = tx.commit().expect("commit");
    let tx = engine.begin(backend, access).expect("begin");
    (tx, seeded)
}

fn user(rules: RuleSet) -> AccessContext {
    AccessContext::new(Principal::user(42), Arc::new(rules))
}

#[test]
fn unchecked_hops_skip_target_rules() {
    let rules = RuleSet::new().with_rule(RowRule::global("oslo partners", "res.partner", Domain::eq("city", "Oslo")));
    let (mut tx, seed) = session(user(rules));
    let o = &seed.orders;
    let name_has_j = Domain::cond("name", Operator::Like, "J");

    let checked = tx
        .search("sale.order", &Domain::any("partner_id", name_has_j.clone()))
        .expect("search");
    assert_eq!(checked, vec![o[0], o[1]], "Jill is hidden by the partner rule");

    let unchecked = tx
        .search("sale.order", &Domain::any_unchecked("partner_id", name_has_j))
        .expect("search");
    assert_eq!(unchecked, vec![o[0], o[1], o[2]]);

    let partners = tx.search("res.partner", &Domain::all()).expect("search");
    assert_eq!(partners, vec![seed.jack]);
}

#[test]
fn global_and_group_rules_combine() {
    let rules = RuleSet::new()
        .with_rule(RowRule::global("drafts", "sale.order", Domain::eq("state", "draft")))
        .with_rule(RowRule::for_groups(
            "small",
            "sale.order",
            Domain::cond("amount", Operator::Lt, 20),
            ["sales.user"],
        ))
        .with_rule(RowRule::for_groups(
            "large",
            "sale.order",
            Domain::cond("amount", Operator::Gt, 30),
            ["sales.manager"],
        ));

    let (mut tx, seed) = session(user(rules.clone()));
    let o = &seed.orders;
    assert_eq!(tx.search("sale.order", &Domain::all()).expect("search"), vec![o[0], o[3]]);

    let clerk = AccessContext::new(Principal::user(42).with_groups(["sales.user"]), Arc::new(rules.clone()));
    let (mut tx, _) = session(clerk);
    assert_eq!(tx.search("sale.order", &Domain::all()).expect("search"), vec![o[0]]);

    let both = AccessContext::new(
        Principal::user(42).with_groups(["sales.user", "sales.manager"]),
        Arc::new(rules),
    );
    let (mut tx, _) = session(both);
    assert_eq!(tx.search("sale.order", &Domain::all()).expect("search"), vec![o[0], o[3]]);
}

#[test]
fn rules_bind_the_acting_user() {
    let rules = RuleSet::from_toml_str(
        r#"
        [[rules]]
        name = "own orders"
        model = "sale.order"
        domain = '[["partner_id", "=", "$uid"]]'
        "#,
    )
    .expect("rules");
    let (engine, backend) = engine_with_backend();
    let mut tx = engine.begin(backend, AccessContext::superuser()).expect("begin");
    let seeded = seed(&mut tx);
    let backend = tx.commit().expect("commit");

    let access = AccessContext::new(Principal::user(seeded.jill), Arc::new(rules));
    let mut tx = engine.begin(backend, access).expect("begin");
    assert_eq!(tx.search("sale.order", &Domain::all()).expect("search"), vec![seeded.orders[2]]);
}

#[test]
fn restricted_fields_are_denied() {
    let (mut tx, _) = session(user(RuleSet::new()));
    let err = tx
        .search("sale.order", &Domain::eq("partner_id.secret", "x"))
        .expect_err("denied");
    assert_eq!(err.as_domain().map(|e| e.code()), Some("AccessDenied"));
    let err = tx.read("res.partner", &[1], &["secret"]).expect_err("denied");
    assert_eq!(err.as_domain().map(|e| e.code()), Some("AccessDenied"));

    let admin = AccessContext::new(
        Principal::user(42).with_groups(["base.group_system"]),
        Arc::new(RuleSet::new()),
    );
    let (mut tx, _) = session(admin);
    assert!(tx.search("sale.order", &Domain::eq("partner_id.secret", "x")).expect("search").is_empty());
}

#[test]
fn superuser_ignores_rules_and_groups() {
    let rules = RuleSet::new().with_rule(RowRule::global("nothing", "sale.order", Domain::none()));
    let (mut tx, seed) = session(user(rules.clone()));
    assert!(tx.search("sale.order", &Domain::all()).expect("search").is_empty());

    let root = AccessContext::new(Principal::superuser(), Arc::new(rules));
    let (mut tx, _) = session(root);
    let all = tx.search("sale.order", &Domain::eq("partner_id.secret", false)).expect("search");
    assert_eq!(all, seed.orders[..3].to_vec());
}
