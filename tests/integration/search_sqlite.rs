#![allow(missing_docs)]

mod support;

use ormql::{AccessContext, Domain, Engine, EngineOptions, Operator, SearchOptions, SqliteBackend, Value};
use support::{sales_registry, seed, superuser_tx};
use tempfile::TempDir;

#[test]
fn searches_through_relations() {
    let (mut tx, seed) = superuser_tx();
    let o = &seed.orders;

    let jack = tx
        .search("sale.order", &Domain::cond("partner_id.name", Operator::ILike, "JACK"))
        .expect("search");
    assert_eq!(jack, vec![o[0], o[1]]);

    let not_jack = tx
        .search("sale.order", &Domain::not_any("partner_id", Domain::eq("name", "Jack")))
        .expect("search");
    assert_eq!(not_jack, vec![o[2], o[3]], "unset partners match the negation");

    let via_join = tx
        .search(
            "sale.order",
            &Domain::any_unchecked("partner_id", Domain::eq("city", "Bergen")),
        )
        .expect("search");
    assert_eq!(via_join, vec![o[2]]);

    let unset = tx.search("sale.order", &Domain::eq("partner_id", Value::Null)).expect("search");
    assert_eq!(unset, vec![o[3]]);
}

#[test]
fn one2many_and_many2many_conditions() {
    let (mut tx, seed) = superuser_tx();
    let o = &seed.orders;
    tx.create(
        "sale.order.line",
        &[("order_id", Value::Int(o[0])), ("product", Value::from("desk")), ("qty", Value::Int(4))],
    )
    .expect("line");
    tx.create(
        "sale.order.line",
        &[("order_id", Value::Int(o[0])), ("product", Value::from("lamp")), ("qty", Value::Int(1))],
    )
    .expect("line");
    tx.create(
        "sale.order.line",
        &[("order_id", Value::Int(o[2])), ("product", Value::from("lamp")), ("qty", Value::Int(2))],
    )
    .expect("line");
    let urgent = tx.create("sale.tag", &[("name", Value::from("urgent"))]).expect("tag");
    tx.write("sale.order", &[o[1], o[2]], &[("tag_ids", Value::Ids(vec![urgent]))])
        .expect("write tags");

    let lamps = tx
        .search("sale.order", &Domain::eq("line_ids.product", "lamp"))
        .expect("search");
    assert_eq!(lamps, vec![o[0], o[2]], "each order appears once");

    let tagged = tx.search("sale.order", &Domain::eq("tag_ids.name", "urgent")).expect("search");
    assert_eq!(tagged, vec![o[1], o[2]]);

    let untagged = tx
        .search("sale.order", &Domain::cond("tag_ids", Operator::In, vec![Value::Null]))
        .expect("search");
    assert_eq!(untagged, vec![o[0], o[3]]);

    let rows = tx.read("sale.order", &[o[0]], &["line_ids", "tag_ids"]).expect("read");
    assert_eq!(rows[0]["tag_ids"], Value::Ids(vec![]));
    match &rows[0]["line_ids"] {
        Value::Ids(ids) => assert_eq!(ids.len(), 2),
        other => panic!("expected ids, got {other:?}"),
    }
}

#[test]
fn negations_match_empty_and_null_rows() {
    let (mut tx, seed) = superuser_tx();
    let o = &seed.orders;
    tx.create("sale.order.line", &[("order_id", Value::Int(o[0])), ("product", Value::from("desk"))])
        .expect("line");
    tx.create("sale.order.line", &[("order_id", Value::Int(o[2])), ("product", Value::from("lamp"))])
        .expect("line");

    let without_desk = tx
        .search("sale.order", &!Domain::eq("line_ids.product", "desk"))
        .expect("search");
    assert_eq!(without_desk, vec![o[1], o[2], o[3]], "orders without lines match");
    let neither = tx
        .search(
            "sale.order",
            &(Domain::not_any("line_ids", Domain::eq("product", "desk"))
                & Domain::not_any("line_ids", Domain::eq("product", "lamp"))),
        )
        .expect("search");
    assert_eq!(neither, vec![o[1], o[3]]);

    tx.write("sale.order", &[o[3]], &[("amount", Value::Null)]).expect("write");
    let small = tx
        .search("sale.order", &!Domain::cond("amount", Operator::Gt, 15))
        .expect("search");
    assert_eq!(small, vec![o[0], o[3]], "NULL amounts are not greater than 15");
    let large = tx
        .search("sale.order", &Domain::cond("amount", Operator::Gt, 15))
        .expect("search");
    assert_eq!(large, vec![o[1], o[2]]);
}

#[test]
fn hierarchies_walk_both_ways_and_stop_on_cycles() {
    let (mut tx, seed) = superuser_tx();
    let o = &seed.orders;
    let mut category = |name: &str, parent: Value| {
        tx.create("product.category", &[("name", Value::from(name)), ("parent_id", parent)])
            .expect("category")
    };
    let all = category("All", Value::Null);
    let office = category("Office", Value::Int(all));
    let desks = category("Desks", Value::Int(office));
    let garden = category("Garden", Value::Int(all));
    for (order, categ) in [(o[0], desks), (o[1], office), (o[2], garden)] {
        tx.create("sale.order.line", &[("order_id", Value::Int(order)), ("categ_id", Value::Int(categ))])
            .expect("line");
    }

    let mut search = |domain: Domain| tx.search("product.category", &domain).expect("search");
    assert_eq!(search(Domain::cond("id", Operator::ChildOf, office)), vec![office, desks]);
    assert_eq!(search(Domain::cond("parent_id", Operator::ParentOf, desks)), vec![all, office, desks]);
    assert_eq!(search(Domain::cond("id", Operator::ChildOf, "gard")), vec![garden]);
    assert_eq!(search(!Domain::cond("id", Operator::ChildOf, office)), vec![all, garden]);
    assert!(search(Domain::cond("id", Operator::ChildOf, false)).is_empty());

    let office_orders = tx
        .search("sale.order", &Domain::cond("line_ids.categ_id", Operator::ChildOf, office))
        .expect("search");
    assert_eq!(office_orders, vec![o[0], o[1]]);

    tx.write("product.category", &[all], &[("parent_id", Value::Int(desks))])
        .expect("close the loop");
    let looped = tx
        .search("product.category", &Domain::cond("id", Operator::ChildOf, office))
        .expect("search");
    assert_eq!(looped, vec![all, office, desks, garden]);
}

#[test]
fn optional_equality_skips_unset_values() {
    let (mut tx, seed) = superuser_tx();
    let o = &seed.orders;
    let any_state = tx
        .search("sale.order", &Domain::cond("state", Operator::EqIfSet, false))
        .expect("search");
    assert_eq!(any_state, o.clone());
    let drafts = tx
        .search(
            "sale.order",
            &(Domain::cond("state", Operator::EqIfSet, "draft") & Domain::cond("partner_id", Operator::EqIfSet, 0)),
        )
        .expect("search");
    assert_eq!(drafts, vec![o[0], o[3]]);
}

#[test]
fn order_limit_and_offset() {
    let (mut tx, seed) = superuser_tx();
    let o = &seed.orders;
    let page = tx
        .search_with(
            "sale.order",
            &Domain::all(),
            &SearchOptions::default().order("amount desc").limit(2).offset(1),
        )
        .expect("search");
    assert_eq!(page, vec![o[2], o[1]]);

    let by_partner = tx
        .search_with(
            "sale.order",
            &Domain::cond("partner_id", Operator::NotIn, vec![Value::Null]),
            &SearchOptions::default().order("partner_id, id desc"),
        )
        .expect("search");
    assert_eq!(by_partner, vec![o[1], o[0], o[2]], "ordered by the partner's name");
}

#[test]
fn read_group_counts_and_sums() {
    let (mut tx, _seed) = superuser_tx();
    let groups = tx
        .read_group("sale.order", &Domain::all(), &["state"], &["amount:sum"], Some("state"))
        .expect("read_group");
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0]["state"], Value::from("done"));
    assert_eq!(groups[0]["__count"], Value::Int(2));
    assert_eq!(groups[0]["amount:sum"], Value::Float(50.0));
    assert_eq!(groups[1]["state"], Value::from("draft"));
    assert_eq!(groups[1]["amount:sum"], Value::Float(50.0));

    let filtered = tx
        .read_group(
            "sale.order",
            &Domain::cond("partner_id.name", Operator::Like, "J"),
            &["partner_id"],
            &["amount:max"],
            None,
        )
        .expect("read_group");
    assert_eq!(filtered.len(), 2);

    let by_max = tx
        .read_group(
            "sale.order",
            &Domain::all(),
            &["partner_id"],
            &["amount:max"],
            Some("amount:max desc"),
        )
        .expect("read_group");
    let maxima: Vec<Value> = by_max.iter().map(|g| g["amount:max"].clone()).collect();
    assert_eq!(maxima, vec![Value::Float(40.0), Value::Float(30.0), Value::Float(20.0)]);

    let err = tx
        .read_group("sale.order", &Domain::all(), &["state"], &["amount:median"], None)
        .expect_err("unknown aggregate");
    assert_eq!(err.as_domain().map(|e| e.code()), Some("InvalidAggregate"));
}

#[test]
fn committed_data_survives_reopen() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("sales.db");
    let engine = Engine::new(sales_registry(), EngineOptions::default());

    let mut backend = SqliteBackend::open(&path, engine.options()).expect("open");
    backend.create_schema(engine.registry()).expect("schema");
    let mut tx = engine.begin(backend, AccessContext::superuser()).expect("begin");
    let seeded = seed(&mut tx);
    tx.write("res.partner", &[seeded.jill], &[("city", Value::from("Oslo"))])
        .expect("write");
    drop(tx.commit().expect("commit"));

    let backend = SqliteBackend::open(&path, engine.options()).expect("reopen");
    let mut tx = engine.begin(backend, AccessContext::superuser()).expect("begin");
    let oslo = tx.search("res.partner", &Domain::eq("city", "Oslo")).expect("search");
    assert_eq!(oslo, vec![seeded.jack, seeded.jill]);
    let nobody = tx.search("res.partner", &Domain::eq("city", false)).expect("search");
    assert_eq!(nobody, vec![seeded.nobody]);
}
