#![allow(missing_docs)]

mod support;

use ormql::{AccessContext, Domain, FieldKey, Operator, OrmError, Value};
use support::{engine_with_backend, superuser_tx};

fn updates(statements: &[ormql::Statement]) -> Vec<String> {
    statements
        .iter()
        .filter(|s| s.sql.starts_with("UPDATE") || s.sql.starts_with("DELETE") || s.sql.starts_with("INSERT"))
        .map(|s| s.sql.clone())
        .collect()
}

#[test]
fn search_flushes_only_what_it_reads() {
    let (mut tx, seed) = superuser_tx();
    let o = &seed.orders;
    tx.write("sale.order", &[o[0], o[1]], &[("amount", Value::from(99.0))]).expect("write");
    tx.write("res.partner", &[seed.jill], &[("name", Value::from("Gill"))]).expect("write");
    tx.backend_mut().record_statements();

    let drafts = tx.search("sale.order", &Domain::eq("state", "draft")).expect("search");
    assert_eq!(drafts, vec![o[0], o[3]]);
    assert!(updates(tx.backend().statements()).is_empty(), "nothing read was dirty");
    assert_eq!(tx.dirty().len(), 2);

    let big = tx
        .search("sale.order", &Domain::cond("amount", Operator::Gt, 50))
        .expect("search");
    assert_eq!(big, vec![o[0], o[1]]);
    let written = updates(&tx.backend_mut().take_statements());
    assert_eq!(written.len(), 1, "one batched statement: {written:?}");
    assert!(written[0].starts_with(r#"UPDATE "sale_order" SET "amount""#));
    assert!(tx.dirty().is_dirty(&FieldKey::new("res.partner", "name")));
    assert!(!tx.dirty().is_dirty(&FieldKey::new("sale.order", "amount")));

    let gill = tx
        .search("sale.order", &Domain::eq("partner_id.name", "Gill"))
        .expect("search");
    assert_eq!(gill, vec![o[2]]);
    assert!(tx.dirty().is_empty());
}

#[test]
fn relational_reads_flush_the_relation() {
    let (mut tx, seed) = superuser_tx();
    let o = &seed.orders;
    let line = tx
        .create("sale.order.line", &[("order_id", Value::Int(o[0])), ("product", Value::from("desk"))])
        .expect("line");
    tx.write("sale.order.line", &[line], &[("order_id", Value::Int(o[3]))]).expect("move line");
    tx.backend_mut().record_statements();

    let with_desk = tx.search("sale.order", &Domain::eq("line_ids.product", "desk")).expect("search");
    assert_eq!(with_desk, vec![o[3]], "the inverse column was flushed first");
    let written = updates(tx.backend().statements());
    assert_eq!(written.len(), 1);
    assert!(written[0].starts_with(r#"UPDATE "sale_order_line" SET "order_id""#));
}

#[test]
fn failed_flush_keeps_the_field_dirty() {
    let (mut tx, seed) = superuser_tx();
    let o = &seed.orders;
    tx.write("sale.order", &[o[2]], &[("name", Value::Null)]).expect("write");

    let err = tx.search("sale.order", &Domain::eq("name", "SO3")).expect_err("NOT NULL");
    match &err {
        OrmError::Flush { model, field, .. } => assert_eq!((model.as_str(), field.as_str()), ("sale.order", "name")),
        other => panic!("expected a flush error, got {other}"),
    }
    assert!(err.is_constraint_violation());
    assert!(tx.dirty().is_record_dirty(&FieldKey::new("sale.order", "name"), o[2]));

    tx.write("sale.order", &[o[2]], &[("name", Value::from("SO3b"))]).expect("fix");
    let found = tx.search("sale.order", &Domain::eq("name", "SO3b")).expect("search");
    assert_eq!(found, vec![o[2]]);
    assert!(tx.dirty().is_empty());
}

#[test]
fn rollback_discards_buffered_writes() {
    let (mut tx, seed) = superuser_tx();
    tx.backend_mut().record_statements();
    tx.write("res.partner", &[seed.jack], &[("city", Value::from("Rome"))]).expect("write");
    let rows = tx.read("res.partner", &[seed.jack], &["city"]).expect("read");
    assert_eq!(rows[0]["city"], Value::from("Rome"));
    let backend = tx.rollback().expect("rollback");
    assert!(updates(backend.statements()).is_empty());
}

#[test]
fn large_flushes_and_reads_are_batched() {
    let (engine, backend) = engine_with_backend();
    let mut tx = engine.begin(backend, AccessContext::superuser()).expect("begin");
    let ids: Vec<i64> = (0..11_000)
        .map(|i| {
            tx.create("sale.order", &[("name", Value::from(format!("SO{i}")))])
                .expect("order")
        })
        .collect();
    tx.write("sale.order", &ids, &[("amount", Value::from(2.0))]).expect("write");
    tx.backend_mut().record_statements();

    let found = tx
        .search("sale.order", &Domain::cond("amount", Operator::Ge, 1.0))
        .expect("search");
    assert_eq!(found, ids);
    let written = updates(&tx.backend_mut().take_statements());
    assert_eq!(written.len(), 11, "one UPDATE per thousand records");
    assert!(tx.dirty().is_empty());

    let rows = tx.read("sale.order", &ids, &["amount", "line_ids"]).expect("read");
    assert_eq!(rows.len(), ids.len());
    assert!(rows.iter().all(|row| row["amount"] == Value::Float(2.0)));
    tx.commit().expect("commit");
}
