#![allow(dead_code)]

use std::path::{Path, PathBuf};

use ormql::schema::ValueType;
use ormql::{
    AccessContext, Engine, EngineOptions, FieldDescriptor, ModelBuilder, Registry, SqliteBackend, Transaction, Value,
};

pub fn sales_registry() -> Registry {
    Registry::builder()
        .model(ModelBuilder::new("res.country").field(FieldDescriptor::char("name").required()))
        .model(
            ModelBuilder::new("res.partner")
                .field(FieldDescriptor::char("name"))
                .field(FieldDescriptor::char("city"))
                .field(FieldDescriptor::many2one("country_id", "res.country"))
                .field(FieldDescriptor::scalar("active", ValueType::Boolean))
                .field(FieldDescriptor::char("secret").groups(["base.group_system"])),
        )
        .model(ModelBuilder::new("sale.tag").field(FieldDescriptor::char("name")))
        .model(
            ModelBuilder::new("sale.order")
                .order("id")
                .field(FieldDescriptor::char("name").required())
                .field(FieldDescriptor::many2one("partner_id", "res.partner"))
                .field(FieldDescriptor::many2one("invoice_partner_id", "res.partner").bypass_access())
                .field(FieldDescriptor::scalar("amount", ValueType::Float))
                .field(FieldDescriptor::scalar("state", ValueType::Selection))
                .field(FieldDescriptor::one2many("line_ids", "sale.order.line", "order_id"))
                .field(FieldDescriptor::many2many("tag_ids", "sale.tag")),
        )
        .model(
            ModelBuilder::new("product.category")
                .field(FieldDescriptor::char("name"))
                .field(FieldDescriptor::many2one("parent_id", "product.category")),
        )
        .model(
            ModelBuilder::new("sale.order.line")
                .rec_name("product")
                .field(FieldDescriptor::many2one("order_id", "sale.order").required())
                .field(FieldDescriptor::char("product"))
                .field(FieldDescriptor::scalar("qty", ValueType::Integer))
                .field(FieldDescriptor::many2one("categ_id", "product.category")),
        )
        .build()
        .expect("registry builds")
}

pub const SCHEMA_TOML: &str = r#"
[[models]]
name = "res.partner"

[[models.fields]]
name = "name"

[[models.fields]]
name = "city"

[[models]]
name = "sale.order"
order = "id"

[[models.fields]]
name = "name"
required = true

[[models.fields]]
name = "partner_id"
kind = "many2one"
target = "res.partner"

[[models.fields]]
name = "amount"
type = "float"

[[models.fields]]
name = "state"
type = "selection"
"#;

pub fn write_schema(dir: &Path) -> PathBuf {
    let path = dir.join("schema.toml");
    std::fs::write(&path, SCHEMA_TOML).expect("write schema");
    path
}

/// Fresh in-memory database holding the sales tables.
pub fn engine_with_backend() -> (Engine, SqliteBackend) {
    let engine = Engine::new(sales_registry(), EngineOptions::default());
    let mut backend = SqliteBackend::open_in_memory(engine.options()).expect("open sqlite");
    backend.create_schema(engine.registry()).expect("create schema");
    (engine, backend)
}

/// Ids of the seeded rows.
pub struct Seed {
    pub jack: i64,
    pub jill: i64,
    pub nobody: i64,
    pub orders: Vec<i64>,
}

/// Three partners and four orders:
///
/// | order | partner | amount | state |
/// |-------|---------|--------|-------|
/// | SO1   | Jack    | 10     | draft |
/// | SO2   | Jack    | 20     | done  |
/// | SO3   | Jill    | 30     | done  |
/// | SO4   | none    | 40     | draft |
pub fn seed(tx: &mut Transaction<SqliteBackend>) -> Seed {
    let jack = tx
        .create("res.partner", &[("name", Value::from("Jack")), ("city", Value::from("Oslo"))])
        .expect("create jack");
    let jill = tx
        .create("res.partner", &[("name", Value::from("Jill")), ("city", Value::from("Bergen"))])
        .expect("create jill");
    let nobody = tx
        .create("res.partner", &[("name", Value::from("Nobody"))])
        .expect("create nobody");
    let rows: [(&str, Value, f64, &str); 4] = [
        ("SO1", Value::Int(jack), 10.0, "draft"),
        ("SO2", Value::Int(jack), 20.0, "done"),
        ("SO3", Value::Int(jill), 30.0, "done"),
        ("SO4", Value::Null, 40.0, "draft"),
    ];
    let orders = rows
        .into_iter()
        .map(|(name, partner, amount, state)| {
            tx.create(
                "sale.order",
                &[
                    ("name", Value::from(name)),
                    ("partner_id", partner),
                    ("amount", Value::from(amount)),
                    ("state", Value::from(state)),
                ],
            )
            .expect("create order")
        })
        .collect();
    Seed {
        jack,
        jill,
        nobody,
        orders,
    }
}

pub fn superuser_tx() -> (Transaction<SqliteBackend>, Seed) {
    let (engine, backend) = engine_with_backend();
    let mut tx = engine.begin(backend, AccessContext::superuser()).expect("begin");
    let seed = seed(&mut tx);
    (tx, seed)
}
