#![allow(missing_docs)]

mod support;

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use ormql::{AccessContext, Engine, EngineOptions, Registry, SqliteBackend, Value};
use serde_json::Value as Json;
use support::write_schema;
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
    schema: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let schema = write_schema(dir.path());
        Self { dir, schema }
    }

    fn config(&self) -> PathBuf {
        self.dir.path().join("cli.toml")
    }

    fn db(&self) -> PathBuf {
        self.dir.path().join("sales.db")
    }

    fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = cargo_bin_cmd!("ormq");
        cmd.env("ORMQ_CONFIG", self.config()).env_remove("ORMQ_PROFILE");
        cmd
    }
}

fn json_stdout(cmd: &mut assert_cmd::Command) -> Json {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).expect("valid json")
}

fn seed_orders(schema: &Path, db: &Path) {
    let engine = Engine::new(Registry::load(schema).expect("schema"), EngineOptions::default());
    let backend = SqliteBackend::open(db, engine.options()).expect("open");
    let mut tx = engine.begin(backend, AccessContext::superuser()).expect("begin");
    let jack = tx
        .create("res.partner", &[("name", Value::from("Jack")), ("city", Value::from("Oslo"))])
        .expect("partner");
    for (name, partner, amount) in [("SO1", Value::Int(jack), 10.0), ("SO2", Value::Null, 20.0)] {
        tx.create(
            "sale.order",
            &[
                ("name", Value::from(name)),
                ("partner_id", partner),
                ("amount", Value::from(amount)),
                ("state", Value::from("draft")),
            ],
        )
        .expect("order");
    }
    tx.commit().expect("commit");
}

#[test]
fn compile_prints_sql_and_flush_set() {
    let ws = Workspace::new();
    let json = json_stdout(
        ws.cmd()
            .args(["--format", "json", "compile", "--superuser", "--model", "sale.order"])
            .arg("--schema")
            .arg(&ws.schema)
            .arg(r#"[["partner_id.name", "like", "jack"]]"#),
    );
    let sql = json["sql"].as_str().expect("sql");
    assert!(sql.contains(r#""sale_order"."partner_id" IN (SELECT"#), "{sql}");
    assert_eq!(json["params"], serde_json::json!(["%jack%"]));
    assert_eq!(
        json["to_flush"],
        serde_json::json!(["res.partner.name", "sale.order.partner_id"])
    );
    assert_eq!(json["fingerprint"].as_str().map(str::len), Some(16));
}

#[test]
fn compile_text_output_shows_the_statement() {
    let ws = Workspace::new();
    let output = ws
        .cmd()
        .args(["--plain", "compile", "--superuser", "--model", "sale.order", "--order", "amount desc"])
        .arg("--schema")
        .arg(&ws.schema)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert!(text.contains(r#"ORDER BY "sale_order"."amount" DESC"#), "{text}");
    assert!(text.contains("sale.order.amount"));
}

#[test]
fn domain_errors_exit_with_their_code() {
    let ws = Workspace::new();
    let assert = ws
        .cmd()
        .args(["compile", "--superuser", "--model", "sale.order"])
        .arg("--schema")
        .arg(&ws.schema)
        .arg(r#"[["nope", "=", 1]]"#)
        .assert()
        .code(2);
    let stderr = String::from_utf8(assert.get_output().stderr.clone()).expect("utf8");
    assert!(stderr.contains("[UnknownField]"), "{stderr}");

    ws.cmd()
        .args(["compile", "--model", "sale.order"])
        .assert()
        .code(1);
}

#[test]
fn init_then_search_and_group() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["init", "--schema"])
        .arg(&ws.schema)
        .arg("--db")
        .arg(ws.db())
        .assert()
        .success();
    seed_orders(&ws.schema, &ws.db());

    let json = json_stdout(
        ws.cmd()
            .args(["--format", "json", "search", "--superuser", "--model", "sale.order"])
            .arg("--schema")
            .arg(&ws.schema)
            .arg("--db")
            .arg(ws.db())
            .arg(r#"[["partner_id.city", "=", "Oslo"]]"#),
    );
    assert_eq!(json["ids"], serde_json::json!([1]));

    let json = json_stdout(
        ws.cmd()
            .args(["--format", "json", "group", "--superuser", "--model", "sale.order"])
            .args(["--groupby", "state", "--aggregate", "amount:sum"])
            .arg("--schema")
            .arg(&ws.schema)
            .arg("--db")
            .arg(ws.db()),
    );
    let groups = json["groups"].as_array().expect("groups");
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0]["__count"], 2);
    assert_eq!(groups[0]["amount:sum"], 30.0);
}

#[test]
fn profiles_supply_defaults() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["profile", "set", "local", "--default", "--uid", "3"])
        .arg("--schema")
        .arg(&ws.schema)
        .arg("--db")
        .arg(ws.db())
        .assert()
        .success();
    assert!(ws.config().exists());

    let json = json_stdout(ws.cmd().args(["--format", "json", "profile", "list"]));
    let profiles = json["profiles"].as_array().expect("profiles");
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0]["name"], "local");
    assert_eq!(profiles[0]["default"], true);
    assert_eq!(profiles[0]["uid"], 3);

    ws.cmd().args(["init"]).assert().success();
    let json = json_stdout(ws.cmd().args(["--format", "json", "search", "--model", "res.partner"]));
    assert_eq!(json["ids"], serde_json::json!([]));

    ws.cmd().args(["profile", "delete", "local"]).assert().success();
    ws.cmd()
        .args(["--profile", "local", "profile", "list"])
        .assert()
        .code(1);
}
