//! Binary entry point for the `ormq` command-line tool.
#![forbid(unsafe_code)]

mod config;
mod ui;

use std::error::Error;
use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use ormql::logging::init_logging;
use ormql::query::errors::DomainErrorWithCode;
use ormql::{
    AccessContext, Domain, Engine, EngineOptions, OrmError, Principal, Registry, RuleSet, SearchOptions,
    SqliteBackend,
};
use serde_json::json;

use config::{CliConfig, Profile, ProfileUpdate};
use ui::{Theme, Ui};

#[derive(Parser, Debug)]
#[command(
    name = "ormq",
    version,
    about = "Compile ORM domains to SQL and run them against SQLite",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(long, global = true, env = "ORMQ_CONFIG", value_name = "FILE", help = "CLI config file")]
    config: Option<PathBuf>,

    #[arg(long, global = true, env = "ORMQ_PROFILE", help = "Profile providing defaults")]
    profile: Option<String>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[arg(long, global = true, value_name = "FILTER", help = "tracing filter, e.g. ormql=debug")]
    log_level: Option<String>,

    #[arg(long, global = true, help = "Disable colored output")]
    plain: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone, Default)]
struct SessionArgs {
    #[arg(long, value_name = "FILE", help = "TOML schema describing the models")]
    schema: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "TOML row rules")]
    rules: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "TOML engine options")]
    options: Option<PathBuf>,

    #[arg(long, help = "Acting user id")]
    uid: Option<i64>,

    #[arg(
        long = "group",
        value_name = "GROUP",
        action = ArgAction::Append,
        help = "Group of the acting user (repeatable)"
    )]
    groups: Vec<String>,

    #[arg(long, help = "Skip row rules and field groups")]
    superuser: bool,

    #[arg(long, help = "Language of translatable fields")]
    lang: Option<String>,
}

#[derive(Args, Debug)]
struct QueryArgs {
    #[arg(long, short, help = "Searched model")]
    model: String,

    #[arg(value_name = "DOMAIN", default_value = "[]", help = "Domain in JSON prefix form")]
    domain: String,

    #[arg(long, help = "Order spec, e.g. \"name desc, id\"")]
    order: Option<String>,

    #[arg(long)]
    limit: Option<u64>,

    #[arg(long)]
    offset: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Print the SQL a domain compiles to")]
    Compile {
        #[command(flatten)]
        session: SessionArgs,
        #[command(flatten)]
        query: QueryArgs,
    },
    #[command(about = "Run a search against a SQLite database")]
    Search {
        #[command(flatten)]
        session: SessionArgs,
        #[command(flatten)]
        query: QueryArgs,
        #[arg(long = "db", value_name = "FILE")]
        database: Option<PathBuf>,
    },
    #[command(about = "Run a grouped aggregation against a SQLite database")]
    Group {
        #[command(flatten)]
        session: SessionArgs,
        #[arg(long, short)]
        model: String,
        #[arg(value_name = "DOMAIN", default_value = "[]")]
        domain: String,
        #[arg(long, value_delimiter = ',', help = "Group-by fields")]
        groupby: Vec<String>,
        #[arg(long = "aggregate", value_name = "FIELD:FUNC", action = ArgAction::Append)]
        aggregates: Vec<String>,
        #[arg(long)]
        order: Option<String>,
        #[arg(long = "db", value_name = "FILE")]
        database: Option<PathBuf>,
    },
    #[command(about = "Create the tables of a schema in a SQLite database")]
    Init {
        #[command(flatten)]
        session: SessionArgs,
        #[arg(long = "db", value_name = "FILE")]
        database: Option<PathBuf>,
    },
    #[command(about = "Manage CLI profiles")]
    Profile {
        #[command(subcommand)]
        command: ProfileCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ProfileCommand {
    #[command(about = "List profiles")]
    List,
    #[command(about = "Create or update a profile")]
    Set(ProfileSetCmd),
    #[command(about = "Delete a profile")]
    Delete { name: String },
    #[command(about = "Set or clear the default profile")]
    Default {
        name: Option<String>,
        #[arg(long, conflicts_with = "name")]
        clear: bool,
    },
}

#[derive(Args, Debug)]
struct ProfileSetCmd {
    name: String,
    #[arg(long)]
    schema: Option<PathBuf>,
    #[arg(long = "db")]
    database: Option<PathBuf>,
    #[arg(long)]
    rules: Option<PathBuf>,
    #[arg(long)]
    options: Option<PathBuf>,
    #[arg(long)]
    uid: Option<i64>,
    #[arg(long = "group", action = ArgAction::Append)]
    groups: Vec<String>,
    #[arg(long)]
    lang: Option<String>,
    #[arg(long = "log-filter")]
    profile_log_level: Option<String>,
    #[arg(long = "default", help = "Also make this the default profile")]
    make_default: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    if let Err(err) = run() {
        match err.downcast_ref::<OrmError>() {
            Some(OrmError::Domain(domain)) => {
                eprintln!("error: {}", DomainErrorWithCode(domain));
                std::process::exit(2);
            }
            _ => {
                eprintln!("error: {err}");
                std::process::exit(1);
            }
        }
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.clone())?;
    let profile = config.resolve(cli.profile.as_deref())?.cloned();
    let level = cli
        .log_level
        .clone()
        .or_else(|| profile.as_ref().and_then(|p| p.log_level.clone()))
        .unwrap_or_else(|| "warn".to_string());
    init_logging(&level)?;
    let ui = Ui::new(if cli.plain { Theme::Plain } else { Theme::Auto });

    match cli.command {
        Command::Compile { session, query } => {
            let resolved = Resolved::new(&session, profile.as_ref())?;
            let domain = Domain::parse(&query.domain).map_err(OrmError::from)?;
            let engine = Engine::new(resolved.registry, resolved.options);
            let compiled = engine.compile(
                &resolved.access,
                &query.model,
                &domain,
                &search_options(&query),
                resolved.lang.as_deref(),
            )?;
            let statement = compiled.statement();
            let params: Vec<serde_json::Value> = statement.params.iter().map(|v| v.to_json()).collect();
            let flush: Vec<String> = compiled.to_flush.iter().map(ToString::to_string).collect();
            let fingerprint = format!("{:016x}", statement.fingerprint());
            match cli.format {
                OutputFormat::Json => print_json(&json!({
                    "model": query.model,
                    "sql": statement.sql,
                    "params": params,
                    "to_flush": flush,
                    "fingerprint": fingerprint,
                }))?,
                OutputFormat::Text => {
                    ui.section("Statement", [("model", query.model.as_str()), ("fingerprint", fingerprint.as_str())]);
                    ui.sql(&statement.sql);
                    ui.list("Parameters", params.iter().map(ToString::to_string));
                    ui.list("Flush", flush);
                }
            }
        }
        Command::Search {
            session,
            query,
            database,
        } => {
            let resolved = Resolved::new(&session, profile.as_ref())?;
            let db = database_path(database, profile.as_ref())?;
            let domain = Domain::parse(&query.domain).map_err(OrmError::from)?;
            let engine = Engine::new(resolved.registry, resolved.options);
            let backend = SqliteBackend::open(&db, engine.options())?;
            let mut tx = engine.begin(backend, resolved.access)?;
            tx.set_lang(resolved.lang.as_deref());
            let ids = tx.search_with(&query.model, &domain, &search_options(&query))?;
            tx.commit()?;
            match cli.format {
                OutputFormat::Json => print_json(&json!({ "model": query.model, "ids": ids }))?,
                OutputFormat::Text => {
                    ui.list("Records", ids.iter().map(ToString::to_string));
                    ui.success(&format!("{} record(s) of {}", ids.len(), query.model));
                }
            }
        }
        Command::Group {
            session,
            model,
            domain,
            groupby,
            aggregates,
            order,
            database,
        } => {
            let resolved = Resolved::new(&session, profile.as_ref())?;
            let db = database_path(database, profile.as_ref())?;
            let domain = Domain::parse(&domain).map_err(OrmError::from)?;
            let engine = Engine::new(resolved.registry, resolved.options);
            let backend = SqliteBackend::open(&db, engine.options())?;
            let mut tx = engine.begin(backend, resolved.access)?;
            tx.set_lang(resolved.lang.as_deref());
            let groupby: Vec<&str> = groupby.iter().map(String::as_str).collect();
            let aggregates: Vec<&str> = aggregates.iter().map(String::as_str).collect();
            let rows = tx.read_group(&model, &domain, &groupby, &aggregates, order.as_deref())?;
            tx.commit()?;
            let rows: Vec<serde_json::Map<String, serde_json::Value>> = rows
                .into_iter()
                .map(|row| row.into_iter().map(|(k, v)| (k, v.to_json())).collect())
                .collect();
            match cli.format {
                OutputFormat::Json => print_json(&json!({ "model": model, "groups": rows }))?,
                OutputFormat::Text => ui.list(
                    "Groups",
                    rows.iter().map(|row| {
                        row.iter()
                            .map(|(k, v)| format!("{k}={v}"))
                            .collect::<Vec<_>>()
                            .join(", ")
                    }),
                ),
            }
        }
        Command::Init { session, database } => {
            let resolved = Resolved::new(&session, profile.as_ref())?;
            let db = database_path(database, profile.as_ref())?;
            let mut backend = SqliteBackend::open(&db, &resolved.options)?;
            backend.create_schema(&resolved.registry)?;
            let models = resolved.registry.models().count();
            match cli.format {
                OutputFormat::Json => print_json(&json!({ "database": db, "models": models }))?,
                OutputFormat::Text => ui.success(&format!("Created {models} model table(s) in {}", db.display())),
            }
        }
        Command::Profile { command } => run_profile(&mut config, command, cli.format, &ui)?,
    }
    Ok(())
}

/// Everything a command needs, from flags first and the profile second.
struct Resolved {
    registry: Registry,
    options: EngineOptions,
    access: AccessContext,
    lang: Option<String>,
}

impl Resolved {
    fn new(args: &SessionArgs, profile: Option<&Profile>) -> Result<Self, Box<dyn Error>> {
        let schema = args
            .schema
            .clone()
            .or_else(|| profile.and_then(|p| p.schema.clone()))
            .ok_or("no schema given; pass --schema or set one in a profile")?;
        let registry = Registry::load(&schema)?;
        let options = match args.options.clone().or_else(|| profile.and_then(|p| p.options.clone())) {
            Some(path) => EngineOptions::load(&path)?,
            None => EngineOptions::default(),
        };
        let rules = match args.rules.clone().or_else(|| profile.and_then(|p| p.rules.clone())) {
            Some(path) => RuleSet::load(&path)?,
            None => RuleSet::new(),
        };
        let principal = if args.superuser {
            Principal::superuser()
        } else {
            let uid = args.uid.or_else(|| profile.and_then(|p| p.uid)).unwrap_or(1);
            let groups = if args.groups.is_empty() {
                profile.map(|p| p.groups.clone()).unwrap_or_default()
            } else {
                args.groups.clone()
            };
            Principal::user(uid).with_groups(groups)
        };
        Ok(Self {
            registry,
            options,
            access: AccessContext::new(principal, rules.into()),
            lang: args.lang.clone().or_else(|| profile.and_then(|p| p.lang.clone())),
        })
    }
}

fn database_path(flag: Option<PathBuf>, profile: Option<&Profile>) -> Result<PathBuf, Box<dyn Error>> {
    flag.or_else(|| profile.and_then(|p| p.database.clone()))
        .ok_or_else(|| "no database given; pass --db or set one in a profile".into())
}

fn search_options(query: &QueryArgs) -> SearchOptions {
    SearchOptions {
        order: query.order.clone(),
        limit: query.limit,
        offset: query.offset,
    }
}

fn run_profile(
    config: &mut CliConfig,
    command: ProfileCommand,
    format: OutputFormat,
    ui: &Ui,
) -> Result<(), Box<dyn Error>> {
    match command {
        ProfileCommand::List => {
            let default = config.default_profile_name().map(str::to_string);
            match format {
                OutputFormat::Json => {
                    let profiles: Vec<serde_json::Value> = config
                        .profiles()
                        .map(|p| {
                            json!({
                                "name": p.name,
                                "default": default.as_deref() == Some(p.name.as_str()),
                                "schema": p.schema,
                                "database": p.database,
                                "rules": p.rules,
                                "uid": p.uid,
                                "groups": p.groups,
                                "lang": p.lang,
                            })
                        })
                        .collect();
                    print_json(&json!({ "profiles": profiles }))?;
                }
                OutputFormat::Text => ui.list(
                    "Profiles",
                    config.profiles().map(|p| {
                        let marker = if default.as_deref() == Some(p.name.as_str()) { " (default)" } else { "" };
                        format!("{}{marker}", p.name)
                    }),
                ),
            }
        }
        ProfileCommand::Set(cmd) => {
            let name = cmd.name.clone();
            config.upsert_profile(
                &name,
                ProfileUpdate {
                    schema: cmd.schema,
                    database: cmd.database,
                    rules: cmd.rules,
                    options: cmd.options,
                    uid: cmd.uid,
                    groups: cmd.groups,
                    lang: cmd.lang,
                    log_level: cmd.profile_log_level,
                },
            )?;
            if cmd.make_default {
                config.set_default_profile(Some(&name))?;
            }
            let path = config.persist()?;
            ui.success(&format!("Saved profile '{name}' to {}", path.display()));
        }
        ProfileCommand::Delete { name } => {
            config.delete_profile(&name)?;
            let path = config.persist()?;
            ui.success(&format!("Deleted profile '{name}' from {}", path.display()));
        }
        ProfileCommand::Default { name, clear } => {
            if clear {
                config.set_default_profile(None)?;
            } else if let Some(name) = name.as_deref() {
                config.set_default_profile(Some(name))?;
            } else {
                match config.default_profile_name() {
                    Some(name) => println!("{name}"),
                    None => ui.warn("no default profile"),
                }
                return Ok(());
            }
            config.persist()?;
            ui.success("Default profile updated");
        }
    }
    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
