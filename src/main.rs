//! portaldb - command-line access to a portal database.
//!
//! Every command runs as one wrapped unit of work; read commands use the
//! `GET` method and mutations `POST`, `PATCH` or `DELETE`, so the
//! transaction mode follows from the verb.

use std::path::PathBuf;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use portaldb::storage::{serialize_record, Record, RecordId, UserId, Values};
use portaldb::{Domain, Method, Tdb, TdbConfig, TdbError, TdbResult, TxOptions};

struct Args {
    config: Option<PathBuf>,
    database: String,
    path: Option<PathBuf>,
    user: Option<UserId>,
    company: Option<RecordId>,
    verbose: bool,
    command: Vec<String>,
}

fn main() -> ExitCode {
    let args = match parse_args(std::env::args().skip(1).collect()) {
        Ok(Some(args)) => args,
        Ok(None) => return ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{}", message);
            eprintln!("Try 'portaldb --help'.");
            return ExitCode::FAILURE;
        }
    };

    init_logging(args.verbose);

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let tdb = match Tdb::init(config) {
        Ok(tdb) => tdb,
        Err(e) => {
            eprintln!("Error opening database: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run_command(&tdb, &args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error ({}): {}", e.kind(), e);
            ExitCode::FAILURE
        }
    }
}

fn parse_args(raw: Vec<String>) -> Result<Option<Args>, String> {
    let mut args = Args {
        config: None,
        database: "portal".to_string(),
        path: None,
        user: None,
        company: None,
        verbose: false,
        command: Vec::new(),
    };

    let mut i = 0;
    while i < raw.len() {
        let arg = raw[i].as_str();
        match arg {
            "-c" | "--config" => args.config = Some(PathBuf::from(value(&raw, &mut i, arg)?)),
            "-d" | "--database" => args.database = value(&raw, &mut i, arg)?.to_string(),
            "-p" | "--path" => args.path = Some(PathBuf::from(value(&raw, &mut i, arg)?)),
            "-u" | "--user" => args.user = Some(UserId::new(number(value(&raw, &mut i, arg)?)?)),
            "--company" => {
                args.company = Some(RecordId::new(number(value(&raw, &mut i, arg)?)?))
            }
            "-v" | "--verbose" => args.verbose = true,
            "-h" | "--help" => {
                print_help();
                return Ok(None);
            }
            "--version" => {
                println!("portaldb v{}", env!("CARGO_PKG_VERSION"));
                return Ok(None);
            }
            _ if arg.starts_with('-') && args.command.is_empty() => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => args.command.push(arg.to_string()),
        }
        i += 1;
    }

    if args.command.is_empty() {
        return Err("Missing command".to_string());
    }
    Ok(Some(args))
}

fn value<'a>(raw: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str, String> {
    *i += 1;
    raw.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("Option {} needs a value", flag))
}

fn number(s: &str) -> Result<u64, String> {
    s.parse().map_err(|_| format!("Not a valid id: {}", s))
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("portaldb=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(args: &Args) -> TdbResult<TdbConfig> {
    let mut config = match &args.config {
        Some(path) => TdbConfig::load(&args.database, path, args.company, args.user)?,
        None => {
            let mut config = TdbConfig::new(&args.database);
            if let Some(company) = args.company {
                config = config.company(company);
            }
            if let Some(user) = args.user {
                config = config.user(user);
            }
            config
        }
    };
    if let Some(path) = &args.path {
        config = config.storage_path(path);
    }
    Ok(config)
}

fn print_help() {
    println!("portaldb - transactional access to a portal database");
    println!();
    println!("Usage: portaldb [OPTIONS] COMMAND [ARGS]");
    println!();
    println!("Options:");
    println!("  -c, --config FILE      Read settings from a TOML file");
    println!("  -d, --database NAME    Database name (default: portal)");
    println!("  -p, --path DIR         Journal directory (default: in memory)");
    println!("  -u, --user ID          Run as this user (default: root)");
    println!("      --company ID       Default company of the context");
    println!("  -v, --verbose          Log debug output");
    println!("  -h, --help             Show this help message");
    println!("      --version          Show version");
    println!();
    println!("Commands:");
    println!("  models                 List registered models");
    println!("  search MODEL [FILTER]  Search records, e.g. \"code = 'abc' AND end > 0\"");
    println!("  read MODEL ID          Show one record");
    println!("  create MODEL JSON      Create a record from a JSON object");
    println!("  write MODEL ID JSON    Update a record with a JSON object");
    println!("  delete MODEL ID        Delete a record");
    println!("  history [LIMIT]        Show the journal, newest first");
}

fn run_command(tdb: &Tdb, command: &[String]) -> TdbResult<()> {
    let args: Vec<&str> = command.iter().map(String::as_str).collect();
    match args.as_slice() {
        ["models"] => {
            for name in tdb.pool().models() {
                println!("{}", name);
            }
            Ok(())
        }
        ["search", model, ..] => {
            let domain = Domain::parse(&args[2..].join(" "))?;
            let records = tdb.transaction(TxOptions::for_method(Method::Get), |tx| {
                Ok(tdb.get(Some(*model))?.search(tx, &domain)?)
            })?;
            for record in &records {
                print_record(record)?;
            }
            println!("({} records)", records.len());
            Ok(())
        }
        ["read", model, id] => {
            let id = parse_id(id)?;
            let record = tdb.transaction(TxOptions::for_method(Method::Get), |tx| {
                Ok(tdb.get(Some(*model))?.read(tx, id)?)
            })?;
            print_record(&record)
        }
        ["create", model, json] => {
            let values = parse_values(json)?;
            let created = tdb.transaction(TxOptions::for_method(Method::Post), |tx| {
                Ok(tdb.get(Some(*model))?.create(tx, vec![values.clone()])?)
            })?;
            for record in &created {
                println!("created {} {}", model, record.id);
            }
            Ok(())
        }
        ["write", model, id, json] => {
            let id = parse_id(id)?;
            let values = parse_values(json)?;
            tdb.transaction(TxOptions::for_method(Method::Patch), |tx| {
                Ok(tdb.get(Some(*model))?.write(tx, &[id], values.clone())?)
            })?;
            println!("updated {} {}", model, id);
            Ok(())
        }
        ["delete", model, id] => {
            let id = parse_id(id)?;
            tdb.transaction(TxOptions::for_method(Method::Delete), |tx| {
                Ok(tdb.get(Some(*model))?.delete(tx, &[id])?)
            })?;
            println!("deleted {} {}", model, id);
            Ok(())
        }
        ["history"] | ["history", _] => {
            let limit = match args.get(1) {
                Some(limit) => Some(
                    limit
                        .parse()
                        .map_err(|_| TdbError::application(format!("Not a valid limit: {}", limit)))?,
                ),
                None => None,
            };
            let entries = tdb.history(limit)?;
            if entries.is_empty() {
                println!("(no history)");
            }
            for entry in entries {
                println!("{} {} {}", &entry.id[..entry.id.len().min(8)], entry.timestamp, entry.summary());
            }
            Ok(())
        }
        _ => Err(TdbError::application(format!("Unknown command: {}", command.join(" ")))),
    }
}

fn parse_id(s: &str) -> TdbResult<RecordId> {
    s.parse::<u64>()
        .map(RecordId::new)
        .map_err(|_| TdbError::application(format!("Not a valid id: {}", s)))
}

fn parse_values(json: &str) -> TdbResult<Values> {
    serde_json::from_str(json)
        .map_err(|e| TdbError::application(format!("Expected a JSON object: {}", e)))
}

fn print_record(record: &Record) -> TdbResult<()> {
    let bytes = serialize_record(record)?;
    println!("{}", String::from_utf8_lossy(&bytes));
    Ok(())
}
