extern crate clap;
use clap::{App, Arg, ArgMatches};
use common::database::DataContext;
use common::logical_plan::LogicalPlan;
use common::{Field, QueryError};
use env_logger::Env;
use log::{debug, error, info};
use memstore::csv_utils::load_csv;
use memstore::ScanMode;
use queryexe::{ExecConfig, Interpreter};
use std::fs;
use std::process;
use std::rc::Rc;

/// Splits a `name=path` table argument.
fn parse_table(arg: &str) -> Result<(&str, &str), QueryError> {
    match arg.find('=') {
        Some(i) if i > 0 && i + 1 < arg.len() => Ok((&arg[..i], &arg[i + 1..])),
        _ => Err(QueryError::ValidationError(format!(
            "table argument {} is not name=path",
            arg
        ))),
    }
}

/// Reads a dynamic parameter: integers, booleans and `null` are typed, anything else is a string.
fn parse_param(arg: &str) -> Field {
    if let Ok(i) = arg.parse::<i64>() {
        return Field::IntField(i);
    }
    match arg.to_ascii_lowercase().as_str() {
        "true" => Field::BoolField(true),
        "false" => Field::BoolField(false),
        "null" => Field::Null,
        _ => Field::StringField(arg.to_string()),
    }
}

fn load_config(matches: &ArgMatches) -> Result<ExecConfig, QueryError> {
    let mut config = match matches.value_of("config") {
        Some(path) => ExecConfig::from_file(path)?,
        None => ExecConfig::default(),
    };
    if matches.is_present("no-pushdown") {
        config.pushdown = false;
    }
    if matches.is_present("debug-rewrites") {
        config.debug_rewrites = true;
    }
    Ok(config)
}

fn run(matches: &ArgMatches) -> Result<String, QueryError> {
    let config = load_config(matches)?;
    info!("Running with config: {:?}", config);

    let mode = match matches.value_of("mode") {
        Some(m) => ScanMode::parse(m)
            .ok_or_else(|| QueryError::ValidationError(format!("unknown scan mode {}", m)))?,
        None => ScanMode::ProjectableFilterable,
    };
    let params: Vec<Field> = matches
        .values_of("param")
        .map(|values| values.map(parse_param).collect())
        .unwrap_or_default();

    let mut ctx = DataContext::now().with_parameters(params);
    if let Some(tables) = matches.values_of("table") {
        for arg in tables {
            let (name, path) = parse_table(arg)?;
            let table = load_csv(name, path)?.with_mode(mode);
            info!("Loaded {} rows into {} ({})", table.row_count(), name, mode);
            ctx.add_entity(Rc::new(table));
        }
    }

    let plan_path = matches
        .value_of("plan")
        .ok_or_else(|| QueryError::ValidationError(String::from("no plan given")))?;
    let plan = LogicalPlan::from_json(&fs::read_to_string(plan_path)?)?;
    debug!("Plan:\n{}", plan);

    let mut interpreter = Interpreter::new(Rc::new(ctx), &plan, &config)?;
    Ok(interpreter.execute()?.result().to_string())
}

fn main() {
    // Configure log environment
    env_logger::from_env(Env::default().default_filter_or("info")).init();

    let matches = App::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::with_name("plan")
                .short("p")
                .long("plan")
                .value_name("FILE")
                .help("Logical plan to run, as JSON")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("table")
                .short("t")
                .long("table")
                .value_name("NAME=CSV")
                .help("Registers a CSV file as a table; the header may carry name:type columns")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1),
        )
        .arg(
            Arg::with_name("mode")
                .short("m")
                .long("mode")
                .value_name("MODE")
                .possible_values(&["pf", "filterable", "scannable", "sequence"])
                .help("Scan capability the tables expose")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("param")
                .long("param")
                .value_name("VALUE")
                .help("Binds the next dynamic parameter")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Sets a custom config file")
                .takes_value(true)
                .required(false),
        )
        .arg(
            Arg::with_name("no-pushdown")
                .long("no-pushdown")
                .help("Keeps filters and projections out of the scans"),
        )
        .arg(
            Arg::with_name("debug-rewrites")
                .long("debug-rewrites")
                .help("Logs the plan after rewriting"),
        )
        .get_matches();

    match run(&matches) {
        Ok(result) => print!("{}", result),
        Err(e) => {
            error!("Query failed: {}", e);
            process::exit(1);
        }
    }
}
