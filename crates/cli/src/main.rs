//! isolab: run isolation scenarios against PostgreSQL.
//!
//! - `isolab list` prints the catalog
//! - `isolab run [SCENARIO...]` runs scenarios and reports verdicts
//! - `isolab init` writes a default `isolab.toml`
//!
//! Exit codes: 0 when every scenario passed, 1 when any failed or aborted,
//! 2 when configuration or the database connection is unusable.

mod commands;
mod format;

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context, Result};
use clap::ArgMatches;
use tracing::info;
use tracing_subscriber::EnvFilter;

use isolab_pool::ConnectionPool;
use isolab_postgres::PgConnector;
use isolab_scenario::config::CONFIG_FILE_NAME;
use isolab_scenario::{catalog, HarnessConfig, Scenario, ScenarioRunner};

use commands::build_cli;
use format::{format_error, format_list, format_reports, OutputMode};

const EXIT_FAILED: i32 = 1;
const EXIT_UNUSABLE: i32 = 2;

fn main() {
    let matches = build_cli().get_matches();

    let mode = if matches.get_flag("json") {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let code = match dispatch(&matches, mode) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", format_error(&e, mode));
            EXIT_UNUSABLE
        }
    };
    process::exit(code);
}

fn dispatch(matches: &ArgMatches, mode: OutputMode) -> Result<i32> {
    let config_path = config_path(matches);

    if matches.subcommand_name() == Some("init") {
        let path = config_path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
        HarnessConfig::write_default_if_missing(&path)?;
        println!("{}", path.display());
        return Ok(0);
    }

    let config = load_config(matches, config_path.as_deref())?;
    init_logging(&config.log_filter);

    match matches.subcommand() {
        Some(("list", _)) => {
            println!("{}", format_list(&catalog(), mode));
            Ok(0)
        }
        Some(("run", sub)) => {
            let names: Vec<String> = sub
                .get_many::<String>("scenarios")
                .map(|v| v.cloned().collect())
                .unwrap_or_default();
            let selected = select(&names)?;
            run(config, &selected, mode)
        }
        _ => bail!("no subcommand given"),
    }
}

/// `--config`, else `./isolab.toml` when it exists.
fn config_path(matches: &ArgMatches) -> Option<PathBuf> {
    matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .or_else(|| {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            local.exists().then_some(local)
        })
}

fn load_config(matches: &ArgMatches, path: Option<&Path>) -> Result<HarnessConfig> {
    let mut config = HarnessConfig::load(path)?;
    config.override_database_url(matches.get_one::<String>("database-url").cloned());
    config.validate()?;
    Ok(config)
}

fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Catalog entries named on the command line, or the whole catalog.
fn select(names: &[String]) -> Result<Vec<Box<dyn Scenario>>> {
    let all = catalog();
    if names.is_empty() {
        return Ok(all);
    }
    let mut selected = Vec::with_capacity(names.len());
    for name in names {
        match isolab_scenario::find(name) {
            Some(scenario) => selected.push(scenario),
            None => {
                let known: Vec<_> = all.iter().map(|s| s.name()).collect();
                bail!("unknown scenario '{}' (known: {})", name, known.join(", "));
            }
        }
    }
    Ok(selected)
}

fn run(config: HarnessConfig, scenarios: &[Box<dyn Scenario>], mode: OutputMode) -> Result<i32> {
    let connector = PgConnector::from_url(&config.database_url)
        .context("invalid database_url")?;
    let pool = ConnectionPool::new(connector, config.pool_config())?;
    let runner = ScenarioRunner::new(pool, config);
    runner
        .prepare()
        .context("failed to install the schema; is the database reachable?")?;

    let reports = runner.run_all(scenarios);
    println!("{}", format_reports(&reports, mode));

    let passed = reports.iter().filter(|r| r.passed()).count();
    info!(target: "isolab::cli", passed, total = reports.len(), "Run finished");
    Ok(if passed == reports.len() { 0 } else { EXIT_FAILED })
}
