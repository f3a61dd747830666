//! portsql shell binary: runs one statement against a MySQL or MariaDB
//! server and prints the result as JSON lines.

use portsql_cli::{config, parse_args, run_statement};
use portsql_dml::Database;
use portsql_mysql::MysqlConnector;
use tracing_subscriber::EnvFilter;

fn resolve_config_path(cli: Option<String>) -> (Option<String>, &'static str) {
    if let Some(path) = cli.filter(|value| !value.trim().is_empty()) {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("PORTSQL_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let invocation = parse_args(std::env::args().skip(1))?;
    let (resolved_config_path, config_source) = resolve_config_path(invocation.config_path);
    let selected_config_path = resolved_config_path.as_deref().or(Some("portsql.toml"));

    let config = config::load_config(selected_config_path)?;

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("warn"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let mut db = Database::connect(&MysqlConnector::new(), config.database)?;
    let stdout = std::io::stdout();
    let result = run_statement(&mut db, &invocation.sql, &mut stdout.lock());
    db.dispose();
    result?;
    Ok(())
}
