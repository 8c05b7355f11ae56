//! Flagpole server binary.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use flagpole::config::{load_config, load_from_env, ConfigError, ServerConfig, StartOptions};
use flagpole::db::migrator::{Migrator, SchemaMigrator};
use flagpole::db::DatabaseConnector;
use flagpole::lifecycle::{self, register_graceful_shutdown};
use flagpole::observability::init_tracing;

#[derive(Parser)]
#[command(name = "flagpole")]
#[command(about = "Feature flag server", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file. Without one, defaults plus FLAGPOLE_* variables are used.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server until SIGINT or SIGTERM (default)
    Run,
    /// Apply pending database migrations and exit
    Migrate,
    /// Load and validate the configuration, then exit
    CheckConfig,
}

fn load(path: Option<&PathBuf>) -> Result<ServerConfig, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => load_from_env(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match load(cli.config.as_ref()) {
        Ok(config) => config,
        Err(ConfigError::Validation(errors)) => {
            for error in &errors {
                eprintln!("config error: {error}");
            }
            return Err(format!("{} configuration error(s)", errors.len()).into());
        }
        Err(e) => return Err(e.into()),
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::CheckConfig => {
            let mut shown = config;
            if shown.server.secret.is_some() {
                shown.server.secret = Some("<redacted>".into());
            }
            println!("Configuration OK");
            println!("{}", toml::to_string_pretty(&shown)?);
            Ok(())
        }
        Commands::Migrate => {
            init_tracing(&config.observability)?;
            let migrator = SchemaMigrator::new(Arc::new(DatabaseConnector::new()));
            let report = migrator.migrate(&config).await?;
            tracing::info!(applied = report.applied.len(), "Migrations applied");
            Ok(())
        }
        Commands::Run => {
            init_tracing(&config.observability)?;
            let instance = Arc::new(lifecycle::start(StartOptions::new(config)).await?);
            register_graceful_shutdown(instance).await??;
            Ok(())
        }
    }
}
