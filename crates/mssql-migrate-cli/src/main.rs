//! mssql-migrate CLI - Flyway-compatible schema migrations for SQL Server.

use clap::{Parser, Subcommand};
use mssql_migrate::{Config, MigrateError, Migrator};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "mssql-migrate")]
#[command(about = "Flyway-compatible schema migrations for SQL Server")]
#[command(version)]
struct Cli {
    /// Path to YAML or JSON configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations
    Migrate {
        /// Report pending migrations without executing them
        #[arg(long)]
        dry_run: bool,

        /// Override the directories scanned for migration scripts
        #[arg(long)]
        locations: Vec<String>,

        /// Permit migrations whose version precedes the highest applied
        #[arg(long)]
        out_of_order: bool,
    },

    /// Show migration status for disk and history entries
    Info,

    /// Validate applied migrations against the files on disk
    Validate,

    /// Mark an existing database as baselined
    Baseline {
        /// Baseline version to record
        #[arg(long)]
        version: String,
    },

    /// Remove failed history rows and realign checksums
    Repair,
}

/// Exit code for a run whose failure detail is already in the result output.
const EXIT_MIGRATION_FAILED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Migrate {
            dry_run,
            locations,
            out_of_order,
        } => {
            if dry_run {
                config.migration.dry_run = true;
            }
            if !locations.is_empty() {
                config.migration.locations = locations;
            }
            if out_of_order {
                config.migration.out_of_order = true;
            }

            let migrator = Migrator::new(config).await?;
            let result = migrator.migrate().await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                let status_msg = if result.dry_run {
                    "Dry run completed!"
                } else if result.success {
                    "Migration completed!"
                } else {
                    "Migration failed."
                };
                println!("\n{}", status_msg);
                println!("  Run ID: {}", result.run_id);
                println!("  Duration: {} ms", result.duration_ms);
                if result.dry_run {
                    println!("  Pending: {}", result.pending_count);
                } else {
                    println!("  Applied: {}", result.migrations_applied);
                }
                for script in &result.applied {
                    println!("    {}", script);
                }
                if let Some(ref err) = result.error_message {
                    println!("  Error: {}", err);
                }
            }

            if !result.success {
                // The detail already went to stdout; exit nonzero.
                return Ok(ExitCode::from(EXIT_MIGRATION_FAILED));
            }
        }

        Commands::Info => {
            let migrator = Migrator::new(config).await?;
            let statuses = migrator.info().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
            } else {
                println!("{:<16} {:<14} {}", "Version", "State", "Script");
                for s in &statuses {
                    println!(
                        "{:<16} {:<14} {}",
                        s.version.as_deref().unwrap_or(""),
                        s.state,
                        s.script
                    );
                }
            }
        }

        Commands::Validate => {
            let migrator = Migrator::new(config).await?;
            let result = migrator.validate().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Validated {} migration(s)", result.validated);
                for err in &result.errors {
                    println!("  {}", err);
                }
            }

            if !result.success {
                return Err(MigrateError::Validation(format!(
                    "{} validation error(s)",
                    result.errors.len()
                )));
            }
        }

        Commands::Baseline { version } => {
            let migrator = Migrator::new(config).await?;
            let result = migrator.baseline(&version).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if result.success {
                println!("Baselined at version {}", result.version);
            }

            if let Some(err) = result.error_message {
                return Err(MigrateError::Config(err));
            }
        }

        Commands::Repair => {
            let migrator = Migrator::new(config).await?;
            let result = migrator.repair().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!(
                    "Repair complete: {} failed row(s) deleted, {} checksum(s) realigned",
                    result.failed_rows_deleted, result.checksums_realigned
                );
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}
