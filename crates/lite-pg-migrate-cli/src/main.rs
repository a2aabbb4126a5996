//! lite-pg-migrate CLI - resumable SQLite <-> PostgreSQL migration.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use dialoguer::Confirm;
use lite_pg_migrate::drivers::DialectImpl;
use lite_pg_migrate::orchestrator::rollback_target;
use lite_pg_migrate::{
    AlwaysRollback, CheckpointStore, Config, Connection, Dialect, DialectAdapter,
    FileCheckpointStore, HealthCheckResult, MigrateError, MigrationManager, MigrationPhase,
    MigrationReport, NeverRollback, ReportStatus, SchemaDescriptor, SchemaManager, SourceReader,
    ValidationReport,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lite-pg-migrate")]
#[command(about = "Resumable SQLite <-> PostgreSQL migration")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file [default: config.yaml if present]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the schema descriptor (YAML or JSON)
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Directory for checkpoint files
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

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

#[derive(Args, Default)]
struct Endpoints {
    /// Source DSN (sqlite:///path.db or postgresql://...)
    source_dsn: Option<String>,

    /// Target DSN (sqlite:///path.db or postgresql://...)
    target_dsn: Option<String>,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    endpoints: Endpoints,

    /// Rows per read/upsert batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Skip the post-migration validation phase
    #[arg(long)]
    skip_post_validation: bool,

    /// Highest tolerated row loss in percent
    #[arg(long)]
    max_data_loss_percent: Option<f64>,

    /// Roll back a failed run without asking
    #[arg(long, conflicts_with = "no_rollback")]
    rollback_on_failure: bool,

    /// Never roll back a failed run
    #[arg(long)]
    no_rollback: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new migration
    Run(RunArgs),

    /// Continue a migration from its checkpoint
    Resume {
        #[command(flatten)]
        args: RunArgs,

        /// Checkpoint to resume [default: most recent]
        #[arg(long)]
        migration_id: Option<String>,
    },

    /// Pre-migration validation only
    Validate {
        #[command(flatten)]
        endpoints: Endpoints,
    },

    /// Post-migration validation only (row loss and sampled hashes)
    Verify {
        #[command(flatten)]
        endpoints: Endpoints,

        /// Highest tolerated row loss in percent
        #[arg(long)]
        max_data_loss_percent: Option<f64>,
    },

    /// Clear the target database and delete the checkpoint
    Rollback {
        /// Target DSN
        target_dsn: Option<String>,

        /// Checkpoint to delete [default: newest one for the configured endpoints]
        #[arg(long)]
        migration_id: Option<String>,

        /// Do not ask for confirmation
        #[arg(long, short)]
        yes: bool,
    },

    /// Test database connections
    HealthCheck {
        #[command(flatten)]
        endpoints: Endpoints,
    },

    /// Create or upgrade the schema of one database
    InitSchema {
        /// Database DSN
        dsn: String,
    },

    /// Print the DDL of the schema descriptor for a dialect
    RenderSchema {
        /// sqlite or postgres
        dialect: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<u8, MigrateError> {
    let cli = Cli::parse();

    // Render needs neither logging nor a database
    if let Commands::RenderSchema { dialect } = &cli.command {
        let descriptor = load_descriptor(&cli, None)?;
        let dialect = DialectImpl::for_dialect(Dialect::parse(dialect)?);
        for statement in dialect.render(&descriptor)? {
            println!("{};\n", statement);
        }
        return Ok(0);
    }

    setup_logging(&cli.verbosity, &cli.log_format);

    match &cli.command {
        Commands::RenderSchema { .. } => unreachable!(), // Handled above

        Commands::Run(args) => {
            let config = load_config(&cli, &args.endpoints)?;
            let config = apply_run_overrides(config, args)?;
            let descriptor = load_descriptor(&cli, Some(&config))?;
            let manager = MigrationManager::connect(config, descriptor).await?;
            let report = with_decider(manager, args).run().await?;
            print_migration_report(&cli, &report)?;
            Ok(report.exit_code)
        }

        Commands::Resume { args, migration_id } => {
            let config = load_config(&cli, &args.endpoints)?;
            let config = apply_run_overrides(config, args)?;
            let descriptor = load_descriptor(&cli, Some(&config))?;
            let manager = MigrationManager::connect(config, descriptor)
                .await?
                .resume(migration_id.as_deref())?;
            info!("Resuming migration {}", manager.migration_id());
            let report = with_decider(manager, args).run().await?;
            print_migration_report(&cli, &report)?;
            Ok(report.exit_code)
        }

        Commands::Validate { endpoints } => {
            let config = load_config(&cli, endpoints)?;
            let descriptor = load_descriptor(&cli, Some(&config))?;
            let manager = MigrationManager::connect(config, descriptor).await?;
            let report = manager.pre_validate(true).await;
            manager.close().await;
            let report = report?;
            print_validation_report(&cli, "Pre-migration validation", &report)?;
            if report.status == ReportStatus::Error {
                return Err(MigrateError::Validation(report.issues.join("; ")));
            }
            Ok(0)
        }

        Commands::Verify {
            endpoints,
            max_data_loss_percent,
        } => {
            let mut config = load_config(&cli, endpoints)?;
            if let Some(pct) = max_data_loss_percent {
                config.migration.max_data_loss_percent = *pct;
            }
            config.validate()?;
            let descriptor = load_descriptor(&cli, Some(&config))?;
            let manager = MigrationManager::connect(config, descriptor).await?;
            let report = manager.post_validate().await;
            manager.close().await;
            let report = report?;
            print_validation_report(&cli, "Post-migration validation", &report)?;
            if report.status != ReportStatus::Success {
                return Err(MigrateError::Validation(report.issues.join("; ")));
            }
            Ok(0)
        }

        Commands::Rollback {
            target_dsn,
            migration_id,
            yes,
        } => rollback(&cli, target_dsn.as_deref(), migration_id.as_deref(), *yes).await,

        Commands::HealthCheck { endpoints } => {
            let config = load_config(&cli, endpoints)?;
            let result = HealthCheckResult::probe(&config).await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source ({}): {} ({}ms)",
                    result.source_endpoint,
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target ({}): {} ({}ms)",
                    result.target_endpoint,
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                let (endpoint, message) = if result.source_connected {
                    (result.target_endpoint, result.target_error)
                } else {
                    (result.source_endpoint, result.source_error)
                };
                return Err(MigrateError::connectivity(
                    endpoint,
                    message.unwrap_or_else(|| "health check failed".to_string()),
                ));
            }
            Ok(0)
        }

        Commands::InitSchema { dsn } => {
            let config = load_config_file(&cli)?;
            let descriptor = load_descriptor(&cli, config.as_ref())?;
            let manager = match &config {
                Some(config) => SchemaManager::new(config.migration.max_connections)
                    .with_sqlite_backup(config.migration.backup_sqlite_target),
                None => SchemaManager::default(),
            };
            let conn = manager.connect(dsn).await?;
            let report = manager.ensure_schema(&conn, &descriptor).await;
            conn.close().await;
            let report = report?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Schema initialization:");
                println!("  Tables created: {:?}", report.tables_created);
                println!("  Columns added: {:?}", report.columns_added);
                println!("  Indexes created: {:?}", report.indexes_created);
                if let Some(ref backup) = report.backup {
                    println!("  Backup: {}", backup.display());
                }
                print_list("Warnings", &report.warnings);
                print_list("Errors", &report.errors);
            }

            if !report.is_success() {
                return Err(MigrateError::Schema(report.errors.join("; ")));
            }
            Ok(0)
        }
    }
}

async fn rollback(
    cli: &Cli,
    target_dsn: Option<&str>,
    migration_id: Option<&str>,
    yes: bool,
) -> Result<u8, MigrateError> {
    let config = load_config_file(cli)?;
    let target_dsn = match (target_dsn, &config) {
        (Some(dsn), _) => dsn.to_string(),
        (None, Some(config)) => config.target.dsn.clone(),
        (None, None) => {
            return Err(MigrateError::Config(
                "a target DSN is required (argument or -c config)".to_string(),
            ))
        }
    };

    if !yes {
        if !std::io::stdin().is_terminal() {
            return Err(MigrateError::Config(
                "refusing to roll back without --yes on a non-interactive terminal".to_string(),
            ));
        }
        let confirmed = Confirm::new()
            .with_prompt("Delete every row from every table of the target database?")
            .default(false)
            .interact()
            .map_err(|e| MigrateError::Config(e.to_string()))?;
        if !confirmed {
            println!("Rollback cancelled");
            return Ok(0);
        }
    }

    let descriptor = match schema_path(cli, config.as_ref()) {
        Some(path) => Some(SchemaDescriptor::load(path)?),
        None => None,
    };
    let max_connections = config.as_ref().map_or(1, |c| c.migration.max_connections);
    let target = Connection::connect(&target_dsn, max_connections).await?;
    let mut report = rollback_target(&target, descriptor.as_ref()).await;
    target.close().await;

    let store = FileCheckpointStore::new(checkpoint_dir(cli, config.as_ref()));
    // Without an id, only a checkpoint written for these endpoints is removed
    let migration_id = match (migration_id, &config) {
        (Some(id), _) => Some(id.to_string()),
        (None, Some(config)) if config.target.dsn == target_dsn => store
            .latest_for(&config.hash())?
            .map(|c| c.migration_id),
        (None, _) => {
            warn!("No --migration-id and no matching config; checkpoints are left in place");
            None
        }
    };
    if report.success {
        if let Some(id) = migration_id {
            if let Err(e) = store.delete(&id) {
                report.success = false;
                report.errors.push(format!("delete checkpoint {}: {}", id, e));
            }
        }
    }

    if cli.output_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Rollback {}", if report.success { "completed" } else { "failed" });
        println!("  Tables cleared: {:?}", report.tables_cleared);
        print_list("Errors", &report.errors);
    }

    if !report.success {
        return Err(MigrateError::fatal(
            MigrationPhase::RollingBack,
            report.errors.join("; "),
        ));
    }
    Ok(0)
}

/// Load the config file named by `-c`, or `config.yaml` when it exists.
fn load_config_file(cli: &Cli) -> Result<Option<Config>, MigrateError> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => {
            let default = PathBuf::from("config.yaml");
            if !default.exists() {
                return Ok(None);
            }
            default
        }
    };
    let config = Config::load(&path)?;
    info!("Loaded configuration from {:?}", path);
    Ok(Some(config))
}

/// Config file merged with DSNs and flags from the command line.
fn load_config(cli: &Cli, endpoints: &Endpoints) -> Result<Config, MigrateError> {
    let mut config = match (load_config_file(cli)?, &endpoints.source_dsn, &endpoints.target_dsn) {
        (Some(config), _, _) => config,
        (None, Some(source), Some(target)) => Config::from_dsns(source.clone(), target.clone()),
        (None, _, _) => {
            return Err(MigrateError::Config(
                "source and target DSNs are required (arguments or -c config)".to_string(),
            ))
        }
    };

    if let Some(source) = &endpoints.source_dsn {
        config.source.dsn = source.clone();
    }
    if let Some(target) = &endpoints.target_dsn {
        config.target.dsn = target.clone();
    }
    if let Some(dir) = &cli.checkpoint_dir {
        config.migration.checkpoint_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

fn apply_run_overrides(mut config: Config, args: &RunArgs) -> Result<Config, MigrateError> {
    if let Some(batch_size) = args.batch_size {
        config.migration.batch_size = batch_size;
    }
    if let Some(pct) = args.max_data_loss_percent {
        config.migration.max_data_loss_percent = pct;
    }
    if args.skip_post_validation {
        config.migration.post_validation = false;
    }
    config.validate()?;
    Ok(config)
}

fn schema_path<'a>(cli: &'a Cli, config: Option<&'a Config>) -> Option<&'a Path> {
    cli.schema
        .as_deref()
        .or_else(|| config.and_then(|c| c.schema.as_deref()))
}

fn checkpoint_dir(cli: &Cli, config: Option<&Config>) -> PathBuf {
    match (&cli.checkpoint_dir, config) {
        (Some(dir), _) => dir.clone(),
        (None, Some(config)) => config.migration.checkpoint_dir.clone(),
        (None, None) => lite_pg_migrate::MigrationConfig::default().checkpoint_dir,
    }
}

fn load_descriptor(cli: &Cli, config: Option<&Config>) -> Result<SchemaDescriptor, MigrateError> {
    let path = schema_path(cli, config).ok_or_else(|| {
        MigrateError::Config(
            "a schema descriptor is required (--schema or `schema:` in the config)".to_string(),
        )
    })?;
    let descriptor = SchemaDescriptor::load(path)?;
    descriptor.validate()?;
    Ok(descriptor)
}

fn with_decider(manager: MigrationManager, args: &RunArgs) -> MigrationManager {
    if args.rollback_on_failure {
        manager.with_rollback_decider(AlwaysRollback)
    } else if args.no_rollback || !std::io::stdin().is_terminal() {
        manager.with_rollback_decider(NeverRollback)
    } else {
        manager.with_rollback_decider(prompt_rollback)
    }
}

fn prompt_rollback(phase: MigrationPhase, error: &MigrateError) -> bool {
    eprintln!("\nMigration failed during {}: {}", phase, error);
    Confirm::new()
        .with_prompt("Roll back the target database? This deletes all migrated rows")
        .default(false)
        .interact()
        .unwrap_or(false)
}

fn print_migration_report(cli: &Cli, report: &MigrationReport) -> Result<(), MigrateError> {
    if cli.output_json {
        println!("{}", report.to_json()?);
        return Ok(());
    }

    let headline = match report.final_phase {
        MigrationPhase::Completed if report.status == ReportStatus::Success => {
            "Migration completed!"
        }
        MigrationPhase::Completed => "Migration completed with warnings",
        MigrationPhase::RolledBack => "Migration failed and was rolled back",
        _ => "Migration failed",
    };
    println!("\n{}", headline);
    println!("  Migration ID: {}", report.migration_id);
    println!("  Final phase: {}", report.final_phase);
    println!("  Duration: {:.2}s", report.summary.duration_seconds);
    println!("  Tables: {}", report.summary.tables_migrated);
    println!("  Records migrated: {}", report.summary.total_records_migrated);
    println!("  Records failed: {}", report.summary.total_records_failed);
    if let Some(data) = &report.phases.data_migration {
        for (table, partial) in &data.failed_tables {
            println!(
                "  Aborted table {}: {} written, {} failed",
                table, partial.records_migrated, partial.records_failed
            );
            for error in &partial.errors {
                println!("    - {}", error);
            }
        }
    }
    if let Some(post) = &report.phases.post_validation {
        if let Some(loss) = &post.data_integrity {
            println!("  Data loss: {:.2}%", loss.loss_percentage);
        }
        if let Some(sample) = &post.sample_validation {
            println!(
                "  Sample: {} checked, {} mismatches",
                sample.records_checked, sample.mismatches
            );
        }
        print_list("Issues", &post.issues);
    }
    if let Some(error) = &report.error {
        println!("  Error: {}", error);
    }
    if let Some(rollback) = &report.rollback {
        println!(
            "  Rollback: {} ({} tables cleared)",
            if rollback.success { "OK" } else { "FAILED" },
            rollback.tables_cleared.len()
        );
    }
    Ok(())
}

fn print_validation_report(
    cli: &Cli,
    title: &str,
    report: &ValidationReport,
) -> Result<(), MigrateError> {
    if cli.output_json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("{}: {}", title, report.status);
    if let Some(stats) = &report.source_stats {
        println!("  Source records: {}", stats.total_records);
    }
    if let Some(stats) = &report.target_stats {
        println!("  Target records: {}", stats.total_records);
    }
    if let Some(loss) = &report.data_integrity {
        println!(
            "  Data loss: {:.2}% (max {}%)",
            loss.loss_percentage, loss.max_allowed_percent
        );
    }
    if let Some(sample) = &report.sample_validation {
        println!(
            "  Sample: {} checked, {} matches, {} mismatches",
            sample.records_checked, sample.matches, sample.mismatches
        );
    }
    print_list("Issues", &report.issues);
    print_list("Warnings", &report.warnings);
    Ok(())
}

fn print_list(label: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    println!("  {}:", label);
    for item in items {
        println!("    - {}", item);
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
