// ABOUTME: CLI entry point for seren-table-migrator
// ABOUTME: Parses commands and routes to appropriate handlers

use clap::{Parser, Subcommand};
use seren_table_migrator::commands::{self, MigrateOptions};
use seren_table_migrator::config::{load_config_from_file, MigrationConfig};

#[derive(Parser)]
#[command(name = "seren-table-migrator")]
#[command(about = "Copy tables between databases in ordered batches", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy selected tables from source to target
    Migrate {
        #[arg(long)]
        source: String,
        #[arg(long)]
        target: String,
        /// Path to a TOML file with batchsize and flush_interval_ms
        #[arg(long)]
        config: Option<String>,
        /// Rows per batch (overrides the config file)
        #[arg(long)]
        batch_size: Option<u64>,
        /// Copy only these tables (comma-separated)
        #[arg(long, value_delimiter = ',')]
        include_tables: Option<Vec<String>>,
        /// Skip these tables (comma-separated)
        #[arg(long, value_delimiter = ',')]
        exclude_tables: Option<Vec<String>>,
        /// PostgreSQL schema to copy
        #[arg(long, default_value = "public")]
        schema: String,
        /// Log progress lines instead of drawing live progress
        #[arg(long)]
        plain: bool,
    },
    /// List source tables with row counts and primary keys
    Tables {
        #[arg(long)]
        source: String,
        /// PostgreSQL schema to list
        #[arg(long, default_value = "public")]
        schema: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging - default to INFO level if RUST_LOG not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate {
            source,
            target,
            config,
            batch_size,
            include_tables,
            exclude_tables,
            schema,
            plain,
        } => {
            let mut migration_config = match config {
                Some(path) => load_config_from_file(&path)?,
                None => MigrationConfig::default(),
            };
            if let Some(batch_size) = batch_size {
                migration_config = migration_config.with_batch_size(batch_size)?;
            }

            let options = MigrateOptions {
                config: migration_config,
                include_tables,
                exclude_tables,
                schema,
                plain,
            };
            commands::migrate(&source, &target, options).await?;
            Ok(())
        }
        Commands::Tables { source, schema } => {
            commands::tables(&source, &schema).await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_migrate_flags() {
        let cli = Cli::parse_from([
            "seren-table-migrator",
            "migrate",
            "--source",
            "a.db",
            "--target",
            "b.db",
            "--batch-size",
            "500",
            "--exclude-tables",
            "sessions,logs",
        ]);
        match cli.command {
            Commands::Migrate {
                batch_size,
                exclude_tables,
                schema,
                ..
            } => {
                assert_eq!(batch_size, Some(500));
                assert_eq!(
                    exclude_tables,
                    Some(vec!["sessions".to_string(), "logs".to_string()])
                );
                assert_eq!(schema, "public");
            }
            Commands::Tables { .. } => panic!("expected migrate"),
        }
    }
}
