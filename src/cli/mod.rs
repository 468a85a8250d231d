//! Command-line interface.
//!
//! Without a subcommand the binary starts the HTTP server. The subcommands
//! open the store directly and exit:
//! - `export` - Write a JSON export of selected collections
//! - `backup` - Store a manual backup
//! - `sweep-sessions` - Remove expired sessions
//! - `config check` - Validate the configuration file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::db::{Actor, BackupType, ClinicStore};

/// CLI arguments structure
#[derive(Parser, Debug)]
#[command(name = "clinicstore")]
#[command(author, version, about = "Clinic records store and API server", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "clinicstore.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Subcommand to run (if none, starts the server)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export collections as JSON
    Export {
        /// Comma-separated collection names (default: everything but backups)
        #[arg(short, long, value_delimiter = ',')]
        tables: Vec<String>,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Store a manual backup and prune old ones
    Backup,

    /// Remove expired sessions
    SweepSessions,

    /// Configuration management commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Check,
}

/// Run a CLI subcommand against the configured store
pub async fn run_command(cli: &Cli, config: &Config) -> Result<()> {
    match &cli.command {
        Some(Commands::Config(ConfigCommands::Check)) => cmd_config_check(&cli.config),
        Some(command) => {
            let store = ClinicStore::open(config).await?;
            let result = run_store_command(&store, command).await;
            store.close().await;
            result
        }
        None => {
            // No subcommand means start the server - this is handled in main.rs
            Ok(())
        }
    }
}

async fn run_store_command(store: &ClinicStore, command: &Commands) -> Result<()> {
    match command {
        Commands::Export { tables, output } => {
            let tables = if tables.is_empty() {
                None
            } else {
                Some(tables.clone())
            };
            let export = store.export_data(tables).await?;
            let json = serde_json::to_string_pretty(&export)?;
            match output {
                Some(path) => {
                    std::fs::write(path, json)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!(
                        "Exported {} records to {}",
                        export.record_count(),
                        path.display()
                    );
                }
                None => println!("{}", json),
            }
        }
        Commands::Backup => {
            let summary = store.create_backup(BackupType::Manual, Actor::System).await?;
            println!(
                "Backup {} created: {} records, {}",
                summary.id, summary.record_count, summary.size_human
            );
        }
        Commands::SweepSessions => {
            let removed = store.sweep_expired_sessions().await?;
            println!("Removed {} expired session(s)", removed);
        }
        Commands::Config(_) => {}
    }
    Ok(())
}

fn cmd_config_check(config_path: &Path) -> Result<()> {
    println!("Checking configuration file: {}", config_path.display());
    println!();

    if !config_path.exists() {
        println!(
            "[!!] Configuration file not found: {}",
            config_path.display()
        );
        println!("A default configuration will be used when starting the server.");
        return Ok(());
    }

    let config = Config::load(config_path)?;
    println!("[OK] Configuration file is valid!");
    println!();
    println!("Server:");
    println!("  Address:      {}:{}", config.server.host, config.server.port);
    println!("  Data Dir:     {}", config.server.data_dir.display());
    println!();
    println!("Sessions:");
    println!("  TTL:          {}h", config.auth.session_ttl_hours);
    println!("  Sliding:      {}m", config.auth.sliding_window_minutes);
    println!();
    println!(
        "Maintenance:    {}",
        if config.maintenance.enabled {
            "Enabled"
        } else {
            "Disabled"
        }
    );

    if config.auth.admin_password == crate::config::default_admin_password() {
        println!();
        println!("Warnings:");
        println!("  [!] The default administrator password is configured; change it after first login");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_export_tables() {
        let cli = Cli::try_parse_from([
            "clinicstore",
            "export",
            "--tables",
            "patients,appointments",
            "-o",
            "out.json",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Export { tables, output }) => {
                assert_eq!(tables, vec!["patients", "appointments"]);
                assert_eq!(output, Some(PathBuf::from("out.json")));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_no_subcommand_starts_server() {
        let cli = Cli::try_parse_from(["clinicstore", "-c", "custom.toml"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
    }

    #[tokio::test]
    async fn test_sweep_sessions_command() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::for_data_dir(dir.path());
        let cli = Cli::try_parse_from(["clinicstore", "sweep-sessions"]).unwrap();
        run_command(&cli, &config).await.unwrap();
    }
}
