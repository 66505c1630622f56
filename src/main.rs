use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use server_manager::backup::BackupKind;
use server_manager::cli::{
    handle_backup, handle_cleanup, handle_config, handle_history, handle_list, handle_prune,
    handle_restore, handle_snapshots, handle_status, handle_verify, CliContext,
};
use server_manager::config::{ManagerPaths, Settings};
use server_manager::credential::{prompt_passphrase, CredentialProvider, EnvCredentialProvider};
use server_manager::models::ServiceId;

#[derive(Parser)]
#[command(
    name = "server-manager",
    version,
    about = "Backup, verify, prune and restore self-hosted services",
    long_about = "server-manager backs up nginx Proxy Manager, Mailcow and itself to \
                  remote borg repositories over SSH, verifies every new archive before \
                  pruning old ones, and restores with a safety snapshot of the previous \
                  installation."
)]
struct Cli {
    /// Settings file (default: $SERVER_MANAGER_HOME/config/settings.yaml)
    #[arg(long, global = true, env = "SERVER_MANAGER_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Prompt for the repository passphrase instead of reading it from the environment
    #[arg(long, global = true)]
    ask_pass: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up a service
    Backup {
        #[arg(value_enum)]
        service: ServiceId,
        /// What to back up (mail only distinguishes kinds)
        #[arg(short, long, value_enum, default_value_t = BackupKind::All)]
        kind: BackupKind,
        /// Do not verify the new archive (pruning still runs)
        #[arg(long)]
        skip_verify: bool,
    },

    /// Restore a service from an archive
    Restore {
        #[arg(value_enum)]
        service: ServiceId,
        /// Archive name, or 'latest'
        archive: String,
        /// Skip the plan and restore
        #[arg(short, long)]
        force: bool,
    },

    /// Verify that an archive lists cleanly
    Verify {
        #[arg(value_enum)]
        service: ServiceId,
        /// Archive name, or 'latest'
        #[arg(default_value = "latest")]
        archive: String,
    },

    /// List archives of a service, newest first
    List {
        #[arg(value_enum)]
        service: ServiceId,
    },

    /// Archive counts and latest archive for every service
    Status,

    /// Show the retention plan and delete with --force
    Prune {
        #[arg(value_enum)]
        service: ServiceId,
        /// Delete the archives the policy does not keep
        #[arg(short, long)]
        force: bool,
    },

    /// List pre-restore safety snapshots
    Snapshots {
        #[arg(value_enum)]
        service: ServiceId,
    },

    /// Remove stale staged exports
    Cleanup {
        /// Age in days (default: backup.staging_retention_days)
        #[arg(short, long)]
        days: Option<u32>,
        /// Only show what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// Show recent runs
    History {
        /// Number of runs to show
        #[arg(short = 'n', long, default_value = "20")]
        count: usize,
    },

    /// Show current configuration and paths
    Config {
        /// Write the effective settings to the settings file if it is missing
        #[arg(long)]
        init: bool,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut paths = ManagerPaths::new();
    if let Some(config) = cli.config {
        paths = paths.with_settings_file(config);
    }
    let settings = Settings::load(&paths.settings_file())?;
    let config = settings.resolve()?;

    let credentials: Box<dyn CredentialProvider> = if cli.ask_pass {
        Box::new(prompt_passphrase()?)
    } else {
        Box::new(EnvCredentialProvider::from_settings(&settings.credentials))
    };
    let ctx = CliContext::new(paths, config, credentials);

    let code = match cli.command {
        Some(Commands::Backup {
            service,
            kind,
            skip_verify,
        }) => handle_backup(&ctx, service, kind, skip_verify)?,
        Some(Commands::Restore {
            service,
            archive,
            force,
        }) => handle_restore(&ctx, service, &archive, force)?,
        Some(Commands::Verify { service, archive }) => handle_verify(&ctx, service, &archive)?,
        Some(Commands::List { service }) => {
            handle_list(&ctx, service)?;
            0
        }
        Some(Commands::Status) => {
            handle_status(&ctx)?;
            0
        }
        Some(Commands::Prune { service, force }) => handle_prune(&ctx, service, force)?,
        Some(Commands::Snapshots { service }) => {
            handle_snapshots(&ctx, service)?;
            0
        }
        Some(Commands::Cleanup { days, dry_run }) => {
            handle_cleanup(&ctx, days, dry_run)?;
            0
        }
        Some(Commands::History { count }) => {
            handle_history(&ctx, count)?;
            0
        }
        Some(Commands::Config { init }) => {
            handle_config(&ctx, &settings, init)?;
            0
        }
        None => {
            println!("server-manager - backup and restore for self-hosted services");
            println!();
            println!("Run 'server-manager --help' for usage information.");
            0
        }
    };

    // drop the credential provider (zeroing the passphrase) before exiting
    drop(ctx);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
