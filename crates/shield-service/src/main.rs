use anyhow::Result;
use clap::{Parser, Subcommand};
use shield_core::MonitorSettings;
use shield_service::engine::{EngineConfig, IntegrityEngine};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Host-based file integrity monitor with ransomware rollback", long_about = None)]
struct Cli {
    /// Directory holding the baseline database, key file, shadow copies
    /// and audit log
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the protection baseline for the given targets and exit
    Baseline {
        /// Files or directory trees to protect
        #[arg(required = true)]
        targets: Vec<PathBuf>,
    },
    /// Monitor the given targets until interrupted
    Run {
        /// Files or directory trees to protect
        #[arg(required = true)]
        targets: Vec<PathBuf>,
        /// Detect attacks but never roll files back
        #[arg(long)]
        no_auto_restore: bool,
        /// Address for operator alerts
        #[arg(long, default_value = "")]
        alert_email: String,
        /// Disable the incident audit log
        #[arg(long)]
        no_logs: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    std::fs::create_dir_all(&cli.data_dir)?;

    match cli.command {
        Commands::Baseline { targets } => {
            let config = EngineConfig::in_dir(&cli.data_dir);
            let engine = Arc::new(IntegrityEngine::new(config, targets)?);
            let protected = engine.scan_and_save_baseline().await?;
            info!(count = protected.len(), "baseline complete");
            Ok(())
        }
        Commands::Run {
            targets,
            no_auto_restore,
            alert_email,
            no_logs,
        } => {
            let mut config = EngineConfig::in_dir(&cli.data_dir);
            config.settings = MonitorSettings {
                save_logs: !no_logs,
                alert_email,
                auto_restore: !no_auto_restore,
            };
            let engine = Arc::new(IntegrityEngine::new(config, targets)?);

            if engine.baseline_is_empty()? {
                engine.scan_and_save_baseline().await?;
            }

            let runner = engine.clone();
            let monitor = tokio::spawn(async move { runner.run().await });

            signal::ctrl_c().await?;
            info!("shutting down");
            engine.stop();
            monitor.await??;
            Ok(())
        }
    }
}
