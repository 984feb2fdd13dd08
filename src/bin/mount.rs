//! Demo exerciser binary wiring the union filesystem core against two real
//! directories. Full kernel-level FUSE integration is out of scope for the
//! core (see the crate's design notes); this binary drives the
//! [`Dispatcher`] directly so the core is runnable and inspectable without
//! one.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use unionfs_core::config::Cli;
use unionfs_core::copyup::StdCopyup;
use unionfs_core::host::StdHostFs;
use unionfs_core::path::LogicalPath;
use unionfs_core::Dispatcher;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = match cli.resolve().await {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid mount configuration");
            return ExitCode::FAILURE;
        }
    };

    let roots = match config.branch_config() {
        Ok(roots) => roots,
        Err(err) => {
            error!(error = %err, "invalid branch roots");
            return ExitCode::FAILURE;
        }
    };

    info!(
        ro_root = %roots.ro_root().display(),
        rw_root = %roots.rw_root().display(),
        "mounting union filesystem core"
    );

    let dispatcher = Dispatcher::new(
        Arc::new(StdHostFs),
        roots,
        Arc::new(StdCopyup),
        config.fs_magic,
        config.fsid_seed,
    );

    let root = LogicalPath::root();
    match dispatcher.getattr(&root).await {
        Ok(stat) => info!(?stat, "root resolves"),
        Err(err) => {
            error!(error = %err, "root does not resolve");
            return ExitCode::FAILURE;
        }
    }

    match dispatcher.statfs().await {
        Ok(stat) => info!(?stat, "statfs"),
        Err(err) => error!(error = %err, "statfs failed"),
    }

    ExitCode::SUCCESS
}
