//! meshd - eventmesh daemon
//!
//! Routes Kubernetes events from many clusters to chat and webhook receivers.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use meshd::Settings;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "meshd")]
#[command(about = "Multi-cluster Kubernetes event alerting")]
#[command(version)]
struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text, env = "MESHD_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon
    Run {
        /// Path to the settings file
        #[arg(short, long, default_value = "/etc/eventmesh/meshd.toml", env = "MESHD_SETTINGS")]
        settings: PathBuf,
    },

    /// Validate a routing configuration file without sending anything
    CheckRoutes {
        /// Path to the routing configuration
        path: PathBuf,
    },

    /// Print the custom resource definitions as YAML
    PrintCrds,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    match cli.command {
        Commands::Run { settings } => run_daemon(settings).await?,
        Commands::CheckRoutes { path } => check_routes(&path)?,
        Commands::PrintCrds => print!("{}", mesh_kube::crd_manifests()?),
    }

    Ok(())
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    // `mesh` covers meshd and every mesh_* crate.
    let filter = EnvFilter::from_default_env().add_directive("mesh=info".parse()?);
    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
    }
    Ok(())
}

async fn run_daemon(path: PathBuf) -> anyhow::Result<()> {
    info!(settings = %path.display(), "starting meshd");
    let settings = Settings::from_file(&path)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        on_signal.cancel();
    });

    meshd::run(settings, Some(path), cancel).await?;
    Ok(())
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => info!("received ctrl-c"),
        () = terminate => info!("received SIGTERM"),
    }
}

fn check_routes(path: &std::path::Path) -> anyhow::Result<()> {
    let summary = meshd::check_routes(path)?;
    println!("{}: ok", path.display());
    println!("  receivers: {}", summary.receivers);
    println!("  routes:    {}", summary.routes);
    for name in &summary.unknown_receivers {
        println!("  warning: route references undefined receiver {name:?}");
    }
    Ok(())
}
