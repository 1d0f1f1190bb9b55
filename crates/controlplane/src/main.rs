mod bootstrap;
mod cli;
mod rpc;
mod state;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = Cli::parse();

    match parsed.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _config_path) = cli::load_config()?;
            serve(config).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = cli::load_config()?;
            let valid = cli::config::validate(&config, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = cli::load_config()?;
            cli::config::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("muxd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Build the control plane, start every background worker, and keep the
/// process alive. The RPC wire codec and transport that would accept
/// incoming connections on `runtime.rpc_bind_addr` are out of scope here —
/// this binary proves out the runtime the transport would sit in front of.
async fn serve(config: muxd_domain::Config) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        tracing::warn!(message = %issue.message, severity = ?issue.severity, "config issue");
    }
    if muxd_domain::Config::has_fatal_issues(&issues) {
        anyhow::bail!("configuration has fatal issues, refusing to start");
    }

    let metrics_enabled = env_flag("METRICS_ENABLED");
    let healthz_enabled = env_flag("HEALTHZ_ENABLED");
    tracing::info!(metrics_enabled, healthz_enabled, "starting muxd");

    let control_plane = bootstrap::build_control_plane(config).await?;
    tracing::info!(
        specs = control_plane.registry.list_active_clients().await.len(),
        "control plane running"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    control_plane.scheduler.stop_all().await;
    Ok(())
}

fn env_flag(name: &str) -> bool {
    matches!(std::env::var(name).as_deref(), Ok("1") | Ok("true"))
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,muxd_controlplane=debug")),
        )
        .json()
        .init();
}
