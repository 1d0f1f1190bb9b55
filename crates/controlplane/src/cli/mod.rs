pub mod config;

use clap::{Parser, Subcommand};

/// muxd — the control-plane daemon that fronts a fleet of tool-serving
/// backend processes behind one RPC surface.
#[derive(Debug, Parser)]
#[command(name = "muxd", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the control plane (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

/// Load the configuration from the path named by `MUXD_CONFIG` (or
/// `config.toml` by default). Returns the parsed [`Config`] and the path
/// that was used. Shared by `serve`, `doctor`, and `config` subcommands.
pub fn load_config() -> anyhow::Result<(muxd_domain::Config, String)> {
    let config_path = std::env::var("MUXD_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        muxd_domain::Config::default()
    };

    Ok((config, config_path))
}
