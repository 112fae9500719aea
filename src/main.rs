//! tuya-lan - control a Tuya plug or bulb over the local network.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{ArgAction, Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;
use tuya_lan as app;

use app::config::{AppConfig, ConfigLoadResult, LoggingConfig};
use app::profile::Appliance;
use app::tuya::{Dps, TuyaClient};

/// Control a Tuya smart device over the local network.
#[derive(Parser)]
#[command(name = "tuya-lan", version)]
struct Cli {
    /// Use config.toml from current directory (dev mode)
    #[arg(long)]
    dev: bool,

    /// Config file path
    #[arg(long, short, conflicts_with = "dev")]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Device(DeviceCommand),
    /// Write a config file template
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Commands that talk to the configured device.
#[derive(Subcommand)]
enum DeviceCommand {
    /// Print the current data points
    Status {
        /// Print the full response instead of just `dps`
        #[arg(long)]
        schema: bool,
    },
    /// Write raw data points, e.g. `set 1=true 3=25 2=colour`
    Set {
        #[arg(required = true, value_parser = parse_assignment)]
        values: Vec<(String, Value)>,
    },
    /// Switch the device on
    On,
    /// Switch the device off
    Off,
    /// Flip the power state
    Toggle,
    /// Set an RGB colour (255 255 255 selects white mode)
    Colour { r: u8, g: u8, b: u8 },
    /// Set brightness
    Brightness { level: u32 },
}

/// Parse `KEY=VALUE`; the value is JSON when it parses as such, else a string.
fn parse_assignment(s: &str) -> Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{s}`"))?;
    if key.trim().is_empty() {
        return Err(format!("empty data point key in `{s}`"));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.trim().to_string(), value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Determine config path based on mode
    let config_path = if cli.dev {
        PathBuf::from("config.toml")
    } else {
        cli.config.clone().unwrap_or_else(AppConfig::default_path)
    };

    let command = match cli.command {
        Commands::Device(command) => command,
        Commands::InitConfig { force } => {
            let _guard = init_logging(&LoggingConfig::default(), cli.verbose);
            return init_config(&config_path, force);
        }
    };

    let config = match AppConfig::try_load(&config_path) {
        ConfigLoadResult::Loaded(config) => config,
        ConfigLoadResult::Missing => bail!(
            "No config at {}, create one with `tuya-lan init-config`",
            config_path.display()
        ),
        ConfigLoadResult::Invalid(e) => {
            return Err(e).with_context(|| format!("Invalid config {}", config_path.display()));
        }
    };

    let _guard = init_logging(&config.logging, cli.verbose);
    tracing::debug!("Config loaded from {:?}", config_path);

    let cancel = CancellationToken::new();
    let client = TuyaClient::new(config.identity()?)
        .with_policy(config.connection.retry_policy())
        .with_cancellation(cancel.clone());
    let appliance = Appliance::new(client, config.data_points()?);

    // Ctrl-C stops a connect loop against an unreachable device
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            cancel.cancel();
        }
    });

    run(&appliance, command).await.map_err(|e| {
        if e.is_transport() {
            anyhow::Error::new(e).context(format!(
                "Device {} unreachable, no command was applied",
                appliance.client().device().endpoint()
            ))
        } else {
            anyhow::Error::new(e).context("No result from device")
        }
    })
}

async fn run(appliance: &Appliance, command: DeviceCommand) -> app::Result<()> {
    let client = appliance.client();

    match command {
        DeviceCommand::Status { schema } => print_dps(&client.get(schema).await?),
        DeviceCommand::Set { values } => {
            let dps: Dps = values.into_iter().collect();
            print_dps(&client.set(&dps).await?);
        }
        DeviceCommand::On => print_dps(&appliance.turn_on().await?),
        DeviceCommand::Off => print_dps(&appliance.turn_off().await?),
        DeviceCommand::Toggle => match appliance.toggle().await? {
            Some(on) => println!("{}", if on { "on" } else { "off" }),
            None => println!("power state unknown, nothing changed"),
        },
        DeviceCommand::Colour { r, g, b } => print_dps(&appliance.set_colour(r, g, b).await?),
        DeviceCommand::Brightness { level } => print_dps(&appliance.set_brightness(level).await?),
    }

    Ok(())
}

fn print_dps(dps: &Dps) {
    match serde_json::to_string_pretty(dps) {
        Ok(text) => println!("{text}"),
        Err(e) => tracing::error!("Cannot print response: {e}"),
    }
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    AppConfig::default()
        .save(path)
        .with_context(|| format!("Cannot write {}", path.display()))?;
    tracing::info!("Config template written to {}", path.display());
    println!("Wrote {}; fill in device_id and local_key", path.display());
    Ok(())
}

/// Initialize logging: stderr always, plus daily files when configured.
fn init_logging(config: &LoggingConfig, verbose: u8) -> Option<WorkerGuard> {
    let level = match verbose {
        0 => config.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match &config.directory {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "tuya-lan.log"));
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignment_json_values() {
        assert_eq!(parse_assignment("1=true").unwrap(), ("1".to_string(), Value::Bool(true)));
        assert_eq!(parse_assignment("3=25").unwrap(), ("3".to_string(), Value::from(25)));
        assert_eq!(
            parse_assignment("2=colour").unwrap(),
            ("2".to_string(), Value::String("colour".to_string()))
        );
        assert_eq!(parse_assignment("11=").unwrap(), ("11".to_string(), Value::String(String::new())));
    }

    #[test]
    fn test_parse_assignment_rejects_missing_separator() {
        assert!(parse_assignment("1").is_err());
        assert!(parse_assignment("=true").is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["tuya-lan", "--dev", "set", "1=true", "3=25"]).unwrap();
        assert!(cli.dev);
        match cli.command {
            Commands::Device(DeviceCommand::Set { values }) => assert_eq!(values.len(), 2),
            _ => panic!("expected set"),
        }

        let cli = Cli::try_parse_from(["tuya-lan", "colour", "255", "0", "0"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Device(DeviceCommand::Colour { r: 255, g: 0, b: 0 })
        ));

        assert!(Cli::try_parse_from(["tuya-lan", "--dev", "--config", "x.toml", "on"]).is_err());
    }

    #[test]
    fn test_init_config_is_not_a_device_command() {
        let cli = Cli::try_parse_from(["tuya-lan", "init-config", "--force"]).unwrap();
        assert!(matches!(cli.command, Commands::InitConfig { force: true }));

        let cli = Cli::try_parse_from(["tuya-lan", "on"]).unwrap();
        assert!(matches!(cli.command, Commands::Device(DeviceCommand::On)));

        assert!(Cli::try_parse_from(["tuya-lan", "device", "on"]).is_err());
    }
}
