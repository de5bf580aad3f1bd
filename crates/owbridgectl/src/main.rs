use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use onewire_bridge::{
    keys, Bridge, BridgeConfig, Directory, MemoryDirectory, RunState, WritablePolicy,
};
use owvocab::Vocabulary;

const DEFAULT_INTERVAL_SECS: u64 = 60;

#[derive(Parser, Debug)]
#[command(name = "owbridgectl", version, about = "EDS OWServer bridge CLI")]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Gateway address: host[:port] or file://path/to/details.xml
    #[arg(long)]
    address: Option<String>,
    /// Basic auth login name
    #[arg(long)]
    login: Option<String>,
    /// Basic auth password
    #[arg(long)]
    password: Option<String>,
    /// Poll interval in seconds
    #[arg(long)]
    interval: Option<u64>,
    /// TOML configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,
    /// Poll once and exit
    #[arg(long)]
    once: bool,
    /// Treat only the exact string "True" as writable
    #[arg(long)]
    strict_writable: bool,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct Settings {
    address: String,
    login: String,
    password: String,
    interval: Option<u64>,
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("read config file {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("parse {}", path.display()))?
        }
        None => Settings::default(),
    };
    if let Some(address) = &cli.address {
        settings.address = address.clone();
    }
    if let Some(login) = &cli.login {
        settings.login = login.clone();
    }
    if let Some(password) = &cli.password {
        settings.password = password.clone();
    }
    if cli.interval.is_some() {
        settings.interval = cli.interval;
    }
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| level.into()),
        ))
        .with_target(false)
        .init();

    let settings = load_settings(&cli)?;
    if settings.address.is_empty() {
        warn!("no gateway address configured; polls will fail until one is set");
    }

    let policy = if cli.strict_writable {
        WritablePolicy::CaseSensitive
    } else {
        WritablePolicy::CaseInsensitive
    };
    let bridge = Bridge::new(
        MemoryDirectory::new(),
        Vocabulary::builtin(),
        BridgeConfig {
            writable_policy: policy,
            ..BridgeConfig::default()
        },
    );
    bridge.setup_gateway_entity(&settings.address);
    let gw = bridge.gateway_id().to_string();
    if !settings.login.is_empty() {
        bridge.directory().set_config(&gw, keys::LOGIN_NAME, &settings.login);
        bridge.directory().set_config(&gw, keys::PASSWORD, &settings.password);
    }
    if let Some(interval) = settings.interval {
        bridge
            .directory()
            .set_config(&gw, keys::POLL_INTERVAL, &interval.to_string());
    }

    let mut interval = settings.interval.unwrap_or(DEFAULT_INTERVAL_SECS).max(1);
    loop {
        let report = bridge.poll().await;
        match report.state {
            RunState::Ready => info!(
                devices = report.devices_seen,
                sensors = report.sensors_published,
                latency_ms = report.latency.map(|l| l.as_millis() as u64),
                "poll complete"
            ),
            RunState::Error => warn!(
                message = report.message.as_deref().unwrap_or(""),
                "poll failed"
            ),
        }
        if cli.once {
            break;
        }
        if let Some(requested) = bridge.directory().requested_interval() {
            if requested != interval && requested > 0 {
                info!(seconds = requested, "poll interval reconfigured");
                interval = requested;
            }
        }
        tokio::time::sleep(Duration::from_secs(interval)).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_defaults() {
        let cli = Cli::parse_from(["owbridgectl"]);
        assert_eq!(cli.verbose, 0);
        assert!(cli.address.is_none());
        assert!(!cli.once);
        assert!(!cli.strict_writable);
    }

    #[test]
    fn flags_override_config_file() {
        let path = std::env::temp_dir().join("owbridgectl-settings.toml");
        std::fs::write(&path, "address = \"10.0.0.5\"\ninterval = 30\n").unwrap();
        let cli = Cli::parse_from([
            "owbridgectl",
            "--config",
            path.to_str().unwrap(),
            "--address",
            "10.0.0.9",
        ]);
        let settings = load_settings(&cli).unwrap();
        assert_eq!(settings.address, "10.0.0.9");
        assert_eq!(settings.interval, Some(30));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn unknown_config_keys_are_rejected() {
        let path = std::env::temp_dir().join("owbridgectl-bad-settings.toml");
        std::fs::write(&path, "adress = \"typo\"\n").unwrap();
        let cli = Cli::parse_from(["owbridgectl", "--config", path.to_str().unwrap()]);
        assert!(load_settings(&cli).is_err());
        std::fs::remove_file(&path).ok();
    }
}
