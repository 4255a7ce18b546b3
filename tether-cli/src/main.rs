//! Tether - keep a serial device connected
//!
//! Finds the device by its identity handshake, then sends a command on a
//! fixed period and prints the responses. The connection is monitored in
//! the background and recovered automatically when the device is unplugged
//! and plugged back in.

mod error;
mod settings;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tether_detect::{DiscoverOptions, PortDescriptor, PortScanner, SerialTransport, Transport};
use tether_link::Connector;
use tether_sim::SimTransport;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::CliError;
use crate::settings::Settings;

#[derive(Debug, Parser)]
#[command(name = "tether", version, about = "Find a serial device by handshake and keep it connected")]
struct Args {
    /// Identity token the device must answer with
    #[arg(long)]
    identity: Option<String>,

    /// Baud rate
    #[arg(long)]
    baud: Option<u32>,

    /// Per-operation timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Liveness probe interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Command to send periodically
    #[arg(long)]
    command: Option<String>,

    /// Stop after this many commands
    #[arg(long)]
    count: Option<u64>,

    /// Also probe ports matching the skip patterns
    #[arg(long)]
    include_filtered: bool,

    /// Do not recover a lost connection
    #[arg(long)]
    no_reconnect: bool,

    /// Use simulated ports instead of the real ones
    #[arg(long)]
    simulate: bool,

    /// With --simulate, unplug the device after this many milliseconds and
    /// plug it back in after the same delay
    #[arg(long, requires = "simulate")]
    unplug_after_ms: Option<u64>,

    /// Settings file (default: $XDG_CONFIG_HOME/tether/settings.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective settings to the settings file and exit
    #[arg(long)]
    save_config: bool,

    /// List ports and exit
    #[arg(long)]
    list: bool,

    /// With --list, print JSON
    #[arg(long, requires = "list")]
    json: bool,
}

impl Args {
    /// Override settings with the flags that were given
    fn apply(&self, settings: &mut Settings) {
        if let Some(identity) = &self.identity {
            settings.identity = identity.clone();
        }
        if let Some(baud) = self.baud {
            settings.baud_rate = baud;
        }
        if let Some(timeout) = self.timeout_ms {
            settings.timeout_ms = timeout;
        }
        if let Some(interval) = self.interval_ms {
            settings.monitor_interval_ms = interval;
        }
        if let Some(command) = &self.command {
            settings.command = command.clone();
        }
        if self.no_reconnect {
            settings.auto_reconnect = false;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tether=info,tether_detect=info,tether_link=info,tether_sim=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), CliError> {
    let mut settings = Settings::load(args.config.as_deref())?;
    args.apply(&mut settings);

    if args.save_config {
        let path = match &args.config {
            Some(path) => path.clone(),
            None => Settings::default_path().ok_or(CliError::NoConfigDir)?,
        };
        settings.save(&path)?;
        println!("Settings written to {}", path.display());
        return Ok(());
    }

    if args.simulate {
        let sim = settings.simulation();
        if let Some(ms) = args.unplug_after_ms {
            spawn_replug(sim.clone(), settings.scanner(), Duration::from_millis(ms));
        }
        drive(sim, &settings, &args).await
    } else {
        drive(SerialTransport::new(), &settings, &args).await
    }
}

async fn drive<T: Transport>(transport: T, settings: &Settings, args: &Args) -> Result<(), CliError> {
    if args.list {
        return list_ports(&transport, settings, args.json);
    }

    info!("Starting tether, looking for device '{}'", settings.identity);
    let connector = Connector::new(transport, settings.link_config());
    connector.set_disconnect_callback(|port| {
        warn!("Device disconnected from {}! Waiting for it to be reconnected...", port);
    });
    connector.set_reconnect_callback(|port| {
        info!("Device reconnected on {}! Resuming normal operation.", port);
    });

    let options = DiscoverOptions {
        skip_filtered: !args.include_filtered,
        silent: false,
    };
    let Some(port) = connector.discover_with(options).await else {
        connector.shutdown().await;
        return Err(CliError::DeviceNotFound);
    };
    println!("Successfully connected to device on {}", port);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(settings.command_interval());
    let mut sent = 0u64;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!();
                info!("Program terminated by user");
                break;
            }
            _ = ticker.tick() => {}
        }

        if let Some(response) = connector.send(&settings.command).await {
            println!("Response from device: {}", response);
        }

        sent += 1;
        if args.count.is_some_and(|count| sent >= count) {
            break;
        }
    }

    connector.shutdown().await;
    Ok(())
}

/// Port as printed by `--list`
#[derive(Serialize)]
struct ListedPort {
    #[serde(flatten)]
    descriptor: PortDescriptor,
    skipped: bool,
}

fn list_ports<T: Transport>(transport: &T, settings: &Settings, json: bool) -> Result<(), CliError> {
    let scanner = settings.scanner();
    let ports: Vec<ListedPort> = scanner
        .enumerate_ports(transport)?
        .into_iter()
        .map(|descriptor| ListedPort {
            skipped: scanner.should_skip(&descriptor),
            descriptor,
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    for p in &ports {
        let marker = if p.skipped { " (skipped)" } else { "" };
        println!("{:<32} {}{}", p.descriptor.port, p.descriptor.description, marker);
    }
    Ok(())
}

/// Unplug the first simulated device port after `delay`, then plug it back
fn spawn_replug(sim: SimTransport, scanner: PortScanner, delay: Duration) {
    tokio::spawn(async move {
        let Ok(ports) = sim.enumerate() else {
            return;
        };
        let Some(target) = ports.into_iter().find(|p| !scanner.should_skip(p)) else {
            return;
        };
        let Some(device) = sim.device_config(&target.port) else {
            return;
        };

        tokio::time::sleep(delay).await;
        info!("Simulating unplug of {}", target.port);
        sim.remove_port(&target.port);

        tokio::time::sleep(delay).await;
        info!("Simulating replug of {}", target.port);
        sim.add_port(&target.port, &target.description, device);
    });
}
