//! device-pilot - mobile end-to-end test orchestration
//!
//! This is the binary entry point. All logic lives in the workspace crates;
//! the subcommands expose device tooling and a standalone session for
//! manual runs.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};

use pilot_app::{wait_for_signal, Configurations, InitOptions, Orchestrator, Settings};
use pilot_client::RelayServer;
use pilot_device::{
    simulator::parse_simctl_devices, Adb, CommandRunner, CommandSpec, ExecOptions, ProcessRunner,
    TelnetConsole, ToolPaths,
};

/// device-pilot - mobile end-to-end test orchestration
#[derive(Parser, Debug)]
#[command(name = "pilot")]
#[command(about = "Drive devices and apps for end-to-end tests", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List devices attached to adb
    Devices {
        /// Resolve the AVD name of every emulator
        #[arg(long)]
        names: bool,
    },

    /// List available iOS simulators
    Simulators,

    /// Wake and unlock a device's screen
    Unlock {
        serial: String,
    },

    /// Print the PID of a process on a device
    Pidof {
        serial: String,
        process: String,
    },

    /// Print the instrumentation runner of an app
    Instrumentation {
        serial: String,
        package: String,
    },

    /// Run an embedded relay server until interrupted
    Relay {
        /// Port to listen on (0 picks a free one)
        #[arg(long, default_value_t = 0)]
        port: u16,
    },

    /// Start a session from a configuration file and hold it until interrupted
    Session {
        /// JSON file with named device configurations
        #[arg(long, value_name = "FILE")]
        config: PathBuf,

        /// Configuration to use (overrides PILOT_CONFIGURATION)
        #[arg(long)]
        configuration: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    pilot_core::logging::init()?;

    let args = Args::parse();
    let tools = ToolPaths::locate();

    match args.command {
        Command::Devices { names } => list_devices(&tools, names).await,
        Command::Simulators => list_simulators(&tools).await,
        Command::Unlock { serial } => {
            Adb::with_path(&tools.adb).unlock_screen(&serial).await?;
            println!("{serial} unlocked");
            Ok(())
        }
        Command::Pidof { serial, process } => {
            match Adb::with_path(&tools.adb).pidof(&serial, &process).await? {
                Some(pid) => println!("{pid}"),
                None => {
                    eprintln!("{process} is not running on {serial}");
                    std::process::exit(1);
                }
            }
            Ok(())
        }
        Command::Instrumentation { serial, package } => {
            let runner = Adb::with_path(&tools.adb)
                .instrumentation_runner(&serial, &package)
                .await?;
            println!("{runner}");
            Ok(())
        }
        Command::Relay { port } => run_relay(port).await,
        Command::Session {
            config,
            configuration,
        } => run_session(config, configuration).await,
    }
}

async fn list_devices(tools: &ToolPaths, names: bool) -> Result<()> {
    let listing = Adb::with_path(&tools.adb).devices().await?;
    if listing.devices.is_empty() {
        eprintln!("No devices attached");
        return Ok(());
    }

    let console = TelnetConsole::new();
    for device in &listing.devices {
        let avd = if names && device.kind.is_emulator() {
            match device.query_name(&console).await {
                Ok(name) => name,
                Err(e) => {
                    tracing::warn!("Could not query {}: {}", device.adb_name, e);
                    None
                }
            }
        } else {
            None
        };
        println!(
            "{:<24} {:<14} {:<12} {}",
            device.adb_name,
            format!("{:?}", device.kind),
            device.status,
            avd.unwrap_or_default()
        );
    }
    Ok(())
}

async fn list_simulators(tools: &ToolPaths) -> Result<()> {
    let spec = CommandSpec::new(&tools.xcrun).args(["simctl", "list", "devices", "-j"]);
    let output = ProcessRunner
        .execute(&spec, &ExecOptions::default())
        .await?;
    for sim in parse_simctl_devices(&output.stdout)? {
        println!("{:<38} {:<28} {:<10} {:?}", sim.udid, sim.name, sim.runtime, sim.state);
    }
    Ok(())
}

async fn run_relay(port: u16) -> Result<()> {
    let relay = RelayServer::bind(port).await?;
    println!("Relay listening on {}", relay.url());
    wait_for_signal().await?;
    relay.shutdown().await;
    Ok(())
}

async fn run_session(config: PathBuf, configuration: Option<String>) -> Result<()> {
    let configurations = Configurations::load(&config)?;
    let mut settings = Settings::from_env()?;
    if let Some(name) = configuration {
        settings.configuration = Some(name);
    }

    let mut orchestrator = Orchestrator::native(settings, configurations);
    tokio::select! {
        started = orchestrator.init(InitOptions::default()) => started?,
        signalled = wait_for_signal() => {
            signalled?;
            orchestrator.kill();
            return Err(eyre!("Interrupted while starting the session"));
        }
    }

    if let Some(device) = orchestrator.exported_device() {
        println!(
            "Session {} on {} device {} ({})",
            device.session.session_id, device.platform, device.id, device.configuration
        );
    }
    println!("Press Ctrl+C to end the session");

    wait_for_signal().await?;
    orchestrator.cleanup().await?;
    Ok(())
}
