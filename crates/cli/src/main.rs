use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use scorecounter_core::{
    BtleplugDriver, ConnectionState, CoreEvent, DeviceAddress, FileStore, NullWatchTransport,
    ScoreCounterCfg, ScoreCounterCore,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "scrc")]
#[command(about = "Remote control for a BLE score counter display")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Settings file location
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive session: scan, connect and drive the score
    Run,
    /// Scan for score counter displays and print what is found
    Scan,
    /// Connect to a device and push a score once
    SetScore {
        address: String,
        left: u16,
        right: u16,
    },
}

fn settings_path(cli: &Cli) -> PathBuf {
    cli.settings.clone().unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("scorecounter-rc")
            .join("settings.json")
    })
}

async fn build_core(cli: &Cli) -> Result<ScoreCounterCore> {
    let store = Arc::new(FileStore::new(settings_path(cli))?);
    let (driver, driver_events) = BtleplugDriver::new().await;
    Ok(ScoreCounterCore::new(
        Arc::new(driver),
        driver_events,
        Arc::new(NullWatchTransport),
        store,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    match &cli.command {
        Some(Commands::Scan) => scan(&cli).await,
        Some(Commands::SetScore {
            address,
            left,
            right,
        }) => set_score(&cli, address.clone(), *left, *right).await,
        Some(Commands::Run) | None => run_interactive(&cli).await,
    }
}

async fn scan(cli: &Cli) -> Result<()> {
    let core = build_core(cli).await?;
    let mut events = core.take_event_receiver().expect("fresh core");

    println!("Scanning for score counters, Ctrl-C to stop...");
    core.start_scan();

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(CoreEvent::DeviceDiscovered { device, name, rssi }) => {
                        println!(
                            "  {} ({}) RSSI: {}",
                            name.as_deref().unwrap_or("Unknown"),
                            device,
                            rssi.map(|r| format!("{r} dBm")).unwrap_or_else(|| "?".into())
                        );
                    }
                    Some(_) => {}
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    core.stop_scan();
    Ok(())
}

async fn set_score(cli: &Cli, address: String, left: u16, right: u16) -> Result<()> {
    let core = build_core(cli).await?;
    let device = DeviceAddress::new(address);

    println!("Connecting to {device}...");
    core.start_scan();
    core.connect(&device);

    // Give the connect pipeline a moment; the queue retries on its own.
    for _ in 0..20 {
        if core.is_connected() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    }
    if !core.is_connected() {
        anyhow::bail!("Could not connect to {device}");
    }

    core.reset_score();
    for _ in 0..left {
        core.increment_left();
    }
    for _ in 0..right {
        core.increment_right();
    }
    if core.confirm_score() {
        println!("Score {left}:{right} sent.");
    } else {
        anyhow::bail!("Score write failed");
    }
    Ok(())
}

async fn run_interactive(cli: &Cli) -> Result<()> {
    let core = build_core(cli).await?;
    let mut events = core.take_event_receiver().expect("fresh core");

    // Event printer
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                CoreEvent::ConnectionStateChanged(ConnectionState::Connected { device }) => {
                    println!("<< connected to {device}");
                }
                CoreEvent::ConnectionStateChanged(ConnectionState::NotConnected) => {
                    println!("<< disconnected");
                }
                CoreEvent::ConnectionStateChanged(ConnectionState::ManuallyDisconnected) => {
                    println!("<< disconnected (manual)");
                }
                CoreEvent::DeviceDiscovered { device, name, .. } => {
                    println!(
                        "<< found {} ({device})",
                        name.as_deref().unwrap_or("Unknown")
                    );
                }
                CoreEvent::ScoreChanged(score) => {
                    println!("<< score {}:{}", score.left, score.right);
                }
                CoreEvent::OrientationChanged { facing_referee } => {
                    println!("<< facing referee: {facing_referee}");
                }
                CoreEvent::DisplayConfigReceived(cfg) => {
                    println!(
                        "<< config: brightness {} score {} time {} scroll {}",
                        cfg.brightness, cfg.use_score, cfg.use_time, cfg.scroll
                    );
                }
                CoreEvent::DisplayConfigPersisted => {
                    println!("<< config persisted");
                }
            }
        }
    });

    println!("Score Counter RC. Type 'help' for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            continue;
        };
        match command {
            "help" => {
                println!(
                    "  scan | stop-scan | connect <addr> | disconnect\n  \
                     +l +r -l -r | swap | reset | flip | ok | cancel\n  \
                     sync | cfg | brightness <0-15> | persist | quit"
                );
            }
            "scan" => core.start_scan(),
            "stop-scan" => core.stop_scan(),
            "connect" => match parts.next() {
                Some(address) => core.connect(&DeviceAddress::new(address)),
                None => println!("usage: connect <addr>"),
            },
            "disconnect" => core.disconnect(),
            "+l" => core.increment_left(),
            "+r" => core.increment_right(),
            "-l" => core.decrement_left(),
            "-r" => core.decrement_right(),
            "swap" => core.swap_score(),
            "reset" => core.reset_score(),
            "flip" => core.toggle_orientation(),
            "ok" => {
                if !core.confirm_score() {
                    println!("(display not reachable, confirmed locally)");
                }
            }
            "cancel" => core.revert_score(),
            "sync" => core.try_sync(),
            "cfg" => {
                core.request_display_config();
            }
            "brightness" => match parts.next().and_then(|v| v.parse::<u8>().ok()) {
                Some(level) => {
                    core.set_display_brightness(level);
                }
                None => println!("usage: brightness <0-15>"),
            },
            "persist" => {
                core.persist_display_config(&ScoreCounterCfg::default());
            }
            "quit" | "exit" => break,
            other => println!("unknown command: {other}"),
        }
    }

    info!("Shutting down");
    core.disconnect();
    Ok(())
}
