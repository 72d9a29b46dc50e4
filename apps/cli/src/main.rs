//! `audera` - command-line entry point for the multi-room audio streaming
//! system. Thin shell around `audera-core`: argument parsing, logging,
//! config loading, and signal handling only. Grounded on `thaumic-server`'s
//! `main.rs` (parse → init logging → load config → bootstrap → background
//! tasks → wait for shutdown signal → graceful shutdown).

mod config;

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;

use audera_core::audio::{queue, InputEndpoint, OutputEndpoint};
use audera_core::model::audio::DeviceRole;
use audera_core::model::player::Player;
use audera_core::net::discovery::local_address;
use audera_core::net::Advertiser;
use audera_core::player::PlaybackPipeline;
use audera_core::{bootstrap_player, bootstrap_streamer, run_supervised, validate_role, AuderaError, ConfigStore};

use crate::config::CliConfig;

/// Consecutive audio-device open failures before this process gives up and
/// exits with EIO (spec §6.5, §7 kind 3: "After repeated failure, surface as
/// exit code 5").
const MAX_CONSECUTIVE_DEVICE_FAILURES: u32 = 3;

/// Audera - multi-room synchronized audio streaming.
#[derive(Parser, Debug)]
#[command(name = "audera")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Node role: "streamer" or "player" (spec §6.5).
    role: String,

    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "AUDERA_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Node name (overrides config file; defaults to the OS hostname).
    #[arg(short, long, env = "AUDERA_NAME")]
    name: Option<String>,

    /// Address to advertise (player) or bind discovery from (streamer),
    /// overriding config-file and auto-detection.
    #[arg(short = 'a', long, env = "AUDERA_ADVERTISE_IP")]
    advertise_ip: Option<IpAddr>,

    /// Directory for persistent state (config snapshot).
    #[arg(short = 'd', long, env = "AUDERA_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Audera v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = validate_role(&args.role) {
        log::error!("Invalid role '{}': {e}", args.role);
        std::process::exit(22);
    }

    let mut cli_config = CliConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(ip) = args.advertise_ip {
        cli_config.advertise_ip = Some(ip);
    }
    if let Some(data_dir) = args.data_dir {
        cli_config.data_dir = Some(data_dir);
    }
    if args.name.is_some() {
        cli_config.name = args.name.clone();
    }

    let core_config = cli_config.to_core_config();

    let name = cli_config
        .name
        .clone()
        .or_else(|| hostname::get().ok().and_then(|h| h.into_string().ok()))
        .unwrap_or_else(|| "audera-node".to_string());

    let mac_address = mac_address::get_mac_address()
        .ok()
        .flatten()
        .map(|m| m.to_string())
        .unwrap_or_else(|| "00:00:00:00:00:00".to_string());

    let address = match cli_config.advertise_ip {
        Some(ip) => ip,
        None => local_address()
            .await
            .context("Failed to auto-detect local IP address; pass --advertise-ip")?,
    }
    .to_string();

    log::info!("Identity: name={name}, mac={mac_address}, address={address}");

    let exit_code = match args.role.as_str() {
        "streamer" => run_streamer(&core_config, &name, &mac_address, &address).await?,
        "player" => run_player(&core_config, &name, &mac_address, &address).await?,
        other => {
            log::error!("Invalid role '{other}'");
            22
        }
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM, then cancels `cancel` (spec §7 kind 6:
/// cooperative cancellation, release within one `TIME_OUT`).
async fn wait_for_shutdown_signal(cancel: tokio_util::sync::CancellationToken) {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) = signal::unix::signal(signal::unix::SignalKind::terminate()) {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    log::info!("Shutdown signal received.");
    cancel.cancel();
}

async fn run_streamer(core_config: &audera_core::Config, name: &str, mac_address: &str, address: &str) -> Result<i32> {
    let services = bootstrap_streamer(core_config, name, mac_address, address).context("Failed to bootstrap streamer services")?;

    let device_fatal = Arc::new(AtomicBool::new(false));
    let failures = Arc::new(AtomicU32::new(0));
    let stream_port = core_config.stream_port;

    let signal_task = tokio::spawn(wait_for_shutdown_signal(services.cancel.clone()));

    run_supervised(
        || {
            let clock_task = {
                let clock = services.clock.clone();
                let cancel = services.cancel.clone();
                tokio::spawn(async move {
                    clock.run(audera_core::clock::default_interval(), cancel).await;
                    Ok(())
                })
            };

            let interface = services.config_store.get_interface();
            let input_device = services.config_store.get_device(DeviceRole::Input);
            let (chunks_tx, chunks_rx) = tokio::sync::mpsc::channel(8);

            let input = match InputEndpoint::open(interface, input_device, chunks_tx) {
                Ok(input) => {
                    failures.store(0, Ordering::SeqCst);
                    input
                }
                Err(e) => {
                    log::error!("[Streamer] Failed to open input device: {e}");
                    if failures.fetch_add(1, Ordering::SeqCst) + 1 >= MAX_CONSECUTIVE_DEVICE_FAILURES {
                        device_fatal.store(true, Ordering::SeqCst);
                        services.cancel.cancel();
                    }
                    return vec![clock_task, tokio::spawn(async move { Err(e) })];
                }
            };

            let browser = Arc::clone(&services.browser);
            let cancel = services.cancel.clone();
            let (discovery_tx, discovery_rx) = tokio::sync::mpsc::channel(32);
            let _ = services.events.mdns_ready.send(true);

            let open_stream_sink = move |player: Player| {
                tokio::spawn(async move {
                    let addr = format!("{}:{}", player.address, stream_port);
                    let stream = TcpStream::connect(&addr).await.map_err(AuderaError::Io)?;
                    if let Err(e) = socket2::SockRef::from(&stream).set_nodelay(true) {
                        log::warn!("[Streamer] Failed to set TCP_NODELAY on stream connect to {addr}: {e}");
                    }
                    Ok::<_, AuderaError>((player, stream))
                })
            };

            let pipeline = services.pipeline.clone();
            let run_cancel = cancel.clone();
            let streamer_task = tokio::spawn(async move {
                audera_core::streamer::run(pipeline, Some(input), chunks_rx, discovery_rx, open_stream_sink, run_cancel).await;
                Ok(())
            });

            let browse_task = tokio::spawn(async move { browser.run(discovery_tx, cancel).await });

            vec![clock_task, browse_task, streamer_task]
        },
        services.events.clone(),
        services.cancel.clone(),
    )
    .await;

    signal_task.abort();
    services.shutdown().await;

    Ok(if device_fatal.load(Ordering::SeqCst) { 5 } else { 0 })
}

async fn run_player(core_config: &audera_core::Config, name: &str, mac_address: &str, address: &str) -> Result<i32> {
    let services = bootstrap_player(core_config, name, mac_address, address).context("Failed to bootstrap player services")?;

    let player_record = services.config_store.player_get_or_create(&services.identity);
    let advertise_ip: IpAddr = address.parse().context("Identity address was not a valid IP")?;

    let device_fatal = Arc::new(AtomicBool::new(false));
    let failures = Arc::new(AtomicU32::new(0));
    let output_capacity = core_config.output_queue_capacity;
    let sync_port = core_config.sync_port;
    let stream_port = core_config.stream_port;

    let signal_task = tokio::spawn(wait_for_shutdown_signal(services.cancel.clone()));

    run_supervised(
        || {
            let clock_task = {
                let clock = services.clock.clone();
                let cancel = services.cancel.clone();
                tokio::spawn(async move {
                    clock.run(audera_core::clock::default_interval(), cancel).await;
                    Ok(())
                })
            };

            // Re-registers on every restart round (`mdns-sd` has no in-place
            // update), holding the advertisement alive until this round ends.
            let advertiser_task = {
                let player_record = player_record.clone();
                let cancel = services.cancel.clone();
                tokio::spawn(async move {
                    let advertiser = Advertiser::register(&player_record, advertise_ip, stream_port)?;
                    cancel.cancelled().await;
                    advertiser.shutdown();
                    Ok(())
                })
            };

            let interface = services.config_store.get_interface();
            let output_device = services.config_store.get_device(DeviceRole::Output);
            let (producer, consumer) = queue::bounded(output_capacity);

            let output = match OutputEndpoint::open(interface, output_device, consumer) {
                Ok(output) => {
                    failures.store(0, Ordering::SeqCst);
                    output
                }
                Err(e) => {
                    log::error!("[Player] Failed to open output device: {e}");
                    if failures.fetch_add(1, Ordering::SeqCst) + 1 >= MAX_CONSECUTIVE_DEVICE_FAILURES {
                        device_fatal.store(true, Ordering::SeqCst);
                        services.cancel.cancel();
                    }
                    return vec![clock_task, advertiser_task, tokio::spawn(async move { Err(e) })];
                }
            };

            let pipeline = PlaybackPipeline::new(output);
            let clock = services.clock.clone();
            let cancel = services.cancel.clone();
            let _ = services.events.mdns_ready.send(true);

            let pipeline_task = tokio::spawn(async move {
                let sync_listener = TcpListener::bind(("0.0.0.0", sync_port)).await.map_err(AuderaError::Io)?;
                let stream_listener = TcpListener::bind(("0.0.0.0", stream_port)).await.map_err(AuderaError::Io)?;
                pipeline.run(sync_listener, stream_listener, producer, move || clock.offset(), cancel).await
            });

            vec![clock_task, advertiser_task, pipeline_task]
        },
        services.events.clone(),
        services.cancel.clone(),
    )
    .await;

    signal_task.abort();
    services.shutdown();

    Ok(if device_fatal.load(Ordering::SeqCst) { 5 } else { 0 })
}
