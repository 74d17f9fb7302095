use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tunedeck_client::core::{forward_sink_events, ClientCore, CoreEvent};
use tunedeck_client::http::HttpBackend;
use tunedeck_client::mpv::MpvSink;
use tunedeck_client::shell::{self, ShellInput};
use tunedeck_proto::config::Config;
use tunedeck_proto::protocol::{Broadcast, Command};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let data_dir = tunedeck_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("tunedeck.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Allow RUST_LOG override; default to debug for app code but suppress noisy
    // connection-level DEBUG from HTTP client internals (hyper_util, reqwest).
    let log_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "debug,hyper_util=warn,reqwest=warn,hyper=warn".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    eprintln!("tunedeck log: {}", log_path.display());
    tracing::info!("tunedeck starting…");

    // ── Load config ──────────────────────────────────────────────────────────
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("config: {:#}, using defaults", e);
            Config::default()
        }
    };
    tracing::info!("backend: {}", config.backend.base());

    // ── Channels ─────────────────────────────────────────────────────────────
    let (broadcast_tx, mut broadcast_rx) = broadcast::channel::<Broadcast>(256);
    let (event_tx, event_rx) = mpsc::channel::<CoreEvent>(256);
    let (sink_tx, sink_rx) = mpsc::channel(64);

    // ── Build ClientCore ─────────────────────────────────────────────────────
    let backend = Arc::new(HttpBackend::new(&config.backend)?);
    let sink = Arc::new(MpvSink::new(config.playback.default_volume, sink_tx));
    let core = ClientCore::new(config, backend, sink, broadcast_tx, event_tx.clone());
    forward_sink_events(sink_rx, event_tx.clone());

    let core_task = tokio::spawn(async move {
        if let Err(e) = core.run(event_rx).await {
            tracing::error!("ClientCore exited with error: {}", e);
        }
    });

    // ── Printer ──────────────────────────────────────────────────────────────
    tokio::spawn(async move {
        loop {
            match broadcast_rx.recv().await {
                Ok(msg) => print!("{}", shell::render(&msg)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("printer lagged by {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // ── Read commands ────────────────────────────────────────────────────────
    println!("{}", shell::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match shell::parse_line(&line) {
            Ok(ShellInput::Command(cmd)) => {
                if event_tx.send(CoreEvent::Command(cmd)).await.is_err() {
                    break;
                }
            }
            Ok(ShellInput::Help) => println!("{}", shell::HELP),
            Ok(ShellInput::Empty) => {
                let _ = event_tx.send(CoreEvent::Command(Command::GetState)).await;
            }
            Ok(ShellInput::Quit) => break,
            Err(usage) => println!("{}", usage),
        }
    }

    let _ = event_tx.send(CoreEvent::Shutdown).await;
    let _ = core_task.await;
    tracing::info!("tunedeck exiting");
    Ok(())
}
