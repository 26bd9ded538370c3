mod console;
mod http;
mod mpv;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use wave_engine::{
    Capabilities, PlaybackCoordinator, PlayerOptions, SourceFetcher, SymphoniaDecoder, WavePlayer,
};
use wave_proto::config::Config;
use wave_proto::protocol::LifecycleEvent;

use crate::console::Input;

/// Terminal waveform player backed by mpv.
#[derive(Parser, Debug)]
#[command(name = "wavep", version, about)]
struct Cli {
    /// Audio URL or file path to open.
    src: Option<String>,

    /// Number of waveform bars.
    #[arg(long)]
    bars: Option<usize>,

    /// Start playing as soon as the source is ready.
    #[arg(long)]
    autoplay: bool,

    /// Seconds allowed for fetching and decoding before a synthetic waveform is shown.
    #[arg(long)]
    timeout: Option<u64>,

    /// Seed for the synthetic fallback waveform.
    #[arg(long)]
    seed: Option<u64>,

    /// Serve the HTTP control API.
    #[arg(long)]
    http: bool,

    /// HTTP API port.
    #[arg(long)]
    port: Option<u16>,

    /// Initial mpv volume, 0.0 to 1.0.
    #[arg(long)]
    volume: Option<f32>,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(bars) = self.bars {
            config.player.bar_count = bars;
        }
        if self.autoplay {
            config.player.autoplay = true;
        }
        if let Some(timeout) = self.timeout {
            config.analysis.timeout_secs = timeout;
        }
        if self.seed.is_some() {
            config.analysis.fallback_seed = self.seed;
        }
        if self.http {
            config.http.enabled = true;
        }
        if let Some(port) = self.port {
            config.http.port = port;
        }
        if let Some(volume) = self.volume {
            config.mpv.default_volume = volume;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_dir = wave_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("wavep.log");
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

    eprintln!("wavep log: {}", log_path.display());
    tracing::info!("wavep starting…");

    // ── Config ───────────────────────────────────────────────────────────────
    let mut config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("config: {}; using defaults", e);
        Config::default()
    });
    cli.apply(&mut config);

    // ── Player ───────────────────────────────────────────────────────────────
    let mpv = Arc::new(mpv::MpvResource::spawn(config.mpv.default_volume).await?);
    let caps = Capabilities {
        resource: mpv.clone(),
        fetcher: Arc::new(SourceFetcher::default()),
        decoder: Arc::new(SymphoniaDecoder::new()),
    };
    let mut options = PlayerOptions::from_config(&config);
    options.src = cli.src.clone();
    let player = Arc::new(WavePlayer::spawn(options, caps, PlaybackCoordinator::new())?);

    // ── HTTP server ──────────────────────────────────────────────────────────
    let http_task = if config.http.enabled {
        Some(http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            player.clone(),
        ))
    } else {
        None
    };

    let printer = tokio::spawn(print_events(player.clone(), player.subscribe()));
    if cli.src.is_none() {
        println!("no source yet; open one with: o <url>");
    }
    println!("{}", console::HELP);

    // ── Command loop ─────────────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match console::parse_line(&line) {
            Ok(None) => {}
            Ok(Some(Input::Quit)) => break,
            Ok(Some(Input::Help)) => println!("{}", console::HELP),
            Ok(Some(Input::Status)) => println!("{}", console::render_status(&player.snapshot())),
            Ok(Some(Input::Command(cmd))) => {
                tracing::debug!("console: {:?}", cmd);
                if let Err(e) = player.dispatch(cmd) {
                    println!("{}", e);
                }
            }
            Err(msg) => println!("{}", msg),
        }
    }

    // ── Shutdown ─────────────────────────────────────────────────────────────
    tracing::info!("wavep shutting down");
    if let Some(task) = http_task {
        task.abort();
    }
    printer.abort();
    player.shutdown().await;
    // Give mpv a moment to act on the final stop before it is killed.
    tokio::time::sleep(Duration::from_millis(100)).await;
    mpv.kill().await;
    Ok(())
}

async fn print_events(player: Arc<WavePlayer>, mut rx: broadcast::Receiver<LifecycleEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Some(text) = console::describe(&event) {
                    println!("[{}] {}", chrono::Local::now().format("%H:%M:%S"), text);
                }
                if event == LifecycleEvent::Loaded {
                    println!("{}", console::render_status(&player.snapshot()));
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!("event printer lagged by {}", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
