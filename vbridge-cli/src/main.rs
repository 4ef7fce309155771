//! vbridge: route video between capture cards and NDI endpoints.
//!
//! ```text
//! vbridge list-sources [--timeout-ms N]       Print announced network sources
//! vbridge run                                 Configured card input to the configured sender
//! vbridge run --source ndi                    Configured receiver name to the configured output
//! vbridge run --source hw:0 --sink ndi:Out    Card input to a named NDI sender
//! vbridge run --source ndi:Cam --sink none    Receive and preview only
//! vbridge gen-config                          Write default config to stdout
//! ```
//!
//! Without the `ndi-sdk` feature both backends run in-process, and `--demo`
//! announces a colour-bar sender so there is something to receive.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use vbridge_native::loopback::LoopbackCard;
use vbridge_native::NetworkLibrary;
use vbridge_router::{
    Backends, BridgeConfig, EndpointSelection, FrameRouter, RouterEvent, SinkSelection,
};

/// Card devices exposed by the loopback driver
const LOOPBACK_DEVICES: u32 = 4;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "vbridge", version, about = "Bridge SDI capture cards and NDI")]
struct Cli {
    /// Path to a configuration TOML file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List network sources announced within the timeout
    ListSources {
        /// Overrides network.discovery_timeout_ms
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Route one source to one sink until Ctrl-C
    Run {
        /// hw[:<device>] or ndi[:<name>]; defaults to the configured input device
        #[arg(long)]
        source: Option<String>,

        /// ndi[:<name>], hw[:<device>] or none; defaults to the other kind of
        /// endpoint from the configuration
        #[arg(long)]
        sink: Option<String>,

        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<u64>,

        /// Announce a loopback sender under this name from card input 3
        #[arg(long)]
        demo: Option<String>,
    },
    /// Print the default configuration and exit
    GenConfig,
}

// ── Backends ─────────────────────────────────────────────────────

#[cfg(feature = "ndi-sdk")]
fn network_library() -> Arc<dyn NetworkLibrary> {
    Arc::new(vbridge_native::ndi::NdiLibrary::new())
}

#[cfg(not(feature = "ndi-sdk"))]
fn network_library() -> Arc<dyn NetworkLibrary> {
    Arc::new(vbridge_native::loopback::LoopbackNetwork::new())
}

fn backends() -> Backends {
    Backends::new(Arc::new(LoopbackCard::new(LOOPBACK_DEVICES)), network_library())
}

// ── Commands ─────────────────────────────────────────────────────

fn list_sources(config: BridgeConfig, timeout_ms: Option<u64>) -> Result<()> {
    let timeout = timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.network.discovery_timeout());
    let router = FrameRouter::new(backends(), config);

    let sources = router.list_sources(timeout);
    if sources.is_empty() {
        println!("no sources found within {timeout:?}");
    }
    for source in sources {
        println!("{source}");
    }
    Ok(())
}

fn run(
    config: BridgeConfig,
    source: Option<&str>,
    sink: Option<&str>,
    seconds: Option<u64>,
    demo: Option<String>,
) -> Result<()> {
    let source = config
        .source_selection(source)
        .with_context(|| format!("invalid source {source:?}"))?;
    let sink = config
        .sink_selection(sink, &source)
        .with_context(|| format!("invalid sink {sink:?}"))?;
    let backends = backends();

    let demo = match demo {
        Some(name) => {
            let feed = FrameRouter::new(backends.clone(), config.clone());
            feed.start(
                EndpointSelection::Hardware(LOOPBACK_DEVICES - 1),
                Some(SinkSelection::Network(name.clone())),
            )
            .with_context(|| format!("starting demo sender {name:?}"))?;
            log::info!("demo sender {:?} announced", name);
            Some(feed)
        }
        None => None,
    };

    let router = FrameRouter::new(backends, config);
    let events = router.events();
    thread::Builder::new()
        .name("vbridge-events".into())
        .spawn(move || {
            for event in events {
                match event {
                    RouterEvent::State(state) => log::info!("router {}", state),
                    RouterEvent::Error(e) => log::warn!("router error: {}", e),
                }
            }
        })
        .context("spawning event printer")?;

    let label = sink.as_ref().map_or_else(|| "preview".to_string(), |s| s.to_string());
    router
        .start(source.clone(), sink)
        .with_context(|| format!("routing {source} to {label}"))?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .context("installing Ctrl-C handler")?;

    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));
    let mut last_report = Instant::now();
    while running.load(Ordering::SeqCst) && deadline.map_or(true, |d| Instant::now() < d) {
        thread::sleep(Duration::from_millis(100));

        if last_report.elapsed() >= Duration::from_secs(5) {
            let stats = router.stats();
            log::info!(
                "forwarded {} frames, {} send failures",
                stats.frames_forwarded,
                stats.send_failures
            );
            last_report = Instant::now();
        }
    }

    router.stop();
    if let Some(feed) = demo {
        feed.stop();
    }

    let stats = router.stats();
    log::info!(
        "stopped after {} frames ({} send failures, {} events dropped)",
        stats.frames_forwarded,
        stats.send_failures,
        stats.events_dropped
    );
    Ok(())
}

// ── Main ─────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vbridge=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &cli.config {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => BridgeConfig::default(),
    };

    match cli.command {
        Command::GenConfig => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Command::ListSources { timeout_ms } => list_sources(config, timeout_ms),
        Command::Run {
            source,
            sink,
            seconds,
            demo,
        } => {
            log::info!("vbridge v{}", env!("CARGO_PKG_VERSION"));
            run(config, source.as_deref(), sink.as_deref(), seconds, demo)
        }
    }
}
