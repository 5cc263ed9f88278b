//! rrdbd: the metric cache daemon.
//!
//! Wires the pieces together: loads settings and storage schemas,
//! bootstraps the metric cache, starts the flush writer and the TCP
//! front ends, and periodically feeds the daemon's own counters back in
//! as metrics. SIGINT/SIGTERM trigger an orderly stop with a final
//! residual flush.

mod listeners;
mod settings;

use anyhow::Context;
use clap::Parser;
use rrdb_cache::{CacheOptions, Layout, MetricCache, Schemas, Writer, unix_now};
use settings::Settings;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rrdbd", about = "Cache daemon for multi-metric round-robin archives")]
struct Args {
    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Manage a specific cache instance
    #[arg(long)]
    instance: Option<String>,

    /// Log at debug level
    #[arg(long)]
    debug: bool,
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

pub(crate) fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

extern "C" fn on_signal(_: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, on_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_signal as libc::sighandler_t);
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let mut settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(instance) = args.instance {
        settings.instance = instance;
    }

    let schemas = if settings.schemas_file.exists() {
        Schemas::load(&settings.schemas_file)
            .with_context(|| format!("bad schema file {}", settings.schemas_file.display()))?
    } else {
        warn!(
            path = %settings.schemas_file.display(),
            "schema file missing, using the default schema only"
        );
        Schemas::defaults()
    };

    let layout = Layout::new(
        settings.data_dir.clone(),
        settings.link_dir.clone(),
        settings.instance.clone(),
    );
    let options = CacheOptions {
        wait_time: settings.wait_time,
        max_creates_per_minute: settings.max_creates_per_minute,
    };
    let cache = Arc::new(MetricCache::new(layout, schemas, options));
    cache.init().context("cache bootstrap failed")?;

    install_signal_handlers();

    let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
    let writer = Writer::spawn(Arc::clone(&cache), stop_rx).context("failed to start writer")?;

    let line_listener = TcpListener::bind(&settings.line_listen)
        .with_context(|| format!("cannot bind line receiver to {}", settings.line_listen))?;
    let query_listener = TcpListener::bind(&settings.query_listen)
        .with_context(|| format!("cannot bind query handler to {}", settings.query_listen))?;
    info!(
        line = settings.line_listen,
        query = settings.query_listen,
        instance = settings.instance,
        "rrdbd listening"
    );

    let mut threads = Vec::new();
    {
        let cache = Arc::clone(&cache);
        threads.push(
            std::thread::Builder::new()
                .name("rrdb-line-accept".to_owned())
                .spawn(move || listeners::serve_line(line_listener, cache))?,
        );
    }
    {
        let cache = Arc::clone(&cache);
        threads.push(
            std::thread::Builder::new()
                .name("rrdb-query-accept".to_owned())
                .spawn(move || listeners::serve_query(query_listener, cache))?,
        );
    }
    if settings.self_metric_interval > 0 {
        let cache = Arc::clone(&cache);
        let prefix = settings.self_metric_prefix.clone();
        let instance = settings.instance.clone();
        let interval = Duration::from_secs(settings.self_metric_interval);
        threads.push(
            std::thread::Builder::new()
                .name("rrdb-self-metrics".to_owned())
                .spawn(move || record_self_metrics(cache, prefix, instance, interval))?,
        );
    }

    while !shutdown_requested() {
        std::thread::sleep(Duration::from_millis(200));
    }
    info!("shutting down");

    for thread in threads {
        let _ = thread.join();
    }
    let _ = stop_tx.send(());
    let _ = writer.join();
    info!("residual buffers flushed, bye");
    Ok(())
}

/// Feed the drained instrumentation counters back through the cache as
/// `<prefix>.<hostname>.<instance>.<name>` metrics.
fn record_self_metrics(
    cache: Arc<MetricCache>,
    prefix: String,
    instance: String,
    interval: Duration,
) {
    let host = hostname();
    let stats = cache.stats();
    let mut last = Instant::now();

    while !shutdown_requested() {
        std::thread::sleep(Duration::from_millis(200));
        if last.elapsed() < interval {
            continue;
        }
        last = Instant::now();

        let now = unix_now();
        for (name, value) in stats.snapshot().records() {
            let metric = format!("{prefix}.{host}.{instance}.{name}");
            cache.put(&metric, (now, value));
        }
    }
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().replace('.', "_"))
        .unwrap_or_else(|_| "unknown".to_owned())
}
