use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use framelink_reassembly::{
    run_reassembly_worker, FrameManager, FrameStreamStats, ObserverSet, PacketQueue,
    PacketTraceRing, TracingObserver,
};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{error, info};

mod config;
mod report;
mod udp;
mod writer;

use config::ReceiverConfig;
use report::RunReport;
use udp::{RxCounters, UdpProducer};
use writer::{ChannelSink, FrameWriter};

#[derive(Parser)]
#[command(name = "framelink-receiver", about = "Receive and reassemble UDP image frames")]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (IP), overrides config
    #[arg(long)]
    host: Option<String>,

    /// UDP port, overrides config
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory for received frames, overrides config
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Do not write frames to disk
    #[arg(long)]
    no_write: bool,

    /// Write a JSON run summary here on exit
    #[arg(long)]
    stats_json: Option<PathBuf>,

    /// Dump the packet trace ring here on exit
    #[arg(long)]
    trace_dump: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "framelink_receiver=info,framelink_reassembly=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = if let Some(config_path) = &args.config {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config file: {}", config_path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("invalid config file: {}", config_path.display()))?
    } else {
        ReceiverConfig::default()
    };

    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if args.no_write {
        config.write_frames = false;
    }

    let engine = config.reassembly.to_config();
    engine.validate().context("invalid reassembly settings")?;

    info!("framelink receiver starting");
    info!(
        host = %config.host,
        port = config.port,
        output_dir = %config.output_dir.display(),
        write_frames = config.write_frames,
        max_frame_size = engine.max_frame_size,
        queue_capacity = engine.queue_capacity,
        idle_timeout_ms = engine.frame_idle_timeout.as_millis() as u64,
    );

    // Large kernel buffer to absorb frame bursts while the producer is descheduled.
    let socket = {
        let sock = socket2::Socket::new(
            socket2::Domain::IPV4,
            socket2::Type::DGRAM,
            Some(socket2::Protocol::UDP),
        )
        .with_context(|| "failed to create UDP socket")?;
        if let Err(e) = sock.set_recv_buffer_size(config.recv_buffer_bytes) {
            error!("failed to set SO_RCVBUF to {}: {}", config.recv_buffer_bytes, e);
        }
        let _ = sock.set_reuse_address(true);
        let addr: std::net::SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .with_context(|| format!("invalid UDP address {}:{}", config.host, config.port))?;
        sock.bind(&addr.into())
            .with_context(|| format!("failed to bind UDP on {}:{}", config.host, config.port))?;
        sock.set_nonblocking(true)
            .with_context(|| "failed to set non-blocking")?;
        let std_sock: std::net::UdpSocket = sock.into();
        Arc::new(
            UdpSocket::from_std(std_sock).with_context(|| "failed to wrap UDP socket in tokio")?,
        )
    };

    info!("UDP socket bound on {}:{}", config.host, config.port);

    let queue = Arc::new(PacketQueue::new(engine.queue_capacity));
    let shutdown = Arc::new(AtomicBool::new(false));
    let stats = Arc::new(FrameStreamStats::new());
    let rx_counters = Arc::new(RxCounters::default());
    let not_written = Arc::new(AtomicU64::new(0));
    let trace = args
        .trace_dump
        .as_ref()
        .map(|_| Arc::new(PacketTraceRing::default()));

    // Frame writer task
    let (frame_tx, writer_task) = if config.write_frames {
        let frame_writer = FrameWriter::new(&config.output_dir)?;
        let (tx, rx) = mpsc::channel(config.writer_queue.max(1));
        let task = tokio::spawn(writer::run_frame_writer(rx, frame_writer));
        (Some(tx), Some(task))
    } else {
        (None, None)
    };

    // Reassembly thread
    let mut observers = ObserverSet::new().with(Arc::new(TracingObserver));
    if let Some(ring) = &trace {
        observers = observers.with(ring.clone());
    }
    let sink = ChannelSink::new(frame_tx, stats.clone(), not_written.clone());
    let mut manager = FrameManager::new(engine, sink, Arc::new(observers))
        .context("invalid reassembly settings")?;
    let worker = {
        let queue = queue.clone();
        let shutdown = shutdown.clone();
        thread::Builder::new()
            .name("reassembly".into())
            .spawn(move || {
                run_reassembly_worker(&queue, &mut manager, &shutdown);
            })
            .context("failed to spawn reassembly thread")?
    };

    // UDP receive loop
    let producer = tokio::spawn(udp::run_udp_loop(UdpProducer {
        socket,
        queue: queue.clone(),
        shutdown: shutdown.clone(),
        counters: rx_counters.clone(),
        trace: trace.clone(),
        max_payload: engine.max_payload_size,
    }));

    // Periodic stats
    if config.stats_interval_secs > 0 {
        let stats = stats.clone();
        let period = Duration::from_secs(config.stats_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                stats.log();
            }
        });
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");

    shutdown.store(true, Ordering::Release);
    queue.wake_all();

    if let Err(e) = producer.await {
        error!("UDP receive task failed: {}", e);
    }
    // The sink (and with it the writer's sender) is dropped when the thread ends.
    tokio::task::spawn_blocking(move || worker.join())
        .await
        .context("failed to join reassembly thread")?
        .map_err(|_| anyhow::anyhow!("reassembly thread panicked"))?;
    if let Some(task) = writer_task {
        task.await.context("frame writer task failed")?;
    }

    stats.log();

    if let Some(path) = &args.trace_dump {
        if let Some(ring) = &trace {
            ring.dump(path)
                .with_context(|| format!("failed to write trace dump: {}", path.display()))?;
            info!(path = %path.display(), entries = ring.snapshot().len(), "packet trace written");
        }
    }

    if let Some(path) = &args.stats_json {
        RunReport::new(
            stats.snapshot(),
            rx_counters.snapshot(),
            queue.dropped(),
            not_written.load(Ordering::Relaxed),
        )
        .save_to_file(path)
        .with_context(|| format!("failed to write stats: {}", path.display()))?;
    }

    info!("framelink receiver stopped");
    Ok(())
}
