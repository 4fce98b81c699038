use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use framelink_protocol::{StubEncoder, FRAME_HEADER_SIZE};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::net::UdpSocket;
use tracing::info;

mod send;
mod source;

use send::{FrameSender, SendOptions};
use source::FrameSource;

#[derive(Parser)]
#[command(name = "framelink-sender", about = "Send image frames as UDP datagrams")]
struct Args {
    /// Receiver IP address
    ip: IpAddr,

    /// Receiver UDP port
    port: u16,

    /// Raw image file; a generated gradient is sent when omitted
    #[arg(short, long)]
    input: Option<PathBuf>,

    #[arg(long, default_value_t = 1920)]
    width: u16,

    #[arg(long, default_value_t = 1080)]
    height: u16,

    /// RAW bit depth (10/12/16)
    #[arg(long, default_value_t = 12)]
    bitdepth: u8,

    /// Number of frames to send
    #[arg(short = 'n', long, default_value_t = 1)]
    frames: u32,

    /// Pause between frames
    #[arg(long, default_value_t = 33)]
    frame_interval_ms: u64,

    /// Pause between datagrams within a frame
    #[arg(long, default_value_t = 0)]
    packet_gap_us: u64,

    /// Retries per datagram on transient send errors
    #[arg(long, default_value_t = 5)]
    max_retries: u32,

    /// Fraction of datagrams to skip on purpose (0.0 - 1.0)
    #[arg(long, default_value_t = 0.0)]
    drop_rate: f64,

    /// Send each frame's datagrams in random order
    #[arg(long)]
    shuffle: bool,

    /// Seed for drop/shuffle decisions
    #[arg(long)]
    seed: Option<u64>,

    /// Write the first frame's header here, for comparison with the receiver
    #[arg(long)]
    header_dump: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "framelink_sender=info".into()),
        )
        .init();

    let args = Args::parse();

    if !(0.0..=1.0).contains(&args.drop_rate) {
        bail!("--drop-rate must be between 0 and 1, got {}", args.drop_rate);
    }
    if args.bitdepth == 0 || args.bitdepth > 16 {
        bail!("--bitdepth must be between 1 and 16, got {}", args.bitdepth);
    }

    let source = match args.input {
        Some(path) => FrameSource::File(path),
        None => FrameSource::Gradient {
            width: args.width,
            height: args.height,
            bitdepth: args.bitdepth,
        },
    };
    let encoder = StubEncoder::new(args.width, args.height, args.bitdepth);

    let target = SocketAddr::new(args.ip, args.port);
    let bind_addr: SocketAddr = if target.is_ipv4() {
        "0.0.0.0:0".parse()?
    } else {
        "[::]:0".parse()?
    };
    let socket = UdpSocket::bind(bind_addr)
        .await
        .context("failed to bind UDP socket")?;

    let options = SendOptions {
        packet_gap: Duration::from_micros(args.packet_gap_us),
        max_retries: args.max_retries,
        drop_rate: args.drop_rate,
        shuffle: args.shuffle,
    };
    let rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut sender = FrameSender::new(socket, target, options, rng);

    info!(
        dest = %target,
        frames = args.frames,
        width = args.width,
        height = args.height,
        bitdepth = args.bitdepth,
        "framelink sender starting"
    );

    let interval = Duration::from_millis(args.frame_interval_ms);
    let mut totals = (0usize, 0usize, 0usize);
    for index in 0..args.frames {
        if index > 0 && !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }

        let raw = source.frame(index)?;
        let frame = encoder.encode(&raw).context("failed to encode frame")?;

        if index == 0 {
            if let Some(path) = &args.header_dump {
                std::fs::write(path, &frame[..FRAME_HEADER_SIZE])
                    .with_context(|| format!("failed to write header: {}", path.display()))?;
            }
        }

        let report = sender.send_frame(&frame).await?;
        info!(
            frame_id = report.frame_id,
            size = frame.len(),
            packets = report.packets,
            sent = report.sent,
            skipped = report.skipped,
            failed = report.failed,
            bytes = report.bytes,
            "frame sent"
        );
        totals.0 += report.sent;
        totals.1 += report.skipped;
        totals.2 += report.failed;
    }

    info!(
        sent = totals.0,
        skipped = totals.1,
        failed = totals.2,
        "framelink sender done"
    );
    Ok(())
}
