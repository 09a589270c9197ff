//! Example of scanning for the fastest WARP endpoints.

use clap::Parser;
use endpoint_scanner::{CancellationToken, ScannerBuilder};
use log::LevelFilter;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Only scan IPv4 prefixes.
    #[arg(short = '4', conflicts_with = "ipv6_only")]
    ipv4_only: bool,

    /// Only scan IPv6 prefixes.
    #[arg(short = '6')]
    ipv6_only: bool,

    /// Slowest round trip kept, in milliseconds.
    #[arg(long, default_value = "400")]
    rtt: u64,

    /// Seconds an endpoint stays valid without being probed again.
    #[arg(long, default_value = "30")]
    ttl: u64,

    /// Number of endpoints kept.
    #[arg(short, long, default_value = "8")]
    queue_size: usize,

    /// Number of concurrent probe workers.
    #[arg(short, long, default_value = "8")]
    concurrency: usize,

    /// Prefix to scan instead of the WARP ranges, may be repeated.
    #[arg(long)]
    cidr: Vec<String>,

    /// Base64 private key, a random one is generated when omitted.
    #[arg(long)]
    private_key: Option<String>,

    /// Base64 public key of the endpoints.
    #[arg(long)]
    peer_public_key: Option<String>,

    /// Reserved header bytes as three comma separated numbers.
    #[arg(long, value_delimiter = ',')]
    reserved: Option<Vec<u8>>,

    /// Seconds between printing the ranking.
    #[arg(long, default_value = "5")]
    interval: u64,

    /// Log level.
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] {} - {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log_level)
        .chain(std::io::stderr())
        .apply()?;

    log::info!("SCANNING FOR WARP ENDPOINTS");

    let mut builder = ScannerBuilder::new()
        .with_ipv4(!args.ipv6_only)
        .with_ipv6(!args.ipv4_only)
        .with_max_rtt(Duration::from_millis(args.rtt))
        .with_ttl(Duration::from_secs(args.ttl))
        .with_queue_size(args.queue_size)
        .with_concurrency(args.concurrency);

    for cidr in &args.cidr {
        log::debug!("Scanning {cidr}");
        builder = builder.with_cidr(cidr)?;
    }
    if let Some(key) = &args.private_key {
        builder = builder.with_private_key(key)?;
    }
    if let Some(key) = &args.peer_public_key {
        builder = builder.with_peer_public_key(key)?;
    }
    if let Some(reserved) = &args.reserved {
        let reserved: [u8; 3] = reserved
            .as_slice()
            .try_into()
            .map_err(|_| "Reserved takes exactly three bytes")?;
        builder = builder.with_reserved(reserved);
    }

    let scanner = builder.build();
    let shutdown = CancellationToken::new();
    scanner
        .start(&shutdown)
        .map_err(|e| format!("Scanner error: {e}"))?;

    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval.max(1)));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted");
                break;
            }
            _ = ticker.tick() => {
                let endpoints = scanner.available_endpoints();
                log::info!("{} endpoints available", endpoints.len());
                for (rank, endpoint) in endpoints.iter().enumerate() {
                    println!(
                        "{:>2}. {:<40} {:>6} ms",
                        rank + 1,
                        endpoint.address,
                        endpoint.rtt.as_millis()
                    );
                }
            }
        }
    }

    shutdown.cancel();
    scanner.stop().await;

    for endpoint in scanner.available_endpoints() {
        println!("{endpoint}");
    }

    Ok(())
}
