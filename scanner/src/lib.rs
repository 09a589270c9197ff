//! Concurrent discovery of low-latency WireGuard endpoints.
//!
//! A [`Scanner`] draws random addresses from CIDR prefixes, probes them with
//! a pool of workers and keeps the fastest answers in a bounded ranking whose
//! entries expire unless probed again. The ranking can be read at any time
//! without waiting on the scan.

mod builder;
mod config;
mod engine;
mod error;
mod generator;
mod prober;
mod ranges;
mod scanner;
mod store;

pub use builder::ScannerBuilder;
pub use config::{
    ScannerConfig, DEFAULT_CONCURRENCY, DEFAULT_CYCLE_HORIZON, DEFAULT_GRACE_PERIOD,
    DEFAULT_LOG_TARGET, DEFAULT_MAX_RTT, DEFAULT_MIN_PROBE_INTERVAL, DEFAULT_PROBE_TIMEOUT,
    DEFAULT_QUEUE_SIZE, DEFAULT_TTL,
};
pub use engine::EngineState;
pub use error::{ProbeError, ScannerBuilderError, ScannerError};
pub use generator::AddressGenerator;
pub use prober::{Prober, WarpProber};
pub use ranges::{default_cidrs, random_endpoint, WARP_PORTS};
pub use scanner::Scanner;
pub use store::{Admission, EndpointRecord, RankedStore};

// Re-exports.
pub use endpoint_scanner_ping::{
    KeyError, PingConfiguration, PingError, Pinger, PresharedKey, PrivateKey, PublicKey,
};
pub use ipnet::IpNet;
pub use tokio_util::sync::CancellationToken;
