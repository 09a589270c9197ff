//! Scanner configuration and its defaults.

use crate::error::ScannerError;
use crate::ranges::default_cidrs;
use endpoint_scanner_ping::PingConfiguration;
use ipnet::IpNet;
use std::time::Duration;

/// Default maximum number of endpoints kept in the ranked set.
pub const DEFAULT_QUEUE_SIZE: usize = 8;
/// Default slowest round trip an endpoint may have to be kept.
pub const DEFAULT_MAX_RTT: Duration = Duration::from_millis(400);
/// Default age after which an endpoint must be re-validated.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);
/// Default number of concurrent probe workers.
pub const DEFAULT_CONCURRENCY: usize = 8;
/// Default deadline for a single probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
/// Default shortest time between two probes of a worker when probes fail fast.
pub const DEFAULT_MIN_PROBE_INTERVAL: Duration = Duration::from_millis(100);
/// Default time workers get to exit once a scan is cancelled.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);
/// Default number of distinct addresses drawn before the generator may repeat one.
pub const DEFAULT_CYCLE_HORIZON: usize = 1 << 16;
/// Default log target for scanner messages.
pub const DEFAULT_LOG_TARGET: &str = "endpoint_scanner";

/// Floor for the expiry sweep interval.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration of one scan, fixed for the lifetime of the run.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Scan IPv4 prefixes.
    pub ipv4: bool,
    /// Scan IPv6 prefixes.
    pub ipv6: bool,
    /// Prefixes candidate addresses are drawn from.
    pub cidrs: Vec<IpNet>,
    /// Maximum number of endpoints kept in the ranked set.
    pub queue_size: usize,
    /// Endpoints slower than this are never kept.
    pub max_rtt: Duration,
    /// Endpoints older than this are dropped until probed again.
    pub ttl: Duration,
    /// Number of concurrent probe workers.
    pub concurrency: usize,
    /// Deadline for a single probe.
    pub probe_timeout: Duration,
    /// A worker whose probe fails sooner than this waits out the rest.
    pub min_probe_interval: Duration,
    /// Time workers get to exit after cancellation before being abandoned.
    pub grace_period: Duration,
    /// Distinct addresses drawn before the generator starts a new cycle.
    pub cycle_horizon: usize,
    /// Target used for all log records of the scan.
    pub log_target: &'static str,
    /// Key material and port for the handshake prober.
    pub ping: PingConfiguration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            ipv4: true,
            ipv6: true,
            cidrs: default_cidrs(),
            queue_size: DEFAULT_QUEUE_SIZE,
            max_rtt: DEFAULT_MAX_RTT,
            ttl: DEFAULT_TTL,
            concurrency: DEFAULT_CONCURRENCY,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            min_probe_interval: DEFAULT_MIN_PROBE_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
            cycle_horizon: DEFAULT_CYCLE_HORIZON,
            log_target: DEFAULT_LOG_TARGET,
            ping: PingConfiguration::default(),
        }
    }
}

impl ScannerConfig {
    /// Check the configuration can make progress.
    pub fn validate(&self) -> Result<(), ScannerError> {
        if !self.ipv4 && !self.ipv6 {
            return Err(ScannerError::NoAddressFamily);
        }
        if self.cidrs.is_empty() {
            return Err(ScannerError::EmptyCidrList);
        }
        if self.enabled_cidrs().is_empty() {
            return Err(ScannerError::NoUsablePrefix);
        }
        if self.queue_size == 0 {
            return Err(ScannerError::ZeroQueueSize);
        }
        if self.concurrency == 0 {
            return Err(ScannerError::ZeroConcurrency);
        }
        Ok(())
    }

    /// Prefixes of the enabled address families.
    pub fn enabled_cidrs(&self) -> Vec<IpNet> {
        self.cidrs
            .iter()
            .filter(|net| match net {
                IpNet::V4(_) => self.ipv4,
                IpNet::V6(_) => self.ipv6,
            })
            .copied()
            .collect()
    }

    /// How often expired endpoints are swept, a quarter of the TTL.
    pub fn sweep_interval(&self) -> Duration {
        (self.ttl / 4).max(MIN_SWEEP_INTERVAL)
    }
}
