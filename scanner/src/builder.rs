//! Builder pattern for configuring and creating scanner instances.

use crate::config::ScannerConfig;
use crate::error::ScannerBuilderError;
use crate::prober::{Prober, WarpProber};
use crate::scanner::Scanner;
use endpoint_scanner_ping::{PresharedKey, PrivateKey, PublicKey};
use ipnet::IpNet;
use std::time::Duration;

/// Builder for creating a customized [`Scanner`] instance.
///
/// Every option defaults to the value documented on [`ScannerConfig`]'s
/// constants, so an unconfigured builder scans all WARP ranges.
///
/// # Example
///
/// ```
/// # fn main() -> Result<(), endpoint_scanner::ScannerBuilderError> {
/// use endpoint_scanner::ScannerBuilder;
/// use std::time::Duration;
///
/// // Scan the default ranges with the default settings
/// let basic_scanner = ScannerBuilder::new().build();
///
/// // Only IPv4, a larger ranking and a stricter latency limit
/// let custom_scanner = ScannerBuilder::new()
///     .with_ipv6(false)
///     .with_cidr("162.159.192.0/24")?
///     .with_queue_size(16)
///     .with_max_rtt(Duration::from_millis(250))
///     .with_private_key("yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=")?
///     .build();
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ScannerBuilder {
    config: ScannerConfig,
    /// Whether `cidrs` still holds the default ranges.
    default_cidrs: bool,
}

impl Default for ScannerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScannerBuilder {
    /// Create a new scanner builder with default settings.
    ///
    /// # Returns
    ///
    /// A new `ScannerBuilder` instance.
    pub fn new() -> Self {
        ScannerBuilder {
            config: ScannerConfig::default(),
            default_cidrs: true,
        }
    }

    /// Enable or disable IPv4 prefixes (defaults to enabled).
    pub fn with_ipv4(mut self, enabled: bool) -> Self {
        self.config.ipv4 = enabled;
        self
    }

    /// Enable or disable IPv6 prefixes (defaults to enabled).
    pub fn with_ipv6(mut self, enabled: bool) -> Self {
        self.config.ipv6 = enabled;
        self
    }

    /// Replace the prefixes candidate addresses are drawn from.
    ///
    /// # Arguments
    ///
    /// * `cidrs` - Prefixes to scan (defaults to the WARP ranges).
    ///
    /// # Returns
    ///
    /// Self for method chaining.
    pub fn with_cidrs(mut self, cidrs: Vec<IpNet>) -> Self {
        self.config.cidrs = cidrs;
        self.default_cidrs = false;
        self
    }

    /// Add one prefix in CIDR notation.
    ///
    /// The first prefix added this way replaces the default ranges, later
    /// ones are appended.
    ///
    /// # Arguments
    ///
    /// * `cidr` - A prefix such as `"162.159.192.0/24"`.
    ///
    /// # Returns
    ///
    /// * `Ok(Self)` - The builder for method chaining if the prefix parses.
    /// * `Err(ScannerBuilderError::InvalidCidr)` - If it does not.
    pub fn with_cidr(mut self, cidr: &str) -> Result<Self, ScannerBuilderError> {
        let net: IpNet = cidr
            .parse()
            .map_err(|_| ScannerBuilderError::InvalidCidr(cidr.to_string()))?;
        if self.default_cidrs {
            self.config.cidrs.clear();
            self.default_cidrs = false;
        }
        // Host bits are irrelevant to which addresses get drawn.
        self.config.cidrs.push(net.trunc());
        Ok(self)
    }

    /// Set the maximum number of endpoints kept (defaults to 8).
    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.config.queue_size = queue_size;
        self
    }

    /// Set the slowest round trip an endpoint may have to be kept.
    ///
    /// # Arguments
    ///
    /// * `max_rtt` - Inclusive latency limit (defaults to 400 milliseconds).
    ///
    /// # Returns
    ///
    /// Self for method chaining.
    pub fn with_max_rtt(mut self, max_rtt: Duration) -> Self {
        self.config.max_rtt = max_rtt;
        self
    }

    /// Set how long an endpoint stays valid without being probed again.
    ///
    /// Expired endpoints are hidden immediately and removed by a sweep
    /// running every quarter of the TTL.
    ///
    /// # Arguments
    ///
    /// * `ttl` - Maximum endpoint age (defaults to 30 seconds).
    ///
    /// # Returns
    ///
    /// Self for method chaining.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.config.ttl = ttl;
        self
    }

    /// Set the number of concurrent probe workers.
    ///
    /// # Recommendations
    ///
    /// * **Conservative (1-4)** - For metered or rate-limited links.
    /// * **Default (8)** - Good balance for most use cases.
    /// * **Aggressive (32-128)** - Faster discovery, each worker holds a socket open.
    ///
    /// # Arguments
    ///
    /// * `concurrency` - Number of workers (defaults to 8).
    ///
    /// # Returns
    ///
    /// Self for method chaining.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    /// Set the deadline of a single probe (defaults to 2 seconds).
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.config.probe_timeout = timeout;
        self
    }

    /// Set the pace of a worker whose probes fail immediately (defaults to
    /// 100 milliseconds).
    ///
    /// An unreachable network makes probes fail before any packet is sent,
    /// this keeps such a worker from spinning.
    pub fn with_min_probe_interval(mut self, interval: Duration) -> Self {
        self.config.min_probe_interval = interval;
        self
    }

    /// Set how long stopping waits for workers (defaults to 5 seconds).
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.config.grace_period = grace_period;
        self
    }

    /// Set how many distinct addresses are drawn before one may repeat.
    pub fn with_cycle_horizon(mut self, horizon: usize) -> Self {
        self.config.cycle_horizon = horizon;
        self
    }

    /// Set the target of the scanner's log records.
    ///
    /// Defaults to `"endpoint_scanner"`. The embedding application decides
    /// where records go by installing a `log` implementation.
    pub fn with_log_target(mut self, target: &'static str) -> Self {
        self.config.log_target = target;
        self
    }

    /// Set the private key probes are sent from.
    ///
    /// A random identity is generated when unset.
    ///
    /// # Arguments
    ///
    /// * `key` - Base64 encoded Curve25519 private key.
    ///
    /// # Returns
    ///
    /// * `Ok(Self)` - The builder for method chaining if the key decodes.
    /// * `Err(ScannerBuilderError::InvalidKey)` - If it does not.
    pub fn with_private_key(mut self, key: &str) -> Result<Self, ScannerBuilderError> {
        let key: PrivateKey = key.parse()?;
        self.config.ping = self.config.ping.with_private_key(key);
        Ok(self)
    }

    /// Set the public key of the endpoints (defaults to the WARP server key).
    ///
    /// # Returns
    ///
    /// * `Ok(Self)` - The builder for method chaining if the key decodes.
    /// * `Err(ScannerBuilderError::InvalidKey)` - If it does not.
    pub fn with_peer_public_key(mut self, key: &str) -> Result<Self, ScannerBuilderError> {
        let key: PublicKey = key.parse()?;
        self.config.ping = self.config.ping.with_peer_public_key(key);
        Ok(self)
    }

    /// Set a preshared key mixed into the handshake (defaults to none).
    ///
    /// # Returns
    ///
    /// * `Ok(Self)` - The builder for method chaining if the key decodes.
    /// * `Err(ScannerBuilderError::InvalidKey)` - If it does not.
    pub fn with_preshared_key(mut self, key: &str) -> Result<Self, ScannerBuilderError> {
        let key: PresharedKey = key.parse()?;
        self.config.ping = self.config.ping.with_preshared_key(key);
        Ok(self)
    }

    /// Set the three reserved header bytes WARP uses as a client id.
    pub fn with_reserved(mut self, reserved: [u8; 3]) -> Self {
        self.config.ping = self.config.ping.with_reserved(reserved);
        self
    }

    /// Set the UDP port probes are sent to (defaults to 2408).
    pub fn with_port(mut self, port: u16) -> Self {
        self.config.ping = self.config.ping.with_port(port);
        self
    }

    /// The configuration built so far.
    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Build a scanner probing with WireGuard handshakes.
    ///
    /// # Returns
    ///
    /// A configured `Scanner` instance. The configuration is validated when
    /// the scanner is started.
    pub fn build(self) -> Scanner<WarpProber> {
        let ping = self
            .config
            .ping
            .clone()
            .with_timeout(self.config.probe_timeout);
        Scanner::new(self.config, WarpProber::new(ping))
    }

    /// Build a scanner probing with a custom [`Prober`].
    pub fn build_with_prober<P: Prober>(self, prober: P) -> Scanner<P> {
        Scanner::new(self.config, prober)
    }
}
