//! The ping capability the workers depend on.

use crate::error::ProbeError;
use endpoint_scanner_ping::{PingConfiguration, Pinger};
use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

/// Measures the round-trip time to a single address.
///
/// Implementations must be safe to run concurrently against different
/// addresses and must not share mutable state between probes. Workers
/// enforce the probe deadline and cancellation by dropping the returned
/// future, so an implementation only has to be cancel safe.
pub trait Prober: Clone + Send + Sync + 'static {
    /// Probe `address` once.
    ///
    /// # Returns
    ///
    /// * `Ok(Duration)` - The measured round-trip time.
    /// * `Err(ProbeError)` - If the endpoint did not answer properly.
    fn probe(&self, address: IpAddr)
        -> impl Future<Output = Result<Duration, ProbeError>> + Send;
}

/// [`Prober`] performing a WireGuard handshake round trip.
#[derive(Debug, Clone)]
pub struct WarpProber {
    pinger: Pinger,
}

impl WarpProber {
    /// Create a prober pinging with `config`.
    pub fn new(config: PingConfiguration) -> Self {
        Self {
            pinger: Pinger::new(config),
        }
    }

    /// The underlying pinger.
    pub fn pinger(&self) -> &Pinger {
        &self.pinger
    }
}

impl Prober for WarpProber {
    fn probe(
        &self,
        address: IpAddr,
    ) -> impl Future<Output = Result<Duration, ProbeError>> + Send {
        async move { Ok(self.pinger.ping(address).await?) }
    }
}
