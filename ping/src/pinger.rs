//! Round-trip measurement over a single WireGuard handshake.

use crate::configuration::PingConfiguration;
use crate::error::PingError;
use crate::handshake::{Initiation, RESPONSE_LEN};
use log::debug;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};

/// Measures handshake latency against WireGuard endpoints.
///
/// Cheap to clone, every ping uses its own socket so any number of pings can
/// run concurrently.
///
/// # Example
///
/// ```no_run
/// use endpoint_scanner_ping::{PingConfiguration, Pinger};
/// use std::net::Ipv4Addr;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pinger = Pinger::new(PingConfiguration::default());
/// let rtt = pinger.ping(Ipv4Addr::new(162, 159, 192, 1).into()).await?;
/// println!("answered in {rtt:?}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Pinger {
    config: Arc<PingConfiguration>,
}

impl Pinger {
    /// Create a pinger using the given configuration.
    pub fn new(config: PingConfiguration) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// The configuration this pinger was built with.
    pub fn configuration(&self) -> &PingConfiguration {
        &self.config
    }

    /// Ping `address` on the configured port.
    pub async fn ping(&self, address: IpAddr) -> Result<Duration, PingError> {
        self.ping_socket(SocketAddr::new(address, self.config.port))
            .await
    }

    /// Send one handshake initiation to `target` and wait for its response.
    ///
    /// # Returns
    ///
    /// * `Ok(Duration)` - Time between sending the initiation and receiving a valid response.
    /// * `Err(PingError)` - If the socket failed, the timeout elapsed, or the answer was invalid.
    pub async fn ping_socket(&self, target: SocketAddr) -> Result<Duration, PingError> {
        let local: SocketAddr = match target {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local).await?;
        // Connected, so datagrams from other sources are filtered by the kernel.
        socket.connect(target).await?;

        let initiation = Initiation::new(&self.config);
        let started = Instant::now();
        socket.send(initiation.packet()).await?;

        // Leave room to detect oversized answers.
        let mut buf = [0u8; RESPONSE_LEN * 2];
        let received = timeout(self.config.timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| PingError::TimedOut)??;
        let rtt = started.elapsed();

        initiation.validate_response(&buf[..received])?;
        debug!("Handshake with {target} completed in {rtt:?}");
        Ok(rtt)
    }
}
