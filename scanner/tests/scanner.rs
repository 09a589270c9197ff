//! Integration tests for the scanner using a latency table instead of a network.
//!
//! All tests run on a paused tokio clock, probe latencies are simulated with
//! sleeps so results arrive in a deterministic order.

use endpoint_scanner::{
    random_endpoint, Admission, CancellationToken, EngineState, ProbeError, Prober, RankedStore,
    ScannerBuilder, ScannerError, WARP_PORTS,
};
use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn host(last: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 9, 0, last))
}

/// Prober answering from a fixed latency table.
///
/// Addresses missing from the table, or every address once switched off,
/// time out after a short wait.
#[derive(Clone)]
struct LatencyTable {
    rtts: Arc<HashMap<IpAddr, Duration>>,
    online: Arc<AtomicBool>,
    probes: Arc<AtomicUsize>,
}

impl LatencyTable {
    fn new(entries: &[(u8, u64)]) -> Self {
        Self {
            rtts: Arc::new(
                entries
                    .iter()
                    .map(|(last, rtt)| (host(*last), ms(*rtt)))
                    .collect(),
            ),
            online: Arc::new(AtomicBool::new(true)),
            probes: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn switch_off(&self) {
        self.online.store(false, Ordering::SeqCst);
    }

    fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

impl Prober for LatencyTable {
    fn probe(
        &self,
        address: IpAddr,
    ) -> impl Future<Output = Result<Duration, ProbeError>> + Send {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let rtt = if self.online.load(Ordering::SeqCst) {
            self.rtts.get(&address).copied()
        } else {
            None
        };

        async move {
            match rtt {
                Some(rtt) => {
                    sleep(rtt).await;
                    Ok(rtt)
                }
                None => {
                    sleep(ms(200)).await;
                    Err(ProbeError::TimedOut)
                }
            }
        }
    }
}

fn table() -> LatencyTable {
    // .5 answers, but slower than the limit used below.
    LatencyTable::new(&[(1, 40), (2, 10), (3, 25), (4, 90), (5, 300)])
}

fn builder() -> ScannerBuilder {
    ScannerBuilder::new()
        .with_cidr("10.9.0.0/28")
        .expect("Valid prefix")
        .with_queue_size(3)
        .with_max_rtt(ms(100))
        .with_concurrency(4)
        .with_grace_period(Duration::from_secs(1))
}

#[test]
fn test_store_ranking_scenario() {
    let store = RankedStore::new(2, ms(100), Duration::from_secs(60));
    let (a, b, c, d) = (host(1), host(2), host(3), host(4));

    store.insert(a, ms(10));
    store.insert(b, ms(20));
    let ranked: Vec<_> = store.snapshot().iter().map(|r| (r.address, r.rtt)).collect();
    assert_eq!(ranked, vec![(a, ms(10)), (b, ms(20))]);

    assert_eq!(store.insert(c, ms(5)), Admission::Evicted(b));
    assert_eq!(store.insert(d, ms(50)), Admission::NotBetter);
    let ranked: Vec<_> = store.snapshot().iter().map(|r| (r.address, r.rtt)).collect();
    assert_eq!(ranked, vec![(c, ms(5)), (a, ms(10))]);
}

#[tokio::test(start_paused = true)]
async fn test_scan_finds_fastest_endpoints() {
    let prober = table();
    let scanner = builder().build_with_prober(prober.clone());
    assert!(scanner.available_endpoints().is_empty());

    scanner
        .start(&CancellationToken::new())
        .expect("Scan should start");
    sleep(Duration::from_secs(5)).await;

    let ranked: Vec<_> = scanner
        .available_endpoints()
        .iter()
        .map(|r| (r.address, r.rtt))
        .collect();
    assert_eq!(
        ranked,
        vec![(host(2), ms(10)), (host(3), ms(25)), (host(1), ms(40))]
    );
    assert!(prober.probes() > 16);

    scanner.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_disabled_families_never_probe() {
    let prober = table();
    let scanner = builder()
        .with_ipv4(false)
        .with_ipv6(false)
        .build_with_prober(prober.clone());

    let result = scanner.start(&CancellationToken::new());
    assert_eq!(result, Err(ScannerError::NoAddressFamily));

    sleep(Duration::from_secs(1)).await;
    assert_eq!(prober.probes(), 0);
    assert_eq!(scanner.state(), EngineState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_freezes_ranking() {
    let prober = table();
    let scanner = builder().build_with_prober(prober.clone());
    let shutdown = CancellationToken::new();
    scanner.start(&shutdown).expect("Scan should start");
    sleep(Duration::from_secs(2)).await;

    shutdown.cancel();
    timeout(Duration::from_secs(1), scanner.stop())
        .await
        .expect("Stop should finish within the grace period");
    assert_eq!(scanner.state(), EngineState::Stopped);

    let frozen = scanner.available_endpoints();
    let probes = prober.probes();
    assert_eq!(frozen.len(), 3);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(scanner.available_endpoints(), frozen);
    assert_eq!(prober.probes(), probes);
}

#[tokio::test(start_paused = true)]
async fn test_unrefreshed_endpoints_expire() {
    let prober = table();
    let ttl = Duration::from_secs(5);
    let scanner = builder().with_ttl(ttl).build_with_prober(prober.clone());
    scanner
        .start(&CancellationToken::new())
        .expect("Scan should start");

    sleep(Duration::from_secs(2)).await;
    assert_eq!(scanner.available_endpoints().len(), 3);
    for endpoint in scanner.available_endpoints() {
        assert!(endpoint.age() <= ttl);
    }

    prober.switch_off();
    sleep(Duration::from_secs(6)).await;
    assert!(scanner.available_endpoints().is_empty());

    scanner.stop().await;
}

#[test]
fn test_random_endpoint_without_scanning() {
    let endpoint = random_endpoint(true, false).expect("IPv4 allowed");
    assert!(endpoint.is_ipv4());
    assert!(WARP_PORTS.contains(&endpoint.port()));

    assert_eq!(
        random_endpoint(false, false),
        Err(ScannerError::NoAddressFamily)
    );
}
