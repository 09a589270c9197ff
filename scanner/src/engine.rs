//! Control loop driving the probe workers and the expiry sweep.

use crate::config::ScannerConfig;
use crate::error::{ProbeError, ScannerError};
use crate::generator::AddressGenerator;
use crate::prober::Prober;
use crate::store::RankedStore;
use log::{debug, info, trace, warn};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, sleep_until, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Lifecycle of one scan.
///
/// A run only moves forward: `Idle`, `Running`, `Stopping`, `Stopped`. A
/// stopped run is never restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Configured but not started.
    Idle,
    /// Workers are probing and the sweep timer is armed.
    Running,
    /// Cancelled, waiting for workers to exit.
    Stopping,
    /// All workers are gone and the store is sealed.
    Stopped,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Running => write!(f, "running"),
            EngineState::Stopping => write!(f, "stopping"),
            EngineState::Stopped => write!(f, "stopped"),
        }
    }
}

/// One scan: a generator, a worker pool and the store they feed.
pub(crate) struct Engine<P: Prober> {
    config: Arc<ScannerConfig>,
    prober: P,
    generator: Arc<AddressGenerator>,
    store: Arc<RankedStore>,
    state: watch::Sender<EngineState>,
}

impl<P: Prober> Engine<P> {
    /// Validate `config` and prepare a run feeding `store`.
    ///
    /// # Returns
    ///
    /// * `Ok(Engine)` - An idle engine.
    /// * `Err(ScannerError)` - If the configuration can make no progress.
    pub(crate) fn new(
        config: Arc<ScannerConfig>,
        prober: P,
        store: Arc<RankedStore>,
    ) -> Result<Self, ScannerError> {
        config.validate()?;
        let generator = AddressGenerator::new(config.enabled_cidrs(), config.cycle_horizon)?;
        let (state, _) = watch::channel(EngineState::Idle);

        Ok(Self {
            config,
            prober,
            generator: Arc::new(generator),
            store,
            state,
        })
    }

    /// Observe the lifecycle of this engine.
    pub(crate) fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    /// Launch the worker pool and the control loop.
    ///
    /// Must be called within a tokio runtime. The run ends once `cancel`
    /// is cancelled.
    pub(crate) fn start(self, cancel: CancellationToken) -> JoinHandle<()> {
        let target = self.config.log_target;
        info!(
            target: target,
            "Scanning {} prefixes with {} workers, keeping {} endpoints under {:?}",
            self.generator.prefixes().len(),
            self.config.concurrency,
            self.config.queue_size,
            self.config.max_rtt
        );

        let mut workers = JoinSet::new();
        for id in 0..self.config.concurrency {
            let worker = Worker {
                id,
                prober: self.prober.clone(),
                generator: self.generator.clone(),
                store: self.store.clone(),
                probe_timeout: self.config.probe_timeout,
                min_probe_interval: self.config.min_probe_interval,
                log_target: target,
            };
            workers.spawn(worker.run(cancel.clone()));
        }
        self.state.send_replace(EngineState::Running);

        tokio::spawn(self.control(workers, cancel))
    }

    async fn control(self, mut workers: JoinSet<()>, cancel: CancellationToken) {
        let target = self.config.log_target;
        let period = self.config.sweep_interval();
        let mut sweep = interval_at(Instant::now() + period, period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sweep.tick() => {
                    let retired = self.store.sweep();
                    if retired > 0 {
                        debug!(target: target, "Retired {retired} expired endpoints");
                    }
                }
                Some(joined) = workers.join_next() => {
                    if let Err(err) = joined {
                        warn!(target: target, "Probe worker exited: {err}");
                    }
                }
            }
        }

        self.state.send_replace(EngineState::Stopping);
        let grace = self.config.grace_period;
        debug!(target: target, "Waiting up to {grace:?} for {} workers", workers.len());

        let drained = timeout(grace, async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                target: target,
                "{} probe workers did not exit within {grace:?}, abandoning them",
                workers.len()
            );
            workers.abort_all();
        }

        self.store.seal();
        self.state.send_replace(EngineState::Stopped);
        info!(
            target: target,
            "Scan stopped, {} endpoints available",
            self.store.snapshot().len()
        );
    }
}

struct Worker<P> {
    id: usize,
    prober: P,
    generator: Arc<AddressGenerator>,
    store: Arc<RankedStore>,
    probe_timeout: Duration,
    min_probe_interval: Duration,
    log_target: &'static str,
}

impl<P: Prober> Worker<P> {
    async fn run(self, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            let address = self.generator.next_address();
            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ProbeError::Cancelled),
                probed = timeout(self.probe_timeout, self.prober.probe(address)) => {
                    probed.unwrap_or_else(|_| Err(ProbeError::TimedOut))
                }
            };
            let failed = matches!(
                outcome,
                Err(ProbeError::TimedOut | ProbeError::Unreachable(_))
            );
            self.record(address, outcome);

            if failed {
                // An unreachable family fails before sending anything.
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = sleep_until(started + self.min_probe_interval) => {}
                }
            }
            // The control loop still needs turns when everything fails fast.
            tokio::task::yield_now().await;
        }
        trace!(target: self.log_target, "Worker {} exiting", self.id);
    }

    fn record(&self, address: IpAddr, outcome: Result<Duration, ProbeError>) {
        match outcome {
            Ok(rtt) => {
                let admission = self.store.insert(address, rtt);
                debug!(
                    target: self.log_target,
                    "{address} answered in {rtt:?}: {admission:?}"
                );
            }
            Err(ProbeError::Cancelled) => {
                trace!(target: self.log_target, "Probe of {address} cancelled");
            }
            Err(err) => {
                debug!(target: self.log_target, "Probe of {address} failed: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prober::test_utils::FakeProber;
    use crate::store::Admission;
    use std::future::Future;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    /// RTT equal to the last octet in milliseconds.
    fn octet_prober() -> FakeProber {
        FakeProber::from_fn(|address| match address {
            IpAddr::V4(v4) => Some(ms(u64::from(v4.octets()[3]))),
            IpAddr::V6(_) => None,
        })
    }

    fn config() -> ScannerConfig {
        ScannerConfig {
            cidrs: vec!["10.0.0.0/24".parse().unwrap()],
            queue_size: 4,
            max_rtt: ms(100),
            concurrency: 4,
            grace_period: Duration::from_secs(1),
            ..Default::default()
        }
    }

    fn engine<P: Prober>(config: ScannerConfig, prober: P) -> (Engine<P>, Arc<RankedStore>) {
        let store = Arc::new(RankedStore::new(
            config.queue_size,
            config.max_rtt,
            config.ttl,
        ));
        let engine = Engine::new(Arc::new(config), prober, store.clone()).unwrap();
        (engine, store)
    }

    #[test]
    fn test_configuration_errors_are_fatal() {
        let prober = FakeProber::fixed(ms(1));
        let config = ScannerConfig {
            ipv4: false,
            ipv6: false,
            ..Default::default()
        };
        let store = Arc::new(RankedStore::new(8, ms(400), Duration::from_secs(30)));

        let result = Engine::new(Arc::new(config), prober.clone(), store);
        assert!(matches!(result, Err(ScannerError::NoAddressFamily)));
        assert_eq!(prober.probes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_workers_fill_store() {
        let prober = octet_prober();
        let (engine, store) = engine(config(), prober.clone());
        let state = engine.subscribe();
        assert_eq!(*state.borrow(), EngineState::Idle);

        let cancel = CancellationToken::new();
        let handle = engine.start(cancel.clone());
        assert_eq!(*state.borrow(), EngineState::Running);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 4);
        assert!(snapshot.iter().all(|record| record.rtt <= ms(100)));
        assert!(snapshot.windows(2).all(|pair| pair[0].rtt <= pair[1].rtt));
        assert!(prober.probes() > 4);

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(*state.borrow(), EngineState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_bounded_and_final() {
        let (engine, store) = engine(config(), FakeProber::fixed(ms(50)));
        let state = engine.subscribe();
        let cancel = CancellationToken::new();
        let handle = engine.start(cancel.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        let stopped = Instant::now();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("engine outlived its grace period")
            .unwrap();
        assert!(stopped.elapsed() <= Duration::from_secs(1));
        assert_eq!(*state.borrow(), EngineState::Stopped);
        assert!(store.is_sealed());

        let last = store.snapshot();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.snapshot(), last);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_retires_endpoints_gone_slow() {
        let online = Arc::new(AtomicBool::new(true));
        let prober = {
            let online = online.clone();
            // Once offline, answers arrive too late to be kept.
            FakeProber::from_fn(move |_| {
                Some(if online.load(Ordering::SeqCst) { ms(10) } else { ms(500) })
            })
        };
        let config = ScannerConfig {
            ttl: Duration::from_secs(2),
            ..config()
        };
        let (engine, store) = engine(config, prober);
        let cancel = CancellationToken::new();
        let handle = engine.start(cancel.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(store.len(), 4);

        online.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3)).await;
        // Removed by the timer, not only hidden from snapshots.
        assert_eq!(store.len(), 0);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_deadline_applies() {
        let config = ScannerConfig {
            probe_timeout: ms(100),
            max_rtt: Duration::from_secs(10),
            ..config()
        };
        // Would qualify on RTT alone, but never beats the deadline.
        let (engine, store) = engine(config, FakeProber::fixed(Duration::from_secs(1)));
        let cancel = CancellationToken::new();
        let handle = engine.start(cancel.clone());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(store.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_failures_are_paced() {
        let config = ScannerConfig {
            concurrency: 2,
            min_probe_interval: ms(100),
            ..config()
        };
        let prober = FakeProber::from_fn(|_| None);
        let (engine, store) = engine(config, prober.clone());
        let cancel = CancellationToken::new();
        let handle = engine.start(cancel.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        // Two workers at one probe per 100ms, plus the first round.
        let probes = prober.probes();
        assert!((2..=22).contains(&probes), "{probes} probes in one second");
        assert!(store.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_small_prefix_stays_ranked_next_to_dead_family() {
        let config = ScannerConfig {
            cidrs: vec![
                "162.159.192.0/28".parse().unwrap(),
                "2606:4700:d0::/64".parse().unwrap(),
            ],
            queue_size: 8,
            ttl: Duration::from_secs(5),
            probe_timeout: ms(200),
            ..config()
        };
        // IPv4 answers, IPv6 never beats the deadline.
        let prober = FakeProber::from_fn(|address| match address {
            IpAddr::V4(_) => Some(ms(10)),
            IpAddr::V6(_) => Some(Duration::from_secs(2)),
        });
        let (engine, store) = engine(config, prober);
        let cancel = CancellationToken::new();
        let handle = engine.start(cancel.clone());

        // Six TTLs, long past the point the /28 has been drawn completely.
        for _ in 0..6 {
            tokio::time::sleep(Duration::from_secs(5)).await;
            let snapshot = store.snapshot();
            assert_eq!(snapshot.len(), 8);
            assert!(snapshot.iter().all(|record| record.address.is_ipv4()));
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    /// Prober blocking its thread instead of yielding.
    #[derive(Clone)]
    struct BlockingProber {
        block: Duration,
        finished: Arc<AtomicBool>,
    }

    impl Prober for BlockingProber {
        fn probe(
            &self,
            _address: IpAddr,
        ) -> impl Future<Output = Result<Duration, ProbeError>> + Send {
            let block = self.block;
            let finished = self.finished.clone();
            async move {
                std::thread::sleep(block);
                finished.store(true, Ordering::SeqCst);
                Ok(ms(1))
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stuck_worker_abandoned_after_grace() {
        let finished = Arc::new(AtomicBool::new(false));
        let prober = BlockingProber {
            block: Duration::from_millis(1500),
            finished: finished.clone(),
        };
        let config = ScannerConfig {
            concurrency: 1,
            grace_period: ms(200),
            ..config()
        };
        let (engine, store) = engine(config, prober);
        let state = engine.subscribe();
        let cancel = CancellationToken::new();
        let handle = engine.start(cancel.clone());

        // Let the worker get stuck inside its first probe.
        tokio::time::sleep(ms(100)).await;
        cancel.cancel();
        let stopped = Instant::now();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("engine waited for the stuck worker")
            .unwrap();
        assert!(stopped.elapsed() < Duration::from_secs(1));
        assert_eq!(*state.borrow(), EngineState::Stopped);
        assert!(store.is_sealed());
        assert!(!finished.load(Ordering::SeqCst));

        // The worker eventually returns a qualifying result, too late to count.
        tokio::time::timeout(Duration::from_secs(3), async {
            while !finished.load(Ordering::SeqCst) {
                tokio::time::sleep(ms(10)).await;
            }
        })
        .await
        .expect("blocked probe never finished");
        tokio::time::sleep(ms(50)).await;
        assert!(store.is_empty());
        assert_eq!(
            store.insert(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), ms(1)),
            Admission::Sealed
        );
    }
}
