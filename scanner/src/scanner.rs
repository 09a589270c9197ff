//! The externally visible scanner.

use crate::config::ScannerConfig;
use crate::engine::{Engine, EngineState};
use crate::error::ScannerError;
use crate::prober::{Prober, WarpProber};
use crate::store::{EndpointRecord, RankedStore};
use log::info;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Run {
    store: Arc<RankedStore>,
    cancel: CancellationToken,
    state: watch::Receiver<EngineState>,
    _handle: JoinHandle<()>,
}

/// Discovers and ranks the fastest endpoints in the background.
///
/// Built with [`crate::ScannerBuilder`]. [`Scanner::start`] launches a scan
/// and returns immediately, [`Scanner::available_endpoints`] reads the
/// current ranking at any time.
///
/// # Example
///
/// ```no_run
/// use endpoint_scanner::ScannerBuilder;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let scanner = ScannerBuilder::new().with_ipv6(false).build();
/// let shutdown = CancellationToken::new();
/// scanner.start(&shutdown)?;
///
/// tokio::time::sleep(std::time::Duration::from_secs(5)).await;
/// for endpoint in scanner.available_endpoints() {
///     println!("{endpoint}");
/// }
///
/// scanner.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct Scanner<P: Prober = WarpProber> {
    config: Arc<ScannerConfig>,
    prober: P,
    run: Mutex<Option<Run>>,
}

impl<P: Prober> Scanner<P> {
    /// Create a scanner probing with `prober`.
    pub fn new(config: ScannerConfig, prober: P) -> Self {
        Self {
            config: Arc::new(config),
            prober,
            run: Mutex::new(None),
        }
    }

    /// Configuration every scan of this scanner runs with.
    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Prober handed to the workers.
    pub fn prober(&self) -> &P {
        &self.prober
    }

    /// Validate the configuration and start scanning in the background.
    ///
    /// The scan runs until `cancel` is cancelled or [`Scanner::stop`] is
    /// called. A scanner whose previous scan has stopped may be started
    /// again, the new scan begins with an empty ranking.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The scan is running.
    /// * `Err(ScannerError)` - If the configuration is unusable, a scan is
    ///   still running, or no tokio runtime is available. No worker is
    ///   launched in that case.
    pub fn start(&self, cancel: &CancellationToken) -> Result<(), ScannerError> {
        let mut run = self.lock();
        if let Some(current) = run.as_ref() {
            if *current.state.borrow() != EngineState::Stopped {
                return Err(ScannerError::AlreadyRunning);
            }
        }

        let store = Arc::new(RankedStore::new(
            self.config.queue_size,
            self.config.max_rtt,
            self.config.ttl,
        ));
        let engine = Engine::new(self.config.clone(), self.prober.clone(), store.clone())?;
        Handle::try_current().map_err(|_| ScannerError::NoRuntime)?;
        let state = engine.subscribe();
        let cancel = cancel.child_token();
        let handle = engine.start(cancel.clone());

        *run = Some(Run {
            store,
            cancel,
            state,
            _handle: handle,
        });
        Ok(())
    }

    /// The current ranking, fastest first.
    ///
    /// Empty before the first qualifying probe and when never started. After
    /// a stop, returns what was known at that point minus expired records.
    pub fn available_endpoints(&self) -> Vec<EndpointRecord> {
        self.lock()
            .as_ref()
            .map(|run| run.store.snapshot())
            .unwrap_or_default()
    }

    /// Lifecycle state of the most recent scan.
    pub fn state(&self) -> EngineState {
        self.lock()
            .as_ref()
            .map(|run| *run.state.borrow())
            .unwrap_or(EngineState::Idle)
    }

    /// Cancel the running scan and wait until it has stopped.
    ///
    /// Returns within the configured grace period, workers still busy by
    /// then are abandoned. Once this returns the ranking no longer changes.
    pub async fn stop(&self) {
        let (cancel, mut state) = match self.lock().as_ref() {
            Some(run) => (run.cancel.clone(), run.state.clone()),
            None => return,
        };

        if !cancel.is_cancelled() {
            info!(target: self.config.log_target, "Stop requested");
        }
        cancel.cancel();
        while *state.borrow_and_update() != EngineState::Stopped {
            if state.changed().await.is_err() {
                break;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Run>> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<P: Prober> Drop for Scanner<P> {
    fn drop(&mut self) {
        if let Some(run) = self.lock().as_ref() {
            run.cancel.cancel();
        }
    }
}
