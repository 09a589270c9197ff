//! Bounded, latency ranked set of known-good endpoints.

use std::fmt;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// An endpoint that answered a probe fast enough to be kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointRecord {
    /// Address of the endpoint.
    pub address: IpAddr,
    /// Round-trip time of the probe that produced this record.
    pub rtt: Duration,
    /// When that probe completed.
    pub discovered_at: Instant,
}

impl EndpointRecord {
    /// Time since the endpoint was last validated.
    pub fn age(&self) -> Duration {
        self.discovered_at.elapsed()
    }
}

impl fmt::Display for EndpointRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.address, self.rtt)
    }
}

/// What happened to a probe result offered to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The address was resident, its RTT and timestamp were replaced.
    Refreshed,
    /// The address was added to a store with free room.
    Inserted,
    /// The address displaced the slowest resident endpoint.
    Evicted(IpAddr),
    /// The RTT is above the configured maximum.
    TooSlow,
    /// The store is full and the RTT is no better than the slowest resident.
    NotBetter,
    /// The scan that owns the store has stopped.
    Sealed,
}

impl Admission {
    /// Whether the result was stored.
    pub fn is_admitted(&self) -> bool {
        matches!(
            self,
            Admission::Refreshed | Admission::Inserted | Admission::Evicted(_)
        )
    }
}

#[derive(Debug, Default)]
struct Records {
    entries: Vec<EndpointRecord>,
    sealed: bool,
}

impl Records {
    fn retire_expired(&mut self, ttl: Duration, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|record| now.saturating_duration_since(record.discovered_at) <= ttl);
        before - self.entries.len()
    }
}

/// The ranked result store shared by the workers and the facade.
///
/// Every operation runs in one short critical section, so occupancy never
/// exceeds the bound and readers never see a half-updated record.
///
/// Insertion policy for a result that is fast enough:
///
/// 1. A resident address is refreshed in place.
/// 2. Otherwise it is inserted if there is room.
/// 3. Otherwise it replaces the slowest resident if strictly faster. Equal
///    latency keeps the incumbent.
///
/// Records older than the TTL are retired before any admission decision and
/// by [`RankedStore::sweep`], and are never part of a snapshot.
#[derive(Debug)]
pub struct RankedStore {
    capacity: usize,
    max_rtt: Duration,
    ttl: Duration,
    records: Mutex<Records>,
}

impl RankedStore {
    /// Create an empty store.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of records held.
    /// * `max_rtt` - Slowest round trip admitted.
    /// * `ttl` - Age after which a record is retired.
    pub fn new(capacity: usize, max_rtt: Duration, ttl: Duration) -> Self {
        Self {
            capacity,
            max_rtt,
            ttl,
            records: Mutex::new(Records {
                entries: Vec::with_capacity(capacity),
                sealed: false,
            }),
        }
    }

    /// Maximum number of records held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of resident records, including any not yet swept.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offer a successful probe result measured now.
    pub fn insert(&self, address: IpAddr, rtt: Duration) -> Admission {
        self.insert_at(address, rtt, Instant::now())
    }

    /// Offer a successful probe result measured at `discovered_at`.
    pub fn insert_at(&self, address: IpAddr, rtt: Duration, discovered_at: Instant) -> Admission {
        let mut records = self.lock();
        if records.sealed {
            return Admission::Sealed;
        }
        // A slow answer from a resident endpoint does not refresh it, the old
        // measurement ages out instead.
        if rtt > self.max_rtt {
            return Admission::TooSlow;
        }

        records.retire_expired(self.ttl, Instant::now());

        let record = EndpointRecord {
            address,
            rtt,
            discovered_at,
        };

        if let Some(resident) = records.entries.iter_mut().find(|r| r.address == address) {
            *resident = record;
            return Admission::Refreshed;
        }

        if records.entries.len() < self.capacity {
            records.entries.push(record);
            return Admission::Inserted;
        }

        let worst = records
            .entries
            .iter()
            .enumerate()
            .max_by_key(|(_, r)| r.rtt)
            .map(|(index, r)| (index, r.rtt, r.address));

        match worst {
            Some((index, worst_rtt, evicted)) if rtt < worst_rtt => {
                records.entries[index] = record;
                Admission::Evicted(evicted)
            }
            _ => Admission::NotBetter,
        }
    }

    /// Remove every record older than the TTL.
    ///
    /// # Returns
    ///
    /// The number of records removed. Always zero once sealed.
    pub fn sweep(&self) -> usize {
        let mut records = self.lock();
        if records.sealed {
            return 0;
        }
        records.retire_expired(self.ttl, Instant::now())
    }

    /// Copy of the unexpired records, fastest first.
    pub fn snapshot(&self) -> Vec<EndpointRecord> {
        let now = Instant::now();
        let mut snapshot: Vec<EndpointRecord> = self
            .lock()
            .entries
            .iter()
            .filter(|record| now.saturating_duration_since(record.discovered_at) <= self.ttl)
            .copied()
            .collect();
        snapshot.sort_by_key(|record| record.rtt);
        snapshot
    }

    /// Freeze the store, later inserts and sweeps leave it untouched.
    pub fn seal(&self) {
        self.lock().sealed = true;
    }

    /// Whether [`RankedStore::seal`] was called.
    pub fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    fn lock(&self) -> MutexGuard<'_, Records> {
        // Every mutation completes before the guard drops, a poisoned lock
        // still holds consistent records.
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
