//! Lazy, randomized candidate addresses drawn from CIDR prefixes.

use crate::error::ScannerError;
use ipnet::IpNet;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::{Mutex, PoisonError};

/// Random draws tried before walking a prefix for an unseen address.
const MAX_DRAW_ATTEMPTS: usize = 64;

/// Uniformly random address inside `prefix`.
pub(crate) fn random_address<R: Rng + ?Sized>(prefix: &IpNet, rng: &mut R) -> IpAddr {
    address_at(prefix, rng.gen::<u128>())
}

/// Address at host offset `host` inside `prefix`, wrapping around its size.
fn address_at(prefix: &IpNet, host: u128) -> IpAddr {
    match prefix {
        IpNet::V4(net) => {
            let host = host as u32 & u32::from(net.hostmask());
            IpAddr::V4(Ipv4Addr::from(u32::from(net.network()) | host))
        }
        IpNet::V6(net) => {
            let host = host & u128::from(net.hostmask());
            IpAddr::V6(Ipv6Addr::from(u128::from(net.network()) | host))
        }
    }
}

/// Number of addresses in `prefix`, saturating at `u128::MAX`.
fn prefix_size(prefix: &IpNet) -> u128 {
    let host_bits = u32::from(prefix.max_prefix_len() - prefix.prefix_len());
    1u128.checked_shl(host_bits).unwrap_or(u128::MAX)
}

/// Draw history of a single prefix.
struct PrefixCycle {
    prefix: IpNet,
    capacity: usize,
    seen: HashSet<IpAddr>,
    number: u64,
}

impl PrefixCycle {
    fn new(prefix: IpNet, horizon: usize) -> Self {
        let capacity = prefix_size(&prefix).min(horizon.max(1) as u128) as usize;
        Self {
            prefix,
            capacity,
            seen: HashSet::with_capacity(capacity.min(4096)),
            number: 0,
        }
    }

    fn roll_over(&mut self) {
        self.seen.clear();
        self.number += 1;
    }

    fn next_address(&mut self, rng: &mut StdRng) -> IpAddr {
        if self.seen.len() >= self.capacity {
            self.roll_over();
        }

        for _ in 0..MAX_DRAW_ATTEMPTS {
            let candidate = random_address(&self.prefix, rng);
            if self.seen.insert(candidate) {
                return candidate;
            }
        }

        // Nearly exhausted, walk from a random offset to the next unseen host.
        // One exists because `seen` holds fewer than `capacity` addresses.
        let start = rng.gen::<u128>();
        let mut offset = 0u128;
        loop {
            let candidate = address_at(&self.prefix, start.wrapping_add(offset));
            if self.seen.insert(candidate) {
                return candidate;
            }
            offset += 1;
        }
    }
}

struct Cycles {
    prefixes: Vec<PrefixCycle>,
    rng: StdRng,
}

/// An endless source of candidate addresses.
///
/// Each draw picks a prefix uniformly, then an address uniformly inside it,
/// so small prefixes are sampled as often as large ones.
///
/// Every prefix keeps its own cycle: no address of a prefix is returned
/// twice until that prefix has produced `horizon` addresses, or all of its
/// addresses, whichever is smaller. The prefix then starts over with an
/// empty history while the others carry on.
///
/// Safe to share between workers, the history is behind a short lock.
pub struct AddressGenerator {
    prefixes: Vec<IpNet>,
    capacity: usize,
    cycles: Mutex<Cycles>,
}

impl AddressGenerator {
    /// Create a generator over `prefixes`.
    ///
    /// # Returns
    ///
    /// * `Ok(AddressGenerator)` - Ready to draw.
    /// * `Err(ScannerError::NoUsablePrefix)` - If `prefixes` is empty.
    pub fn new(prefixes: Vec<IpNet>, horizon: usize) -> Result<Self, ScannerError> {
        Self::with_rng(prefixes, horizon, StdRng::from_entropy())
    }

    /// Create a generator with a reproducible sequence.
    pub fn with_seed(
        prefixes: Vec<IpNet>,
        horizon: usize,
        seed: u64,
    ) -> Result<Self, ScannerError> {
        Self::with_rng(prefixes, horizon, StdRng::seed_from_u64(seed))
    }

    fn with_rng(prefixes: Vec<IpNet>, horizon: usize, rng: StdRng) -> Result<Self, ScannerError> {
        if prefixes.is_empty() {
            return Err(ScannerError::NoUsablePrefix);
        }

        let cycles: Vec<PrefixCycle> = prefixes
            .iter()
            .map(|prefix| PrefixCycle::new(*prefix, horizon))
            .collect();
        let capacity = cycles
            .iter()
            .fold(0usize, |total, cycle| total.saturating_add(cycle.capacity));

        Ok(Self {
            prefixes,
            capacity,
            cycles: Mutex::new(Cycles {
                prefixes: cycles,
                rng,
            }),
        })
    }

    /// Prefixes this generator draws from.
    pub fn prefixes(&self) -> &[IpNet] {
        &self.prefixes
    }

    /// Distinct addresses available before every prefix has rolled over.
    pub fn cycle_capacity(&self) -> usize {
        self.capacity
    }

    /// Number of cycles completed by every prefix.
    pub fn cycle(&self) -> u64 {
        self.lock()
            .prefixes
            .iter()
            .map(|cycle| cycle.number)
            .min()
            .unwrap_or(0)
    }

    /// Draw the next candidate address.
    pub fn next_address(&self) -> IpAddr {
        let mut cycles = self.lock();
        let Cycles { prefixes, rng } = &mut *cycles;
        let index = rng.gen_range(0..prefixes.len());
        prefixes[index].next_address(rng)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Cycles> {
        // A panicking holder cannot leave the history inconsistent.
        self.cycles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Iterator for &AddressGenerator {
    type Item = IpAddr;

    fn next(&mut self) -> Option<IpAddr> {
        Some(self.next_address())
    }
}
