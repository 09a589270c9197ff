//! Address ranges and ports served by Cloudflare WARP.

use crate::error::ScannerError;
use crate::generator::random_address;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use rand::seq::SliceRandom;
use rand::Rng;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

/// UDP ports WARP endpoints accept handshakes on.
pub const WARP_PORTS: &[u16] = &[
    500, 854, 859, 864, 878, 880, 890, 891, 894, 903, 908, 928, 934, 939, 942, 943, 945, 946,
    955, 968, 987, 988, 1002, 1010, 1014, 1018, 1070, 1074, 1180, 1387, 1701, 1843, 2371, 2408,
    2506, 3138, 3476, 3581, 3854, 4177, 4198, 4233, 4500, 5279, 5956, 7103, 7152, 7156, 7281,
    7559, 8319, 8742, 8854, 8886,
];

// Prefix lengths are constants within range, construction cannot fail.
fn v4(a: u8, b: u8, c: u8, d: u8, len: u8) -> IpNet {
    IpNet::V4(Ipv4Net::new_assert(Ipv4Addr::new(a, b, c, d), len))
}

fn v6(addr: Ipv6Addr, len: u8) -> IpNet {
    IpNet::V6(Ipv6Net::new_assert(addr, len))
}

/// Prefixes WARP endpoints are announced from.
pub fn default_cidrs() -> Vec<IpNet> {
    vec![
        v4(162, 159, 192, 0, 24),
        v4(162, 159, 195, 0, 24),
        v4(188, 114, 96, 0, 24),
        v4(188, 114, 97, 0, 24),
        v4(188, 114, 98, 0, 24),
        v4(188, 114, 99, 0, 24),
        v6(Ipv6Addr::new(0x2606, 0x4700, 0xd0, 0, 0, 0, 0, 0), 64),
        v6(Ipv6Addr::new(0x2606, 0x4700, 0xd1, 0, 0, 0, 0, 0), 64),
    ]
}

/// Pick a random WARP endpoint without scanning.
///
/// # Arguments
///
/// * `ipv4` - Allow IPv4 endpoints.
/// * `ipv6` - Allow IPv6 endpoints.
///
/// # Returns
///
/// * `Ok(SocketAddr)` - A random address from [`default_cidrs`] on a random [`WARP_PORTS`] port.
/// * `Err(ScannerError::NoAddressFamily)` - If neither family is allowed.
pub fn random_endpoint(ipv4: bool, ipv6: bool) -> Result<SocketAddr, ScannerError> {
    if !ipv4 && !ipv6 {
        return Err(ScannerError::NoAddressFamily);
    }

    let candidates: Vec<IpNet> = default_cidrs()
        .into_iter()
        .filter(|net| match net {
            IpNet::V4(_) => ipv4,
            IpNet::V6(_) => ipv6,
        })
        .collect();

    let mut rng = rand::thread_rng();
    let prefix = candidates
        .choose(&mut rng)
        .ok_or(ScannerError::NoUsablePrefix)?;
    let port = WARP_PORTS[rng.gen_range(0..WARP_PORTS.len())];
    Ok(SocketAddr::new(random_address(prefix, &mut rng), port))
}
