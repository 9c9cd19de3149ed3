//! Downstream peer address allocation

use ipnetwork::Ipv4Network;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Prefixes shorter than this are not enumerated
pub const MIN_PREFIX_LEN: u8 = 16;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AllocationError {
    #[error("refusing to allocate from a /{0} network, prefix is too short")]
    PrefixTooLarge(u8),

    #[error("IP pool is exhausted")]
    Exhausted,
}

/// Pick a free address in `network`
///
/// `network` is the interface address with its prefix, e.g. `10.0.0.1/24`.
/// Only addresses strictly after the interface address are considered, and
/// anything in `occupied` is skipped. The result is drawn uniformly from
/// what remains.
pub fn get_free_ip<R: Rng + ?Sized>(
    occupied: &HashSet<Ipv4Addr>,
    network: Ipv4Network,
    rng: &mut R,
) -> Result<Ipv4Addr, AllocationError> {
    if network.prefix() < MIN_PREFIX_LEN {
        return Err(AllocationError::PrefixTooLarge(network.prefix()));
    }

    let first = u32::from(network.ip())
        .checked_add(1)
        .ok_or(AllocationError::Exhausted)?;
    let last = u32::from(network.broadcast());

    let pool: Vec<Ipv4Addr> = (first..=last)
        .map(Ipv4Addr::from)
        .filter(|addr| network.contains(*addr) && !occupied.contains(addr))
        .collect();

    pool.choose(rng).copied().ok_or(AllocationError::Exhausted)
}
