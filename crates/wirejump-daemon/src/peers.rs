//! Downstream peer registry
//!
//! Peers live as repeated `[Peer]` sections in the downstream config and are
//! pushed to the running interface after every change.

use ipnetwork::{IpNetwork, Ipv4Network};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use tracing::info;

use crate::error::DaemonError;
use crate::inifile::{section, IniSection};
use crate::network::allocator::get_free_ip;
use crate::network::is_valid_key;
use crate::state::{Environment, ProcessState};

const PEER_SECTION: &str = "Peer";

/// Register a downstream peer and return its client side address
///
/// The address carries the downstream prefix length, e.g. `10.0.0.3/24`.
pub async fn add_peer(
    state: &mut ProcessState,
    env: &Environment,
    public_key: &str,
    isolated: bool,
) -> Result<String, DaemonError> {
    if !is_valid_key(public_key) {
        return Err(DaemonError::validation("invalid public key"));
    }

    let downstream = &state.network.downstream;
    let mut config = downstream
        .read_config(&env.layout)
        .await
        .map_err(|e| DaemonError::io("failed to read downstream config", e))?;

    let peers = config.sections(PEER_SECTION);
    if peers.iter().any(|peer| peer_key(peer) == Some(public_key)) {
        return Err(DaemonError::validation("peer with this key is already registered"));
    }

    let occupied = occupied_addresses(peers)?;

    let network: Ipv4Network = match downstream.address.trim().parse::<IpNetwork>() {
        Ok(IpNetwork::V4(network)) => network,
        _ => {
            return Err(DaemonError::validation(
                "downstream interface has invalid network prefix",
            ))
        }
    };

    let free = get_free_ip(&occupied, network, &mut rand::thread_rng())?;

    // /32 marks the peer's own address; the whole downstream network is
    // appended unless the peer is isolated from the others
    let mut allowed = vec![format!("{}/32", free)];
    if !isolated {
        allowed.push(format!("{}/{}", network.network(), network.prefix()));
    }

    config.push(
        PEER_SECTION,
        section([
            ("PublicKey", public_key.to_string()),
            ("AllowedIPs", allowed.join(", ")),
        ]),
    );

    downstream
        .write_config(&env.layout, &config)
        .await
        .map_err(|e| DaemonError::io("failed to write downstream config", e))?;

    env.control
        .set_peer(&downstream.name, public_key, &allowed)
        .await
        .map_err(|e| DaemonError::interface("failed to update downstream peer", e))?;

    info!("Added downstream peer {} at {}", public_key, free);

    Ok(format!("{}/{}", free, network.prefix()))
}

/// Drop a downstream peer by public key
pub async fn remove_peer(
    state: &mut ProcessState,
    env: &Environment,
    public_key: &str,
) -> Result<(), DaemonError> {
    let downstream = &state.network.downstream;
    let mut config = downstream
        .read_config(&env.layout)
        .await
        .map_err(|e| DaemonError::io("failed to read downstream config", e))?;

    let peers = config.sections_mut(PEER_SECTION);
    let index = peers
        .iter()
        .position(|peer| peer_key(peer) == Some(public_key))
        .ok_or_else(|| DaemonError::validation("peer with this key is not found"))?;
    peers.remove(index);

    downstream
        .write_config(&env.layout, &config)
        .await
        .map_err(|e| DaemonError::io("failed to write downstream config", e))?;

    env.control
        .remove_peer(&downstream.name, public_key)
        .await
        .map_err(|e| DaemonError::interface("failed to remove downstream peer", e))?;

    info!("Removed downstream peer {}", public_key);

    Ok(())
}

fn peer_key(peer: &IniSection) -> Option<&str> {
    peer.get("PublicKey").map(|key| key.trim())
}

/// Single-host addresses found in the peers' `AllowedIPs`
fn occupied_addresses(peers: &[IniSection]) -> Result<HashSet<Ipv4Addr>, DaemonError> {
    let mut occupied = HashSet::new();

    for peer in peers {
        let Some(allowed) = peer.get("AllowedIPs") else {
            continue;
        };

        for token in allowed.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let network: IpNetwork = token.parse().map_err(|_| {
                DaemonError::validation(format!("peer has malformed AllowedIPs entry '{}'", token))
            })?;

            if let IpNetwork::V4(v4) = network {
                if v4.prefix() == 32 {
                    occupied.insert(v4.ip());
                }
            }
        }
    }

    Ok(occupied)
}
