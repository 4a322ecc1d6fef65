//! Tunnel-port selection against the identity store.

use std::collections::HashSet;

use ssh_reverse_mux_store::IdentStore;

use crate::cli::PortRange;

/// Resolve the tunnel port for `key`.
///
/// A stored port inside the configured range is reused as-is. A missing
/// entry, or one stranded outside the range after a reconfiguration, gets
/// the lowest port of the range not valued anywhere in the store. Returns
/// the port and whether the store needs updating; `None` means the range
/// is exhausted and the request must be dropped.
pub fn resolve_port(store: &IdentStore, range: &PortRange, key: &str) -> Option<(u16, bool)> {
    if let Some(port) = store.get(key) {
        if range.contains(port) {
            return Some((port, false));
        }
    }

    let in_use: HashSet<u16> = store.ports().collect();
    range
        .iter()
        .find(|port| !in_use.contains(port))
        .map(|port| (port, true))
}
