//! # Peer Table
//!
//! Single-owner registry of connected peers, keyed by peer id with a
//! reverse index by socket address. Owned exclusively by the server worker
//! thread; everything else reaches it through commands or handler context.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;

use crate::PeerId;

/// A connected peer.
#[derive(Clone, Debug)]
pub struct Peer {
    /// Server-assigned id, unique for the lifetime of the server run.
    pub id: PeerId,
    /// Remote socket address.
    pub addr: SocketAddr,
    /// Username, set once the peer joins the lobby.
    pub username: Option<String>,
    /// Lobby ready flag.
    pub ready: bool,
}

/// All connected peers.
///
/// Ids start at 1 and increase monotonically; ids of departed peers are
/// never reused within a run.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: BTreeMap<PeerId, Peer>,
    by_addr: HashMap<SocketAddr, PeerId>,
    next_id: u32,
}

impl PeerTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            peers: BTreeMap::new(),
            by_addr: HashMap::new(),
            next_id: 1,
        }
    }

    /// Registers a newly connected remote and assigns it an id.
    pub fn insert(&mut self, addr: SocketAddr) -> PeerId {
        let id = PeerId(self.next_id);
        self.next_id += 1;
        self.peers.insert(
            id,
            Peer {
                id,
                addr,
                username: None,
                ready: false,
            },
        );
        self.by_addr.insert(addr, id);
        id
    }

    /// Removes the peer at an address, returning it if present.
    pub fn remove_by_addr(&mut self, addr: SocketAddr) -> Option<Peer> {
        let id = self.by_addr.remove(&addr)?;
        self.peers.remove(&id)
    }

    /// Removes a peer by id, returning it if present.
    pub fn remove(&mut self, id: PeerId) -> Option<Peer> {
        let peer = self.peers.remove(&id)?;
        self.by_addr.remove(&peer.addr);
        Some(peer)
    }

    /// Looks up a peer by id.
    #[must_use]
    pub fn get(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    /// Looks up a peer by id for mutation.
    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(&id)
    }

    /// Looks up the peer id at an address.
    #[must_use]
    pub fn id_at(&self, addr: SocketAddr) -> Option<PeerId> {
        self.by_addr.get(&addr).copied()
    }

    /// Iterates all peers in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    /// Iterates all peers except one, in id order.
    pub fn others(&self, excluded: PeerId) -> impl Iterator<Item = &Peer> {
        self.peers.values().filter(move |p| p.id != excluded)
    }

    /// Usernames of peers that have joined the lobby, keyed by id.
    #[must_use]
    pub fn joined_usernames(&self) -> BTreeMap<PeerId, String> {
        self.peers
            .values()
            .filter_map(|p| p.username.clone().map(|name| (p.id, name)))
            .collect()
    }

    /// Number of connected peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Returns true when no peers are connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Drops every peer. Ids keep counting up across the clear.
    pub fn clear(&mut self) {
        self.peers.clear();
        self.by_addr.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn ids_start_at_one_and_never_recycle() {
        let mut table = PeerTable::new();
        let first = table.insert(addr(1000));
        let second = table.insert(addr(1001));
        assert_eq!(first, PeerId(1));
        assert_eq!(second, PeerId(2));

        table.remove(first);
        let third = table.insert(addr(1002));
        assert_eq!(third, PeerId(3));
    }

    #[test]
    fn reverse_index_stays_consistent() {
        let mut table = PeerTable::new();
        let id = table.insert(addr(2000));
        assert_eq!(table.id_at(addr(2000)), Some(id));

        let removed = table.remove_by_addr(addr(2000)).unwrap();
        assert_eq!(removed.id, id);
        assert_eq!(table.id_at(addr(2000)), None);
        assert!(table.is_empty());
    }

    #[test]
    fn joined_usernames_skips_peers_without_a_name() {
        let mut table = PeerTable::new();
        let named = table.insert(addr(3000));
        table.insert(addr(3001));
        table.get_mut(named).unwrap().username = Some("alice".into());

        let joined = table.joined_usernames();
        assert_eq!(joined.len(), 1);
        assert_eq!(joined.get(&named).map(String::as_str), Some("alice"));
    }
}
