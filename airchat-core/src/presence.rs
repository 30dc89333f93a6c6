//! Presence tracking: who is on the link, when we last heard from them, and who went quiet.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// What we know about one peer address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub nickname: String,
    pub last_seen: Instant,
    /// Set once by a sweep; only a rejoin or removal clears it.
    pub timed_out: bool,
}

/// One roster line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub address: SocketAddr,
    pub nickname: String,
    pub seen_ago: Duration,
    pub stale: bool,
}

/// Peer table keyed by network address.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    peers: HashMap<SocketAddr, PeerRecord>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any accepted message counts as a sign of life. Does not clear `timed_out`.
    pub fn touch(&mut self, addr: SocketAddr, nickname: &str, now: Instant) {
        let record = self.peers.entry(addr).or_insert_with(|| PeerRecord {
            nickname: String::new(),
            last_seen: now,
            timed_out: false,
        });
        record.nickname = nickname.to_owned();
        record.last_seen = now;
    }

    /// Explicit rejoin: the peer is live again.
    pub fn revive(&mut self, addr: &SocketAddr) {
        if let Some(record) = self.peers.get_mut(addr) {
            record.timed_out = false;
        }
    }

    pub fn remove(&mut self, addr: &SocketAddr) -> Option<PeerRecord> {
        self.peers.remove(addr)
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<&PeerRecord> {
        self.peers.get(addr)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Flag and return peers silent for longer than `threshold` that were not flagged before.
    pub fn sweep(&mut self, threshold: Duration, now: Instant) -> Vec<(SocketAddr, PeerRecord)> {
        let mut lost: Vec<(SocketAddr, PeerRecord)> = self
            .peers
            .iter_mut()
            .filter(|(_, r)| !r.timed_out && now.saturating_duration_since(r.last_seen) > threshold)
            .map(|(addr, r)| {
                r.timed_out = true;
                (*addr, r.clone())
            })
            .collect();
        lost.sort_by_key(|(addr, _)| *addr);
        lost
    }

    /// Snapshot for display, sorted by address.
    pub fn roster(&self, now: Instant) -> Vec<RosterEntry> {
        let mut entries: Vec<RosterEntry> = self
            .peers
            .iter()
            .map(|(addr, r)| RosterEntry {
                address: *addr,
                nickname: r.nickname.clone(),
                seen_ago: now.saturating_duration_since(r.last_seen),
                stale: r.timed_out,
            })
            .collect();
        entries.sort_by_key(|e| e.address);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(10);

    fn addr(n: u16) -> SocketAddr {
        SocketAddr::new("fe80::1".parse().unwrap(), n)
    }

    #[test]
    fn touch_creates_and_updates() {
        let mut p = PresenceTracker::new();
        let t0 = Instant::now();
        p.touch(addr(1), "alice", t0);
        p.touch(addr(1), "alicia", t0 + INTERVAL);
        assert_eq!(p.len(), 1);
        let r = p.get(&addr(1)).unwrap();
        assert_eq!(r.nickname, "alicia");
        assert_eq!(r.last_seen, t0 + INTERVAL);
    }

    #[test]
    fn sweep_flags_exactly_once() {
        let mut p = PresenceTracker::new();
        let t0 = Instant::now();
        p.touch(addr(1), "alice", t0);
        p.touch(addr(2), "bob", t0 + INTERVAL * 2);
        let threshold = INTERVAL * 3;

        assert!(p.sweep(threshold, t0 + threshold).is_empty());
        let lost = p.sweep(threshold, t0 + threshold + Duration::from_millis(1));
        assert_eq!(lost.len(), 1);
        assert_eq!(lost[0].0, addr(1));
        assert!(lost[0].1.timed_out);
        assert!(p.sweep(threshold, t0 + threshold * 2).iter().all(|(a, _)| *a != addr(1)));
    }

    #[test]
    fn timed_out_peer_stays_in_roster() {
        let mut p = PresenceTracker::new();
        let t0 = Instant::now();
        p.touch(addr(1), "alice", t0);
        p.sweep(INTERVAL * 3, t0 + INTERVAL * 4);
        // Traffic alone does not clear the flag.
        p.touch(addr(1), "alice", t0 + INTERVAL * 5);
        let roster = p.roster(t0 + INTERVAL * 5);
        assert_eq!(roster.len(), 1);
        assert!(roster[0].stale);
        p.revive(&addr(1));
        assert!(!p.roster(t0 + INTERVAL * 5)[0].stale);
    }

    #[test]
    fn remove_then_touch_is_fresh() {
        let mut p = PresenceTracker::new();
        let t0 = Instant::now();
        p.touch(addr(1), "alice", t0);
        p.sweep(INTERVAL * 3, t0 + INTERVAL * 4);
        assert!(p.remove(&addr(1)).is_some());
        assert!(p.is_empty());
        p.touch(addr(1), "alice", t0 + INTERVAL * 6);
        assert!(!p.get(&addr(1)).unwrap().timed_out);
    }

    #[test]
    fn roster_reports_age() {
        let mut p = PresenceTracker::new();
        let t0 = Instant::now();
        p.touch(addr(2), "bob", t0);
        p.touch(addr(1), "alice", t0 + INTERVAL);
        let roster = p.roster(t0 + INTERVAL * 2);
        assert_eq!(roster[0].address, addr(1));
        assert_eq!(roster[0].seen_ago, INTERVAL);
        assert_eq!(roster[1].seen_ago, INTERVAL * 2);
    }
}
