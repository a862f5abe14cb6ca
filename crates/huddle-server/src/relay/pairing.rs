//! Secondary-camera pairings keyed by a short code.
//!
//! A pairing links the primary device that registered a code to the phone
//! that later attaches with it. Entries expire `ttl` after their last
//! activity (register, attach, frame). An expired entry is removed the next
//! time it is looked up or by [`PairingTable::sweep`], and until then it
//! behaves exactly like an unknown code.

use std::collections::HashMap;
use std::time::Duration;

use huddle_core::{ConnectionId, PairingCode, RoomId};
use metrics::counter;
use tokio::time::Instant;

use crate::metrics::RELAY_PAIRINGS_EXPIRED_TOTAL;

/// One live pairing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pairing {
    /// Room the secondary camera feeds.
    pub room_id: RoomId,
    /// Connection that registered the code.
    pub primary: ConnectionId,
    /// Connection that attached with the code, if any.
    pub secondary: Option<ConnectionId>,
    last_activity: Instant,
}

impl Pairing {
    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity) >= ttl
    }
}

/// Counts returned by [`PairingTable::remove_connection`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PairingCleanup {
    /// Pairings dropped because the connection was their primary.
    pub removed: usize,
    /// Pairings whose secondary slot was cleared.
    pub detached: usize,
}

/// Code → pairing map with inactivity expiry.
#[derive(Debug)]
pub struct PairingTable {
    ttl: Duration,
    entries: HashMap<PairingCode, Pairing>,
}

impl PairingTable {
    /// Create an empty table whose entries live `ttl` past their last use.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Store a pairing for `code`, replacing any previous one.
    ///
    /// Returns the replaced pairing if it was still live.
    pub fn register(
        &mut self,
        code: PairingCode,
        room_id: RoomId,
        primary: ConnectionId,
        now: Instant,
    ) -> Option<Pairing> {
        let previous = self.entries.insert(
            code,
            Pairing {
                room_id,
                primary,
                secondary: None,
                last_activity: now,
            },
        );
        previous.filter(|p| !p.is_expired(self.ttl, now))
    }

    /// Record `secondary` on the pairing for `code`.
    ///
    /// A later attach overwrites an earlier one. Returns `None` for an
    /// unknown or expired code.
    pub fn attach(
        &mut self,
        code: &PairingCode,
        secondary: ConnectionId,
        now: Instant,
    ) -> Option<&Pairing> {
        let pairing = self.live_mut(code, now)?;
        pairing.secondary = Some(secondary);
        pairing.last_activity = now;
        Some(&*pairing)
    }

    /// Refresh the pairing for `code` on a forwarded frame.
    pub fn touch(&mut self, code: &PairingCode, now: Instant) -> Option<&Pairing> {
        let pairing = self.live_mut(code, now)?;
        pairing.last_activity = now;
        Some(&*pairing)
    }

    /// Look up a live pairing without refreshing it.
    pub fn get(&self, code: &PairingCode, now: Instant) -> Option<&Pairing> {
        self.entries
            .get(code)
            .filter(|p| !p.is_expired(self.ttl, now))
    }

    /// Drop pairings owned by `conn` and clear its secondary slots.
    pub fn remove_connection(&mut self, conn: &ConnectionId) -> PairingCleanup {
        let before = self.entries.len();
        self.entries.retain(|_, p| &p.primary != conn);
        let removed = before - self.entries.len();

        let mut detached = 0;
        for pairing in self.entries.values_mut() {
            if pairing.secondary.as_ref() == Some(conn) {
                pairing.secondary = None;
                detached += 1;
            }
        }
        PairingCleanup { removed, detached }
    }

    /// Remove every expired pairing. Returns how many were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, p| !p.is_expired(ttl, now));
        let expired = before - self.entries.len();
        counter!(RELAY_PAIRINGS_EXPIRED_TOTAL).increment(expired as u64);
        expired
    }

    /// Pairings still live at `now`. Expired entries awaiting a sweep are
    /// not counted.
    pub fn live_count(&self, now: Instant) -> usize {
        self.entries
            .values()
            .filter(|p| !p.is_expired(self.ttl, now))
            .count()
    }

    fn live_mut(&mut self, code: &PairingCode, now: Instant) -> Option<&mut Pairing> {
        if self
            .entries
            .get(code)
            .is_some_and(|p| p.is_expired(self.ttl, now))
        {
            let _ = self.entries.remove(code);
            counter!(RELAY_PAIRINGS_EXPIRED_TOTAL).increment(1);
            return None;
        }
        self.entries.get_mut(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    fn code(s: &str) -> PairingCode {
        PairingCode::from(s)
    }

    fn table_with(now: Instant) -> PairingTable {
        let mut table = PairingTable::new(TTL);
        let _ = table.register(code("123456"), RoomId::from("R1"), ConnectionId::from("a"), now);
        table
    }

    #[test]
    fn attach_records_secondary() {
        let now = Instant::now();
        let mut table = table_with(now);
        let pairing = table.attach(&code("123456"), ConnectionId::from("c"), now).unwrap();
        assert_eq!(pairing.primary.as_str(), "a");
        assert_eq!(pairing.secondary.as_deref(), Some("c"));
    }

    #[test]
    fn second_attach_overwrites() {
        let now = Instant::now();
        let mut table = table_with(now);
        let _ = table.attach(&code("123456"), ConnectionId::from("c"), now);
        let pairing = table.attach(&code("123456"), ConnectionId::from("d"), now).unwrap();
        assert_eq!(pairing.secondary.as_deref(), Some("d"));
        assert_eq!(table.live_count(now), 1);
    }

    #[test]
    fn attach_unknown_code_is_none() {
        let now = Instant::now();
        let mut table = table_with(now);
        assert!(table.attach(&code("000000"), ConnectionId::from("c"), now).is_none());
        assert!(table.touch(&code("000000"), now).is_none());
    }

    #[test]
    fn reregister_replaces_and_clears_secondary() {
        let now = Instant::now();
        let mut table = table_with(now);
        let _ = table.attach(&code("123456"), ConnectionId::from("c"), now);

        let previous = table
            .register(code("123456"), RoomId::from("R2"), ConnectionId::from("b"), now)
            .unwrap();
        assert_eq!(previous.primary.as_str(), "a");

        let current = table.get(&code("123456"), now).unwrap();
        assert_eq!(current.room_id.as_str(), "R2");
        assert_eq!(current.primary.as_str(), "b");
        assert!(current.secondary.is_none());
    }

    #[test]
    fn expired_pairing_behaves_like_unknown() {
        let now = Instant::now();
        let mut table = table_with(now);
        let later = now + TTL;

        assert!(table.get(&code("123456"), later).is_none());
        assert!(table.touch(&code("123456"), later).is_none());
        assert_eq!(table.live_count(now), 0);
    }

    #[test]
    fn live_count_skips_unswept_expired_entries() {
        let now = Instant::now();
        let mut table = table_with(now);
        let later = now + Duration::from_secs(30);
        let _ = table.register(code("999999"), RoomId::from("R9"), ConnectionId::from("z"), later);

        assert_eq!(table.live_count(later), 2);
        assert_eq!(table.live_count(now + TTL), 1);
        assert_eq!(table.live_count(later + TTL), 0);
        assert_eq!(table.sweep(later + TTL), 2);
    }

    #[test]
    fn activity_extends_lifetime() {
        let now = Instant::now();
        let mut table = table_with(now);
        let half = now + TTL / 2;
        assert!(table.touch(&code("123456"), half).is_some());
        assert!(table.get(&code("123456"), now + TTL).is_some());
        assert!(table.get(&code("123456"), half + TTL).is_none());
    }

    #[test]
    fn sweep_removes_only_expired() {
        let now = Instant::now();
        let mut table = table_with(now);
        let later = now + Duration::from_secs(30);
        let _ = table.register(code("999999"), RoomId::from("R9"), ConnectionId::from("z"), later);

        assert_eq!(table.sweep(now + TTL), 1);
        assert!(table.get(&code("999999"), now + TTL).is_some());
        assert_eq!(table.sweep(now + TTL), 0);
    }

    #[test]
    fn remove_connection_as_primary_and_secondary() {
        let now = Instant::now();
        let mut table = table_with(now);
        let _ = table.register(code("222222"), RoomId::from("R2"), ConnectionId::from("b"), now);
        let _ = table.attach(&code("222222"), ConnectionId::from("a"), now);

        let cleanup = table.remove_connection(&ConnectionId::from("a"));
        assert_eq!(cleanup, PairingCleanup { removed: 1, detached: 1 });
        assert!(table.get(&code("123456"), now).is_none());
        let kept = table.get(&code("222222"), now).unwrap();
        assert!(kept.secondary.is_none());
    }
}
