//! Room membership with a reverse index for disconnect cleanup.

use std::collections::{HashMap, HashSet};

use huddle_core::{ConnectionId, RoomId};

/// Room → members, plus connection → rooms.
///
/// A room exists only while it has members. Both maps are kept in step by
/// every mutation.
#[derive(Debug, Default)]
pub struct RoomTable {
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
    memberships: HashMap<ConnectionId, HashSet<RoomId>>,
}

impl RoomTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `conn` to `room`. Returns `false` if it was already a member.
    pub fn join(&mut self, room: &RoomId, conn: &ConnectionId) -> bool {
        let added = self
            .rooms
            .entry(room.clone())
            .or_default()
            .insert(conn.clone());
        if added {
            let _ = self
                .memberships
                .entry(conn.clone())
                .or_default()
                .insert(room.clone());
        }
        added
    }

    /// Remove `conn` from `room`. Returns `false` if it was not a member.
    pub fn leave(&mut self, room: &RoomId, conn: &ConnectionId) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        if !members.remove(conn) {
            return false;
        }
        if members.is_empty() {
            let _ = self.rooms.remove(room);
        }
        if let Some(joined) = self.memberships.get_mut(conn) {
            let _ = joined.remove(room);
            if joined.is_empty() {
                let _ = self.memberships.remove(conn);
            }
        }
        true
    }

    /// Remove `conn` from every room it joined, returning those rooms.
    pub fn remove_connection(&mut self, conn: &ConnectionId) -> Vec<RoomId> {
        let Some(joined) = self.memberships.remove(conn) else {
            return Vec::new();
        };
        let mut left: Vec<RoomId> = joined.into_iter().collect();
        left.sort();
        for room in &left {
            if let Some(members) = self.rooms.get_mut(room) {
                let _ = members.remove(conn);
                if members.is_empty() {
                    let _ = self.rooms.remove(room);
                }
            }
        }
        left
    }

    /// Members of `room`; empty for an unknown room.
    pub fn members<'a>(
        &'a self,
        room: &RoomId,
    ) -> impl Iterator<Item = &'a ConnectionId> + use<'a> {
        self.rooms.get(room).into_iter().flatten()
    }

    /// Whether `conn` is in `room`.
    pub fn contains(&self, room: &RoomId, conn: &ConnectionId) -> bool {
        self.rooms.get(room).is_some_and(|m| m.contains(conn))
    }

    /// Rooms `conn` currently belongs to.
    pub fn rooms_of<'a>(
        &'a self,
        conn: &ConnectionId,
    ) -> impl Iterator<Item = &'a RoomId> + use<'a> {
        self.memberships.get(conn).into_iter().flatten()
    }

    /// Number of non-empty rooms.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether no room has members.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
