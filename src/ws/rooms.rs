//! Room registry: room key -> live sessions subscribed to it.
//!
//! Keys are opaque strings (`user:<id>`, `conversation:<id>`). A room exists
//! only while it has at least one member.

use axum::extract::ws::Message;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

use super::{ConnectionSender, SessionId};

#[derive(Debug, Default, Clone)]
pub struct RoomRegistry {
    rooms: Arc<DashMap<String, HashMap<SessionId, ConnectionSender>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session to a room. Returns false if it was already a member.
    pub fn join(&self, room: &str, session: SessionId, tx: ConnectionSender) -> bool {
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(session, tx)
            .is_none()
    }

    /// Remove a session from a room, dropping the room once empty.
    /// Returns false if the session was not a member.
    pub fn leave(&self, room: &str, session: SessionId) -> bool {
        let removed = match self.rooms.get_mut(room) {
            Some(mut members) => members.remove(&session).is_some(),
            None => false,
        };
        self.rooms.remove_if(room, |_, members| members.is_empty());
        removed
    }

    /// Remove a session from every listed room. Used on session teardown.
    pub fn leave_all<'a, I>(&self, session: SessionId, rooms: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        for room in rooms {
            self.leave(room, session);
        }
    }

    /// Deliver a frame to every member. Returns the number of sessions reached.
    pub fn broadcast(&self, room: &str, msg: &Message) -> usize {
        self.send_filtered(room, msg, None)
    }

    /// Deliver a frame to every member except `excluded`.
    pub fn broadcast_except(&self, room: &str, msg: &Message, excluded: SessionId) -> usize {
        self.send_filtered(room, msg, Some(excluded))
    }

    fn send_filtered(&self, room: &str, msg: &Message, excluded: Option<SessionId>) -> usize {
        let Some(members) = self.rooms.get(room) else {
            return 0;
        };
        let mut reached = 0;
        for (session, tx) in members.iter() {
            if Some(*session) == excluded {
                continue;
            }
            if tx.send(msg.clone()).is_ok() {
                reached += 1;
            }
        }
        reached
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }

    pub fn contains(&self, room: &str, session: SessionId) -> bool {
        self.rooms
            .get(room)
            .map(|m| m.contains_key(&session))
            .unwrap_or(false)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
