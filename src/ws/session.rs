//! Per-connection session state.
//!
//! A session is created once the handshake has produced an identity, becomes
//! Active immediately, and is torn down exactly once when the connection ends.

use serde_json::Value;
use std::collections::HashSet;

use super::broadcast::{self, user_room};
use super::protocol::{ack_message, ServerEvent};
use super::{ConnectionSender, SessionId};
use crate::auth::Identity;
use crate::error::Result;
use crate::state::AppState;

/// The connecting phase is the handshake in `handler`; no session exists
/// until it has produced an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Authenticated,
    Active,
    Closed,
}

pub struct Session {
    pub id: SessionId,
    pub identity: Identity,
    state: SessionState,
    rooms: HashSet<String>,
    tx: ConnectionSender,
    pub app: AppState,
}

impl Session {
    /// Build a session for an identity the handshake has already verified.
    pub fn new(app: AppState, identity: Identity, tx: ConnectionSender) -> Self {
        Self {
            id: uuid::Uuid::now_v7(),
            identity,
            state: SessionState::Authenticated,
            rooms: HashSet::new(),
            tx,
            app,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn user_id(&self) -> &str {
        &self.identity.id
    }

    pub fn joined_rooms(&self) -> &HashSet<String> {
        &self.rooms
    }

    /// Authenticated -> Active: register the connection, count presence, join
    /// the personal room and announce the user.
    pub fn activate(&mut self) {
        if self.state != SessionState::Authenticated {
            return;
        }

        self.app.connections.insert(self.id, self.tx.clone());
        let count = self.app.presence.mark_connected(&self.identity.id);
        self.join_room(&user_room(&self.identity.id));
        self.state = SessionState::Active;

        self.send(&ServerEvent::Registered {
            user_id: self.identity.id.clone(),
            name: self.identity.name.clone(),
        });
        if count == 1 {
            broadcast::to_all_except(
                &self.app.connections,
                &ServerEvent::UserOnline {
                    user_id: self.identity.id.clone(),
                    name: self.identity.name.clone(),
                },
                self.id,
            );
        }

        tracing::info!(
            user_id = %self.identity.id,
            session_id = %self.id,
            connections = count,
            "Session active"
        );
    }

    pub fn join_room(&mut self, room: &str) {
        self.app.rooms.join(room, self.id, self.tx.clone());
        self.rooms.insert(room.to_string());
    }

    pub fn leave_room(&mut self, room: &str) {
        self.app.rooms.leave(room, self.id);
        self.rooms.remove(room);
    }

    /// Push an event to this session only.
    pub fn send(&self, event: &ServerEvent) {
        if let Some(msg) = event.to_message() {
            let _ = self.tx.send(msg);
        }
    }

    /// Reply to an inbound frame's ack id.
    pub fn reply(&self, ack: u64, result: &Result<Value>) {
        let _ = self.tx.send(ack_message(ack, result));
    }

    /// Active -> Closed. Drops every room membership, decrements presence and
    /// announces the user offline once their last session is gone.
    /// Runs at most once.
    pub fn teardown(&mut self, reason: &str) {
        if self.state == SessionState::Closed {
            return;
        }
        let was_active = self.state == SessionState::Active;
        self.state = SessionState::Closed;

        self.app.rooms.leave_all(self.id, &self.rooms);
        self.rooms.clear();
        self.app.connections.remove(&self.id);

        if !was_active {
            return;
        }

        let remaining = self.app.presence.mark_disconnected(&self.identity.id);
        if remaining == 0 {
            broadcast::to_all_except(
                &self.app.connections,
                &ServerEvent::UserOffline {
                    user_id: self.identity.id.clone(),
                    name: self.identity.name.clone(),
                    reason: reason.to_string(),
                },
                self.id,
            );
        }

        tracing::info!(
            user_id = %self.identity.id,
            session_id = %self.id,
            remaining_connections = remaining,
            reason = %reason,
            "Session closed"
        );
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown("dropped");
    }
}
