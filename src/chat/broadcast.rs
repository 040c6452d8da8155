//! Fan-out helpers for chat events.

use crate::state::AppState;
use crate::ws::broadcast::{self, conversation_room, user_room};
use crate::ws::protocol::ServerEvent;
use crate::ws::SessionId;

/// Broadcast an event to everyone subscribed to a conversation.
pub fn to_conversation(state: &AppState, conversation_id: &str, event: &ServerEvent) -> usize {
    broadcast::to_room(&state.rooms, &conversation_room(conversation_id), event)
}

/// Broadcast to a conversation, skipping the originating session.
pub fn to_conversation_except(
    state: &AppState,
    conversation_id: &str,
    event: &ServerEvent,
    excluded: SessionId,
) -> usize {
    broadcast::to_room_except(&state.rooms, &conversation_room(conversation_id), event, excluded)
}

/// Send an event to every session of one user.
pub fn to_user(state: &AppState, user_id: &str, event: &ServerEvent) -> usize {
    broadcast::to_room(&state.rooms, &user_room(user_id), event)
}
