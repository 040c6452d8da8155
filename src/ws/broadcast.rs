use super::protocol::ServerEvent;
use super::rooms::RoomRegistry;
use super::{ConnectionRegistry, SessionId};

/// Room key for a user's personal room.
pub fn user_room(user_id: &str) -> String {
    format!("user:{}", user_id)
}

/// Room key for a conversation's fan-out room.
pub fn conversation_room(conversation_id: &str) -> String {
    format!("conversation:{}", conversation_id)
}

/// Broadcast an event to every session in a room.
pub fn to_room(rooms: &RoomRegistry, room: &str, event: &ServerEvent) -> usize {
    match event.to_message() {
        Some(msg) => rooms.broadcast(room, &msg),
        None => 0,
    }
}

/// Broadcast an event to every session in a room except `excluded`.
pub fn to_room_except(rooms: &RoomRegistry, room: &str, event: &ServerEvent, excluded: SessionId) -> usize {
    match event.to_message() {
        Some(msg) => rooms.broadcast_except(room, &msg, excluded),
        None => 0,
    }
}

/// Broadcast an event to every connected session except `excluded`.
pub fn to_all_except(registry: &ConnectionRegistry, event: &ServerEvent, excluded: SessionId) {
    let Some(msg) = event.to_message() else {
        return;
    };
    for entry in registry.iter() {
        if *entry.key() == excluded {
            continue;
        }
        let _ = entry.value().send(msg.clone());
    }
}
