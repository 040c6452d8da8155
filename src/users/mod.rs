//! User-facing profile operations over both the WebSocket and REST surfaces.

pub mod contacts;
pub mod profile;
