//! Conversation management over REST.

pub mod crud;
pub mod members;
