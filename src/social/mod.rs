//! Presence and messaging over the chat stream.
//!
//! Requires the `social` feature.

pub mod client;
mod handshake;
pub mod types;

pub use client::{Client, ConnectionState, ListenerId};
pub use types::{Decoded, Decoder, PresenceDetails, PresenceUpdate, ServerDetails, SocialEvent, Tag};
