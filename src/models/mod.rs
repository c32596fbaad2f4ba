//! Wire data model: session events and method payloads.

pub mod events;
pub mod protocol;
