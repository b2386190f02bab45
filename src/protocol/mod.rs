// src/protocol/mod.rs
pub mod game;
pub mod packet;
pub mod reply;
pub mod text;

pub use game::{GameId, ServerMod};
pub use packet::PacketBuf;
