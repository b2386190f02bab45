// src/models/mod.rs
pub mod player;
pub mod server;

pub use player::{LocalInfo, Player, PlayerExt};
pub use server::{Server, ServerEnv, ServerSnapshot};
