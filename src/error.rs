// src/error.rs
use std::io;
use thiserror::Error;

use crate::protocol::GameId;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid master server \"{0}\", expected \"<host> <port>\"")]
    InvalidMasterServer(String),
    #[error("invalid additional server \"{0}\", expected \"<host> <port>\"")]
    InvalidAdditionalServer(String),
    #[error("no games enabled")]
    NoGamesEnabled,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("unable to resolve {0}")]
    Resolve(String),
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error("reply exceeds {0} bytes")]
    TooLarge(usize),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Why a master server refresh produced no server list.
#[derive(Error, Debug)]
pub enum MasterError {
    #[error("master update failed: {0}")]
    Network(#[from] TransportError),
    #[error("master update failed: banned")]
    Banned,
    #[error("master update failed: empty reply")]
    Empty,
}

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0}: unable to set up host: {1}")]
    Setup(GameId, #[source] TransportError),
    #[error("socket wait failed: {0}")]
    Wait(#[source] TransportError),
    #[error(transparent)]
    Io(#[from] io::Error),
}
