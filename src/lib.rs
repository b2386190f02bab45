// src/lib.rs
pub mod config;
pub mod context;
pub mod error;
pub mod geoip;
pub mod host;
pub mod models;
pub mod monitor;
pub mod protocol;
pub mod scheduler;
pub mod search;
pub mod transport;

pub use config::Config;
pub use host::{Host, HostSnapshot};
pub use monitor::Monitor;
