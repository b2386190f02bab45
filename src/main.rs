// src/main.rs
use cubemon::context::SystemClock;
use cubemon::geoip::NoGeoIp;
use cubemon::{Config, Monitor};
use env_logger::Env;
use log::{error, info};
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let monitor = match Monitor::new(config, Arc::new(SystemClock::new()), Arc::new(NoGeoIp)).await {
        Ok(monitor) => monitor,
        Err(e) => {
            error!("Failed to start: {}", e);
            process::exit(1);
        }
    };

    info!("Monitoring {} games", monitor.hosts().len());
    if let Err(e) = monitor.run().await {
        error!("{}", e);
        process::exit(1);
    }
}
