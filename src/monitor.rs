// src/monitor.rs
//! Drives every enabled host from a single loop.

use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::context::{Clock, Context};
use crate::error::MonitorError;
use crate::geoip::CountryResolver;
use crate::host::{Host, HostSettings, HostSnapshot};
use crate::protocol::GameId;
use crate::transport::SocketSet;

const STATUS_INTERVAL_MS: u64 = 5_000;
const SHUTDOWN_WAIT: Duration = Duration::from_secs(25);

pub struct Monitor {
    config: Config,
    context: Arc<Context>,
    hosts: Vec<Arc<Host>>,
}

impl Monitor {
    /// Sets up a host per enabled game, seeded from its cache and the
    /// configured servers.
    pub async fn new(
        config: Config,
        clock: Arc<dyn Clock>,
        countries: Arc<dyn CountryResolver>,
    ) -> Result<Self, MonitorError> {
        let context = Arc::new(Context::from_config(&config, clock));
        let mut hosts = Vec::with_capacity(config.games.len());

        for game_config in &config.games {
            let settings = HostSettings::new(&config, game_config.master_server.clone());
            let host = Host::new(
                game_config.game,
                settings,
                Arc::clone(&context),
                Arc::clone(&countries),
            )
            .await
            .map_err(|e| MonitorError::Setup(game_config.game, e))?;

            host.load_cache().await;
            host.add_configured_servers(&game_config.additional_servers)
                .await;

            let master = host.master_server();
            info!(
                "{}: monitoring {} servers, master {}:{}",
                game_config.game,
                host.read().servers().len(),
                master.host,
                master.port
            );
            hosts.push(host);
        }

        Ok(Self {
            config,
            context,
            hosts,
        })
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn hosts(&self) -> &[Arc<Host>] {
        &self.hosts
    }

    pub fn host(&self, game: GameId) -> Option<&Arc<Host>> {
        self.hosts.iter().find(|h| h.game() == game)
    }

    /// Runs every host once, then waits for replies and handles them.
    /// Returns the number of datagrams handled.
    pub async fn tick(&self) -> Result<usize, MonitorError> {
        self.context.limiter().begin_tick(self.context.now_ms());

        for host in &self.hosts {
            host.process();
        }

        let mut set = SocketSet::new();
        for (index, host) in self.hosts.iter().enumerate() {
            set.add(host.socket(), index);
        }

        let mut readable = Vec::new();
        set.wait(
            Duration::from_millis(self.config.tick_wait_ms),
            |&index| readable.push(index),
            None,
        )
        .await
        .map_err(MonitorError::Wait)?;

        Ok(readable
            .into_iter()
            .map(|index| self.hosts[index].drain_replies())
            .sum())
    }

    pub fn snapshot(&self) -> Vec<HostSnapshot> {
        self.hosts.iter().map(|h| h.snapshot()).collect()
    }

    async fn write_status(&self, path: &Path) {
        let body = match serde_json::to_vec_pretty(&self.snapshot()) {
            Ok(body) => body,
            Err(e) => {
                warn!("unable to serialize status: {}", e);
                return;
            }
        };
        if let Err(e) = tokio::fs::write(path, body).await {
            warn!("unable to write {}: {}", path.display(), e);
        }
    }

    /// Ticks until Ctrl+C, then waits for running master refreshes.
    pub async fn run(&self) -> Result<(), MonitorError> {
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        let mut last_status_write: Option<u64> = None;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutting down");
                    break;
                }
                result = self.tick() => {
                    result?;
                }
            }

            if let Some(path) = &self.config.status_file {
                let now = self.context.now_ms();
                let due = last_status_write
                    .map_or(true, |last| now.saturating_sub(last) >= STATUS_INTERVAL_MS);
                if due {
                    self.write_status(path).await;
                    last_status_write = Some(now);
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    pub async fn shutdown(&self) {
        for host in &self.hosts {
            host.shutdown(SHUTDOWN_WAIT).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Endpoint, GameConfig};
    use crate::context::ManualClock;
    use crate::geoip::NoGeoIp;

    fn config() -> Config {
        Config {
            games: vec![
                GameConfig {
                    game: GameId::Sauerbraten,
                    master_server: Some(Endpoint {
                        host: "127.0.0.1".into(),
                        port: 1,
                    }),
                    additional_servers: vec![Endpoint {
                        host: "127.0.0.1".into(),
                        port: 28785,
                    }],
                },
                GameConfig {
                    game: GameId::Tesseract,
                    master_server: None,
                    additional_servers: Vec::new(),
                },
            ],
            cache_dir: std::env::temp_dir().join(format!("cubemon-monitor-{}", rand::random::<u32>())),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_hosts_are_set_up_from_config() {
        let monitor = Monitor::new(config(), Arc::new(ManualClock::new(0)), Arc::new(NoGeoIp))
            .await
            .unwrap();

        assert_eq!(monitor.hosts().len(), 2);
        let sauer = monitor.host(GameId::Sauerbraten).unwrap();
        assert_eq!(sauer.master_server().port, 1);
        let state = sauer.read();
        assert_eq!(state.servers().len(), 1);
        assert!(state.servers()[0].persist);
        drop(state);

        let tesseract = monitor.host(GameId::Tesseract).unwrap();
        assert_eq!(tesseract.master_server().host, "master.tesseract.gg");
        assert!(monitor.host(GameId::RedEclipse).is_none());

        let json = serde_json::to_value(monitor.snapshot()).unwrap();
        assert_eq!(json[1]["game"], "tesseract");
    }
}
