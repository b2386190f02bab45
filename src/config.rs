// src/config.rs
use governor::Quota;
use log::error;
use std::env;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::protocol::GameId;

const SECOND: u64 = 1_000;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Parses `"<host> <port>"`.
    pub fn parse(spec: &str) -> Option<Self> {
        let mut parts = spec.split_whitespace();
        let host = parts.next()?;
        let port = parts.next()?.parse().ok()?;
        Some(Self {
            host: host.to_string(),
            port,
        })
    }
}

#[derive(Debug, Clone)]
pub struct GameConfig {
    pub game: GameId,
    pub master_server: Option<Endpoint>,
    pub additional_servers: Vec<Endpoint>,
}

#[derive(Debug, Clone)]
pub struct Config {
    // Probing
    pub max_pings_per_second: u32,
    pub server_ping_interval_ms: u64,
    pub ext_player_ping_interval_ms: u64,
    pub ext_uptime_ping_interval_ms: u64,
    pub tick_wait_ms: u64,

    // Master server
    pub master_update_interval_ms: u64,
    pub master_update_retry_interval_ms: u64,
    pub master_update_request_limit_ms: u64,

    pub games: Vec<GameConfig>,
    pub cache_dir: PathBuf,
    pub status_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_pings_per_second: 80,
            server_ping_interval_ms: 5 * SECOND,
            ext_player_ping_interval_ms: 5 * SECOND,
            ext_uptime_ping_interval_ms: 2 * MINUTE,
            tick_wait_ms: 5,
            master_update_interval_ms: HOUR,
            master_update_retry_interval_ms: HOUR,
            master_update_request_limit_ms: 15 * MINUTE,
            games: Vec::new(),
            cache_dir: env::temp_dir(),
            status_file: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bounded = |key: &str, min: u64, max: u64, default: u64| -> u64 {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
                .clamp(min, max)
        };

        let defaults = Config::default();

        let game_names = lookup("EXTINFO_GAMES").unwrap_or_default();
        let mut listed = Vec::new();
        for name in game_names.split(',') {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            match GameId::from_name(&name.to_ascii_lowercase()) {
                Some(game) => listed.push(game),
                None => error!("unknown game '{}' in EXTINFO_GAMES", name),
            }
        }

        let mut games = Vec::new();
        for game in GameId::all() {
            let prefix = format!("EXTINFO_{}", game.name().to_ascii_uppercase());
            let enabled = lookup(&format!("{}_ENABLED", prefix))
                .map(|v| parse_bool(&v))
                .unwrap_or_else(|| listed.contains(&game));
            if !enabled {
                continue;
            }

            match game_config(game, &prefix, &lookup) {
                Ok(config) => games.push(config),
                Err(e) => error!("{}: {}, game disabled", game, e),
            }
        }

        if games.is_empty() {
            return Err(ConfigError::NoGamesEnabled);
        }

        Ok(Self {
            max_pings_per_second: bounded("EXTINFO_MAX_PINGS_PER_SECOND", 0, 100_000, 80) as u32,
            server_ping_interval_ms: bounded(
                "EXTINFO_SERVER_PING_INTERVAL_MS",
                SECOND,
                30 * SECOND,
                defaults.server_ping_interval_ms,
            ),
            ext_player_ping_interval_ms: bounded(
                "EXTINFO_SERVER_EXT_PLAYER_PING_INTERVAL_MS",
                SECOND,
                30 * SECOND,
                defaults.ext_player_ping_interval_ms,
            ),
            ext_uptime_ping_interval_ms: bounded(
                "EXTINFO_SERVER_EXT_UPTIME_PING_INTERVAL_MS",
                5 * SECOND,
                HOUR,
                defaults.ext_uptime_ping_interval_ms,
            ),
            tick_wait_ms: bounded("EXTINFO_TICK_WAIT_MS", 1, 1_000, defaults.tick_wait_ms),
            master_update_interval_ms: bounded(
                "EXTINFO_MASTER_UPDATE_INTERVAL_MS",
                5 * MINUTE,
                DAY,
                defaults.master_update_interval_ms,
            ),
            master_update_retry_interval_ms: bounded(
                "EXTINFO_MASTER_UPDATE_RETRY_INTERVAL_MS",
                5 * MINUTE,
                DAY,
                defaults.master_update_retry_interval_ms,
            ),
            master_update_request_limit_ms: bounded(
                "EXTINFO_MASTER_UPDATE_REQUEST_LIMIT_MS",
                5 * MINUTE,
                12 * HOUR,
                defaults.master_update_request_limit_ms,
            ),
            games,
            cache_dir: lookup("EXTINFO_CACHE_DIR")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            status_file: lookup("EXTINFO_STATUS_FILE")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        })
    }

    /// Manual master refreshes allowed per host.
    pub fn manual_refresh_quota(&self) -> Quota {
        Quota::with_period(Duration::from_millis(self.master_update_request_limit_ms))
            .unwrap_or_else(|| Quota::per_minute(NonZeroU32::MIN))
    }
}

fn game_config<F>(game: GameId, prefix: &str, lookup: &F) -> Result<GameConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let master_server = match lookup(&format!("{}_MASTER_SERVER", prefix)) {
        Some(spec) if !spec.trim().is_empty() => Some(
            Endpoint::parse(&spec).ok_or(ConfigError::InvalidMasterServer(spec))?,
        ),
        _ => None,
    };

    let mut additional_servers = Vec::new();
    if let Some(list) = lookup(&format!("{}_ADDITIONAL_SERVERS", prefix)) {
        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let endpoint = Endpoint::parse(entry)
                .ok_or_else(|| ConfigError::InvalidAdditionalServer(entry.to_string()))?;
            additional_servers.push(endpoint);
        }
    }

    Ok(GameConfig {
        game,
        master_server,
        additional_servers,
    })
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_no_games_enabled() {
        assert!(matches!(config_from(&[]), Err(ConfigError::NoGamesEnabled)));
    }

    #[test]
    fn test_defaults_and_clamping() {
        let config = config_from(&[
            ("EXTINFO_SAUERBRATEN_ENABLED", "true"),
            ("EXTINFO_SERVER_PING_INTERVAL_MS", "10"),
            ("EXTINFO_MAX_PINGS_PER_SECOND", "not a number"),
            ("EXTINFO_MASTER_UPDATE_INTERVAL_MS", "999999999999"),
        ])
        .unwrap();

        assert_eq!(config.games.len(), 1);
        assert_eq!(config.games[0].game, GameId::Sauerbraten);
        assert_eq!(config.server_ping_interval_ms, SECOND);
        assert_eq!(config.max_pings_per_second, 80);
        assert_eq!(config.master_update_interval_ms, DAY);
        assert_eq!(config.ext_uptime_ping_interval_ms, 2 * MINUTE);
    }

    #[test]
    fn test_game_servers_parsed() {
        let config = config_from(&[
            ("EXTINFO_TESSERACT_ENABLED", "1"),
            ("EXTINFO_TESSERACT_MASTER_SERVER", "master.example.org 41999"),
            (
                "EXTINFO_TESSERACT_ADDITIONAL_SERVERS",
                "1.2.3.4 42000, example.net 42001",
            ),
        ])
        .unwrap();

        let game = &config.games[0];
        assert_eq!(
            game.master_server,
            Some(Endpoint {
                host: "master.example.org".into(),
                port: 41999
            })
        );
        assert_eq!(game.additional_servers.len(), 2);
        assert_eq!(game.additional_servers[1].port, 42001);
    }

    #[test]
    fn test_games_enabled_by_name_list() {
        let config = config_from(&[
            ("EXTINFO_GAMES", "Tesseract, quake,sauerbraten"),
            ("EXTINFO_SAUERBRATEN_ENABLED", "false"),
        ])
        .unwrap();
        let games: Vec<_> = config.games.iter().map(|g| g.game).collect();
        assert_eq!(games, vec![GameId::Tesseract]);
    }

    #[test]
    fn test_invalid_game_is_disabled_others_continue() {
        let config = config_from(&[
            ("EXTINFO_SAUERBRATEN_ENABLED", "true"),
            ("EXTINFO_SAUERBRATEN_MASTER_SERVER", "nohostport"),
            ("EXTINFO_ASSAULTCUBE_ENABLED", "yes"),
        ])
        .unwrap();
        assert_eq!(config.games.len(), 1);
        assert_eq!(config.games[0].game, GameId::AssaultCube);

        let err = config_from(&[
            ("EXTINFO_REDECLIPSE_ENABLED", "on"),
            ("EXTINFO_REDECLIPSE_ADDITIONAL_SERVERS", "host 70000"),
        ]);
        assert!(matches!(err, Err(ConfigError::NoGamesEnabled)));
    }
}
