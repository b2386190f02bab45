// src/host/master.rs
//! Fetching and interpreting master server lists.

use log::{debug, warn};
use serde::Serialize;
use std::net::SocketAddrV4;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::config::Endpoint;
use crate::error::MasterError;
use crate::protocol::GameId;
use crate::transport::{recv_tcp_data, resolve_host};

pub const MASTER_REQUEST: &[u8] = b"list\n";
pub const MASTER_REPLY_LIMIT: usize = 100 * 1024;
pub const MASTER_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MasterOutcome {
    Success,
    NetworkError,
    Banned,
    Empty,
}

impl From<&MasterError> for MasterOutcome {
    fn from(err: &MasterError) -> Self {
        match err {
            MasterError::Network(_) => MasterOutcome::NetworkError,
            MasterError::Banned => MasterOutcome::Banned,
            MasterError::Empty => MasterOutcome::Empty,
        }
    }
}

/// Counts produced by reconciling a server list against the roster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseCounts {
    /// Servers listed and accepted, new or already known.
    pub num_servers: usize,
    pub new_servers: usize,
    pub deleted_servers: usize,
}

/// Result of one finished refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MasterUpdateStatus {
    /// Manual request that triggered the refresh, if any.
    pub id: Option<u64>,
    pub outcome: MasterOutcome,
    #[serde(flatten)]
    pub counts: ParseCounts,
    pub started_at: u64,
}

impl MasterUpdateStatus {
    pub fn success(id: Option<u64>, counts: ParseCounts, started_at: u64) -> Self {
        Self {
            id,
            outcome: MasterOutcome::Success,
            counts,
            started_at,
        }
    }

    pub fn failed(id: Option<u64>, err: &MasterError, started_at: u64) -> Self {
        Self {
            id,
            outcome: err.into(),
            counts: ParseCounts::default(),
            started_at,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == MasterOutcome::Success
    }
}

/// Answer to a manual refresh request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualRefresh {
    Queued,
    AlreadyRunning,
    AlreadyQueued,
    Throttled,
}

/// Splits a raw master reply into its outcome.
pub fn classify_reply(data: &[u8]) -> Result<String, MasterError> {
    if data == b"banned" {
        return Err(MasterError::Banned);
    }
    if data.is_empty() {
        return Err(MasterError::Empty);
    }
    Ok(String::from_utf8_lossy(data).into_owned())
}

pub async fn fetch_server_list(master: &Endpoint, timeout: Duration) -> Result<String, MasterError> {
    let data = recv_tcp_data(
        &master.host,
        master.port,
        MASTER_REQUEST,
        MASTER_REPLY_LIMIT,
        timeout,
    )
    .await?;
    classify_reply(&data)
}

/// Extracts every well formed `addserver <host> <port>` line.
pub fn parse_server_list(body: &str) -> Vec<Endpoint> {
    body.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            if parts.next()? != "addserver" {
                return None;
            }
            let host = parts.next()?;
            let port = parts.next()?.parse::<u16>().ok()?;
            Some(Endpoint {
                host: host.to_string(),
                port,
            })
        })
        .collect()
}

/// Resolves listed servers, dropping the ones that do not resolve.
pub async fn resolve_servers(entries: Vec<Endpoint>) -> Vec<(String, SocketAddrV4)> {
    let mut resolved = Vec::with_capacity(entries.len());
    for entry in entries {
        match resolve_host(&entry.host, entry.port).await {
            Ok(addr) => resolved.push((entry.host, addr)),
            Err(e) => debug!("skipping {} {}: {}", entry.host, entry.port, e),
        }
    }
    resolved
}

pub fn cache_path(dir: &Path, game: GameId) -> PathBuf {
    dir.join(format!("{}.servers", game.name()))
}

/// Reads a cached reply and its age in milliseconds.
pub async fn read_cache(path: &Path) -> Option<(String, u64)> {
    let body = tokio::fs::read(path).await.ok()?;
    let age_ms = tokio::fs::metadata(path)
        .await
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map(|age| age.as_millis() as u64)
        .unwrap_or(0);
    Some((String::from_utf8_lossy(&body).into_owned(), age_ms))
}

pub async fn write_cache(path: &Path, body: &str) {
    if let Err(e) = tokio::fs::write(path, body).await {
        warn!("unable to write {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    #[test]
    fn test_classify_reply() {
        assert!(matches!(classify_reply(b"banned"), Err(MasterError::Banned)));
        assert!(matches!(classify_reply(b""), Err(MasterError::Empty)));
        assert_eq!(
            classify_reply(b"addserver 1.2.3.4 28785\n").unwrap(),
            "addserver 1.2.3.4 28785\n"
        );
    }

    #[test]
    fn test_outcome_from_error() {
        let network = MasterError::Network(TransportError::Timeout(20_000));
        assert_eq!(MasterOutcome::from(&network), MasterOutcome::NetworkError);
        assert_eq!(MasterOutcome::from(&MasterError::Banned), MasterOutcome::Banned);
        assert_eq!(MasterOutcome::from(&MasterError::Empty), MasterOutcome::Empty);
    }

    #[test]
    fn test_parse_server_list() {
        let body = "addserver 1.2.3.4 28785\n\
                    addserver example.org 42000\r\n\
                    addserver 5.6.7.8 70000\n\
                    addserver 5.6.7.8\n\
                    clearservers\n\
                    addserver 9.9.9.9 1 extra\n";
        let servers = parse_server_list(body);
        assert_eq!(
            servers,
            vec![
                Endpoint {
                    host: "1.2.3.4".into(),
                    port: 28785
                },
                Endpoint {
                    host: "example.org".into(),
                    port: 42000
                },
                Endpoint {
                    host: "9.9.9.9".into(),
                    port: 1
                },
            ]
        );
    }

    #[test]
    fn test_status_serializes_flat() {
        let counts = ParseCounts {
            num_servers: 3,
            new_servers: 2,
            deleted_servers: 1,
        };
        let status = MasterUpdateStatus::success(Some(7), counts, 42);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["outcome"], "success");
        assert_eq!(json["num_servers"], 3);
        assert_eq!(json["deleted_servers"], 1);
        assert_eq!(json["id"], 7);
    }

    #[tokio::test]
    async fn test_cache_round_trip() {
        let dir = std::env::temp_dir().join(format!("cubemon-cache-{}", rand::random::<u32>()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = cache_path(&dir, GameId::Tesseract);
        assert!(path.ends_with("tesseract.servers"));

        assert!(read_cache(&path).await.is_none());
        write_cache(&path, "addserver 1.2.3.4 42000\n").await;
        let (body, age) = read_cache(&path).await.unwrap();
        assert_eq!(body, "addserver 1.2.3.4 42000\n");
        assert!(age < 60_000);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
