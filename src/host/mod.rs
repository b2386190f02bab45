// src/host/mod.rs
//! One game's server roster, its probes and its master server refreshes.

pub mod events;
pub mod master;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::{debug, error, info, warn};
use parking_lot::{RwLock, RwLockReadGuard};
use serde::Serialize;
use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::{Config, Endpoint};
use crate::context::Context;
use crate::error::TransportError;
use crate::geoip::CountryResolver;
use crate::models::{Player, Server, ServerEnv, ServerSnapshot};
use crate::protocol::game::MAX_SERVERS;
use crate::protocol::reply::{read_reply, Reply};
use crate::protocol::GameId;
use crate::scheduler;
use crate::search::{self, FindPlayer};
use crate::transport::{self, MAX_DATAGRAM};

use self::events::{Event, EventBus, Subscriber, SubscriberId};
use self::master::{ManualRefresh, MasterOutcome, MasterUpdateStatus, ParseCounts};

#[derive(Debug, Clone)]
pub struct HostSettings {
    pub master_update_interval_ms: u64,
    pub master_update_retry_interval_ms: u64,
    pub master_timeout: Duration,
    pub manual_refresh_quota: Quota,
    pub cache_dir: PathBuf,
    /// Replaces the game's default master server.
    pub master_server: Option<Endpoint>,
}

impl HostSettings {
    pub fn new(config: &Config, master_server: Option<Endpoint>) -> Self {
        Self {
            master_update_interval_ms: config.master_update_interval_ms,
            master_update_retry_interval_ms: config.master_update_retry_interval_ms,
            master_timeout: master::MASTER_TIMEOUT,
            manual_refresh_quota: config.manual_refresh_quota(),
            cache_dir: config.cache_dir.clone(),
            master_server,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddServer {
    Added,
    /// Already known; its deletion mark was cleared.
    Reconfirmed,
    Full,
}

struct RefreshTask {
    id: Option<u64>,
    done: oneshot::Receiver<MasterUpdateStatus>,
    task: JoinHandle<()>,
}

fn query_addr(game: GameId, addr: SocketAddrV4) -> SocketAddrV4 {
    SocketAddrV4::new(
        *addr.ip(),
        addr.port().wrapping_add(game.info().info_port_offset),
    )
}

/// Lock protected part of a host.
#[derive(Default)]
pub struct HostState {
    servers: Vec<Server>,
    master_override: Option<Endpoint>,
    queue: VecDeque<u64>,
    last_master_update: Option<u64>,
    last_successful_master_update: Option<u64>,
    last_status: Option<MasterUpdateStatus>,
    running: Option<RefreshTask>,
}

impl HostState {
    /// Servers in the order they were added.
    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    /// Looks up a server by its game address, or by its query address when
    /// `query_port` is set.
    pub fn find_server(&self, game: GameId, addr: SocketAddrV4, query_port: bool) -> Option<&Server> {
        let addr = if query_port { addr } else { query_addr(game, addr) };
        self.servers.iter().find(|s| s.addr == addr)
    }

    pub fn last_master_update(&self) -> Option<u64> {
        self.last_master_update
    }

    pub fn last_successful_master_update(&self) -> Option<u64> {
        self.last_successful_master_update
    }

    pub fn last_status(&self) -> Option<&MasterUpdateStatus> {
        self.last_status.as_ref()
    }

    pub fn is_master_update_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn pending_requests(&self) -> impl Iterator<Item = u64> + '_ {
        self.queue.iter().copied()
    }

    /// Players on servers with valid info.
    pub fn player_count(&self) -> usize {
        self.servers.iter().map(Server::player_count).sum()
    }

    fn should_update_from_master(&self, now: u64, settings: &HostSettings) -> bool {
        if self.running.is_some() {
            return false;
        }
        if !self.queue.is_empty() {
            return true;
        }
        let Some(last) = self.last_master_update else {
            return true;
        };
        let elapsed = now.saturating_sub(last);
        elapsed >= settings.master_update_interval_ms
            || (self.last_successful_master_update != Some(last)
                && elapsed >= settings.master_update_retry_interval_ms)
    }

    fn add_server(
        &mut self,
        game: GameId,
        host: &str,
        addr: SocketAddrV4,
        persist: bool,
        env: &ServerEnv<'_>,
    ) -> AddServer {
        let query = query_addr(game, addr);

        if let Some(server) = self.servers.iter_mut().find(|s| s.addr == query) {
            server.marked_for_deletion = false;
            server.host = host.to_string();
            if persist {
                server.persist = true;
            }
            return AddServer::Reconfirmed;
        }

        if self.servers.len() >= MAX_SERVERS {
            return AddServer::Full;
        }

        let mut server = Server::new(game, host, query, persist);
        server.country = env.countries.by_ip(*addr.ip());
        env.events.publish(Event::ServerAdded(&server));
        self.servers.push(server);
        AddServer::Added
    }

    fn delete_server(&mut self, index: usize, env: &ServerEnv<'_>) {
        let mut server = self.servers.remove(index);
        server.delete_all_players(env);
        env.events.publish(Event::ServerRemoved(&server));
    }

    fn mark_non_persistent_for_deletion(&mut self) {
        for server in self.servers.iter_mut().filter(|s| !s.persist) {
            server.marked_for_deletion = true;
        }
    }

    fn delete_orphaned(&mut self, env: &ServerEnv<'_>) -> usize {
        let mut deleted = 0;
        for i in (0..self.servers.len()).rev() {
            if self.servers[i].marked_for_deletion {
                self.delete_server(i, env);
                deleted += 1;
            }
        }
        deleted
    }

    /// Reconciles the roster against a server list: listed servers are added
    /// or reconfirmed, unlisted non-persistent ones are removed.
    fn merge_server_list(
        &mut self,
        game: GameId,
        servers: &[(String, SocketAddrV4)],
        env: &ServerEnv<'_>,
    ) -> ParseCounts {
        self.mark_non_persistent_for_deletion();

        let mut counts = ParseCounts::default();
        for (host, addr) in servers {
            match self.add_server(game, host, *addr, false, env) {
                AddServer::Added => {
                    counts.num_servers += 1;
                    counts.new_servers += 1;
                }
                AddServer::Reconfirmed => counts.num_servers += 1,
                AddServer::Full => {}
            }
        }

        counts.deleted_servers = self.delete_orphaned(env);
        counts
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HostSnapshot {
    pub game: GameId,
    pub description: &'static str,
    pub player_count: usize,
    pub master_update_running: bool,
    pub last_master_update: Option<u64>,
    pub last_successful_master_update: Option<u64>,
    pub last_master_status: Option<MasterUpdateStatus>,
    pub servers: Vec<ServerSnapshot>,
}

pub struct Host {
    game: GameId,
    state: RwLock<HostState>,
    events: EventBus,
    socket: UdpSocket,
    context: Arc<Context>,
    countries: Arc<dyn CountryResolver>,
    settings: HostSettings,
    manual_refresh: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl Host {
    pub async fn new(
        game: GameId,
        settings: HostSettings,
        context: Arc<Context>,
        countries: Arc<dyn CountryResolver>,
    ) -> Result<Arc<Self>, TransportError> {
        let socket = transport::bind_udp(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).await?;
        let state = HostState {
            master_override: settings.master_server.clone(),
            ..Default::default()
        };

        Ok(Arc::new(Self {
            game,
            state: RwLock::new(state),
            events: EventBus::new(game),
            socket,
            context,
            countries,
            manual_refresh: RateLimiter::direct(settings.manual_refresh_quota),
            settings,
        }))
    }

    pub fn game(&self) -> GameId {
        self.game
    }

    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }

    /// Read access to the roster. Do not hold the guard across an await.
    pub fn read(&self) -> RwLockReadGuard<'_, HostState> {
        self.state.read()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        self.events.subscribe(subscriber)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.events.unsubscribe(id)
    }

    fn env(&self, now: u64) -> ServerEnv<'_> {
        ServerEnv {
            now,
            context: &self.context,
            countries: &*self.countries,
            events: &self.events,
        }
    }

    fn default_master(&self) -> Endpoint {
        let info = self.game.info();
        Endpoint {
            host: info.master_host.to_string(),
            port: info.master_port,
        }
    }

    /// Master server used by the next refresh.
    pub fn master_server(&self) -> Endpoint {
        self.state
            .read()
            .master_override
            .clone()
            .unwrap_or_else(|| self.default_master())
    }

    pub fn set_master_server(&self, master: Option<Endpoint>) {
        self.state.write().master_override = master;
    }

    // Roster

    pub async fn add_server(
        &self,
        host: &str,
        port: u16,
        persist: bool,
    ) -> Result<AddServer, TransportError> {
        let addr = transport::resolve_host(host, port).await?;
        let now = self.context.now_ms();
        let mut state = self.state.write();
        Ok(state.add_server(self.game, host, addr, persist, &self.env(now)))
    }

    /// Adds configured servers as persistent.
    pub async fn add_configured_servers(&self, servers: &[Endpoint]) {
        for server in servers {
            match self.add_server(&server.host, server.port, true).await {
                Ok(AddServer::Full) => {
                    warn!("{}: server list full, ignoring {} {}", self.game, server.host, server.port)
                }
                Ok(_) => {}
                Err(e) => error!("{}: {} {}: {}", self.game, server.host, server.port, e),
            }
        }
    }

    /// Removes the server listening on game address `addr`.
    pub fn delete_server(&self, addr: SocketAddrV4) -> bool {
        let query = query_addr(self.game, addr);
        let now = self.context.now_ms();
        let mut state = self.state.write();
        match state.servers.iter().position(|s| s.addr == query) {
            Some(index) => {
                state.delete_server(index, &self.env(now));
                true
            }
            None => false,
        }
    }

    /// Seeds the roster from the cached master reply. The cache age stands in
    /// for the time of the last refresh.
    pub async fn load_cache(&self) -> Option<ParseCounts> {
        let path = master::cache_path(&self.settings.cache_dir, self.game);
        let (body, age_ms) = master::read_cache(&path).await?;
        let servers = master::resolve_servers(master::parse_server_list(&body)).await;

        let now = self.context.now_ms();
        let mut state = self.state.write();
        let counts = state.merge_server_list(self.game, &servers, &self.env(now));
        let seeded = now.saturating_sub(age_ms);
        state.last_master_update = Some(seeded);
        state.last_successful_master_update = Some(seeded);

        info!(
            "{}: loaded {} servers from {}",
            self.game,
            counts.num_servers,
            path.display()
        );
        Some(counts)
    }

    // Master server refresh

    /// Queues a manual refresh identified by `id`.
    pub fn request_master_update(&self, id: u64) -> ManualRefresh {
        let mut state = self.state.write();
        if state.running.as_ref().map_or(false, |r| r.id == Some(id)) {
            return ManualRefresh::AlreadyRunning;
        }
        if state.queue.contains(&id) {
            return ManualRefresh::AlreadyQueued;
        }
        if self.manual_refresh.check().is_err() {
            return ManualRefresh::Throttled;
        }
        state.queue.push_back(id);
        ManualRefresh::Queued
    }

    pub fn should_update_from_master(&self) -> bool {
        self.state
            .read()
            .should_update_from_master(self.context.now_ms(), &self.settings)
    }

    /// Starts a refresh in the background if one is due.
    pub fn start_master_update(self: &Arc<Self>) -> bool {
        let now = self.context.now_ms();
        let mut state = self.state.write();
        if !state.should_update_from_master(now, &self.settings) {
            return false;
        }

        let id = state.queue.pop_front();
        let master = state
            .master_override
            .clone()
            .unwrap_or_else(|| self.default_master());
        state.last_master_update = Some(now);

        info!("{}: updating from master", self.game);

        let (tx, done) = oneshot::channel();
        let host = Arc::clone(self);
        let task = tokio::spawn(async move {
            let status = host.run_master_update(id, master, now).await;
            let _ = tx.send(status);
        });

        state.running = Some(RefreshTask { id, done, task });
        true
    }

    async fn run_master_update(
        &self,
        id: Option<u64>,
        master: Endpoint,
        started_at: u64,
    ) -> MasterUpdateStatus {
        let body = match master::fetch_server_list(&master, self.settings.master_timeout).await {
            Ok(body) => body,
            Err(e) => {
                debug!("{}: {} {}: {}", self.game, master.host, master.port, e);
                return MasterUpdateStatus::failed(id, &e, started_at);
            }
        };

        let servers = master::resolve_servers(master::parse_server_list(&body)).await;
        let counts = {
            let mut state = self.state.write();
            let counts =
                state.merge_server_list(self.game, &servers, &self.env(self.context.now_ms()));
            state.last_successful_master_update = Some(started_at);
            counts
        };

        if counts.num_servers > 0 {
            let path = master::cache_path(&self.settings.cache_dir, self.game);
            master::write_cache(&path, &body).await;
        }

        MasterUpdateStatus::success(id, counts, started_at)
    }

    /// Collects a finished refresh without waiting for a running one.
    pub fn poll_master_update(&self) -> Option<MasterUpdateStatus> {
        let mut state = self.state.write();
        let result = state.running.as_mut()?.done.try_recv();

        let status = match result {
            Ok(status) => status,
            Err(oneshot::error::TryRecvError::Empty) => return None,
            Err(oneshot::error::TryRecvError::Closed) => {
                error!("{}: master update task ended without result", self.game);
                let id = state.running.as_ref().and_then(|r| r.id);
                self.aborted_status(id, state.last_master_update)
            }
        };

        state.running = None;
        Some(self.finish_master_update(&mut state, status))
    }

    fn aborted_status(&self, id: Option<u64>, started_at: Option<u64>) -> MasterUpdateStatus {
        MasterUpdateStatus {
            id,
            outcome: MasterOutcome::NetworkError,
            counts: ParseCounts::default(),
            started_at: started_at.unwrap_or(0),
        }
    }

    fn finish_master_update(
        &self,
        state: &mut HostState,
        status: MasterUpdateStatus,
    ) -> MasterUpdateStatus {
        self.events.publish(Event::MasterUpdate(&status));

        match status.outcome {
            MasterOutcome::NetworkError => warn!("{}: master update failed", self.game),
            MasterOutcome::Banned => warn!("{}: master update failed: banned", self.game),
            MasterOutcome::Empty => warn!("{}: master update failed: empty reply", self.game),
            MasterOutcome::Success => info!(
                "{}: received {} servers from master server",
                self.game, status.counts.num_servers
            ),
        }

        state.last_status = Some(status.clone());
        status
    }

    /// Waits up to `max_wait` for a running refresh and publishes its result.
    pub async fn shutdown(&self, max_wait: Duration) {
        let (running, started_at) = {
            let mut state = self.state.write();
            (state.running.take(), state.last_master_update)
        };
        let Some(running) = running else {
            return;
        };

        info!("{}: waiting for master update task...", self.game);
        let status = match tokio::time::timeout(max_wait, running.done).await {
            Ok(Ok(status)) => status,
            Ok(Err(_)) => self.aborted_status(running.id, started_at),
            Err(_) => {
                warn!("{}: master update still running, abandoning it", self.game);
                running.task.abort();
                return;
            }
        };

        let mut state = self.state.write();
        self.finish_master_update(&mut state, status);
    }

    // Probing

    /// Sends every due probe the rate limit allows. Servers that went silent
    /// lose their info first.
    pub fn ping_servers(&self) -> usize {
        let now = self.context.now_ms();
        let env = self.env(now);
        let mut state = self.state.write();
        let mut limiter = self.context.limiter();
        let mut sent = 0;

        for server in state.servers.iter_mut() {
            scheduler::expire_if_stale(server, &env);

            for kind in scheduler::due_probes(server, now, &self.context.intervals) {
                if !limiter.try_acquire() {
                    break;
                }
                let request = scheduler::encode_request(server, kind);
                match transport::send_datagram(&self.socket, request.as_bytes(), server.addr) {
                    Ok(true) => {
                        scheduler::record_sent(server, kind, now, self.context.now_us());
                        sent += 1;
                    }
                    Ok(false) => {
                        // retried next tick
                        limiter.refund();
                        debug!("{}: send buffer full, deferred ping to {}", self.game, server.addr);
                    }
                    Err(e) => {
                        limiter.refund();
                        warn!("{}: unable to ping {}: {}", self.game, server.addr, e);
                    }
                }
            }
        }

        sent
    }

    /// One tick of work: collect a finished refresh, start a due one and
    /// send due probes.
    pub fn process(self: &Arc<Self>) -> usize {
        self.poll_master_update();
        self.start_master_update();
        self.ping_servers()
    }

    pub fn handle_datagram(&self, data: &[u8], from: SocketAddrV4) -> Option<Reply> {
        let now = self.context.now_ms();
        let mut state = self.state.write();
        let Some(index) = state.servers.iter().position(|s| s.addr == from) else {
            debug!("{}: datagram from unknown address {}", self.game, from);
            return None;
        };
        let env = self.env(now);
        Some(read_reply(&mut state.servers[index], data, &env))
    }

    /// Reads every queued datagram.
    pub fn drain_replies(&self) -> usize {
        let mut buf = [0u8; MAX_DATAGRAM];
        let mut handled = 0;
        loop {
            match transport::recv_datagram(&self.socket, &mut buf) {
                Ok(Some((len, from))) => {
                    self.handle_datagram(&buf[..len], from);
                    handled += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("{}: receive failed: {}", self.game, e);
                    break;
                }
            }
        }
        handled
    }

    // Queries

    pub fn player_count(&self) -> usize {
        self.state.read().player_count()
    }

    pub fn find_players<F>(&self, query: &FindPlayer, found: F) -> usize
    where
        F: FnMut(&Server, &Player),
    {
        search::find_players(&self.state.read().servers, query, found)
    }

    pub fn snapshot(&self) -> HostSnapshot {
        let now = self.context.now_ms();
        let state = self.state.read();
        HostSnapshot {
            game: self.game,
            description: self.game.info().description,
            player_count: state.player_count(),
            master_update_running: state.running.is_some(),
            last_master_update: state.last_master_update,
            last_successful_master_update: state.last_successful_master_update,
            last_master_status: state.last_status.clone(),
            servers: state
                .servers
                .iter()
                .map(|s| ServerSnapshot::new(s, &state.servers, now))
                .collect(),
        }
    }
}
