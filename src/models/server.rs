// src/models/server.rs
use rand::Rng;
use serde::Serialize;
use std::net::{Ipv4Addr, SocketAddrV4};

use crate::context::Context;
use crate::geoip::{Country, CountryResolver};
use crate::host::events::{Event, EventBus};
use crate::models::player::{Player, PlayerExt};
use crate::protocol::game::{self, MAX_PLAYERS, UNKNOWN};
use crate::protocol::{GameId, ServerMod};

/// Everything a roster mutation needs besides the server itself.
pub struct ServerEnv<'a> {
    pub now: u64,
    pub context: &'a Context,
    pub countries: &'a dyn CountryResolver,
    pub events: &'a EventBus,
}

/// Send/receive bookkeeping for one probe kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct Probe {
    pub last_ping: Option<u64>,
    pub last_pong: u64,
    pub num_packets: u64,
    id: u64,
    base: u64,
}

impl Probe {
    fn with_base(base: u64) -> Self {
        Self {
            base,
            ..Default::default()
        }
    }

    /// The id [`Probe::next_id`] will hand out.
    pub fn peek_id(&self) -> i32 {
        (self.num_packets + 1).wrapping_add(self.base) as u32 as i32
    }

    /// Allocates the id for the next request.
    pub fn next_id(&mut self) -> i32 {
        self.num_packets += 1;
        self.id = self.num_packets.wrapping_add(self.base);
        self.wire_id()
    }

    /// The id of the last request, as echoed on the wire.
    pub fn wire_id(&self) -> i32 {
        self.id as u32 as i32
    }

    pub fn is_due(&self, now: u64, interval: u64) -> bool {
        match self.last_ping {
            None => true,
            Some(last) => now.saturating_sub(last) >= interval,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServerExt {
    pub info_ok: bool,
    pub uptime: i32,
    pub server_mod: Option<ServerMod>,
}

/// Player records collected during one extended player-stats round.
#[derive(Debug, Clone, Default)]
pub struct Staging {
    pub have_ids: bool,
    pub ids: Vec<i32>,
    pub records: Vec<Player>,
}

impl Staging {
    pub fn reset(&mut self) {
        self.have_ids = false;
        self.ids.clear();
        self.records.clear();
    }

    /// Removes `cn` from the outstanding id list.
    pub fn take_id(&mut self, cn: i32) -> bool {
        match self.ids.iter().position(|id| *id == cn) {
            Some(pos) => {
                self.ids.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Replaces the id list, dropping duplicates.
    pub fn set_ids(&mut self, ids: impl IntoIterator<Item = i32>) {
        self.ids.clear();
        for id in ids {
            if self.ids.len() >= MAX_PLAYERS {
                break;
            }
            if !self.ids.contains(&id) {
                self.ids.push(id);
            }
        }
        self.have_ids = true;
    }

    /// Drops staged records whose cn is not in the id list, consuming the
    /// ids of those that are.
    pub fn retain_listed(&mut self) {
        let mut records = std::mem::take(&mut self.records);
        records.retain(|p| self.take_id(p.cn));
        self.records = records;
    }

    pub fn stage(&mut self, player: Player) -> bool {
        if self.records.len() >= MAX_PLAYERS {
            return false;
        }
        self.records.push(player);
        true
    }

    /// True once every listed cn has a record. Without an id list any
    /// record completes the batch, so a lost id list costs one round of
    /// disconnect and reconnect events rather than a stalled player list.
    pub fn complete(&self) -> bool {
        if self.have_ids {
            self.ids.is_empty()
        } else {
            !self.records.is_empty()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Server {
    pub game: GameId,
    /// Query address, i.e. game port plus the game's info port offset.
    pub addr: SocketAddrV4,
    pub host: String,
    pub persist: bool,
    pub marked_for_deletion: bool,
    pub country: Option<Country>,

    pub info: Probe,
    pub ext_player: Probe,
    pub ext_uptime: Probe,
    pub last_pong: u64,
    pub ping_sent_us: u64,
    pub high_res_ping: f64,
    pub ping: i32,

    pub info_ok: bool,
    pub info_replies: u64,
    pub num_players: i32,
    pub protocol: i32,
    pub mode: i32,
    pub seconds_left: i32,
    pub max_players: i32,
    pub master_mode: i32,
    pub paused: bool,
    pub speed: i32,
    pub mutators: i32,
    pub map: String,
    pub description: String,

    pub ext: ServerExt,
    pub players: Vec<Player>,
    pub staging: Staging,
}

impl Server {
    pub fn new(game: GameId, host: &str, addr: SocketAddrV4, persist: bool) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            game,
            addr,
            host: host.to_string(),
            persist,
            marked_for_deletion: false,
            country: None,
            info: Probe::with_base(rng.gen()),
            ext_player: Probe::with_base(rng.gen()),
            ext_uptime: Probe::with_base(rng.gen()),
            last_pong: 0,
            ping_sent_us: 0,
            high_res_ping: 0.0,
            ping: 0,
            info_ok: false,
            info_replies: 0,
            num_players: 0,
            protocol: 0,
            mode: 0,
            seconds_left: 0,
            max_players: 0,
            master_mode: 0,
            paused: false,
            speed: 100,
            mutators: 0,
            map: String::new(),
            description: String::new(),
            ext: ServerExt::default(),
            players: Vec::new(),
            staging: Staging::default(),
        }
    }

    pub fn key(&self) -> u64 {
        server_key(self.addr)
    }

    pub fn ip(&self) -> Ipv4Addr {
        *self.addr.ip()
    }

    /// The port players connect to.
    pub fn game_port(&self) -> u16 {
        self.addr
            .port()
            .wrapping_sub(self.game.info().info_port_offset)
    }

    pub fn game_mode_name(&self) -> &'static str {
        game::game_mode_name(self.game, self.mode)
    }

    pub fn is_team_mode(&self) -> bool {
        let Some(tokens) = game::team_mode_tokens(self.game) else {
            return false;
        };
        let mode = self.game_mode_name();
        tokens.iter().any(|t| mode.contains(t))
    }

    pub fn master_mode_name(&self) -> &'static str {
        game::master_mode_name(self.game, self.master_mode)
    }

    pub fn release_name(&self) -> String {
        game::release_name(self.game, self.protocol)
    }

    pub fn server_mod_name(&self) -> &'static str {
        game::server_mod_name(self.game, self.ext.server_mod)
    }

    pub fn country(&self, code: bool) -> &str {
        match &self.country {
            Some(c) if code => &c.code,
            Some(c) => &c.name,
            None => UNKNOWN,
        }
    }

    pub fn description(&self) -> &str {
        if self.description.is_empty() {
            "<no server description>"
        } else {
            &self.description
        }
    }

    pub fn map_name(&self) -> &str {
        if self.map.is_empty() {
            "<no map set>"
        } else {
            &self.map
        }
    }

    /// Description suffixed with its rank among valid servers sharing it.
    /// The first holder in roster order keeps the bare description.
    pub fn unique_description(&self, roster: &[Server]) -> String {
        let description = self.description();
        let mut dups = 0;
        let mut rank = 0;

        for server in roster.iter().filter(|s| s.info_ok) {
            if server.description() != description {
                continue;
            }
            dups += 1;
            if server.key() == self.key() {
                rank = dups;
            }
            if dups >= 2 && rank > 0 {
                break;
            }
        }

        if dups >= 2 && rank >= 2 {
            format!("{} [{}]", description, rank)
        } else {
            description.to_string()
        }
    }

    /// Last reported uptime in seconds, or -1.
    pub fn uptime(&self) -> i32 {
        if !self.ext.info_ok || self.ext.uptime < 0 {
            return -1;
        }
        self.ext.uptime
    }

    /// Reported uptime extrapolated to `now`, or -1.
    pub fn current_uptime(&self, now: u64) -> i32 {
        let uptime = self.uptime();
        if uptime < 0 {
            return -1;
        }
        if self
            .ext
            .server_mod
            .map_or(false, ServerMod::keeps_uptime_across_restart)
        {
            return uptime;
        }
        let elapsed = now.saturating_sub(self.ext_uptime.last_pong) / 1000;
        uptime.saturating_add(elapsed.min(i32::MAX as u64) as i32)
    }

    pub fn player_count(&self) -> usize {
        if self.info_ok {
            self.num_players.max(0) as usize
        } else {
            0
        }
    }

    // Player roster

    pub fn add_player(&mut self, mut player: Player, env: &ServerEnv<'_>) -> bool {
        if self.players.len() >= MAX_PLAYERS {
            return false;
        }

        player.marked_for_deletion = false;
        player.local.session_id = env.context.next_player_session_id();
        let code = player
            .ext
            .as_ref()
            .and_then(|ext| ext.country_code.as_deref());
        player.local.country = match code {
            Some(code) => env.countries.by_code(code),
            None => env.countries.by_ip(player.ip_addr()),
        };

        self.players.push(player);
        if let Some(player) = self.players.last() {
            env.events.publish(Event::PlayerConnected {
                server: &*self,
                player,
            });
        }
        true
    }

    /// Identity match: cn plus session id, else cn plus ip, else cn plus name.
    fn find_player(&self, fresh: &Player) -> Option<usize> {
        let session_id = fresh.ext_session_id();
        self.players.iter().position(|p| {
            p.cn == fresh.cn
                && match session_id {
                    Some(id) => p.ext_session_id() == Some(id),
                    None if fresh.has_ip() => p.ip == fresh.ip,
                    None => p.name == fresh.name,
                }
        })
    }

    pub fn add_or_update_player(&mut self, fresh: Player, env: &ServerEnv<'_>) -> bool {
        let Some(index) = self.find_player(&fresh) else {
            return self.add_player(fresh, env);
        };

        if self.players[index].name != fresh.name {
            env.events.publish(Event::PlayerRenamed {
                server: &*self,
                player: &self.players[index],
                new_name: &fresh.name,
            });
        }
        self.players[index].update(fresh);
        true
    }

    fn delete_player(&mut self, index: usize, env: &ServerEnv<'_>) {
        let player = self.players.remove(index);
        env.events.publish(Event::PlayerDisconnected {
            server: &*self,
            player: &player,
        });
    }

    pub fn mark_all_players_for_deletion(&mut self) {
        for player in &mut self.players {
            player.marked_for_deletion = true;
        }
    }

    pub fn delete_disconnected_players(&mut self, env: &ServerEnv<'_>) {
        for i in (0..self.players.len()).rev() {
            if self.players[i].marked_for_deletion {
                self.delete_player(i, env);
            }
        }
    }

    pub fn delete_all_players(&mut self, env: &ServerEnv<'_>) {
        for i in (0..self.players.len()).rev() {
            self.delete_player(i, env);
        }
    }

    /// Applies the staged batch to the live player list.
    pub fn merge_staged_players(&mut self, env: &ServerEnv<'_>) {
        self.mark_all_players_for_deletion();
        for player in std::mem::take(&mut self.staging.records) {
            self.add_or_update_player(player, env);
        }
        self.delete_disconnected_players(env);
    }
}

pub fn server_key(addr: SocketAddrV4) -> u64 {
    (u64::from(u32::from(*addr.ip())) << 32) | u64::from(addr.port())
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerSnapshot {
    pub cn: i32,
    pub name: String,
    pub team: String,
    pub ping: i32,
    pub frags: i32,
    pub flags: i32,
    pub deaths: i32,
    pub teamkills: i32,
    pub accuracy: i32,
    pub privilege: i32,
    pub state: i32,
    pub bot: bool,
    pub country: String,
    pub country_code: String,
    pub online_time_ms: Option<u64>,
    pub session_id: u64,
    pub ext: Option<PlayerExt>,
}

impl PlayerSnapshot {
    pub fn new(player: &Player, now: u64) -> Self {
        Self {
            cn: player.cn,
            name: player.name().to_string(),
            team: player.team().to_string(),
            ping: player.ping,
            frags: player.frags,
            flags: player.flags,
            deaths: player.deaths,
            teamkills: player.teamkills,
            accuracy: player.accuracy,
            privilege: player.privilege,
            state: player.state,
            bot: player.is_bot(),
            country: player.country(false).to_string(),
            country_code: player.country(true).to_string(),
            online_time_ms: player.online_time(now),
            session_id: player.local.session_id,
            ext: player.ext.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerSnapshot {
    pub host: String,
    pub ip: String,
    pub port: u16,
    pub persist: bool,
    pub info_ok: bool,
    pub ping: i32,
    pub description: String,
    pub map: String,
    pub mode: &'static str,
    pub team_mode: bool,
    pub master_mode: &'static str,
    pub release: String,
    pub seconds_left: i32,
    pub num_players: i32,
    pub max_players: i32,
    pub paused: bool,
    pub speed: i32,
    pub uptime: i32,
    pub server_mod: &'static str,
    pub country: String,
    pub country_code: String,
    pub players: Vec<PlayerSnapshot>,
}

impl ServerSnapshot {
    pub fn new(server: &Server, roster: &[Server], now: u64) -> Self {
        Self {
            host: server.host.clone(),
            ip: server.ip().to_string(),
            port: server.game_port(),
            persist: server.persist,
            info_ok: server.info_ok,
            ping: server.ping,
            description: server.unique_description(roster),
            map: server.map_name().to_string(),
            mode: server.game_mode_name(),
            team_mode: server.is_team_mode(),
            master_mode: server.master_mode_name(),
            release: server.release_name(),
            seconds_left: server.seconds_left,
            num_players: server.num_players,
            max_players: server.max_players,
            paused: server.paused,
            speed: server.speed,
            uptime: server.current_uptime(now),
            server_mod: server.server_mod_name(),
            country: server.country(false).to_string(),
            country_code: server.country(true).to_string(),
            players: server
                .players
                .iter()
                .map(|p| PlayerSnapshot::new(p, now))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, ManualClock, PingIntervals};
    use crate::geoip::NoGeoIp;
    use crate::host::events::Subscriber;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl Subscriber for Recorder {
        fn on_event(&self, _game: GameId, event: &Event<'_>) {
            let line = match event {
                Event::PlayerConnected { player, .. } => format!("connect {}", player.name),
                Event::PlayerDisconnected { player, .. } => format!("disconnect {}", player.name),
                Event::PlayerRenamed {
                    player, new_name, ..
                } => format!("rename {} {}", player.name, new_name),
                other => other.kind().to_string(),
            };
            self.seen.lock().push(line);
        }
    }

    struct Fixture {
        context: Context,
        events: EventBus,
        recorder: Arc<Recorder>,
    }

    impl Fixture {
        fn new() -> Self {
            let intervals = PingIntervals {
                info_ms: 5_000,
                ext_player_ms: 5_000,
                ext_uptime_ms: 120_000,
            };
            let events = EventBus::new(GameId::Sauerbraten);
            let recorder = Arc::new(Recorder::default());
            events.subscribe(recorder.clone());
            Self {
                context: Context::new(Arc::new(ManualClock::new(10_000)), 0, intervals),
                events,
                recorder,
            }
        }

        fn env(&self) -> ServerEnv<'_> {
            ServerEnv {
                now: 10_000,
                context: &self.context,
                countries: &NoGeoIp,
                events: &self.events,
            }
        }

        fn seen(&self) -> Vec<String> {
            std::mem::take(&mut *self.recorder.seen.lock())
        }
    }

    fn server(description: &str, port: u16) -> Server {
        let mut s = Server::new(
            GameId::Sauerbraten,
            "host",
            SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), port),
            false,
        );
        s.description = description.to_string();
        s.info_ok = true;
        s
    }

    fn player(cn: i32, name: &str, ip: [u8; 4]) -> Player {
        Player {
            cn,
            name: name.to_string(),
            ip,
            ..Default::default()
        }
    }

    #[test]
    fn test_key_packs_ip_and_port() {
        let addr = SocketAddrV4::new(Ipv4Addr::new(1, 2, 3, 4), 28786);
        assert_eq!(server_key(addr), (0x0102_0304u64 << 32) | 28786);
    }

    #[test]
    fn test_unique_description_suffixes_duplicates() {
        let roster = vec![
            server("x", 1),
            server("x", 2),
            server("x", 3),
            server("y", 4),
        ];
        let rendered: Vec<String> = roster
            .iter()
            .map(|s| s.unique_description(&roster))
            .collect();
        assert_eq!(rendered, vec!["x", "x [2]", "x [3]", "y"]);
    }

    #[test]
    fn test_unique_description_ignores_invalid_servers() {
        let mut roster = vec![server("x", 1), server("x", 2)];
        roster[0].info_ok = false;
        assert_eq!(roster[1].unique_description(&roster), "x");
    }

    #[test]
    fn test_team_mode_only_for_sauerbraten() {
        let mut s = server("x", 1);
        s.mode = 11; // ctf
        assert!(s.is_team_mode());
        s.mode = 0;
        assert!(!s.is_team_mode());
        s.game = GameId::Tesseract;
        s.mode = 3;
        assert!(!s.is_team_mode());
    }

    #[test]
    fn test_current_uptime() {
        let mut s = server("x", 1);
        assert_eq!(s.current_uptime(0), -1);
        s.ext.info_ok = true;
        s.ext.uptime = 100;
        s.ext_uptime.last_pong = 1_000;
        assert_eq!(s.current_uptime(6_500), 105);
        s.ext.server_mod = Some(ServerMod::Hopmod);
        assert_eq!(s.current_uptime(6_500), 100);
    }

    #[test]
    fn test_probe_ids_and_due() {
        let mut probe = Probe::with_base(u32::MAX as u64);
        assert!(probe.is_due(0, 5_000));
        assert_eq!(probe.peek_id(), 0);
        assert_eq!(probe.peek_id(), 0);
        assert_eq!(probe.next_id(), 0);
        assert_eq!(probe.next_id(), 1);
        probe.last_ping = Some(1_000);
        assert!(!probe.is_due(5_999, 5_000));
        assert!(probe.is_due(6_000, 5_000));
    }

    #[test]
    fn test_identity_prefers_session_id() {
        let fx = Fixture::new();
        let mut s = server("x", 1);

        let mut first = player(2, "alice", [1, 2, 3, 0]);
        first.ext = Some(PlayerExt {
            session_id: Some(77),
            ..Default::default()
        });
        s.add_or_update_player(first, &fx.env());
        let session = s.players[0].local.session_id;

        let mut again = player(2, "bob", [9, 9, 9, 0]);
        again.ext = Some(PlayerExt {
            session_id: Some(77),
            ..Default::default()
        });
        s.add_or_update_player(again, &fx.env());

        assert_eq!(s.players.len(), 1);
        assert_eq!(s.players[0].name, "bob");
        assert_eq!(s.players[0].local.session_id, session);
        assert_eq!(fx.seen(), vec!["connect alice", "rename alice bob"]);
    }

    #[test]
    fn test_identity_falls_back_to_ip_then_name() {
        let fx = Fixture::new();
        let mut s = server("x", 1);

        s.add_or_update_player(player(1, "a", [1, 1, 1, 0]), &fx.env());
        s.add_or_update_player(player(1, "b", [1, 1, 1, 0]), &fx.env());
        assert_eq!(s.players.len(), 1);

        s.add_or_update_player(player(3, "c", [0; 4]), &fx.env());
        s.add_or_update_player(player(3, "d", [0; 4]), &fx.env());
        assert_eq!(s.players.len(), 3);
        assert_eq!(
            fx.seen(),
            vec!["connect a", "rename a b", "connect c", "connect d"]
        );
    }

    #[test]
    fn test_merge_removes_unconfirmed_players_once() {
        let fx = Fixture::new();
        let mut s = server("x", 1);
        s.add_player(player(1, "stay", [1, 1, 1, 0]), &fx.env());
        s.add_player(player(2, "gone", [2, 2, 2, 0]), &fx.env());
        fx.seen();

        s.staging.stage(player(1, "stay", [1, 1, 1, 0]));
        s.merge_staged_players(&fx.env());

        assert_eq!(s.players.len(), 1);
        assert_eq!(s.players[0].name, "stay");
        assert!(!s.players[0].marked_for_deletion);
        assert!(s.staging.records.is_empty());
        assert_eq!(fx.seen(), vec!["disconnect gone"]);
    }

    #[test]
    fn test_staging_id_list() {
        let mut staging = Staging::default();
        staging.stage(player(5, "early", [0; 4]));
        staging.stage(player(9, "stale", [0; 4]));
        staging.set_ids([5, 6, 6, 5]);
        assert_eq!(staging.ids, vec![5, 6]);

        staging.retain_listed();
        assert_eq!(staging.records.len(), 1);
        assert_eq!(staging.ids, vec![6]);
        assert!(!staging.complete());

        assert!(staging.take_id(6));
        assert!(!staging.take_id(6));
        assert!(staging.complete());
    }

    #[test]
    fn test_player_cap() {
        let fx = Fixture::new();
        let mut s = server("x", 1);
        for cn in 0..MAX_PLAYERS as i32 {
            assert!(s.add_player(player(cn, "p", [0; 4]), &fx.env()));
        }
        assert!(!s.add_player(player(999, "p", [0; 4]), &fx.env()));
    }
}
