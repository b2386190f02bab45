// src/scheduler.rs
//! Probe scheduling and the global ping rate limit.

use crate::context::PingIntervals;
use crate::models::{Server, ServerEnv};
use crate::protocol::game::{EXT_EXTENDED_PLAYERSTATS, EXT_PLAYERSTATS, EXT_UPTIME};
use crate::protocol::{GameId, PacketBuf};

/// Length of one rate limiting window.
pub const WINDOW_MS: u64 = 50;

/// Silence after which a server's info is considered stale.
pub const STALE_AFTER_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Info,
    ExtPlayers,
    ExtUptime,
}

/// Caps probes per 50ms window across every host.
///
/// Once a probe is refused the limiter stays saturated until the next
/// [`PingLimiter::begin_tick`], so the rest of the sweep sends nothing.
#[derive(Debug)]
pub struct PingLimiter {
    cap: Option<u32>,
    count: u32,
    window_start: Option<u64>,
    saturated: bool,
}

impl PingLimiter {
    /// `max_per_second == 0` disables limiting.
    pub fn new(max_per_second: u32) -> Self {
        let cap = match max_per_second {
            0 => None,
            n => Some((n / 20).max(1)),
        };
        Self {
            cap,
            count: 0,
            window_start: None,
            saturated: false,
        }
    }

    pub fn cap(&self) -> Option<u32> {
        self.cap
    }

    pub fn begin_tick(&mut self, now: u64) {
        self.saturated = false;
        let expired = match self.window_start {
            None => true,
            Some(start) => now.saturating_sub(start) >= WINDOW_MS,
        };
        if expired {
            self.window_start = Some(now);
            self.count = 0;
        }
    }

    pub fn try_acquire(&mut self) -> bool {
        if self.saturated {
            return false;
        }
        let Some(cap) = self.cap else {
            return true;
        };
        if self.count < cap {
            self.count += 1;
            true
        } else {
            self.saturated = true;
            false
        }
    }

    /// Gives back a slot taken for a probe that never left.
    pub fn refund(&mut self) {
        self.count = self.count.saturating_sub(1);
    }

    pub fn is_saturated(&self) -> bool {
        self.saturated
    }
}

/// Probes due for `server`, in sending order.
pub fn due_probes(server: &Server, now: u64, intervals: &PingIntervals) -> Vec<ProbeKind> {
    let mut due = Vec::with_capacity(3);

    if server.info.is_due(now, intervals.info_ms) {
        due.push(ProbeKind::Info);
    }
    if !server.game.info().ext_info_supported || !server.info_ok {
        return due;
    }
    if server.num_players > 0 && server.ext_player.is_due(now, intervals.ext_player_ms) {
        due.push(ProbeKind::ExtPlayers);
    }
    if server.ext_uptime.is_due(now, intervals.ext_uptime_ms) {
        due.push(ProbeKind::ExtUptime);
    }

    due
}

fn request_header(game: GameId) -> PacketBuf {
    let mut pb = PacketBuf::new(32);
    if game == GameId::Tesseract {
        pb.add_byte(0xFF);
        pb.add_byte(0xFF);
    }
    pb
}

/// Encodes the request for `kind` without touching the server.
pub fn encode_request(server: &Server, kind: ProbeKind) -> PacketBuf {
    let mut pb = request_header(server.game);

    let id = match kind {
        ProbeKind::Info => {
            pb.add_int(1);
            server.info.peek_id()
        }
        ProbeKind::ExtPlayers => {
            pb.add_int(0);
            pb.add_int(EXT_PLAYERSTATS);
            pb.add_int(-1);
            pb.add_int(EXT_EXTENDED_PLAYERSTATS);
            server.ext_player.peek_id()
        }
        ProbeKind::ExtUptime => {
            pb.add_int(0);
            pb.add_int(EXT_UPTIME);
            // ask for the server mod id as well
            pb.add_byte(1);
            server.ext_uptime.peek_id()
        }
    };

    pb.add_int(id);
    pb
}

/// Records a request built by [`encode_request`] as sent.
pub fn record_sent(server: &mut Server, kind: ProbeKind, now: u64, now_us: u64) {
    match kind {
        ProbeKind::Info => {
            server.ping_sent_us = now_us;
            server.info.last_ping = Some(now);
            server.info.next_id();
        }
        ProbeKind::ExtPlayers => {
            server.ext_player.last_ping = Some(now);
            server.staging.reset();
            server.ext_player.next_id();
        }
        ProbeKind::ExtUptime => {
            server.ext_uptime.last_ping = Some(now);
            server.ext_uptime.next_id();
        }
    }
}

/// Builds the request for `kind` and records it as sent.
pub fn build_request(server: &mut Server, kind: ProbeKind, now: u64, now_us: u64) -> PacketBuf {
    let pb = encode_request(server, kind);
    record_sent(server, kind, now, now_us);
    pb
}

/// Drops the info of a server that stopped answering.
pub fn expire_if_stale(server: &mut Server, env: &ServerEnv<'_>) -> bool {
    if !server.info_ok || env.now.saturating_sub(server.last_pong) < STALE_AFTER_MS {
        return false;
    }
    server.info_ok = false;
    server.num_players = 0;
    server.delete_all_players(env);
    true
}
