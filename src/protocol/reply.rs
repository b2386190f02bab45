// src/protocol/reply.rs
//! Interprets replies to info, player-stats and uptime probes.

use log::debug;

use crate::host::events::Event;
use crate::models::{Player, PlayerExt, Server, ServerEnv};
use crate::protocol::game::*;
use crate::protocol::text::filter_text;
use crate::protocol::{GameId, PacketBuf, ServerMod};

/// What a received datagram turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Info { valid: bool },
    PlayerIds,
    PlayerStats { accepted: bool },
    Uptime { valid: bool },
    /// Answer to a request we no longer wait for.
    Stale,
    Invalid,
}

enum Header {
    Valid,
    Stale,
    Invalid,
}

pub fn read_reply(server: &mut Server, data: &[u8], env: &ServerEnv<'_>) -> Reply {
    let mut pb = PacketBuf::from_bytes(data);
    server.last_pong = env.now;

    let val = pb.get_int();
    if val == 0 && server.info_ok {
        return read_ext_reply(server, &mut pb, env);
    }
    read_info_reply(server, &mut pb, env)
}

fn read_map(pb: &mut PacketBuf) -> String {
    filter_text(&pb.get_string(MAX_WIRE_STRING), false, MAX_MAP_LENGTH)
}

fn read_description(pb: &mut PacketBuf) -> String {
    filter_text(&pb.get_string(MAX_WIRE_STRING), true, MAX_DESCRIPTION_LENGTH)
}

fn read_paused_speed(server: &mut Server, pb: &mut PacketBuf, present: bool) {
    if present {
        server.paused = pb.get_int() == 1;
        server.speed = pb.get_int();
    } else {
        server.paused = false;
        server.speed = 100;
    }
}

/// Decodes the game specific info layout. Returns false when the layout is
/// not one we understand.
fn read_info_fields(server: &mut Server, pb: &mut PacketBuf) -> bool {
    match server.game {
        GameId::Sauerbraten => {
            server.num_players = pb.get_int();
            let attrs = pb.get_int();
            if attrs != 5 && attrs != 7 {
                return false;
            }
            server.protocol = pb.get_int();
            server.mode = pb.get_int();
            server.seconds_left = pb.get_int();
            server.max_players = pb.get_int();
            server.master_mode = pb.get_int();
            read_paused_speed(server, pb, attrs == 7);
            server.map = read_map(pb);
            server.description = read_description(pb);
        }
        GameId::Tesseract => {
            server.protocol = pb.get_int();
            server.num_players = pb.get_int();
            server.max_players = pb.get_int();
            let attrs = pb.get_int();
            if attrs != 3 && attrs != 5 {
                return false;
            }
            server.mode = pb.get_int();
            server.seconds_left = pb.get_int();
            server.master_mode = pb.get_int();
            read_paused_speed(server, pb, attrs == 5);
            server.map = read_map(pb);
            server.description = read_description(pb);
        }
        GameId::RedEclipse => {
            server.num_players = pb.get_int();
            if pb.get_int() != 15 {
                return false;
            }
            server.protocol = pb.get_int();
            server.mode = pb.get_int();
            server.mutators = pb.get_int();
            server.seconds_left = pb.get_int();
            server.max_players = pb.get_int();
            server.master_mode = pb.get_int();
            // game vars, game mods, version triple, platform, arch, state, time left
            for _ in 0..9 {
                pb.get_int();
            }
            server.map = read_map(pb);
            server.description = read_description(pb);
        }
        GameId::AssaultCube => {
            server.protocol = pb.get_int();
            if server.protocol < 1128 {
                return false;
            }
            server.mode = pb.get_int();
            server.num_players = pb.get_int();
            server.seconds_left = pb.get_int();
            server.map = read_map(pb);
            server.description = read_description(pb);
            server.max_players = pb.get_int();
        }
    }
    true
}

fn read_info_reply(server: &mut Server, pb: &mut PacketBuf, env: &ServerEnv<'_>) -> Reply {
    let request_id = pb.get_int();
    server.info.last_pong = env.now;
    if request_id != server.info.wire_id() {
        return Reply::Stale;
    }

    let now_us = env.context.now_us();
    server.high_res_ping = now_us.saturating_sub(server.ping_sent_us) as f64 / 1000.0;
    server.ping = (server.high_res_ping + 0.5).floor() as i32;

    server.info_ok = read_info_fields(server, pb) && !pb.overread();
    if server.info_ok {
        server.info_replies += 1;
    }

    if !server.info_ok || server.num_players <= 0 {
        if !server.info_ok || server.num_players < 0 {
            debug!(
                "{}: {}:{}: broken info update",
                server.game,
                server.host,
                server.game_port()
            );
        }
        server.delete_all_players(env);
    }

    env.events.publish(Event::ServerUpdated(&*server));
    Reply::Info {
        valid: server.info_ok,
    }
}

fn read_ext_header(
    pb: &mut PacketBuf,
    expected_id: i32,
    player_stats: bool,
    check_no_error: bool,
) -> Header {
    if player_stats {
        // requested cn
        pb.get_int();
        if pb.get_int() != EXT_EXTENDED_PLAYERSTATS {
            return Header::Invalid;
        }
    }
    if pb.get_int() != expected_id {
        return Header::Stale;
    }
    if pb.get_int() != EXT_ACK {
        return Header::Invalid;
    }
    let version = pb.get_int();
    if !(EXT_VERSION_MIN..=EXT_VERSION).contains(&version) {
        return Header::Invalid;
    }
    if check_no_error && pb.get_int() != EXT_NO_ERROR {
        return Header::Invalid;
    }
    Header::Valid
}

fn read_ext_reply(server: &mut Server, pb: &mut PacketBuf, env: &ServerEnv<'_>) -> Reply {
    match pb.get_int() {
        EXT_PLAYERSTATS => read_player_stats(server, pb, env),
        EXT_UPTIME => read_uptime(server, pb, env),
        _ => Reply::Invalid,
    }
}

fn read_player_stats(server: &mut Server, pb: &mut PacketBuf, env: &ServerEnv<'_>) -> Reply {
    match read_ext_header(pb, server.ext_player.wire_id(), true, true) {
        Header::Valid => {}
        Header::Stale => return Reply::Stale,
        Header::Invalid => return Reply::Invalid,
    }
    if pb.remaining() == 0 {
        return Reply::Invalid;
    }

    let reply = match pb.get_int() {
        EXT_PLAYERSTATS_RESP_STATS => {
            server.ext_player.last_pong = env.now;
            let cn = pb.get_int();
            if server.staging.have_ids && !server.staging.take_id(cn) {
                return Reply::PlayerStats { accepted: false };
            }

            let mut player = read_player(cn, server.game, pb);
            let accepted = !pb.overread();
            if accepted {
                player.local.connect_time = (server.info_replies > 2).then_some(env.now);
                player.local.last_update = env.now;
                server.staging.stage(player);
            }
            Reply::PlayerStats { accepted }
        }
        EXT_PLAYERSTATS_RESP_IDS => {
            server.ext_player.last_pong = env.now;
            let mut ids = Vec::new();
            while pb.remaining() > 0 {
                ids.push(pb.get_int());
            }
            server.staging.set_ids(ids);
            server.staging.retain_listed();
            Reply::PlayerIds
        }
        _ => return Reply::Invalid,
    };

    if server.staging.complete() {
        server.merge_staged_players(env);
    }
    reply
}

fn read_player(cn: i32, game: GameId, pb: &mut PacketBuf) -> Player {
    let mut player = Player {
        cn,
        ..Default::default()
    };

    player.ping = pb.get_int();
    player.name = filter_text(&pb.get_string(MAX_WIRE_STRING), false, MAX_NAME_LENGTH);
    player.team = filter_text(&pb.get_string(MAX_WIRE_STRING), false, MAX_TEAM_LENGTH);
    player.frags = pb.get_int();
    player.flags = pb.get_int();
    player.deaths = pb.get_int();
    player.teamkills = pb.get_int();
    player.accuracy = pb.get_int();
    player.health = pb.get_int();
    player.armour = pb.get_int();
    player.gun = pb.get_int();
    player.privilege = pb.get_int();
    player.state = pb.get_int();

    if pb.remaining() > 0 {
        player.ip = [pb.get_byte(), pb.get_byte(), pb.get_byte(), 0];
    }

    if pb.remaining() > 0 {
        pb.get_int();
        let mod_id = pb.get_int();
        player.ext = ServerMod::from_wire(game, mod_id).and_then(|m| read_player_ext(m, pb));
    }

    player
}

fn read_player_ext(server_mod: ServerMod, pb: &mut PacketBuf) -> Option<PlayerExt> {
    let mut ext = PlayerExt {
        server_mod: Some(server_mod),
        ..Default::default()
    };

    match server_mod {
        ServerMod::Hopmod | ServerMod::Suckerserv | ServerMod::Zeromod => {
            ext.suicides = Some(pb.get_int());
            ext.shot_damage = Some(pb.get_int());
            ext.damage = Some(pb.get_int());
            ext.explosive_damage = Some(pb.get_int());
            ext.hits = Some(pb.get_int());
            ext.misses = Some(pb.get_int());
            ext.shots = Some(pb.get_int());

            if server_mod == ServerMod::Zeromod && pb.remaining() >= 2 {
                let code = [pb.get_byte(), pb.get_byte()];
                // lower case means a continent, not a country
                if code[0] != 0 && !code[0].is_ascii_lowercase() {
                    ext.country_code = Some(
                        code.iter()
                            .take_while(|c| **c != 0)
                            .map(|c| char::from(*c))
                            .collect(),
                    );
                }
                if pb.remaining() > 0 {
                    ext.session_id = Some(pb.get_int());
                }
            }
        }
        ServerMod::Oomod => {
            if pb.get_int() != 1 {
                return None;
            }
            ext.suicides = Some(pb.get_int());
            ext.shot_damage = Some(pb.get_int());
            ext.damage = Some(pb.get_int());
            ext.captured = Some(pb.get_int());
            ext.stolen = Some(pb.get_int());
            ext.defended = Some(pb.get_int());
        }
        _ => return None,
    }

    Some(ext)
}

fn read_uptime(server: &mut Server, pb: &mut PacketBuf, env: &ServerEnv<'_>) -> Reply {
    server.ext_uptime.last_pong = env.now;
    server.ext.info_ok = false;
    server.ext.server_mod = None;

    if pb.get_byte() != 1 {
        return Reply::Invalid;
    }
    // Some mods answer with an error code here, so it is not checked.
    match read_ext_header(pb, server.ext_uptime.wire_id(), false, false) {
        Header::Valid => {}
        Header::Stale => return Reply::Stale,
        Header::Invalid => return Reply::Invalid,
    }
    if pb.remaining() == 0 {
        return Reply::Invalid;
    }

    let previous = server.ext.uptime;
    let uptime = pb.get_int();
    let server_mod = if pb.remaining() > 0 {
        ServerMod::from_wire(server.game, pb.get_int())
    } else {
        None
    };
    if pb.overread() {
        return Reply::Uptime { valid: false };
    }

    server.ext.uptime = uptime;
    server.ext.server_mod = server_mod;
    server.ext.info_ok = true;

    let exempt = server_mod.map_or(false, ServerMod::keeps_uptime_across_restart);
    if previous != 0 && uptime < previous && !exempt {
        env.events.publish(Event::ServerRestarted {
            server: &*server,
            previous_uptime: previous,
            uptime,
        });
    }

    Reply::Uptime { valid: true }
}
