// src/protocol/game.rs
use lazy_static::lazy_static;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

pub const EXT_ACK: i32 = -1;
pub const EXT_VERSION: i32 = 105;
pub const EXT_VERSION_MIN: i32 = 104;
pub const EXT_NO_ERROR: i32 = 0;
pub const EXT_PLAYERSTATS_RESP_IDS: i32 = -10;
pub const EXT_PLAYERSTATS_RESP_STATS: i32 = -11;
pub const EXT_UPTIME: i32 = 0;
pub const EXT_PLAYERSTATS: i32 = 1;
pub const EXT_EXTENDED_PLAYERSTATS: i32 = 0xC8343F2;

pub const MAX_NAME_LENGTH: usize = 15;
pub const MAX_TEAM_LENGTH: usize = 10;
pub const MAX_MAP_LENGTH: usize = 59;
pub const MAX_DESCRIPTION_LENGTH: usize = 59;
/// Longest string read off the wire before filtering.
pub const MAX_WIRE_STRING: usize = 259;

pub const MAX_PLAYERS: usize = 256;
pub const MAX_SERVERS: usize = 512;

pub const UNKNOWN: &str = "<unknown>";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GameId {
    #[default]
    Sauerbraten,
    Tesseract,
    RedEclipse,
    AssaultCube,
}

#[derive(Debug)]
pub struct GameInfo {
    pub id: GameId,
    pub name: &'static str,
    pub description: &'static str,
    pub master_host: &'static str,
    pub master_port: u16,
    pub info_port_offset: u16,
    pub ext_info_supported: bool,
}

pub const GAMES: [GameInfo; 4] = [
    GameInfo {
        id: GameId::Sauerbraten,
        name: "sauerbraten",
        description: "Cube 2: Sauerbraten",
        master_host: "master.sauerbraten.org",
        master_port: 28787,
        info_port_offset: 1,
        ext_info_supported: true,
    },
    GameInfo {
        id: GameId::Tesseract,
        name: "tesseract",
        description: "Tesseract",
        master_host: "master.tesseract.gg",
        master_port: 41999,
        info_port_offset: 0,
        ext_info_supported: true,
    },
    GameInfo {
        id: GameId::RedEclipse,
        name: "redeclipse",
        description: "Red Eclipse",
        master_host: "play.redeclipse.net",
        master_port: 28800,
        info_port_offset: 1,
        ext_info_supported: false,
    },
    GameInfo {
        id: GameId::AssaultCube,
        name: "assaultcube",
        description: "AssaultCube",
        master_host: "ms.cubers.net",
        master_port: 28760,
        info_port_offset: 1,
        ext_info_supported: true,
    },
];

lazy_static! {
    static ref GAMES_BY_NAME: HashMap<&'static str, GameId> =
        GAMES.iter().map(|g| (g.name, g.id)).collect();
}

impl GameId {
    pub fn info(self) -> &'static GameInfo {
        match self {
            GameId::Sauerbraten => &GAMES[0],
            GameId::Tesseract => &GAMES[1],
            GameId::RedEclipse => &GAMES[2],
            GameId::AssaultCube => &GAMES[3],
        }
    }

    pub fn from_name(name: &str) -> Option<GameId> {
        GAMES_BY_NAME.get(name).copied()
    }

    pub fn all() -> impl Iterator<Item = GameId> {
        GAMES.iter().map(|g| g.id)
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Server modifications that announce themselves through extinfo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMod {
    Hopmod,
    Oomod,
    Spaghettimod,
    Suckerserv,
    Remod,
    Noobmod,
    Zeromod,
}

impl ServerMod {
    /// Maps a wire id to a mod known for `game`.
    pub fn from_wire(game: GameId, id: i32) -> Option<ServerMod> {
        if game != GameId::Sauerbraten {
            return None;
        }
        match id {
            -2 => Some(ServerMod::Hopmod),
            -3 => Some(ServerMod::Oomod),
            -4 => Some(ServerMod::Spaghettimod),
            -5 => Some(ServerMod::Suckerserv),
            -6 => Some(ServerMod::Remod),
            -7 => Some(ServerMod::Noobmod),
            -8 => Some(ServerMod::Zeromod),
            _ => None,
        }
    }

    pub fn wire_id(self) -> i32 {
        match self {
            ServerMod::Hopmod => -2,
            ServerMod::Oomod => -3,
            ServerMod::Spaghettimod => -4,
            ServerMod::Suckerserv => -5,
            ServerMod::Remod => -6,
            ServerMod::Noobmod => -7,
            ServerMod::Zeromod => -8,
        }
    }

    /// Mods whose reported uptime survives a server restart.
    pub fn keeps_uptime_across_restart(self) -> bool {
        matches!(self, ServerMod::Hopmod | ServerMod::Suckerserv)
    }
}

fn lookup(table: &[&'static str], index: i32) -> Option<&'static str> {
    if index < 0 {
        return None;
    }
    table.get(index as usize).copied()
}

pub fn game_mode_name(game: GameId, mode: i32) -> &'static str {
    let table: &[&str] = match game {
        GameId::Sauerbraten => &[
            "ffa",
            "coop edit",
            "teamplay",
            "instagib",
            "instagib team",
            "efficiency",
            "efficiency team",
            "tactics",
            "tactics team",
            "capture",
            "regen capture",
            "ctf",
            "insta ctf",
            "protect",
            "insta protect",
            "hold",
            "insta hold",
            "efficiency ctf",
            "efficiency protect",
            "efficiency hold",
            "collect",
            "insta collect",
            "efficiency collect",
        ],
        GameId::Tesseract => &["edit", "rdm", "pdm", "rtdm", "ptdm", "rctf", "pctf"],
        GameId::RedEclipse => &[
            "demo",
            "editing",
            "deathmatch",
            "capture-the-flag",
            "defend-and-control",
            "bomber-ball",
            "race",
        ],
        GameId::AssaultCube => &[
            "team deathmatch",
            "coop edit",
            "deathmatch",
            "survivor",
            "team survivor",
            "ctf",
            "pistol frenzy",
            "bot team deathmatch",
            "bot deathmatch",
            "last swiss standing",
            "one shot, one kill",
            "team one shot, one kill",
            "bot one shot, one kill",
            "hunt the flag",
            "team keep the flag",
            "keep the flag",
        ],
    };
    lookup(table, mode).unwrap_or(UNKNOWN)
}

/// Mode-name fragments that indicate team play. Only known for Sauerbraten.
pub fn team_mode_tokens(game: GameId) -> Option<&'static [&'static str]> {
    match game {
        GameId::Sauerbraten => Some(&["team", "capture", "ctf", "protect", "hold", "collect"]),
        _ => None,
    }
}

pub fn master_mode_name(game: GameId, mode: i32) -> &'static str {
    let name = match game {
        GameId::Sauerbraten | GameId::Tesseract => lookup(
            &["auth", "open", "veto", "locked", "private", "password"],
            mode.saturating_add(1),
        ),
        GameId::RedEclipse => lookup(&["open", "veto", "locked", "private", "password"], mode),
        GameId::AssaultCube => lookup(&["open", "private", "match"], mode),
    };
    name.unwrap_or(UNKNOWN)
}

/// Release name for a protocol version, or the bare number when unknown.
pub fn release_name(game: GameId, protocol: i32) -> String {
    let name = match game {
        GameId::Sauerbraten => lookup(
            &["summer", "assassin", "ctf", "trooper", "justice"],
            protocol.saturating_sub(255),
        ),
        GameId::Tesseract => lookup(&["first", "second"], protocol.saturating_sub(1)),
        GameId::RedEclipse => lookup(
            &["ides", "supernova", "cosmic", "elara", "aurora"],
            protocol.saturating_sub(222),
        ),
        GameId::AssaultCube => None,
    };
    match name {
        Some(name) => name.to_string(),
        None => protocol.to_string(),
    }
}

pub fn server_mod_name(game: GameId, server_mod: Option<ServerMod>) -> &'static str {
    let Some(server_mod) = server_mod else {
        return UNKNOWN;
    };
    match game {
        GameId::Sauerbraten => lookup(
            &[
                "hopmod",
                "oo|mod",
                "spaghettimod",
                "suckerserv",
                "remod",
                "noobmod",
                "zeromod",
            ],
            -server_mod.wire_id() - 2,
        )
        .unwrap_or(UNKNOWN),
        _ => UNKNOWN,
    }
}
