// src/models/player.rs
use serde::Serialize;
use std::net::Ipv4Addr;

use crate::geoip::Country;
use crate::protocol::game::UNKNOWN;
use crate::protocol::ServerMod;

/// Mod-specific statistics. Each field is only present if the mod sent it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlayerExt {
    pub server_mod: Option<ServerMod>,
    pub suicides: Option<i32>,
    pub shot_damage: Option<i32>,
    pub damage: Option<i32>,
    pub explosive_damage: Option<i32>,
    pub hits: Option<i32>,
    pub misses: Option<i32>,
    pub shots: Option<i32>,
    pub captured: Option<i32>,
    pub stolen: Option<i32>,
    pub defended: Option<i32>,
    pub country_code: Option<String>,
    pub session_id: Option<i32>,
}

/// Bookkeeping owned by the monitor, kept across updates from the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LocalInfo {
    /// `None` when the player was already connected before we started
    /// watching the server.
    pub connect_time: Option<u64>,
    pub last_update: u64,
    pub session_id: u64,
    pub country: Option<Country>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Player {
    pub cn: i32,
    pub ping: i32,
    pub name: String,
    pub team: String,
    pub frags: i32,
    pub flags: i32,
    pub deaths: i32,
    pub teamkills: i32,
    pub accuracy: i32,
    pub health: i32,
    pub armour: i32,
    pub gun: i32,
    pub privilege: i32,
    pub state: i32,
    /// Last octet is always zero.
    pub ip: [u8; 4],
    pub ext: Option<PlayerExt>,
    pub local: LocalInfo,
    #[serde(skip)]
    pub marked_for_deletion: bool,
}

impl Player {
    pub fn name(&self) -> &str {
        if self.name.is_empty() {
            UNKNOWN
        } else {
            &self.name
        }
    }

    pub fn team(&self) -> &str {
        if self.team.is_empty() {
            UNKNOWN
        } else {
            &self.team
        }
    }

    pub fn ip_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.ip)
    }

    pub fn has_ip(&self) -> bool {
        self.ip != [0; 4]
    }

    pub fn is_bot(&self) -> bool {
        self.cn >= 128
    }

    pub fn ext_session_id(&self) -> Option<i32> {
        self.ext.as_ref().and_then(|ext| ext.session_id)
    }

    /// Milliseconds since the player connected, if known.
    pub fn online_time(&self, now: u64) -> Option<u64> {
        self.local.connect_time.map(|t| now.saturating_sub(t))
    }

    pub fn country(&self, code: bool) -> &str {
        match &self.local.country {
            Some(c) if code => &c.code,
            Some(c) => &c.name,
            None => UNKNOWN,
        }
    }

    /// Overwrites the wire state with `fresh`, keeping local bookkeeping.
    pub fn update(&mut self, fresh: Player) {
        let mut local = std::mem::take(&mut self.local);
        local.last_update = fresh.local.last_update;
        *self = fresh;
        self.local = local;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_for_empty_strings() {
        let p = Player::default();
        assert_eq!(p.name(), UNKNOWN);
        assert_eq!(p.team(), UNKNOWN);
        assert_eq!(p.country(true), UNKNOWN);
        assert_eq!(p.online_time(10), None);
    }

    #[test]
    fn test_bot_detection() {
        let mut p = Player::default();
        p.cn = 127;
        assert!(!p.is_bot());
        p.cn = 128;
        assert!(p.is_bot());
    }

    #[test]
    fn test_update_keeps_local_info() {
        let mut old = Player {
            cn: 3,
            name: "old".into(),
            frags: 1,
            local: LocalInfo {
                connect_time: Some(100),
                last_update: 100,
                session_id: 42,
                country: Some(Country {
                    code: "DE".into(),
                    name: "Germany".into(),
                }),
            },
            ..Default::default()
        };
        let fresh = Player {
            cn: 3,
            name: "new".into(),
            frags: 9,
            local: LocalInfo {
                connect_time: Some(900),
                last_update: 900,
                ..Default::default()
            },
            marked_for_deletion: false,
            ..Default::default()
        };
        old.marked_for_deletion = true;

        old.update(fresh);
        assert_eq!(old.name, "new");
        assert_eq!(old.frags, 9);
        assert_eq!(old.local.connect_time, Some(100));
        assert_eq!(old.local.last_update, 900);
        assert_eq!(old.local.session_id, 42);
        assert_eq!(old.country(true), "DE");
        assert!(!old.marked_for_deletion);
        assert_eq!(old.online_time(150), Some(50));
    }
}
