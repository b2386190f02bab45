// src/search.rs
//! Player search predicates.
//!
//! Predicates are parsed from user supplied text such as `"cc foo"` or
//! `">= 10"`; the operator prefix is optional.

use crate::models::{Player, Server};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrOp {
    Equal,
    NotEqual,
    Contains,
    NotContains,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrCmp {
    op: StrOp,
    case_sensitive: bool,
    value: String,
}

impl Default for StrCmp {
    fn default() -> Self {
        Self {
            op: StrOp::Contains,
            case_sensitive: false,
            value: String::new(),
        }
    }
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
    {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

impl StrCmp {
    pub fn new(op: StrOp, case_sensitive: bool, value: &str) -> Self {
        Self {
            op,
            case_sensitive,
            value: value.to_string(),
        }
    }

    /// Parses an optional operator followed by the value.
    pub fn parse(pattern: &str) -> Self {
        use StrOp::*;

        let s = pattern.trim_start_matches(' ');
        let (op, case_sensitive, rest) = if let Some(r) = s.strip_prefix("==") {
            (Equal, true, r)
        } else if let Some(r) = s.strip_prefix("cnc") {
            (NotContains, false, r)
        } else if let Some(r) = s.strip_prefix("cc") {
            (Contains, false, r)
        } else if let Some(r) = s.strip_prefix("!==") {
            (NotEqual, false, r)
        } else if let Some(r) = s.strip_prefix("!=") {
            (NotContains, false, r)
        } else if let Some(r) = strip_prefix_ci(s, "eqc") {
            (Equal, false, r)
        } else if let Some(r) = strip_prefix_ci(s, "eq") {
            (Equal, false, r)
        } else if let Some(r) = strip_prefix_ci(s, "nec") {
            (NotEqual, false, r)
        } else if let Some(r) = strip_prefix_ci(s, "ne") {
            (NotEqual, true, r)
        } else if let Some(r) = s.strip_prefix("cn") {
            (NotContains, true, r)
        } else if let Some(r) = s.strip_prefix(&['c', 'C'][..]) {
            (Contains, true, r)
        } else if let Some(r) = s.strip_prefix('=') {
            (Contains, false, r)
        } else {
            (Contains, false, s)
        };

        Self::new(op, case_sensitive, rest.trim_start_matches(' '))
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// An empty value matches everything.
    pub fn matches(&self, input: &str) -> bool {
        if self.value.is_empty() {
            return true;
        }

        let (haystack, needle) = if self.case_sensitive {
            (input.to_string(), self.value.clone())
        } else {
            (input.to_ascii_lowercase(), self.value.to_ascii_lowercase())
        };

        match self.op {
            StrOp::Equal => haystack == needle,
            StrOp::NotEqual => haystack != needle,
            StrOp::Contains => haystack.contains(&needle),
            StrOp::NotContains => !haystack.contains(&needle),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntOp {
    Greater,
    GreaterEqual,
    Lower,
    LowerEqual,
    Equal,
    NotEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntCmp {
    op: IntOp,
    value: i32,
}

/// Matches every value.
impl Default for IntCmp {
    fn default() -> Self {
        Self {
            op: IntOp::GreaterEqual,
            value: i32::MIN,
        }
    }
}

/// Leading integer of `s`, 0 if there is none.
fn leading_int(s: &str) -> i32 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let end = digits
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len());
    let value = digits[..end].parse::<i64>().unwrap_or(0);
    let value = if negative { -value } else { value };
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

impl IntCmp {
    pub fn new(op: IntOp, value: i32) -> Self {
        Self { op, value }
    }

    pub fn parse(pattern: &str) -> Self {
        use IntOp::*;

        let s = pattern.trim_start_matches(' ');
        let (op, rest) = if let Some(r) = s.strip_prefix(">=") {
            (GreaterEqual, r)
        } else if let Some(r) = s.strip_prefix("<=") {
            (LowerEqual, r)
        } else if let Some(r) = s.strip_prefix("!=") {
            (NotEqual, r)
        } else if let Some(r) = s.strip_prefix("==") {
            (Equal, r)
        } else if let Some(r) = s.strip_prefix('>') {
            (Greater, r)
        } else if let Some(r) = s.strip_prefix('<') {
            (Lower, r)
        } else if let Some(r) = s.strip_prefix('=') {
            (Equal, r)
        } else {
            (GreaterEqual, s)
        };

        Self::new(op, leading_int(rest))
    }

    pub fn matches(&self, input: i32) -> bool {
        match self.op {
            IntOp::Greater => input > self.value,
            IntOp::GreaterEqual => input >= self.value,
            IntOp::Lower => input < self.value,
            IntOp::LowerEqual => input <= self.value,
            IntOp::Equal => input == self.value,
            IntOp::NotEqual => input != self.value,
        }
    }
}

/// Criteria of a player search. Unset criteria match every player.
#[derive(Debug, Clone, Default)]
pub struct FindPlayer {
    pub country: Option<StrCmp>,
    pub name: StrCmp,
    pub cn: IntCmp,
    pub frags: IntCmp,
    pub deaths: IntCmp,
    pub accuracy: IntCmp,
}

impl FindPlayer {
    pub fn matches(&self, player: &Player) -> bool {
        if !self.cn.matches(player.cn)
            || !self.frags.matches(player.frags)
            || !self.deaths.matches(player.deaths)
            || !self.accuracy.matches(player.accuracy)
        {
            return false;
        }

        if let Some(country) = &self.country {
            // two letters or less compare against the code
            let by_code = country.value().len() <= 2;
            if !country.matches(player.country(by_code)) {
                return false;
            }
        }

        self.name.matches(player.name())
    }
}

/// Calls `found` for every matching player of every valid server, in roster
/// order.
pub fn find_players<F>(servers: &[Server], query: &FindPlayer, mut found: F) -> usize
where
    F: FnMut(&Server, &Player),
{
    let mut count = 0;
    for server in servers.iter().filter(|s| s.info_ok) {
        for player in server.players.iter().filter(|p| query.matches(p)) {
            found(server, player);
            count += 1;
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geoip::Country;
    use crate::protocol::GameId;
    use std::net::{Ipv4Addr, SocketAddrV4};

    #[test]
    fn test_str_operator_parsing() {
        let cases = [
            ("== Foo", StrOp::Equal, true, "Foo"),
            ("cnc foo", StrOp::NotContains, false, "foo"),
            ("cc foo", StrOp::Contains, false, "foo"),
            ("!== foo", StrOp::NotEqual, false, "foo"),
            ("!= foo", StrOp::NotContains, false, "foo"),
            ("EQC foo", StrOp::Equal, false, "foo"),
            ("eq foo", StrOp::Equal, false, "foo"),
            ("nec foo", StrOp::NotEqual, false, "foo"),
            ("ne foo", StrOp::NotEqual, true, "foo"),
            ("cn foo", StrOp::NotContains, true, "foo"),
            ("C foo", StrOp::Contains, true, "foo"),
            ("= foo", StrOp::Contains, false, "foo"),
            ("  foo", StrOp::Contains, false, "foo"),
        ];
        for (pattern, op, case_sensitive, value) in cases {
            assert_eq!(
                StrCmp::parse(pattern),
                StrCmp::new(op, case_sensitive, value),
                "{}",
                pattern
            );
        }
    }

    #[test]
    fn test_str_matching() {
        assert!(StrCmp::parse("== Bob").matches("Bob"));
        assert!(!StrCmp::parse("== Bob").matches("bob"));
        assert!(StrCmp::parse("eq bob").matches("BOB"));
        assert!(StrCmp::parse("ne bob").matches("Bob"));
        assert!(!StrCmp::parse("nec bob").matches("Bob"));
        assert!(StrCmp::parse("ob").matches("BOB"));
        assert!(!StrCmp::parse("cn ob").matches("bob"));
        assert!(StrCmp::parse("cn ob").matches("BOB"));
        assert!(StrCmp::parse("").matches("anything"));
        assert!(StrCmp::parse("!=").matches("anything"));
    }

    #[test]
    fn test_int_operators() {
        assert!(IntCmp::default().matches(i32::MIN));
        assert!(IntCmp::parse("10").matches(10));
        assert!(!IntCmp::parse("10").matches(9));
        assert!(IntCmp::parse("> 10").matches(11));
        assert!(!IntCmp::parse(">10").matches(10));
        assert!(IntCmp::parse("<= -3").matches(-3));
        assert!(IntCmp::parse("< 0").matches(-1));
        assert!(IntCmp::parse("== 5").matches(5));
        assert!(IntCmp::parse("=5").matches(5));
        assert!(IntCmp::parse("!= 5").matches(4));
        assert!(!IntCmp::parse("!= 5").matches(5));
        assert_eq!(IntCmp::parse("= 12abc"), IntCmp::new(IntOp::Equal, 12));
    }

    fn player(cn: i32, name: &str, frags: i32, country: Option<(&str, &str)>) -> Player {
        let mut p = Player {
            cn,
            name: name.to_string(),
            frags,
            ..Default::default()
        };
        p.local.country = country.map(|(code, name)| Country {
            code: code.to_string(),
            name: name.to_string(),
        });
        p
    }

    fn roster() -> Vec<Server> {
        let mut a = Server::new(
            GameId::Sauerbraten,
            "a",
            SocketAddrV4::new(Ipv4Addr::new(1, 1, 1, 1), 28786),
            false,
        );
        a.info_ok = true;
        a.players = vec![
            player(0, "alice", 10, Some(("DE", "Germany"))),
            player(1, "bob", 3, Some(("US", "United States"))),
        ];

        let mut b = a.clone();
        b.addr = SocketAddrV4::new(Ipv4Addr::new(2, 2, 2, 2), 28786);
        b.players = vec![player(0, "alicia", 20, None)];

        let mut c = b.clone();
        c.addr = SocketAddrV4::new(Ipv4Addr::new(3, 3, 3, 3), 28786);
        c.info_ok = false;

        vec![a, b, c]
    }

    #[test]
    fn test_find_players_in_roster_order() {
        let servers = roster();
        let query = FindPlayer {
            name: StrCmp::parse("ali"),
            ..Default::default()
        };
        let mut found = Vec::new();
        let n = find_players(&servers, &query, |s, p| {
            found.push((s.ip().octets()[0], p.name.clone()))
        });
        assert_eq!(n, 2);
        assert_eq!(found, vec![(1, "alice".to_string()), (2, "alicia".to_string())]);
    }

    #[test]
    fn test_find_players_by_country_and_frags() {
        let servers = roster();

        let by_code = FindPlayer {
            country: Some(StrCmp::parse("eq de")),
            ..Default::default()
        };
        assert_eq!(find_players(&servers, &by_code, |_, _| {}), 1);

        let by_name = FindPlayer {
            country: Some(StrCmp::parse("united")),
            ..Default::default()
        };
        let mut names = Vec::new();
        find_players(&servers, &by_name, |_, p| names.push(p.name.clone()));
        assert_eq!(names, vec!["bob"]);

        let by_frags = FindPlayer {
            frags: IntCmp::parse(">= 10"),
            ..Default::default()
        };
        assert_eq!(find_players(&servers, &by_frags, |_, _| {}), 2);
    }
}
