// src/geoip.rs
use serde::Serialize;
use std::collections::HashMap;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Country {
    pub code: String,
    pub name: String,
}

/// Country lookup by address or by two-letter code.
pub trait CountryResolver: Send + Sync {
    fn by_ip(&self, ip: Ipv4Addr) -> Option<Country>;
    fn by_code(&self, code: &str) -> Option<Country>;
}

/// Resolver used when no GeoIP database is configured.
pub struct NoGeoIp;

impl CountryResolver for NoGeoIp {
    fn by_ip(&self, _ip: Ipv4Addr) -> Option<Country> {
        None
    }

    fn by_code(&self, _code: &str) -> Option<Country> {
        None
    }
}

/// In-memory resolver over a list of IPv4 networks.
#[derive(Default)]
pub struct StaticResolver {
    networks: Vec<(u32, u32, String)>,
    names: HashMap<String, String>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_country(mut self, code: &str, name: &str) -> Self {
        self.names.insert(code.to_ascii_uppercase(), name.to_string());
        self
    }

    pub fn with_network(mut self, network: Ipv4Addr, prefix_len: u8, code: &str) -> Self {
        let mask = match prefix_len {
            0 => 0,
            n => u32::MAX << (32 - u32::from(n.min(32))),
        };
        self.networks
            .push((u32::from(network) & mask, mask, code.to_ascii_uppercase()));
        self
    }
}

impl CountryResolver for StaticResolver {
    fn by_ip(&self, ip: Ipv4Addr) -> Option<Country> {
        let ip = u32::from(ip);
        let (_, _, code) = self
            .networks
            .iter()
            .filter(|(net, mask, _)| ip & mask == *net)
            .max_by_key(|(_, mask, _)| mask.count_ones())?;
        self.by_code(code)
    }

    fn by_code(&self, code: &str) -> Option<Country> {
        let code = code.to_ascii_uppercase();
        self.names.get(&code).map(|name| Country {
            code,
            name: name.clone(),
        })
    }
}
