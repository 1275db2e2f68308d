use std::net::Ipv4Addr;

const NETMON_PORT: &str = "NETMON_PORT";

const DEFAULT_PORT: u16 = 8000;

pub fn get_port() -> u16 {
    let port_from_env = std::env::var(NETMON_PORT);
    port_from_env.map_or(DEFAULT_PORT, |res| res.parse().unwrap_or(DEFAULT_PORT))
}

const NETMON_ADDR: &str = "NETMON_ADDR";

const DEFAULT_ADDR: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 0);

pub fn get_addr() -> Ipv4Addr {
    let addr_from_env = std::env::var(NETMON_ADDR);
    addr_from_env.map_or(DEFAULT_ADDR, |res| res.parse().unwrap_or(DEFAULT_ADDR))
}

const COLLECTION_INTERVAL_SECONDS: &str = "COLLECTION_INTERVAL_SECONDS";

/// Interval override from the environment, zero and garbage are ignored.
pub fn get_interval_override() -> Option<u64> {
    std::env::var(COLLECTION_INTERVAL_SECONDS)
        .ok()
        .and_then(|res| res.parse().ok())
        .filter(|secs| *secs > 0)
}
