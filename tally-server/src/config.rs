//! Server configuration from the environment.
//!
//! | variable | field | default |
//! |---|---|---|
//! | `TALLY_BIND_ADDR` | `bind_addr` | `127.0.0.1:9090` |
//! | `TALLY_OUTBOX_CAPACITY` | `outbox_capacity` | `256` |
//! | `TALLY_IDLE_ROOM_TTL_SECS` | `idle_room_ttl_secs` | unset (never evict) |
//! | `TALLY_SWEEP_INTERVAL_SECS` | `sweep_interval_secs` | `60` |

use std::str::FromStr;

use tally_relay::ServerConfig;

pub const BIND_ADDR: &str = "TALLY_BIND_ADDR";
pub const OUTBOX_CAPACITY: &str = "TALLY_OUTBOX_CAPACITY";
pub const IDLE_ROOM_TTL_SECS: &str = "TALLY_IDLE_ROOM_TTL_SECS";
pub const SWEEP_INTERVAL_SECS: &str = "TALLY_SWEEP_INTERVAL_SECS";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: cannot parse '{value}'")]
    Invalid { var: &'static str, value: String },
}

/// Overlay environment variables on the defaults.
pub fn from_env() -> Result<ServerConfig, ConfigError> {
    from_lookup(|var| std::env::var(var).ok())
}

/// Build a config from any variable source.
pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<ServerConfig, ConfigError> {
    let mut config = ServerConfig::default();
    if let Some(addr) = lookup(BIND_ADDR).filter(|a| !a.trim().is_empty()) {
        config.bind_addr = addr;
    }
    if let Some(capacity) = parse(&lookup, OUTBOX_CAPACITY)? {
        config.outbox_capacity = capacity;
    }
    if let Some(ttl) = parse(&lookup, IDLE_ROOM_TTL_SECS)? {
        config.idle_room_ttl_secs = Some(ttl);
    }
    if let Some(interval) = parse(&lookup, SWEEP_INTERVAL_SECS)? {
        config.sweep_interval_secs = interval;
    }
    Ok(config)
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        assert_eq!(from_lookup(lookup(&[])).unwrap(), ServerConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = from_lookup(lookup(&[
            (BIND_ADDR, "0.0.0.0:8080"),
            (OUTBOX_CAPACITY, "32"),
            (IDLE_ROOM_TTL_SECS, " 600 "),
            (SWEEP_INTERVAL_SECS, "15"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.outbox_capacity, 32);
        assert_eq!(config.idle_room_ttl_secs, Some(600));
        assert_eq!(config.sweep_interval_secs, 15);
    }

    #[test]
    fn test_invalid_number() {
        let err = from_lookup(lookup(&[(OUTBOX_CAPACITY, "lots")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: OUTBOX_CAPACITY,
                value: "lots".into()
            }
        );
    }
}
