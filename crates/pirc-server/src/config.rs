use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};

pub const DEFAULT_LOG_FILTER: &str = "pirc=debug,pirc_server=debug,pirc_gateway=debug,pirc_api=debug,tower_http=debug";

const DEFAULT_SEED_CHANNELS: &str = "#general,#random,#help";

/// Topics for the channels seeded on an empty store.
const KNOWN_TOPICS: &[(&str, &str)] = &[
    ("#general", "General chat for everyone"),
    ("#random", "Random discussions"),
    ("#help", "Need help? Ask here."),
];

/// Server settings, read from the environment (and `.env` if present).
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub seed_channels: Vec<(String, Option<String>)>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let host = lookup("PIRC_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = match lookup("PIRC_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("PIRC_PORT is not a valid port: {:?}", raw))?,
            None => 5000,
        };
        let db_path = lookup("PIRC_DB_PATH").unwrap_or_else(|| "pirc.db".into()).into();
        let seeds = lookup("PIRC_SEED_CHANNELS").unwrap_or_else(|| DEFAULT_SEED_CHANNELS.into());

        Ok(Self {
            host,
            port,
            db_path,
            seed_channels: parse_seeds(&seeds),
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn parse_seeds(raw: &str) -> Vec<(String, Option<String>)> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            let topic = KNOWN_TOPICS
                .iter()
                .find(|(known, _)| *known == name)
                .map(|(_, topic)| topic.to_string());
            (name.to_string(), topic)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let defaults = config(&[]).unwrap();
        assert_eq!(defaults.port, 5000);
        assert_eq!(defaults.db_path, PathBuf::from("pirc.db"));
        assert_eq!(defaults.seed_channels.len(), 3);
        assert_eq!(
            defaults.seed_channels[0],
            ("#general".to_string(), Some("General chat for everyone".to_string()))
        );
        assert!(defaults.addr().is_ok());
    }

    #[test]
    fn overrides_and_empty_seed_list() {
        let custom = config(&[
            ("PIRC_HOST", "127.0.0.1"),
            ("PIRC_PORT", "6667"),
            ("PIRC_SEED_CHANNELS", " #lobby , ,"),
        ])
        .unwrap();
        assert_eq!(custom.addr().unwrap().port(), 6667);
        assert_eq!(custom.seed_channels, vec![("#lobby".to_string(), None)]);

        let none = config(&[("PIRC_SEED_CHANNELS", "")]).unwrap();
        assert!(none.seed_channels.is_empty());
    }

    #[test]
    fn bad_port_is_an_error() {
        assert!(config(&[("PIRC_PORT", "sixty")]).is_err());
    }
}
