//! Peer topology configuration for the parallel driver.
//!
//! Resolves the "launcher provides rank and size" requirement (spec §6) in
//! the absence of an MPI-equivalent crate in this ecosystem: every rank's
//! listen address is listed in a TOML file, and the process count is simply
//! the length of that list. Grounded on the teacher's `src/config.rs`
//! (`#[serde(default = "...")]` field pattern, `toml::from_str` +
//! `anyhow::Context` loading), generalized from probe-source entries to
//! peer addresses.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct PeersConfig {
    pub peers: Vec<PeerEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeerEntry {
    pub rank: u32,
    pub address: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl PeersConfig {
    pub fn size(&self) -> usize {
        self.peers.len()
    }

    /// Addresses indexed by rank, in rank order. Errors are the caller's
    /// concern (parse failures surface through `toml::from_str` directly at
    /// the CLI boundary via `anyhow::Context`).
    pub fn addresses_by_rank(&self) -> Vec<String> {
        let mut sorted = self.peers.clone();
        sorted.sort_by_key(|p| p.rank);
        sorted.into_iter().map(|p| p.address).collect()
    }

    pub fn example() -> Self {
        PeersConfig {
            peers: vec![
                PeerEntry {
                    rank: 0,
                    address: "127.0.0.1:9000".into(),
                    enabled: true,
                },
                PeerEntry {
                    rank: 1,
                    address: "127.0.0.1:9001".into(),
                    enabled: true,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_peers_toml() {
        let text = r#"
            [[peers]]
            rank = 1
            address = "10.0.0.2:9001"

            [[peers]]
            rank = 0
            address = "10.0.0.1:9000"
        "#;
        let config: PeersConfig = toml::from_str(text).unwrap();
        assert_eq!(config.size(), 2);
        assert_eq!(config.addresses_by_rank(), vec!["10.0.0.1:9000", "10.0.0.2:9001"]);
    }

    #[test]
    fn enabled_defaults_true() {
        let text = r#"
            [[peers]]
            rank = 0
            address = "10.0.0.1:9000"
        "#;
        let config: PeersConfig = toml::from_str(text).unwrap();
        assert!(config.peers[0].enabled);
    }
}
