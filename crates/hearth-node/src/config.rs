//! Node configuration

use std::path::PathBuf;
use std::time::Duration;

/// The role a node plays in the network
///
/// Exactly one root peer is expected per deployment; every other node
/// runs as an ordinary peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Durable store: accepts room registrations, stores ciphertext,
    /// serves sync requests
    Root,
    /// Regular chat participant: relays live messages, pulls history
    Ordinary,
}

/// Configuration for a [`HearthNode`](crate::HearthNode)
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Role this node plays
    pub role: NodeRole,
    /// Directory for the root's metadata snapshot (unused by ordinary peers)
    pub data_dir: PathBuf,
    /// Checkpoint the metadata snapshot every N stored messages
    pub checkpoint_interval: u64,
    /// Capacity of the node event broadcast channel
    pub event_channel_capacity: usize,
    /// How long sync waits for a root peer to appear before giving up
    pub root_wait: Duration,
}

impl NodeConfig {
    /// Configuration for a root peer storing under `data_dir`
    pub fn root(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            role: NodeRole::Root,
            data_dir: data_dir.into(),
            checkpoint_interval: 10,
            event_channel_capacity: 1024,
            root_wait: Duration::from_secs(10),
        }
    }

    /// Configuration for an ordinary peer
    pub fn ordinary() -> Self {
        Self {
            role: NodeRole::Ordinary,
            data_dir: PathBuf::from("./hearth-data"),
            checkpoint_interval: 10,
            event_channel_capacity: 1024,
            root_wait: Duration::from_secs(10),
        }
    }

    /// Override the checkpoint interval
    pub fn with_checkpoint_interval(mut self, every: u64) -> Self {
        self.checkpoint_interval = every;
        self
    }

    /// Override how long to wait for a root peer
    pub fn with_root_wait(mut self, wait: Duration) -> Self {
        self.root_wait = wait;
        self
    }
}
