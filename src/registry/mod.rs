//! Peer registry: slot allocation, linking and teardown

pub mod config;
pub mod peers;

pub use config::RegistryConfig;
pub use peers::{PeerInfo, PeerRegistry};
