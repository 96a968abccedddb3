//! Message channels between linked peers

pub mod config;
pub mod endpoint;
pub mod message;
pub mod stats;

pub use config::ChannelConfig;
pub use endpoint::MessageChannel;
pub use message::{GroupRole, Message, MsgFlags};
pub use stats::{ChannelStats, ChannelStatsSnapshot};
