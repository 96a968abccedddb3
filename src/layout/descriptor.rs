//! Arena descriptor serialized into the registry header

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::{
    error::{HugelinkError, Result},
    layout::{constants::DESCRIPTOR_AREA_SIZE, headers::PeerRole},
};

/// What the creator recorded about the arena so an attaching peer can
/// rebuild the same view without out-of-band configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaDescriptor {
    pub name: String,
    pub arena_id: u16,
    pub page_size: u64,
    pub arena_offset: u64,
    pub arena_size: u64,
    /// Bytes at the start of the arena reserved for the master's allocator
    pub master_memory: u64,
    /// Bytes following the master partition reserved for the slave
    pub slave_memory: u64,
    pub creator_pid: u32,
    pub library_version: u32,
    pub created_at: SystemTime,
}

impl ArenaDescriptor {
    /// Check the partition split against the arena
    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two() {
            return Err(HugelinkError::invalid_parameter(
                "page_size",
                format!("{} is not a power of two", self.page_size),
            ));
        }
        let requested = self.master_memory.saturating_add(self.slave_memory);
        if requested > self.arena_size {
            return Err(HugelinkError::invalid_parameter(
                "master_memory",
                format!(
                    "partitions need {} bytes but the arena holds {}",
                    requested, self.arena_size
                ),
            ));
        }
        if self.master_memory % self.page_size != 0 || self.slave_memory % self.page_size != 0 {
            return Err(HugelinkError::invalid_parameter(
                "slave_memory",
                "partition sizes must be whole pages",
            ));
        }
        Ok(())
    }

    /// `(offset, len)` of a role's partition relative to the arena start.
    ///
    /// With no split configured the whole arena belongs to the master.
    pub fn partition(&self, role: PeerRole) -> (u64, u64) {
        if self.master_memory == 0 && self.slave_memory == 0 {
            return match role {
                PeerRole::Master => (0, self.arena_size),
                PeerRole::Slave => (self.arena_size, 0),
            };
        }
        match role {
            PeerRole::Master => (0, self.master_memory),
            PeerRole::Slave => (self.master_memory, self.slave_memory),
        }
    }

    pub fn page_shift(&self) -> u32 {
        self.page_size.trailing_zeros()
    }

    /// Serialize into the fixed header area
    pub fn encode(&self) -> Result<Vec<u8>> {
        let bytes = bincode::serialize(self)?;
        if bytes.len() > DESCRIPTOR_AREA_SIZE {
            return Err(HugelinkError::serialization(format!(
                "descriptor needs {} bytes, area holds {}",
                bytes.len(),
                DESCRIPTOR_AREA_SIZE
            )));
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ArenaDescriptor {
        ArenaDescriptor {
            name: "unit".to_string(),
            arena_id: 1,
            page_size: 64 * 1024,
            arena_offset: 256 * 1024,
            arena_size: 16 * 64 * 1024,
            master_memory: 8 * 64 * 1024,
            slave_memory: 4 * 64 * 1024,
            creator_pid: 42,
            library_version: crate::LIBRARY_VERSION,
            created_at: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_encode_decode() {
        let desc = descriptor();
        let bytes = desc.encode().unwrap();
        assert!(bytes.len() <= DESCRIPTOR_AREA_SIZE);
        assert_eq!(ArenaDescriptor::decode(&bytes).unwrap(), desc);
    }

    #[test]
    fn test_partitions() {
        let desc = descriptor();
        assert!(desc.validate().is_ok());
        assert_eq!(desc.partition(PeerRole::Master), (0, 8 * 64 * 1024));
        assert_eq!(
            desc.partition(PeerRole::Slave),
            (8 * 64 * 1024, 4 * 64 * 1024)
        );

        let whole = ArenaDescriptor {
            master_memory: 0,
            slave_memory: 0,
            ..descriptor()
        };
        assert_eq!(whole.partition(PeerRole::Master), (0, whole.arena_size));
        assert_eq!(whole.partition(PeerRole::Slave).1, 0);
    }

    #[test]
    fn test_rejects_oversized_split() {
        let desc = ArenaDescriptor {
            slave_memory: 12 * 64 * 1024,
            ..descriptor()
        };
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_rejects_long_name() {
        let desc = ArenaDescriptor {
            name: "x".repeat(DESCRIPTOR_AREA_SIZE),
            ..descriptor()
        };
        assert!(matches!(
            desc.encode(),
            Err(HugelinkError::Serialization { .. })
        ));
    }
}
