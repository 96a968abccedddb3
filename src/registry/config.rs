//! Configuration for creating a peer registry

use crate::{
    error::{HugelinkError, Result},
    memory::RegionConfig,
};

/// Parameters fixed by the process that creates the registry region
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Backing region for header and arena
    pub region: RegionConfig,
    /// High 16 bits of every arena reference; 0 is reserved
    pub arena_id: u16,
    /// Bytes of the arena reserved for the master's block pool
    pub master_memory: u64,
    /// Bytes of the arena reserved for the slave
    pub slave_memory: u64,
}

impl RegistryConfig {
    pub fn new(region: RegionConfig) -> Self {
        Self {
            region,
            arena_id: 1,
            master_memory: 0,
            slave_memory: 0,
        }
    }

    pub fn with_arena_id(mut self, arena_id: u16) -> Self {
        self.arena_id = arena_id;
        self
    }

    /// Split the arena between the two roles
    pub fn with_memory_split(mut self, master_memory: u64, slave_memory: u64) -> Self {
        self.master_memory = master_memory;
        self.slave_memory = slave_memory;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.region.validate()?;
        if !self.region.create {
            return Err(HugelinkError::invalid_parameter(
                "create",
                "registry creation needs a region config with create enabled",
            ));
        }
        if self.arena_id == 0 {
            return Err(HugelinkError::invalid_parameter(
                "arena_id",
                "arena id 0 is reserved for the null reference",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_config_validation() {
        let region = RegionConfig::new("cfg", 4 * 1024 * 1024);
        assert!(RegistryConfig::new(region.clone()).validate().is_ok());
        assert!(RegistryConfig::new(region.clone())
            .with_arena_id(0)
            .validate()
            .is_err());
        assert!(RegistryConfig::new(region.with_create(false).with_file_path("/tmp/x"))
            .validate()
            .is_err());
    }
}
