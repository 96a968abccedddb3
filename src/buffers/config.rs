//! Block pool configuration

use crate::layout::constants::DMA_ALIGNMENT;

/// Configuration for carving a partition into fixed-size blocks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPoolConfig {
    /// Size of each block in bytes
    pub block_size: usize,
    /// Alignment of each block's start address
    pub alignment: usize,
    /// Upper bound on carved blocks; the whole partition when `None`
    pub max_blocks: Option<usize>,
}

impl Default for BlockPoolConfig {
    fn default() -> Self {
        Self {
            block_size: 16 * 1024,
            alignment: DMA_ALIGNMENT,
            max_blocks: None,
        }
    }
}

impl BlockPoolConfig {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            ..Default::default()
        }
    }

    /// Set block alignment
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    /// Cap the number of blocks
    pub fn with_max_blocks(mut self, max_blocks: usize) -> Self {
        self.max_blocks = Some(max_blocks);
        self
    }

    /// Distance between consecutive block starts
    pub fn stride(&self) -> usize {
        (self.block_size + self.alignment - 1) & !(self.alignment - 1)
    }

    /// Validate the configuration against the arena page size
    pub fn validate(&self, page_size: usize) -> crate::error::Result<()> {
        use crate::error::HugelinkError;

        if self.block_size == 0 {
            return Err(HugelinkError::invalid_parameter(
                "block_size",
                "Block size cannot be zero",
            ));
        }

        if !self.alignment.is_power_of_two() {
            return Err(HugelinkError::invalid_parameter(
                "alignment",
                "Alignment must be a power of two",
            ));
        }

        if self.block_size > page_size {
            return Err(HugelinkError::invalid_parameter(
                "block_size",
                format!(
                    "Block size {} exceeds the {}-byte page",
                    self.block_size, page_size
                ),
            ));
        }

        if self.max_blocks == Some(0) {
            return Err(HugelinkError::invalid_parameter(
                "max_blocks",
                "Max blocks cannot be zero",
            ));
        }

        Ok(())
    }
}
