//! Block pool statistics

/// Statistics for a local block pool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockPoolStats {
    /// Blocks carved from the partition
    pub total_blocks: usize,
    /// Blocks currently handed out
    pub currently_in_use: usize,
    /// Peak number of blocks handed out simultaneously
    pub peak_usage: usize,
    /// Successful allocations
    pub total_allocations: u64,
    /// Blocks returned
    pub total_releases: u64,
    /// Allocations that found the pool empty
    pub allocation_failures: u64,
}

impl BlockPoolStats {
    /// Calculate pool utilization (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.total_blocks == 0 {
            return 0.0;
        }
        self.currently_in_use as f64 / self.total_blocks as f64
    }

    /// Get a summary string of the statistics
    pub fn summary(&self) -> String {
        format!(
            "BlockPoolStats {{ blocks: {}, in_use: {}, peak: {}, allocs: {}, releases: {}, failures: {} }}",
            self.total_blocks,
            self.currently_in_use,
            self.peak_usage,
            self.total_allocations,
            self.total_releases,
            self.allocation_failures
        )
    }
}
