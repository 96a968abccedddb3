//! A block of arena memory as seen by this process

use std::{ptr::NonNull, slice};

use crate::{
    addr::BlockRef,
    error::{HugelinkError, Result},
};

/// Local handle on one block: where it is mapped here and how the peer names it.
///
/// Ownership follows the hand-off protocol, not Rust lifetimes: whoever holds
/// the reference may touch the bytes until it passes the reference on.
#[derive(Debug)]
pub struct Block {
    data: NonNull<u8>,
    block_ref: BlockRef,
    capacity: usize,
}

unsafe impl Send for Block {}

impl Block {
    pub(crate) fn new(data: NonNull<u8>, block_ref: BlockRef, capacity: usize) -> Self {
        Self {
            data,
            block_ref,
            capacity,
        }
    }

    /// Shared reference to pass in a message
    pub fn block_ref(&self) -> BlockRef {
        self.block_ref
    }

    /// Get a raw pointer to the block data
    pub fn as_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }

    /// Get a mutable raw pointer to the block data
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.data.as_ptr()
    }

    /// Bytes usable without leaving the block's page
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.data.as_ptr(), self.capacity) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.data.as_ptr(), self.capacity) }
    }

    /// Copy `data` to the start of the block
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        if data.len() > self.capacity {
            return Err(HugelinkError::validation(format!(
                "{} bytes do not fit in a {}-byte block",
                data.len(),
                self.capacity
            )));
        }
        self.as_mut_slice()[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }
}
