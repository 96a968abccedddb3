//! `#[repr(C)]` structures stored in the shared region

use std::{
    cell::UnsafeCell,
    mem::{align_of, size_of},
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};

use crate::{
    addr::BlockAddressTable,
    error::{HugelinkError, Result},
    ringbuf::{RingQueue, SharedPod},
    sync::{SharedMutex, WaitChannel},
};

use super::constants::*;

/// Wire form of one message: a block reference plus its metadata
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageSlot {
    pub physical_ref: u64,
    pub size: u32,
    pub type_tag: u16,
    pub flags: u16,
}

unsafe impl SharedPod for MessageSlot {}

const _: () = assert!(size_of::<MessageSlot>() == 16);
const _: () = assert!(align_of::<MessageSlot>() == 8);

/// Lifecycle of a peer context slot
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerState {
    Free = 0,
    Registered = 1,
    Linked = 2,
}

impl PeerState {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(PeerState::Free),
            1 => Some(PeerState::Registered),
            2 => Some(PeerState::Linked),
            _ => None,
        }
    }
}

/// Which side of the link a context plays
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerRole {
    /// Consumer of blocks handed out by the master
    Slave = 0,
    /// Owner of the arena allocator; the only side that hands out blocks
    Master = 1,
}

impl PeerRole {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(PeerRole::Slave),
            1 => Some(PeerRole::Master),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PeerRole::Slave => "slave",
            PeerRole::Master => "master",
        }
    }
}

impl std::str::FromStr for PeerRole {
    type Err = HugelinkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "master" => Ok(PeerRole::Master),
            "slave" => Ok(PeerRole::Slave),
            other => Err(HugelinkError::invalid_parameter(
                "role",
                format!("unknown role '{}', expected master or slave", other),
            )),
        }
    }
}

/// Receive queue of a context; the peer is the only producer
pub type GetQueue = RingQueue<MessageSlot, GET_QUEUE_SLOTS>;
/// Staging queue of a context; private to the owner
pub type PutQueue = RingQueue<MessageSlot, PUT_QUEUE_SLOTS>;
/// Blocks handed to this context by its master
pub type FreeBlockQueue = RingQueue<u64, FREE_BLOCK_QUEUE_SLOTS>;

/// One slot of the registry: everything a single peer owns
#[repr(C)]
pub struct PeerContext {
    pub(crate) state: AtomicU32,
    pub(crate) role: AtomicU32,
    pub(crate) pid: AtomicU32,
    pub(crate) peer_slot: AtomicU32,
    pub(crate) is_waiting: AtomicU32,
    pub(crate) generation: AtomicU32,
    pub(crate) get_queue: GetQueue,
    pub(crate) put_queue: PutQueue,
    pub(crate) free_blocks: FreeBlockQueue,
    /// Written under the registry lock before the context becomes visible
    pub(crate) table: UnsafeCell<BlockAddressTable>,
    pub(crate) wait: WaitChannel,
}

unsafe impl Send for PeerContext {}
unsafe impl Sync for PeerContext {}

impl PeerContext {
    pub fn state(&self) -> Option<PeerState> {
        PeerState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn role(&self) -> Option<PeerRole> {
        PeerRole::from_raw(self.role.load(Ordering::Acquire))
    }

    pub fn pid(&self) -> u32 {
        self.pid.load(Ordering::Acquire)
    }

    /// Partner slot index when linked
    pub fn peer_slot(&self) -> Option<usize> {
        match self.peer_slot.load(Ordering::Acquire) {
            NO_PEER => None,
            slot => Some(slot as usize),
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.is_waiting.load(Ordering::SeqCst) != 0
    }

    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn get_queue(&self) -> &GetQueue {
        &self.get_queue
    }

    pub fn put_queue(&self) -> &PutQueue {
        &self.put_queue
    }

    pub fn free_blocks(&self) -> &FreeBlockQueue {
        &self.free_blocks
    }

    pub fn wait_channel(&self) -> &WaitChannel {
        &self.wait
    }

    /// Translation table of this context
    pub fn table(&self) -> &BlockAddressTable {
        // only replaced while the slot is Free and under the registry lock
        unsafe { &*self.table.get() }
    }

    /// Clear queues and flags before handing the slot to a new owner
    pub(crate) fn reset(&self) {
        self.get_queue.reset();
        self.put_queue.reset();
        self.free_blocks.reset();
        self.is_waiting.store(0, Ordering::SeqCst);
        self.peer_slot.store(NO_PEER, Ordering::Release);
        self.pid.store(0, Ordering::Release);
    }
}

/// Header at offset 0 of every registry region
#[repr(C)]
pub struct RegistryHeader {
    /// Written last when the region is initialized
    pub(crate) magic: AtomicU64,
    pub(crate) layout_version: u32,
    pub(crate) library_version: u32,
    pub(crate) region_size: u64,
    pub(crate) page_size: u64,
    pub(crate) arena_offset: u64,
    pub(crate) arena_size: u64,
    pub(crate) descriptor_len: u32,
    pub(crate) client_count: AtomicU32,
    pub(crate) lock: SharedMutex,
    pub(crate) descriptor: [u8; DESCRIPTOR_AREA_SIZE],
    pub(crate) peers: [PeerContext; MAX_PEERS],
}

impl RegistryHeader {
    /// Check magic and layout version written by the creator
    pub fn validate(&self) -> Result<()> {
        let magic = self.magic.load(Ordering::Acquire);
        if magic != HUGELINK_MAGIC {
            return Err(HugelinkError::invalid_parameter(
                "magic",
                format!("region is not an initialized registry (magic {:#x})", magic),
            ));
        }
        if self.layout_version != LAYOUT_VERSION {
            return Err(HugelinkError::version_mismatch(
                LAYOUT_VERSION as u64,
                self.layout_version as u64,
            ));
        }
        Ok(())
    }

    pub fn client_count(&self) -> u32 {
        self.client_count.load(Ordering::Acquire)
    }

    pub fn library_version(&self) -> u32 {
        self.library_version
    }

    pub fn peers(&self) -> &[PeerContext; MAX_PEERS] {
        &self.peers
    }

    /// Serialized descriptor bytes
    pub fn descriptor_bytes(&self) -> Result<&[u8]> {
        self.descriptor
            .get(..self.descriptor_len as usize)
            .ok_or_else(|| HugelinkError::serialization("descriptor length exceeds its area"))
    }
}

/// Offset of the arena: the header rounded up to whole pages
pub fn arena_offset(page_size: usize) -> usize {
    let header = size_of::<RegistryHeader>();
    (header + page_size - 1) & !(page_size - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_layout() {
        assert_eq!(size_of::<MessageSlot>(), 16);
        assert_eq!(align_of::<PeerContext>(), CACHE_LINE_SIZE);
        assert_eq!(size_of::<PeerContext>() % CACHE_LINE_SIZE, 0);
        assert!(size_of::<RegistryHeader>() > MAX_PEERS * size_of::<PeerContext>());
    }

    #[test]
    fn test_arena_offset_is_page_aligned() {
        for page in [4096usize, 64 * 1024, DEFAULT_PAGE_SIZE] {
            let offset = arena_offset(page);
            assert_eq!(offset % page, 0);
            assert!(offset >= size_of::<RegistryHeader>());
        }
    }

    #[test]
    fn test_enum_round_trips() {
        assert_eq!(PeerState::from_raw(2), Some(PeerState::Linked));
        assert_eq!(PeerState::from_raw(9), None);
        assert_eq!(PeerRole::from_raw(PeerRole::Master as u32), Some(PeerRole::Master));
        assert_eq!("Slave".parse::<PeerRole>().unwrap(), PeerRole::Slave);
        assert!("observer".parse::<PeerRole>().is_err());
    }
}
