//! Registry of peer contexts inside a shared region
//!
//! The creating process lays out a [`RegistryHeader`] at offset 0 of the
//! region and an arena after it. Any process mapping the same region can
//! attach, then register to claim a peer slot. Slots `2k` and `2k + 1` form a
//! link: when the second of the pair registers, both become `Linked` and can
//! exchange messages.

use std::{
    mem::size_of,
    process,
    ptr::{self, NonNull},
    sync::{atomic::Ordering, Arc},
    time::SystemTime,
};

use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    addr::{ArenaIovaResolver, ArenaView, BlockAddressTable, IovaResolver, PagemapResolver, ResolverKind},
    channel::{ChannelConfig, MessageChannel},
    error::{HugelinkError, Result},
    layout::{
        arena_offset, ArenaDescriptor, PeerContext, PeerRole, PeerState, RegistryHeader,
        HUGELINK_MAGIC, LAYOUT_VERSION, MAX_HUGE_PAGES, MAX_PEERS, NO_PEER,
    },
    memory::{RegionConfig, SharedMemoryRegion},
    LIBRARY_VERSION,
};

use super::config::RegistryConfig;

/// Snapshot of one peer slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerInfo {
    pub slot: usize,
    pub state: PeerState,
    pub role: Option<PeerRole>,
    pub pid: u32,
    pub peer_slot: Option<usize>,
    pub generation: u32,
    pub received: usize,
    pub staged: usize,
    pub free_blocks: usize,
    pub wakes_pending: u32,
    pub waiting: bool,
}

impl PeerInfo {
    fn capture(slot: usize, ctx: &PeerContext) -> Self {
        let state = ctx.state().unwrap_or(PeerState::Free);
        Self {
            slot,
            state,
            role: if state == PeerState::Free { None } else { ctx.role() },
            pid: ctx.pid(),
            peer_slot: ctx.peer_slot(),
            generation: ctx.generation(),
            received: ctx.get_queue().count(),
            staged: ctx.put_queue().count(),
            free_blocks: ctx.free_blocks().count(),
            wakes_pending: if ctx.wait_channel().is_initialized() {
                ctx.wait_channel().pending()
            } else {
                0
            },
            waiting: ctx.is_waiting(),
        }
    }
}

/// A mapped registry region
#[derive(Debug)]
pub struct PeerRegistry {
    region: SharedMemoryRegion,
    header: NonNull<RegistryHeader>,
    descriptor: ArenaDescriptor,
    arena: ArenaView,
}

unsafe impl Send for PeerRegistry {}
unsafe impl Sync for PeerRegistry {}

impl PeerRegistry {
    /// Create the backing region and lay out a fresh registry in it
    pub fn create(config: RegistryConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let page_size = config.region.page_size;
        let region = SharedMemoryRegion::new(config.region.clone())?;

        let offset = arena_offset(page_size);
        if region.size() < offset + page_size {
            return Err(HugelinkError::invalid_parameter(
                "size",
                format!(
                    "region of {} bytes cannot hold the {}-byte registry header plus one page",
                    region.size(),
                    size_of::<RegistryHeader>()
                ),
            ));
        }
        let arena_size = (region.size() - offset) & !(page_size - 1);
        if arena_size / page_size > MAX_HUGE_PAGES {
            return Err(HugelinkError::invalid_parameter(
                "size",
                format!(
                    "arena of {} pages exceeds the {}-page translation table",
                    arena_size / page_size,
                    MAX_HUGE_PAGES
                ),
            ));
        }

        let descriptor = ArenaDescriptor {
            name: region.name().to_string(),
            arena_id: config.arena_id,
            page_size: page_size as u64,
            arena_offset: offset as u64,
            arena_size: arena_size as u64,
            master_memory: config.master_memory,
            slave_memory: config.slave_memory,
            creator_pid: process::id(),
            library_version: LIBRARY_VERSION,
            created_at: SystemTime::now(),
        };
        descriptor.validate()?;
        let encoded = descriptor.encode()?;

        let header_ptr = unsafe { region.as_mut_ptr_unsafe::<RegistryHeader>() };
        unsafe {
            ptr::write_bytes(header_ptr as *mut u8, 0, size_of::<RegistryHeader>());
            let header = &mut *header_ptr;
            header.layout_version = LAYOUT_VERSION;
            header.library_version = LIBRARY_VERSION;
            header.region_size = region.size() as u64;
            header.page_size = page_size as u64;
            header.arena_offset = offset as u64;
            header.arena_size = arena_size as u64;
            header.descriptor_len = encoded.len() as u32;
            header.descriptor[..encoded.len()].copy_from_slice(&encoded);
        }

        let header = unsafe { &*header_ptr };
        header.lock.init()?;
        for ctx in header.peers.iter() {
            ctx.reset();
            ctx.state.store(PeerState::Free as u32, Ordering::Release);
        }
        header.magic.store(HUGELINK_MAGIC, Ordering::Release);

        info!(
            "created registry '{}': {} byte header, arena of {} pages x {} bytes at offset {:#x}",
            descriptor.name,
            size_of::<RegistryHeader>(),
            arena_size / page_size,
            page_size,
            offset
        );

        let arena = ArenaView::new(region.base_addr() + offset, arena_size, page_size)?;
        Ok(Arc::new(Self {
            header: NonNull::new(header_ptr)
                .ok_or_else(|| HugelinkError::platform("region mapped at null"))?,
            region,
            descriptor,
            arena,
        }))
    }

    /// Map an existing registry region by path
    pub fn attach(config: RegionConfig) -> Result<Arc<Self>> {
        let region = SharedMemoryRegion::new(config)?;
        Self::from_region(region)
    }

    /// Adopt a mapping of a region another process initialized
    pub fn from_region(region: SharedMemoryRegion) -> Result<Arc<Self>> {
        if region.size() < size_of::<RegistryHeader>() {
            return Err(HugelinkError::invalid_parameter(
                "size",
                format!("region of {} bytes is smaller than a registry header", region.size()),
            ));
        }

        let header_ptr = unsafe { region.as_mut_ptr_unsafe::<RegistryHeader>() };
        let header = unsafe { &*header_ptr };
        header.validate()?;

        if header.region_size as usize > region.size() {
            return Err(HugelinkError::invalid_parameter(
                "size",
                format!(
                    "mapping of {} bytes is smaller than the registry's {} bytes",
                    region.size(),
                    header.region_size
                ),
            ));
        }

        let descriptor = ArenaDescriptor::decode(header.descriptor_bytes()?)?;
        if descriptor.library_version != LIBRARY_VERSION {
            warn!(
                "registry created by library version {}, this is {}",
                descriptor.library_version, LIBRARY_VERSION
            );
        }

        let arena = ArenaView::new(
            region.base_addr() + header.arena_offset as usize,
            header.arena_size as usize,
            header.page_size as usize,
        )?;

        info!(
            "attached to registry '{}' created by pid {} ({} clients registered)",
            descriptor.name,
            descriptor.creator_pid,
            header.client_count()
        );

        Ok(Arc::new(Self {
            header: NonNull::new(header_ptr)
                .ok_or_else(|| HugelinkError::platform("region mapped at null"))?,
            region,
            descriptor,
            arena,
        }))
    }

    pub(crate) fn header(&self) -> &RegistryHeader {
        unsafe { self.header.as_ref() }
    }

    /// Claim a free slot, build its translation table and link it to its partner
    pub fn register(self: &Arc<Self>, config: ChannelConfig) -> Result<MessageChannel> {
        let resolver: Box<dyn IovaResolver> = match config.resolver {
            ResolverKind::Arena => Box::new(ArenaIovaResolver::new(
                self.descriptor.arena_id,
                self.arena.page_shift(),
            )),
            ResolverKind::Pagemap => Box::new(PagemapResolver::open()?),
        };
        let table = BlockAddressTable::build(&self.arena, resolver.as_ref())?;

        let header = self.header();
        let slot = {
            let _guard = header.lock.lock()?;

            let slot = header
                .peers
                .iter()
                .position(|ctx| ctx.state() == Some(PeerState::Free))
                .ok_or_else(|| {
                    HugelinkError::protocol(format!("all {} peer slots are in use", MAX_PEERS))
                })?;

            let ctx = &header.peers[slot];
            ctx.reset();
            ctx.wait.init()?;
            unsafe { *ctx.table.get() = table };
            ctx.role.store(config.role as u32, Ordering::Release);
            ctx.pid.store(process::id(), Ordering::Release);
            ctx.generation.fetch_add(1, Ordering::AcqRel);
            ctx.state.store(PeerState::Registered as u32, Ordering::Release);

            let partner_slot = slot ^ 1;
            let partner = &header.peers[partner_slot];
            if partner.state() == Some(PeerState::Registered) {
                if partner.role() == Some(config.role) {
                    warn!(
                        "linking two {} peers in slots {} and {}",
                        config.role.name(),
                        slot,
                        partner_slot
                    );
                }
                ctx.peer_slot.store(partner_slot as u32, Ordering::Release);
                partner.peer_slot.store(slot as u32, Ordering::Release);
                partner.state.store(PeerState::Linked as u32, Ordering::Release);
                ctx.state.store(PeerState::Linked as u32, Ordering::Release);
                info!("linked peer slots {} and {}", slot, partner_slot);
            }

            header.client_count.fetch_add(1, Ordering::AcqRel);
            slot
        };

        info!(
            "registered {} in slot {} (pid {}, {} resolver)",
            config.role.name(),
            slot,
            process::id(),
            resolver.name()
        );
        Ok(MessageChannel::new(Arc::clone(self), slot, config))
    }

    /// Unlink a slot from its partner and return it to `Free`
    pub(crate) fn release(&self, slot: usize) -> Result<()> {
        let header = self.header();
        let _guard = header.lock.lock()?;
        let ctx = self.context(slot)?;

        if ctx.state() == Some(PeerState::Free) {
            return Ok(());
        }

        if let Some(partner_slot) = ctx.peer_slot() {
            if let Some(partner) = header.peers.get(partner_slot) {
                partner.peer_slot.store(NO_PEER, Ordering::Release);
                if partner.state() == Some(PeerState::Linked) {
                    partner
                        .state
                        .store(PeerState::Registered as u32, Ordering::Release);
                }
            }
            info!("unlinked peer slots {} and {}", slot, partner_slot);
        }

        ctx.wait.destroy();
        ctx.reset();
        ctx.state.store(PeerState::Free as u32, Ordering::Release);
        let _ = header
            .client_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1));

        debug!("released peer slot {}", slot);
        Ok(())
    }

    pub(crate) fn context(&self, slot: usize) -> Result<&PeerContext> {
        self.header().peers.get(slot).ok_or_else(|| {
            HugelinkError::invalid_parameter("slot", format!("{} >= {}", slot, MAX_PEERS))
        })
    }

    /// Snapshot of a single slot
    pub fn lookup(&self, slot: usize) -> Result<PeerInfo> {
        Ok(PeerInfo::capture(slot, self.context(slot)?))
    }

    /// Snapshot of every slot
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.header()
            .peers
            .iter()
            .enumerate()
            .map(|(slot, ctx)| PeerInfo::capture(slot, ctx))
            .collect()
    }

    /// Invalidate the registry once every peer has closed
    pub fn teardown(&self) -> Result<()> {
        let header = self.header();
        let clients = header.client_count();
        if clients > 0 {
            return Err(HugelinkError::protocol(format!(
                "{} peers are still registered",
                clients
            )));
        }
        header.magic.store(0, Ordering::Release);
        header.lock.destroy()?;
        info!("tore down registry '{}'", self.descriptor.name);
        Ok(())
    }

    pub fn descriptor(&self) -> &ArenaDescriptor {
        &self.descriptor
    }

    pub fn arena(&self) -> &ArenaView {
        &self.arena
    }

    /// The part of the arena reserved for `role`
    pub fn partition(&self, role: PeerRole) -> Result<ArenaView> {
        let (offset, len) = self.descriptor.partition(role);
        self.arena.slice(offset as usize, len as usize)
    }

    pub fn client_count(&self) -> u32 {
        self.header().client_count()
    }

    pub fn region(&self) -> &SharedMemoryRegion {
        &self.region
    }
}
