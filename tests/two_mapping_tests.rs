//! Two independent mappings of one file stand in for two processes

use std::{sync::Arc, thread};

use tempfile::TempDir;
use hugelink::{
    BlockPoolConfig, ChannelConfig, HugelinkError, LocalBlockPool, MsgFlags, PeerRegistry,
    RegionConfig, RegistryConfig, ResolverKind,
};

const PAGE: usize = 64 * 1024;

fn mapped_twice(dir: &TempDir) -> (Arc<PeerRegistry>, Arc<PeerRegistry>) {
    let path = dir.path().join("arena");
    let region = RegionConfig::new("two_mappings", 32 * PAGE)
        .with_file_path(&path)
        .with_page_size(PAGE);
    let first = PeerRegistry::create(RegistryConfig::new(region)).unwrap();
    let second = PeerRegistry::attach(RegionConfig::attach("two_mappings", &path)).unwrap();
    (first, second)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_references_agree_across_mappings() {
        let dir = TempDir::new().unwrap();
        let (first, second) = mapped_twice(&dir);
        assert_ne!(first.arena().base, second.arena().base);

        let a = first.register(ChannelConfig::master()).unwrap();
        let b = second.register(ChannelConfig::slave()).unwrap();
        assert!(a.is_linked() && b.is_linked());
        assert_eq!(second.client_count(), 2);

        for offset in (0..first.arena().size).step_by(PAGE / 3) {
            let ra = a.to_physical((first.arena().base + offset) as *const u8).unwrap();
            let rb = b.to_physical((second.arena().base + offset) as *const u8).unwrap();
            assert_eq!(ra, rb);
            assert_eq!(b.to_local(ra).unwrap().as_ptr() as usize, second.arena().base + offset);
        }
    }

    #[test]
    fn test_payload_written_in_one_mapping_is_read_in_the_other() {
        let dir = TempDir::new().unwrap();
        let (first, second) = mapped_twice(&dir);
        let master = first.register(ChannelConfig::master()).unwrap();
        let slave = second.register(ChannelConfig::slave()).unwrap();

        let pool = LocalBlockPool::new(&master, BlockPoolConfig::new(2048)).unwrap();
        for _ in 0..16 {
            master.enqueue_block(pool.alloc().unwrap().block_ref()).unwrap();
        }

        let sender = thread::spawn(move || {
            for i in 0..16u8 {
                let mut block = slave.dequeue_block().unwrap();
                block.write(&[i; 300]).unwrap();
                let flags = match i % 4 {
                    0 => MsgFlags::FIRST,
                    3 => MsgFlags::LAST,
                    _ => MsgFlags::MIDDLE,
                };
                slave.put_block(&block, 300, i as u16, flags).unwrap();
            }
            slave
        });

        let mut seen = 0u8;
        while seen < 16 {
            let Some(message) = master.wget().unwrap() else {
                continue;
            };
            assert_eq!(message.type_tag, seen as u16);
            let block = master.block_for(&message).unwrap();
            assert!(block.as_slice().iter().all(|b| *b == seen));
            pool.free_ref(message.block).unwrap();
            seen += 1;
        }
        let _slave = sender.join().unwrap();
        assert_eq!(pool.available(), pool.capacity());
    }

    #[test]
    fn test_pagemap_table_translates_or_refuses() {
        let dir = TempDir::new().unwrap();
        let (first, _second) = mapped_twice(&dir);
        // frame numbers need CAP_SYS_ADMIN and real huge pages; anything else must fail registration
        match first.register(ChannelConfig::master().with_resolver(ResolverKind::Pagemap)) {
            Ok(channel) => {
                let base = first.arena().base;
                let reference = channel.to_physical(base as *const u8).unwrap();
                assert_eq!(channel.to_local(reference).unwrap().as_ptr() as usize, base);
            }
            Err(err) => {
                assert!(matches!(
                    err,
                    HugelinkError::Platform { .. } | HugelinkError::Io { .. }
                ));
                assert_eq!(first.client_count(), 0);
            }
        }
    }
}
