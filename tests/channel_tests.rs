//! Integration tests for message channels between linked peers

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use hugelink::{
    BackingType, BlockRef, ChannelConfig, HugelinkError, MessageChannel, MsgFlags, PeerRegistry,
    PeerState, RegionConfig, RegistryConfig,
};

const PAGE: usize = 64 * 1024;

fn registry(name: &str) -> Arc<PeerRegistry> {
    let region = RegionConfig::new(name, 32 * PAGE)
        .with_backing_type(BackingType::MemFd)
        .with_page_size(PAGE);
    PeerRegistry::create(RegistryConfig::new(region)).unwrap()
}

fn linked_pair(name: &str) -> (Arc<PeerRegistry>, MessageChannel, MessageChannel) {
    let registry = registry(name);
    let master = registry.register(ChannelConfig::master()).unwrap();
    let slave = registry.register(ChannelConfig::slave()).unwrap();
    (registry, master, slave)
}

fn arena_ref(channel: &MessageChannel, offset: usize) -> BlockRef {
    let base = channel.registry().arena().base;
    channel.to_physical((base + offset) as *const u8).unwrap()
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_links_pair() {
        let (_registry, master, slave) = linked_pair("chan_link");
        assert_eq!(master.slot(), 0);
        assert_eq!(slave.slot(), 1);
        assert!(master.is_linked());
        assert!(slave.ready());
        assert!(master.wait_for_peer(Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn test_standalone_delivery() {
        let (_registry, master, slave) = linked_pair("chan_standalone");
        let block = arena_ref(&master, 4096);

        master.put(block, 128, 5, MsgFlags::empty()).unwrap();
        assert_eq!(slave.check(), 1);
        assert_eq!(master.staged(), 0);

        let message = slave.get().unwrap().unwrap();
        assert_eq!(message.block, block);
        assert_eq!(message.size, 128);
        assert_eq!(message.type_tag, 5);
        assert_eq!(message.flags, MsgFlags::empty());
        assert!(slave.get().unwrap().is_none());

        let stats = master.stats();
        assert_eq!(stats.messages_staged, 1);
        assert_eq!(stats.messages_delivered, 1);
        assert_eq!(slave.stats().messages_received, 1);
    }

    #[test]
    fn test_scatter_gather_batch_is_atomic_and_ordered() {
        let (_registry, master, slave) = linked_pair("chan_sg");
        let flags = [MsgFlags::FIRST, MsgFlags::MIDDLE, MsgFlags::MIDDLE, MsgFlags::LAST];

        for (i, flag) in flags.iter().enumerate() {
            let block = arena_ref(&slave, i * 1024);
            slave.put(block, 512, i as u16 + 1, *flag).unwrap();
            if i < 3 {
                assert_eq!(master.check(), 0, "group delivered before its last part");
                assert_eq!(slave.staged(), i + 1);
            }
        }
        assert_eq!(master.check(), 4);
        assert_eq!(slave.staged(), 0);

        for (i, flag) in flags.iter().enumerate() {
            let message = master.get().unwrap().unwrap();
            assert_eq!(message.type_tag, i as u16 + 1);
            assert_eq!(message.flags, *flag);
            assert_eq!(message.block, arena_ref(&master, i * 1024));
        }
    }

    #[test]
    fn test_application_bits_survive_delivery() {
        let (_registry, master, slave) = linked_pair("chan_appbits");
        let flags = MsgFlags::URLLC.with_app_bits(0x42);
        master.put(arena_ref(&master, 0), 64, 9, flags).unwrap();
        let message = slave.get().unwrap().unwrap();
        assert_eq!(message.flags.app_bits(), 0x42);
        assert!(message.flags.contains(MsgFlags::URLLC));
    }

    #[test]
    fn test_put_validation() {
        let (_registry, master, slave) = linked_pair("chan_validation");
        let block = arena_ref(&master, 0);

        let invalid = [
            master.put(block, 0, 1, MsgFlags::empty()),
            master.put(block, PAGE as u32 + 1, 1, MsgFlags::empty()),
            master.put(BlockRef::NULL, 64, 1, MsgFlags::empty()),
            master.put(arena_ref(&master, PAGE - 16), 32, 1, MsgFlags::empty()),
            master.put(block, 64, 1, MsgFlags::LTE),
        ];
        for result in invalid {
            assert!(matches!(result, Err(HugelinkError::Validation { .. })));
        }

        // a block ending exactly on the page boundary is fine
        master
            .put(arena_ref(&master, PAGE - 16), 16, 1, MsgFlags::empty())
            .unwrap();
        assert_eq!(slave.check(), 1);
        assert_eq!(master.staged(), 0);
    }

    #[test]
    fn test_put_without_peer_is_protocol_error() {
        let registry = registry("chan_unlinked");
        let lonely = registry.register(ChannelConfig::master()).unwrap();
        assert!(!lonely.is_linked());

        let block = arena_ref(&lonely, 0);
        assert!(matches!(
            lonely.put(block, 64, 1, MsgFlags::empty()),
            Err(HugelinkError::Protocol { .. })
        ));
        assert!(matches!(
            lonely.put(block, 64, 1, MsgFlags::FIRST),
            Err(HugelinkError::Protocol { .. })
        ));
        assert_eq!(lonely.staged(), 0);
        assert!(lonely.wait_for_peer(Duration::from_millis(20)).is_err());
    }

    #[test]
    fn test_full_peer_queue_keeps_remainder_staged() {
        let (_registry, master, slave) = linked_pair("chan_backpressure");
        let block = arena_ref(&slave, 0);

        for tag in 0..1023u16 {
            slave.put(block, 64, tag, MsgFlags::empty()).unwrap();
        }
        assert_eq!(master.check(), 1023);

        let err = slave.put(block, 64, 5000, MsgFlags::empty()).unwrap_err();
        assert!(err.is_backpressure());
        assert_eq!(slave.staged(), 1);
        assert_eq!(slave.stats().capacity_failures, 1);

        assert_eq!(master.get().unwrap().unwrap().type_tag, 0);
        slave.flush().unwrap();
        assert_eq!(slave.staged(), 0);
        assert_eq!(master.check(), 1023);

        // delivery order is preserved across the failed flush
        let mut last = None;
        while let Some(message) = master.get().unwrap() {
            last = Some(message.type_tag);
        }
        assert_eq!(last, Some(5000));
    }

    #[test]
    fn test_discard_staged_group() {
        let (_registry, master, slave) = linked_pair("chan_discard");
        let block = arena_ref(&master, 0);
        master.put(block, 64, 1, MsgFlags::FIRST).unwrap();
        master.put(block, 64, 2, MsgFlags::MIDDLE).unwrap();
        assert_eq!(master.discard_staged().unwrap(), 2);

        master.put(block, 64, 3, MsgFlags::empty()).unwrap();
        assert_eq!(slave.get().unwrap().unwrap().type_tag, 3);
        assert!(slave.get().unwrap().is_none());
    }

    #[test]
    fn test_wait_returns_immediately_with_queued_messages() {
        let (_registry, master, slave) = linked_pair("chan_wait_ready");
        master.put(arena_ref(&master, 0), 64, 1, MsgFlags::empty()).unwrap();
        master.put(arena_ref(&master, 64), 64, 2, MsgFlags::empty()).unwrap();
        assert_eq!(slave.wait().unwrap(), 2);
        assert_eq!(slave.wget().unwrap().unwrap().type_tag, 1);
    }

    #[test]
    fn test_wget_blocks_until_delivery() {
        let (_registry, master, slave) = linked_pair("chan_wget");
        let master = Arc::new(master);
        let block = arena_ref(&slave, 256);

        let receiver = {
            let master = master.clone();
            thread::spawn(move || master.wget().unwrap())
        };

        thread::sleep(Duration::from_millis(50));
        slave.put(block, 100, 77, MsgFlags::empty()).unwrap();

        let message = receiver.join().unwrap().unwrap();
        assert_eq!(message.type_tag, 77);
        assert_eq!(message.block, block);
    }

    #[test]
    fn test_wake_up_releases_own_waiter() {
        let (_registry, master, _slave) = linked_pair("chan_wakeup");
        let master = Arc::new(master);

        let waiter = {
            let master = master.clone();
            thread::spawn(move || master.wget().unwrap())
        };

        let registry = master.registry().clone();
        let slot = master.slot();
        wait_until(|| registry.lookup(slot).unwrap().waiting);
        master.wake_up().unwrap();

        assert!(waiter.join().unwrap().is_none());
        assert_eq!(master.stats().waits, 1);
    }

    #[test]
    fn test_wake_peer_returns_zero_messages() {
        let (_registry, master, slave) = linked_pair("chan_wakepeer");
        slave.wake_peer().unwrap();
        assert_eq!(master.wait().unwrap(), 0);
    }

    #[test]
    fn test_close_refused_while_waiting() {
        let (_registry, master, _slave) = linked_pair("chan_close_waiting");
        let master = Arc::new(master);

        let waiter = {
            let master = master.clone();
            thread::spawn(move || master.wait())
        };

        let registry = master.registry().clone();
        let slot = master.slot();
        wait_until(|| registry.lookup(slot).unwrap().waiting);

        assert!(matches!(master.close(), Err(HugelinkError::Protocol { .. })));
        assert!(!master.is_closed());

        master.wake_up().unwrap();
        assert_eq!(waiter.join().unwrap().unwrap(), 0);
        master.close().unwrap();
        assert!(master.is_closed());
    }

    #[test]
    fn test_close_unlinks_both_directions() {
        let (registry, master, slave) = linked_pair("chan_close");
        let slave_slot = slave.slot();

        slave.close().unwrap();
        assert!(slave.is_closed());
        assert!(slave.get().is_err());
        // closing twice is a no-op
        slave.close().unwrap();

        assert_eq!(registry.lookup(slave_slot).unwrap().state, PeerState::Free);
        let master_info = registry.lookup(master.slot()).unwrap();
        assert_eq!(master_info.state, PeerState::Registered);
        assert_eq!(master_info.peer_slot, None);

        assert!(!master.is_linked());
        assert!(matches!(
            master.put(arena_ref(&master, 0), 64, 1, MsgFlags::empty()),
            Err(HugelinkError::Protocol { .. })
        ));
        assert!(master.wake_peer().is_err());

        // a new peer takes the freed slot and links again
        let replacement = registry.register(ChannelConfig::slave()).unwrap();
        assert_eq!(replacement.slot(), slave_slot);
        assert!(master.is_linked());
        master.put(arena_ref(&master, 0), 64, 2, MsgFlags::empty()).unwrap();
        assert_eq!(replacement.get().unwrap().unwrap().type_tag, 2);
    }

    #[test]
    fn test_drop_releases_slot() {
        let registry = registry("chan_drop");
        {
            let _master = registry.register(ChannelConfig::master()).unwrap();
            assert_eq!(registry.client_count(), 1);
        }
        assert_eq!(registry.client_count(), 0);
        assert_eq!(registry.lookup(0).unwrap().state, PeerState::Free);
    }

    #[test]
    fn test_concurrent_producer_consumer() {
        let (_registry, master, slave) = linked_pair("chan_threads");
        let master = Arc::new(master);
        const COUNT: u16 = 5000;

        let producer = thread::spawn(move || {
            let block = arena_ref(&slave, 0);
            for tag in 0..COUNT {
                loop {
                    match slave.put(block, 64, tag, MsgFlags::empty()) {
                        Ok(()) => break,
                        Err(err) if err.is_backpressure() => {
                            while slave.flush().is_err() {
                                thread::yield_now();
                            }
                            break;
                        }
                        Err(err) => panic!("unexpected error: {}", err),
                    }
                }
            }
            slave
        });

        let mut expected = 0u16;
        while expected < COUNT {
            if let Some(message) = master.wget().unwrap() {
                assert_eq!(message.type_tag, expected);
                expected += 1;
            }
        }
        let _slave = producer.join().unwrap();
    }
}
