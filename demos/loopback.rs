//! Master and slave in one process, on two threads, over a memfd region

use std::{sync::Arc, thread, time::Instant};

use hugelink::{
    BackingType, BlockPoolConfig, ChannelConfig, LocalBlockPool, MsgFlags, PeerRegistry,
    RegionConfig, RegistryConfig, Result,
};

const MESSAGES: usize = 10_000;
const PAGE: usize = 2 * 1024 * 1024;

fn main() -> Result<()> {
    env_logger::init();

    let region = RegionConfig::new("hugelink_loopback", 9 * PAGE)
        .with_backing_type(BackingType::MemFd)
        .with_page_size(PAGE);
    let registry = PeerRegistry::create(RegistryConfig::new(region))?;

    let master = Arc::new(registry.register(ChannelConfig::master())?);
    let slave = registry.register(ChannelConfig::slave())?;

    let pool = LocalBlockPool::new(&master, BlockPoolConfig::new(2048))?;
    for _ in 0..256 {
        master.enqueue_block(pool.alloc()?.block_ref())?;
    }

    let start = Instant::now();
    let sender = thread::spawn(move || -> Result<()> {
        for i in 0..MESSAGES {
            let mut block = loop {
                match slave.dequeue_block() {
                    Ok(block) => break block,
                    Err(err) if err.is_backpressure() => thread::yield_now(),
                    Err(err) => return Err(err),
                }
            };
            let text = format!("message {}", i);
            let len = block.write(text.as_bytes())?;
            slave.put_block(&block, len as u32, 1, MsgFlags::empty())?;
        }
        slave.close()
    });

    let mut received = 0;
    while received < MESSAGES {
        let Some(message) = master.wget()? else {
            continue;
        };
        received += 1;
        pool.free_ref(message.block)?;
        if master.is_linked() {
            master.enqueue_block(pool.alloc()?.block_ref())?;
        }
    }

    sender
        .join()
        .map_err(|_| hugelink::HugelinkError::platform("sender thread panicked"))??;

    let elapsed = start.elapsed();
    println!(
        "{} messages in {:.2}ms ({:.0} msg/s)",
        MESSAGES,
        elapsed.as_secs_f64() * 1000.0,
        MESSAGES as f64 / elapsed.as_secs_f64()
    );
    println!("{:?}", master.stats());
    Ok(())
}
