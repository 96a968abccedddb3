use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use hugelink::{
    BackingType, BlockPoolConfig, ChannelConfig, LocalBlockPool, MsgFlags, PeerRegistry,
    RegionConfig, RegistryConfig,
};

const PAGE: usize = 64 * 1024;

fn linked_registry(name: &str) -> std::sync::Arc<PeerRegistry> {
    let region = RegionConfig::new(name, 32 * PAGE)
        .with_backing_type(BackingType::MemFd)
        .with_page_size(PAGE);
    PeerRegistry::create(RegistryConfig::new(region)).unwrap()
}

fn benchmark_put_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("Channel_PutGet");
    let registry = linked_registry("bench_put_get");
    let master = registry.register(ChannelConfig::master()).unwrap();
    let slave = registry.register(ChannelConfig::slave()).unwrap();
    let block = master
        .to_physical(registry.arena().base as *const u8)
        .unwrap();

    group.throughput(Throughput::Elements(1));
    group.bench_function("standalone", |b| {
        b.iter(|| {
            master.put(block, 256, 1, MsgFlags::empty()).unwrap();
            slave.get().unwrap().unwrap()
        });
    });

    group.throughput(Throughput::Elements(8));
    group.bench_function("scatter_gather_8", |b| {
        b.iter(|| {
            master.put(block, 256, 1, MsgFlags::FIRST).unwrap();
            for _ in 0..6 {
                master.put(block, 256, 1, MsgFlags::MIDDLE).unwrap();
            }
            master.put(block, 256, 1, MsgFlags::LAST).unwrap();
            while slave.get().unwrap().is_some() {}
        });
    });

    group.finish();
}

fn benchmark_translation(c: &mut Criterion) {
    let mut group = c.benchmark_group("Channel_Translation");
    let registry = linked_registry("bench_translation");
    let master = registry.register(ChannelConfig::master()).unwrap();
    let base = registry.arena().base;
    let size = registry.arena().size;

    group.bench_function("to_physical_to_local", |b| {
        let mut offset = 0;
        b.iter(|| {
            offset = (offset + 4099) % size;
            let reference = master.to_physical((base + offset) as *const u8).unwrap();
            master.to_local(reference).unwrap()
        });
    });

    group.finish();
}

fn benchmark_block_handoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("Channel_BlockHandoff");
    let registry = linked_registry("bench_handoff");

    for sentinel in [false, true] {
        let name = if sentinel { "round_trip_sentinel" } else { "round_trip" };
        let master = registry
            .register(ChannelConfig::master().with_sentinel_check(sentinel))
            .unwrap();
        let slave = registry
            .register(ChannelConfig::slave().with_sentinel_check(sentinel))
            .unwrap();
        let pool = LocalBlockPool::new(&master, BlockPoolConfig::new(4096)).unwrap();

        group.bench_function(name, |b| {
            b.iter(|| {
                let block = pool.alloc().unwrap();
                master.enqueue_block(block.block_ref()).unwrap();
                let received = slave.dequeue_block().unwrap();
                slave.put_block(&received, 64, 2, MsgFlags::empty()).unwrap();
                let message = master.get().unwrap().unwrap();
                pool.free_ref(message.block).unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_put_get, benchmark_translation, benchmark_block_handoff);
criterion_main!(benches);
