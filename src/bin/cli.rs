use clap::{App, Arg, ArgMatches, SubCommand};
use hugelink::{
    BackingType, BlockPoolConfig, ChannelConfig, HugelinkError, LocalBlockPool, MessageChannel,
    MsgFlags, PeerRegistry, PeerRole, RegionConfig, RegistryConfig, ResolverKind, Result,
};
use log::{info, warn};
use std::{str::FromStr, sync::Arc, thread, time::{Duration, Instant}};

fn main() -> Result<()> {
    env_logger::init();

    let file_arg = || {
        Arg::with_name("file")
            .short("f")
            .long("file")
            .value_name("FILE")
            .help("Path of the registry region (hugetlbfs or /dev/shm)")
            .required(true)
            .takes_value(true)
    };

    let matches = App::new("hugelink-cli")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Zero-copy shared-memory transport tool")
        .subcommand(
            SubCommand::with_name("create")
                .about("Create a registry region")
                .arg(file_arg())
                .arg(
                    Arg::with_name("size")
                        .short("s")
                        .long("size")
                        .value_name("SIZE")
                        .help("Region size in bytes")
                        .default_value("35651584")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("page_size")
                        .long("page-size")
                        .value_name("BYTES")
                        .help("Arena page size")
                        .default_value("2097152")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("arena_id")
                        .long("arena-id")
                        .value_name("ID")
                        .help("High 16 bits of every block reference")
                        .default_value("1")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("master_memory")
                        .long("master-memory")
                        .value_name("BYTES")
                        .help("Arena bytes reserved for the master")
                        .default_value("0")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("slave_memory")
                        .long("slave-memory")
                        .value_name("BYTES")
                        .help("Arena bytes reserved for the slave")
                        .default_value("0")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("info")
                .about("Show the descriptor and peer slots of a registry")
                .arg(file_arg()),
        )
        .subcommand(
            SubCommand::with_name("run")
                .about("Attach as one peer and exchange messages with the other")
                .arg(file_arg())
                .arg(
                    Arg::with_name("role")
                        .short("r")
                        .long("role")
                        .value_name("ROLE")
                        .help("master hands out blocks and receives; slave fills and sends")
                        .possible_values(&["master", "slave"])
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("count")
                        .short("c")
                        .long("count")
                        .value_name("COUNT")
                        .help("Number of messages")
                        .default_value("1000")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("blocks")
                        .short("b")
                        .long("blocks")
                        .value_name("BLOCKS")
                        .help("Blocks the master keeps in flight")
                        .default_value("100")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("block_size")
                        .long("block-size")
                        .value_name("BYTES")
                        .help("Block size carved by the master")
                        .default_value("4096")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("sentinel")
                        .long("sentinel")
                        .help("Stamp blocks on hand-off and verify on receipt"),
                )
                .arg(
                    Arg::with_name("pagemap")
                        .long("pagemap")
                        .help("Use physical addresses from /proc/self/pagemap (needs CAP_SYS_ADMIN)"),
                )
                .arg(
                    Arg::with_name("timeout")
                        .long("timeout")
                        .value_name("SECS")
                        .help("Seconds to wait for the other peer")
                        .default_value("30")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("teardown")
                .about("Invalidate a registry with no registered peers")
                .arg(file_arg()),
        )
        .get_matches();

    match matches.subcommand() {
        ("create", Some(m)) => handle_create(m),
        ("info", Some(m)) => handle_info(m),
        ("run", Some(m)) => handle_run(m),
        ("teardown", Some(m)) => handle_teardown(m),
        _ => {
            println!("Use --help for usage information");
            Ok(())
        }
    }
}

fn parse_arg<T: FromStr>(matches: &ArgMatches, name: &str) -> Result<T> {
    let raw = matches
        .value_of(name)
        .ok_or_else(|| HugelinkError::invalid_parameter(name, "missing value"))?;
    raw.parse()
        .map_err(|_| HugelinkError::invalid_parameter(name, format!("cannot parse '{}'", raw)))
}

fn region_name(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "hugelink".to_string())
}

fn attach(matches: &ArgMatches) -> Result<Arc<PeerRegistry>> {
    let path: String = parse_arg(matches, "file")?;
    PeerRegistry::attach(RegionConfig::attach(region_name(&path), &path))
}

fn handle_create(matches: &ArgMatches) -> Result<()> {
    let path: String = parse_arg(matches, "file")?;
    let region = RegionConfig::new(region_name(&path), parse_arg(matches, "size")?)
        .with_backing_type(BackingType::FileBacked)
        .with_file_path(&path)
        .with_page_size(parse_arg(matches, "page_size")?);
    let config = RegistryConfig::new(region)
        .with_arena_id(parse_arg(matches, "arena_id")?)
        .with_memory_split(
            parse_arg(matches, "master_memory")?,
            parse_arg(matches, "slave_memory")?,
        );

    let registry = PeerRegistry::create(config)?;
    registry.region().flush()?;
    let desc = registry.descriptor();
    println!(
        "Created registry {} ({} arena pages of {} bytes)",
        path,
        desc.arena_size / desc.page_size,
        desc.page_size
    );
    Ok(())
}

fn handle_info(matches: &ArgMatches) -> Result<()> {
    let registry = attach(matches)?;
    let desc = registry.descriptor();

    println!("Registry '{}'", desc.name);
    println!("  arena id:        {}", desc.arena_id);
    println!("  page size:       {}", desc.page_size);
    println!("  arena:           {} bytes at offset {:#x}", desc.arena_size, desc.arena_offset);
    println!("  master/slave:    {} / {} bytes", desc.master_memory, desc.slave_memory);
    println!("  creator pid:     {}", desc.creator_pid);
    println!("  library version: {}", desc.library_version);
    println!("  clients:         {}", registry.client_count());
    println!("Peers:");
    for peer in registry.peers() {
        println!(
            "  [{}] {:?} role={} pid={} peer={} rx={} staged={} free={} wakes={}{}",
            peer.slot,
            peer.state,
            peer.role.map(|r| r.name()).unwrap_or("-"),
            peer.pid,
            peer.peer_slot.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
            peer.received,
            peer.staged,
            peer.free_blocks,
            peer.wakes_pending,
            if peer.waiting { " (waiting)" } else { "" }
        );
    }
    Ok(())
}

fn handle_teardown(matches: &ArgMatches) -> Result<()> {
    let registry = attach(matches)?;
    registry.teardown()?;
    println!("Registry '{}' torn down", registry.descriptor().name);
    Ok(())
}

fn pattern(type_tag: u16, index: usize) -> u8 {
    (type_tag as usize).wrapping_add(index) as u8
}

fn handle_run(matches: &ArgMatches) -> Result<()> {
    let role: PeerRole = parse_arg(matches, "role")?;
    let count: usize = parse_arg(matches, "count")?;
    let timeout = Duration::from_secs(parse_arg(matches, "timeout")?);

    let mut config = ChannelConfig::new(role)
        .with_sentinel_check(matches.is_present("sentinel"))
        .with_peer_timeout(timeout);
    if matches.is_present("pagemap") {
        config = config.with_resolver(ResolverKind::Pagemap);
    }

    let registry = attach(matches)?;
    let channel = registry.register(config)?;
    info!("registered as {} in slot {}", role.name(), channel.slot());
    channel.wait_for_peer(timeout)?;

    let start = Instant::now();
    let result = match role {
        PeerRole::Master => run_master(
            &channel,
            count,
            parse_arg(matches, "blocks")?,
            parse_arg(matches, "block_size")?,
        ),
        PeerRole::Slave => run_slave(&channel, count),
    };
    let elapsed = start.elapsed();

    let stats = channel.stats();
    println!("\nResults ({}):", role.name());
    println!("  Total time: {:.2}ms", elapsed.as_secs_f64() * 1000.0);
    println!("  Messages/sec: {:.0}", count as f64 / elapsed.as_secs_f64());
    println!("  Delivered: {}  Received: {}", stats.messages_delivered, stats.messages_received);
    println!(
        "  Blocks enqueued: {}  dequeued: {}  sentinel violations: {}",
        stats.blocks_enqueued, stats.blocks_dequeued, stats.sentinel_violations
    );
    println!("  Waits: {} ({} spurious)", stats.waits, stats.spurious_wakes);

    channel.close()?;
    result
}

fn run_master(channel: &MessageChannel, count: usize, blocks: usize, block_size: usize) -> Result<()> {
    let pool = LocalBlockPool::new(channel, BlockPoolConfig::new(block_size))?;
    for _ in 0..blocks.min(pool.capacity()) {
        let block = pool.alloc()?;
        channel.enqueue_block(block.block_ref())?;
    }
    info!("primed peer with {} blocks", channel.peer_free_blocks());

    let mut received = 0;
    let mut corrupt = 0;
    while received < count {
        let Some(message) = channel.wget()? else {
            continue;
        };
        let block = channel.block_for(&message)?;
        let payload = &block.as_slice()[..message.size as usize];
        if payload
            .iter()
            .enumerate()
            .any(|(i, b)| *b != pattern(message.type_tag, i))
        {
            corrupt += 1;
        }
        pool.free_ref(message.block)?;
        received += 1;

        if channel.is_linked() {
            let block = pool.alloc()?;
            if let Err(err) = channel.enqueue_block(block.block_ref()) {
                pool.free(block)?;
                warn!("could not recycle block: {}", err);
            }
        }
    }

    if corrupt > 0 {
        return Err(HugelinkError::validation(format!(
            "{} of {} payloads did not match the expected pattern",
            corrupt, count
        )));
    }
    Ok(())
}

fn run_slave(channel: &MessageChannel, count: usize) -> Result<()> {
    for i in 0..count {
        let mut block = loop {
            match channel.dequeue_block() {
                Ok(block) => break block,
                Err(err) if err.is_backpressure() => thread::sleep(Duration::from_micros(50)),
                Err(err) => return Err(err),
            }
        };

        let type_tag = (i % u16::MAX as usize) as u16 + 1;
        let size = (64 + i % 1024).min(block.capacity());
        for (j, byte) in block.as_mut_slice()[..size].iter_mut().enumerate() {
            *byte = pattern(type_tag, j);
        }

        match channel.put_block(&block, size as u32, type_tag, MsgFlags::empty()) {
            Ok(()) => {}
            Err(err) if err.is_backpressure() => {
                // the message stayed staged; retry delivery until the peer drains
                while let Err(err) = channel.flush() {
                    if !err.is_backpressure() {
                        return Err(err);
                    }
                    thread::sleep(Duration::from_micros(50));
                }
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
