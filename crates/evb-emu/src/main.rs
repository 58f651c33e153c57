// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Builder unit emulator CLI
//!
//! Runs a builder unit against an in-process consumer that requests events,
//! checks the received block chains and hands the events back.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: 256 events x 64 superfragments, 512 FEDs
//! evb-emu
//!
//! # Small run with fixed-size fragments, stop after 1000 events
//! evb-emu --pool-size 16 --super-fragments 4 --fed-count 32 --fixed-words 8 --events 1000
//!
//! # Using configuration file
//! evb-emu --config evb.toml
//!
//! # Write an example configuration
//! evb-emu gen-config --output evb.toml
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use crossbeam::channel::{Receiver, RecvTimeoutError};
use evb_emu::{
    BlockChain, BuilderConfig, BuilderStats, BuilderUnit, ChainMode, ChannelSink, Command,
    ConfigError, DriverMode, SizeMode, State,
};
use tracing_subscriber::EnvFilter;

/// Event builder unit emulator
#[derive(Parser, Debug)]
#[command(name = "evb-emu")]
#[command(about = "Event builder unit emulator - synthetic events cut into transport blocks")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of pooled events
    #[arg(long, conflicts_with = "config")]
    pool_size: Option<usize>,

    /// Superfragments per event
    #[arg(long, conflicts_with = "config")]
    super_fragments: Option<usize>,

    /// Fragment capacity of each superfragment
    #[arg(long, conflicts_with = "config")]
    fragments_per_super_fragment: Option<usize>,

    /// Number of FEDs (ids 0..N)
    #[arg(long, conflicts_with = "config")]
    fed_count: Option<u16>,

    /// Transport block size in bytes
    #[arg(long, conflicts_with = "config")]
    block_size: Option<usize>,

    /// Fixed fragment size in 8-byte words (default: uniform random)
    #[arg(long, conflicts_with = "config")]
    fixed_words: Option<u32>,

    /// Use simple chains (whole fragments per block)
    #[arg(long, conflicts_with = "config")]
    simple: bool,

    /// Compute fragment CRCs
    #[arg(long, conflicts_with = "config")]
    crc: bool,

    /// Consumer requests kept outstanding
    #[arg(long, default_value = "8")]
    in_flight: usize,

    /// Stop after this many events (0 = until Ctrl+C)
    #[arg(long, default_value = "0")]
    events: u64,

    /// Stop after this many seconds (0 = no limit)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Reassemble and check every received chain
    #[arg(long)]
    verify: bool,

    /// Statistics reporting interval (seconds, 0 to disable)
    #[arg(long, default_value = "5")]
    stats_interval: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "evb.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// What the consumer saw.
#[derive(Debug, Default)]
struct ConsumerStats {
    events: u64,
    blocks: u64,
    bytes: u64,
    bad_chains: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let config = build_config(&args)?;
    config.validate()?;
    let fed_count = config.fed_ids.len();
    let driver = config.driver;

    println!("Event Builder Unit Emulator v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    println!(
        "Pool: {} events x {} superfragments, {} FEDs, {} byte blocks",
        config.pool_size,
        config.super_fragments,
        fed_count,
        config.block_size
    );
    println!("Press Ctrl+C to stop...");
    println!();

    let (sink, chains) = ChannelSink::bounded(args.in_flight.max(1) * 2);
    let unit = BuilderUnit::start(config, Arc::new(sink))?;

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    for command in [Command::Configure, Command::Enable] {
        let state = unit.execute(command)?;
        if state == State::Failed {
            eprintln!(
                "Builder unit failed: {}",
                unit.last_error().unwrap_or_default()
            );
            std::process::exit(1);
        }
    }

    let mut consumer = ConsumerStats::default();
    let mut next_fu: u32 = 1;
    let requests: Vec<u32> = (0..args.in_flight.max(1) as u32)
        .map(|i| next_fu + i)
        .collect();
    next_fu += requests.len() as u32;
    unit.allocate(&requests);

    let start = Instant::now();
    let mut last_report = Instant::now();
    let stats_interval = Duration::from_secs(args.stats_interval);
    let duration_limit = (args.duration > 0).then(|| Duration::from_secs(args.duration));

    while running.load(Ordering::SeqCst) {
        if let Some(limit) = duration_limit {
            if start.elapsed() >= limit {
                tracing::info!("Duration limit reached");
                break;
            }
        }
        if args.events > 0 && consumer.events >= args.events {
            tracing::info!("Event limit reached");
            break;
        }
        if unit.state() != State::Executing {
            tracing::warn!(state = unit.visible_state(), "builder unit left the enabled state");
            break;
        }

        if driver == DriverMode::Inline {
            for _ in 0..64 {
                unit.tick();
            }
        }
        if receive(&unit, &chains, &mut consumer, args.verify, fed_count) {
            unit.allocate(&[next_fu]);
            next_fu = next_fu.wrapping_add(1).max(1);
        }

        if args.stats_interval > 0 && last_report.elapsed() >= stats_interval {
            print_stats(&unit.stats(), &consumer, start.elapsed());
            last_report = Instant::now();
        }
    }

    println!("\nShutting down...");
    unit.submit(Command::Stop)?;
    // Keep consuming so the stop drain can complete.
    let deadline = Instant::now() + Duration::from_secs(30);
    while Instant::now() < deadline {
        receive(&unit, &chains, &mut consumer, args.verify, fed_count);
        if unit.state() == State::Stopped && chains.is_empty() {
            break;
        }
    }
    let final_stats = unit.stats();
    unit.execute(Command::Halt)?;

    println!("\nFinal Statistics:");
    print_stats(&final_stats, &consumer, start.elapsed());
    unit.shutdown();

    if consumer.bad_chains > 0 {
        eprintln!("{} chains failed verification", consumer.bad_chains);
        std::process::exit(1);
    }
    Ok(())
}

/// Take one chain, check it, and hand the event back. Returns true when a
/// chain was consumed.
fn receive(
    unit: &BuilderUnit,
    chains: &Receiver<BlockChain>,
    consumer: &mut ConsumerStats,
    verify: bool,
    fed_count: usize,
) -> bool {
    let chain = match chains.recv_timeout(Duration::from_millis(10)) {
        Ok(chain) => chain,
        Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return false,
    };

    consumer.events += 1;
    consumer.blocks += chain.len() as u64;
    consumer.bytes += chain.total_bytes() as u64;

    if verify {
        match chain.fragment_count() {
            Ok(n) if n == fed_count => {}
            Ok(n) => {
                tracing::error!(expected = fed_count, found = n, "fragment count mismatch");
                consumer.bad_chains += 1;
            }
            Err(e) => {
                tracing::error!(error = %e, "chain does not reassemble");
                consumer.bad_chains += 1;
            }
        }
    }

    match chain.bu_resource_id() {
        Some(bu_id) => {
            unit.discard(bu_id);
        }
        None => tracing::warn!("empty chain received"),
    }
    true
}

fn build_config(args: &Args) -> Result<BuilderConfig, ConfigError> {
    if let Some(ref config_path) = args.config {
        let mut config = BuilderConfig::from_file(config_path)?;
        config.log_level = args.log_level.clone();
        return Ok(config);
    }

    let mut config = BuilderConfig::default();
    if let Some(n) = args.pool_size {
        config.pool_size = n;
    }
    if let Some(n) = args.super_fragments {
        config.super_fragments = n;
    }
    if let Some(n) = args.fragments_per_super_fragment {
        config.fragments_per_super_fragment = n;
    }
    if let Some(n) = args.fed_count {
        config.fed_ids = (0..n).collect();
    }
    if let Some(n) = args.block_size {
        config.block_size = n;
    }
    if let Some(words) = args.fixed_words {
        config.fragment_size = SizeMode::Fixed { words };
    }
    if args.simple {
        config.chain_mode = ChainMode::Simple;
    }
    config.compute_crc = args.crc;
    config.log_level = args.log_level.clone();
    Ok(config)
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = BuilderConfig {
        pool_size: 64,
        super_fragments: 8,
        fragments_per_super_fragment: 16,
        fed_ids: (0..128).collect(),
        fragment_size: SizeMode::LogNormal {
            mean_bytes: 2048.0,
            width_bytes: 1024.0,
            max_bytes: 16384,
        },
        ..Default::default()
    };

    let toml_str = config.to_toml_string()?;

    // Add comments
    let content = format!(
        r#"# Event Builder Unit Emulator Configuration
# Generated by evb-emu gen-config
#
# fragment_size.mode: fixed | uniform | lognormal | playback
# chain_mode: normal | simple
# driver: threaded | inline

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match BuilderConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!(
                "Pool: {} events x {} superfragments",
                config.pool_size, config.super_fragments
            );
            println!(
                "FEDs: {} (capacity {})",
                config.fed_ids.len(),
                config.event_layout().total_fragment_capacity()
            );
            println!("Block size: {} bytes ({:?} chains)", config.block_size, config.chain_mode);
            println!("Fragment sizes: {:?}", config.fragment_size);
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_stats(stats: &BuilderStats, consumer: &ConsumerStats, elapsed: Duration) {
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    let c = &stats.counters;
    println!("--- Builder Statistics ---");
    println!(
        "  Events: {} built, {} sent, {} discarded ({:.1} evt/s)",
        c.built,
        c.sent,
        c.discarded,
        consumer.events as f64 / secs
    );
    println!(
        "  Resources: {} free, {} built, {} ready, {} at consumer, {} requests pending",
        stats.free, stats.built, stats.ready, stats.sent, stats.pending_requests
    );
    println!(
        "  Tasks: {} queued, {} deferred, avg {}",
        stats.task_queue, stats.deferred_tasks, stats.avg_task_queue
    );
    println!(
        "  Consumer: {} blocks, {} ({}/s), {} bad chains",
        consumer.blocks,
        format_bytes(consumer.bytes),
        format_bytes((consumer.bytes as f64 / secs) as u64),
        consumer.bad_chains
    );
    println!(
        "  Largest fragment: {}, {} expansions, {} generator / {} segment / {} sink failures",
        format_bytes(c.max_fragment_bytes),
        c.expansions,
        c.generator_failures,
        c.segment_failures,
        c.sink_failures
    );
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
