//! cluster-cache - command-line front end for the Valkey cluster cache
//!
//! Runs one cache operation per invocation against a cluster reached
//! through the given seed nodes.

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, Level};
use tracing_subscriber::FmtSubscriber;

use valkey_cluster_cache::cache::make_key;
use valkey_cluster_cache::cluster::{slot_for_key, ClusterTopology};
use valkey_cluster_cache::config::{CliArgs, Command};
use valkey_cluster_cache::{CacheConfig, ClusterCache, Expiry, SetOptions};

fn setup_logging(verbose: bool, quiet: bool) -> Result<()> {
    let level = if quiet {
        Level::ERROR
    } else if verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {}", e))
}

#[derive(Serialize)]
struct RangeSummary {
    start: u16,
    end: u16,
    owner: String,
    replicas: Vec<String>,
}

#[derive(Serialize)]
struct TopologySummary {
    version: u64,
    covered_slots: usize,
    complete: bool,
    ranges: Vec<RangeSummary>,
}

impl TopologySummary {
    fn new(version: u64, topology: &ClusterTopology) -> Self {
        Self {
            version,
            covered_slots: topology.covered_slots(),
            complete: topology.is_complete(),
            ranges: topology
                .ranges()
                .iter()
                .map(|r| RangeSummary {
                    start: r.start,
                    end: r.end,
                    owner: r.owner().to_string(),
                    replicas: r.replicas().iter().map(|e| e.to_string()).collect(),
                })
                .collect(),
        }
    }
}

fn print_slots(args: &CliArgs, keys: &[String]) {
    for key in keys {
        let namespaced = make_key(&args.key_prefix, args.key_version, key);
        println!(
            "{}\t{}\t{}\t{}",
            key,
            slot_for_key(key.as_bytes()),
            namespaced,
            slot_for_key(namespaced.as_bytes())
        );
    }
}

fn print_topology(cache: &ClusterCache, json: bool) -> Result<()> {
    let table = cache.manager().table();
    let summary = TopologySummary::new(table.version(), table.topology());

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "Topology v{}: {} ranges, {} slots covered{}",
        summary.version,
        summary.ranges.len(),
        summary.covered_slots,
        if summary.complete { "" } else { " (incomplete)" }
    );
    for range in &summary.ranges {
        if range.replicas.is_empty() {
            println!("{:>5}-{:<5} {}", range.start, range.end, range.owner);
        } else {
            println!(
                "{:>5}-{:<5} {} replicas: {}",
                range.start,
                range.end,
                range.owner,
                range.replicas.join(", ")
            );
        }
    }
    Ok(())
}

fn execute(cache: &ClusterCache, args: &CliArgs) -> Result<()> {
    match args.command.clone() {
        Command::Get { key } => match cache.get(&key, None)? {
            Some(value) => println!("{}", value),
            None => println!("(nil)"),
        },
        Command::Set {
            key,
            value,
            ttl,
            persist,
            nx,
            xx,
        } => {
            // Anything that is not valid JSON is stored as a plain string
            let value = serde_json::from_str::<Value>(&value).unwrap_or(Value::String(value));
            let expiry = match (ttl, persist) {
                (Some(secs), _) => Expiry::Seconds(secs),
                (None, true) => Expiry::Never,
                (None, false) => Expiry::Default,
            };
            let stored = cache.set_with(&key, &value, expiry, SetOptions { nx, xx }, None)?;
            println!("{}", if stored { "OK" } else { "(not set)" });
        }
        Command::Del { key } => {
            println!("{}", u8::from(cache.delete(&key, None)?));
        }
        Command::Incr { key, delta } => {
            println!("{}", cache.incr(&key, delta, None)?);
        }
        Command::Ttl { key } => match cache.ttl(&key, None)? {
            Some(secs) => println!("{}", secs),
            None => println!("(no expiry)"),
        },
        Command::Topology { json } => print_topology(cache, json)?,
        Command::Slot { keys } => print_slots(args, &keys),
    }
    Ok(())
}

fn run() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse_args();

    // Setup logging
    setup_logging(args.verbose, args.quiet)?;

    if !args.command.needs_cluster() {
        if let Command::Slot { ref keys } = args.command {
            print_slots(&args, keys);
        }
        return Ok(());
    }

    // Build configuration
    let config =
        CacheConfig::from_cli(&args).map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    debug!(
        "Seeds: {:?}, serializer: {}, compressor: {}",
        config.seeds.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        config.serializer,
        config.compressor
    );

    let cache = ClusterCache::connect(&config)?;
    let result = execute(&cache, &args);
    cache.close();
    result
}

fn main() {
    if let Err(e) = run() {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
