use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use ringmesh::{seed_channel, ProbeSeeder, SeederConfig, Subnet};

#[derive(Parser, Debug)]
#[command(name = "ringmesh")]
#[command(author, version, about = "Probe a local subnet for overlay peer candidates", long_about = None)]
struct Args {
    /// Subnet to probe, e.g. 192.168.0.10/24
    #[arg(short, long)]
    subnet: Subnet,

    /// Number of candidates to emit in the fast phase before slowing down
    #[arg(short, long, default_value = "16")]
    fast: u64,

    /// Pause between candidates after the fast phase, in milliseconds
    #[arg(long, default_value = "1000")]
    slow_interval_ms: u64,

    /// Stop after this many candidates (0 = run until Ctrl+C)
    #[arg(short, long, default_value = "0")]
    limit: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();

    let config = SeederConfig {
        slow_interval: Duration::from_millis(args.slow_interval_ms),
        ..Default::default()
    };
    let mut seeder = ProbeSeeder::new(args.subnet, config).context("failed to create seeder")?;
    if args.subnet.host_space() == 0 {
        warn!(subnet = %args.subnet, "subnet has no host addresses, nothing will be probed");
    }

    let (sink, mut seeds) = seed_channel();
    let phase = Arc::new(AtomicU32::new(discovery_phase(0, args.fast)));
    seeder.start(sink, phase.clone())?;

    let mut emitted = 0u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal, exiting gracefully");
                break;
            }
            seed = seeds.recv() => {
                let Some(seed) = seed else { break };
                println!("{}", seed.addr);
                emitted += 1;
                let next = discovery_phase(emitted, args.fast);
                if phase.swap(next, Ordering::Relaxed) != next {
                    info!(emitted, "switching to slow probing");
                }
                if args.limit != 0 && emitted >= args.limit {
                    break;
                }
            }
        }
    }

    seeder.close().await?;
    info!(emitted, "probing finished");
    Ok(())
}

/// Phase 0 (fast) until `fast` candidates have been emitted, then phase 1.
fn discovery_phase(emitted: u64, fast: u64) -> u32 {
    if emitted >= fast { 1 } else { 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switches_to_slow_after_fast_budget() {
        assert_eq!(discovery_phase(0, 3), 0);
        assert_eq!(discovery_phase(2, 3), 0);
        assert_eq!(discovery_phase(3, 3), 1);
        assert_eq!(discovery_phase(10, 3), 1);
    }

    #[test]
    fn zero_fast_budget_starts_slow() {
        assert_eq!(discovery_phase(0, 0), 1);
        assert_eq!(discovery_phase(5, 0), 1);
    }
}
