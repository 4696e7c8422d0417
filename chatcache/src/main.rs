mod bootstrap;

use anyhow::Result;
use chatcache_cluster::{emergency_flush, Benchmark, MaintenanceScheduler};
use chatcache_core::logging::init_logging;
use clap::{Parser, Subcommand};
use tracing::info;

use bootstrap::{describe_shard, load_config, Components};

#[derive(Parser, Debug)]
#[command(name = "chatcache")]
#[command(about = "Chat cache and socket-state maintenance", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the maintenance scheduler until Ctrl-C or SIGTERM.
    /// SIGHUP asks a degraded backend to reconnect.
    Serve,
    /// Run one health check
    Health,
    /// Measure cache latency on a scratch namespace
    Bench {
        #[arg(long, env = "CHATCACHE_BENCH_ITERATIONS", default_value = "1000")]
        iterations: usize,
    },
    /// Delete corrupted cache entries
    Scrub,
    /// Delete every cache entry on every node
    Flush {
        /// Confirm the flush
        #[arg(long)]
        yes: bool,
    },
    /// Print backend mode and metrics
    Stats,
    /// Print the write shard of a room
    Shard { room_id: String },
}

/// Block until a shutdown signal, forwarding SIGHUP as a reconnect request
#[cfg(unix)]
async fn wait_for_shutdown(scheduler: &MaintenanceScheduler) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => return Ok(result?),
            _ = terminate.recv() => return Ok(()),
            _ = hangup.recv() => {
                info!("Received SIGHUP, requesting cache reconnect");
                scheduler.request_reconnect();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_scheduler: &MaintenanceScheduler) -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config()?;
    let _log_guard = init_logging(&config.logging)?;

    let components = Components::connect(&config).await?;
    let backend = &components.backend;
    info!(mode = %backend.mode(), "Cache backend ready");

    match args.command {
        Command::Serve => {
            let scheduler = MaintenanceScheduler::start(
                components.health_job(),
                components.scrubber(&config),
                backend.clone(),
                &config.maintenance,
            );
            wait_for_shutdown(&scheduler).await?;
            info!("Received shutdown signal");
            scheduler.shutdown().await;
        }
        Command::Health => {
            let report = components.health_job().run().await;
            println!(
                "healthy={} check_ok={} mode={} latency_ms={:.2}",
                report.healthy,
                report.check_ok,
                report.mode,
                report.latency.as_secs_f64() * 1000.0
            );
            if !report.healthy {
                anyhow::bail!("Cache is unhealthy (mode={})", report.mode);
            }
        }
        Command::Bench { iterations } => {
            let report = Benchmark::new(backend.clone()).run(iterations).await?;
            println!(
                "iterations={} ops={} ops_per_sec={:.0} mean_us={} p99_us={}",
                report.iterations,
                report.operations,
                report.ops_per_sec,
                report.mean.as_micros(),
                report.p99.as_micros()
            );
        }
        Command::Scrub => {
            let report = components.scrubber(&config).run().await?;
            println!(
                "scanned={} deleted={} truncated={}",
                report.scanned, report.deleted, report.truncated
            );
        }
        Command::Flush { yes } => {
            if !yes {
                anyhow::bail!("Refusing to flush without --yes");
            }
            emergency_flush(backend).await?;
            println!("flushed");
        }
        Command::Stats => {
            println!("mode={}", backend.mode());
            println!("shards={}", backend.router().shard_count());
            println!("replicas={}", backend.router().replica_count());
            print!("{}", chatcache_core::metrics::gather_text()?);
        }
        Command::Shard { room_id } => {
            println!("{}", describe_shard(&config, backend.shard_for(&room_id)));
        }
    }

    Ok(())
}
