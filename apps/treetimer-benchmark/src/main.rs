//! treetimer benchmark driver
//!
//! Runs a nested workload on several threads, then reports per-region
//! statistics merged across threads, load imbalance and the estimated
//! instrumentation overhead.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p treetimer-benchmark -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `-t, --threads <N>`: Worker threads (default: 4)
//! - `-i, --iterations <N>`: Outer iterations per thread (default: 100)
//! - `-c, --clock <NAME>`: gettimeofday, nanotime, clock_gettime or placebo
//! - `--cpu`: Also gather user/system CPU time
//! - `-h, --help`: Print help message

use anyhow::Context as _;
use tracing::info;
use tracing_subscriber::EnvFilter;
use treetimer::{region, ClockSource, Library, Setting, ThreadTimers};

/// Command-line configuration.
#[derive(Debug, Clone)]
struct Args {
    threads: usize,
    iterations: u32,
    clock: ClockSource,
    cpu: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            threads: 4,
            iterations: 100,
            clock: ClockSource::ClockGettime,
            cpu: false,
        }
    }
}

impl Args {
    fn parse() -> anyhow::Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let mut parsed = Self::default();

        let mut i = 1;
        while i < args.len() {
            let value = args.get(i + 1);
            match args[i].as_str() {
                "--threads" | "-t" => {
                    parsed.threads = value
                        .context("--threads needs a value")?
                        .parse()
                        .context("--threads must be a number")?;
                    i += 1;
                }
                "--iterations" | "-i" => {
                    parsed.iterations = value
                        .context("--iterations needs a value")?
                        .parse()
                        .context("--iterations must be a number")?;
                    i += 1;
                }
                "--clock" | "-c" => {
                    let name = value.context("--clock needs a value")?;
                    parsed.clock = ClockSource::ALL
                        .into_iter()
                        .find(|s| s.name() == name.as_str())
                        .with_context(|| format!("unknown clock source {name}"))?;
                    i += 1;
                }
                "--cpu" => parsed.cpu = true,
                other => anyhow::bail!("unknown argument {other}"),
            }
            i += 1;
        }
        Ok(parsed)
    }
}

fn print_help() {
    println!("treetimer-benchmark - nested multi-threaded timing workload");
    println!();
    println!("Options:");
    println!("  -t, --threads <N>     Worker threads (default: 4)");
    println!("  -i, --iterations <N>  Outer iterations per thread (default: 100)");
    println!("  -c, --clock <NAME>    gettimeofday | nanotime | clock_gettime | placebo");
    println!("      --cpu             Gather user/system CPU time");
    println!("  -h, --help            Print this help");
}

/// Busy work whose cost grows with `n`.
fn spin(n: u64) -> u64 {
    (0..n).fold(0_u64, |acc, i| acc.wrapping_mul(31).wrapping_add(i))
}

fn inner(timers: &mut ThreadTimers<'_>, scale: u64) -> u64 {
    region!(timers, "inner");
    spin(200 * scale)
}

fn middle(timers: &mut ThreadTimers<'_>, scale: u64) -> u64 {
    region!(timers, "middle");
    let mut acc = 0;
    for _ in 0..4 {
        acc ^= inner(&mut timers, scale);
    }
    acc
}

fn worker(lib: &Library, iterations: u32) -> anyhow::Result<u64> {
    let mut timers = lib.attach()?;
    // Later threads get more work so the imbalance figure is not zero.
    let scale = timers.index() as u64 + 1;

    timers.start("total")?;
    let mut acc = 0;
    for _ in 0..iterations {
        acc ^= middle(&mut timers, scale);
        timers.start("leaf")?;
        acc ^= spin(50);
        timers.stop("leaf")?;
    }
    timers.stop("total")?;
    Ok(acc)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }
    let args = Args::parse()?;
    info!(?args, "starting workload");

    let mut lib = Library::new();
    lib.set_clock_source(args.clock)?;
    lib.set_option(Setting::Cpu(args.cpu))?;
    lib.set_option(Setting::MaxThreads(i64::try_from(args.threads + 1)?))?;
    lib.initialize()?;

    let checksum = std::thread::scope(|s| -> anyhow::Result<u64> {
        let handles: Vec<_> = (0..args.threads)
            .map(|_| s.spawn(|| worker(&lib, args.iterations)))
            .collect();
        let mut checksum = 0;
        for handle in handles {
            let result = handle
                .join()
                .map_err(|_| anyhow::anyhow!("worker thread panicked"))?;
            checksum ^= result?;
        }
        Ok(checksum)
    })?;
    info!(checksum, "workload finished");

    for region in lib.merged_summaries()? {
        let stats = region.stats;
        info!(
            region = %region.name,
            calls = stats.count,
            wallclock = stats.wall.accum,
            max = stats.wall.max,
            min = stats.wall.min,
            mean = stats.mean(),
            "merged across threads"
        );
    }

    let work = lib.threadwork("total")?;
    info!(max = work.max, imbalance = work.imbalance, "thread load balance");

    {
        let timers = lib.attach()?;
        let overhead = timers.overhead();
        info!("estimated overhead\n{overhead}");
    }

    info!(errors = lib.num_errors(), warnings = lib.num_warn(), "done");
    lib.finalize()?;
    Ok(())
}
