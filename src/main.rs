// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use log::info;

use scx_simple::sim::{ProbeContext, ProbePoint, Scenario, SimHost, Simulator, TaskBehavior};
use scx_simple::{Metrics, SchedConfig, SchedMode, SimpleScheduler, Vtime, SCHEDULER_NAME};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// scx_simple: a simple sched_ext scheduler.
///
/// By default, it operates as a simple global weighted vtime scheduler and can
/// be switched to FIFO scheduling. Idle CPUs are fed directly on wakeup;
/// everything else goes through one DSQ shared by all CPUs.
///
/// The scheduler runs on a deterministic simulated host. Workloads come from
/// a JSON scenario file or from a built-in mix of CPU-bound and interactive
/// workers.
#[derive(Debug, Parser)]
struct Opts {
    /// Use FIFO scheduling instead of weighted vtime scheduling.
    #[clap(short = 'f', long, action = clap::ArgAction::SetTrue)]
    fifo: bool,

    /// Scheduling slice duration in microseconds.
    #[clap(short = 's', long, default_value = "20000")]
    slice_us: u64,

    /// Number of simulated CPUs.
    #[clap(short = 'c', long, default_value_t = online_cpus())]
    cpus: u32,

    /// Simulated duration in milliseconds (ignored with --scenario).
    #[clap(short = 'd', long, default_value = "1000")]
    duration_ms: u64,

    /// Number of built-in workers; half CPU-bound, half interactive.
    /// 0 means twice the number of CPUs.
    #[clap(short = 'w', long, default_value = "0")]
    workers: u32,

    /// Load the workload from a JSON scenario file.
    #[clap(long, env = "SCX_SIMPLE_SCENARIO")]
    scenario: Option<PathBuf>,

    /// Report statistics every this many simulated seconds (0 disables).
    #[clap(long, default_value = "0.1")]
    stats: f64,

    /// Print the final statistics as JSON on stdout.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    json: bool,

    /// Dump the full scheduling trace to stderr at the end.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    dump_trace: bool,

    /// Enable verbose output, including every scheduling decision.
    #[clap(short = 'v', long, action = clap::ArgAction::SetTrue)]
    verbose: bool,

    /// Print scheduler version and exit.
    #[clap(short = 'V', long, action = clap::ArgAction::SetTrue)]
    version: bool,
}

fn online_cpus() -> u32 {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n > 0 {
        n as u32
    } else {
        1
    }
}

impl Opts {
    fn slice_ns(&self) -> Result<u64> {
        self.slice_us
            .checked_mul(1000)
            .with_context(|| format!("--slice-us {} is too large", self.slice_us))
    }

    fn sched_config(&self, nr_cpus: u32) -> Result<SchedConfig> {
        let mode = if self.fifo {
            SchedMode::Fifo
        } else {
            SchedMode::Vtime
        };
        Ok(SchedConfig::new(mode, nr_cpus).with_slice_ns(self.slice_ns()?))
    }

    fn scenario(&self) -> Result<Scenario> {
        if let Some(path) = &self.scenario {
            return Scenario::from_file(path);
        }

        let hog_ns = self
            .slice_ns()?
            .checked_mul(5)
            .with_context(|| format!("--slice-us {} is too large", self.slice_us))?;
        let nr_workers = match self.workers {
            0 => self.cpus * 2,
            n => n,
        };
        let mut builder = Scenario::builder()
            .cpus(self.cpus)
            .duration_ms(self.duration_ms);
        for i in 0..nr_workers {
            builder = if i % 2 == 0 {
                builder.add_task(
                    &format!("hog-{}", i / 2),
                    100,
                    TaskBehavior::cpu_bound(hog_ns),
                )
            } else {
                builder.add_task(
                    &format!("interactive-{}", i / 2),
                    100,
                    TaskBehavior::run_sleep(1_000_000, 4_000_000),
                )
            };
        }
        builder.build()
    }
}

type SimpleSim = Simulator<SimpleScheduler<Arc<SimHost>>>;

struct StatsReporter {
    prev: Metrics,
}

impl StatsReporter {
    fn report(&mut self, ctx: &ProbeContext<'_, SimpleScheduler<Arc<SimHost>>>) {
        if ctx.point != ProbePoint::Tick {
            return;
        }
        let cur = ctx.sched.stats().metrics();
        info!("{}", tick_line(ctx.time_ns, &cur, &self.prev, ctx.sched.vtime_now()));
        self.prev = cur;
    }
}

/// Running totals as the loader prints them, then the change since the last
/// tick.
fn tick_line(time_ns: u64, cur: &Metrics, prev: &Metrics, vtime_now: Vtime) -> String {
    let delta = cur.delta(prev);
    format!(
        "[{}] t={}ms local: {}, global: {} (+{} +{}) vtime_now={}",
        SCHEDULER_NAME,
        time_ns / 1_000_000,
        cur.nr_local,
        cur.nr_global,
        delta.nr_local,
        delta.nr_global,
        vtime_now
    )
}

fn run(opts: &Opts, shutdown: Arc<AtomicBool>) -> Result<SimpleSim> {
    let scenario = opts.scenario()?;
    let cfg = opts.sched_config(scenario.nr_cpus)?;

    let mut sim = Simulator::simple(scenario.nr_cpus, &cfg)?.with_shutdown(shutdown);
    let stats_ns = (opts.stats * 1_000_000_000.0) as u64;
    if stats_ns > 0 {
        sim = sim.with_stats_interval(stats_ns);
    }

    let mut reporter = StatsReporter {
        prev: Metrics::default(),
    };
    let mut monitor = |ctx: &ProbeContext<'_, SimpleScheduler<Arc<SimHost>>>| reporter.report(ctx);
    let trace = sim.run_with_monitor(&scenario, &mut monitor)?;

    if opts.dump_trace {
        trace.dump();
    }

    let metrics = sim.scheduler().stats().metrics();
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
    } else {
        metrics.format(&mut std::io::stdout())?;
    }
    for def in &scenario.tasks {
        info!(
            "{:<16} pid={:<5} weight={:<5} runtime={}ms scheduled={}",
            def.name,
            def.pid.0,
            def.weight,
            trace.total_runtime(def.pid) / 1_000_000,
            trace.schedule_count(def.pid)
        );
    }

    Ok(sim)
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    if opts.version {
        println!("{} version {}", SCHEDULER_NAME, VERSION);
        return Ok(());
    }

    let loglevel = if opts.verbose {
        simplelog::LevelFilter::Debug
    } else {
        simplelog::LevelFilter::Info
    };

    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        loglevel,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::Relaxed);
    })
    .context("Error setting Ctrl-C handler")?;

    let sim = run(&opts, shutdown)?;
    sim.scheduler().uei().read().report()
}
