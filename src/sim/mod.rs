// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Deterministic event-driven host for running a scheduler in userspace.
//!
//! - **Engine**: event loop that calls the scheduler's ops
//! - **Host**: CPUs, DSQ storage and the kfuncs the scheduler calls
//! - **Tasks**: scripted behaviors (run/sleep/yield phases)
//! - **Trace**: what happened, when and where
//!
//! ```rust,no_run
//! use scx_simple::sim::*;
//! use scx_simple::SchedConfig;
//!
//! let scenario = Scenario::builder()
//!     .cpus(2)
//!     .add_task("worker", 100, TaskBehavior::cpu_bound(10_000_000))
//!     .duration_ms(100)
//!     .build()?;
//!
//! let trace = Simulator::simple(2, &SchedConfig::vtime(2))?.run(&scenario)?;
//! trace.dump();
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod engine;
pub mod host;
pub mod monitor;
pub mod scenario;
pub mod task;
pub mod trace;

pub use engine::Simulator;
pub use host::SimHost;
pub use monitor::{Monitor, NullMonitor, ProbeContext, ProbePoint};
pub use scenario::{Scenario, ScenarioFile};
pub use task::{Phase, TaskBehavior, TaskDef};
pub use trace::{Trace, TraceEvent, TraceKind};
