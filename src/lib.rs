// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! scx_simple: a simple weighted vtime / FIFO sched_ext scheduling policy.
//!
//! The policy lives in [`SimpleScheduler`] and talks to its host only through
//! the [`Kfuncs`] trait; the host drives it through [`SchedOps`]. The
//! [`sim`] module provides a deterministic userspace host to run it on.

pub mod config;
pub mod dsq;
pub mod exit;
pub mod kfuncs;
pub mod ops;
pub mod policy;
pub mod sim;
pub mod simple;
pub mod stats;
pub mod task;
pub mod types;
pub mod vclock;

pub use config::SchedConfig;
pub use exit::{ExitInfo, ExitKind, UeiRecord, UserExitInfo};
pub use kfuncs::Kfuncs;
pub use ops::SchedOps;
pub use policy::SchedMode;
pub use simple::{SimpleScheduler, SHARED_DSQ};
pub use stats::{Metrics, StatIdx, Stats};
pub use task::{nice_to_weight, Task};
pub use types::{CpuId, DsqId, EnqFlags, Pid, TimeNs, Vtime, WakeFlags, Weight, SLICE_DFL};
pub use vclock::VirtualClock;

pub const SCHEDULER_NAME: &str = "scx_simple";
