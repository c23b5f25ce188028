// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! The scheduler callback table.

use anyhow::Result;

use crate::exit::ExitInfo;
use crate::task::Task;
use crate::types::{CpuId, EnqFlags, WakeFlags};

/// The sched_ext_ops callbacks a scheduling policy implements.
///
/// Every CPU invokes these concurrently from its own scheduling path, so all
/// methods take `&self`. None of them may block.
pub trait SchedOps: Send + Sync {
    /// Scheduler name, as shown in `/sys/kernel/sched_ext/root/ops`.
    fn name(&self) -> &'static str;

    /// Pick a CPU for a waking task (ops.select_cpu). May insert the task
    /// directly into a local DSQ, in which case `enqueue` is skipped.
    fn select_cpu(&self, p: &mut Task, prev_cpu: CpuId, wake_flags: WakeFlags) -> CpuId;

    /// Queue a runnable task (ops.enqueue).
    fn enqueue(&self, p: &mut Task, enq_flags: EnqFlags);

    /// `cpu` has nothing to run (ops.dispatch). `prev` is the task that
    /// just stopped on it, if any.
    fn dispatch(&self, cpu: CpuId, prev: Option<&Task>);

    /// A task started executing (ops.running).
    fn running(&self, p: &Task);

    /// A task stopped executing (ops.stopping). `runnable` is false if it is
    /// going to sleep.
    fn stopping(&self, p: &mut Task, runnable: bool);

    /// A task joined this scheduler (ops.enable). Called once per task.
    fn enable(&self, p: &mut Task);

    /// Scheduler activation (ops.init). An error aborts the activation.
    fn init(&self) -> Result<()>;

    /// Scheduler deactivation (ops.exit).
    fn exit(&self, ei: &ExitInfo);
}
