// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Hooks for watching a run as it happens.
//!
//! Monitors are called by the engine at scheduling events, so tests and the
//! stats reporter can sample scheduler state into a time series.

use crate::sim::trace::Trace;
use crate::task::Task;
use crate::types::{CpuId, Pid, TimeNs};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePoint {
    /// After `ops.running()`.
    Running,
    /// After `ops.stopping()`.
    Stopping,
    /// After `ops.enqueue()` and the resulting insertion.
    Enqueued,
    /// After a CPU ran `ops.dispatch()`.
    Dispatched,
    /// Periodic stats interval.
    Tick,
}

/// What a monitor sees at a probe point.
pub struct ProbeContext<'a, S: ?Sized> {
    pub point: ProbePoint,
    /// Task involved, for task-scoped events.
    pub pid: Option<Pid>,
    pub cpu: CpuId,
    pub time_ns: TimeNs,
    /// The involved task's scheduling annotation.
    pub task: Option<&'a Task>,
    /// The scheduler, for reading its internal state.
    pub sched: &'a S,
    /// The trace accumulated so far.
    pub trace: &'a Trace,
}

pub trait Monitor<S: ?Sized> {
    fn sample(&mut self, ctx: &ProbeContext<'_, S>);
}

/// A monitor that ignores every sample.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMonitor;

impl<S: ?Sized> Monitor<S> for NullMonitor {
    fn sample(&mut self, _ctx: &ProbeContext<'_, S>) {}
}

impl<S: ?Sized, F> Monitor<S> for F
where
    F: FnMut(&ProbeContext<'_, S>),
{
    fn sample(&mut self, ctx: &ProbeContext<'_, S>) {
        self(ctx)
    }
}
