// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! What the simulator did, in order.
//!
//! Every scheduling action (task woke, scheduled, preempted, slept, CPU
//! idle) is recorded as a `TraceEvent` with a simulated timestamp and CPU.

use std::fmt;
use std::io::Write;

use anyhow::Result;

use crate::types::{CpuId, FmtN, Pid, TimeNs};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub time_ns: TimeNs,
    pub cpu: CpuId,
    pub kind: TraceKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceKind {
    /// A task became runnable.
    TaskWoke { pid: Pid },
    /// `ops.select_cpu()` returned; `direct` if the task went straight to
    /// a local DSQ.
    SelectCpu {
        pid: Pid,
        prev_cpu: CpuId,
        selected_cpu: CpuId,
        direct: bool,
    },
    /// `ops.enqueue()` was called for the task.
    Enqueue { pid: Pid },
    /// `ops.dispatch()` ran on this CPU.
    Dispatch,
    /// A task started running on this CPU.
    TaskScheduled { pid: Pid },
    /// Slice expired; the task was put back on the queue.
    TaskPreempted { pid: Pid },
    /// The task called `sched_yield()`.
    TaskYielded { pid: Pid },
    /// A run phase ended and the next one started; the task was re-queued.
    TaskRequeued { pid: Pid },
    /// The task blocked.
    TaskSlept { pid: Pid },
    /// The task completed all its phases.
    TaskCompleted { pid: Pid },
    /// The CPU found nothing to run.
    CpuIdle,
}

impl TraceKind {
    /// The task this event is about, if any.
    pub fn pid(&self) -> Option<Pid> {
        match *self {
            TraceKind::TaskWoke { pid }
            | TraceKind::SelectCpu { pid, .. }
            | TraceKind::Enqueue { pid }
            | TraceKind::TaskScheduled { pid }
            | TraceKind::TaskPreempted { pid }
            | TraceKind::TaskYielded { pid }
            | TraceKind::TaskRequeued { pid }
            | TraceKind::TaskSlept { pid }
            | TraceKind::TaskCompleted { pid } => Some(pid),
            TraceKind::Dispatch | TraceKind::CpuIdle => None,
        }
    }

    /// Whether this event takes its task off the CPU.
    fn ends_run(&self) -> bool {
        matches!(
            self,
            TraceKind::TaskPreempted { .. }
                | TraceKind::TaskYielded { .. }
                | TraceKind::TaskRequeued { .. }
                | TraceKind::TaskSlept { .. }
                | TraceKind::TaskCompleted { .. }
        )
    }
}

impl fmt::Display for TraceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            TraceKind::TaskWoke { .. } => "woke",
            TraceKind::SelectCpu { .. } => "select_cpu",
            TraceKind::Enqueue { .. } => "enqueue",
            TraceKind::Dispatch => "dispatch",
            TraceKind::TaskScheduled { .. } => "run",
            TraceKind::TaskPreempted { .. } => "preempt",
            TraceKind::TaskYielded { .. } => "yield",
            TraceKind::TaskRequeued { .. } => "requeue",
            TraceKind::TaskSlept { .. } => "sleep",
            TraceKind::TaskCompleted { .. } => "exit",
            TraceKind::CpuIdle => "idle",
        };
        write!(f, "{tag:<10}")?;
        if let Some(pid) = self.pid() {
            write!(f, " pid={}", pid.0)?;
        }
        if let TraceKind::SelectCpu {
            prev_cpu,
            selected_cpu,
            direct,
            ..
        } = self
        {
            write!(f, " prev={} -> {}", prev_cpu.0, selected_cpu.0)?;
            if *direct {
                f.write_str(" (direct)")?;
            }
        }
        Ok(())
    }
}

/// All events of a simulation in chronological order.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    events: Vec<TraceEvent>,
}

impl Trace {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&mut self, time_ns: TimeNs, cpu: CpuId, kind: TraceKind) {
        self.events.push(TraceEvent { time_ns, cpu, kind });
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Time `pid` spent on a CPU: each run interval lasts from its
    /// scheduling event to the event that took it off.
    pub fn total_runtime(&self, pid: Pid) -> TimeNs {
        let (total, _) = self
            .events
            .iter()
            .filter(|e| e.kind.pid() == Some(pid))
            .fold((0, None), |(total, since), e| match e.kind {
                TraceKind::TaskScheduled { .. } => (total, Some(e.time_ns)),
                ref kind if kind.ends_run() => match since {
                    Some(start) => (total + (e.time_ns - start), None),
                    None => (total, None),
                },
                _ => (total, since),
            });
        total
    }

    pub fn schedule_count(&self, pid: Pid) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e.kind, TraceKind::TaskScheduled { pid: p } if p == pid))
            .count()
    }

    pub fn idle_count(&self, cpu: CpuId) -> usize {
        self.events
            .iter()
            .filter(|e| e.cpu == cpu && matches!(e.kind, TraceKind::CpuIdle))
            .count()
    }

    /// Tasks in the order they were scheduled, across all CPUs.
    pub fn schedule_order(&self) -> Vec<Pid> {
        self.events
            .iter()
            .filter_map(|e| match e.kind {
                TraceKind::TaskScheduled { pid } => Some(pid),
                _ => None,
            })
            .collect()
    }

    /// Number of `select_cpu` calls for `pid` that took the direct path.
    pub fn direct_dispatch_count(&self, pid: Pid) -> usize {
        self.events
            .iter()
            .filter(|e| {
                matches!(e.kind, TraceKind::SelectCpu { pid: p, direct: true, .. } if p == pid)
            })
            .count()
    }

    pub fn enqueue_count(&self, pid: Pid) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e.kind, TraceKind::Enqueue { pid: p } if p == pid))
            .count()
    }

    /// One line per event.
    pub fn format<W: Write>(&self, w: &mut W) -> Result<()> {
        for e in &self.events {
            writeln!(w, "{:>10}ns cpu{:<3} {}", FmtN(e.time_ns).to_string(), e.cpu.0, e.kind)?;
        }
        Ok(())
    }

    /// Pretty-print the trace to stderr for debugging.
    pub fn dump(&self) {
        let _ = self.format(&mut std::io::stderr());
    }
}
