// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Shared-queue ordering disciplines.
//!
//! The discipline is picked once when the scheduler is built and never
//! changes for that activation. It decides how a task is keyed on the shared
//! DSQ and does the vtime bookkeeping in the lifecycle callbacks; inserting
//! into the host queues stays with the scheduler.

use serde::Deserialize;
use serde::Serialize;

use crate::task::{Task, CGROUP_WEIGHT_DFL};
use crate::types::{TimeNs, Vtime};
use crate::vclock::VirtualClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedMode {
    /// Shared DSQ in insertion order.
    Fifo,
    /// Shared DSQ ordered by weighted virtual time.
    #[default]
    Vtime,
}

/// Where a task lands on the shared DSQ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Fifo,
    Vtime(Vtime),
}

pub trait Discipline: Send + Sync + std::fmt::Debug {
    fn mode(&self) -> SchedMode;

    /// Decide how `p` is queued on the shared DSQ.
    fn enqueue(&self, p: &mut Task, clock: &VirtualClock, slice_ns: TimeNs) -> Placement;

    fn running(&self, p: &Task, clock: &VirtualClock);

    fn stopping(&self, p: &mut Task, slice_ns: TimeNs);

    fn enable(&self, p: &mut Task, clock: &VirtualClock);
}

pub fn new_discipline(mode: SchedMode) -> Box<dyn Discipline> {
    match mode {
        SchedMode::Fifo => Box::new(Fifo),
        SchedMode::Vtime => Box::new(WeightedVtime),
    }
}

/// Arrival order. Never touches task vtime or the clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct Fifo;

impl Discipline for Fifo {
    fn mode(&self) -> SchedMode {
        SchedMode::Fifo
    }

    fn enqueue(&self, _p: &mut Task, _clock: &VirtualClock, _slice_ns: TimeNs) -> Placement {
        Placement::Fifo
    }

    fn running(&self, _p: &Task, _clock: &VirtualClock) {}

    fn stopping(&self, _p: &mut Task, _slice_ns: TimeNs) {}

    fn enable(&self, _p: &mut Task, _clock: &VirtualClock) {}
}

/// Lowest weighted vtime first.
#[derive(Debug, Default, Clone, Copy)]
pub struct WeightedVtime;

impl WeightedVtime {
    /// Vtime charged for `used_ns` of execution at `weight`.
    pub fn charge(used_ns: TimeNs, weight: u32) -> u64 {
        used_ns * CGROUP_WEIGHT_DFL as u64 / weight.max(1) as u64
    }
}

impl Discipline for WeightedVtime {
    fn mode(&self) -> SchedMode {
        SchedMode::Vtime
    }

    fn enqueue(&self, p: &mut Task, clock: &VirtualClock, slice_ns: TimeNs) -> Placement {
        // Limit the amount of budget an idling task can accumulate to one
        // slice.
        let floor = clock.now().wrapping_sub(slice_ns);
        if p.dsq_vtime.before(floor) {
            p.dsq_vtime = floor;
        }
        Placement::Vtime(p.dsq_vtime)
    }

    fn running(&self, p: &Task, clock: &VirtualClock) {
        // Global vtime always progresses forward as tasks start executing.
        // Racing CPUs settle on the larger value.
        clock.advance(p.dsq_vtime);
    }

    fn stopping(&self, p: &mut Task, slice_ns: TimeNs) {
        // Scale the execution time by the inverse of the weight and charge.
        //
        // A yield sets the remaining slice to zero, so the task is charged
        // the whole slice however little of it ran.
        let used = slice_ns.saturating_sub(p.slice);
        p.dsq_vtime = p.dsq_vtime.wrapping_add(Self::charge(used, p.weight));
    }

    fn enable(&self, p: &mut Task, clock: &VirtualClock) {
        p.dsq_vtime = clock.now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Pid, SLICE_DFL};

    #[test]
    fn test_fifo_never_touches_vtime() {
        let clock = VirtualClock::new();
        clock.advance(Vtime(5_000));
        let fifo = new_discipline(SchedMode::Fifo);
        let mut p = Task::new(Pid(1), 100);
        p.dsq_vtime = Vtime(42);

        fifo.enable(&mut p, &clock);
        assert_eq!(fifo.enqueue(&mut p, &clock, SLICE_DFL), Placement::Fifo);
        fifo.running(&p, &clock);
        p.slice = 0;
        fifo.stopping(&mut p, SLICE_DFL);

        assert_eq!(p.dsq_vtime, Vtime(42));
        assert_eq!(clock.now(), Vtime(5_000));
    }

    #[test]
    fn test_enqueue_clamps_lag_to_one_slice() {
        let clock = VirtualClock::new();
        clock.advance(Vtime(100 * SLICE_DFL));
        let vt = WeightedVtime;

        let mut idle = Task::new(Pid(1), 100);
        assert_eq!(
            vt.enqueue(&mut idle, &clock, SLICE_DFL),
            Placement::Vtime(Vtime(99 * SLICE_DFL))
        );
        assert_eq!(idle.dsq_vtime, Vtime(99 * SLICE_DFL));

        // Within one slice of the clock: left alone.
        let mut recent = Task::new(Pid(2), 100);
        recent.dsq_vtime = Vtime(100 * SLICE_DFL - 5);
        vt.enqueue(&mut recent, &clock, SLICE_DFL);
        assert_eq!(recent.dsq_vtime, Vtime(100 * SLICE_DFL - 5));
    }

    #[test]
    fn test_enqueue_clamp_near_zero_clock() {
        // clock - slice wraps below zero; a task at vtime 0 is within one
        // slice of the clock and must not be raised to the wrapped value.
        let clock = VirtualClock::new();
        clock.advance(Vtime(1_000));
        let mut p = Task::new(Pid(1), 100);
        WeightedVtime.enqueue(&mut p, &clock, SLICE_DFL);
        assert_eq!(p.dsq_vtime, Vtime(0));
    }

    #[test]
    fn test_stopping_charges_by_weight() {
        let vt = WeightedVtime;
        let mut p = Task::new(Pid(1), 200);
        p.slice = SLICE_DFL / 2;
        vt.stopping(&mut p, SLICE_DFL);
        assert_eq!(p.dsq_vtime, Vtime(SLICE_DFL / 2 * 100 / 200));

        // Yield: slice forced to zero, whole slice charged.
        let mut y = Task::new(Pid(2), 100);
        y.slice = 0;
        vt.stopping(&mut y, SLICE_DFL);
        assert_eq!(y.dsq_vtime, Vtime(SLICE_DFL));
    }

    #[test]
    fn test_stopping_saturates_when_slice_grew() {
        let mut p = Task::new(Pid(1), 100);
        p.slice = SLICE_DFL * 2;
        WeightedVtime.stopping(&mut p, SLICE_DFL);
        assert_eq!(p.dsq_vtime, Vtime(0));
    }

    #[test]
    fn test_running_advances_clock_and_enable_syncs() {
        let clock = VirtualClock::new();
        let vt = WeightedVtime;
        let mut p = Task::new(Pid(1), 100);
        p.dsq_vtime = Vtime(700);
        vt.running(&p, &clock);
        assert_eq!(clock.now(), Vtime(700));

        p.dsq_vtime = Vtime(300);
        vt.running(&p, &clock);
        assert_eq!(clock.now(), Vtime(700));

        let mut q = Task::new(Pid(2), 100);
        vt.enable(&mut q, &clock);
        assert_eq!(q.dsq_vtime, Vtime(700));
    }

    #[test]
    fn test_mode_serde() {
        assert_eq!(serde_json::to_string(&SchedMode::Fifo).unwrap(), "\"fifo\"");
        let m: SchedMode = serde_json::from_str("\"vtime\"").unwrap();
        assert_eq!(m, SchedMode::Vtime);
    }
}
