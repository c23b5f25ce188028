// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Per-task scheduling annotation.
//!
//! The host owns task identity and memory. The policy only reads and writes
//! the sched_ext sub-record (`p->scx` in the kernel): virtual time, the
//! remaining slice and the weight.

use crate::types::{Pid, TimeNs, Vtime, Weight};

/// Kernel sched_prio_to_weight table from kernel/sched/core.c.
/// Maps nice levels -20..19 (indices 0..39) to scheduler weights.
const SCHED_PRIO_TO_WEIGHT: [u32; 40] = [
    /* -20 */ 88761, 71755, 56483, 46273, 36291, /* -15 */ 29154, 23254, 18705, 14949,
    11916, /* -10 */ 9548, 7620, 6100, 4904, 3906, /*  -5 */ 3121, 2501, 1991, 1586,
    1277, /*   0 */ 1024, 820, 655, 526, 423, /*   5 */ 335, 272, 215, 172, 137,
    /*  10 */ 110, 87, 70, 56, 45, /*  15 */ 36, 29, 23, 18, 15,
];

pub const CGROUP_WEIGHT_MIN: Weight = 1;
pub const CGROUP_WEIGHT_DFL: Weight = 100;
pub const CGROUP_WEIGHT_MAX: Weight = 10000;

/// Convert a nice value to the sched_ext weight (100 == nice 0).
///
/// # Panics
/// Panics if `nice` is outside `-20..=19`.
pub fn nice_to_weight(nice: i8) -> Weight {
    assert!(
        (-20..=19).contains(&nice),
        "nice value {nice} out of range -20..=19"
    );
    sched_weight_to_cgroup(SCHED_PRIO_TO_WEIGHT[(nice + 20) as usize])
}

/// Rescale a sched_prio_to_weight value into cgroup-weight space, rounding
/// to the closest value like the kernel's `sched_weight_to_cgroup()`.
pub fn sched_weight_to_cgroup(weight: u32) -> Weight {
    let cg = ((weight as u64 * CGROUP_WEIGHT_DFL as u64) + 512) / 1024;
    (cg as Weight).clamp(CGROUP_WEIGHT_MIN, CGROUP_WEIGHT_MAX)
}

/// The sched_ext view of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub pid: Pid,
    /// Accumulated virtual runtime; only meaningful in vtime mode.
    pub dsq_vtime: Vtime,
    /// Time left in the current dispatch. Set at every queue insertion;
    /// zeroed by a voluntary yield.
    pub slice: TimeNs,
    /// Always within `[CGROUP_WEIGHT_MIN, CGROUP_WEIGHT_MAX]`.
    pub weight: Weight,
}

impl Task {
    pub fn new(pid: Pid, weight: Weight) -> Self {
        Task {
            pid,
            dsq_vtime: Vtime(0),
            slice: 0,
            weight: weight.clamp(CGROUP_WEIGHT_MIN, CGROUP_WEIGHT_MAX),
        }
    }

    pub fn with_nice(pid: Pid, nice: i8) -> Self {
        Self::new(pid, nice_to_weight(nice))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nice_to_weight() {
        assert_eq!(nice_to_weight(0), 100);
        // 1991 * 100 / 1024 = 194.4
        assert_eq!(nice_to_weight(-3), 194);
        assert_eq!(nice_to_weight(-20), 8668);
        assert_eq!(nice_to_weight(19), 1);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_nice_out_of_range() {
        nice_to_weight(20);
    }

    #[test]
    fn test_task_weight_clamped() {
        assert_eq!(Task::new(Pid(1), 0).weight, CGROUP_WEIGHT_MIN);
        assert_eq!(Task::new(Pid(1), 50_000).weight, CGROUP_WEIGHT_MAX);
        let t = Task::with_nice(Pid(7), 0);
        assert_eq!(t.weight, 100);
        assert_eq!(t.dsq_vtime, Vtime(0));
        assert_eq!(t.slice, 0);
    }
}
