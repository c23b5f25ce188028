// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Scripted workloads: what each simulated task does and where it is.
//!
//! Each simulated task follows a scripted behavior and carries the
//! scheduling annotation (`Task`) that the scheduler reads and writes.

use serde::Deserialize;
use serde::Serialize;

use crate::task::Task;
use crate::types::{CpuId, Pid, TimeNs, Weight};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Not runnable.
    Sleeping,
    /// Runnable but not executing.
    Runnable,
    Running { cpu: CpuId },
    /// Completed all phases.
    Exited,
}

/// One step of a scripted workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Consume CPU for the given number of nanoseconds.
    Run(TimeNs),
    /// Block for the given number of nanoseconds.
    Sleep(TimeNs),
    /// `sched_yield()`: give up the rest of the slice and stay runnable.
    Yield,
}

/// A sequence of phases, optionally repeating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskBehavior {
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub repeat: bool,
}

impl TaskBehavior {
    /// Run forever, never sleeping.
    pub fn cpu_bound(run_ns: TimeNs) -> Self {
        TaskBehavior {
            phases: vec![Phase::Run(run_ns)],
            repeat: true,
        }
    }

    /// Alternate between running and sleeping forever.
    pub fn run_sleep(run_ns: TimeNs, sleep_ns: TimeNs) -> Self {
        TaskBehavior {
            phases: vec![Phase::Run(run_ns), Phase::Sleep(sleep_ns)],
            repeat: true,
        }
    }

    /// Run a little and yield, forever.
    pub fn run_yield(run_ns: TimeNs) -> Self {
        TaskBehavior {
            phases: vec![Phase::Run(run_ns), Phase::Yield],
            repeat: true,
        }
    }

    /// Run once and exit.
    pub fn oneshot(run_ns: TimeNs) -> Self {
        TaskBehavior {
            phases: vec![Phase::Run(run_ns)],
            repeat: false,
        }
    }

    /// The phase after `idx`, wrapping if the behavior repeats.
    fn next_of(&self, idx: usize) -> Option<&Phase> {
        match self.phases.get(idx + 1) {
            Some(phase) => Some(phase),
            None if self.repeat => self.phases.first(),
            None => None,
        }
    }

    /// Check that the behavior can be simulated: it starts with a run phase
    /// and every sleep or yield is followed by one.
    pub fn validate(&self) -> std::result::Result<(), String> {
        match self.phases.first() {
            Some(Phase::Run(_)) => {}
            Some(other) => return Err(format!("must start with a run phase, not {:?}", other)),
            None => return Err("has no phases".into()),
        }
        for (idx, phase) in self.phases.iter().enumerate() {
            match (phase, self.next_of(idx)) {
                (Phase::Run(0), _) => return Err(format!("phase {} runs for 0ns", idx)),
                (Phase::Yield, None) => {
                    return Err(format!("yield at phase {} is not followed by a run", idx))
                }
                (Phase::Sleep(_) | Phase::Yield, Some(next)) if !matches!(next, Phase::Run(_)) => {
                    return Err(format!(
                        "phase {} ({:?}) must be followed by a run, not {:?}",
                        idx, phase, next
                    ))
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// A task as declared in a scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDef {
    pub name: String,
    pub pid: Pid,
    pub weight: Weight,
    pub behavior: TaskBehavior,
    /// When the task first becomes runnable.
    pub start_time_ns: TimeNs,
}

/// Live state of a task during a run.
#[derive(Debug)]
pub struct SimTask {
    pub task: Task,
    pub name: String,
    pub behavior: TaskBehavior,
    pub phase_idx: usize,
    /// Work left in the current run phase.
    pub run_remaining_ns: TimeNs,
    pub state: TaskState,
    /// Whether `ops.enable()` has been called.
    pub enabled: bool,
    /// Last CPU the task ran on, passed to `select_cpu` as `prev_cpu`.
    pub prev_cpu: CpuId,
}

impl SimTask {
    pub fn new(def: &TaskDef) -> Self {
        let run_remaining_ns = if let Some(&Phase::Run(ns)) = def.behavior.phases.first() {
            ns
        } else {
            0
        };
        SimTask {
            task: Task::new(def.pid, def.weight),
            name: def.name.clone(),
            behavior: def.behavior.clone(),
            phase_idx: 0,
            run_remaining_ns,
            state: TaskState::Sleeping,
            enabled: false,
            prev_cpu: CpuId(0),
        }
    }

    pub fn pid(&self) -> Pid {
        self.task.pid
    }

    pub fn current_phase(&self) -> Option<&Phase> {
        self.behavior.phases.get(self.phase_idx)
    }

    /// Step to the next phase, loading its run budget. False once a
    /// non-repeating behavior has no phases left.
    pub fn advance_phase(&mut self) -> bool {
        let len = self.behavior.phases.len();
        self.phase_idx = match self.phase_idx + 1 {
            next if next < len => next,
            _ if self.behavior.repeat => 0,
            _ => {
                self.phase_idx = len;
                return false;
            }
        };
        if let Some(&Phase::Run(ns)) = self.behavior.phases.get(self.phase_idx) {
            self.run_remaining_ns = ns;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(TaskBehavior::run_sleep(1, 1).validate().is_ok());
        assert!(TaskBehavior::run_yield(1).validate().is_ok());
        assert!(TaskBehavior::oneshot(1).validate().is_ok());

        let sleep_first = TaskBehavior {
            phases: vec![Phase::Sleep(1), Phase::Run(1)],
            repeat: true,
        };
        assert!(sleep_first.validate().is_err());

        let trailing_yield = TaskBehavior {
            phases: vec![Phase::Run(1), Phase::Yield],
            repeat: false,
        };
        assert!(trailing_yield.validate().is_err());

        let yield_sleep = TaskBehavior {
            phases: vec![Phase::Run(1), Phase::Yield, Phase::Sleep(1)],
            repeat: true,
        };
        assert!(yield_sleep.validate().is_err());

        // A non-repeating behavior may end with a sleep.
        let sleep_last = TaskBehavior {
            phases: vec![Phase::Run(1), Phase::Sleep(1)],
            repeat: false,
        };
        assert!(sleep_last.validate().is_ok());
    }

    #[test]
    fn test_advance_phase_wraps() {
        let def = TaskDef {
            name: "t".into(),
            pid: Pid(1),
            weight: 100,
            behavior: TaskBehavior::run_sleep(10, 20),
            start_time_ns: 0,
        };
        let mut t = SimTask::new(&def);
        assert_eq!(t.run_remaining_ns, 10);
        t.run_remaining_ns = 0;
        assert!(t.advance_phase());
        assert_eq!(t.current_phase(), Some(&Phase::Sleep(20)));
        assert!(t.advance_phase());
        assert_eq!(t.current_phase(), Some(&Phase::Run(10)));
        assert_eq!(t.run_remaining_ns, 10);
    }

    #[test]
    fn test_phase_json() {
        let b: TaskBehavior =
            serde_json::from_str(r#"{"phases": [{"run": 5}, "yield", {"sleep": 7}]}"#).unwrap();
        assert_eq!(b.phases, vec![Phase::Run(5), Phase::Yield, Phase::Sleep(7)]);
        assert!(!b.repeat);
    }
}
