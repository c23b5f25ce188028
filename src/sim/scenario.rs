// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Scenario definition, builder API and JSON scenario files.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

use crate::sim::task::{TaskBehavior, TaskDef};
use crate::task::{nice_to_weight, CGROUP_WEIGHT_DFL, CGROUP_WEIGHT_MAX, CGROUP_WEIGHT_MIN};
use crate::types::{Pid, TimeNs, Weight};

/// A complete simulation scenario: CPUs, tasks, and duration.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub nr_cpus: u32,
    pub tasks: Vec<TaskDef>,
    pub duration_ns: TimeNs,
}

pub struct ScenarioBuilder {
    nr_cpus: u32,
    tasks: Vec<TaskDef>,
    duration_ns: TimeNs,
    next_pid: Pid,
    /// First invalid input seen by a chained setter, reported by `build`.
    error: Option<String>,
}

impl Scenario {
    pub fn builder() -> ScenarioBuilder {
        ScenarioBuilder {
            nr_cpus: 1,
            tasks: Vec::new(),
            duration_ns: 100_000_000,
            next_pid: Pid(1),
            error: None,
        }
    }

    /// Load a scenario from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        let file: ScenarioFile = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse scenario {}", path.display()))?;
        file.into_scenario()
            .with_context(|| format!("invalid scenario {}", path.display()))
    }

    pub fn task(&self, pid: Pid) -> Option<&TaskDef> {
        self.tasks.iter().find(|t| t.pid == pid)
    }
}

impl ScenarioBuilder {
    pub fn cpus(mut self, n: u32) -> Self {
        self.nr_cpus = n;
        self
    }

    fn fail(&mut self, why: String) {
        if self.error.is_none() {
            self.error = Some(why);
        }
    }

    /// Add a task with a full TaskDef.
    pub fn task(mut self, def: TaskDef) -> Self {
        match def.pid.0.checked_add(1) {
            Some(next) => self.next_pid = Pid(self.next_pid.0.max(next)),
            None => self.fail(format!("task {}: pid {} is too large", def.name, def.pid.0)),
        }
        self.tasks.push(def);
        self
    }

    /// Add a task with an auto-assigned PID.
    pub fn add_task(self, name: &str, weight: Weight, behavior: TaskBehavior) -> Self {
        self.add_task_at(name, weight, behavior, 0)
    }

    /// Add a task with an auto-assigned PID that first wakes at
    /// `start_time_ns`.
    pub fn add_task_at(
        mut self,
        name: &str,
        weight: Weight,
        behavior: TaskBehavior,
        start_time_ns: TimeNs,
    ) -> Self {
        let pid = self.next_pid;
        match pid.0.checked_add(1) {
            Some(next) => self.next_pid = Pid(next),
            None => self.fail(format!("task {}: ran out of pids", name)),
        }
        self.tasks.push(TaskDef {
            name: name.to_string(),
            pid,
            weight,
            behavior,
            start_time_ns,
        });
        self
    }

    pub fn duration_ns(mut self, ns: TimeNs) -> Self {
        self.duration_ns = ns;
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        match ms.checked_mul(1_000_000) {
            Some(ns) => self.duration_ns = ns,
            None => self.fail(format!("duration {}ms overflows", ms)),
        }
        self
    }

    pub fn build(self) -> Result<Scenario> {
        if let Some(why) = self.error {
            bail!(why);
        }
        if self.nr_cpus == 0 {
            bail!("scenario must have at least one CPU");
        }
        if self.tasks.is_empty() {
            bail!("scenario must have at least one task");
        }
        let mut pids = HashSet::new();
        for def in &self.tasks {
            if !pids.insert(def.pid) {
                bail!("duplicate pid {} ({})", def.pid.0, def.name);
            }
            if !(CGROUP_WEIGHT_MIN..=CGROUP_WEIGHT_MAX).contains(&def.weight) {
                bail!(
                    "task {} weight {} out of range {}..={}",
                    def.name,
                    def.weight,
                    CGROUP_WEIGHT_MIN,
                    CGROUP_WEIGHT_MAX
                );
            }
            if let Err(why) = def.behavior.validate() {
                bail!("task {} behavior {}", def.name, why);
            }
        }
        Ok(Scenario {
            nr_cpus: self.nr_cpus,
            tasks: self.tasks,
            duration_ns: self.duration_ns,
        })
    }
}

/// On-disk scenario format.
///
/// ```json
/// {
///   "cpus": 2,
///   "duration_ms": 500,
///   "tasks": [
///     { "name": "hog", "nice": -3, "phases": [{"run": 20000000}], "repeat": true },
///     { "name": "io", "phases": [{"run": 100000}, {"sleep": 5000000}], "repeat": true }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioFile {
    #[serde(default = "ScenarioFile::default_cpus")]
    pub cpus: u32,
    pub duration_ms: u64,
    pub tasks: Vec<TaskSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    #[serde(default)]
    pub pid: Option<i32>,
    /// Nice value; mutually exclusive with `weight`.
    #[serde(default)]
    pub nice: Option<i8>,
    #[serde(default)]
    pub weight: Option<Weight>,
    #[serde(default)]
    pub start_ns: TimeNs,
    #[serde(flatten)]
    pub behavior: TaskBehavior,
}

impl ScenarioFile {
    fn default_cpus() -> u32 {
        1
    }

    pub fn into_scenario(self) -> Result<Scenario> {
        let mut builder = Scenario::builder()
            .cpus(self.cpus)
            .duration_ms(self.duration_ms);
        for spec in self.tasks {
            let weight = match (spec.nice, spec.weight) {
                (Some(_), Some(_)) => bail!("task {}: set either nice or weight", spec.name),
                (Some(nice), None) => {
                    if !(-20..=19).contains(&nice) {
                        bail!("task {}: nice {} out of range -20..=19", spec.name, nice);
                    }
                    nice_to_weight(nice)
                }
                (None, Some(weight)) => weight,
                (None, None) => CGROUP_WEIGHT_DFL,
            };
            builder = match spec.pid {
                Some(pid) => builder.task(TaskDef {
                    name: spec.name,
                    pid: Pid(pid),
                    weight,
                    behavior: spec.behavior,
                    start_time_ns: spec.start_ns,
                }),
                None => builder.add_task_at(&spec.name, weight, spec.behavior, spec.start_ns),
            };
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::task::Phase;

    #[test]
    fn test_builder_assigns_pids() {
        let s = Scenario::builder()
            .cpus(2)
            .add_task("a", 100, TaskBehavior::cpu_bound(1_000))
            .add_task("b", 200, TaskBehavior::cpu_bound(1_000))
            .duration_ms(10)
            .build()
            .unwrap();
        assert_eq!(s.tasks[0].pid, Pid(1));
        assert_eq!(s.tasks[1].pid, Pid(2));
        assert_eq!(s.duration_ns, 10_000_000);
        assert_eq!(s.task(Pid(2)).unwrap().weight, 200);
    }

    #[test]
    fn test_builder_rejects_bad_input() {
        assert!(Scenario::builder().build().is_err());
        assert!(Scenario::builder()
            .cpus(0)
            .add_task("a", 100, TaskBehavior::cpu_bound(1))
            .build()
            .is_err());
        assert!(Scenario::builder()
            .add_task("a", 0, TaskBehavior::cpu_bound(1))
            .build()
            .is_err());
        let err = Scenario::builder()
            .add_task(
                "a",
                100,
                TaskBehavior {
                    phases: vec![Phase::Yield],
                    repeat: true,
                },
            )
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("run phase"), "{err}");
    }

    #[test]
    fn test_file_format() {
        let json = r#"{
            "cpus": 2,
            "duration_ms": 50,
            "tasks": [
                {"name": "hog", "nice": -3, "phases": [{"run": 20000000}], "repeat": true},
                {"name": "io", "pid": 10, "phases": [{"run": 1000}, {"sleep": 5000}]},
                {"name": "late", "weight": 50, "start_ns": 7, "phases": [{"run": 1}]}
            ]
        }"#;
        let file: ScenarioFile = serde_json::from_str(json).unwrap();
        let s = file.into_scenario().unwrap();
        assert_eq!(s.nr_cpus, 2);
        assert_eq!(s.tasks[0].weight, 194);
        assert_eq!(s.tasks[1].pid, Pid(10));
        assert_eq!(s.tasks[2].pid, Pid(11));
        assert_eq!(s.tasks[2].weight, 50);
        assert_eq!(s.tasks[2].start_time_ns, 7);
    }

    #[test]
    fn test_builder_rejects_overflow() {
        let err = Scenario::builder()
            .add_task("a", 100, TaskBehavior::cpu_bound(1))
            .duration_ms(u64::MAX / 1_000)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("overflows"), "{err}");

        let err = Scenario::builder()
            .task(TaskDef {
                name: "last".into(),
                pid: Pid(i32::MAX),
                weight: 100,
                behavior: TaskBehavior::cpu_bound(1),
                start_time_ns: 0,
            })
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("task last: pid"), "{err}");
    }

    #[test]
    fn test_file_rejects_nice_and_weight() {
        let json = r#"{"duration_ms": 1, "tasks": [
            {"name": "x", "nice": 0, "weight": 100, "phases": [{"run": 1}]}
        ]}"#;
        let file: ScenarioFile = serde_json::from_str(json).unwrap();
        assert!(file.into_scenario().is_err());
    }
}
