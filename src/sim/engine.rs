// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Event-driven simulation engine.
//!
//! Maintains the event queue, the simulated clock and per-task state, and
//! drives the scheduler through its `SchedOps` callbacks exactly the way the
//! kernel's core scheduler would for a flat set of CPUs.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use log::debug;
use log::info;
use log::warn;

use crate::config::SchedConfig;
use crate::exit::{ExitInfo, ExitKind};
use crate::ops::SchedOps;
use crate::sim::host::SimHost;
use crate::sim::monitor::{Monitor, NullMonitor, ProbeContext, ProbePoint};
use crate::sim::scenario::Scenario;
use crate::sim::task::{Phase, SimTask, TaskState};
use crate::sim::trace::{Trace, TraceKind};
use crate::simple::{init_errno, SimpleScheduler};
use crate::types::{CpuId, EnqFlags, FmtN, Pid, TimeNs, WakeFlags};

/// A simulation event, ordered by timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Event {
    time_ns: TimeNs,
    /// Tiebreaker for events at the same time (lower = first).
    seq: u64,
    kind: EventKind,
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.time_ns
            .cmp(&other.time_ns)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum EventKind {
    /// A task becomes runnable.
    TaskWake { pid: Pid },
    /// The running task's slice expires.
    SliceExpired { cpu: CpuId },
    /// The running task finishes its current run phase.
    TaskPhaseComplete { cpu: CpuId },
    /// Periodic monitor sample.
    StatsTick,
}

/// Per-run mutable state.
struct RunState<'m, M> {
    tasks: HashMap<Pid, SimTask>,
    events: BinaryHeap<Reverse<Event>>,
    seq: u64,
    clock: TimeNs,
    trace: Trace,
    monitor: &'m mut M,
}

impl<M> RunState<'_, M> {
    fn push(&mut self, time_ns: TimeNs, kind: EventKind) {
        self.events.push(Reverse(Event {
            time_ns,
            seq: self.seq,
            kind,
        }));
        self.seq += 1;
    }

    fn record(&mut self, cpu: CpuId, kind: TraceKind) {
        self.trace.record(self.clock, cpu, kind);
    }
}

/// Drives a scheduler on a `SimHost`.
pub struct Simulator<S: SchedOps> {
    sched: S,
    host: Arc<SimHost>,
    shutdown: Option<Arc<AtomicBool>>,
    stats_interval_ns: Option<TimeNs>,
}

impl Simulator<SimpleScheduler<Arc<SimHost>>> {
    /// A `SimpleScheduler` attached to a fresh host.
    pub fn simple(nr_cpus: u32, cfg: &SchedConfig) -> Result<Self> {
        Self::simple_on(Arc::new(SimHost::new(nr_cpus)), cfg)
    }

    /// A `SimpleScheduler` attached to `host`.
    pub fn simple_on(host: Arc<SimHost>, cfg: &SchedConfig) -> Result<Self> {
        let sched = SimpleScheduler::new(host.clone(), cfg)?;
        Ok(Simulator::new(sched, host))
    }
}

impl<S: SchedOps> Simulator<S> {
    /// `sched` must issue its kfuncs against `host`.
    pub fn new(sched: S, host: Arc<SimHost>) -> Self {
        Simulator {
            sched,
            host,
            shutdown: None,
            stats_interval_ns: None,
        }
    }

    /// Stop at the next event once `shutdown` is set.
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Sample monitors with `ProbePoint::Tick` every `interval_ns`.
    pub fn with_stats_interval(mut self, interval_ns: TimeNs) -> Self {
        self.stats_interval_ns = Some(interval_ns).filter(|&ns| ns > 0);
        self
    }

    pub fn scheduler(&self) -> &S {
        &self.sched
    }

    pub fn host(&self) -> &SimHost {
        &self.host
    }

    /// Run a scenario and return the trace.
    pub fn run(&self, scenario: &Scenario) -> Result<Trace> {
        self.run_with_monitor(scenario, &mut NullMonitor)
    }

    /// Run a scenario, sampling `monitor` at every probe point.
    ///
    /// Fails only if `ops.init()` fails. A runtime error raised by the host
    /// ends the run early with an `ErrorBpf` exit delivered to the scheduler.
    pub fn run_with_monitor<M: Monitor<S>>(
        &self,
        scenario: &Scenario,
        monitor: &mut M,
    ) -> Result<Trace> {
        self.host.reset(scenario.nr_cpus);
        self.host.set_current_cpu(CpuId(0));

        info!(
            "simulating {} on {} CPUs with {} tasks for {}ns",
            self.sched.name(),
            scenario.nr_cpus,
            scenario.tasks.len(),
            FmtN(scenario.duration_ns)
        );

        if let Err(err) = self.sched.init() {
            let errno = init_errno(&err);
            warn!("{} init failed: {:#}", self.sched.name(), err);
            self.sched.exit(&ExitInfo::new(
                ExitKind::Error,
                format!("ops.init() failed ({})", errno),
            ));
            return Err(err.context(format!("{} failed to initialize", self.sched.name())));
        }

        let mut st = RunState {
            tasks: scenario
                .tasks
                .iter()
                .map(|def| (def.pid, SimTask::new(def)))
                .collect(),
            events: BinaryHeap::new(),
            seq: 0,
            clock: 0,
            trace: Trace::new(),
            monitor,
        };

        for def in &scenario.tasks {
            st.push(def.start_time_ns, EventKind::TaskWake { pid: def.pid });
        }
        if let Some(interval) = self.stats_interval_ns {
            st.push(interval, EventKind::StatsTick);
        }

        let mut exit = ExitInfo::new(ExitKind::Unreg, "");
        while let Some(Reverse(event)) = st.events.pop() {
            if event.time_ns > scenario.duration_ns {
                break;
            }
            if self
                .shutdown
                .as_ref()
                .is_some_and(|s| s.load(Ordering::Relaxed))
            {
                info!("shutdown requested at {}ns", FmtN(st.clock));
                break;
            }

            st.clock = event.time_ns;

            match event.kind {
                EventKind::TaskWake { pid } => self.handle_task_wake(pid, &mut st),
                EventKind::SliceExpired { cpu } => self.handle_slice_expired(cpu, &mut st),
                EventKind::TaskPhaseComplete { cpu } => {
                    self.handle_task_phase_complete(cpu, &mut st, scenario.duration_ns)
                }
                EventKind::StatsTick => {
                    self.probe(&mut st, ProbePoint::Tick, CpuId(0), None);
                    if let Some(interval) = self.stats_interval_ns {
                        st.push(st.clock.saturating_add(interval), EventKind::StatsTick);
                    }
                }
            }

            if let Some(err) = self.host.take_error() {
                warn!("runtime error at {}ns: {:#}", FmtN(st.clock), err);
                exit = ExitInfo::new(ExitKind::ErrorBpf, format!("{:#}", err));
                break;
            }
        }

        self.sched.exit(&exit);
        info!("{} exited: {}", self.sched.name(), exit.reason);

        Ok(st.trace)
    }

    fn probe<M: Monitor<S>>(
        &self,
        st: &mut RunState<'_, M>,
        point: ProbePoint,
        cpu: CpuId,
        pid: Option<Pid>,
    ) {
        let ctx = ProbeContext {
            point,
            pid,
            cpu,
            time_ns: st.clock,
            task: pid.and_then(|pid| st.tasks.get(&pid)).map(|t| &t.task),
            sched: &self.sched,
            trace: &st.trace,
        };
        st.monitor.sample(&ctx);
    }

    fn handle_task_wake<M: Monitor<S>>(&self, pid: Pid, st: &mut RunState<'_, M>) {
        let Some(task) = st.tasks.get_mut(&pid) else {
            return;
        };
        if task.state != TaskState::Sleeping {
            return;
        }

        // Waking from a sleep phase: move on to what follows it.
        if matches!(task.current_phase(), Some(Phase::Sleep(_))) && !task.advance_phase() {
            task.state = TaskState::Exited;
            let cpu = task.prev_cpu;
            st.record(cpu, TraceKind::TaskCompleted { pid });
            return;
        }

        task.state = TaskState::Runnable;
        let prev_cpu = task.prev_cpu;
        self.host.set_current_cpu(prev_cpu);

        if !task.enabled {
            task.enabled = true;
            debug!("enable pid={}", pid.0);
            self.sched.enable(&mut task.task);
        }

        self.host.clear_pending_dispatch();
        let mut selected = self
            .sched
            .select_cpu(&mut task.task, prev_cpu, WakeFlags::TTWU);
        if !self.host.is_valid_cpu(selected) {
            warn!(
                "select_cpu returned invalid CPU {} for pid {}",
                selected.0, pid.0
            );
            selected = prev_cpu;
        }
        task.prev_cpu = selected;
        let direct = self.host.resolve_pending_dispatch(selected);

        st.record(prev_cpu, TraceKind::TaskWoke { pid });
        st.record(
            prev_cpu,
            TraceKind::SelectCpu {
                pid,
                prev_cpu,
                selected_cpu: selected,
                direct: direct.is_some(),
            },
        );

        if let Some(cpu) = direct {
            // Dispatched straight to a local DSQ: enqueue is skipped.
            self.try_dispatch_and_run(cpu, st);
            return;
        }

        self.enqueue(pid, selected, EnqFlags::WAKEUP, st);
        for cpu in self.host.idle_cpus() {
            self.try_dispatch_and_run(cpu, st);
        }
    }

    /// Call `ops.enqueue()` on `cpu` and resolve the insertion.
    fn enqueue<M: Monitor<S>>(
        &self,
        pid: Pid,
        cpu: CpuId,
        enq_flags: EnqFlags,
        st: &mut RunState<'_, M>,
    ) {
        let Some(task) = st.tasks.get_mut(&pid) else {
            return;
        };
        self.host.set_current_cpu(cpu);
        self.sched.enqueue(&mut task.task, enq_flags);
        let local = self.host.resolve_pending_dispatch(cpu);
        st.record(cpu, TraceKind::Enqueue { pid });
        self.probe(st, ProbePoint::Enqueued, cpu, Some(pid));
        if let Some(local_cpu) = local {
            if local_cpu != cpu {
                self.try_dispatch_and_run(local_cpu, st);
            }
        }
    }

    /// Take the running task off `cpu` and call `ops.stopping()`.
    fn stop_running<M: Monitor<S>>(
        &self,
        cpu: CpuId,
        pid: Pid,
        runnable: bool,
        st: &mut RunState<'_, M>,
    ) {
        self.host.stop(cpu);
        if let Some(task) = st.tasks.get_mut(&pid) {
            task.state = if runnable {
                TaskState::Runnable
            } else {
                TaskState::Sleeping
            };
            self.host.set_current_cpu(cpu);
            self.sched.stopping(&mut task.task, runnable);
        }
        self.probe(st, ProbePoint::Stopping, cpu, Some(pid));
    }

    fn handle_slice_expired<M: Monitor<S>>(&self, cpu: CpuId, st: &mut RunState<'_, M>) {
        let Some(pid) = self.host.current_task(cpu) else {
            return;
        };
        let Some(task) = st.tasks.get_mut(&pid) else {
            return;
        };

        // The whole slice was consumed.
        task.run_remaining_ns = task.run_remaining_ns.saturating_sub(task.task.slice);
        debug!(
            "cpu {} pid {} preempted after {}ns",
            cpu.0,
            pid.0,
            FmtN(task.task.slice)
        );
        task.task.slice = 0;

        self.stop_running(cpu, pid, true, st);
        st.record(cpu, TraceKind::TaskPreempted { pid });
        self.enqueue(pid, cpu, EnqFlags::NONE, st);
        self.try_dispatch_and_run(cpu, st);
    }

    fn handle_task_phase_complete<M: Monitor<S>>(
        &self,
        cpu: CpuId,
        st: &mut RunState<'_, M>,
        duration_ns: TimeNs,
    ) {
        let Some(pid) = self.host.current_task(cpu) else {
            return;
        };
        let Some(task) = st.tasks.get_mut(&pid) else {
            return;
        };

        let consumed = task.run_remaining_ns;
        task.run_remaining_ns = 0;
        task.task.slice = task.task.slice.saturating_sub(consumed);

        let next = if task.advance_phase() {
            task.current_phase().copied()
        } else {
            None
        };

        match next {
            None => {
                self.stop_running(cpu, pid, false, st);
                if let Some(task) = st.tasks.get_mut(&pid) {
                    task.state = TaskState::Exited;
                }
                st.record(cpu, TraceKind::TaskCompleted { pid });
                debug!("cpu {} pid {} completed", cpu.0, pid.0);
            }
            Some(Phase::Sleep(sleep_ns)) => {
                self.stop_running(cpu, pid, false, st);
                st.record(cpu, TraceKind::TaskSlept { pid });
                let wake_at = st.clock.saturating_add(sleep_ns);
                if wake_at <= duration_ns {
                    st.push(wake_at, EventKind::TaskWake { pid });
                }
            }
            Some(Phase::Yield) => {
                // sched_yield() forfeits the rest of the slice.
                task.task.slice = 0;
                task.advance_phase();
                self.stop_running(cpu, pid, true, st);
                st.record(cpu, TraceKind::TaskYielded { pid });
                self.enqueue(pid, cpu, EnqFlags::NONE, st);
            }
            Some(Phase::Run(_)) => {
                self.stop_running(cpu, pid, true, st);
                st.record(cpu, TraceKind::TaskRequeued { pid });
                self.enqueue(pid, cpu, EnqFlags::NONE, st);
            }
        }

        self.try_dispatch_and_run(cpu, st);
    }

    /// Find work for `cpu` if it is not running anything.
    fn try_dispatch_and_run<M: Monitor<S>>(&self, cpu: CpuId, st: &mut RunState<'_, M>) {
        if self.host.current_task(cpu).is_some() {
            return;
        }

        loop {
            if self.host.local_is_empty(cpu) && !self.host.consume_global(cpu) {
                let prev = self
                    .host
                    .prev_task(cpu)
                    .and_then(|pid| st.tasks.get(&pid))
                    .map(|t| &t.task);
                self.host.set_current_cpu(cpu);
                self.sched.dispatch(cpu, prev);
                self.host.resolve_pending_dispatch(cpu);
                st.record(cpu, TraceKind::Dispatch);
                self.probe(st, ProbePoint::Dispatched, cpu, None);
            }

            let Some(pid) = self.host.pop_local(cpu) else {
                st.record(cpu, TraceKind::CpuIdle);
                debug!("cpu {} idle", cpu.0);
                return;
            };

            // Skip tasks that exited while still queued.
            let runnable = st
                .tasks
                .get(&pid)
                .is_some_and(|t| t.state == TaskState::Runnable);
            if runnable {
                self.start_running(cpu, pid, st);
                return;
            }
            warn!("cpu {} dropping non-runnable pid {} from local DSQ", cpu.0, pid.0);
        }
    }

    fn start_running<M: Monitor<S>>(&self, cpu: CpuId, pid: Pid, st: &mut RunState<'_, M>) {
        let Some(task) = st.tasks.get_mut(&pid) else {
            return;
        };

        task.state = TaskState::Running { cpu };
        task.prev_cpu = cpu;
        self.host.set_running(cpu, pid);
        self.host.set_current_cpu(cpu);
        self.sched.running(&task.task);

        let slice = task.task.slice;
        let remaining = task.run_remaining_ns;
        debug!(
            "cpu {} running pid {} ({}) slice={}ns remaining={}ns",
            cpu.0,
            pid.0,
            task.name,
            FmtN(slice),
            FmtN(remaining)
        );

        st.record(cpu, TraceKind::TaskScheduled { pid });
        self.probe(st, ProbePoint::Running, cpu, Some(pid));

        if slice > 0 && slice < remaining {
            st.push(st.clock.saturating_add(slice), EventKind::SliceExpired { cpu });
        } else {
            st.push(st.clock.saturating_add(remaining), EventKind::TaskPhaseComplete { cpu });
        }
    }
}
