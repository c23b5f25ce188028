// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Simulated host: CPU state, DSQ storage and the kfuncs the scheduler
//! calls.
//!
//! Like the kernel, `dsq_insert` does not queue the task right away. It
//! records a pending dispatch that the engine resolves after the callback
//! returns, so that `DsqId::LOCAL` maps to the CPU `select_cpu` picked (or
//! the CPU running `enqueue`/`dispatch`).

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use anyhow::anyhow;
use anyhow::Result;
use log::debug;
use log::warn;

use crate::dsq::{Dsq, DsqTable};
use crate::kfuncs::Kfuncs;
use crate::simple::errno_error;
use crate::task::Task;
use crate::types::{CpuId, DsqId, EnqFlags, FmtN, Pid, TimeNs, Vtime, WakeFlags};

/// A deferred insertion recorded by `dsq_insert[_vtime]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDispatch {
    pub pid: Pid,
    pub dsq_id: DsqId,
    pub enq_flags: EnqFlags,
    pub vtime: Option<Vtime>,
}

/// Per-CPU execution state.
#[derive(Debug)]
struct CpuSlot {
    id: CpuId,
    current: Option<Pid>,
    /// Last task that stopped here, handed to `ops.dispatch()` as `prev`.
    prev: Option<Pid>,
    local: VecDeque<Pid>,
}

impl CpuSlot {
    fn new(id: CpuId) -> Self {
        CpuSlot {
            id,
            current: None,
            prev: None,
            local: VecDeque::new(),
        }
    }

    /// Idle as `scx_bpf_select_cpu_dfl()` sees it: nothing running and
    /// nothing queued locally.
    fn is_idle(&self) -> bool {
        self.current.is_none() && self.local.is_empty()
    }

    fn run(&mut self, pid: Pid) {
        self.current = Some(pid);
        self.prev = None;
    }

    fn stop(&mut self) -> Option<Pid> {
        self.prev = self.current.take();
        self.prev
    }
}

#[derive(Debug, Default)]
struct HostState {
    cpus: Vec<CpuSlot>,
    current_cpu: CpuId,
    pending_dispatch: Option<PendingDispatch>,
    /// First runtime error raised by a kfunc, like `scx_bpf_error()`.
    error: Option<anyhow::Error>,
}

impl HostState {
    fn fail(&mut self, err: anyhow::Error) {
        warn!("host error: {:#}", err);
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn cpu_mut(&mut self, cpu: CpuId) -> Option<&mut CpuSlot> {
        self.cpus.get_mut(cpu.0 as usize)
    }
}

#[derive(Debug)]
pub struct SimHost {
    state: Mutex<HostState>,
    dsqs: DsqTable,
    global: Dsq,
}

impl SimHost {
    pub fn new(nr_cpus: u32) -> Self {
        Self::with_dsq_capacity(nr_cpus, DsqTable::DFL_CAPACITY)
    }

    /// A host that can hold at most `capacity` user DSQs. With zero,
    /// `create_dsq` always fails with ENOMEM.
    pub fn with_dsq_capacity(nr_cpus: u32, capacity: usize) -> Self {
        let host = SimHost {
            state: Mutex::new(HostState::default()),
            dsqs: DsqTable::with_capacity(capacity),
            global: Dsq::new(DsqId::GLOBAL),
        };
        host.reset(nr_cpus);
        host
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bring the host back to boot state: idle CPUs, no DSQs.
    pub fn reset(&self, nr_cpus: u32) {
        let mut state = self.lock();
        state.cpus = (0..nr_cpus).map(|i| CpuSlot::new(CpuId(i))).collect();
        state.current_cpu = CpuId(0);
        state.pending_dispatch = None;
        state.error = None;
        self.dsqs.clear();
        while self.global.pop().is_some() {}
    }

    pub fn nr_cpus(&self) -> u32 {
        self.lock().cpus.len() as u32
    }

    pub fn is_valid_cpu(&self, cpu: CpuId) -> bool {
        (cpu.0 as usize) < self.lock().cpus.len()
    }

    /// Set the CPU the next callback runs on.
    pub fn set_current_cpu(&self, cpu: CpuId) {
        self.lock().current_cpu = cpu;
    }

    pub fn current_task(&self, cpu: CpuId) -> Option<Pid> {
        self.lock().cpus.get(cpu.0 as usize)?.current
    }

    pub fn prev_task(&self, cpu: CpuId) -> Option<Pid> {
        self.lock().cpus.get(cpu.0 as usize)?.prev
    }

    pub fn set_running(&self, cpu: CpuId, pid: Pid) {
        if let Some(c) = self.lock().cpu_mut(cpu) {
            c.run(pid);
        }
    }

    /// Take the running task off `cpu`, remembering it as `prev`.
    pub fn stop(&self, cpu: CpuId) -> Option<Pid> {
        self.lock().cpu_mut(cpu)?.stop()
    }

    pub fn pop_local(&self, cpu: CpuId) -> Option<Pid> {
        self.lock().cpu_mut(cpu)?.local.pop_front()
    }

    pub fn local_is_empty(&self, cpu: CpuId) -> bool {
        self.lock()
            .cpus
            .get(cpu.0 as usize)
            .map_or(true, |c| c.local.is_empty())
    }

    pub fn idle_cpus(&self) -> Vec<CpuId> {
        self.lock()
            .cpus
            .iter()
            .filter(|c| c.is_idle())
            .map(|c| c.id)
            .collect()
    }

    /// Move the head of the built-in global DSQ to `cpu`, as the kernel
    /// does before calling `ops.dispatch()`.
    pub fn consume_global(&self, cpu: CpuId) -> bool {
        let mut state = self.lock();
        let Some(c) = state.cpu_mut(cpu) else {
            return false;
        };
        match self.global.pop() {
            Some(pid) => {
                c.local.push_back(pid);
                true
            }
            None => false,
        }
    }

    pub fn pending_dispatch(&self) -> Option<PendingDispatch> {
        self.lock().pending_dispatch.clone()
    }

    pub fn clear_pending_dispatch(&self) {
        self.lock().pending_dispatch = None;
    }

    /// Execute the insertion recorded during the last callback.
    ///
    /// Returns the CPU whose local DSQ received the task, if any.
    pub fn resolve_pending_dispatch(&self, local_cpu: CpuId) -> Option<CpuId> {
        let mut state = self.lock();
        let pd = state.pending_dispatch.take()?;

        if pd.dsq_id.is_local() {
            let Some(c) = state.cpu_mut(local_cpu) else {
                state.fail(anyhow!("invalid local CPU {} for pid {}", local_cpu.0, pd.pid.0));
                return None;
            };
            c.local.push_back(pd.pid);
            debug!("resolved LOCAL pid={} cpu={}", pd.pid.0, local_cpu.0);
            return Some(local_cpu);
        }

        let res = if pd.dsq_id == DsqId::GLOBAL {
            self.global.insert_fifo(pd.pid, pd.enq_flags)
        } else if let Some(vtime) = pd.vtime {
            self.dsqs.insert_vtime(pd.dsq_id, pd.pid, vtime)
        } else {
            self.dsqs.insert_fifo(pd.dsq_id, pd.pid, pd.enq_flags)
        };
        if let Err(err) = res {
            state.fail(err);
        }
        None
    }

    pub fn dsq_nr_queued(&self, dsq_id: DsqId) -> usize {
        if dsq_id == DsqId::GLOBAL {
            return self.global.len();
        }
        self.dsqs.nr_queued(dsq_id)
    }

    /// Snapshot of a user DSQ in dispatch order.
    pub fn dsq_ordered(&self, dsq_id: DsqId) -> Vec<(Pid, Option<Vtime>)> {
        self.dsqs.ordered(dsq_id)
    }

    /// Take the first runtime error, if any.
    pub fn take_error(&self) -> Option<anyhow::Error> {
        self.lock().error.take()
    }

    fn record_insert(&self, pd: PendingDispatch) {
        let mut state = self.lock();
        if let Some(prev) = &state.pending_dispatch {
            let err = anyhow!(
                "pid {} inserted twice in one callback (DSQ {} then {})",
                pd.pid.0,
                prev.dsq_id,
                pd.dsq_id
            );
            state.fail(err);
            return;
        }
        state.pending_dispatch = Some(pd);
    }
}

impl Kfuncs for SimHost {
    fn select_cpu_dfl(&self, _p: &Task, prev_cpu: CpuId, _wake_flags: WakeFlags) -> (CpuId, bool) {
        let state = self.lock();
        let prev_idle = state
            .cpus
            .get(prev_cpu.0 as usize)
            .is_some_and(|c| c.is_idle());
        let (cpu, idle) = if prev_idle {
            (prev_cpu, true)
        } else if let Some(c) = state.cpus.iter().find(|c| c.is_idle()) {
            (c.id, true)
        } else if (prev_cpu.0 as usize) < state.cpus.len() {
            (prev_cpu, false)
        } else {
            (CpuId(0), false)
        };
        debug!("select_cpu_dfl prev_cpu={} cpu={} idle={}", prev_cpu.0, cpu.0, idle);
        (cpu, idle)
    }

    fn dsq_insert(&self, p: &mut Task, dsq_id: DsqId, slice: TimeNs, enq_flags: EnqFlags) {
        p.slice = slice;
        debug!("dsq_insert pid={} dsq={} slice={}", p.pid.0, dsq_id, FmtN(slice));
        self.record_insert(PendingDispatch {
            pid: p.pid,
            dsq_id,
            enq_flags,
            vtime: None,
        });
    }

    fn dsq_insert_vtime(
        &self,
        p: &mut Task,
        dsq_id: DsqId,
        slice: TimeNs,
        vtime: Vtime,
        enq_flags: EnqFlags,
    ) {
        if dsq_id.is_builtin() {
            self.lock()
                .fail(anyhow!("cannot use vtime ordering for built-in DSQ {}", dsq_id));
            return;
        }
        p.slice = slice;
        p.dsq_vtime = vtime;
        debug!(
            "dsq_insert_vtime pid={} dsq={} slice={} vtime={}",
            p.pid.0,
            dsq_id,
            FmtN(slice),
            vtime
        );
        self.record_insert(PendingDispatch {
            pid: p.pid,
            dsq_id,
            enq_flags,
            vtime: Some(vtime),
        });
    }

    fn dsq_move_to_local(&self, dsq_id: DsqId) -> bool {
        let mut state = self.lock();
        let cpu = state.current_cpu;
        let popped = if dsq_id == DsqId::GLOBAL {
            self.global.pop()
        } else if self.dsqs.get(dsq_id).is_none() {
            state.fail(anyhow!("dsq_move_to_local on non-existent DSQ {}", dsq_id));
            return false;
        } else {
            self.dsqs.pop(dsq_id)
        };
        let Some(pid) = popped else {
            return false;
        };
        match state.cpu_mut(cpu) {
            Some(c) => {
                c.local.push_back(pid);
                debug!("dsq_move_to_local dsq={} pid={} cpu={}", dsq_id, pid.0, cpu.0);
                true
            }
            None => {
                state.fail(anyhow!("invalid current CPU {}", cpu.0));
                false
            }
        }
    }

    fn create_dsq(&self, dsq_id: DsqId, node: i32) -> Result<()> {
        let rc = self.dsqs.create(dsq_id);
        debug!("create_dsq dsq={} node={} rc={:?}", dsq_id, node, rc);
        rc.map_err(errno_error)
    }

    fn smp_processor_id(&self) -> CpuId {
        self.lock().current_cpu
    }
}
