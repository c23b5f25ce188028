// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Host helper functions available to the scheduler.
//!
//! These are the sched_ext kfuncs the policy calls back into. The host owns
//! CPU state, queue storage and idle tracking; the policy only decides what
//! to insert where.

use std::sync::Arc;

use anyhow::Result;

use crate::task::Task;
use crate::types::{CpuId, DsqId, EnqFlags, TimeNs, Vtime, WakeFlags};

pub trait Kfuncs: Send + Sync {
    /// `scx_bpf_select_cpu_dfl()`: pick a CPU for a waking task. The second
    /// value is true if the CPU is idle.
    fn select_cpu_dfl(&self, p: &Task, prev_cpu: CpuId, wake_flags: WakeFlags) -> (CpuId, bool);

    /// `scx_bpf_dsq_insert()`: queue `p` on `dsq_id` in FIFO order with
    /// `slice` as its new time slice.
    fn dsq_insert(&self, p: &mut Task, dsq_id: DsqId, slice: TimeNs, enq_flags: EnqFlags);

    /// `scx_bpf_dsq_insert_vtime()`: queue `p` on `dsq_id` ordered by
    /// `vtime`.
    fn dsq_insert_vtime(
        &self,
        p: &mut Task,
        dsq_id: DsqId,
        slice: TimeNs,
        vtime: Vtime,
        enq_flags: EnqFlags,
    );

    /// `scx_bpf_dsq_move_to_local()`: move the head of `dsq_id` to the
    /// invoking CPU's local DSQ. Returns false if nothing was moved.
    fn dsq_move_to_local(&self, dsq_id: DsqId) -> bool;

    /// `scx_bpf_create_dsq()`.
    fn create_dsq(&self, dsq_id: DsqId, node: i32) -> Result<()>;

    /// `bpf_get_smp_processor_id()`.
    fn smp_processor_id(&self) -> CpuId;
}

impl<K: Kfuncs + ?Sized> Kfuncs for Arc<K> {
    fn select_cpu_dfl(&self, p: &Task, prev_cpu: CpuId, wake_flags: WakeFlags) -> (CpuId, bool) {
        (**self).select_cpu_dfl(p, prev_cpu, wake_flags)
    }

    fn dsq_insert(&self, p: &mut Task, dsq_id: DsqId, slice: TimeNs, enq_flags: EnqFlags) {
        (**self).dsq_insert(p, dsq_id, slice, enq_flags)
    }

    fn dsq_insert_vtime(
        &self,
        p: &mut Task,
        dsq_id: DsqId,
        slice: TimeNs,
        vtime: Vtime,
        enq_flags: EnqFlags,
    ) {
        (**self).dsq_insert_vtime(p, dsq_id, slice, vtime, enq_flags)
    }

    fn dsq_move_to_local(&self, dsq_id: DsqId) -> bool {
        (**self).dsq_move_to_local(dsq_id)
    }

    fn create_dsq(&self, dsq_id: DsqId, node: i32) -> Result<()> {
        (**self).create_dsq(dsq_id, node)
    }

    fn smp_processor_id(&self) -> CpuId {
        (**self).smp_processor_id()
    }
}
