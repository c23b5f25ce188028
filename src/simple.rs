// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! A simple scheduler.
//!
//! By default, it operates as a simple global weighted vtime scheduler and
//! can be switched to FIFO scheduling. It also demonstrates the following
//! niceties.
//!
//! - Statistics tracking how many tasks are queued to local and global DSQs.
//! - Termination notification for userspace.
//!
//! While very simple, this scheduler should work reasonably well on CPUs
//! with a uniform L3 cache topology. While preemption is not implemented,
//! the fact that the scheduling queue is shared across all CPUs means that
//! whatever is at the front of the queue is likely to be executed fairly
//! quickly given enough number of CPUs. The FIFO scheduling mode may be
//! beneficial to some workloads but comes with the usual problems with FIFO
//! scheduling where saturating threads can easily drown out interactive
//! ones.

use anyhow::anyhow;
use anyhow::Context;
use anyhow::Result;
use log::debug;
use log::info;
use log::warn;

use crate::config::SchedConfig;
use crate::exit::{ExitInfo, UeiRecord};
use crate::kfuncs::Kfuncs;
use crate::ops::SchedOps;
use crate::policy::{new_discipline, Discipline, Placement, SchedMode};
use crate::stats::{StatIdx, Stats};
use crate::task::Task;
use crate::types::{CpuId, DsqId, EnqFlags, TimeNs, Vtime, WakeFlags};
use crate::vclock::VirtualClock;
use crate::SCHEDULER_NAME;

/// The one user DSQ every CPU shares.
pub const SHARED_DSQ: DsqId = DsqId(0);

pub struct SimpleScheduler<K: Kfuncs> {
    kfuncs: K,
    discipline: Box<dyn Discipline>,
    vclock: VirtualClock,
    stats: Stats,
    uei: UeiRecord,
    slice_ns: TimeNs,
}

impl<K: Kfuncs> SimpleScheduler<K> {
    pub fn new(kfuncs: K, cfg: &SchedConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(SimpleScheduler {
            kfuncs,
            discipline: new_discipline(cfg.mode),
            vclock: VirtualClock::new(),
            stats: Stats::new(cfg.nr_cpus as usize),
            uei: UeiRecord::new(),
            slice_ns: cfg.slice_ns,
        })
    }

    pub fn mode(&self) -> SchedMode {
        self.discipline.mode()
    }

    pub fn slice_ns(&self) -> TimeNs {
        self.slice_ns
    }

    pub fn vtime_now(&self) -> Vtime {
        self.vclock.now()
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn uei(&self) -> &UeiRecord {
        &self.uei
    }

    pub fn kfuncs(&self) -> &K {
        &self.kfuncs
    }

    fn stat_inc(&self, idx: StatIdx) {
        self.stats.inc(self.kfuncs.smp_processor_id(), idx);
    }
}

impl<K: Kfuncs> SchedOps for SimpleScheduler<K> {
    fn name(&self) -> &'static str {
        SCHEDULER_NAME
    }

    fn select_cpu(&self, p: &mut Task, prev_cpu: CpuId, wake_flags: WakeFlags) -> CpuId {
        let (cpu, is_idle) = self.kfuncs.select_cpu_dfl(p, prev_cpu, wake_flags);
        if is_idle {
            self.stat_inc(StatIdx::Local);
            self.kfuncs
                .dsq_insert(p, DsqId::LOCAL, self.slice_ns, EnqFlags::NONE);
        }
        cpu
    }

    fn enqueue(&self, p: &mut Task, enq_flags: EnqFlags) {
        self.stat_inc(StatIdx::Global);

        match self.discipline.enqueue(p, &self.vclock, self.slice_ns) {
            Placement::Fifo => {
                self.kfuncs
                    .dsq_insert(p, SHARED_DSQ, self.slice_ns, enq_flags);
            }
            Placement::Vtime(vtime) => {
                self.kfuncs
                    .dsq_insert_vtime(p, SHARED_DSQ, self.slice_ns, vtime, enq_flags);
            }
        }
    }

    fn dispatch(&self, _cpu: CpuId, _prev: Option<&Task>) {
        self.kfuncs.dsq_move_to_local(SHARED_DSQ);
    }

    fn running(&self, p: &Task) {
        self.discipline.running(p, &self.vclock);
    }

    fn stopping(&self, p: &mut Task, runnable: bool) {
        debug!("stopping pid={} runnable={} slice={}", p.pid.0, runnable, p.slice);
        self.discipline.stopping(p, self.slice_ns);
    }

    fn enable(&self, p: &mut Task) {
        self.discipline.enable(p, &self.vclock);
    }

    fn init(&self) -> Result<()> {
        // A new activation starts from a zero clock and empty counters.
        self.vclock.reset();
        self.stats.reset();
        self.uei.rearm();

        self.kfuncs
            .create_dsq(SHARED_DSQ, -1)
            .with_context(|| format!("failed to create shared DSQ {}", SHARED_DSQ))?;
        info!(
            "{} initialized mode={:?} slice_ns={}",
            SCHEDULER_NAME,
            self.mode(),
            self.slice_ns
        );
        Ok(())
    }

    fn exit(&self, ei: &ExitInfo) {
        if !self.uei.record(ei) {
            warn!("{} exit already recorded, dropping {:?}", SCHEDULER_NAME, ei.kind);
        }
    }
}

impl<K: Kfuncs> std::fmt::Debug for SimpleScheduler<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleScheduler")
            .field("mode", &self.mode())
            .field("slice_ns", &self.slice_ns)
            .field("vtime_now", &self.vclock.now())
            .finish()
    }
}

/// Errno carried by a failed `ops.init()`, for the host's exit message.
pub fn init_errno(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|e| e.downcast_ref::<std::io::Error>())
        .and_then(|e| e.raw_os_error())
        .map(|errno| -errno.abs())
        .unwrap_or(-libc::EINVAL)
}

/// Wrap a negative errno the way kfuncs report failures.
pub fn errno_error(rc: i32) -> anyhow::Error {
    anyhow!(std::io::Error::from_raw_os_error(rc.abs()))
}
