#![allow(dead_code)]

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Once};

use anyhow::Result;

use scx_simple::dsq::DsqTable;
use scx_simple::sim::{SimHost, Simulator};
use scx_simple::simple::errno_error;
use scx_simple::*;

static LOGGER: Once = Once::new();

/// Route scheduler logs through the test harness.
///
/// `TestLogger` output is captured per test and only shown on failure. Only
/// the first call in the process installs it.
pub fn setup_test() {
    LOGGER.call_once(|| {
        let mut lcfg = simplelog::ConfigBuilder::new();
        lcfg.set_time_level(simplelog::LevelFilter::Off)
            .set_target_level(simplelog::LevelFilter::Off)
            .set_location_level(simplelog::LevelFilter::Off);
        let _ = simplelog::TestLogger::init(simplelog::LevelFilter::Debug, lcfg.build());
    });
}

pub type SimpleSim = Simulator<SimpleScheduler<Arc<SimHost>>>;

pub fn simple_sim(nr_cpus: u32, mode: SchedMode) -> SimpleSim {
    Simulator::simple(nr_cpus, &SchedConfig::new(mode, nr_cpus)).unwrap()
}

thread_local! {
    static THIS_CPU: Cell<u32> = const { Cell::new(0) };
}

/// A host whose kfuncs may be called from many threads at once, each thread
/// acting as one CPU. Every CPU reports busy, so all tasks go through the
/// shared DSQ.
pub struct ConcurrentHost {
    dsqs: DsqTable,
    local: Vec<Mutex<VecDeque<Pid>>>,
}

impl ConcurrentHost {
    pub fn new(nr_cpus: u32) -> Self {
        ConcurrentHost {
            dsqs: DsqTable::new(),
            local: (0..nr_cpus).map(|_| Mutex::new(VecDeque::new())).collect(),
        }
    }

    /// Make the calling thread act as `cpu`.
    pub fn bind(cpu: CpuId) {
        THIS_CPU.with(|c| c.set(cpu.0));
    }

    fn this_cpu() -> CpuId {
        CpuId(THIS_CPU.with(|c| c.get()))
    }

    pub fn pop_local(&self, cpu: CpuId) -> Option<Pid> {
        self.local[cpu.0 as usize].lock().unwrap().pop_front()
    }

    pub fn nr_queued(&self, dsq_id: DsqId) -> usize {
        self.dsqs.nr_queued(dsq_id)
    }

    fn push_local(&self, pid: Pid) {
        self.local[Self::this_cpu().0 as usize]
            .lock()
            .unwrap()
            .push_back(pid);
    }
}

impl Kfuncs for ConcurrentHost {
    fn select_cpu_dfl(&self, _p: &Task, prev_cpu: CpuId, _wf: WakeFlags) -> (CpuId, bool) {
        (prev_cpu, false)
    }

    fn dsq_insert(&self, p: &mut Task, dsq_id: DsqId, slice: TimeNs, enq_flags: EnqFlags) {
        p.slice = slice;
        if dsq_id.is_local() {
            self.push_local(p.pid);
        } else {
            self.dsqs.insert_fifo(dsq_id, p.pid, enq_flags).unwrap();
        }
    }

    fn dsq_insert_vtime(
        &self,
        p: &mut Task,
        dsq_id: DsqId,
        slice: TimeNs,
        vtime: Vtime,
        _enq_flags: EnqFlags,
    ) {
        p.slice = slice;
        p.dsq_vtime = vtime;
        self.dsqs.insert_vtime(dsq_id, p.pid, vtime).unwrap();
    }

    fn dsq_move_to_local(&self, dsq_id: DsqId) -> bool {
        match self.dsqs.pop(dsq_id) {
            Some(pid) => {
                self.push_local(pid);
                true
            }
            None => false,
        }
    }

    fn create_dsq(&self, dsq_id: DsqId, _node: i32) -> Result<()> {
        self.dsqs.create(dsq_id).map_err(errno_error)
    }

    fn smp_processor_id(&self) -> CpuId {
        Self::this_cpu()
    }
}
