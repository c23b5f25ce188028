// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Queueing statistics.
//!
//! Mirrors a per-CPU array map with two slots per CPU: tasks dispatched
//! straight to a local DSQ and tasks queued on the shared DSQ. Increments
//! are best effort; a failed slot lookup is silently skipped.

use std::io::Write;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use anyhow::Result;
use crossbeam::utils::CachePadded;
use serde::Deserialize;
use serde::Serialize;
use static_assertions::const_assert_eq;

use crate::types::CpuId;

pub const NR_STATS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StatIdx {
    /// Task inserted directly into an idle CPU's local DSQ.
    Local = 0,
    /// Task inserted into the shared DSQ.
    Global = 1,
}

const_assert_eq!(StatIdx::Global as usize + 1, NR_STATS);

#[derive(Debug)]
pub struct Stats {
    percpu: Vec<CachePadded<[AtomicU64; NR_STATS]>>,
}

impl Stats {
    pub fn new(nr_cpus: usize) -> Self {
        Self {
            percpu: (0..nr_cpus)
                .map(|_| CachePadded::new([AtomicU64::new(0), AtomicU64::new(0)]))
                .collect(),
        }
    }

    fn lookup(&self, cpu: CpuId, idx: u32) -> Option<&AtomicU64> {
        self.percpu.get(cpu.0 as usize)?.get(idx as usize)
    }

    /// Count one event on `cpu`.
    pub fn inc(&self, cpu: CpuId, idx: StatIdx) {
        self.inc_raw(cpu, idx as u32);
    }

    pub(crate) fn inc_raw(&self, cpu: CpuId, idx: u32) {
        if let Some(cnt) = self.lookup(cpu, idx) {
            cnt.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Zero every slot.
    pub fn reset(&self) {
        for cnt in self.percpu.iter().flat_map(|slot| slot.iter()) {
            cnt.store(0, Ordering::Relaxed);
        }
    }

    /// Sum every CPU's slots, like the userspace monitor does.
    pub fn read(&self) -> [u64; NR_STATS] {
        let mut sum = [0u64; NR_STATS];
        for slot in &self.percpu {
            for (total, cnt) in sum.iter_mut().zip(slot.iter()) {
                *total += cnt.load(Ordering::Relaxed);
            }
        }
        sum
    }

    pub fn read_cpu(&self, cpu: CpuId) -> Option<[u64; NR_STATS]> {
        let slot = self.percpu.get(cpu.0 as usize)?;
        Some([
            slot[0].load(Ordering::Relaxed),
            slot[1].load(Ordering::Relaxed),
        ])
    }

    pub fn metrics(&self) -> Metrics {
        let [nr_local, nr_global] = self.read();
        Metrics {
            nr_cpus: self.percpu.len() as u64,
            nr_local,
            nr_global,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    /// Number of CPUs with a stats slot.
    pub nr_cpus: u64,
    /// Number of tasks dispatched directly to an idle CPU.
    pub nr_local: u64,
    /// Number of tasks queued on the shared DSQ.
    pub nr_global: u64,
}

impl Metrics {
    pub fn format<W: Write>(&self, w: &mut W) -> Result<()> {
        writeln!(
            w,
            "[{}] local: {:<8} global: {:<8} cpus: {}",
            crate::SCHEDULER_NAME,
            self.nr_local,
            self.nr_global,
            self.nr_cpus
        )?;
        Ok(())
    }

    pub fn delta(&self, rhs: &Self) -> Self {
        Self {
            nr_local: self.nr_local - rhs.nr_local,
            nr_global: self.nr_global - rhs.nr_global,
            ..self.clone()
        }
    }
}
