// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Dispatch queues (DSQs).
//!
//! A DSQ holds task handles (`Pid`) for tasks that are runnable but not yet
//! bound to a CPU. It is either FIFO or vtime-ordered (PRIQ) while it holds
//! tasks; like the kernel, mixing the two is an error. Every operation runs
//! under the queue's lock, so concurrent inserts and pops from any number of
//! CPUs are linearizable: a task is handed out exactly once.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::RwLock;

use anyhow::bail;
use anyhow::Result;

use crate::types::{DsqId, EnqFlags, Pid, Vtime};

/// The ordering mode of a DSQ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DsqMode {
    /// No tasks queued; the next insert decides the mode.
    Empty,
    /// Insertion order (`scx_bpf_dsq_insert`).
    Fifo,
    /// Lowest vtime first (`scx_bpf_dsq_insert_vtime`).
    Priq,
}

#[derive(Debug)]
struct DsqInner {
    /// Vtime-ordered entries: (vtime, insertion_order) -> pid.
    /// The insertion order breaks ties between equal vtimes.
    vtime_entries: BTreeMap<(Vtime, u64), Pid>,
    fifo_entries: VecDeque<Pid>,
    insertion_counter: u64,
    mode: DsqMode,
}

impl DsqInner {
    fn len(&self) -> usize {
        self.vtime_entries.len() + self.fifo_entries.len()
    }
}

/// A single dispatch queue.
#[derive(Debug)]
pub struct Dsq {
    id: DsqId,
    inner: Mutex<DsqInner>,
}

impl Dsq {
    pub fn new(id: DsqId) -> Self {
        Dsq {
            id,
            inner: Mutex::new(DsqInner {
                vtime_entries: BTreeMap::new(),
                fifo_entries: VecDeque::new(),
                insertion_counter: 0,
                mode: DsqMode::Empty,
            }),
        }
    }

    pub fn id(&self) -> DsqId {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, DsqInner> {
        // The inner state is consistent after every statement, so a panic
        // on another thread never leaves it half-updated.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a task in FIFO order. `EnqFlags::HEAD` puts it at the front.
    pub fn insert_fifo(&self, pid: Pid, enq_flags: EnqFlags) -> Result<()> {
        let mut dsq = self.lock();
        if dsq.mode == DsqMode::Priq {
            bail!("cannot insert FIFO task {} into vtime-ordered DSQ {}", pid.0, self.id);
        }
        dsq.mode = DsqMode::Fifo;
        if enq_flags.contains(EnqFlags::HEAD) {
            dsq.fifo_entries.push_front(pid);
        } else {
            dsq.fifo_entries.push_back(pid);
        }
        Ok(())
    }

    /// Insert a task ordered by vtime.
    pub fn insert_vtime(&self, pid: Pid, vtime: Vtime) -> Result<()> {
        if self.id.is_builtin() {
            bail!("cannot use vtime ordering for built-in DSQ {}", self.id);
        }
        let mut dsq = self.lock();
        if dsq.mode == DsqMode::Fifo {
            bail!("cannot insert vtime task {} into FIFO DSQ {}", pid.0, self.id);
        }
        dsq.mode = DsqMode::Priq;
        let order = dsq.insertion_counter;
        dsq.insertion_counter += 1;
        dsq.vtime_entries.insert((vtime, order), pid);
        Ok(())
    }

    /// Pop the head task: the lowest vtime for PRIQ, the oldest for FIFO.
    pub fn pop(&self) -> Option<Pid> {
        let mut dsq = self.lock();
        let result = match dsq.mode {
            DsqMode::Priq => dsq.vtime_entries.pop_first().map(|(_, pid)| pid),
            DsqMode::Fifo => dsq.fifo_entries.pop_front(),
            DsqMode::Empty => None,
        };
        if dsq.len() == 0 {
            dsq.mode = DsqMode::Empty;
        }
        result
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mode(&self) -> DsqMode {
        self.lock().mode
    }

    /// Snapshot of the queue in dispatch order, with vtime keys for PRIQ.
    pub fn ordered(&self) -> Vec<(Pid, Option<Vtime>)> {
        let dsq = self.lock();
        match dsq.mode {
            DsqMode::Priq => dsq
                .vtime_entries
                .iter()
                .map(|(&(vtime, _), &pid)| (pid, Some(vtime)))
                .collect(),
            DsqMode::Fifo => dsq.fifo_entries.iter().map(|&pid| (pid, None)).collect(),
            DsqMode::Empty => Vec::new(),
        }
    }
}

/// Registry of user-created DSQs.
///
/// Creation is rare and takes the write lock; inserts and pops only take the
/// read lock to find the queue and then the queue's own lock.
#[derive(Debug)]
pub struct DsqTable {
    dsqs: RwLock<BTreeMap<DsqId, Arc<Dsq>>>,
    capacity: usize,
}

impl DsqTable {
    pub const DFL_CAPACITY: usize = 1024;

    pub fn new() -> Self {
        Self::with_capacity(Self::DFL_CAPACITY)
    }

    /// A table that refuses to hold more than `capacity` DSQs.
    pub fn with_capacity(capacity: usize) -> Self {
        DsqTable {
            dsqs: RwLock::new(BTreeMap::new()),
            capacity,
        }
    }

    /// Create a DSQ. Returns the negative errno on failure, like
    /// `scx_bpf_create_dsq()`.
    pub fn create(&self, dsq_id: DsqId) -> std::result::Result<(), i32> {
        if dsq_id.is_builtin() {
            return Err(-libc::EINVAL);
        }
        let mut dsqs = self.dsqs.write().unwrap_or_else(PoisonError::into_inner);
        if dsqs.contains_key(&dsq_id) {
            return Err(-libc::EEXIST);
        }
        if dsqs.len() >= self.capacity {
            return Err(-libc::ENOMEM);
        }
        dsqs.insert(dsq_id, Arc::new(Dsq::new(dsq_id)));
        Ok(())
    }

    pub fn get(&self, dsq_id: DsqId) -> Option<Arc<Dsq>> {
        self.dsqs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&dsq_id)
            .cloned()
    }

    fn get_or_bail(&self, dsq_id: DsqId) -> Result<Arc<Dsq>> {
        match self.get(dsq_id) {
            Some(dsq) => Ok(dsq),
            None => bail!("non-existent DSQ {}", dsq_id),
        }
    }

    pub fn insert_fifo(&self, dsq_id: DsqId, pid: Pid, enq_flags: EnqFlags) -> Result<()> {
        self.get_or_bail(dsq_id)?.insert_fifo(pid, enq_flags)
    }

    pub fn insert_vtime(&self, dsq_id: DsqId, pid: Pid, vtime: Vtime) -> Result<()> {
        self.get_or_bail(dsq_id)?.insert_vtime(pid, vtime)
    }

    /// Pop the head of a DSQ. A missing DSQ behaves like an empty one.
    pub fn pop(&self, dsq_id: DsqId) -> Option<Pid> {
        self.get(dsq_id)?.pop()
    }

    pub fn nr_queued(&self, dsq_id: DsqId) -> usize {
        self.get(dsq_id).map_or(0, |dsq| dsq.len())
    }

    pub fn ordered(&self, dsq_id: DsqId) -> Vec<(Pid, Option<Vtime>)> {
        self.get(dsq_id).map_or_else(Vec::new, |dsq| dsq.ordered())
    }

    /// Destroy every DSQ, as the kernel does when a scheduler is disabled.
    pub fn clear(&self) {
        self.dsqs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for DsqTable {
    fn default() -> Self {
        Self::new()
    }
}
