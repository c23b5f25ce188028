// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Exit information.
//!
//! The host hands the scheduler an `ExitInfo` when it is torn down. The
//! scheduler copies it into a one-shot `UeiRecord` that a monitor can poll
//! and turn into a `UserExitInfo` for reporting.

use std::sync::Mutex;

use anyhow::bail;
use anyhow::Result;
use log::info;

/// Mirrors the kernel's `enum scx_exit_kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i32)]
pub enum ExitKind {
    None = 0,
    Done = 1,
    Unreg = 64,
    UnregBpf = 65,
    UnregKern = 66,
    SysRq = 67,
    Error = 1024,
    ErrorBpf = 1025,
    ErrorStall = 1026,
}

impl ExitKind {
    /// The human-readable reason the kernel attaches to each kind.
    pub fn reason(self) -> &'static str {
        match self {
            ExitKind::None => "",
            ExitKind::Done => "Scheduler is done",
            ExitKind::Unreg => "unregistered from user space",
            ExitKind::UnregBpf => "unregistered from BPF",
            ExitKind::UnregKern => "unregistered from the main kernel",
            ExitKind::SysRq => "disabled by sysrq-S",
            ExitKind::Error => "runtime error",
            ExitKind::ErrorBpf => "scx_bpf_error",
            ExitKind::ErrorStall => "runnable task stall",
        }
    }

    pub fn is_error(self) -> bool {
        self >= ExitKind::Error
    }
}

/// What the host tells the scheduler on `exit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    pub kind: ExitKind,
    pub reason: String,
    pub msg: String,
    pub dump: String,
}

impl ExitInfo {
    pub fn new(kind: ExitKind, msg: impl Into<String>) -> Self {
        ExitInfo {
            kind,
            reason: kind.reason().to_string(),
            msg: msg.into(),
            dump: String::new(),
        }
    }

    pub fn with_dump(mut self, dump: impl Into<String>) -> Self {
        self.dump = dump.into();
        self
    }
}

/// Exit reason storage, the `UEI_DEFINE()` of this crate.
///
/// Written once per activation: `rearm` opens a new activation and the
/// first `record` after it wins.
#[derive(Debug, Default)]
pub struct UeiRecord {
    info: Mutex<Option<ExitInfo>>,
}

impl UeiRecord {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<ExitInfo>> {
        self.info.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Forget the previous activation's exit.
    pub fn rearm(&self) {
        *self.slot() = None;
    }

    /// Record `ei`. Only the first exit is kept. Returns false if one was
    /// already recorded.
    pub fn record(&self, ei: &ExitInfo) -> bool {
        let mut slot = self.slot();
        if slot.is_some() {
            return false;
        }
        *slot = Some(ei.clone());
        true
    }

    pub fn exited(&self) -> bool {
        self.slot().is_some()
    }

    /// Snapshot of the record for reporting.
    pub fn read(&self) -> UserExitInfo {
        match self.slot().as_ref() {
            Some(ei) => UserExitInfo::from(ei),
            None => UserExitInfo::default(),
        }
    }
}

/// Userspace view of a recorded exit.
#[derive(Debug, Default, Clone)]
pub struct UserExitInfo {
    /// `ExitKind` as an integer; zero means the scheduler has not exited.
    kind: i32,
    reason: Option<String>,
    msg: Option<String>,
    dump: Option<String>,
}

impl From<&ExitInfo> for UserExitInfo {
    fn from(ei: &ExitInfo) -> Self {
        let non_empty = |s: &str| Some(s.to_string()).filter(|s| !s.is_empty());
        Self {
            kind: ei.kind as i32,
            reason: non_empty(&ei.reason),
            msg: non_empty(&ei.msg),
            dump: non_empty(&ei.dump),
        }
    }
}

impl UserExitInfo {
    pub fn kind(&self) -> i32 {
        self.kind
    }

    /// Log the exit message if the exit was normal. After an error exit,
    /// return an error containing the exit message instead. A debug dump is
    /// always printed to stderr.
    pub fn report(&self) -> Result<()> {
        if self.kind == ExitKind::None as i32 {
            return Ok(());
        }

        if let Some(dump) = &self.dump {
            eprintln!("\nDEBUG DUMP");
            eprintln!("================================================================================\n");
            eprintln!("{}", dump);
            eprintln!("================================================================================\n");
        }

        let why = match (&self.reason, &self.msg) {
            (Some(reason), None) => format!("EXIT: {}", reason),
            (Some(reason), Some(msg)) => format!("EXIT: {} ({})", reason, msg),
            _ => "<UNKNOWN>".into(),
        };

        if self.kind < ExitKind::Error as i32 {
            info!("{}", why);
            Ok(())
        } else {
            bail!("{}", why)
        }
    }
}
