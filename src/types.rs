// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Identifiers, flags and time units shared by the policy and its hosts.
//!
//! Ids and virtual time are newtypes so a PID can't be passed where a CPU
//! is expected. Durations and weights stay plain aliases.

use std::fmt;

/// Default time slice: 20ms, same as the kernel's `SCX_SLICE_DFL`.
pub const SLICE_DFL: TimeNs = 20_000_000;

/// DSQ id. Bit 63 marks the kernel's built-in queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DsqId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Pid(pub i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CpuId(pub u32);

impl DsqId {
    pub const FLAG_BUILTIN: u64 = 1u64 << 63;
    pub const GLOBAL: DsqId = DsqId(Self::FLAG_BUILTIN | 1);
    pub const LOCAL: DsqId = DsqId(Self::FLAG_BUILTIN | 2);

    pub fn is_local(self) -> bool {
        self == Self::LOCAL
    }

    /// LOCAL, GLOBAL and the per-CPU local ids. None of them accept vtime
    /// ordering.
    pub fn is_builtin(self) -> bool {
        (self.0 & Self::FLAG_BUILTIN) == Self::FLAG_BUILTIN
    }
}

impl fmt::Display for DsqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::GLOBAL => f.write_str("GLOBAL"),
            Self::LOCAL => f.write_str("LOCAL"),
            DsqId(id) => write!(f, "{id:#x}"),
        }
    }
}

/// Flags passed to `ops.enqueue()`, matching kernel `scx_enq_flags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnqFlags(u64);

impl EnqFlags {
    pub const NONE: EnqFlags = EnqFlags(0);
    pub const WAKEUP: EnqFlags = EnqFlags(0x1);
    pub const HEAD: EnqFlags = EnqFlags(0x10);
    pub const PREEMPT: EnqFlags = EnqFlags(1 << 32);

    pub fn from_raw(raw: u64) -> Self {
        EnqFlags(raw)
    }

    pub fn contains(self, other: EnqFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: EnqFlags) {
        self.0 |= other.0;
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Flags passed to `ops.select_cpu()`, matching kernel `SCX_WAKE_*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WakeFlags(u64);

impl WakeFlags {
    pub const NONE: WakeFlags = WakeFlags(0);
    pub const FORK: WakeFlags = WakeFlags(0x04);
    pub const TTWU: WakeFlags = WakeFlags(0x08);
    pub const SYNC: WakeFlags = WakeFlags(0x10);

    pub fn from_raw(raw: u64) -> Self {
        WakeFlags(raw)
    }

    pub fn contains(self, other: WakeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Time in nanoseconds.
pub type TimeNs = u64;

/// sched_ext task weight (100 == nice 0).
pub type Weight = u32;

/// Weighted virtual runtime. Not a duration.
///
/// Compared with wrapping arithmetic: two values less than 2^63 apart
/// order correctly across overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Vtime(pub u64);

impl Vtime {
    /// `time_before(self, other)`.
    pub fn before(self, other: Vtime) -> bool {
        (self.0.wrapping_sub(other.0) as i64) < 0
    }

    pub fn wrapping_add(self, delta: u64) -> Vtime {
        Vtime(self.0.wrapping_add(delta))
    }

    pub fn wrapping_sub(self, delta: u64) -> Vtime {
        Vtime(self.0.wrapping_sub(delta))
    }
}

impl PartialOrd for Vtime {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Vtime {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        if self == other {
            std::cmp::Ordering::Equal
        } else if self.before(*other) {
            std::cmp::Ordering::Less
        } else {
            std::cmp::Ordering::Greater
        }
    }
}

impl fmt::Display for Vtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Log-friendly nanoseconds: `20_000_000` prints as `20M`, `1_500` as
/// `1500`.
pub struct FmtN(pub u64);

impl fmt::Display for FmtN {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut v = self.0;
        let mut unit = 0;
        while v != 0 && v % 1000 == 0 && unit < 4 {
            v /= 1000;
            unit += 1;
        }
        match unit {
            0 => write!(f, "{v}"),
            _ => write!(f, "{v}{}", ["K", "M", "B", "T"][unit - 1]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vtime_wrapping_order() {
        assert!(Vtime(1).before(Vtime(2)));
        assert!(!Vtime(2).before(Vtime(1)));
        assert!(!Vtime(5).before(Vtime(5)));
        // u64::MAX is "just before" zero.
        assert!(Vtime(u64::MAX).before(Vtime(0)));
        assert!(Vtime(u64::MAX) < Vtime(0));
        assert_eq!(Vtime(0).wrapping_sub(1), Vtime(u64::MAX));
    }

    #[test]
    fn test_dsq_id_builtin() {
        assert!(DsqId::LOCAL.is_builtin());
        assert!(DsqId::GLOBAL.is_builtin());
        assert!(DsqId::LOCAL.is_local());
        assert!(!DsqId(0).is_builtin());
        assert_eq!(DsqId(0).to_string(), "0x0");
        assert_eq!(DsqId::GLOBAL.to_string(), "GLOBAL");
    }

    #[test]
    fn test_enq_flags() {
        let mut flags = EnqFlags::WAKEUP;
        assert!(!flags.contains(EnqFlags::HEAD));
        flags.insert(EnqFlags::HEAD);
        assert!(flags.contains(EnqFlags::HEAD));
        assert!(flags.contains(EnqFlags::WAKEUP));
        assert_eq!(flags.raw(), 0x11);
    }

    #[test]
    fn test_fmt_n() {
        assert_eq!(format!("{}", FmtN(SLICE_DFL)), "20M");
        assert_eq!(format!("{}", FmtN(3_000)), "3K");
        assert_eq!(format!("{}", FmtN(1_500)), "1500");
        assert_eq!(format!("{}", FmtN(0)), "0");
        assert_eq!(format!("{}", FmtN(7_000_000_000_000_000)), "7000T");
    }
}
