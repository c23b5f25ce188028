// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Activation-time scheduler parameters. These are the read-only values the
//! loader sets before attaching; they cannot change while active.

use anyhow::bail;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

use crate::policy::SchedMode;
use crate::types::{TimeNs, SLICE_DFL};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedConfig {
    pub mode: SchedMode,
    pub slice_ns: TimeNs,
    /// Number of possible CPUs, sizing the per-CPU stats.
    pub nr_cpus: u32,
}

impl Default for SchedConfig {
    fn default() -> Self {
        SchedConfig {
            mode: SchedMode::Vtime,
            slice_ns: SLICE_DFL,
            nr_cpus: 1,
        }
    }
}

impl SchedConfig {
    pub fn new(mode: SchedMode, nr_cpus: u32) -> Self {
        SchedConfig {
            mode,
            nr_cpus,
            ..Default::default()
        }
    }

    pub fn fifo(nr_cpus: u32) -> Self {
        Self::new(SchedMode::Fifo, nr_cpus)
    }

    pub fn vtime(nr_cpus: u32) -> Self {
        Self::new(SchedMode::Vtime, nr_cpus)
    }

    pub fn with_slice_ns(mut self, slice_ns: TimeNs) -> Self {
        self.slice_ns = slice_ns;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.slice_ns == 0 {
            bail!("slice must be greater than zero");
        }
        if self.nr_cpus == 0 {
            bail!("at least one CPU is required");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = SchedConfig::default();
        assert_eq!(cfg.slice_ns, SLICE_DFL);
        assert_eq!(cfg.mode, SchedMode::Vtime);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        assert!(SchedConfig::fifo(0).validate().is_err());
        assert!(SchedConfig::vtime(2).with_slice_ns(0).validate().is_err());
    }

    #[test]
    fn test_partial_json() {
        let cfg: SchedConfig = serde_json::from_str(r#"{"mode": "fifo"}"#).unwrap();
        assert_eq!(cfg.mode, SchedMode::Fifo);
        assert_eq!(cfg.slice_ns, SLICE_DFL);
    }
}
