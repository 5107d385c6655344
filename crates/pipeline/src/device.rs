//! Device classification
//!
//! Classifies the host as constrained (phone-class) or standard so the
//! scheduler can pick a conversion concurrency the host can afford.

use crate::config::DeviceClassSetting;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hosts with less memory than this are treated as constrained.
pub const CONSTRAINED_MEMORY_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// Hosts with this many logical cores or fewer are treated as constrained.
pub const CONSTRAINED_MAX_CORES: u32 = 2;

/// Coarse host capability class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    /// Memory- or CPU-limited host, such as a phone or a small VM
    Constrained,
    /// Everything else
    Standard,
}

impl DeviceClass {
    pub fn is_constrained(self) -> bool {
        self == DeviceClass::Constrained
    }

    /// Resolve a configured setting, probing the host for `Auto`.
    pub fn resolve(setting: DeviceClassSetting) -> Self {
        match setting {
            DeviceClassSetting::Constrained => DeviceClass::Constrained,
            DeviceClassSetting::Standard => DeviceClass::Standard,
            DeviceClassSetting::Auto => probe(),
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceClass::Constrained => write!(f, "constrained"),
            DeviceClass::Standard => write!(f, "standard"),
        }
    }
}

/// Host resources the classification is based on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostResources {
    pub total_memory_bytes: u64,
    pub logical_cores: u32,
}

impl HostResources {
    /// Collects the current host resources using sysinfo and num_cpus
    pub fn collect() -> Self {
        use sysinfo::System;

        let mut sys = System::new();
        sys.refresh_memory();

        Self {
            total_memory_bytes: sys.total_memory(),
            logical_cores: num_cpus::get() as u32,
        }
    }
}

/// Classify a host from its resources.
///
/// A memory reading of zero means sysinfo could not read it, so only the core
/// count is considered in that case.
pub fn classify(resources: HostResources) -> DeviceClass {
    let low_memory =
        resources.total_memory_bytes > 0 && resources.total_memory_bytes < CONSTRAINED_MEMORY_BYTES;
    let few_cores = resources.logical_cores <= CONSTRAINED_MAX_CORES;

    if low_memory || few_cores {
        DeviceClass::Constrained
    } else {
        DeviceClass::Standard
    }
}

/// Probe the current host
pub fn probe() -> DeviceClass {
    let resources = HostResources::collect();
    let class = classify(resources);
    tracing::debug!(
        memory_bytes = resources.total_memory_bytes,
        cores = resources.logical_cores,
        %class,
        "probed device class"
    );
    class
}
