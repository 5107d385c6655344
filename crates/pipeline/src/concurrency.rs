//! Concurrency planning module for heic-batch
//!
//! Derives the conversion slot count and per-conversion deadline from the
//! device class and configuration.

use crate::config::Config;
use crate::device::DeviceClass;
use std::time::Duration;

/// Concurrency limit on constrained hosts
pub const CONSTRAINED_MAX_CONVERSIONS: u32 = 2;
/// Concurrency limit on standard hosts
pub const STANDARD_MAX_CONVERSIONS: u32 = 5;
/// Conversion deadline on constrained hosts
pub const CONSTRAINED_TIMEOUT: Duration = Duration::from_secs(30);
/// Conversion deadline on standard hosts
pub const STANDARD_TIMEOUT: Duration = Duration::from_secs(60);

/// Concurrency plan derived from configuration and device class
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyPlan {
    /// Class the plan was derived for
    pub device_class: DeviceClass,
    /// Maximum number of items in `Converting` at once (always >= 1)
    pub max_concurrent_conversions: u32,
    /// Deadline for a single worker call
    pub conversion_timeout: Duration,
}

impl ConcurrencyPlan {
    /// Default plan for a device class
    pub fn for_device(device_class: DeviceClass) -> Self {
        match device_class {
            DeviceClass::Constrained => Self {
                device_class,
                max_concurrent_conversions: CONSTRAINED_MAX_CONVERSIONS,
                conversion_timeout: CONSTRAINED_TIMEOUT,
            },
            DeviceClass::Standard => Self {
                device_class,
                max_concurrent_conversions: STANDARD_MAX_CONVERSIONS,
                conversion_timeout: STANDARD_TIMEOUT,
            },
        }
    }

    /// Derive a plan from configuration for an already-resolved device class
    ///
    /// Non-zero `pipeline.max_concurrent_conversions` and
    /// `pipeline.conversion_timeout_secs` replace the class defaults.
    pub fn derive_for(cfg: &Config, device_class: DeviceClass) -> Self {
        let mut plan = Self::for_device(device_class);

        if cfg.pipeline.max_concurrent_conversions > 0 {
            plan.max_concurrent_conversions = cfg.pipeline.max_concurrent_conversions;
        }
        if cfg.pipeline.conversion_timeout_secs > 0 {
            plan.conversion_timeout = Duration::from_secs(cfg.pipeline.conversion_timeout_secs);
        }

        plan
    }

    /// Derive a plan from configuration, probing the host when the device
    /// class is `auto`
    pub fn derive(cfg: &Config) -> Self {
        let device_class = DeviceClass::resolve(cfg.device.class);
        Self::derive_for(cfg, device_class)
    }

    /// Slot count as a semaphore permit count
    pub fn slots(&self) -> usize {
        self.max_concurrent_conversions.max(1) as usize
    }
}

/// Public function to derive a concurrency plan from configuration
pub fn derive_plan(cfg: &Config) -> ConcurrencyPlan {
    ConcurrencyPlan::derive(cfg)
}
