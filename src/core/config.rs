//! Configuration system for marker behavior tuning
//!
//! Options are explicit values handed to a [`MarkerController`] or
//! [`MarkerManager`] at construction time. Presets cover the common
//! trade-offs between update latency and render churn; every field can be
//! overridden through [`MarkerPerformanceProfile::Custom`] or deserialized
//! from a host-provided JSON document.
//!
//! [`MarkerController`]: crate::controller::MarkerController
//! [`MarkerManager`]: crate::markers::manager::MarkerManager

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::constants::*;
use crate::markers::spec::ClusteringOptions;

#[derive(Debug, Clone, PartialEq)]
pub enum MarkerPerformanceProfile {
    Balanced,
    /// Shorter throttle window and finer motion filter, more redraws
    Responsive,
    /// Longer throttle window and coarser motion filter, fewer redraws
    LowPower,
    Custom(MarkerOptions),
}

impl MarkerPerformanceProfile {
    pub fn resolve(&self) -> MarkerOptions {
        match self {
            Self::Balanced => MarkerOptions {
                throttle: ThrottleConfig {
                    window_ms: THROTTLE_WINDOW_MS,
                    min_motion_meters: MIN_MOTION_METERS,
                },
                cache: IconCacheConfig {
                    icon_capacity: ICON_CACHE_CAPACITY,
                    avatar_capacity: AVATAR_CACHE_CAPACITY,
                },
                readiness: ReadinessConfig {
                    max_attempts: READINESS_MAX_ATTEMPTS,
                    retry_delay_ms: READINESS_RETRY_DELAY_MS,
                    max_pending_operations: MAX_PENDING_OPERATIONS,
                },
                batch: BatchConfig {
                    batch_size: ADD_BATCH_SIZE,
                },
                clustering: ClusteringOptions::default(),
            },
            Self::Responsive => MarkerOptions {
                throttle: ThrottleConfig {
                    window_ms: 50,
                    min_motion_meters: 2.0,
                },
                cache: IconCacheConfig {
                    icon_capacity: ICON_CACHE_CAPACITY * 2,
                    avatar_capacity: AVATAR_CACHE_CAPACITY,
                },
                readiness: ReadinessConfig {
                    max_attempts: READINESS_MAX_ATTEMPTS,
                    retry_delay_ms: 250,
                    max_pending_operations: MAX_PENDING_OPERATIONS,
                },
                batch: BatchConfig { batch_size: 20 },
                clustering: ClusteringOptions::default(),
            },
            Self::LowPower => MarkerOptions {
                throttle: ThrottleConfig {
                    window_ms: 500,
                    min_motion_meters: 15.0,
                },
                cache: IconCacheConfig {
                    icon_capacity: 25,
                    avatar_capacity: 100,
                },
                readiness: ReadinessConfig {
                    max_attempts: READINESS_MAX_ATTEMPTS,
                    retry_delay_ms: 1000,
                    max_pending_operations: 250,
                },
                batch: BatchConfig { batch_size: 5 },
                clustering: ClusteringOptions::default(),
            },
            Self::Custom(options) => options.clone(),
        }
    }
}

impl Default for MarkerPerformanceProfile {
    fn default() -> Self {
        Self::Balanced
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MarkerOptions {
    pub throttle: ThrottleConfig,
    pub cache: IconCacheConfig,
    pub readiness: ReadinessConfig,
    pub batch: BatchConfig,
    /// Clustering applied until the host overrides it
    pub clustering: ClusteringOptions,
}

impl MarkerOptions {
    /// Balanced defaults with a short readiness retry delay so tests that
    /// exercise initialization failures stay fast.
    pub fn for_testing() -> Self {
        let mut options = Self::default();
        options.readiness.retry_delay_ms = 10;
        options
    }

    /// Parse options from a JSON document, filling omitted fields with the
    /// balanced defaults.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Default for MarkerOptions {
    fn default() -> Self {
        MarkerPerformanceProfile::default().resolve()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ThrottleConfig {
    pub window_ms: u64,
    pub min_motion_meters: f64,
}

impl ThrottleConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            window_ms: THROTTLE_WINDOW_MS,
            min_motion_meters: MIN_MOTION_METERS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IconCacheConfig {
    pub icon_capacity: usize,
    pub avatar_capacity: usize,
}

impl Default for IconCacheConfig {
    fn default() -> Self {
        Self {
            icon_capacity: ICON_CACHE_CAPACITY,
            avatar_capacity: AVATAR_CACHE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReadinessConfig {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub max_pending_operations: usize,
}

impl ReadinessConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_attempts: READINESS_MAX_ATTEMPTS,
            retry_delay_ms: READINESS_RETRY_DELAY_MS,
            max_pending_operations: MAX_PENDING_OPERATIONS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BatchConfig {
    pub batch_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: ADD_BATCH_SIZE,
        }
    }
}
