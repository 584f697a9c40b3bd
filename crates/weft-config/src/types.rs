//! Configuration schema.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use weft_core::Priority;
use weft_fabric::{BackpressurePolicy, DEFAULT_RING_CAPACITY, Quanta, RingConfig, RingSetup};

use crate::error::{ConfigError, ConfigResult};

/// Per-ring back-pressure policy names as they appear in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyName {
    /// Evict the oldest message.
    DropOldest,
    /// Reject the newest message.
    DropNewest,
    /// Park the sender, bounded by `block_timeout_ms`.
    Block,
    /// Park overflow in the arena (bulk only).
    Spill,
}

/// One ring's configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RingClassConfig {
    /// Slot count; power of two.
    pub capacity: usize,
    /// Back-pressure policy.
    pub policy: PolicyName,
    /// Bound for `policy = "block"`.
    pub block_timeout_ms: u64,
    /// Drain quantum per scheduler round; ignored for emergency.
    pub quantum: u64,
}

impl Default for RingClassConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_RING_CAPACITY,
            policy: PolicyName::DropNewest,
            block_timeout_ms: 100,
            quantum: 256,
        }
    }
}

/// The `[fabric]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FabricSection {
    /// Consumer worker count; defaults to the machine's parallelism.
    pub workers: Option<usize>,
    /// How long `stop()` waits for an agent's inbox to drain.
    pub shutdown_grace_ms: u64,
    /// Reassembly memory bound for fragmented payloads.
    pub reassembly_bound_bytes: usize,
    /// Spill arena capacity (messages) for the bulk class.
    pub spill_capacity: usize,
    /// Agent id receiving audit events, when one is deployed.
    pub audit_sink: Option<u16>,
    /// Agent id receiving metrics snapshots, when one is deployed.
    pub metrics_sink: Option<u16>,
    /// Binding persistence file; in-memory only when unset.
    pub bindings_path: Option<PathBuf>,
}

impl Default for FabricSection {
    fn default() -> Self {
        Self {
            workers: None,
            shutdown_grace_ms: 5_000,
            reassembly_bound_bytes: 16 * 1024 * 1024,
            spill_capacity: 1 << 14,
            audit_sink: None,
            metrics_sink: None,
            bindings_path: None,
        }
    }
}

/// Per-class ring overrides, keyed by class name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RingsSection {
    /// Emergency ring. Policy is ignored: emergency never drops.
    pub emergency: RingClassConfig,
    /// Critical ring.
    pub critical: RingClassConfig,
    /// High ring.
    pub high: RingClassConfig,
    /// Medium ring.
    pub medium: RingClassConfig,
    /// Low ring.
    pub low: RingClassConfig,
    /// Bulk ring.
    pub bulk: RingClassConfig,
}

impl RingsSection {
    fn for_class(&self, class: Priority) -> &RingClassConfig {
        match class {
            Priority::Emergency => &self.emergency,
            Priority::Critical => &self.critical,
            Priority::High => &self.high,
            Priority::Medium => &self.medium,
            Priority::Low => &self.low,
            Priority::Bulk => &self.bulk,
        }
    }
}

/// Complete fabric configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WeftConfig {
    /// The `[fabric]` section.
    pub fabric: FabricSection,
    /// The `[rings.*]` sections.
    pub rings: RingsSection,
}

impl WeftConfig {
    /// Defaults tuned for tests: small rings, low quanta.
    #[must_use]
    pub fn for_tests() -> Self {
        let mut config = Self::default();
        for class in Priority::ALL {
            let ring = match class {
                Priority::Emergency => &mut config.rings.emergency,
                Priority::Critical => &mut config.rings.critical,
                Priority::High => &mut config.rings.high,
                Priority::Medium => &mut config.rings.medium,
                Priority::Low => &mut config.rings.low,
                Priority::Bulk => &mut config.rings.bulk,
            };
            ring.capacity = 1 << 10;
        }
        config.fabric.shutdown_grace_ms = 500;
        config
    }

    /// Validate everything a fabric boot depends on.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`]; all are fatal at boot.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.fabric.workers == Some(0) {
            return Err(ConfigError::NoWorkers);
        }
        for class in Priority::ALL {
            let ring = self.rings.for_class(class);
            let name = class.to_string();
            if ring.capacity < 2 || !ring.capacity.is_power_of_two() {
                return Err(ConfigError::InvalidCapacity {
                    class: name,
                    capacity: ring.capacity,
                });
            }
            if ring.policy == PolicyName::Spill && class != Priority::Bulk {
                return Err(ConfigError::SpillNotBulk { class: name });
            }
            if ring.quantum == 0 && class != Priority::Emergency {
                return Err(ConfigError::ZeroQuantum { class: name });
            }
            if ring.policy == PolicyName::Block && ring.block_timeout_ms == 0 {
                return Err(ConfigError::ZeroBlockTimeout { class: name });
            }
        }
        Ok(())
    }

    /// Resolved worker count.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.fabric.workers.unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
        })
    }

    /// Shutdown grace as a [`Duration`].
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.fabric.shutdown_grace_ms)
    }

    /// Translate to the fabric's ring setup. Call [`WeftConfig::validate`]
    /// first; this does not re-check.
    #[must_use]
    pub fn ring_setup(&self) -> RingSetup {
        let rings = Priority::ALL.map(|class| {
            let ring = self.rings.for_class(class);
            let policy = match ring.policy {
                PolicyName::DropOldest => BackpressurePolicy::DropOldest,
                PolicyName::DropNewest => BackpressurePolicy::DropNewest,
                PolicyName::Block => BackpressurePolicy::BlockSender {
                    timeout: Duration::from_millis(ring.block_timeout_ms),
                },
                PolicyName::Spill => BackpressurePolicy::SpillToArena,
            };
            RingConfig {
                capacity: ring.capacity,
                policy,
            }
        });
        RingSetup {
            rings,
            spill_capacity: self.fabric.spill_capacity,
        }
    }

    /// Translate to the scheduler's quanta. Emergency is always unbounded.
    #[must_use]
    pub fn quanta(&self) -> Quanta {
        let mut quanta = Priority::ALL.map(|class| self.rings.for_class(class).quantum);
        quanta[Priority::Emergency.index()] = u64::MAX;
        Quanta(quanta)
    }
}
