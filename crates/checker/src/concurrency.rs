//! Concurrency planning module for the IPTV checker
//!
//! Derives how many probes may be in flight at once from CPU core count and configuration.

use crate::config::Config;

/// Lower bound for the derived probe pool.
const MIN_DERIVED_PROBES: u32 = 2;
/// Upper bound for the derived probe pool.
const MAX_DERIVED_PROBES: u32 = 8;

/// Concurrency plan derived from configuration and system resources
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyPlan {
    /// Total logical CPU cores available
    pub total_cores: u32,
    /// Maximum number of probes running at the same time
    pub max_concurrent_probes: u32,
}

impl ConcurrencyPlan {
    /// Derive a concurrency plan from configuration
    ///
    /// Uses the following rules:
    /// - Detects CPU cores via num_cpus if not specified in config
    /// - Uses `max_concurrency` unchanged when it is non-zero
    /// - Otherwise one probe per core, clamped to [2, 8]
    pub fn derive(cfg: &Config) -> Self {
        let total_cores = cfg
            .concurrency
            .logical_cores
            .unwrap_or_else(|| num_cpus::get() as u32);

        let max_concurrent_probes = if cfg.concurrency.max_concurrency > 0 {
            cfg.concurrency.max_concurrency
        } else {
            derive_max_probes(total_cores)
        };

        Self {
            total_cores,
            max_concurrent_probes,
        }
    }

    /// Plan with a fixed probe limit, used by tests and embedders.
    pub fn fixed(max_concurrent_probes: u32) -> Self {
        Self {
            total_cores: max_concurrent_probes,
            max_concurrent_probes: max_concurrent_probes.max(1),
        }
    }

    /// Number of workers to start for a pass over `pending` entries.
    pub fn workers_for(&self, pending: usize) -> usize {
        (self.max_concurrent_probes.max(1) as usize).min(pending)
    }
}

/// Probes are network-bound, so the pool tracks cores only loosely
fn derive_max_probes(cores: u32) -> u32 {
    cores.clamp(MIN_DERIVED_PROBES, MAX_DERIVED_PROBES)
}

/// Public function to derive a concurrency plan from configuration
pub fn derive_plan(cfg: &Config) -> ConcurrencyPlan {
    ConcurrencyPlan::derive(cfg)
}
