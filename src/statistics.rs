use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use crate::{config::StatisticsConfig, error::Trap};

/// Execution counters shared by every invocation of one executor.
#[derive(Debug, Default)]
pub struct Statistics {
    config: StatisticsConfig,
    instructions: AtomicU64,
    cost: AtomicU64,
    wasm_nanos: AtomicU64,
    host_nanos: AtomicU64,
}

impl Statistics {
    pub fn new(config: StatisticsConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &StatisticsConfig {
        &self.config
    }

    pub fn instr_count(&self) -> u64 {
        self.instructions.load(Ordering::Relaxed)
    }

    pub fn total_cost(&self) -> u64 {
        self.cost.load(Ordering::Relaxed)
    }

    pub fn cost_limit(&self) -> Option<u64> {
        self.config.cost_limit
    }

    pub fn wasm_time(&self) -> Duration {
        Duration::from_nanos(self.wasm_nanos.load(Ordering::Relaxed))
    }

    pub fn host_time(&self) -> Duration {
        Duration::from_nanos(self.host_nanos.load(Ordering::Relaxed))
    }

    pub fn instructions_per_second(&self) -> Option<f64> {
        let secs = self.wasm_time().as_secs_f64();
        (secs > 0.0).then(|| self.instr_count() as f64 / secs)
    }

    pub fn reset(&self) {
        self.instructions.store(0, Ordering::Relaxed);
        self.cost.store(0, Ordering::Relaxed);
        self.wasm_nanos.store(0, Ordering::Relaxed);
        self.host_nanos.store(0, Ordering::Relaxed);
    }

    /// Accounts for one instruction about to execute. Every instruction
    /// costs one unit.
    pub(crate) fn tick(&self) -> Result<(), Trap> {
        if self.config.instruction_counting {
            self.instructions.fetch_add(1, Ordering::Relaxed);
        }

        if self.config.cost_measuring {
            let cost = self.cost.fetch_add(1, Ordering::Relaxed) + 1;

            if self.config.cost_limit.is_some_and(|limit| cost > limit) {
                return Err(Trap::CostLimitExceeded);
            }
        }

        Ok(())
    }

    pub(crate) fn add_wasm_time(&self, elapsed: Duration) {
        if self.config.time_measuring {
            self.wasm_nanos
                .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        }
    }

    pub(crate) fn add_host_time(&self, elapsed: Duration) {
        if self.config.time_measuring {
            self.host_nanos
                .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_limit_traps_after_budget() {
        let stats = Statistics::new(StatisticsConfig {
            cost_measuring: true,
            cost_limit: Some(3),
            ..StatisticsConfig::default()
        });

        assert!(stats.tick().is_ok());
        assert!(stats.tick().is_ok());
        assert!(stats.tick().is_ok());
        assert_eq!(stats.tick(), Err(Trap::CostLimitExceeded));
        assert_eq!(stats.instr_count(), 0);

        stats.reset();
        assert_eq!(stats.total_cost(), 0);
    }

    #[test]
    fn disabled_counters_stay_zero() {
        let stats = Statistics::default();

        stats.tick().unwrap();
        stats.add_wasm_time(Duration::from_millis(5));

        assert_eq!(stats.instr_count(), 0);
        assert_eq!(stats.wasm_time(), Duration::ZERO);
        assert_eq!(stats.instructions_per_second(), None);
    }
}
