use crate::instance::MAX_PAGES;

/// Runtime limits and measurement switches. Passed by value to the
/// [`Executor`](crate::Executor), [`Validator`](crate::Validator) and
/// [`Vm`](crate::Vm).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Ceiling on the page count of any memory, at instantiation and for
    /// `memory.grow`.
    pub max_memory_pages: u32,
    /// Ceiling on the element count of any table, at instantiation and for
    /// `table.grow`.
    pub max_table_elements: u32,
    /// Maximum number of nested wasm and host frames.
    pub max_call_depth: usize,
    /// Maximum number of host functions that are calling back into wasm at
    /// once. Each of these nests a native call chain.
    pub max_host_reentrance: usize,
    pub statistics: StatisticsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_memory_pages: MAX_PAGES,
            max_table_elements: 10_000_000,
            max_call_depth: 10_000,
            max_host_reentrance: 64,
            statistics: StatisticsConfig::default(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_memory_pages(mut self, pages: u32) -> Self {
        self.max_memory_pages = pages.min(MAX_PAGES);
        self
    }

    pub fn max_table_elements(mut self, elements: u32) -> Self {
        self.max_table_elements = elements;
        self
    }

    pub fn max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn max_host_reentrance(mut self, reentrance: usize) -> Self {
        self.max_host_reentrance = reentrance;
        self
    }

    pub fn statistics(mut self, statistics: StatisticsConfig) -> Self {
        self.statistics = statistics;
        self
    }

    /// Enables cost measuring and traps once `limit` units have been spent.
    pub fn cost_limit(mut self, limit: u64) -> Self {
        self.statistics.cost_measuring = true;
        self.statistics.cost_limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatisticsConfig {
    pub instruction_counting: bool,
    pub cost_measuring: bool,
    pub time_measuring: bool,
    pub cost_limit: Option<u64>,
}

impl StatisticsConfig {
    pub fn all() -> Self {
        Self {
            instruction_counting: true,
            cost_measuring: true,
            time_measuring: true,
            cost_limit: None,
        }
    }

    pub(crate) fn any(&self) -> bool {
        self.instruction_counting || self.cost_measuring || self.time_measuring
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder() {
        let config = Config::new()
            .max_memory_pages(1 << 20)
            .max_call_depth(64)
            .max_table_elements(1000)
            .max_host_reentrance(4)
            .cost_limit(100);

        assert_eq!(config.max_memory_pages, MAX_PAGES);
        assert_eq!(config.max_call_depth, 64);
        assert_eq!(config.max_table_elements, 1000);
        assert_eq!(config.max_host_reentrance, 4);
        assert!(config.statistics.cost_measuring);
        assert!(!config.statistics.instruction_counting);
        assert_eq!(config.statistics.cost_limit, Some(100));
    }
}
