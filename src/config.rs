//! Configuration surface, mirroring the plain, `serde`-derived config
//! structs this codebase already uses elsewhere (`node::config::NodeConfig`).

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub cuda: bool,
    pub dev_id: usize,
    pub tpb: u32,
    /// `None` defaults to the number of schedulable CPUs at construction
    /// time.
    pub num_processes: Option<usize>,
    pub update_interval: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cuda: false,
            dev_id: 0,
            tpb: 256,
            num_processes: None,
            update_interval: 50_000,
        }
    }
}

impl Config {
    /// Resolves `num_processes`, falling back to the number of
    /// schedulable CPUs the platform reports.
    pub fn num_workers(&self) -> usize {
        self.num_processes.unwrap_or_else(num_cpus::get).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = Config::default();
        assert!(!cfg.cuda);
        assert_eq!(cfg.dev_id, 0);
        assert_eq!(cfg.tpb, 256);
        assert_eq!(cfg.update_interval, 50_000);
    }

    #[test]
    fn num_workers_falls_back_to_cpu_count() {
        let cfg = Config {
            num_processes: None,
            ..Config::default()
        };
        assert!(cfg.num_workers() >= 1);
    }

    #[test]
    fn num_workers_honors_explicit_override() {
        let cfg = Config {
            num_processes: Some(3),
            ..Config::default()
        };
        assert_eq!(cfg.num_workers(), 3);
    }
}
