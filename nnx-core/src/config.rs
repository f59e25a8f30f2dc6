//! C16: configuration.
//!
//! Layered via the `config` crate — defaults, then an optional
//! `nn_exec.toml`, then `NN_EXEC_*` environment overrides (§4.16) — loaded
//! once by the embedding application and passed explicitly to
//! `WorkerPool::new`/`register_default_kernels` call sites rather than held
//! in a global.

use serde::Deserialize;

use crate::error::{Error, Result};

/// Runtime knobs read once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Worker pool thread count; 0 means hardware concurrency (§4.8).
    #[serde(default = "default_pool_threads")]
    pub pool_threads: usize,
    /// `tracing` filter directive, e.g. `"info"` or `"nnx_core=debug"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Whether `register_default_kernels` should register the portable
    /// `optimized` variants on top of the reference ones.
    #[serde(default = "default_prefer_optimized")]
    pub prefer_optimized: bool,
}

fn default_pool_threads() -> usize {
    0
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_prefer_optimized() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Config {
            pool_threads: default_pool_threads(),
            log_level: default_log_level(),
            prefer_optimized: default_prefer_optimized(),
        }
    }
}

impl Config {
    /// Loads defaults, then `nn_exec.toml` if present, then `NN_EXEC_*`
    /// environment variables (e.g. `NN_EXEC_POOL_THREADS=4`).
    pub fn load() -> Result<Config> {
        let settings = config::Config::builder()
            .set_default("pool_threads", 0i64)?
            .set_default("log_level", "info")?
            .set_default("prefer_optimized", true)?
            .add_source(config::File::with_name("nn_exec").required(false))
            .add_source(config::Environment::with_prefix("NN_EXEC"))
            .build()
            .map_err(|e| Error::internal(format!("config load failed: {e}")))?;

        settings.try_deserialize().map_err(|e| Error::internal(format!("config deserialize failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = Config::default();
        assert_eq!(cfg.pool_threads, 0);
        assert_eq!(cfg.log_level, "info");
        assert!(cfg.prefer_optimized);
    }

    #[test]
    fn load_is_deterministic_with_no_overrides_present() {
        // No nn_exec.toml / NN_EXEC_* in the test environment: load() should
        // resolve to the same defaults every time (§8 property 9).
        let a = Config::load().unwrap();
        let b = Config::load().unwrap();
        assert_eq!(a.pool_threads, b.pool_threads);
        assert_eq!(a.log_level, b.log_level);
        assert_eq!(a.prefer_optimized, b.prefer_optimized);
    }
}
