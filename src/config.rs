// Run configuration
//
// Environment variables (same names the import tool always used):
//   ST=1         force a single worker
//   NCPUS=n      worker count, capped at host parallelism
//   DRY=1        preview changes without writing
//   DEBUG=1      trace every reconciler step
//   DEBUG_SQL=1  log every generated statement
// Any non-empty value turns a flag on.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("NCPUS must be an integer, got '{0}'")]
    InvalidWorkers(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Concurrent rows per phase, at least 1.
    pub workers: usize,
    pub dry_run: bool,
    pub debug: bool,
    pub debug_sql: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: host_parallelism(),
            dry_run: false,
            debug: false,
            debug_sql: false,
        }
    }
}

/// Number of CPUs available to the process.
pub fn host_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

/// Serial wins; otherwise a positive request capped at the host, else the host.
pub fn resolve_workers(serial: bool, requested: Option<usize>, host: usize) -> usize {
    let host = host.max(1);
    if serial {
        return 1;
    }
    match requested {
        Some(n) if n > 0 => n.min(host),
        _ => host,
    }
}

impl RunConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; unset and empty are the same.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |name: &str| lookup(name).map(|v| !v.is_empty()).unwrap_or(false);

        let requested = match lookup("NCPUS").filter(|v| !v.is_empty()) {
            Some(raw) => Some(
                raw.trim()
                    .parse::<i64>()
                    .map_err(|_| ConfigError::InvalidWorkers(raw.clone()))?
                    .max(0) as usize,
            ),
            None => None,
        };

        Ok(Self {
            workers: resolve_workers(flag("ST"), requested, host_parallelism()),
            dry_run: flag("DRY"),
            debug: flag("DEBUG"),
            debug_sql: flag("DEBUG_SQL"),
        })
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}
