//! greenrt configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls on a `SchedulerConfig`
//! 2. Environment variables (runtime, `from_env()` only)
//! 3. The file named by `GREENRT_CONFIG_RS` (compile time)
//! 4. Library defaults
//!
//! ```rust,ignore
//! use greenrt_runtime::config::SchedulerConfig;
//!
//! let config = SchedulerConfig::from_env()
//!     .num_workers(8)
//!     .stack_size(128 * 1024);
//! ```
//!
//! Stack geometry (`max_green_threads`, `stack_size`, `red_zone`,
//! `reuse_stacks`) is process-wide: the first configuration installed
//! with [`install`] (or `from_env()` on first use) fixes it.

pub mod defaults;

use std::sync::OnceLock;
use std::time::Duration;

use greenrt_core::constants::{MAX_WORKERS, MIN_STACK_SIZE, PAGE_SIZE};
use greenrt_core::env::{env_get, env_get_bool, env_get_millis};
use greenrt_core::{kprintln, kwarn, SchedError, SchedResult};

pub use greenrt_core::ConfigError;

/// Scheduler configuration with builder methods
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Route eligible work onto green threads
    pub green_threads_enabled: bool,
    /// Worker threads in the pool
    pub num_workers: usize,
    /// Maximum simultaneously live green threads (stack slots)
    pub max_green_threads: usize,
    /// Usable stack bytes per green thread
    pub stack_size: usize,
    /// Cooperative overflow margin above the guard page
    pub red_zone: usize,
    /// Keep released stacks' pages resident for the next green thread
    pub reuse_stacks: bool,
    /// Per-worker local queue capacity
    pub local_queue_capacity: usize,
    /// Initial global queue capacity
    pub global_queue_capacity: usize,
    /// Empty polls before a worker parks
    pub idle_spins: u32,
    /// Worker park timeout
    pub park_timeout: Duration,
    /// Log green-thread lifecycle events at info level
    pub debug_logging: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn resolve_workers(n: usize) -> usize {
    if n != 0 {
        return n;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(MAX_WORKERS)
}

impl SchedulerConfig {
    /// Compile-time defaults with environment overrides
    ///
    /// Environment variables (all optional):
    /// - `GREENRT_ENABLED` - Use green threads (0/1)
    /// - `GREENRT_NUM_WORKERS` - Worker threads (0 = available parallelism)
    /// - `GREENRT_MAX_GREEN_THREADS` - Live green-thread limit
    /// - `GREENRT_STACK_SIZE` - Stack bytes per green thread
    /// - `GREENRT_RED_ZONE` - Overflow margin in bytes
    /// - `GREENRT_REUSE_STACKS` - Keep stack pages between uses (0/1)
    /// - `GREENRT_LOCAL_QUEUE_CAPACITY` - Per-worker queue size
    /// - `GREENRT_GLOBAL_QUEUE_CAPACITY` - Global queue size hint
    /// - `GREENRT_IDLE_SPINS` - Empty polls before parking
    /// - `GREENRT_PARK_TIMEOUT_MS` - Park timeout in milliseconds
    /// - `GREENRT_DEBUG` - Lifecycle logging (0/1)
    pub fn from_env() -> Self {
        Self {
            green_threads_enabled: env_get_bool("GREENRT_ENABLED", defaults::GREEN_THREADS_ENABLED),
            num_workers: resolve_workers(env_get("GREENRT_NUM_WORKERS", defaults::NUM_WORKERS)),
            max_green_threads: env_get("GREENRT_MAX_GREEN_THREADS", defaults::MAX_GREEN_THREADS),
            stack_size: env_get("GREENRT_STACK_SIZE", defaults::STACK_SIZE),
            red_zone: env_get("GREENRT_RED_ZONE", defaults::RED_ZONE),
            reuse_stacks: env_get_bool("GREENRT_REUSE_STACKS", defaults::REUSE_STACKS),
            local_queue_capacity: env_get(
                "GREENRT_LOCAL_QUEUE_CAPACITY",
                defaults::LOCAL_QUEUE_CAPACITY,
            ),
            global_queue_capacity: env_get(
                "GREENRT_GLOBAL_QUEUE_CAPACITY",
                defaults::GLOBAL_QUEUE_CAPACITY,
            ),
            idle_spins: env_get("GREENRT_IDLE_SPINS", defaults::IDLE_SPINS),
            park_timeout: env_get_millis(
                "GREENRT_PARK_TIMEOUT_MS",
                Duration::from_millis(defaults::PARK_TIMEOUT_MS),
            ),
            debug_logging: env_get_bool("GREENRT_DEBUG", defaults::DEBUG_LOGGING),
        }
    }

    /// Compile-time defaults only, no environment lookups
    pub fn new() -> Self {
        Self {
            green_threads_enabled: defaults::GREEN_THREADS_ENABLED,
            num_workers: resolve_workers(defaults::NUM_WORKERS),
            max_green_threads: defaults::MAX_GREEN_THREADS,
            stack_size: defaults::STACK_SIZE,
            red_zone: defaults::RED_ZONE,
            reuse_stacks: defaults::REUSE_STACKS,
            local_queue_capacity: defaults::LOCAL_QUEUE_CAPACITY,
            global_queue_capacity: defaults::GLOBAL_QUEUE_CAPACITY,
            idle_spins: defaults::IDLE_SPINS,
            park_timeout: Duration::from_millis(defaults::PARK_TIMEOUT_MS),
            debug_logging: defaults::DEBUG_LOGGING,
        }
    }

    // Builder methods

    pub fn green_threads_enabled(mut self, enable: bool) -> Self {
        self.green_threads_enabled = enable;
        self
    }

    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = resolve_workers(n);
        self
    }

    pub fn max_green_threads(mut self, n: usize) -> Self {
        self.max_green_threads = n;
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn red_zone(mut self, size: usize) -> Self {
        self.red_zone = size;
        self
    }

    pub fn reuse_stacks(mut self, reuse: bool) -> Self {
        self.reuse_stacks = reuse;
        self
    }

    pub fn local_queue_capacity(mut self, cap: usize) -> Self {
        self.local_queue_capacity = cap;
        self
    }

    pub fn global_queue_capacity(mut self, cap: usize) -> Self {
        self.global_queue_capacity = cap;
        self
    }

    pub fn idle_spins(mut self, spins: u32) -> Self {
        self.idle_spins = spins;
        self
    }

    pub fn park_timeout(mut self, d: Duration) -> Self {
        self.park_timeout = d;
        self
    }

    pub fn debug_logging(mut self, enable: bool) -> Self {
        self.debug_logging = enable;
        self
    }

    /// Stack size rounded up to whole pages
    pub fn stack_size_pages(&self) -> usize {
        self.stack_size.div_ceil(PAGE_SIZE) * PAGE_SIZE
    }

    /// Green threads are both requested and possible on this target
    pub fn green_threads_available(&self) -> bool {
        self.green_threads_enabled && crate::arch::STACK_SWITCHING_SUPPORTED
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::InvalidValue("num_workers must be > 0"));
        }
        if self.num_workers > MAX_WORKERS {
            return Err(ConfigError::InvalidValue("num_workers must be <= 64"));
        }
        if self.max_green_threads == 0 {
            return Err(ConfigError::InvalidValue("max_green_threads must be > 0"));
        }
        if self.max_green_threads >= u32::MAX as usize {
            return Err(ConfigError::InvalidValue("max_green_threads must fit in u32"));
        }
        if self.stack_size < MIN_STACK_SIZE {
            return Err(ConfigError::InvalidValue("stack_size must be >= 64KB"));
        }
        if self.red_zone >= self.stack_size / 2 {
            return Err(ConfigError::InvalidValue("red_zone must be < stack_size / 2"));
        }
        if self.local_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue("local_queue_capacity must be > 0"));
        }
        if self.global_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue("global_queue_capacity must be > 0"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        kprintln!("greenrt configuration:");
        kprintln!("  green_threads_enabled:  {}", self.green_threads_enabled);
        kprintln!("  stack_switching:        {}", crate::arch::STACK_SWITCHING_SUPPORTED);
        kprintln!("  num_workers:            {}", self.num_workers);
        kprintln!("  max_green_threads:      {}", self.max_green_threads);
        kprintln!("  stack_size:             {}", self.stack_size);
        kprintln!("  red_zone:               {}", self.red_zone);
        kprintln!("  reuse_stacks:           {}", self.reuse_stacks);
        kprintln!("  local_queue_capacity:   {}", self.local_queue_capacity);
        kprintln!("  global_queue_capacity:  {}", self.global_queue_capacity);
        kprintln!("  idle_spins:             {}", self.idle_spins);
        kprintln!("  park_timeout:           {:?}", self.park_timeout);
        kprintln!("  debug_logging:          {}", self.debug_logging);
    }
}

static GLOBAL_CONFIG: OnceLock<SchedulerConfig> = OnceLock::new();

/// Install the process-wide configuration
///
/// Fails with `AlreadyInitialized` if a configuration is already in place,
/// unless it is identical to `config`.
pub fn install(config: SchedulerConfig) -> SchedResult<()> {
    config.validate()?;
    let mut installed = false;
    let current = GLOBAL_CONFIG.get_or_init(|| {
        installed = true;
        config.clone()
    });
    if installed || *current == config {
        Ok(())
    } else {
        Err(SchedError::AlreadyInitialized)
    }
}

/// Process-wide configuration, `from_env()` unless installed earlier
pub fn global() -> &'static SchedulerConfig {
    GLOBAL_CONFIG.get_or_init(|| {
        let config = SchedulerConfig::from_env();
        match config.validate() {
            Ok(()) => config,
            Err(e) => {
                kwarn!("{}; falling back to library defaults", e);
                SchedulerConfig::new()
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = SchedulerConfig::new();
        assert!(config.num_workers >= 1);
        assert_eq!(config.stack_size, 256 * 1024);
        assert_eq!(config.red_zone, 16 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = SchedulerConfig::new()
            .num_workers(3)
            .stack_size(100_000)
            .reuse_stacks(false)
            .green_threads_enabled(false);

        assert_eq!(config.num_workers, 3);
        assert_eq!(config.stack_size_pages(), 102_400);
        assert!(!config.reuse_stacks);
        assert!(!config.green_threads_available());
    }

    #[test]
    fn test_validation() {
        assert!(SchedulerConfig::new().num_workers(1000).validate().is_err());
        assert!(SchedulerConfig::new().stack_size(4096).validate().is_err());
        assert!(SchedulerConfig::new().red_zone(200 * 1024).validate().is_err());
        assert!(SchedulerConfig::new().max_green_threads(0).validate().is_err());
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("GREENRT_IDLE_SPINS", "77");
        let config = SchedulerConfig::from_env();
        std::env::remove_var("GREENRT_IDLE_SPINS");
        assert_eq!(config.idle_spins, 77);
    }
}
