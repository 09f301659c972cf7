//! Core configuration.

use std::time::Duration;

/// Configuration for a [`crate::Core`] instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Page size for version, edge and map key scans.
    pub scan_page_size: usize,

    /// How long a started consistency task may run before it is redelivered.
    pub verification_timeout: Duration,

    /// How often the processor looks for expired tasks.
    pub sweep_interval: Duration,

    /// Deliveries of one task before it is dropped.
    pub max_task_attempts: u32,

    /// Consistency tasks that may run at the same time.
    pub worker_concurrency: usize,

    /// How long a writer waits for a uniqueness lock.
    pub unique_lock_timeout: Duration,

    /// Age after which a write that never committed stops blocking others.
    pub stale_write_timeout: Duration,

    /// Largest serialized value the map facade accepts.
    pub map_object_size_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_page_size: 1000,
            verification_timeout: Duration::from_secs(20),
            sweep_interval: Duration::from_secs(1),
            max_task_attempts: 10,
            worker_concurrency: 32,
            unique_lock_timeout: Duration::from_secs(5),
            stale_write_timeout: Duration::from_secs(60),
            map_object_size_limit: 5 * 1024 * 1024, // 5 MiB
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the scan page size.
    #[must_use]
    pub const fn scan_page_size(mut self, size: usize) -> Self {
        self.scan_page_size = size;
        self
    }

    /// Sets the consistency task verification timeout.
    #[must_use]
    pub const fn verification_timeout(mut self, timeout: Duration) -> Self {
        self.verification_timeout = timeout;
        self
    }

    /// Sets the redelivery sweep interval.
    #[must_use]
    pub const fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the delivery attempt cap.
    #[must_use]
    pub const fn max_task_attempts(mut self, attempts: u32) -> Self {
        self.max_task_attempts = attempts;
        self
    }

    /// Sets the consistency worker concurrency.
    #[must_use]
    pub const fn worker_concurrency(mut self, workers: usize) -> Self {
        self.worker_concurrency = workers;
        self
    }

    /// Sets the uniqueness lock timeout.
    #[must_use]
    pub const fn unique_lock_timeout(mut self, timeout: Duration) -> Self {
        self.unique_lock_timeout = timeout;
        self
    }

    /// Sets the stale write timeout.
    #[must_use]
    pub const fn stale_write_timeout(mut self, timeout: Duration) -> Self {
        self.stale_write_timeout = timeout;
        self
    }

    /// Sets the map value size limit.
    #[must_use]
    pub const fn map_object_size_limit(mut self, limit: usize) -> Self {
        self.map_object_size_limit = limit;
        self
    }
}
