use std::time::Duration;

/// Configuration of a [`ProjectionManager`](crate::ProjectionManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectorConfig {
    /// Number of events a catch-up reads per page.
    ///
    /// Default: 1000
    pub catch_up_page_size: usize,

    /// How long shutdown waits for running catch-ups to stop before aborting them.
    ///
    /// Default: 10 seconds
    pub shutdown_timeout: Duration,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            catch_up_page_size: 1000,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl ProjectorConfig {
    /// Sets the catch-up page size. A page size of 0 is treated as 1.
    pub fn with_catch_up_page_size(mut self, page_size: usize) -> Self {
        self.catch_up_page_size = page_size.max(1);
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}
