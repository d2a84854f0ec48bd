//! Configuration of the postgres event log.

use std::time::Duration;

/// Default channel the insert trigger notifies on.
pub const DEFAULT_CHANNEL_NAME: &str = "projector_stream_events";

/// Configuration for [`PgEventLog`](super::PgEventLog).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgEventLogConfig {
    /// The channel the insert trigger notifies and live subscriptions listen on.
    ///
    /// Default: `projector_stream_events`
    pub channel_name: String,

    /// How often a live subscription polls for new events when no notification arrives.
    /// Notifications are not delivered while a listener reconnects, so polling bounds how
    /// long an event can go unnoticed.
    ///
    /// Default: 1 second
    pub poll_interval: Duration,

    /// Maximum number of events a live subscription reads per query.
    ///
    /// Default: 500
    pub batch_size: usize,
}

impl Default for PgEventLogConfig {
    fn default() -> Self {
        Self {
            channel_name: DEFAULT_CHANNEL_NAME.to_string(),
            poll_interval: Duration::from_secs(1),
            batch_size: 500,
        }
    }
}

impl PgEventLogConfig {
    /// Sets the notification channel.
    pub fn with_channel_name(mut self, channel_name: impl Into<String>) -> Self {
        self.channel_name = channel_name.into();
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Sets the live batch size. A batch size of 0 is treated as 1.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}
