//! Live subscriptions: one spawned listener task per subscription.

use super::config::PgEventLogConfig;
use super::{read_rows_after, to_db_position};
use projector_core::prelude::*;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle to a live subscription on a [`PgEventLog`](super::PgEventLog).
///
/// The listener task wakes on every notification of the configured channel, and every poll
/// interval, and delivers whatever was appended after the last delivered event. A database
/// error ends the subscription with [`SubscriptionDroppedReason::ServerError`]; closing or
/// dropping the handle ends it with [`SubscriptionDroppedReason::Disposed`].
pub struct PgSubscription {
    name: String,
    last_position: watch::Receiver<Option<u64>>,
    cancellation: Arc<CancellationSource>,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct ListenerTask {
    pool: PgPool,
    config: Arc<PgEventLogConfig>,
    observer: Arc<dyn AllStreamObserver>,
    cancellation: Arc<CancellationSource>,
    last_position: watch::Sender<Option<u64>>,
}

impl PgSubscription {
    pub(super) async fn open(
        pool: PgPool,
        config: Arc<PgEventLogConfig>,
        after_position: Option<u64>,
        observer: Arc<dyn AllStreamObserver>,
    ) -> Result<Self, LogError> {
        let mut listener = PgListener::connect_with(&pool)
            .await
            .map_err(|e| LogError::Subscribe(Box::new(e)))?;
        listener
            .listen(&config.channel_name)
            .await
            .map_err(|e| LogError::Subscribe(Box::new(e)))?;
        log::info!(
            "Listening on channel '{}' after position {:?}",
            config.channel_name,
            after_position
        );

        let name = format!("pg-all-{}", config.channel_name);
        let cancellation = Arc::new(CancellationSource::new());
        let (last_position_tx, last_position) = watch::channel(after_position);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = ListenerTask {
            pool,
            config,
            observer,
            cancellation: cancellation.clone(),
            last_position: last_position_tx,
        };
        let handle = tokio::spawn(task.run(listener, shutdown_rx));

        Ok(Self {
            name,
            last_position,
            cancellation,
            shutdown_tx,
            handle,
        })
    }

    /// Whether the listener task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl LiveSubscription for PgSubscription {
    fn name(&self) -> &str {
        &self.name
    }

    fn last_position(&self) -> Option<u64> {
        *self.last_position.borrow()
    }

    fn close(&self) {
        self.cancellation.cancel();
        self.shutdown_tx.send_replace(true);
    }
}

impl Drop for PgSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl ListenerTask {
    async fn run(self, mut listener: PgListener, mut shutdown_rx: watch::Receiver<bool>) {
        let signal = self.cancellation.signal();

        loop {
            if let Err(e) = self.deliver_pending(&signal).await {
                self.drop_with(
                    SubscriptionDroppedReason::ServerError,
                    Some(LogError::ConnectionLost(e.to_string())),
                );
                return;
            }

            tokio::select! {
                biased;
                _ = shutdown_rx.wait_for(|stop| *stop) => {
                    log::debug!("Listener on channel '{}' closed", self.config.channel_name);
                    self.drop_with(SubscriptionDroppedReason::Disposed, None);
                    return;
                }
                result = listener.recv() => {
                    if let Err(e) = result {
                        self.drop_with(
                            SubscriptionDroppedReason::ServerError,
                            Some(LogError::ConnectionLost(e.to_string())),
                        );
                        return;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Delivers every event after the last delivered one, in batches.
    async fn deliver_pending(&self, signal: &CancellationSignal) -> Result<(), sqlx::Error> {
        let batch_size = i64::try_from(self.config.batch_size.max(1)).unwrap_or(i64::MAX);

        loop {
            let after = self.last_position.borrow().map_or(0, to_db_position);
            let rows = read_rows_after(&self.pool, after, batch_size).await?;
            let fetched = rows.len();

            for row in rows {
                if signal.is_cancelled() {
                    return Ok(());
                }
                let event = StreamEvent::from(row);
                self.last_position.send_replace(Some(event.position));
                self.observer.on_event(event, signal);
            }

            if i64::try_from(fetched).unwrap_or(i64::MAX) < batch_size {
                return Ok(());
            }
        }
    }

    fn drop_with(&self, reason: SubscriptionDroppedReason, error: Option<LogError>) {
        if let Some(error) = &error {
            log::error!(
                "Listener on channel '{}' dropped: {}",
                self.config.channel_name,
                error
            );
        }
        self.cancellation.cancel();
        self.observer.on_dropped(reason, error);
    }
}
