//! Orchestration of the three periodic outbox tasks.
//!
//! ```text
//! Dispatcher::run
//!   ├─ processor  (every process_interval)       claim → send → retire
//!   ├─ unlocker   (every lock_checker_interval)  release stale claims
//!   └─ cleaner    (every cleanup_interval)       delete old terminal records
//! ```
//!
//! Each task runs its first pass immediately, then waits for either its next
//! tick or cancellation. An in-flight pass always runs to completion; once the
//! token is cancelled no new pass starts. Failed passes are forwarded to the
//! error sink and the task keeps going.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use outbox_broker::MessageBroker;
use outbox_core::{Clock, SystemClock};

use super::cleaner::RecordCleaner;
use super::error::OutboxError;
use super::processor::RecordProcessor;
use super::settings::{ConfigError, DispatcherSettings};
use super::unlocker::RecordUnlocker;
use crate::store::RecordStore;

/// Runs the processor, unlocker and cleaner for one machine identity.
pub struct Dispatcher<S, B> {
    store: S,
    broker: B,
    settings: DispatcherSettings,
    machine_id: String,
    clock: Arc<dyn Clock>,
}

impl<S, B> Dispatcher<S, B>
where
    S: RecordStore + Clone + 'static,
    B: MessageBroker + 'static,
{
    /// Fails only on unusable settings or an empty machine id.
    pub fn new(
        store: S,
        broker: B,
        settings: DispatcherSettings,
        machine_id: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let machine_id = machine_id.into();
        if machine_id.trim().is_empty() {
            return Err(ConfigError::Invalid("machine id cannot be empty".to_string()));
        }
        settings.validate()?;

        Ok(Self {
            store,
            broker,
            settings,
            machine_id,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    /// Spawn the three tasks on the current tokio runtime.
    ///
    /// Errors from every task go to `errors`. Cancel `cancel` (or call
    /// [`DispatcherHandle::shutdown`]) to stop, then [`DispatcherHandle::join`].
    pub fn run(
        self,
        errors: mpsc::Sender<OutboxError>,
        cancel: CancellationToken,
    ) -> DispatcherHandle {
        let Self {
            store,
            broker,
            settings,
            machine_id,
            clock,
        } = self;

        info!(
            machine_id = %machine_id,
            process_interval_ms = settings.process_interval.as_millis() as u64,
            lock_checker_interval_ms = settings.lock_checker_interval.as_millis() as u64,
            cleanup_interval_ms = settings.cleanup_interval.as_millis() as u64,
            "starting outbox dispatcher"
        );

        let processor = Arc::new(
            RecordProcessor::new(store.clone(), broker, machine_id, settings.retrial_policy)
                .with_clock(clock.clone()),
        );
        let unlocker = Arc::new(
            RecordUnlocker::new(store.clone(), settings.max_lock_duration).with_clock(clock.clone()),
        );
        let cleaner = Arc::new(
            RecordCleaner::new(store, settings.retention_duration).with_clock(clock),
        );

        let tasks = vec![
            spawn_periodic(
                "processor",
                settings.process_interval,
                errors.clone(),
                cancel.clone(),
                move || {
                    let processor = processor.clone();
                    async move { processor.process_records().await }
                },
            ),
            spawn_periodic(
                "unlocker",
                settings.lock_checker_interval,
                errors.clone(),
                cancel.clone(),
                move || {
                    let unlocker = unlocker.clone();
                    async move { unlocker.unlock_expired_messages().await }
                },
            ),
            spawn_periodic(
                "cleaner",
                settings.cleanup_interval,
                errors,
                cancel.clone(),
                move || {
                    let cleaner = cleaner.clone();
                    async move { cleaner.remove_expired_messages().await }
                },
            ),
        ];

        DispatcherHandle { tasks, cancel }
    }
}

/// Handle to a running dispatcher.
#[derive(Debug)]
pub struct DispatcherHandle {
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    cancel: CancellationToken,
}

impl DispatcherHandle {
    /// Request graceful shutdown. Does not wait.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|(_, t)| t.is_finished())
    }

    /// Wait for every task to stop. Returns the first task panic, if any.
    pub async fn join(self) -> Result<(), JoinError> {
        let mut first_err = None;
        for (task, handle) in self.tasks {
            if let Err(e) = handle.await {
                error!(task, error = %e, "dispatcher task panicked");
                first_err.get_or_insert(e);
            }
        }
        info!("outbox dispatcher stopped");
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn spawn_periodic<F, Fut>(
    task: &'static str,
    period: Duration,
    errors: mpsc::Sender<OutboxError>,
    cancel: CancellationToken,
    mut pass: F,
) -> (&'static str, JoinHandle<()>)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), OutboxError>> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        debug!(task, period_ms = period.as_millis() as u64, "dispatcher task started");

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Err(err) = pass().await else {
                continue;
            };
            debug!(task, error = %err, "dispatcher pass failed");

            // A stalled consumer must not hold up shutdown.
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(task, "dropping error report on shutdown");
                    break;
                }
                sent = errors.send(err) => {
                    if sent.is_err() {
                        debug!(task, "error sink closed; dropping report");
                    }
                }
            }
        }

        info!(task, "dispatcher task stopped");
    });

    (task, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use outbox_broker::InMemoryBroker;
    use outbox_core::{Message, Record, RecordId, RecordState};

    use crate::store::InMemoryRecordStore;

    /// Parks every send until `release` is notified.
    #[derive(Default)]
    struct GatedBroker {
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl MessageBroker for GatedBroker {
        type Error = std::convert::Infallible;

        async fn send(&self, _message: &Message) -> Result<(), Self::Error> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    fn fast_settings() -> DispatcherSettings {
        DispatcherSettings {
            process_interval: Duration::from_millis(10),
            lock_checker_interval: Duration::from_millis(10),
            cleanup_interval: Duration::from_millis(10),
            ..DispatcherSettings::default()
        }
    }

    async fn seed_one(store: &InMemoryRecordStore) -> RecordId {
        let record = Record::new(RecordId::new(), Message::new("t", "k", vec![1]), Utc::now());
        let mut tx = store.begin();
        store.add_record_tx(&record, &mut tx).await.unwrap();
        tx.commit().unwrap();
        record.id
    }

    #[test]
    fn empty_machine_id_is_rejected() {
        let result = Dispatcher::new(
            InMemoryRecordStore::new(),
            InMemoryBroker::new(),
            DispatcherSettings::default(),
            " ",
        );
        assert!(result.is_err());
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let settings = DispatcherSettings {
            process_interval: Duration::ZERO,
            ..DispatcherSettings::default()
        };
        let result = Dispatcher::new(InMemoryRecordStore::new(), InMemoryBroker::new(), settings, "a");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[tokio::test]
    async fn delivers_then_stops_on_cancel() {
        let store = InMemoryRecordStore::new();
        let broker = Arc::new(InMemoryBroker::new());
        let id = seed_one(&store).await;

        let dispatcher =
            Dispatcher::new(store.clone(), broker.clone(), fast_settings(), "node-a").unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = dispatcher.run(tx, cancel.clone());

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let record = store.get_record(id).await.unwrap().unwrap();
                if record.state == RecordState::Delivered {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        handle.join().await.unwrap();
        assert_eq!(broker.sent().len(), 1);
    }

    #[tokio::test]
    async fn errors_reach_the_sink() {
        let store = InMemoryRecordStore::new();
        let broker = Arc::new(InMemoryBroker::new());
        broker.set_always_fail(Some("down".into()));
        let id = seed_one(&store).await;

        let dispatcher = Dispatcher::new(store, broker, fast_settings(), "node-a").unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let handle = dispatcher.run(tx, CancellationToken::new());

        let err = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(err, OutboxError::Delivery { record_id, .. } if record_id == id));

        handle.shutdown();
        handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn stalled_error_consumer_does_not_block_shutdown() {
        let store = InMemoryRecordStore::new();
        let broker = Arc::new(InMemoryBroker::new());
        broker.set_always_fail(Some("down".into()));
        seed_one(&store).await;

        let dispatcher = Dispatcher::new(store, broker, fast_settings(), "node-a").unwrap();
        // Capacity 1 and never read: the second report blocks.
        let (tx, _rx) = mpsc::channel(1);
        let handle = dispatcher.run(tx, CancellationToken::new());

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn no_store_calls_after_join() {
        let store = InMemoryRecordStore::new();
        let broker = Arc::new(InMemoryBroker::new());

        let dispatcher =
            Dispatcher::new(store.clone(), broker.clone(), fast_settings(), "node-a").unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = dispatcher.run(tx, cancel.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.join().await.unwrap();

        let calls = store.calls();
        let sends = broker.calls();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.calls(), calls);
        assert_eq!(broker.calls(), sends);
    }

    #[tokio::test]
    async fn cancel_lets_the_in_flight_send_finish() {
        let store = InMemoryRecordStore::new();
        let broker = Arc::new(GatedBroker::default());
        let id = seed_one(&store).await;

        let dispatcher =
            Dispatcher::new(store.clone(), broker.clone(), fast_settings(), "node-a").unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = dispatcher.run(tx, cancel.clone());

        tokio::time::timeout(Duration::from_secs(5), broker.entered.notified())
            .await
            .unwrap();
        cancel.cancel();
        broker.release.notify_one();

        tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap()
            .unwrap();

        let record = store.get_record(id).await.unwrap().unwrap();
        assert_eq!(record.state, RecordState::Delivered);
        assert!(record.claim.is_none());

        let calls = store.calls();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.calls(), calls);
    }
}
