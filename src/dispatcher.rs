use std::sync::Arc;

use crate::config::DispatcherConfig;
use crate::coordinator::{BatchCoordinator, QueueWorker};
use crate::dead_letter::DeadLetterService;
use crate::delivery::DeliveryExecutor;
use crate::error::Result;
use crate::http_server::ApiState;
use crate::publisher::EventPublisher;
use crate::store::ListenerStore;
use crate::transport::MemoryQueue;

pub const MAIN_QUEUE_NAME: &str = "webhook-events";
pub const DEAD_LETTER_QUEUE_NAME: &str = "webhook-events-dlq";

/// Wiring of store, queues, executor and dead-letter service for one
/// process.
pub struct Dispatcher {
    pub config: DispatcherConfig,
    pub store: Arc<ListenerStore>,
    pub main_queue: Arc<MemoryQueue>,
    pub dead_letter_queue: Arc<MemoryQueue>,
    pub executor: Arc<DeliveryExecutor>,
    pub publisher: EventPublisher,
    pub dead_letters: Arc<DeadLetterService>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, store: Arc<ListenerStore>) -> Result<Self> {
        config.validate()?;

        let dead_letter_queue = Arc::new(MemoryQueue::new(
            DEAD_LETTER_QUEUE_NAME,
            config.queue_settings(),
        ));
        let main_queue = Arc::new(MemoryQueue::with_dead_letter(
            MAIN_QUEUE_NAME,
            config.queue_settings(),
            dead_letter_queue.clone(),
            config.max_receive_count,
        ));

        let executor = Arc::new(DeliveryExecutor::new(
            store.clone(),
            config.delivery_timeout(),
        )?);
        let publisher = EventPublisher::new(main_queue.clone());
        let dead_letters = Arc::new(DeadLetterService::new(
            dead_letter_queue.clone(),
            main_queue.clone(),
            config.dead_letter_page_size,
            config.redrive_max_poll_attempts,
        ));

        Ok(Self {
            config,
            store,
            main_queue,
            dead_letter_queue,
            executor,
            publisher,
            dead_letters,
        })
    }

    pub fn worker(&self) -> QueueWorker {
        QueueWorker::new(
            self.main_queue.clone(),
            BatchCoordinator::new(self.executor.clone()),
            self.config.batch_size,
            self.config.poll_interval(),
        )
    }

    pub fn api_state(&self) -> ApiState {
        ApiState {
            publisher: self.publisher.clone(),
            dead_letters: self.dead_letters.clone(),
        }
    }
}
