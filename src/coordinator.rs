//! Batch processing on top of the main transport.
//!
//! [`BatchCoordinator`] turns one received batch into a partial-failure
//! report; [`QueueWorker`] is the polling loop that feeds it and deletes the
//! messages that were fully delivered.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::delivery::DeliveryExecutor;
use crate::error::Result;
use crate::transport::{ReceivedMessage, Transport};
use crate::types::Event;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemFailure {
    pub item_identifier: String,
}

/// Messages the transport must keep for redelivery. Anything not listed is
/// acknowledged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub batch_item_failures: Vec<BatchItemFailure>,
}

impl BatchResponse {
    pub fn is_failed(&self, message_id: &str) -> bool {
        self.batch_item_failures
            .iter()
            .any(|f| f.item_identifier == message_id)
    }
}

#[derive(Clone)]
pub struct BatchCoordinator {
    executor: Arc<DeliveryExecutor>,
}

impl BatchCoordinator {
    pub fn new(executor: Arc<DeliveryExecutor>) -> Self {
        Self { executor }
    }

    /// Process every message concurrently and report the ones to retry.
    ///
    /// A message is acknowledged only if its body parsed and every listener
    /// delivery succeeded. A task that panics counts as failed.
    pub async fn process_batch(&self, messages: &[ReceivedMessage]) -> BatchResponse {
        let mut tasks = JoinSet::new();
        for message in messages {
            let executor = self.executor.clone();
            let message_id = message.message_id.clone();
            let body = message.body.clone();
            tasks.spawn(async move {
                let delivered = process_message(&executor, &message_id, &body).await;
                (message_id, delivered)
            });
        }

        let mut succeeded = HashSet::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((message_id, true)) => {
                    succeeded.insert(message_id);
                }
                Ok((_, false)) => {}
                Err(e) => {
                    tracing::error!(target: "queue_worker", error = %e, "Message task panicked");
                }
            }
        }

        BatchResponse {
            batch_item_failures: messages
                .iter()
                .filter(|m| !succeeded.contains(&m.message_id))
                .map(|m| BatchItemFailure {
                    item_identifier: m.message_id.clone(),
                })
                .collect(),
        }
    }
}

async fn process_message(executor: &DeliveryExecutor, message_id: &str, body: &str) -> bool {
    let event = match Event::from_message_body(body) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(
                target: "queue_worker",
                message_id = %message_id,
                error = %e,
                "Failed to parse queued event"
            );
            return false;
        }
    };

    match executor.process(&event).await {
        Ok(outcome) => outcome.is_success(),
        Err(e) => {
            tracing::error!(
                target: "queue_worker",
                message_id = %message_id,
                event_id = %event.event_id,
                error = %e,
                "Failed to process event"
            );
            false
        }
    }
}

/// Counts for one poll of the main transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub received: usize,
    pub acknowledged: usize,
    pub retained: usize,
}

pub struct QueueWorker {
    transport: Arc<dyn Transport>,
    coordinator: BatchCoordinator,
    batch_size: usize,
    poll_interval: Duration,
}

impl QueueWorker {
    pub fn new(
        transport: Arc<dyn Transport>,
        coordinator: BatchCoordinator,
        batch_size: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            transport,
            coordinator,
            batch_size,
            poll_interval,
        }
    }

    /// Receive one batch, process it and delete the acknowledged messages.
    pub async fn poll_once(&self) -> Result<PollSummary> {
        let messages = self.transport.receive_batch(self.batch_size).await?;
        if messages.is_empty() {
            return Ok(PollSummary::default());
        }

        let response = self.coordinator.process_batch(&messages).await;
        let mut summary = PollSummary {
            received: messages.len(),
            ..Default::default()
        };

        for message in &messages {
            if response.is_failed(&message.message_id) {
                summary.retained += 1;
                continue;
            }
            match self.transport.delete(&message.receipt).await {
                Ok(()) => summary.acknowledged += 1,
                Err(e) => {
                    // Stays on the queue and will be delivered again.
                    summary.retained += 1;
                    tracing::error!(
                        target: "queue_worker",
                        message_id = %message.message_id,
                        error = %e,
                        "Failed to delete delivered message"
                    );
                }
            }
        }

        tracing::debug!(
            target: "queue_worker",
            received = summary.received,
            acknowledged = summary.acknowledged,
            retained = summary.retained,
            "Batch processed"
        );
        Ok(summary)
    }

    /// Poll until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            target: "queue_worker",
            queue = %self.transport.name(),
            batch_size = self.batch_size,
            "Queue worker started"
        );

        while !*shutdown.borrow() {
            let idle = match self.poll_once().await {
                Ok(summary) => summary.received == 0,
                Err(e) => {
                    tracing::error!(target: "queue_worker", error = %e, "Failed to poll queue");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!(target: "queue_worker", "Queue worker stopped");
    }
}
