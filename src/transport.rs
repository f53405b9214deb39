//! Message transport contract and an in-memory queue implementing it.
//!
//! The queue mimics a visibility-timeout broker: a received message stays in
//! the queue, hidden, until it is deleted or its visibility expires. A queue
//! built with [`MemoryQueue::with_dead_letter`] moves a message to the
//! dead-letter queue once it has been received `max_receive_count` times
//! without being deleted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{DispatchError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: String,
    /// Token for `delete`/`release`; only valid for this receive.
    pub receipt: String,
    pub body: String,
    pub receive_count: u32,
    /// When the message entered this queue.
    pub sent_at: DateTime<Utc>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Append a message body, returning the new message id.
    async fn enqueue(&self, body: String) -> Result<String>;

    /// Receive up to `max_count` visible messages, hiding them for the
    /// visibility timeout.
    async fn receive_batch(&self, max_count: usize) -> Result<Vec<ReceivedMessage>>;

    async fn delete(&self, receipt: &str) -> Result<()>;

    /// Make a received message visible again immediately.
    async fn release(&self, receipt: &str) -> Result<()>;

    /// Number of messages held, visible or not.
    async fn approximate_len(&self) -> Result<usize>;
}

#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    pub visibility_timeout: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct StoredMessage {
    id: String,
    body: String,
    sent_at: DateTime<Utc>,
    receive_count: u32,
    receipt: Option<String>,
    invisible_until: Option<Instant>,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.invisible_until.map_or(true, |until| until <= now)
    }
}

struct DeadLetterTarget {
    queue: Arc<dyn Transport>,
    max_receive_count: u32,
}

pub struct MemoryQueue {
    name: String,
    settings: QueueSettings,
    messages: Mutex<VecDeque<StoredMessage>>,
    dead_letter: Option<DeadLetterTarget>,
    available: AtomicBool,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>, settings: QueueSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            messages: Mutex::new(VecDeque::new()),
            dead_letter: None,
            available: AtomicBool::new(true),
        }
    }

    pub fn with_dead_letter(
        name: impl Into<String>,
        settings: QueueSettings,
        dead_letter: Arc<dyn Transport>,
        max_receive_count: u32,
    ) -> Self {
        let mut queue = Self::new(name, settings);
        queue.dead_letter = Some(DeadLetterTarget {
            queue: dead_letter,
            max_receive_count: max_receive_count.max(1),
        });
        queue
    }

    /// Simulate the broker going away; every call fails while unavailable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Bodies of all held messages in queue order.
    pub async fn bodies(&self) -> Vec<String> {
        self.messages
            .lock()
            .await
            .iter()
            .map(|m| m.body.clone())
            .collect()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DispatchError::TransportUnavailable(self.name.clone()))
        }
    }

    async fn move_to_dead_letter(&self, expired: Vec<StoredMessage>) {
        let Some(target) = &self.dead_letter else {
            return;
        };

        for message in expired {
            match target.queue.enqueue(message.body.clone()).await {
                Ok(dead_id) => {
                    tracing::warn!(
                        target: "queue",
                        queue = %self.name,
                        dead_letter_queue = %target.queue.name(),
                        message_id = %message.id,
                        dead_letter_message_id = %dead_id,
                        receive_count = message.receive_count,
                        "Message exceeded max receive count, moved to dead-letter queue"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        target: "queue",
                        queue = %self.name,
                        message_id = %message.id,
                        error = %e,
                        "Failed to move message to dead-letter queue, keeping it"
                    );
                    self.messages.lock().await.push_back(message);
                }
            }
        }
    }
}

#[async_trait]
impl Transport for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, body: String) -> Result<String> {
        self.ensure_available()?;
        let id = Uuid::new_v4().to_string();
        self.messages.lock().await.push_back(StoredMessage {
            id: id.clone(),
            body,
            sent_at: Utc::now(),
            receive_count: 0,
            receipt: None,
            invisible_until: None,
        });
        Ok(id)
    }

    async fn receive_batch(&self, max_count: usize) -> Result<Vec<ReceivedMessage>> {
        self.ensure_available()?;

        let now = Instant::now();
        let mut received = Vec::new();
        let mut expired = Vec::new();
        {
            let mut messages = self.messages.lock().await;
            let max_receive_count = self.dead_letter.as_ref().map(|t| t.max_receive_count);

            let mut index = 0;
            while index < messages.len() && received.len() < max_count {
                if !messages[index].is_visible(now) {
                    index += 1;
                    continue;
                }
                if max_receive_count.is_some_and(|max| messages[index].receive_count >= max) {
                    if let Some(message) = messages.remove(index) {
                        expired.push(message);
                    }
                    continue;
                }

                let message = &mut messages[index];
                let receipt = Uuid::new_v4().to_string();
                message.receive_count += 1;
                message.receipt = Some(receipt.clone());
                message.invisible_until = Some(now + self.settings.visibility_timeout);
                received.push(ReceivedMessage {
                    message_id: message.id.clone(),
                    receipt,
                    body: message.body.clone(),
                    receive_count: message.receive_count,
                    sent_at: message.sent_at,
                });
                index += 1;
            }
        }

        if !expired.is_empty() {
            self.move_to_dead_letter(expired).await;
        }
        Ok(received)
    }

    async fn delete(&self, receipt: &str) -> Result<()> {
        self.ensure_available()?;
        let mut messages = self.messages.lock().await;
        let position = messages
            .iter()
            .position(|m| m.receipt.as_deref() == Some(receipt))
            .ok_or_else(|| {
                DispatchError::Transport(format!("unknown receipt on queue {}", self.name))
            })?;
        messages.remove(position);
        Ok(())
    }

    async fn release(&self, receipt: &str) -> Result<()> {
        self.ensure_available()?;
        let mut messages = self.messages.lock().await;
        let message = messages
            .iter_mut()
            .find(|m| m.receipt.as_deref() == Some(receipt))
            .ok_or_else(|| {
                DispatchError::Transport(format!("unknown receipt on queue {}", self.name))
            })?;
        message.invisible_until = None;
        Ok(())
    }

    async fn approximate_len(&self) -> Result<usize> {
        self.ensure_available()?;
        Ok(self.messages.lock().await.len())
    }
}
