//! Inspection and selective redrive of dead-lettered events.
//!
//! The dead-letter queue has no lookup by id, so both operations scan it
//! through `receive_batch`. Redrive polls a bounded number of times; when the
//! queue holds more entries than `max_poll_attempts * page_size`, requested
//! events beyond that window are reported as not found even if present.
//!
//! The scan relies on received messages staying hidden for the visibility
//! timeout, so the dead-letter queue must have a non-zero one.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};
use crate::transport::{ReceivedMessage, Transport};
use crate::types::Event;

/// Upper bound on entries read per receive call.
pub const MAX_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectRequest {
    pub tenant_id: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub delete_processed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectResult {
    pub matching_events: Vec<Event>,
    /// True whenever a full page was read; more entries may exist.
    pub has_more: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedriveRequest {
    pub event_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedriveReport {
    pub retried: Vec<String>,
    pub failed_retries: Vec<String>,
    pub not_found: Vec<String>,
}

struct FoundEntry {
    message: ReceivedMessage,
    event: Event,
}

pub struct DeadLetterService {
    dead_letter: Arc<dyn Transport>,
    main: Arc<dyn Transport>,
    page_size: usize,
    max_poll_attempts: u32,
}

impl DeadLetterService {
    pub fn new(
        dead_letter: Arc<dyn Transport>,
        main: Arc<dyn Transport>,
        page_size: usize,
        max_poll_attempts: u32,
    ) -> Self {
        Self {
            dead_letter,
            main,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            max_poll_attempts: max_poll_attempts.max(1),
        }
    }

    /// Read one page of the dead-letter queue and return the tenant's events.
    ///
    /// Other tenants' entries are read but left in place. With
    /// `delete_processed` the returned entries are removed; otherwise every
    /// read entry is released back unchanged.
    pub async fn inspect(&self, request: InspectRequest) -> Result<InspectResult> {
        let tenant_id = request.tenant_id.trim();
        if tenant_id.is_empty() {
            return Err(DispatchError::Validation("tenantId is required".into()));
        }

        let page = request
            .limit
            .unwrap_or(self.page_size)
            .clamp(1, self.page_size);
        let messages = self.dead_letter.receive_batch(page).await?;
        let has_more = messages.len() == page;

        let mut matching_events = Vec::new();
        for message in messages {
            let event = match Event::from_message_body(&message.body) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(
                        target: "dead_letter",
                        message_id = %message.message_id,
                        error = %e,
                        "Skipping unparseable dead-letter entry"
                    );
                    self.release(&message).await;
                    continue;
                }
            };

            if event.tenant_id != tenant_id {
                self.release(&message).await;
                continue;
            }

            if request.delete_processed {
                if let Err(e) = self.dead_letter.delete(&message.receipt).await {
                    tracing::error!(
                        target: "dead_letter",
                        event_id = %event.event_id,
                        error = %e,
                        "Failed to delete inspected dead-letter entry"
                    );
                    self.release(&message).await;
                }
            } else {
                self.release(&message).await;
            }
            matching_events.push(event);
        }

        tracing::info!(
            target: "dead_letter",
            tenant_id = %tenant_id,
            matched = matching_events.len(),
            has_more,
            deleted = request.delete_processed,
            "Dead-letter queue inspected"
        );

        Ok(InspectResult {
            matching_events,
            has_more,
        })
    }

    /// Move the requested events from the dead-letter queue back to the main
    /// queue.
    ///
    /// Each found entry is enqueued on the main transport first and only then
    /// deleted from the dead-letter queue, so a failure never loses it.
    pub async fn redrive(&self, request: RedriveRequest) -> Result<RedriveReport> {
        let mut requested = Vec::new();
        let mut seen = HashSet::new();
        for id in request.event_ids {
            let id = id.trim().to_string();
            if !id.is_empty() && seen.insert(id.clone()) {
                requested.push(id);
            }
        }
        if requested.is_empty() {
            return Err(DispatchError::Validation(
                "eventIds must contain at least one id".into(),
            ));
        }

        let mut found: HashMap<String, FoundEntry> = HashMap::new();
        let mut untouched: Vec<ReceivedMessage> = Vec::new();
        let polled = self
            .collect_requested(&seen, &mut found, &mut untouched)
            .await;

        if let Err(e) = polled {
            for entry in found.values() {
                self.release(&entry.message).await;
            }
            for message in &untouched {
                self.release(message).await;
            }
            return Err(e);
        }

        let mut report = RedriveReport::default();
        for event_id in requested {
            match found.remove(&event_id) {
                None => report.not_found.push(event_id),
                Some(entry) => {
                    if self.redrive_entry(&entry).await {
                        report.retried.push(event_id);
                    } else {
                        report.failed_retries.push(event_id);
                    }
                }
            }
        }

        for message in &untouched {
            self.release(message).await;
        }

        tracing::info!(
            target: "dead_letter",
            retried = report.retried.len(),
            failed = report.failed_retries.len(),
            not_found = report.not_found.len(),
            "Dead-letter redrive finished"
        );
        Ok(report)
    }

    async fn collect_requested(
        &self,
        requested: &HashSet<String>,
        found: &mut HashMap<String, FoundEntry>,
        untouched: &mut Vec<ReceivedMessage>,
    ) -> Result<()> {
        for attempt in 1..=self.max_poll_attempts {
            if found.len() == requested.len() {
                break;
            }

            let messages = self.dead_letter.receive_batch(self.page_size).await?;
            tracing::debug!(
                target: "dead_letter",
                attempt,
                received = messages.len(),
                "Polled dead-letter queue"
            );

            for message in messages {
                match Event::from_message_body(&message.body) {
                    Ok(event)
                        if requested.contains(&event.event_id)
                            && !found.contains_key(&event.event_id) =>
                    {
                        found.insert(event.event_id.clone(), FoundEntry { message, event });
                    }
                    _ => untouched.push(message),
                }
            }
        }
        Ok(())
    }

    async fn redrive_entry(&self, entry: &FoundEntry) -> bool {
        let event_id = &entry.event.event_id;
        let retry = entry.event.for_redrive(entry.message.sent_at);

        let body = match retry.to_message_body() {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(target: "dead_letter", event_id = %event_id, error = %e, "Failed to encode redriven event");
                self.release(&entry.message).await;
                return false;
            }
        };

        if let Err(e) = self.main.enqueue(body).await {
            tracing::error!(
                target: "dead_letter",
                event_id = %event_id,
                error = %e,
                "Failed to requeue dead-lettered event"
            );
            self.release(&entry.message).await;
            return false;
        }

        if let Err(e) = self.dead_letter.delete(&entry.message.receipt).await {
            // Already back on the main queue; the leftover copy may be
            // redriven again later.
            tracing::error!(
                target: "dead_letter",
                event_id = %event_id,
                error = %e,
                "Requeued event but failed to remove it from the dead-letter queue"
            );
            return false;
        }

        tracing::info!(
            target: "dead_letter",
            event_id = %event_id,
            tenant_id = %entry.event.tenant_id,
            "Dead-lettered event requeued"
        );
        true
    }

    async fn release(&self, message: &ReceivedMessage) {
        if let Err(e) = self.dead_letter.release(&message.receipt).await {
            tracing::warn!(
                target: "dead_letter",
                message_id = %message.message_id,
                error = %e,
                "Failed to release dead-letter entry"
            );
        }
    }
}
