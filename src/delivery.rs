//! Fan-out delivery of one event to its matched listeners.
//!
//! Every listener call for an event runs concurrently and all of them are
//! awaited. The event counts as delivered only if every call returned 2xx, so
//! a single failing listener makes the transport redeliver the event to all
//! listeners again. Receivers are expected to dedupe on `eventId`.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use crate::error::{DispatchError, Result};
use crate::registry::ListenerRegistry;
use crate::signing::{self, EVENT_ID_HEADER, EVENT_TYPE_HEADER, SIGNATURE_HEADER, TENANT_ID_HEADER};
use crate::types::{Event, Listener};

/// Response bodies kept in failure reasons are cut to this many characters.
const MAX_RESPONSE_BODY_CHARS: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The listener answered outside `200..300`.
    Status { status: u16, body: String },
    Timeout,
    Transport(String),
    /// The event could not be turned into a request body.
    Payload(String),
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryFailure::Status { status, body } if body.is_empty() => {
                write!(f, "HTTP {status}")
            }
            DeliveryFailure::Status { status, body } => write!(f, "HTTP {status}: {body}"),
            DeliveryFailure::Timeout => write!(f, "request timed out"),
            DeliveryFailure::Transport(e) => write!(f, "request failed: {e}"),
            DeliveryFailure::Payload(e) => write!(f, "payload error: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { status: u16 },
    Failed(DeliveryFailure),
}

/// Result of one listener call.
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    pub listener_id: String,
    pub url: String,
    pub outcome: DeliveryOutcome,
    pub latency_ms: u64,
}

impl DeliveryResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::Delivered { .. })
    }

    pub fn failure(&self) -> Option<&DeliveryFailure> {
        match &self.outcome {
            DeliveryOutcome::Failed(failure) => Some(failure),
            DeliveryOutcome::Delivered { .. } => None,
        }
    }
}

/// Aggregate of all listener calls for one event.
#[derive(Debug, Clone)]
pub struct EventOutcome {
    pub event_id: String,
    pub results: Vec<DeliveryResult>,
}

impl EventOutcome {
    /// True when every matched listener got the event; vacuously true with
    /// no listeners.
    pub fn is_success(&self) -> bool {
        self.results.iter().all(DeliveryResult::is_success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &DeliveryResult> {
        self.results.iter().filter(|r| !r.is_success())
    }
}

pub struct DeliveryExecutor {
    registry: Arc<dyn ListenerRegistry>,
    client: Client,
    timeout: Duration,
}

impl DeliveryExecutor {
    /// # Errors
    ///
    /// Returns `DispatchError::HttpClient` if the HTTP client cannot be built.
    pub fn new(registry: Arc<dyn ListenerRegistry>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("nexus-webhook-dispatcher/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| DispatchError::HttpClient(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            registry,
            client,
            timeout,
        })
    }

    /// Match listeners for the event and deliver to all of them.
    ///
    /// A registry failure is returned as an error so the caller can retry the
    /// whole event; listener failures are part of the outcome.
    pub async fn process(&self, event: &Event) -> Result<EventOutcome> {
        let listeners = self
            .registry
            .match_listeners(&event.tenant_id, &event.event_type)
            .await?;

        if listeners.is_empty() {
            tracing::info!(
                target: "webhook_delivery",
                event_id = %event.event_id,
                event_type = %event.event_type,
                tenant_id = %event.tenant_id,
                "No active listeners match event, nothing to deliver"
            );
            return Ok(EventOutcome {
                event_id: event.event_id.clone(),
                results: Vec::new(),
            });
        }

        tracing::info!(
            target: "webhook_delivery",
            event_id = %event.event_id,
            event_type = %event.event_type,
            tenant_id = %event.tenant_id,
            listener_count = listeners.len(),
            "Delivering event to matching listeners"
        );

        let results = self.deliver(event, &listeners).await;
        let outcome = EventOutcome {
            event_id: event.event_id.clone(),
            results,
        };

        if !outcome.is_success() {
            tracing::warn!(
                target: "webhook_delivery",
                event_id = %event.event_id,
                tenant_id = %event.tenant_id,
                failed = outcome.failures().count(),
                total = outcome.results.len(),
                "Event delivery incomplete, event will be retried for all listeners"
            );
        }
        Ok(outcome)
    }

    /// Deliver to every listener concurrently and wait for all results.
    pub async fn deliver(&self, event: &Event, listeners: &[Listener]) -> Vec<DeliveryResult> {
        let body = match signing::canonical_payload(event) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    event_id = %event.event_id,
                    error = %e,
                    "Failed to build canonical payload"
                );
                return listeners
                    .iter()
                    .map(|l| DeliveryResult {
                        listener_id: l.id.clone(),
                        url: l.url.clone(),
                        outcome: DeliveryOutcome::Failed(DeliveryFailure::Payload(e.to_string())),
                        latency_ms: 0,
                    })
                    .collect();
            }
        };

        join_all(
            listeners
                .iter()
                .map(|listener| self.deliver_one(event, listener, &body)),
        )
        .await
    }

    async fn deliver_one(&self, event: &Event, listener: &Listener, body: &[u8]) -> DeliveryResult {
        let signature = signing::sign(&listener.secret, body);

        let start = Instant::now();
        let result = self
            .client
            .post(&listener.url)
            .timeout(self.timeout)
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(EVENT_TYPE_HEADER, event.event_type.as_str())
            .header(EVENT_ID_HEADER, event.event_id.as_str())
            .header(TENANT_ID_HEADER, event.tenant_id.as_str())
            .body(body.to_vec())
            .send()
            .await;

        let outcome = match result {
            Ok(response) => {
                let status = response.status().as_u16();
                if response.status().is_success() {
                    DeliveryOutcome::Delivered { status }
                } else {
                    let body = response
                        .text()
                        .await
                        .unwrap_or_default()
                        .chars()
                        .take(MAX_RESPONSE_BODY_CHARS)
                        .collect::<String>();
                    DeliveryOutcome::Failed(DeliveryFailure::Status { status, body })
                }
            }
            Err(e) if e.is_timeout() => DeliveryOutcome::Failed(DeliveryFailure::Timeout),
            Err(e) => DeliveryOutcome::Failed(DeliveryFailure::Transport(e.to_string())),
        };
        let latency_ms = start.elapsed().as_millis() as u64;

        match &outcome {
            DeliveryOutcome::Delivered { status } => {
                tracing::info!(
                    target: "webhook_delivery",
                    event_id = %event.event_id,
                    listener_id = %listener.id,
                    status = *status,
                    latency_ms,
                    "Webhook delivery succeeded"
                );
            }
            DeliveryOutcome::Failed(failure) => {
                tracing::warn!(
                    target: "webhook_delivery",
                    event_id = %event.event_id,
                    listener_id = %listener.id,
                    url = %listener.url,
                    error = %failure,
                    latency_ms,
                    "Webhook delivery failed"
                );
            }
        }

        DeliveryResult {
            listener_id: listener.id.clone(),
            url: listener.url.clone(),
            outcome,
            latency_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(outcome: DeliveryOutcome) -> DeliveryResult {
        DeliveryResult {
            listener_id: "lst_1".into(),
            url: "https://example.com".into(),
            outcome,
            latency_ms: 1,
        }
    }

    #[test]
    fn empty_outcome_is_success() {
        let outcome = EventOutcome {
            event_id: "e".into(),
            results: Vec::new(),
        };
        assert!(outcome.is_success());
    }

    #[test]
    fn one_failure_fails_the_event() {
        let outcome = EventOutcome {
            event_id: "e".into(),
            results: vec![
                result(DeliveryOutcome::Delivered { status: 200 }),
                result(DeliveryOutcome::Failed(DeliveryFailure::Timeout)),
            ],
        };
        assert!(!outcome.is_success());
        assert_eq!(outcome.failures().count(), 1);
    }

    #[test]
    fn failure_reason_keeps_status_and_body() {
        let failure = DeliveryFailure::Status {
            status: 500,
            body: "boom".into(),
        };
        assert_eq!(failure.to_string(), "HTTP 500: boom");
        assert_eq!(
            DeliveryFailure::Status {
                status: 404,
                body: String::new()
            }
            .to_string(),
            "HTTP 404"
        );
    }
}
