use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{DispatchError, Result};
use crate::transport::Transport;
use crate::types::{Event, EventMetadata};

/// Ingestion request; the event id and timestamp are assigned on publish.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishEvent {
    pub tenant_id: String,
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub metadata: EventMetadata,
}

/// Places new events on the main transport.
#[derive(Clone)]
pub struct EventPublisher {
    transport: Arc<dyn Transport>,
}

impl EventPublisher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn publish(&self, request: PublishEvent) -> Result<Event> {
        let payload = match request.payload {
            Value::Object(map) => map,
            Value::Null => Default::default(),
            _ => {
                return Err(DispatchError::Validation(
                    "payload must be a JSON object".into(),
                ))
            }
        };

        // Retry markers are only ever set by redrive.
        let metadata = EventMetadata {
            retried: None,
            original_failure_timestamp: None,
            ..request.metadata
        };
        let event = Event::new(request.tenant_id, request.event_type, payload, metadata)?;
        let message_id = self.transport.enqueue(event.to_message_body()?).await?;

        tracing::info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            tenant_id = %event.tenant_id,
            message_id = %message_id,
            "Event published"
        );
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryQueue, QueueSettings};
    use serde_json::json;

    fn request(payload: Value) -> PublishEvent {
        PublishEvent {
            tenant_id: "t1".into(),
            event_type: "order.created".into(),
            payload,
            metadata: EventMetadata::default(),
        }
    }

    #[tokio::test]
    async fn publish_enqueues_event_body() {
        let queue = Arc::new(MemoryQueue::new("main", QueueSettings::default()));
        let publisher = EventPublisher::new(queue.clone());

        let event = publisher
            .publish(request(json!({ "orderId": "o-1" })))
            .await
            .unwrap();

        let bodies = queue.bodies().await;
        assert_eq!(bodies.len(), 1);
        let queued = Event::from_message_body(&bodies[0]).unwrap();
        assert_eq!(queued, event);
    }

    #[tokio::test]
    async fn producer_cannot_set_retry_markers() {
        let queue = Arc::new(MemoryQueue::new("main", QueueSettings::default()));
        let publisher = EventPublisher::new(queue.clone());

        let mut req = request(json!({ "orderId": "o-1" }));
        req.metadata = EventMetadata {
            source: Some("orders".into()),
            retried: Some(true),
            original_failure_timestamp: Some(chrono::Utc::now()),
            ..Default::default()
        };
        let event = publisher.publish(req).await.unwrap();
        assert_eq!(event.metadata.retried, None);
        assert_eq!(event.metadata.source.as_deref(), Some("orders"));

        let body: Value = serde_json::from_str(&queue.bodies().await[0]).unwrap();
        assert!(body["metadata"].get("retried").is_none());
        assert!(body["metadata"].get("originalFailureTimestamp").is_none());
        assert_eq!(body["metadata"]["source"], "orders");
    }

    #[tokio::test]
    async fn non_object_payload_is_rejected() {
        let queue = Arc::new(MemoryQueue::new("main", QueueSettings::default()));
        let publisher = EventPublisher::new(queue.clone());
        let err = publisher.publish(request(json!([1, 2]))).await.unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
        assert!(queue.bodies().await.is_empty());
    }

    #[tokio::test]
    async fn unavailable_transport_is_reported() {
        let queue = Arc::new(MemoryQueue::new("main", QueueSettings::default()));
        queue.set_available(false);
        let publisher = EventPublisher::new(queue);
        let err = publisher.publish(request(json!({}))).await.unwrap_err();
        assert!(matches!(err, DispatchError::TransportUnavailable(_)));
    }
}
