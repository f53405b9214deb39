use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{DispatchError, Result};

/// Event type sentinel that subscribes a listener to every event of its tenant.
pub const WILDCARD_EVENT_TYPE: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    pub id: String,
    pub tenant_id: String,
    pub url: String,
    pub event_type: String,
    pub secret: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Listener {
    pub fn is_wildcard(&self) -> bool {
        self.event_type == WILDCARD_EVENT_TYPE
    }

    /// Whether this listener occupies the `(tenant, url, event type)` slot.
    pub fn same_triple(&self, tenant_id: &str, url: &str, event_type: &str) -> bool {
        self.tenant_id == tenant_id && self.url == url && self.event_type == event_type
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Set on events moved back from the dead-letter queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retried: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_failure_timestamp: Option<DateTime<Utc>>,
}

/// A tenant event as it travels through the queues.
///
/// Field order matches the canonical payload; see [`crate::signing`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_id: String,
    pub event_type: String,
    pub tenant_id: String,
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub metadata: EventMetadata,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Build a freshly identified event at ingestion time.
    pub fn new(
        tenant_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: Map<String, Value>,
        metadata: EventMetadata,
    ) -> Result<Self> {
        let tenant_id = tenant_id.into();
        let event_type = event_type.into();

        if tenant_id.trim().is_empty() {
            return Err(DispatchError::Validation("tenantId is required".into()));
        }
        if event_type.trim().is_empty() {
            return Err(DispatchError::Validation("eventType is required".into()));
        }
        if event_type == WILDCARD_EVENT_TYPE {
            return Err(DispatchError::Validation(
                "eventType '*' is reserved for wildcard listeners".into(),
            ));
        }

        Ok(Self {
            event_id: Uuid::new_v4().to_string(),
            event_type,
            tenant_id,
            payload,
            metadata,
            timestamp: Utc::now(),
        })
    }

    /// Copy of this event for re-submission after it was dead-lettered.
    ///
    /// Identity and payload are preserved; the timestamp is refreshed and the
    /// metadata records the retry and when the original delivery gave up.
    pub fn for_redrive(&self, failed_at: DateTime<Utc>) -> Self {
        let mut metadata = self.metadata.clone();
        metadata.retried = Some(true);
        metadata.original_failure_timestamp = Some(failed_at);

        Self {
            event_id: self.event_id.clone(),
            event_type: self.event_type.clone(),
            tenant_id: self.tenant_id.clone(),
            payload: self.payload.clone(),
            metadata,
            timestamp: Utc::now(),
        }
    }

    pub fn to_message_body(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_message_body(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }
}
