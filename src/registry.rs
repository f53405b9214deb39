//! Listener lookup used by the delivery path.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Listener, WILDCARD_EVENT_TYPE};

/// Read side of the listener store.
///
/// Implementations only need the indexed `(tenant, event type)` lookup; the
/// wildcard union is built on top of it.
#[async_trait]
pub trait ListenerRegistry: Send + Sync {
    /// Active listeners registered for exactly this tenant and event type.
    async fn find_active(&self, tenant_id: &str, event_type: &str) -> Result<Vec<Listener>>;

    /// Every active listener that must receive an event of `event_type`:
    /// exact subscribers plus the tenant's wildcard subscribers.
    async fn match_listeners(&self, tenant_id: &str, event_type: &str) -> Result<Vec<Listener>> {
        let mut matched = self.find_active(tenant_id, event_type).await?;
        if event_type != WILDCARD_EVENT_TYPE {
            matched.extend(self.find_active(tenant_id, WILDCARD_EVENT_TYPE).await?);
        }

        let mut seen = HashSet::new();
        matched.retain(|l| l.is_active && l.tenant_id == tenant_id && seen.insert(l.id.clone()));
        Ok(matched)
    }
}
