//! Tenant-scoped webhook dispatcher.
//!
//! Events are queued, matched against each tenant's listeners (exact event
//! type plus the `*` wildcard), signed per listener with HMAC-SHA256 and
//! POSTed concurrently. An event is acknowledged only when every listener
//! accepted it; otherwise the queue redelivers it and, after too many
//! attempts, moves it to a dead-letter queue from which it can be inspected
//! per tenant and selectively redriven.

pub mod config;
pub mod coordinator;
pub mod dead_letter;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod http_server;
pub mod publisher;
pub mod registry;
pub mod signing;
pub mod store;
pub mod transport;
pub mod types;

pub use config::DispatcherConfig;
pub use coordinator::{BatchCoordinator, BatchResponse, QueueWorker};
pub use dead_letter::{DeadLetterService, InspectResult, RedriveReport};
pub use delivery::{DeliveryExecutor, DeliveryOutcome, EventOutcome};
pub use dispatcher::Dispatcher;
pub use error::{DispatchError, ErrorBody, ErrorKind, Result};
pub use publisher::{EventPublisher, PublishEvent};
pub use registry::ListenerRegistry;
pub use store::{CreateListener, ListenerPatch, ListenerStore};
pub use transport::{MemoryQueue, QueueSettings, ReceivedMessage, Transport};
pub use types::{Event, EventMetadata, Listener, WILDCARD_EVENT_TYPE};
