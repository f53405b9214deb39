//! Shared fixtures for the dispatcher integration tests.
//!
//! Listener endpoints are wiremock servers driven by the responders below;
//! dispatchers are built in memory with short timeouts so redelivery and
//! dead-lettering happen within a test's lifetime.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use webhook_dispatcher::{
    CreateListener, Dispatcher, DispatcherConfig, Listener, ListenerStore, PublishEvent,
};
use wiremock::{Request, Respond, ResponseTemplate};

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------

pub const TENANT_A: &str = "tenant-a";
pub const TENANT_B: &str = "tenant-b";

pub const SECRET_1: &str = "whsec_test_secret_key_12345";
pub const SECRET_2: &str = "whsec_another_secret_67890";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Short timings: 50ms visibility, two receives before dead-lettering.
pub fn test_config() -> DispatcherConfig {
    DispatcherConfig {
        delivery_timeout_ms: 500,
        batch_size: 10,
        poll_interval_ms: 10,
        visibility_timeout_ms: 50,
        max_receive_count: 2,
        redrive_max_poll_attempts: 5,
        dead_letter_page_size: 10,
        bind_addr: "127.0.0.1:0".into(),
    }
}

pub fn dispatcher() -> Dispatcher {
    dispatcher_with(test_config())
}

pub fn dispatcher_with(config: DispatcherConfig) -> Dispatcher {
    init_tracing();
    Dispatcher::new(config, Arc::new(ListenerStore::in_memory())).unwrap()
}

pub async fn add_listener(
    dispatcher: &Dispatcher,
    tenant_id: &str,
    url: &str,
    event_type: &str,
    secret: &str,
) -> Listener {
    dispatcher
        .store
        .create(CreateListener {
            tenant_id: tenant_id.into(),
            url: url.into(),
            event_type: event_type.into(),
            secret: Some(secret.into()),
        })
        .await
        .unwrap()
}

pub fn order_created(tenant_id: &str) -> PublishEvent {
    PublishEvent {
        tenant_id: tenant_id.into(),
        event_type: "order.created".into(),
        payload: serde_json::json!({ "orderId": "o-1", "total": 42 }),
        metadata: Default::default(),
    }
}

/// Wait past the visibility timeout of [`test_config`].
pub async fn wait_for_visibility() {
    tokio::time::sleep(std::time::Duration::from_millis(80)).await;
}

// ---------------------------------------------------------------------------
// CapturedRequest - for inspecting webhook requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl CapturedRequest {
    pub fn body_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Header value by name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name_lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == name_lower)
            .map(|(_, v)| v.as_str())
    }
}

// ---------------------------------------------------------------------------
// CaptureResponder - captures requests and returns a fixed status
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct CaptureResponder {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    response_code: u16,
}

impl CaptureResponder {
    pub fn new() -> Self {
        Self::with_status(200)
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            response_code: status,
        }
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Default for CaptureResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl Respond for CaptureResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.requests.lock().unwrap().push(capture(request));
        ResponseTemplate::new(self.response_code)
    }
}

fn capture(request: &Request) -> CapturedRequest {
    CapturedRequest {
        body: request.body.clone(),
        headers: request
            .headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// CountingResponder - counts requests
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct CountingResponder {
    count: Arc<AtomicU32>,
    response_code: u16,
}

impl CountingResponder {
    pub fn new() -> Self {
        Self::with_status(200)
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            count: Arc::new(AtomicU32::new(0)),
            response_code: status,
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

impl Default for CountingResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl Respond for CountingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.count.fetch_add(1, Ordering::SeqCst);
        ResponseTemplate::new(self.response_code)
    }
}

// ---------------------------------------------------------------------------
// FailingResponder - fails N times then succeeds
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct FailingResponder {
    attempt_count: Arc<AtomicU32>,
    failures_before_success: u32,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

impl FailingResponder {
    /// Respond 500 `n` times, then 200.
    pub fn fail_times(n: u32) -> Self {
        Self {
            attempt_count: Arc::new(AtomicU32::new(0)),
            failures_before_success: n,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempt_count.load(Ordering::SeqCst)
    }

    /// Every request seen, failed attempts included.
    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Respond for FailingResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.requests.lock().unwrap().push(capture(request));
        let attempt = self.attempt_count.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures_before_success {
            ResponseTemplate::new(500).set_body_string("temporarily unavailable")
        } else {
            ResponseTemplate::new(200)
        }
    }
}
