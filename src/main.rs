use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, BufRead, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing_subscriber::EnvFilter;

use webhook_dispatcher::dead_letter::{InspectRequest, RedriveRequest};
use webhook_dispatcher::http_server;
use webhook_dispatcher::transport::Transport;
use webhook_dispatcher::{
    CreateListener, DispatchError, Dispatcher, DispatcherConfig, ErrorKind, ListenerPatch,
    ListenerStore, PublishEvent,
};

// ─── JSON-RPC wire types ────────────────────────────────────────────────────

#[derive(Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: Value,
    id: Value,
}

#[derive(Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
    id: Value,
}

#[derive(Serialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

fn ok_response(id: Value, data: Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0",
        result: Some(serde_json::json!({
            "success": true,
            "data": data,
            "message": null
        })),
        error: None,
        id,
    }
}

fn raw_response(id: Value, result: Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0",
        result: Some(result),
        error: None,
        id,
    }
}

fn err_response(id: Value, code: i64, message: String) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0",
        result: None,
        error: Some(JsonRpcError {
            code,
            message,
            data: None,
        }),
        id,
    }
}

fn dispatch_err_response(id: Value, err: &DispatchError) -> JsonRpcResponse {
    let code = match err.kind() {
        ErrorKind::Input => -32602,
        ErrorKind::NotFound => -32004,
        ErrorKind::TransportUnavailable => -32003,
        ErrorKind::Internal => -32603,
    };
    JsonRpcResponse {
        jsonrpc: "2.0",
        result: None,
        error: Some(JsonRpcError {
            code,
            message: err.to_string(),
            data: serde_json::to_value(err.to_body()).ok(),
        }),
        id,
    }
}

// ─── Shared app state ────────────────────────────────────────────────────────

#[derive(Default)]
struct AppState {
    dispatcher: Option<Dispatcher>,
    http_addr: Option<SocketAddr>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl AppState {
    fn dispatcher(&self) -> Result<&Dispatcher, DispatchError> {
        self.dispatcher
            .as_ref()
            .ok_or_else(|| DispatchError::TransportUnavailable("dispatcher not initialized".into()))
    }
}

type SharedState = Arc<RwLock<AppState>>;

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // stdout carries the protocol, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let state: SharedState = Arc::new(RwLock::new(AppState::default()));

    let state_clone = state.clone();
    let handle = tokio::runtime::Handle::current();

    // Stdin loop on a blocking thread to avoid blocking the async runtime.
    let stdin_loop = tokio::task::spawn_blocking(move || {
        let stdin = io::stdin();
        let stdout = io::stdout();
        let mut out = stdout.lock();
        let mut line = String::new();

        loop {
            line.clear();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                _ => {}
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
                Ok(r) => r,
                Err(e) => {
                    let resp =
                        err_response(Value::Number(0.into()), -32700, format!("Parse error: {e}"));
                    emit_line(&mut out, &resp);
                    continue;
                }
            };

            let is_shutdown = request.method == "shutdown";

            let response = handle.block_on(handle_request(&request, &state_clone));
            emit_line(&mut out, &response);

            if is_shutdown {
                break;
            }
        }
    });

    if let Err(e) = stdin_loop.await {
        tracing::error!(error = %e, "stdin loop terminated abnormally");
    }
    stop_background_tasks(&state).await;
}

fn emit_line(out: &mut impl Write, resp: &JsonRpcResponse) {
    let line = serde_json::to_string(resp).expect("serialize response");
    let _ = writeln!(out, "{line}");
    let _ = out.flush();
}

// ─── Request dispatch ─────────────────────────────────────────────────────────

async fn handle_request(req: &JsonRpcRequest, state: &SharedState) -> JsonRpcResponse {
    match req.method.as_str() {
        "initialize" => handle_initialize(req, state).await,
        "shutdown" => handle_shutdown(req, state).await,
        "execute" => handle_execute(req, state).await,
        m if m.starts_with("resources.") => handle_resources(req, state).await,
        _ => err_response(req.id.clone(), -32601, format!("Unknown method: {}", req.method)),
    }
}

async fn handle_initialize(req: &JsonRpcRequest, state: &SharedState) -> JsonRpcResponse {
    match initialize(&req.params, state).await {
        Ok(addr) => raw_response(
            req.id.clone(),
            serde_json::json!({ "ready": true, "http_addr": addr.to_string() }),
        ),
        Err(e) => dispatch_err_response(req.id.clone(), &e),
    }
}

async fn initialize(params: &Value, state: &SharedState) -> Result<SocketAddr, DispatchError> {
    if state.read().await.dispatcher.is_some() {
        return Err(DispatchError::Validation("already initialized".into()));
    }

    let data_dir = params
        .get("data_dir")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let config = DispatcherConfig::from_value(params.get("config"))?;

    let store = Arc::new(ListenerStore::new(data_dir));
    let loaded = store.load().await?;
    tracing::info!(listeners = loaded, "Listener store loaded");

    let dispatcher = Dispatcher::new(config, store)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let addr = http_server::start(
        dispatcher.api_state(),
        &dispatcher.config.bind_addr,
        shutdown_rx.clone(),
    )
    .await?;
    tokio::spawn(dispatcher.worker().run(shutdown_rx));

    let mut st = state.write().await;
    st.dispatcher = Some(dispatcher);
    st.http_addr = Some(addr);
    st.shutdown_tx = Some(shutdown_tx);
    Ok(addr)
}

async fn handle_shutdown(req: &JsonRpcRequest, state: &SharedState) -> JsonRpcResponse {
    stop_background_tasks(state).await;
    raw_response(req.id.clone(), serde_json::json!({}))
}

async fn stop_background_tasks(state: &SharedState) {
    let mut st = state.write().await;
    if let Some(tx) = st.shutdown_tx.take() {
        let _ = tx.send(true);
    }
    if let Some(dispatcher) = &st.dispatcher {
        if let Err(e) = dispatcher.store.save().await {
            tracing::error!(error = %e, "Failed to persist listeners on shutdown");
        }
    }
}

// ─── Execute handler ──────────────────────────────────────────────────────────

async fn handle_execute(req: &JsonRpcRequest, state: &SharedState) -> JsonRpcResponse {
    let operation = req
        .params
        .get("operation")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let input = req
        .params
        .get("input")
        .cloned()
        .unwrap_or(Value::Object(Default::default()));

    let result = match operation {
        "get_server_info" => op_get_server_info(state).await,
        "publish_event" => op_publish_event(input, state).await,
        "inspect_dead_letters" => op_inspect_dead_letters(input, state).await,
        "redrive_dead_letters" => op_redrive_dead_letters(input, state).await,
        "list_listeners" => op_list_listeners(&input, state).await,
        "create_listener" => resource_create(input, state).await,
        "update_listener" => op_update_listener(input, state).await,
        "delete_listener" => op_delete_listener(&input, state).await,
        _ => {
            return err_response(
                req.id.clone(),
                -32601,
                format!("Unknown operation: {operation}"),
            )
        }
    };

    match result {
        Ok(data) => ok_response(req.id.clone(), data),
        Err(e) => dispatch_err_response(req.id.clone(), &e),
    }
}

// ─── Resources handler ────────────────────────────────────────────────────────

async fn handle_resources(req: &JsonRpcRequest, state: &SharedState) -> JsonRpcResponse {
    let resource_method = req.method.strip_prefix("resources.").unwrap_or("");
    let resource_type = req
        .params
        .get("resource_type")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    if resource_type != "listeners" {
        return err_response(
            req.id.clone(),
            -32602,
            format!("Unknown resource type: {resource_type}"),
        );
    }

    let id = req.params.get("id").and_then(|v| v.as_str()).unwrap_or("");
    let data = req
        .params
        .get("data")
        .cloned()
        .unwrap_or(Value::Object(Default::default()));

    let result = match resource_method {
        "list" => resource_list(state).await,
        "get" => resource_get(id, state).await,
        "create" => resource_create(data, state).await,
        "update" => resource_update(id, data, state).await,
        "delete" => resource_delete(id, state).await,
        _ => {
            return err_response(
                req.id.clone(),
                -32601,
                format!("Unknown resource method: {resource_method}"),
            )
        }
    };

    match result {
        Ok(data) => raw_response(req.id.clone(), data),
        Err(e) => dispatch_err_response(req.id.clone(), &e),
    }
}

// ─── Operations ───────────────────────────────────────────────────────────────

fn parse_input<T: serde::de::DeserializeOwned>(input: Value) -> Result<T, DispatchError> {
    serde_json::from_value(input).map_err(|e| DispatchError::Validation(e.to_string()))
}

fn required_str<'a>(input: &'a Value, field: &str) -> Result<&'a str, DispatchError> {
    input
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| DispatchError::Validation(format!("missing required field: {field}")))
}

async fn op_get_server_info(state: &SharedState) -> Result<Value, DispatchError> {
    let st = state.read().await;
    let dispatcher = st.dispatcher()?;
    Ok(serde_json::json!({
        "http_addr": st.http_addr.map(|a| a.to_string()),
        "listener_count": dispatcher.store.list().await.len(),
        "queue_depth": dispatcher.main_queue.approximate_len().await?,
        "dead_letter_depth": dispatcher.dead_letter_queue.approximate_len().await?,
    }))
}

async fn op_publish_event(input: Value, state: &SharedState) -> Result<Value, DispatchError> {
    let request: PublishEvent = parse_input(input)?;
    let st = state.read().await;
    let event = st.dispatcher()?.publisher.publish(request).await?;
    Ok(serde_json::json!({ "eventId": event.event_id, "event": event }))
}

async fn op_inspect_dead_letters(input: Value, state: &SharedState) -> Result<Value, DispatchError> {
    let request: InspectRequest = parse_input(input)?;
    let st = state.read().await;
    let result = st.dispatcher()?.dead_letters.inspect(request).await?;
    Ok(serde_json::to_value(result)?)
}

async fn op_redrive_dead_letters(input: Value, state: &SharedState) -> Result<Value, DispatchError> {
    let request: RedriveRequest = parse_input(input)?;
    let st = state.read().await;
    let report = st.dispatcher()?.dead_letters.redrive(request).await?;
    Ok(serde_json::to_value(report)?)
}

async fn op_list_listeners(input: &Value, state: &SharedState) -> Result<Value, DispatchError> {
    let tenant_id = required_str(input, "tenantId")?;
    let st = state.read().await;
    let items = st.dispatcher()?.store.list_for_tenant(tenant_id).await;
    Ok(serde_json::json!({ "listeners": items, "count": items.len() }))
}

async fn op_update_listener(input: Value, state: &SharedState) -> Result<Value, DispatchError> {
    let id = required_str(&input, "listenerId")?.to_string();
    resource_update(&id, input, state).await
}

async fn op_delete_listener(input: &Value, state: &SharedState) -> Result<Value, DispatchError> {
    let id = required_str(input, "listenerId")?;
    resource_delete(id, state).await
}

// ─── Resource CRUD ────────────────────────────────────────────────────────────

async fn resource_list(state: &SharedState) -> Result<Value, DispatchError> {
    let st = state.read().await;
    let items = st.dispatcher()?.store.list().await;
    let total = items.len();
    Ok(serde_json::json!({ "items": items, "total": total }))
}

async fn resource_get(id: &str, state: &SharedState) -> Result<Value, DispatchError> {
    let st = state.read().await;
    let listener = st.dispatcher()?.store.get(id).await?;
    Ok(serde_json::to_value(listener)?)
}

async fn resource_create(data: Value, state: &SharedState) -> Result<Value, DispatchError> {
    let request: CreateListener = parse_input(data)?;
    let st = state.read().await;
    let created = st.dispatcher()?.store.create(request).await?;
    Ok(serde_json::to_value(created)?)
}

async fn resource_update(id: &str, data: Value, state: &SharedState) -> Result<Value, DispatchError> {
    let patch: ListenerPatch = parse_input(data)?;
    let st = state.read().await;
    let updated = st.dispatcher()?.store.update(id, patch).await?;
    Ok(serde_json::to_value(updated)?)
}

async fn resource_delete(id: &str, state: &SharedState) -> Result<Value, DispatchError> {
    let st = state.read().await;
    st.dispatcher()?.store.remove(id).await?;
    Ok(serde_json::json!({ "deleted": true }))
}
