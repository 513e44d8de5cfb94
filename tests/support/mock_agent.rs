use std::{
    convert::Infallible,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{body, Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Event log helpers matching the agent session wire shape.
pub fn action(tool: &str, risk: &str, text: &str) -> Value {
    json!({ "kind": "action", "tool_name": tool, "security_risk": risk, "text": text })
}

pub fn observation(text: &str) -> Value {
    json!({ "kind": "observation", "text": text })
}

pub fn lockfile_fix_events() -> Vec<Value> {
    vec![
        action("terminal", "SecurityRisk.LOW", "ls -la /tmp"),
        observation("service.lock"),
        action("terminal", "SecurityRisk.LOW", "rm /tmp/service.lock"),
        action("terminal", "SecurityRisk.LOW", "curl -s localhost:5000"),
        observation("{\"status\":\"ok\"}"),
    ]
}

/// Shared, inspectable state of the mock agent server.
#[derive(Clone)]
pub struct AgentScript {
    events: Arc<Vec<Value>>,
    open_failures: Arc<AtomicUsize>,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    tasks: Arc<Mutex<Vec<String>>>,
}

impl AgentScript {
    pub fn new(events: Vec<Value>) -> Self {
        Self {
            events: Arc::new(events),
            open_failures: Arc::new(AtomicUsize::new(0)),
            opens: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The next `count` `session.open` calls fail with a transient error.
    pub fn fail_opens(self, count: usize) -> Self {
        self.open_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn tasks(&self) -> Vec<String> {
        self.tasks.lock().expect("agent tasks poisoned").clone()
    }

    fn take_open_failure(&self) -> bool {
        self.open_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }
}

/// JSON-RPC agent session server. Every run finishes on the first status poll.
pub struct MockAgentServer {
    url: String,
    script: AgentScript,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockAgentServer {
    pub async fn start(script: AgentScript) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock agent listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock agent address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock agent listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock agent listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let served = script.clone();
        let make_service = make_service_fn(move |_| {
            let script = served.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| serve_request(script.clone(), req)))
            }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock agent server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock agent server stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{addr}"),
            script,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn script(&self) -> &AgentScript {
        &self.script
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn serve_request(script: AgentScript, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::POST {
        let mut response = Response::new(Body::from("Unsupported method"));
        *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        return Ok(response);
    }

    let bytes = match body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(err) => {
            let mut response = Response::new(Body::from(format!("failed to read body: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let payload: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(err) => {
            let mut response = Response::new(Body::from(format!("invalid JSON payload: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let response_value = handle_call(&script, payload);
    let mut response = Response::new(Body::from(response_value.to_string()));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

fn handle_call(script: &AgentScript, call: Value) -> Value {
    let id = call.get("id").cloned().unwrap_or(Value::Null);
    let method = call
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let params = call
        .get("params")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    match method.as_str() {
        "session.open" => {
            if script.take_open_failure() {
                return error(id, -32000, "Remote conversation not found");
            }
            let session = script.opens.fetch_add(1, Ordering::SeqCst) + 1;
            success(id, json!(format!("sess-{session}")))
        }
        "session.send_message" => {
            let text = params
                .get(1)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            script.tasks.lock().expect("agent tasks poisoned").push(text);
            success(id, json!(true))
        }
        "session.run" => success(id, json!(true)),
        "session.status" => success(id, json!({ "state": "finished" })),
        "session.events" => success(id, Value::Array(script.events.as_ref().clone())),
        "session.close" => {
            script.closes.fetch_add(1, Ordering::SeqCst);
            success(id, json!(true))
        }
        _ => error(id, -32601, format!("unknown method {method}")),
    }
}

fn success(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id,
    })
}

fn error(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": {
            "code": code,
            "message": message.into(),
        },
        "id": id,
    })
}
