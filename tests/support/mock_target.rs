use std::{
    collections::VecDeque,
    convert::Infallible,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// One canned health response.
#[derive(Clone, Debug)]
pub struct HealthReply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl HealthReply {
    pub fn healthy(scenario: &str) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            body: json!({ "status": "ok", "scenario": scenario }).to_string(),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            status: 503,
            content_type: "text/plain",
            body: "service unavailable".into(),
        }
    }
}

#[derive(Clone)]
struct TargetScript {
    scripted: Arc<Mutex<VecDeque<HealthReply>>>,
    fallback: HealthReply,
    hits: Arc<AtomicUsize>,
}

impl TargetScript {
    fn next(&self) -> HealthReply {
        self.hits.fetch_add(1, Ordering::SeqCst);
        self.scripted
            .lock()
            .expect("target script poisoned")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Health endpoint of the service under repair.
///
/// Serves scripted replies first, then `fallback` forever.
pub struct MockTarget {
    url: String,
    hits: Arc<AtomicUsize>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockTarget {
    pub async fn start(scripted: Vec<HealthReply>, fallback: HealthReply) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock target listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock target address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock target listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock target listener non-blocking")?;

        let hits = Arc::new(AtomicUsize::new(0));
        let script = TargetScript {
            scripted: Arc::new(Mutex::new(scripted.into())),
            fallback,
            hits: hits.clone(),
        };
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let make_service = make_service_fn(move |_| {
            let script = script.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| serve_health(script.clone(), req)))
            }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock target server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock target stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{addr}/health"),
            hits,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub async fn healthy(scenario: &str) -> Result<Self> {
        Self::start(Vec::new(), HealthReply::healthy(scenario)).await
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
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

async fn serve_health(
    script: TargetScript,
    _req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    let reply = script.next();
    let mut response = Response::new(Body::from(reply.body));
    *response.status_mut() =
        StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static(reply.content_type),
    );
    Ok(response)
}
