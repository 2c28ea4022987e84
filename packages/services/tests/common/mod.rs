#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use db::{Database, DbConfig, DbError};
use resilience::{PolicyConfig, RetryConfig};
use serde_json::Value;

/// Fresh in-memory database with the schema applied.
pub async fn setup_db() -> Result<Database, DbError> {
    db::init(DbConfig::memory()).await
}

/// Default policy shape with millisecond backoff.
pub fn fast_policy() -> PolicyConfig {
    PolicyConfig::default().with_retry(
        RetryConfig::default()
            .with_initial_delay(Duration::from_millis(5))
            .with_max_delay(Duration::from_millis(20)),
    )
}

/// A request the fake server received.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub path: String,
    pub query: HashMap<String, String>,
    pub authorization: Option<String>,
    pub body: Option<Value>,
}

struct Inner {
    scripted: parking_lot::Mutex<VecDeque<(StatusCode, Value)>>,
    fallback: (StatusCode, Value),
    hits: AtomicU32,
    requests: parking_lot::Mutex<Vec<Recorded>>,
}

/// Responses served in order, then `fallback` forever.
#[derive(Clone)]
pub struct Script {
    inner: Arc<Inner>,
}

impl Script {
    pub fn new(fallback_status: u16, fallback: Value) -> Self {
        Self {
            inner: Arc::new(Inner {
                scripted: parking_lot::Mutex::new(VecDeque::new()),
                fallback: (status(fallback_status), fallback),
                hits: AtomicU32::new(0),
                requests: parking_lot::Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn then(self, code: u16, body: Value) -> Self {
        self.inner.scripted.lock().push_back((status(code), body));
        self
    }

    pub fn hits(&self) -> u32 {
        self.inner.hits.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<Recorded> {
        self.inner.requests.lock().last().cloned()
    }
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap()
}

async fn respond(
    State(script): State<Script>,
    uri: axum::http::Uri,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    script.inner.hits.fetch_add(1, Ordering::SeqCst);
    script.inner.requests.lock().push(Recorded {
        path: uri.path().to_string(),
        query,
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: serde_json::from_slice(&body).ok(),
    });

    let next = script.inner.scripted.lock().pop_front();
    let (code, value) = next.unwrap_or_else(|| script.inner.fallback.clone());
    (code, Json(value))
}

/// Serve `script` on an ephemeral port and return its base URL.
pub async fn start_server(script: Script) -> String {
    let app = Router::new().fallback(respond).with_state(script);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}
