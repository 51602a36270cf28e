#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http_body_util::BodyExt;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tower::ServiceExt;

use chirp::app::composer::ResetPolicy;
use chirp::app::identity::TokenIdentity;
use chirp::domain::path::DocumentPath;
use chirp::domain::post::PostFields;
use chirp::domain::session::Session;
use chirp::infra::memory::MemoryStore;
use chirp::infra::store::{BlobStore, Caller, DocumentStore, StoreError};
use chirp::infra::widgets::WidgetsClient;
use chirp::AppState;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

// "0123456789abcdef0123456789abcdef" (test-only key)
const TEST_SESSION_KEY: &[u8; 32] = b"0123456789abcdef0123456789abcdef";
pub const BLOB_BASE: &str = "memory://blobs";
pub const UPLOAD_MAX_BYTES: usize = 1024 * 1024;

/// Minimal PNG signature; enough for content sniffing.
pub const PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0, 0, 13];

pub fn png_data_url() -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(PNG_BYTES))
}

// ---------------------------------------------------------------------------
// TestApp: a fresh in-memory backend per test
// ---------------------------------------------------------------------------

pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub store: MemoryStore,
    pub identity: Arc<TokenIdentity>,
}

pub struct TestResponse {
    pub status: StatusCode,
    body_bytes: bytes::Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body_bytes).unwrap_or(Value::Null)
    }

    pub fn error_message(&self) -> String {
        self.json()["error"].as_str().unwrap_or("").to_string()
    }
}

// ---------------------------------------------------------------------------
// Server-sent events
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SseEvent {
    pub name: String,
    pub data: String,
}

impl SseEvent {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.data).unwrap_or(Value::Null)
    }
}

/// Reads an event-stream body one event at a time.
pub struct EventStream {
    pub status: StatusCode,
    body: Body,
    buffer: String,
}

impl EventStream {
    /// Next event, or `None` once the stream ends or stays quiet for two seconds.
    pub async fn next_event(&mut self) -> Option<SseEvent> {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let block: String = self.buffer.drain(..end + 2).collect();
                let mut name = "message".to_string();
                let mut data = Vec::new();
                for line in block.lines() {
                    if let Some(value) = line.strip_prefix("event:") {
                        name = value.trim().to_string();
                    } else if let Some(value) = line.strip_prefix("data:") {
                        data.push(value.trim_start().to_string());
                    }
                }
                // keep-alive comment
                if data.is_empty() {
                    continue;
                }
                return Some(SseEvent {
                    name,
                    data: data.join("\n"),
                });
            }

            let frame = tokio::time::timeout(Duration::from_secs(2), self.body.frame())
                .await
                .ok()??
                .ok()?;
            if let Ok(bytes) = frame.into_data() {
                self.buffer.push_str(&String::from_utf8_lossy(&bytes));
            }
        }
    }

    /// Skips events until one called `name` whose JSON payload satisfies `matches`.
    pub async fn wait_for(&mut self, name: &str, matches: impl Fn(&Value) -> bool) -> SseEvent {
        loop {
            let event = self
                .next_event()
                .await
                .unwrap_or_else(|| panic!("stream ended before a matching {} event", name));
            if event.name == name && matches(&event.json()) {
                return event;
            }
        }
    }
}

pub struct TestUser {
    pub session: Session,
    pub token: String,
}

pub fn app() -> TestApp {
    TestApp::with_policy(ResetPolicy::Always)
}

/// Blob store whose uploads wait until the gate is opened.
pub struct GatedBlobs {
    pub inner: MemoryStore,
    pub gate: Arc<Notify>,
}

#[async_trait::async_trait]
impl BlobStore for GatedBlobs {
    async fn upload_blob(
        &self,
        caller: &Caller,
        storage_path: &str,
        data: bytes::Bytes,
        content_type: &str,
    ) -> Result<(), StoreError> {
        self.gate.notified().await;
        self.inner.upload_blob(caller, storage_path, data, content_type).await
    }

    async fn download_url(&self, storage_path: &str) -> Result<String, StoreError> {
        self.inner.download_url(storage_path).await
    }
}

impl TestApp {
    pub fn with_policy(policy: ResetPolicy) -> Self {
        let store = MemoryStore::new(BLOB_BASE).expect("memory store");
        Self::build(store.clone(), Arc::new(store), policy)
    }

    /// App whose image uploads block until the returned gate is notified.
    pub fn gated() -> (Self, Arc<Notify>) {
        let store = MemoryStore::new(BLOB_BASE).expect("memory store");
        let gate = Arc::new(Notify::new());
        let blobs = GatedBlobs {
            inner: store.clone(),
            gate: gate.clone(),
        };
        (Self::build(store, Arc::new(blobs), ResetPolicy::Always), gate)
    }

    fn build(store: MemoryStore, blobs: Arc<dyn BlobStore>, policy: ResetPolicy) -> Self {
        let identity = Arc::new(TokenIdentity::new(*TEST_SESSION_KEY, 1));
        let state = AppState::new(
            Arc::new(store.clone()),
            blobs,
            identity.clone(),
            WidgetsClient::disabled(),
            policy,
            UPLOAD_MAX_BYTES,
        );
        let router = chirp::http::router(state.clone());
        TestApp {
            router,
            state,
            store,
            identity,
        }
    }

    // ------------------------------------------------------------------
    // Low-level request helper
    // ------------------------------------------------------------------
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("host", "localhost");

        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }

        let request = if let Some(body) = body {
            builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap()
        } else {
            builder.body(Body::empty()).unwrap()
        };

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot failed");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("failed to collect body")
            .to_bytes();

        TestResponse { status, body_bytes }
    }

    /// Opens a live endpoint without waiting for the body to finish.
    pub async fn open_events(&self, path: &str, token: Option<&str>) -> EventStream {
        let mut builder = Request::builder()
            .method(Method::GET)
            .uri(path)
            .header("host", "localhost");
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }

        let response = self
            .router
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .expect("oneshot failed");
        EventStream {
            status: response.status(),
            body: response.into_body(),
            buffer: String::new(),
        }
    }

    // ------------------------------------------------------------------
    // Convenience HTTP helpers
    // ------------------------------------------------------------------
    pub async fn get(&self, path: &str, token: Option<&str>) -> TestResponse {
        self.request(Method::GET, path, None, token).await
    }

    pub async fn post_json(&self, path: &str, body: Value, token: Option<&str>) -> TestResponse {
        self.request(Method::POST, path, Some(body), token).await
    }

    pub async fn post(&self, path: &str, token: Option<&str>) -> TestResponse {
        self.request(Method::POST, path, None, token).await
    }

    pub async fn put(&self, path: &str, token: Option<&str>) -> TestResponse {
        self.request(Method::PUT, path, None, token).await
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> TestResponse {
        self.request(Method::DELETE, path, None, token).await
    }

    // ------------------------------------------------------------------
    // Test data helpers
    // ------------------------------------------------------------------

    /// A signed-in user with a token minted by the app's identity provider.
    pub fn create_user(&self, user_id: &str) -> TestUser {
        let session =
            Session::new(user_id, format!("User {}", user_id), format!("user_{}", user_id))
                .with_avatar(format!("https://avatars.example/{}.png", user_id));
        let token = self.identity.issue(&session).expect("issue token");
        TestUser { session, token }
    }

    /// Writes a post document directly under a fixed id.
    pub async fn seed_post(&self, post_id: &str, author: &Session, text: &str) {
        let fields = PostFields::authored(author, text)
            .into_map()
            .expect("post fields");
        self.store
            .set_document(&Caller::from(author), &DocumentPath::post(post_id), fields)
            .await
            .expect("seed post");
    }

    pub async fn document(&self, path: &DocumentPath) -> Option<Map<String, Value>> {
        self.store
            .get_document(path)
            .await
            .expect("read document")
            .map(|doc| doc.fields)
    }
}
