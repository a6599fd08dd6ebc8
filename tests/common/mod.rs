//! Shared harness: a gateway bound to 127.0.0.1:0 over an in-memory store.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use storage_gateway::audit::MemoryAuditSink;
use storage_gateway::crypto::Cipher;
use storage_gateway::providers::ProviderRegistry;
use storage_gateway::routes::routes::routes;
use storage_gateway::services::metadata_store::MetadataStore;
use storage_gateway::state::AppState;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const TEST_KEY: &[u8; 32] = b"0123456789abcdef0123456789abcdef";
pub const ADMIN_TOKEN: &str = "admin-secret";

/// A running gateway.
pub struct TestServer {
    pub addr: SocketAddr,
    pub store: MetadataStore,
    pub audit: Arc<MemoryAuditSink>,
    pub http: Client,
    pub temp_dir: TempDir,
    _handle: JoinHandle<()>,
    _shutdown_tx: oneshot::Sender<()>,
}

/// Credentials of an app created through the admin API.
pub struct TestApp {
    pub id: String,
    pub key: String,
    pub secret: String,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(Cipher::new(TEST_KEY), Some(ADMIN_TOKEN)).await
    }

    pub async fn start_with(cipher: Cipher, admin_token: Option<&str>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = MetadataStore::in_memory().await.expect("Failed to open store");
        let audit = Arc::new(MemoryAuditSink::new());
        let registry = Arc::new(ProviderRegistry::with_defaults(cipher.clone()));

        let state = AppState::build(
            store.clone(),
            registry,
            cipher,
            audit.clone(),
            2,
            admin_token.map(str::to_string),
        );
        let app = routes(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get local addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("Server error");
        });

        Self {
            addr,
            store,
            audit,
            http: Client::new(),
            temp_dir,
            _handle: handle,
            _shutdown_tx: shutdown_tx,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// A fresh directory under the server's temp dir.
    pub fn dir(&self, name: &str) -> std::path::PathBuf {
        let dir = self.temp_dir.path().join(name);
        std::fs::create_dir_all(&dir).expect("Failed to create dir");
        dir
    }

    pub fn admin(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(&format!("/api/v1/admin{path}")))
            .header("X-Admin-Token", ADMIN_TOKEN)
    }

    pub async fn create_app(&self, name: &str) -> TestApp {
        let resp = self
            .admin(reqwest::Method::POST, "/apps")
            .json(&json!({ "app_name": name }))
            .send()
            .await
            .expect("create app");
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = resp.json().await.expect("app json");
        TestApp {
            id: body["id"].as_str().expect("id").to_string(),
            key: body["api_key"].as_str().expect("api_key").to_string(),
            secret: body["api_secret"].as_str().expect("api_secret").to_string(),
        }
    }

    pub async fn register_bucket(&self, app: &TestApp, name: &str, provider: &str, config: Value, cipher: bool) -> reqwest::Response {
        self.admin(reqwest::Method::POST, "/buckets")
            .json(&json!({
                "app_id": app.id,
                "name": name,
                "provider_type": provider,
                "config": config,
                "cipher": cipher,
            }))
            .send()
            .await
            .expect("register bucket")
    }

    /// Register a LOCAL bucket rooted at `base` and return its id.
    pub async fn local_bucket(&self, app: &TestApp, name: &str, base: &Path, cipher: bool) -> String {
        let resp = self
            .register_bucket(app, name, "LOCAL", json!({ "basePath": base }), cipher)
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = resp.json().await.expect("bucket json");
        body["id"].as_str().expect("bucket id").to_string()
    }

    /// Create a rule and return the response body.
    pub async fn create_rule(&self, app: &TestApp, source: &str, target: &str, active: bool) -> Value {
        let resp = self
            .admin(reqwest::Method::POST, "/replication")
            .json(&json!({
                "app_id": app.id,
                "source_bucket_id": source,
                "target_bucket_id": target,
                "active": active,
            }))
            .send()
            .await
            .expect("create rule");
        assert_eq!(resp.status(), StatusCode::CREATED);
        resp.json().await.expect("rule json")
    }

    pub async fn upload(&self, app: &TestApp, bucket: &str, filename: &str, body: Vec<u8>) -> reqwest::Response {
        self.http
            .post(self.url("/api/v1/storage/upload"))
            .header("X-API-Key", &app.key)
            .header("X-API-Secret", &app.secret)
            .header("X-Bucket-Name", bucket)
            .header("X-Original-Filename", filename)
            .body(body)
            .send()
            .await
            .expect("upload")
    }

    pub async fn download(&self, app: &TestApp, id: &str) -> reqwest::Response {
        self.http
            .get(self.url(&format!("/api/v1/storage/download/{id}")))
            .header("X-API-Key", &app.key)
            .header("X-API-Secret", &app.secret)
            .send()
            .await
            .expect("download")
    }

    /// Poll a reconciliation task until it leaves `pending`/`running`.
    pub async fn wait_for_task(&self, task_id: &str) -> Value {
        for _ in 0..100 {
            let resp = self
                .admin(reqwest::Method::GET, &format!("/reconciliation/{task_id}"))
                .send()
                .await
                .expect("get task");
            assert_eq!(resp.status(), StatusCode::OK);
            let task: Value = resp.json().await.expect("task json");
            match task["status"].as_str() {
                Some("pending") | Some("running") => {
                    tokio::time::sleep(Duration::from_millis(20)).await
                }
                _ => return task,
            }
        }
        panic!("reconciliation task {task_id} did not finish");
    }
}

/// `n` bytes of deterministic non-trivial content.
pub fn payload(n: usize) -> Vec<u8> {
    (0..n).map(|i| (i * 31 % 251) as u8).collect()
}

/// Files directly under `dir`, sorted.
pub fn files_in(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .expect("read dir")
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    files
}
