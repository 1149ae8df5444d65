//! Local HTTP server for capture tests
//!
//! Serves a fixed set of resources from memory and counts how often each
//! path was requested. Unknown paths return 404.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::task::JoinHandle;

#[derive(Default)]
struct Site {
    resources: Mutex<HashMap<String, (String, Vec<u8>)>>,
    hits: Mutex<HashMap<String, usize>>,
}

/// A running asset server. Aborted on drop.
pub struct AssetServer {
    addr: SocketAddr,
    site: Arc<Site>,
    task: JoinHandle<()>,
}

impl AssetServer {
    pub async fn start() -> Self {
        let site = Arc::new(Site::default());
        let app = Router::new().fallback(serve).with_state(site.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test server");
        let addr = listener.local_addr().expect("No local address");
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Test server failed");
        });
        Self { addr, site, task }
    }

    /// Serve `body` at `path` with the given content type, replacing any
    /// previous resource.
    pub fn put(&self, path: &str, content_type: &str, body: impl Into<Vec<u8>>) -> &Self {
        self.site
            .resources
            .lock()
            .unwrap()
            .insert(path.to_string(), (content_type.to_string(), body.into()));
        self
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.site.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

impl Drop for AssetServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(State(site): State<Arc<Site>>, uri: Uri) -> Response {
    let path = uri.path().to_string();
    *site.hits.lock().unwrap().entry(path.clone()).or_default() += 1;

    let resource = site.resources.lock().unwrap().get(&path).cloned();
    match resource {
        Some((content_type, body)) => {
            (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
