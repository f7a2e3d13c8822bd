use anyhow::Context as _;
use axum::Router;
use axum::body::Bytes;
use axum::http::{HeaderMap, Method, Uri};
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Pick an unused TCP port on localhost.
///
/// Note: this does not reserve the port; it's still possible for another process to bind it
/// before you do.
///
/// # Errors
///
/// Returns an error if binding an ephemeral localhost port fails or if the bound socket's
/// local address cannot be read.
pub fn pick_unused_port() -> anyhow::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").context("bind ephemeral port")?;
    Ok(listener.local_addr()?.port())
}

/// An axum app served on `127.0.0.1:<ephemeral>` until shut down or dropped.
pub struct MockUpstream {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server_handle: Option<JoinHandle<std::io::Result<()>>>,
}

impl MockUpstream {
    /// Serve `app` with graceful shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn start(app: Router) -> anyhow::Result<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind mock upstream")?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
        let server_handle = tokio::spawn(async move { server.await });

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            server_handle: Some(server_handle),
        })
    }

    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `http://127.0.0.1:<port>` (no trailing slash).
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop accepting connections and wait for in-flight requests to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the server task panicked or the server itself failed.
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.server_handle.take() {
            handle
                .await
                .context("server task join")?
                .context("server result")?;
        }
        Ok(())
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// One request as seen by a mock upstream.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RecordedRequest {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Shared, append-only log of the requests a mock upstream received.
#[derive(Debug, Clone, Default)]
pub struct RequestLog(Arc<Mutex<Vec<RecordedRequest>>>);

impl RequestLog {
    pub fn record(&self, method: Method, uri: &Uri, headers: HeaderMap, body: Bytes) {
        let req = RecordedRequest {
            method,
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            headers,
            body,
        };
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(req);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn all(&self) -> Vec<RecordedRequest> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn last(&self) -> Option<RecordedRequest> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::any;

    #[tokio::test]
    async fn records_requests_and_shuts_down() {
        let log = RequestLog::default();
        let app = Router::new().route(
            "/{*path}",
            any({
                let log = log.clone();
                move |method: Method, uri: Uri, headers: HeaderMap, body: Bytes| {
                    let log = log.clone();
                    async move {
                        log.record(method, &uri, headers, body);
                        "ok"
                    }
                }
            }),
        );
        let upstream = MockUpstream::start(app).await.expect("start");

        let resp = reqwest::Client::new()
            .post(format!("{}/v1/items?x=1", upstream.base_url()))
            .header("x-trace", "t")
            .body("hello")
            .send()
            .await
            .expect("send");
        assert!(resp.status().is_success());

        let req = log.last().expect("recorded");
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.path, "/v1/items");
        assert_eq!(req.query.as_deref(), Some("x=1"));
        assert_eq!(req.header("x-trace"), Some("t"));
        assert_eq!(req.body_text(), "hello");
        assert_eq!(log.len(), 1);

        upstream.shutdown().await.expect("shutdown");
    }

    #[test]
    fn picks_a_port() {
        assert_ne!(pick_unused_port().expect("port"), 0);
    }
}
