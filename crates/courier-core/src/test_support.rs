//! Test HTTP helpers
//!
//! - servers bind 127.0.0.1:0 and shut down gracefully when the sender drops
//! - clients use short timeouts and skip proxies so localhost is never hijacked

use std::net::SocketAddr;
use std::time::Duration;

use reqwest::{Client, redirect::Policy};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn spawn_axum(router: axum::Router) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let serve = axum::serve(listener, router.into_make_service());
        let _ = serve
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await;
    });
    TestServer {
        addr,
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    }
}

pub fn build_test_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(2))
        .no_proxy()
        .redirect(Policy::none())
        .build()
        .unwrap()
}
