#![allow(dead_code)]

use std::convert::Infallible;
use std::net::{SocketAddr, TcpListener};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use tokio::sync::oneshot;

/// One request as the mock server saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Every `filename="..."` in the multipart body, in order.
    pub fn filenames(&self) -> Vec<String> {
        let text = self.text();
        let marker = "filename=\"";
        let mut names = Vec::new();
        let mut rest = text.as_str();
        while let Some(start) = rest.find(marker) {
            let after = &rest[start + marker.len()..];
            let end = after.find('"').expect("unterminated filename");
            names.push(after[..end].to_string());
            rest = &after[end..];
        }
        names
    }

    /// Value of a plain text form field.
    pub fn field(&self, name: &str) -> Option<String> {
        let text = self.text();
        let marker = format!("name=\"{name}\"\r\n\r\n");
        let start = text.find(&marker)? + marker.len();
        let end = text[start..].find("\r\n")? + start;
        Some(text[start..end].to_string())
    }
}

type Responder = dyn Fn(&RecordedRequest) -> (u16, String) + Send + Sync;

/// Local HTTP server on its own thread and tokio runtime, so blocking
/// clients under test can talk to it directly.
pub struct MockServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MockServer {
    pub fn start<F>(responder: F) -> Self
    where
        F: Fn(&RecordedRequest) -> (u16, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        listener
            .set_nonblocking(true)
            .expect("mock listener should go non-blocking");
        let addr = listener.local_addr().expect("mock server address");

        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);
        let responder: Arc<Responder> = Arc::new(responder);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("mock server runtime");
            runtime.block_on(async move {
                let make_svc = make_service_fn(move |_conn| {
                    let recorded = Arc::clone(&recorded);
                    let responder = Arc::clone(&responder);
                    async move {
                        Ok::<_, Infallible>(service_fn(move |req| {
                            handle(req, Arc::clone(&recorded), Arc::clone(&responder))
                        }))
                    }
                });
                let server = Server::from_tcp(listener)
                    .expect("mock server from listener")
                    .serve(make_svc)
                    .with_graceful_shutdown(async {
                        let _ = shutdown_rx.await;
                    });
                let _ = server.await;
            });
        });

        Self {
            addr,
            requests,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("recorded requests").clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

async fn handle(
    req: Request<Body>,
    recorded: Arc<Mutex<Vec<RecordedRequest>>>,
    responder: Arc<Responder>,
) -> Result<Response<Body>, Infallible> {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let content_type = req
        .headers()
        .get(hyper::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let body = hyper::body::to_bytes(req.into_body())
        .await
        .map(|bytes| bytes.to_vec())
        .unwrap_or_default();

    let request = RecordedRequest {
        method,
        path,
        content_type,
        body,
    };
    let (status, text) = (responder.as_ref())(&request);
    recorded.lock().expect("recorded requests").push(request);

    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let response = Response::builder()
        .status(status)
        .body(Body::from(text))
        .expect("mock response");
    Ok(response)
}

/// Write a destination script into `dir` and return its path.
pub fn write_config(dir: &Path, script: &str) -> PathBuf {
    let path = dir.join("main.lua");
    std::fs::write(&path, script).expect("write destination script");
    path
}

/// Write small input files into `dir`.
pub fn write_inputs(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            std::fs::write(&path, format!("payload of {name}")).expect("write input");
            path
        })
        .collect()
}
