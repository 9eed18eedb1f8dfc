//! HTTP review API over a snapshot store.
//!
//! Routes:
//! - `GET /list_of_diffs` pending diffs, oldest first
//! - `POST /submit_diffs` `{"diffs":[{"name":..,"replace":true}]}` accepts the flagged ones,
//!   or none of them if any flagged name has no pending capture
//! - `POST /clear_diffs` rejects everything pending
//! - `GET /images/<relative path>` serves an artifact from under the store root

use crate::config::ServerOptions;
use crate::store::SnapshotStore;
use crate::{Error, Result};
use serde::Deserialize;
use serde_json::json;
use std::fs;
use std::io::{self, Read};
use std::net::{SocketAddr, TcpListener};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    diffs: Vec<SubmittedDiff>,
}

#[derive(Debug, Deserialize)]
struct SubmittedDiff {
    name: String,
    #[serde(default)]
    replace: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Reply {
    fn json(status: u16, value: serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: value.to_string().into_bytes(),
        }
    }

    fn error(err: &Error) -> Self {
        let status = match err {
            Error::NotFound(_) => 404,
            Error::Configuration(_) | Error::Json(_) => 400,
            _ => 500,
        };
        Self::json(status, json!({ "status": "error", "message": err.to_string() }))
    }

    fn into_response(self) -> Response<io::Cursor<Vec<u8>>> {
        let response = Response::from_data(self.body).with_status_code(self.status);
        match Header::from_bytes(&b"Content-Type"[..], self.content_type.as_bytes()) {
            Ok(header) => response.with_header(header),
            Err(()) => response,
        }
    }
}

/// Request router. Holds no state beyond the store location, so every
/// request sees the directory as it is now.
#[derive(Debug, Clone)]
pub struct ReviewServer {
    store: SnapshotStore,
}

impl ReviewServer {
    pub fn new(store: &SnapshotStore) -> Self {
        Self {
            store: store.detached(),
        }
    }

    pub fn handle(&self, method: &Method, url: &str, body: &[u8]) -> Reply {
        let path = url.split('?').next().unwrap_or(url);
        match self.route(method, path, body) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(%method, path, error = %err, "request failed");
                Reply::error(&err)
            }
        }
    }

    fn route(&self, method: &Method, path: &str, body: &[u8]) -> Result<Reply> {
        match (method, path) {
            (Method::Get, "/list_of_diffs") => {
                let diffs = self.store.list_of_diffs()?;
                Ok(Reply::json(200, json!({ "diffs": diffs })))
            }
            (Method::Post, "/submit_diffs") => {
                let request: SubmitRequest = serde_json::from_slice(body)?;
                let flagged: Vec<String> = request
                    .diffs
                    .into_iter()
                    .filter(|d| d.replace)
                    .map(|d| d.name)
                    .collect();
                // All or nothing: a batch with a missing capture accepts none.
                let mut missing = Vec::new();
                for name in &flagged {
                    if !self.store.paths(name)?.new_path.exists() {
                        missing.push(name.as_str());
                    }
                }
                if !missing.is_empty() {
                    return Err(Error::NotFound(format!(
                        "no pending capture for {}; nothing accepted",
                        missing.join(", ")
                    )));
                }
                self.store.accept_diffs(&flagged)?;
                Ok(Reply::json(200, json!({ "status": "success", "accepted": flagged })))
            }
            (Method::Post, "/clear_diffs") => {
                let cleared = self.store.clear_diffs()?;
                Ok(Reply::json(200, json!({ "status": "success", "cleared": cleared })))
            }
            (Method::Get, p) if p.starts_with("/images/") => {
                let file = self.store.resolve_artifact(&p["/images/".len()..])?;
                Ok(Reply {
                    status: 200,
                    content_type: content_type_for(&file),
                    body: fs::read(&file)?,
                })
            }
            _ => Err(Error::NotFound(format!("no route for {method} {path}"))),
        }
    }

    /// Bind like any tiny_http server. Port 0 picks a free port.
    pub fn bind(self, options: &ServerOptions) -> Result<RunningServer> {
        let listener = TcpListener::bind(options.addr())?;
        let addr = listener.local_addr()?;
        let server = Server::from_listener(listener, None)
            .map_err(|err| Error::Io(io::Error::new(io::ErrorKind::Other, err.to_string())))?;
        info!(%addr, root = %self.store.root().display(), "review server listening");
        Ok(RunningServer {
            server: Arc::new(server),
            addr,
            router: self,
        })
    }

    fn respond(&self, mut request: Request) {
        let method = request.method().clone();
        let url = request.url().to_string();
        let mut body = Vec::new();
        let reply = match request.as_reader().read_to_end(&mut body) {
            Ok(_) => self.handle(&method, &url, &body),
            Err(err) => Reply::error(&Error::Io(err)),
        };
        debug!(%method, url = %url, status = reply.status, "served");
        if let Err(err) = request.respond(reply.into_response()) {
            warn!(url = %url, error = %err, "failed to send response");
        }
    }
}

pub struct RunningServer {
    server: Arc<Server>,
    addr: SocketAddr,
    router: ReviewServer,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Serve on the current thread until the server is unblocked.
    pub fn serve(&self) {
        for request in self.server.incoming_requests() {
            self.router.respond(request);
        }
    }

    /// Serve on a background thread.
    pub fn spawn(self) -> ServerHandle {
        let server = Arc::clone(&self.server);
        let addr = self.addr;
        let thread = thread::spawn(move || self.serve());
        ServerHandle { server, addr, thread }
    }
}

pub struct ServerHandle {
    server: Arc<Server>,
    addr: SocketAddr,
    thread: thread::JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn shutdown(self) {
        self.server.unblock();
        if self.thread.join().is_err() {
            warn!("review server thread panicked");
        }
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}
