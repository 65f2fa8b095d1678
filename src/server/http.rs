//! HTTP facade: path = command name, body = argument array
//!
//! Replies carry the same tagged-payload encoding as the TCP transport in
//! an `application/octet-stream` body. Requests dispatch directly (not
//! through the queue); a Basic-auth password is turned into a transparent
//! AUTH on a fresh per-request session.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::debug;

use crate::commands::{CommandError, Dispatcher};
use crate::session::Session;
use crate::store::Storage;
use crate::value::Value;
use crate::wire::{MAX_VALUE_SIZE, Payload, WireError, reader, writer};

/// Shared context behind every HTTP request.
pub struct HttpState {
    dispatcher: Arc<Dispatcher>,
    storage: Arc<Storage>,
}

impl HttpState {
    pub fn new(dispatcher: Arc<Dispatcher>, storage: Arc<Storage>) -> Self {
        Self {
            dispatcher,
            storage,
        }
    }
}

pub struct HttpServer {
    listener: TcpListener,
    state: Arc<HttpState>,
}

impl HttpServer {
    pub async fn bind(addr: &str, state: Arc<HttpState>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn serve(self, mut quit: watch::Receiver<bool>) -> io::Result<()> {
        let app = Router::new()
            .fallback(handle)
            .with_state(self.state);
        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move {
                let _ = quit.changed().await;
                debug!("http server shutting down");
            })
            .await
    }
}

/// Path component to command name: first `/` stripped, upper-cased.
fn normalize_path(path: &str) -> String {
    path.strip_prefix('/').unwrap_or(path).to_uppercase()
}

/// The password component of a Basic-auth header, empty when absent.
fn basic_auth_password(headers: &HeaderMap) -> String {
    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return String::new();
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return String::new();
    };
    let Ok(decoded) = BASE64.decode(encoded.trim()) else {
        return String::new();
    };
    let credentials = String::from_utf8_lossy(&decoded).into_owned();
    match credentials.split_once(':') {
        Some((_, password)) => password.to_owned(),
        None => credentials,
    }
}

/// Body bytes to the argument list; an empty body means zero arguments.
async fn read_args(body: &[u8]) -> Result<Vec<Value>, WireError> {
    if body.is_empty() {
        return Ok(Vec::new());
    }
    let mut r = body;
    reader::read_array(&mut r)
        .await?
        .into_array()?
        .into_iter()
        .map(|item| item.into_value())
        .collect()
}

fn error_body(message: impl std::fmt::Display) -> Vec<u8> {
    writer::encode_to_vec(&Payload::Error(message.to_string()))
}

/// Runs one HTTP request through the command pipeline and maps the outcome
/// to a status code plus a payload-encoded body.
pub async fn serve_command(
    state: &HttpState,
    path: &str,
    password: &str,
    body: &[u8],
) -> (StatusCode, Vec<u8>) {
    let session = Session::new(state.storage.clone());

    // transparent AUTH before the first command; with auth disabled any
    // password (including none) passes
    let auth_body = [Value::from("AUTH"), Value::from(password)];
    if let Err(e) = state.dispatcher.dispatch(&session, &auth_body) {
        return (StatusCode::FORBIDDEN, error_body(e));
    }

    let args = match read_args(body).await {
        Ok(args) => args,
        Err(e) => return (StatusCode::BAD_REQUEST, error_body(e)),
    };

    let name = normalize_path(path);
    let mut request = Vec::with_capacity(args.len() + 1);
    if !name.is_empty() {
        request.push(Value::from(name));
    }
    request.extend(args);

    match state.dispatcher.dispatch(&session, &request) {
        Ok(payload) => (StatusCode::OK, writer::encode_to_vec(&payload)),
        Err(CommandError::Quit) => (StatusCode::GATEWAY_TIMEOUT, error_body(CommandError::Quit)),
        Err(e) => (StatusCode::BAD_REQUEST, error_body(e)),
    }
}

async fn handle(State(state): State<Arc<HttpState>>, request: Request) -> Response {
    let path = request.uri().path().to_owned();
    let password = basic_auth_password(request.headers());

    let body = match axum::body::to_bytes(request.into_body(), MAX_VALUE_SIZE).await {
        Ok(bytes) => bytes,
        Err(e) => return respond(StatusCode::BAD_REQUEST, error_body(e)),
    };

    let (status, reply) = serve_command(&state, &path, &password, &body).await;
    respond(status, reply)
}

fn respond(status: StatusCode, body: Vec<u8>) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from(body),
    )
        .into_response()
}
