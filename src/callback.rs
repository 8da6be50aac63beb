// One-shot localhost listener for the CLI login callback

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::error::Elapsed;
use url::Url;

const SUCCESS_HTML: &str = "<html><head><title>Authentication Success</title></head><body>\
<h1>Authentication Successful</h1><p>You can close this window now.</p></body></html>";
const ERROR_HTML: &str = "<html><head><title>Authentication Error</title></head><body>\
<h1>Authentication Error</h1><p>You can close this window now and retry.</p></body></html>";
const NOT_FOUND_HTML: &str = "<html><body><h1>Not Found</h1></body></html>";

const MAX_REQUEST_BYTES: usize = 8192;

/// Idle connections (browser preconnects) are dropped after this long
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Query parameters delivered to the redirect URI
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallbackPayload {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Bound listener awaiting a single authorization callback.
///
/// Listens on both `127.0.0.1` and `::1` where available, so a `localhost`
/// redirect reaches it whichever address the browser resolves first.
/// `wait_for_callback` consumes the listener, so the sockets are closed on
/// success, error and timeout alike.
#[derive(Debug)]
pub struct CallbackListener {
    listener_v4: Option<TcpListener>,
    listener_v6: Option<TcpListener>,
    port: u16,
    callback_path: String,
}

type PendingRequest = (TcpStream, SocketAddr, Result<Result<String>, Elapsed>);

impl CallbackListener {
    /// Bind on the loopback addresses; port 0 picks a free port
    pub async fn bind(port: u16, callback_path: &str) -> Result<Self> {
        let mut bind_errors: Vec<String> = Vec::new();

        let listener_v4 = bind_loopback("127.0.0.1", port, &mut bind_errors).await;
        let port = match &listener_v4 {
            Some(listener) if port == 0 => listener
                .local_addr()
                .context("Failed to read callback listener address")?
                .port(),
            _ => port,
        };

        let listener_v6 = bind_loopback("::1", port, &mut bind_errors).await;
        let port = match (&listener_v4, &listener_v6) {
            (None, None) => anyhow::bail!(
                "Failed to bind callback listener: {}",
                bind_errors.join("; ")
            ),
            (None, Some(listener)) if port == 0 => listener
                .local_addr()
                .context("Failed to read callback listener address")?
                .port(),
            _ => port,
        };

        if !bind_errors.is_empty() {
            tracing::debug!(
                "Callback listener bound on one address family only: {}",
                bind_errors.join("; ")
            );
        }
        tracing::info!("Callback server listening on port {}", port);

        Ok(Self {
            listener_v4,
            listener_v6,
            port,
            callback_path: callback_path.to_string(),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait for the callback request, answer it, and close the listener.
    ///
    /// Requests for other paths (e.g. `/favicon.ico`) get a 404 and do not
    /// count as the callback. Connections are read concurrently, so an idle
    /// one cannot hold up the real request.
    pub async fn wait_for_callback(self, timeout: Duration) -> Result<CallbackPayload> {
        let result = tokio::time::timeout(timeout, self.accept_callback()).await;
        tracing::debug!("Callback listener on port {} closed", self.port);

        match result {
            Ok(payload) => payload,
            Err(_) => anyhow::bail!(
                "Timed out after {}s waiting for the authorization callback",
                timeout.as_secs()
            ),
        }
    }

    async fn accept_callback(&self) -> Result<CallbackPayload> {
        // Dropping the set aborts reads still in progress
        let mut pending: JoinSet<PendingRequest> = JoinSet::new();

        loop {
            tokio::select! {
                accepted = accept_on(self.listener_v4.as_ref()) => {
                    queue_request(&mut pending, accepted)?;
                }
                accepted = accept_on(self.listener_v6.as_ref()) => {
                    queue_request(&mut pending, accepted)?;
                }
                Some(joined) = pending.join_next() => {
                    let Ok((mut socket, peer, request)) = joined else {
                        continue;
                    };
                    if let Some(payload) = self.answer(&mut socket, peer, request).await {
                        return Ok(payload);
                    }
                }
            }
        }
    }

    /// Reply to one request; `Some` once the callback itself has arrived
    async fn answer(
        &self,
        socket: &mut TcpStream,
        peer: SocketAddr,
        request: Result<Result<String>, Elapsed>,
    ) -> Option<CallbackPayload> {
        let request = match request {
            Ok(Ok(request)) => request,
            Ok(Err(e)) => {
                tracing::warn!("Ignoring malformed callback request: {:#}", e);
                return None;
            }
            Err(_) => {
                tracing::debug!("Dropping idle callback connection from {}", peer);
                return None;
            }
        };

        let target = match extract_request_target(&request) {
            Ok(target) => target,
            Err(e) => {
                tracing::warn!("Ignoring callback request: {:#}", e);
                write_response(socket, "400 Bad Request", ERROR_HTML).await;
                return None;
            }
        };

        match parse_callback_target(target, &self.callback_path) {
            Ok(Some(payload)) => {
                let (status, body) = if payload.error.is_some() || payload.code.is_none() {
                    ("400 Bad Request", ERROR_HTML)
                } else {
                    ("200 OK", SUCCESS_HTML)
                };
                write_response(socket, status, body).await;
                Some(payload)
            }
            Ok(None) => {
                write_response(socket, "404 Not Found", NOT_FOUND_HTML).await;
                None
            }
            Err(e) => {
                tracing::warn!("Ignoring callback request: {:#}", e);
                write_response(socket, "400 Bad Request", ERROR_HTML).await;
                None
            }
        }
    }
}

async fn bind_loopback(host: &str, port: u16, errors: &mut Vec<String>) -> Option<TcpListener> {
    match TcpListener::bind((host, port)).await {
        Ok(listener) => Some(listener),
        Err(err) => {
            errors.push(format!("{}:{} ({})", host, port, err));
            None
        }
    }
}

async fn accept_on(listener: Option<&TcpListener>) -> std::io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

fn queue_request(
    pending: &mut JoinSet<PendingRequest>,
    accepted: std::io::Result<(TcpStream, SocketAddr)>,
) -> Result<()> {
    let (mut socket, peer) = accepted.context("Failed to accept callback connection")?;
    tracing::debug!("Callback connection from {}", peer);

    pending.spawn(async move {
        let request =
            tokio::time::timeout(REQUEST_READ_TIMEOUT, read_request_head(&mut socket)).await;
        (socket, peer, request)
    });
    Ok(())
}

async fn read_request_head(socket: &mut TcpStream) -> Result<String> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let size = socket
            .read(&mut chunk)
            .await
            .context("Failed to read callback request")?;
        if size == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..size]);
        if buffer.windows(4).any(|w| w == b"\r\n\r\n") || buffer.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }

    if buffer.is_empty() {
        anyhow::bail!("callback request is empty");
    }
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

async fn write_response(socket: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

fn extract_request_target(request: &str) -> Result<&str> {
    let first = request
        .lines()
        .next()
        .context("callback request has no request line")?;
    let mut parts = first.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or_default();
    if method != "GET" || target.is_empty() {
        anyhow::bail!("callback must be a GET request, got: {}", first);
    }
    Ok(target)
}

/// Parse a request target; `None` when it is not the callback path
pub fn parse_callback_target(target: &str, callback_path: &str) -> Result<Option<CallbackPayload>> {
    let url = Url::parse(&format!("http://127.0.0.1{}", target))
        .with_context(|| format!("Invalid callback target: {}", target))?;

    if url.path() != callback_path {
        return Ok(None);
    }

    let mut payload = CallbackPayload::default();
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => payload.code = Some(value.into_owned()),
            "state" => payload.state = Some(value.into_owned()),
            "error" => payload.error = Some(value.into_owned()),
            "error_description" => payload.error_description = Some(value.into_owned()),
            _ => {}
        }
    }

    Ok(Some(payload))
}
