//! Dev server implementation
//!
//! Accepts client connections, routes each request through the proxy table
//! and either forwards it upstream or hands it to the default handler.

use crate::config::ServerConfig;
use crate::error::{ConfigError, ProxyError};
use crate::models::{ExchangeOutcome, ProxyExchange};
use crate::proxy::http::{
    forward_request_body, header_value, read_http_request, read_response_head,
    relay_response_body, respond_with_status, write_request_head, HeaderList, ParsedRequest,
    ResponseHead,
};
use crate::proxy::router::{Route, Router};
use crate::proxy::upstream::{UpstreamConnector, UpstreamStream};
use crate::static_files::StaticFiles;
use std::future::Future;
use std::io::{self, ErrorKind};
use std::mem;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Keep-alive idle timeout in seconds
const KEEP_ALIVE_TIMEOUT_SECS: u64 = 30;
/// How often the accept loop re-checks the running flag
const ACCEPT_POLL_MILLIS: u64 = 500;
const PORT_FALLBACK_TRIES: u16 = 20;
const EXCHANGE_CHANNEL_CAPACITY: usize = 512;

/// State shared by every connection task.
pub struct ServerState {
    pub(crate) router: Router,
    pub(crate) static_files: StaticFiles,
    pub(crate) connector: Arc<dyn UpstreamConnector>,
    pub(crate) running: AtomicBool,
    pub(crate) total_requests: AtomicU64,
    pub(crate) proxied_requests: AtomicU64,
    pub(crate) failed_requests: AtomicU64,
    exchanges: broadcast::Sender<ProxyExchange>,
}

impl ServerState {
    pub fn new(
        config: &ServerConfig,
        connector: Arc<dyn UpstreamConnector>,
    ) -> Result<Self, ConfigError> {
        let (exchanges, _rx) = broadcast::channel(EXCHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            router: Router::new(config.proxy())?,
            static_files: StaticFiles::new(config.root.clone()),
            connector,
            running: AtomicBool::new(true),
            total_requests: AtomicU64::new(0),
            proxied_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            exchanges,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProxyExchange> {
        self.exchanges.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn record(&self, exchange: ProxyExchange) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if exchange.is_proxied() && exchange.outcome != ExchangeOutcome::Failed {
            self.proxied_requests.fetch_add(1, Ordering::Relaxed);
        }
        if exchange.outcome == ExchangeOutcome::Failed {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }

        let status = exchange
            .status_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "-".to_string());
        match &exchange.matched_prefix {
            Some(prefix) => tracing::info!(
                "{} {} -> {} [{}] {} {}",
                exchange.method,
                exchange.path,
                exchange.upstream.as_deref().unwrap_or("-"),
                prefix,
                status,
                exchange.duration_str()
            ),
            None => tracing::debug!(
                "{} {} {} {}",
                exchange.method,
                exchange.path,
                status,
                exchange.duration_str()
            ),
        }

        // No subscribers is the normal case
        let _ = self.exchanges.send(exchange);
    }
}

/// Bind the listener, walking forward from `port` while it is taken unless
/// `strict` is set.
pub async fn bind_listener(host: &str, port: u16, strict: bool) -> Result<TcpListener, ConfigError> {
    let tries = if strict || port == 0 {
        1
    } else {
        PORT_FALLBACK_TRIES
    };
    let mut last_err = None;

    for offset in 0..tries {
        let Some(candidate) = port.checked_add(offset) else {
            break;
        };
        match TcpListener::bind((host, candidate)).await {
            Ok(listener) => {
                if candidate != port {
                    tracing::warn!("Port {} in use, falling back to {}", port, candidate);
                }
                return Ok(listener);
            }
            Err(err) if err.kind() == ErrorKind::AddrInUse && !strict => {
                last_err = Some(err);
            }
            Err(source) => {
                return Err(ConfigError::Bind {
                    addr: format!("{host}:{candidate}"),
                    source,
                })
            }
        }
    }

    Err(ConfigError::Bind {
        addr: format!("{host}:{port}"),
        source: last_err.unwrap_or_else(|| io::Error::from(ErrorKind::AddrInUse)),
    })
}

/// Accept connections until the running flag is cleared.
pub async fn run_server(listener: TcpListener, state: Arc<ServerState>) -> anyhow::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Dev server listening on {}", addr);
    }

    loop {
        if !state.is_running() {
            break;
        }

        // Use accept with timeout so we can check cancellation periodically
        let accept_result = tokio::time::timeout(
            Duration::from_millis(ACCEPT_POLL_MILLIS),
            listener.accept(),
        )
        .await;

        match accept_result {
            Ok(Ok((socket, peer_addr))) => {
                tracing::debug!("Connection from {}", peer_addr);
                let _ = socket.set_nodelay(true);
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(socket, Some(peer_addr), state).await {
                        let err_str = e.to_string().to_lowercase();
                        if err_str.contains("eof")
                            || err_str.contains("broken pipe")
                            || err_str.contains("connection reset")
                            || err_str.contains("connection closed")
                        {
                            tracing::debug!("Connection closed by client: {}", e);
                        } else {
                            tracing::error!("Error handling connection: {}", e);
                        }
                    }
                });
            }
            Ok(Err(e)) => tracing::error!("Accept error: {}", e),
            Err(_) => continue,
        }
    }

    tracing::info!("Dev server stopped");
    Ok(())
}

/// What the connection loop does after a request.
enum Next {
    /// Read another request, starting with these already-received bytes
    KeepAlive(Vec<u8>),
    Close,
}

/// Serve requests on one client connection with keep-alive support.
pub(crate) async fn handle_connection<S>(
    mut client: S,
    peer: Option<SocketAddr>,
    state: Arc<ServerState>,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut carry = Vec::new();
    let mut request_number: u32 = 0;

    loop {
        request_number += 1;
        let started = Instant::now();

        let parsed_request = match tokio::time::timeout(
            Duration::from_secs(KEEP_ALIVE_TIMEOUT_SECS),
            read_http_request(&mut client, mem::take(&mut carry)),
        )
        .await
        {
            Ok(Ok(req)) => req,
            Ok(Err(err)) => {
                let too_large = err.downcast_ref::<ProxyError>().map(ProxyError::status);
                // Later failures are usually the client closing an idle connection
                if request_number == 1 || too_large.is_some() {
                    let (code, label) = too_large.unwrap_or((400, "Bad Request"));
                    tracing::warn!("Failed to parse request: {err}");
                    let _ = respond_with_status(&mut client, code, label, &err.to_string()).await;
                }
                break;
            }
            Err(_) => {
                tracing::debug!("Keep-alive timeout after {} requests", request_number - 1);
                break;
            }
        };

        match process_request(&mut client, parsed_request, peer, &state, started).await {
            Ok(Next::KeepAlive(rest)) => carry = rest,
            Ok(Next::Close) => break,
            Err(e) => {
                tracing::debug!("Request processing error: {e}");
                break;
            }
        }
    }

    let _ = client.shutdown().await;
    Ok(())
}

async fn process_request<S>(
    client: &mut S,
    mut request: ParsedRequest,
    peer: Option<SocketAddr>,
    state: &ServerState,
    started: Instant,
) -> anyhow::Result<Next>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut exchange = ProxyExchange::new(request.method.as_str(), &request.target);

    if let Some(route) = state.router.match_path(&request.target) {
        exchange.matched_prefix = Some(route.prefix.clone());
        exchange.upstream = Some(route.upstream.url());
        return proxy_request(client, request, route, peer, state, exchange, started).await;
    }

    // Not proxied: drain any body so the connection stays in sync
    let keep_alive = request.keep_alive();
    forward_request_body(client, &mut tokio::io::sink(), &mut request).await?;
    let (status, size) = state.static_files.serve(client, &request, keep_alive).await?;

    exchange.status_code = Some(status);
    exchange.response_size = Some(size);
    exchange.outcome = ExchangeOutcome::Served;
    exchange.duration_ms = Some(started.elapsed().as_millis() as u32);
    state.record(exchange);

    Ok(if keep_alive {
        Next::KeepAlive(request.buffered)
    } else {
        Next::Close
    })
}

async fn proxy_request<S>(
    client: &mut S,
    mut request: ParsedRequest,
    route: &Route,
    peer: Option<SocketAddr>,
    state: &ServerState,
    mut exchange: ProxyExchange,
    started: Instant,
) -> anyhow::Result<Next>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let upgrade = route.rule.ws && request.is_websocket_upgrade();
    let headers = outbound_headers(&request, route, peer, upgrade);
    exchange.upstream_host = header_value(&headers, "host").map(str::to_string);
    let authority = route.upstream.authority.clone();
    let timeout_ms = route.rule.timeout_ms;

    let connect = state.connector.connect(&route.upstream);
    let mut upstream = match within(timeout_ms, &authority, connect).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            tracing::error!(
                "Failed to connect to upstream {} - {}",
                route.upstream.socket_addr(),
                err
            );
            let err = ProxyError::UpstreamUnavailable {
                authority,
                reason: err.to_string(),
            };
            return fail(client, state, exchange, started, err).await;
        }
        Err(err) => return fail(client, state, exchange, started, err).await,
    };

    let outbound_target = route.upstream.outbound_path(&request.target);
    if let Err(err) = write_request_head(
        &mut upstream,
        &request.method,
        &outbound_target,
        "HTTP/1.1",
        &headers,
    )
    .await
    {
        let err = ProxyError::UpstreamUnavailable {
            authority,
            reason: err.to_string(),
        };
        return fail(client, state, exchange, started, err).await;
    }

    if let Err(err) = forward_request_body(client, &mut upstream, &mut request).await {
        tracing::warn!("Failed to forward request upstream: {err}");
        return match err.downcast::<ProxyError>() {
            Ok(proxy_err) => fail(client, state, exchange, started, proxy_err).await,
            Err(err) => {
                respond_with_status(client, 400, "Bad Request", "Failed to read request body")
                    .await?;
                exchange.outcome = ExchangeOutcome::Failed;
                exchange.status_code = Some(400);
                exchange.error = Some(err.to_string());
                exchange.duration_ms = Some(started.elapsed().as_millis() as u32);
                state.record(exchange);
                Ok(Next::Close)
            }
        };
    }
    let _ = upstream.flush().await;

    let final_head = final_response_head(&mut upstream, &mut *client);
    let mut head = match within(timeout_ms, &authority, final_head).await {
        Ok(Ok(head)) => head,
        Ok(Err(err)) => {
            tracing::error!("Failed to read response head from {}: {err}", authority);
            let err = ProxyError::BadUpstreamResponse {
                authority,
                reason: err.to_string(),
            };
            return fail(client, state, exchange, started, err).await;
        }
        Err(err) => return fail(client, state, exchange, started, err).await,
    };

    exchange.status_code = Some(head.status_code);

    if upgrade && head.status_code == 101 {
        client.write_all(&head.raw_head).await?;
        client.write_all(&head.body_prefix).await?;
        client.flush().await?;
        if !request.buffered.is_empty() {
            upstream.write_all(&request.buffered).await?;
        }

        exchange.outcome = ExchangeOutcome::Upgraded;
        exchange.duration_ms = Some(started.elapsed().as_millis() as u32);
        state.record(exchange);

        tunnel(client, &mut upstream, &request.target).await;
        return Ok(Next::Close);
    }

    let body_kind = head.body_kind(&request.method);
    let reuse = request.keep_alive() && head.allows_reuse(&request.method);

    client.write_all(&head.raw_head).await?;
    let relayed = relay_response_body(&mut upstream, client, &mut head, body_kind).await;
    client.flush().await?;

    exchange.duration_ms = Some(started.elapsed().as_millis() as u32);
    match relayed {
        Ok(size) => {
            exchange.response_size = Some(size);
            exchange.outcome = ExchangeOutcome::Proxied;
            state.record(exchange);
            Ok(if reuse {
                Next::KeepAlive(request.buffered)
            } else {
                Next::Close
            })
        }
        Err(err) => {
            // Head already sent; all we can do is drop the connection
            exchange.outcome = ExchangeOutcome::Failed;
            exchange.error = Some(err.to_string());
            state.record(exchange);
            Ok(Next::Close)
        }
    }
}

/// Answer with the gateway status for `err` and close the connection.
async fn fail<S>(
    client: &mut S,
    state: &ServerState,
    mut exchange: ProxyExchange,
    started: Instant,
    err: ProxyError,
) -> anyhow::Result<Next>
where
    S: AsyncWrite + Unpin,
{
    let (code, label) = err.status();
    let body = match &err {
        ProxyError::UpstreamUnavailable { .. } => "Unable to reach upstream server",
        ProxyError::UpstreamTimeout { .. } => "Upstream server timed out",
        ProxyError::BadUpstreamResponse { .. } => "Failed to read response",
        ProxyError::RequestBodyTooLarge { .. } => "Request body exceeds allowed size",
    };
    respond_with_status(client, code, label, body).await?;

    exchange.outcome = ExchangeOutcome::Failed;
    exchange.status_code = Some(code);
    exchange.error = Some(err.to_string());
    exchange.duration_ms = Some(started.elapsed().as_millis() as u32);
    state.record(exchange);
    Ok(Next::Close)
}

/// Read upstream heads until a final one arrives, passing interim `1xx`
/// heads through to the client as they come.
async fn final_response_head<C>(
    upstream: &mut UpstreamStream,
    client: &mut C,
) -> anyhow::Result<ResponseHead>
where
    C: AsyncWrite + Unpin,
{
    let mut carry = Vec::new();
    loop {
        let head = read_response_head(upstream, carry).await?;
        if !head.is_interim() {
            return Ok(head);
        }
        tracing::debug!("Relaying interim {} {}", head.status_code, head.reason);
        client.write_all(&head.raw_head).await?;
        client.flush().await?;
        carry = head.body_prefix;
    }
}

/// Run `fut` under the rule's timeout, if it has one.
async fn within<F, T>(timeout_ms: Option<u64>, authority: &str, fut: F) -> Result<T, ProxyError>
where
    F: Future<Output = T>,
{
    match timeout_ms {
        Some(ms) => tokio::time::timeout(Duration::from_millis(ms), fut)
            .await
            .map_err(|_| ProxyError::UpstreamTimeout {
                authority: authority.to_string(),
                timeout_ms: ms,
            }),
        None => Ok(fut.await),
    }
}

/// Shuttle bytes both ways until either side closes.
async fn tunnel<C>(client: &mut C, upstream: &mut UpstreamStream, target: &str)
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::io::copy_bidirectional(client, upstream).await {
        Ok((up, down)) => tracing::debug!(
            "WebSocket connection closed: {} ({} bytes up, {} bytes down)",
            target,
            up,
            down
        ),
        Err(e) => tracing::debug!("WebSocket tunnel error on {}: {}", target, e),
    }
}

fn is_hop_by_hop(name: &str) -> bool {
    ["connection", "keep-alive", "proxy-connection", "upgrade", "te", "trailer"]
        .iter()
        .any(|hop| name.eq_ignore_ascii_case(hop))
}

/// Headers for the upstream request: client headers minus hop-by-hop ones,
/// with `Host` chosen by the rule and the rule's extra headers applied.
pub(crate) fn outbound_headers(
    request: &ParsedRequest,
    route: &Route,
    peer: Option<SocketAddr>,
    upgrade: bool,
) -> HeaderList {
    let rule = &route.rule;
    let client_host = request.header("host");
    let overridden = |name: &str| rule.headers.keys().any(|k| k.eq_ignore_ascii_case(name));

    let mut headers: HeaderList = Vec::with_capacity(request.headers.len() + 6);
    headers.push(("Host".to_string(), route.outbound_host(client_host)));

    for (name, value) in &request.headers {
        if name.eq_ignore_ascii_case("host") || is_hop_by_hop(name) || overridden(name) {
            continue;
        }
        if rule.xfwd && name.to_ascii_lowercase().starts_with("x-forwarded-") {
            continue;
        }
        headers.push((name.clone(), value.clone()));
    }

    if rule.xfwd {
        let client_ip = peer.map(|p| p.ip().to_string());
        let forwarded_for = match (request.header("x-forwarded-for"), client_ip) {
            (Some(existing), Some(ip)) => Some(format!("{existing}, {ip}")),
            (Some(existing), None) => Some(existing.to_string()),
            (None, ip) => ip,
        };
        if let Some(value) = forwarded_for {
            headers.push(("X-Forwarded-For".to_string(), value));
        }
        let forwarded_host = request.header("x-forwarded-host").or(client_host);
        if let Some(host) = forwarded_host {
            headers.push(("X-Forwarded-Host".to_string(), host.to_string()));
        }
        let proto = request
            .header("x-forwarded-proto")
            .unwrap_or(if upgrade { "ws" } else { "http" });
        headers.push(("X-Forwarded-Proto".to_string(), proto.to_string()));
    }

    for (name, value) in &rule.headers {
        headers.push((name.clone(), value.clone()));
    }

    if upgrade {
        headers.push(("Connection".to_string(), "Upgrade".to_string()));
        if let Some(protocol) = request.header("upgrade") {
            headers.push(("Upgrade".to_string(), protocol.to_string()));
        }
    } else {
        headers.push(("Connection".to_string(), "close".to_string()));
    }

    headers
}
