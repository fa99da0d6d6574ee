use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use http_body_util::BodyExt;
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ConfigStore;
use crate::engine::request::method_carries_body;
use crate::engine::{HyperRelayClient, Outcome, ProbeGate, RewritingEngine};
use crate::error::{ProxyError, Result};
use crate::proxy::assets::serve_asset;
use crate::proxy::intercept::intercepted_request;
use crate::proxy::synthetic_response::{rewritten_response, text_response, RespBody};
use crate::relay::RelayBackend;
use crate::telemetry::Metrics;
use crate::tunnel::handle_upgrade;

type Engine = RewritingEngine<HyperRelayClient, ProbeGate<HyperRelayClient>>;

/// Guard to decrement the active connections counter when dropped
struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
    metrics: Option<Arc<Metrics>>,
}

impl ConnectionGuard {
    fn new(counter: Arc<AtomicUsize>, metrics: Option<Arc<Metrics>>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        if let Some(ref m) = metrics {
            m.connections_total.add(1, &[]);
            m.connections_active.add(1, &[]);
        }
        Self { counter, metrics }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
        if let Some(ref m) = self.metrics {
            m.connections_active.add(-1, &[]);
        }
    }
}

/// Everything a request handler needs, shared by all connections
struct ServerContext {
    store: ConfigStore,
    engine: Engine,
    relay: RelayBackend,
    metrics: Option<Arc<Metrics>>,
    shutdown: CancellationToken,
}

/// Bind the configured address and serve until SIGINT, SIGTERM or `shutdown`
pub async fn run(
    store: ConfigStore,
    metrics: Option<Arc<Metrics>>,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = store.snapshot().listen;
    let listener = TcpListener::bind(addr).await.map_err(ProxyError::Io)?;

    spawn_signal_handler(shutdown.clone())?;
    serve(listener, store, metrics, shutdown).await
}

/// Cancel `shutdown` on the first SIGINT or SIGTERM
pub fn spawn_signal_handler(shutdown: CancellationToken) -> Result<()> {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate()).map_err(|e| {
        ProxyError::Io(std::io::Error::other(format!("Failed to setup SIGTERM handler: {e}")))
    })?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt()).map_err(|e| {
        ProxyError::Io(std::io::Error::other(format!("Failed to setup SIGINT handler: {e}")))
    })?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
            _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
            _ = shutdown.cancelled() => return,
        }
        shutdown.cancel();
    });
    Ok(())
}

/// Serve connections from an already bound listener until `shutdown` fires
///
/// In-flight connections are then asked to finish and given up to
/// `timeout.shutdown_secs` to do so; open tunnels are closed on both ends.
pub async fn serve(
    listener: TcpListener,
    store: ConfigStore,
    metrics: Option<Arc<Metrics>>,
    shutdown: CancellationToken,
) -> Result<()> {
    let config = store.snapshot();
    let addr = listener.local_addr().map_err(ProxyError::Io)?;

    let relay_client = HyperRelayClient::from_config(&config)?;
    let gate = ProbeGate::new(relay_client.clone(), config.declared_origin());
    let engine = RewritingEngine::new(store.clone(), relay_client, gate, metrics.clone());
    let relay =
        RelayBackend::new(Duration::from_millis(config.timeout.relay_ms), metrics.clone())?;

    let ctx = Arc::new(ServerContext {
        store: store.clone(),
        engine,
        relay,
        metrics: metrics.clone(),
        shutdown: shutdown.clone(),
    });

    let builder = ConnBuilder::new(TokioExecutor::new());
    let active_connections = Arc::new(AtomicUsize::new(0));

    info!(?addr, relay = %config.relay_endpoint(), "Starting mirage proxy");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok((stream, peer)) => (stream, peer),
                    Err(e) => {
                        warn!(error = %e, "accept error");
                        continue;
                    }
                };

                let guard = ConnectionGuard::new(active_connections.clone(), metrics.clone());
                let builder = builder.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    serve_connection(stream, peer, builder, ctx).await;
                });
            }
        }
    }

    let shutdown_secs = store.snapshot().timeout.shutdown_secs;
    info!("Waiting for active connections to finish (timeout: {shutdown_secs}s)");
    let shutdown_timeout = Duration::from_secs(shutdown_secs);
    let start = std::time::Instant::now();

    loop {
        let active = active_connections.load(Ordering::Relaxed);
        if active == 0 {
            info!("All connections closed, shutdown complete");
            break;
        }

        if start.elapsed() >= shutdown_timeout {
            warn!(
                active_connections = active,
                "Shutdown timeout reached, {} connections still active", active
            );
            break;
        }

        debug!(active_connections = active, "Waiting for connections to close");
        sleep(Duration::from_millis(100)).await;
    }

    info!("Proxy server stopped");
    Ok(())
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    builder: ConnBuilder<TokioExecutor>,
    ctx: Arc<ServerContext>,
) {
    let shutdown = ctx.shutdown.clone();
    let svc = hyper::service::service_fn(move |req: Request<Incoming>| {
        let ctx = ctx.clone();
        async move { Ok::<_, hyper::Error>(dispatch(req, &ctx).await) }
    });

    let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), svc);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                debug!(?peer, error = %e, "serve_connection error");
            }
        }
        _ = shutdown.cancelled() => {
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.await {
                debug!(?peer, error = %e, "connection error during shutdown");
            }
        }
    }
}

/// Route one request: relay API, WebSocket relay, own assets or engine
async fn dispatch(req: Request<Incoming>, ctx: &ServerContext) -> Response<RespBody> {
    let config = ctx.store.snapshot();
    let proxy = &config.proxy;
    let path = req.uri().path().to_string();

    if path.starts_with(&proxy.relay_api_path) {
        return ctx.relay.handle(req).await;
    }
    if path.starts_with(&proxy.ws_relay_prefix) {
        return handle_upgrade(req, &config, ctx.shutdown.child_token(), ctx.metrics.clone())
            .await;
    }

    let (parts, body) = req.into_parts();
    let body = if method_carries_body(&parts.method) {
        match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                debug!(error = %e, "Failed to read request body");
                return text_response(StatusCode::BAD_REQUEST, "Failed to read request body");
            }
        }
    } else {
        Bytes::new()
    };

    let intercepted = intercepted_request(&parts, body, &proxy.control_prefix);
    if intercepted.caller().is_none() && !path.starts_with(&proxy.control_prefix) {
        return serve_asset(&config.static_dir, &path).await;
    }

    match ctx.engine.handle(intercepted).await {
        Outcome::Asset(asset) => serve_asset(&config.static_dir, &asset).await,
        Outcome::Response(rewritten) => rewritten_response(rewritten),
    }
}
