use bytes::Bytes;
use http::header::{
    CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_PROTOCOL,
    SEC_WEBSOCKET_VERSION, UPGRADE,
};
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;
use crate::telemetry::Metrics;
use crate::tunnel::error::{TunnelError, TunnelResult};
use crate::tunnel::session::TunnelSession;

type RespBody = BoxBody<Bytes, hyper::Error>;

/// WebSocket connection to the real origin
pub type OriginSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Query parameter carrying the origin WebSocket URL
pub const TARGET_PARAM: &str = "url";

const WEBSOCKET_VERSION: &str = "13";

fn has_token(headers: &HeaderMap, name: http::header::HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// Check that `req` is a WebSocket upgrade and return its key
pub fn validate_upgrade<B>(req: &Request<B>) -> TunnelResult<HeaderValue> {
    let headers = req.headers();
    let is_upgrade = req.method() == Method::GET
        && has_token(headers, CONNECTION, "upgrade")
        && has_token(headers, UPGRADE, "websocket")
        && headers.get(SEC_WEBSOCKET_VERSION).is_some_and(|v| v == WEBSOCKET_VERSION);
    if !is_upgrade {
        return Err(TunnelError::NotUpgrade);
    }
    headers.get(SEC_WEBSOCKET_KEY).cloned().ok_or(TunnelError::NotUpgrade)
}

/// Origin WebSocket URL from the request query (`?url=wss://...`)
pub fn target_from_query(query: Option<&str>) -> TunnelResult<Url> {
    let raw = url::form_urlencoded::parse(query.unwrap_or_default().as_bytes())
        .find(|(k, _)| k == TARGET_PARAM)
        .map(|(_, v)| v.into_owned())
        .ok_or(TunnelError::MissingTarget)?;

    let target = Url::parse(&raw).map_err(|e| TunnelError::InvalidTarget(format!("{raw}: {e}")))?;
    match target.scheme() {
        "ws" | "wss" if target.has_host() => Ok(target),
        _ => Err(TunnelError::InvalidTarget(raw)),
    }
}

/// Open the origin side, asking for the client's sub-protocol
///
/// Returns the socket and the sub-protocol the origin selected.
pub async fn connect_origin(
    target: &Url,
    protocol: Option<&HeaderValue>,
    timeout: Duration,
) -> TunnelResult<(OriginSocket, Option<HeaderValue>)> {
    let mut request = target
        .as_str()
        .into_client_request()
        .map_err(|e| TunnelError::InvalidTarget(format!("{target}: {e}")))?;
    if let Some(protocol) = protocol {
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, protocol.clone());
    }

    let connect = tokio_tungstenite::connect_async(request);
    let (socket, response) = tokio::time::timeout(timeout, connect)
        .await
        .map_err(|_| TunnelError::Connect(format!("{target}: timed out")))?
        .map_err(|e| TunnelError::Connect(format!("{target}: {e}")))?;

    Ok((socket, response.headers().get(SEC_WEBSOCKET_PROTOCOL).cloned()))
}

/// `101 Switching Protocols` answer for a validated upgrade
pub fn switching_protocols(key: &HeaderValue, protocol: Option<HeaderValue>) -> Response<RespBody> {
    let mut resp = Response::new(empty_body());
    *resp.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = resp.headers_mut();
    headers.insert(CONNECTION, HeaderValue::from_static("upgrade"));
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    if let Ok(accept) = HeaderValue::from_str(&derive_accept_key(key.as_bytes())) {
        headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
    }
    if let Some(protocol) = protocol {
        headers.insert(SEC_WEBSOCKET_PROTOCOL, protocol);
    }
    resp
}

/// Handle a WebSocket relay request end to end
///
/// The origin is connected before the client is answered, so a dead origin
/// surfaces as `502` instead of an immediately closed socket. On success the
/// session runs on its own task until either side closes or `cancel` fires.
pub async fn handle_upgrade<B>(
    mut req: Request<B>,
    config: &Config,
    cancel: CancellationToken,
    metrics: Option<Arc<Metrics>>,
) -> Response<RespBody> {
    match open_tunnel(&mut req, config, cancel, metrics.clone()).await {
        Ok(resp) => resp,
        Err(e) => {
            debug!(error = %e, "WebSocket relay refused");
            if let Some(ref m) = metrics {
                m.record_tunnel_error(e.error_type());
            }
            let mut resp = Response::new(text_body(e.to_string()));
            *resp.status_mut() = StatusCode::from(&e);
            resp
        }
    }
}

async fn open_tunnel<B>(
    req: &mut Request<B>,
    config: &Config,
    cancel: CancellationToken,
    metrics: Option<Arc<Metrics>>,
) -> TunnelResult<Response<RespBody>> {
    let key = validate_upgrade(req)?;
    let target = target_from_query(req.uri().query())?;
    let requested = req.headers().get(SEC_WEBSOCKET_PROTOCOL).cloned();
    let trace = config.proxy.debug.tunnel;

    if trace {
        tracing::info!(url = %target, "Tunnel connecting");
    }
    let timeout = Duration::from_millis(config.timeout.relay_ms);
    let (origin, selected) = connect_origin(&target, requested.as_ref(), timeout).await?;

    let on_upgrade = hyper::upgrade::on(req);
    tokio::spawn(async move {
        let upgraded = match on_upgrade.await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                warn!(url = %target, error = %e, "Client upgrade failed");
                return;
            }
        };
        let client =
            WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
        let cause = TunnelSession::new(client, origin, cancel)
            .with_metrics(metrics)
            .with_trace(trace)
            .run()
            .await;
        debug!(url = %target, ?cause, "Tunnel finished");
    });

    Ok(switching_protocols(&key, selected))
}

fn empty_body() -> RespBody {
    Full::new(Bytes::new()).map_err(|never| match never {}).boxed()
}

fn text_body(text: String) -> RespBody {
    Full::new(Bytes::from(text)).map_err(|never| match never {}).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_key_matches_rfc_example() {
        let key = HeaderValue::from_static("dGhlIHNhbXBsZSBub25jZQ==");
        let resp = switching_protocols(&key, None);
        assert_eq!(resp.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(
            resp.headers().get(SEC_WEBSOCKET_ACCEPT).unwrap(),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }
}
