//! WebSocket listener.
//!
//! Accepts upgrades, captures client identity from the handshake request
//! (peer-id cookie, User-Agent, forwarded address, `webrtc` path marker)
//! and hands upgraded connections to the server loop. Minted peer ids are
//! returned to the client as a `Set-Cookie` on the upgrade response.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use beamdrop_core::{is_peer_id, HubError, HubResult};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// 100 MiB cap on a single relayed message.
const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Identity gathered from the upgrade request.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub peer_id: String,
    /// True when the id was minted here rather than read from the cookie.
    pub minted: bool,
    pub user_agent: String,
    /// Raw value of the trusted proxy header, when configured and present.
    pub forwarded_for: Option<String>,
    pub rtc_supported: bool,
}

/// An accepted, upgraded connection.
pub struct AcceptedConnection {
    pub ws: WebSocketStream<TcpStream>,
    pub remote_addr: SocketAddr,
    pub identity: ClientIdentity,
}

/// Start the listener.
///
/// Returns the bound address (relevant when binding port 0) and a
/// receiver yielding upgraded connections.
pub async fn start_listener(
    bind_addr: SocketAddr,
    trusted_proxy_header: Option<String>,
) -> HubResult<(SocketAddr, mpsc::Receiver<AcceptedConnection>)> {
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| HubError::Transport(format!("bind failed: {e}")))?;
    let local_addr = tcp_listener
        .local_addr()
        .map_err(|e| HubError::Transport(format!("local_addr failed: {e}")))?;

    let (tx, rx) = mpsc::channel::<AcceptedConnection>(64);

    tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    let proxy_header = trusted_proxy_header.clone();
                    tokio::spawn(async move {
                        match upgrade(stream, addr, proxy_header.as_deref()).await {
                            Ok(conn) => {
                                if tx.send(conn).await.is_err() {
                                    warn!("connection channel closed");
                                }
                            }
                            Err(e) => {
                                warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
    });

    Ok((local_addr, rx))
}

/// Run the WebSocket handshake, capturing identity from the request.
async fn upgrade(
    stream: TcpStream,
    remote_addr: SocketAddr,
    trusted_proxy_header: Option<&str>,
) -> HubResult<AcceptedConnection> {
    let stream = tcp_configure(stream)?;

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(MAX_MESSAGE_SIZE);
    ws_config.max_frame_size = Some(MAX_MESSAGE_SIZE);

    let mut identity: Option<ClientIdentity> = None;
    let callback = |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
        let ident = extract_identity(req, trusted_proxy_header);
        if ident.minted {
            // no Secure attribute: the hub serves plain ws://, TLS
            // termination lives in front of it
            let cookie = format!("peerid={}; SameSite=Strict", ident.peer_id);
            if let Ok(value) = cookie.parse() {
                resp.headers_mut().append("set-cookie", value);
            }
        }
        identity = Some(ident);
        Ok(resp)
    };

    let ws = tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(ws_config))
        .await
        .map_err(|e| HubError::Transport(format!("handshake failed: {e}")))?;

    let identity = identity
        .ok_or_else(|| HubError::Transport("handshake callback did not run".to_string()))?;

    debug!(remote = %remote_addr, peer_id = %identity.peer_id, "WebSocket connection accepted");
    Ok(AcceptedConnection {
        ws,
        remote_addr,
        identity,
    })
}

/// Disable Nagle and enable TCP keep-alive on an accepted socket.
///
/// Keep-alive catches half-open connections at the OS level; liveness of
/// the peer itself is owned by the protocol ping/pong supervisor.
fn tcp_configure(stream: TcpStream) -> HubResult<TcpStream> {
    let stream = stream.into_std()?;
    stream.set_nodelay(true)?;

    let socket = socket2::Socket::from(stream);
    let keepalive = socket2::TcpKeepalive::new()
        .with_time(Duration::from_secs(30))
        .with_interval(Duration::from_secs(10));
    socket.set_tcp_keepalive(&keepalive)?;

    let stream = std::net::TcpStream::from(socket);
    Ok(TcpStream::from_std(stream)?)
}

fn extract_identity(req: &Request, trusted_proxy_header: Option<&str>) -> ClientIdentity {
    let headers = req.headers();
    let cookie_id = headers
        .get("cookie")
        .and_then(|v| v.to_str().ok())
        .and_then(peer_id_from_cookie);
    let minted = cookie_id.is_none();
    let peer_id = cookie_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let forwarded_for = trusted_proxy_header
        .and_then(|h| headers.get(h))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let rtc_supported = req.uri().path().contains("webrtc")
        || req.uri().query().is_some_and(|q| q.contains("webrtc"));

    ClientIdentity {
        peer_id,
        minted,
        user_agent,
        forwarded_for,
        rtc_supported,
    }
}

/// Pull a valid peer id out of a `Cookie` header value.
fn peer_id_from_cookie(cookie: &str) -> Option<String> {
    cookie.split(';').map(str::trim).find_map(|part| {
        let value = part.strip_prefix("peerid=")?;
        is_peer_id(value).then(|| value.to_string())
    })
}

/// Resolve the peer's canonical IP: a parseable forwarded address wins
/// (first entry of the header), otherwise the socket address, with
/// loopback and v4-mapped IPv6 folded down to plain IPv4.
pub fn resolve_ip(remote: SocketAddr, forwarded_for: Option<&str>) -> String {
    let forwarded = forwarded_for
        .and_then(|list| list.split(',').next())
        .map(str::trim)
        .and_then(|s| s.parse::<IpAddr>().ok());
    canonical_ip(forwarded.unwrap_or_else(|| remote.ip())).to_string()
}

fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return IpAddr::V4(v4);
            }
            if v6.is_loopback() {
                return IpAddr::V4(Ipv4Addr::LOCALHOST);
            }
            IpAddr::V6(v6)
        }
        v4 => v4,
    }
}
