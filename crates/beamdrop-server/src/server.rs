//! Accept loop and per-connection session tasks.
//!
//! Each connection gets a writer task draining the peer's outbound queue
//! (one writer per socket) and a read loop multiplexed with the
//! keep-alive ticker. Any exit path funnels through the hub's cascading
//! disconnect.

use std::net::SocketAddr;
use std::sync::Arc;

use beamdrop_core::{HubError, HubResult};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

use crate::config::HubConfig;
use crate::hub::{Hub, KEEP_ALIVE_PERIOD};
use crate::listener::{self, AcceptedConnection};
use crate::peer::Outbound;

/// The hub server: one [`Hub`] behind a WebSocket listener.
pub struct HubServer {
    hub: Arc<Hub>,
}

impl HubServer {
    pub fn new(config: HubConfig) -> Self {
        Self {
            hub: Arc::new(Hub::new(config)),
        }
    }

    /// Bind and serve.
    ///
    /// Returns the bound address once listening (relevant when binding
    /// port 0) and the accept-loop task handle.
    pub async fn start(self) -> HubResult<(SocketAddr, JoinHandle<()>)> {
        let config = self.hub.config();
        let bind: SocketAddr = format!("{}:{}", config.bind, config.port)
            .parse()
            .map_err(|e| HubError::Config(format!("invalid bind address: {e}")))?;
        let (addr, mut rx) =
            listener::start_listener(bind, config.trusted_proxy_header.clone()).await?;
        info!(addr = %addr, ws_fallback = config.ws_fallback, "hub ready");

        let hub = self.hub;
        let handle = tokio::spawn(async move {
            while let Some(conn) = rx.recv().await {
                let hub = hub.clone();
                tokio::spawn(async move {
                    handle_connection(hub, conn).await;
                });
            }
            info!("listener closed, accept loop ending");
        });
        Ok((addr, handle))
    }
}

async fn handle_connection(hub: Arc<Hub>, conn: AcceptedConnection) {
    let AcceptedConnection {
        ws,
        remote_addr,
        identity,
    } = conn;
    let ip = listener::resolve_ip(remote_addr, identity.forwarded_for.as_deref());
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    // single writer per socket
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let result = match frame {
                Outbound::Text(text) => sink.send(Message::Text(text)).await,
                Outbound::Binary(bytes) => sink.send(Message::Binary(bytes)).await,
                Outbound::Terminate => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
    });

    let peer = hub.accept(identity, ip, tx).await;
    let conn_id = peer.conn_id;
    info!(remote = %remote_addr, peer_id = %peer.id, ip = %peer.ip, "peer connected");

    let mut ticker = tokio::time::interval(KEEP_ALIVE_PERIOD);
    ticker.tick().await; // skip the immediate first tick

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !hub.keep_alive_tick(conn_id).await {
                    break;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if !hub.handle_text(conn_id, &text).await {
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => hub.handle_binary(conn_id, &data).await,
                Some(Ok(Message::Close(_))) | None => {
                    break;
                }
                Some(Ok(_)) => {} // transport-level ping/pong, handled by tungstenite
                Some(Err(e)) => {
                    debug!(remote = %remote_addr, error = %e, "socket error");
                    break;
                }
            }
        }
    }

    // whatever path ended the loop, the peer's state must be torn down
    hub.disconnect(conn_id).await;
    let _ = writer.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamdrop_core::frame::{RelayFrame, RelayRoute};
    use serde_json::{json, Value};
    use tokio::net::TcpStream;
    use tokio::time::{timeout, Duration};
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    const PEER_A: &str = "aaaaaaaa-aaaa-4aaa-8aaa-aaaaaaaaaaa1";
    const PEER_B: &str = "bbbbbbbb-bbbb-4bbb-8bbb-bbbbbbbbbbb1";

    async fn start_server(ws_fallback: bool) -> SocketAddr {
        let config = HubConfig {
            bind: "127.0.0.1".to_string(),
            port: 0,
            ws_fallback,
            ..HubConfig::default()
        };
        let (addr, _handle) = HubServer::new(config).start().await.unwrap();
        addr
    }

    async fn connect_peer(addr: SocketAddr, peer_id: &str) -> Client {
        let mut request = format!("ws://{addr}/webrtc").into_client_request().unwrap();
        request
            .headers_mut()
            .insert("cookie", format!("peerid={peer_id}").parse().unwrap());
        let (mut ws, _) = connect_async(request).await.unwrap();
        // the hub pushes ws-config and display-name, in that order
        assert_eq!(next_json(&mut ws).await["type"], "ws-config");
        let hello = next_json(&mut ws).await;
        assert_eq!(hello["type"], "display-name");
        assert_eq!(hello["peerId"], peer_id);
        ws
    }

    /// Next frame, answering heartbeat pings along the way.
    async fn next_message(ws: &mut Client) -> Message {
        loop {
            let msg = timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for a message")
                .expect("connection closed")
                .expect("socket error");
            if let Message::Text(text) = &msg {
                if let Ok(value) = serde_json::from_str::<Value>(text) {
                    if value["type"] == "ping" {
                        send_json(ws, &json!({"type": "pong"})).await;
                        continue;
                    }
                }
            }
            return msg;
        }
    }

    async fn next_json(ws: &mut Client) -> Value {
        loop {
            if let Message::Text(text) = next_message(ws).await {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn next_binary(ws: &mut Client) -> Vec<u8> {
        loop {
            if let Message::Binary(data) = next_message(ws).await {
                return data;
            }
        }
    }

    async fn send_json(ws: &mut Client, value: &Value) {
        ws.send(Message::Text(value.to_string())).await.unwrap();
    }

    #[tokio::test]
    async fn ip_room_pairing() {
        let addr = start_server(false).await;
        let mut a = connect_peer(addr, PEER_A).await;
        send_json(&mut a, &json!({"type": "join-ip-room"})).await;
        let peers = next_json(&mut a).await;
        assert_eq!(peers["type"], "peers");
        assert_eq!(peers["roomType"], "ip");
        assert_eq!(peers["roomId"], "127.0.0.1");
        assert_eq!(peers["peers"].as_array().unwrap().len(), 0);

        let mut b = connect_peer(addr, PEER_B).await;
        send_json(&mut b, &json!({"type": "join-ip-room"})).await;
        let peers = next_json(&mut b).await;
        assert_eq!(peers["type"], "peers");
        assert_eq!(peers["peers"].as_array().unwrap().len(), 1);
        assert_eq!(peers["peers"][0]["id"], PEER_A);

        let joined = next_json(&mut a).await;
        assert_eq!(joined["type"], "peer-joined");
        assert_eq!(joined["peer"]["id"], PEER_B);
        assert_eq!(joined["peer"]["rtcSupported"], true);
        assert_eq!(joined["roomId"], "127.0.0.1");
    }

    #[tokio::test]
    async fn pair_device_roundtrip() {
        let addr = start_server(false).await;
        let mut a = connect_peer(addr, PEER_A).await;
        let mut b = connect_peer(addr, PEER_B).await;

        send_json(&mut a, &json!({"type": "pair-device-initiate"})).await;
        let initiated = next_json(&mut a).await;
        assert_eq!(initiated["type"], "pair-device-initiated");
        let key = initiated["pairKey"].as_str().unwrap().to_string();
        assert_eq!(key.len(), 6);
        assert!(key.bytes().all(|b| b.is_ascii_digit()));
        let secret = initiated["roomSecret"].as_str().unwrap().to_string();
        assert_eq!(secret.len(), 256);
        assert_eq!(next_json(&mut a).await["type"], "peers");

        send_json(&mut b, &json!({"type": "pair-device-join", "pairKey": key.as_str()})).await;
        let b_joined = next_json(&mut b).await;
        assert_eq!(b_joined["type"], "pair-device-joined");
        assert_eq!(b_joined["roomSecret"], secret.as_str());
        assert_eq!(b_joined["peerId"], PEER_A);
        assert_eq!(next_json(&mut b).await["type"], "peers");

        let a_joined = next_json(&mut a).await;
        assert_eq!(a_joined["type"], "pair-device-joined");
        assert_eq!(a_joined["peerId"], PEER_B);
        assert_eq!(next_json(&mut a).await["type"], "peer-joined");
    }

    #[tokio::test]
    async fn self_pair_is_rejected() {
        let addr = start_server(false).await;
        let mut a = connect_peer(addr, PEER_A).await;

        send_json(&mut a, &json!({"type": "pair-device-initiate"})).await;
        let initiated = next_json(&mut a).await;
        let key = initiated["pairKey"].as_str().unwrap().to_string();
        assert_eq!(next_json(&mut a).await["type"], "peers");

        send_json(&mut a, &json!({"type": "pair-device-join", "pairKey": key.as_str()})).await;
        assert_eq!(
            next_json(&mut a).await["type"],
            "pair-device-join-key-invalid"
        );

        // the key survived the refused attempt: a second device can pair
        let mut b = connect_peer(addr, PEER_B).await;
        send_json(&mut b, &json!({"type": "pair-device-join", "pairKey": key.as_str()})).await;
        assert_eq!(next_json(&mut b).await["type"], "pair-device-joined");
    }

    #[tokio::test]
    async fn signal_relay_strips_to_and_tags_sender() {
        let addr = start_server(false).await;
        let mut a = connect_peer(addr, PEER_A).await;
        let mut b = connect_peer(addr, PEER_B).await;
        send_json(&mut a, &json!({"type": "join-ip-room"})).await;
        next_json(&mut a).await;
        send_json(&mut b, &json!({"type": "join-ip-room"})).await;
        next_json(&mut b).await;
        next_json(&mut a).await; // peer-joined

        send_json(
            &mut a,
            &json!({"type": "signal", "roomType": "ip", "to": PEER_B, "payload": "x"}),
        )
        .await;
        let relayed = next_json(&mut b).await;
        assert_eq!(
            relayed,
            json!({
                "type": "signal",
                "roomType": "ip",
                "payload": "x",
                "sender": {"id": PEER_A, "rtcSupported": true},
            })
        );
    }

    #[tokio::test]
    async fn binary_relay_forwards_payload() {
        let addr = start_server(true).await;
        let mut a = connect_peer(addr, PEER_A).await;
        let mut b = connect_peer(addr, PEER_B).await;
        send_json(&mut a, &json!({"type": "join-ip-room"})).await;
        next_json(&mut a).await;
        send_json(&mut b, &json!({"type": "join-ip-room"})).await;
        next_json(&mut b).await;
        next_json(&mut a).await; // peer-joined

        let frame = RelayFrame::encode(PEER_B, &RelayRoute::Ip, b"HELLO");
        a.send(Message::Binary(frame)).await.unwrap();
        assert_eq!(next_binary(&mut b).await, b"HELLO");
    }

    #[tokio::test]
    async fn silent_peer_is_disconnected() {
        let addr = start_server(false).await;
        let mut a = connect_peer(addr, PEER_A).await;
        let mut b = connect_peer(addr, PEER_B).await;
        send_json(&mut a, &json!({"type": "join-ip-room"})).await;
        next_json(&mut a).await;
        send_json(&mut b, &json!({"type": "join-ip-room"})).await;
        next_json(&mut b).await;

        // B never answers pings; A keeps ponging inside next_json
        let left = timeout(Duration::from_secs(10), async {
            loop {
                let msg = next_json(&mut a).await;
                if msg["type"] == "peer-left" {
                    return msg;
                }
            }
        })
        .await
        .expect("no peer-left within the heartbeat window");
        assert_eq!(left["peerId"], PEER_B);
        assert_eq!(left["disconnect"], true);

        // and B's socket gets terminated by the hub
        let closed = timeout(Duration::from_secs(5), async {
            loop {
                match b.next().await {
                    None | Some(Ok(Message::Close(_))) | Some(Err(_)) => return true,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await
        .expect("socket not closed");
        assert!(closed);
    }

    #[tokio::test]
    async fn public_room_create_join_leave() {
        let addr = start_server(false).await;
        let mut a = connect_peer(addr, PEER_A).await;
        let mut b = connect_peer(addr, PEER_B).await;

        send_json(&mut a, &json!({"type": "create-public-room"})).await;
        let created = next_json(&mut a).await;
        assert_eq!(created["type"], "public-room-created");
        let room_id = created["roomId"].as_str().unwrap().to_string();
        assert_eq!(room_id.len(), 5);
        assert_eq!(next_json(&mut a).await["type"], "peers");

        send_json(
            &mut b,
            &json!({"type": "join-public-room", "publicRoomId": room_id.as_str()}),
        )
        .await;
        let peers = next_json(&mut b).await;
        assert_eq!(peers["type"], "peers");
        assert_eq!(peers["roomType"], "public-id");
        assert_eq!(peers["peers"][0]["id"], PEER_A);
        assert_eq!(next_json(&mut a).await["type"], "peer-joined");

        send_json(&mut b, &json!({"type": "leave-public-room"})).await;
        assert_eq!(next_json(&mut b).await["type"], "public-room-left");
        let left = next_json(&mut a).await;
        assert_eq!(left["type"], "peer-left");
        assert_eq!(left["disconnect"], false);

        // unknown room without createIfInvalid is refused
        send_json(
            &mut b,
            &json!({"type": "join-public-room", "publicRoomId": "qqqqq"}),
        )
        .await;
        assert_eq!(next_json(&mut b).await["type"], "public-room-id-invalid");
    }

    #[tokio::test]
    async fn reconnect_replays_leave_before_join() {
        let addr = start_server(false).await;
        let mut a = connect_peer(addr, PEER_A).await;
        let mut b = connect_peer(addr, PEER_B).await;
        send_json(&mut a, &json!({"type": "join-ip-room"})).await;
        next_json(&mut a).await;
        send_json(&mut b, &json!({"type": "join-ip-room"})).await;
        next_json(&mut b).await;
        next_json(&mut a).await; // peer-joined

        // same cookie, new socket: the observer sees the stale entry
        // leave before the fresh join, never two joins in a row
        let mut b2 = connect_peer(addr, PEER_B).await;
        send_json(&mut b2, &json!({"type": "join-ip-room"})).await;
        let left = next_json(&mut a).await;
        assert_eq!(left["type"], "peer-left");
        assert_eq!(left["peerId"], PEER_B);
        assert_eq!(left["disconnect"], false);
        let joined = next_json(&mut a).await;
        assert_eq!(joined["type"], "peer-joined");
        assert_eq!(joined["peer"]["id"], PEER_B);
    }

    #[tokio::test]
    async fn minted_ids_are_returned_via_set_cookie() {
        let addr = start_server(false).await;
        let request = format!("ws://{addr}/").into_client_request().unwrap();
        let (mut ws, response) = connect_async(request).await.unwrap();
        let cookie = response
            .headers()
            .get("set-cookie")
            .expect("missing set-cookie")
            .to_str()
            .unwrap();
        assert!(cookie.starts_with("peerid="));

        assert_eq!(next_json(&mut ws).await["type"], "ws-config");
        let hello = next_json(&mut ws).await;
        let peer_id = hello["peerId"].as_str().unwrap();
        assert!(beamdrop_core::is_peer_id(peer_id));
        assert!(cookie.contains(peer_id));
    }

    #[tokio::test]
    async fn explicit_disconnect_cleans_up() {
        let addr = start_server(false).await;
        let mut a = connect_peer(addr, PEER_A).await;
        let mut b = connect_peer(addr, PEER_B).await;
        send_json(&mut a, &json!({"type": "join-ip-room"})).await;
        next_json(&mut a).await;
        send_json(&mut b, &json!({"type": "join-ip-room"})).await;
        next_json(&mut b).await;
        next_json(&mut a).await; // peer-joined

        send_json(&mut b, &json!({"type": "disconnect"})).await;
        let left = next_json(&mut a).await;
        assert_eq!(left["type"], "peer-left");
        assert_eq!(left["peerId"], PEER_B);
        assert_eq!(left["disconnect"], true);
    }
}
