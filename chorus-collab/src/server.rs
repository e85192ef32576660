//! WebSocket room server.
//!
//! ```text
//! ws://host:port/<room>?playerId=<id>
//!
//! Client A ──┐                          ┌──► Client B
//!             ├── SessionRegistry ── Room ┤
//! Client C ──┘        │                 └──► Client C
//!                     └── SnapshotStore (RocksDB)
//! ```
//!
//! Every accepted connection first receives an `Init`, then runs a select
//! loop between its socket and its room's fan-out channel until either side
//! closes.
//!
//! A member whose fan-out receiver falls behind has missed room traffic it
//! cannot recover in place, so it is closed with [`CloseCode::Again`] and is
//! expected to reconnect for a fresh `Init`.

use std::net::SocketAddr;
use std::sync::Arc;

use chorus_core::{PlayerId, UNASSIGNED};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::tungstenite::error::Error as WsError;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::broadcast::Outbound;
use crate::registry::{Membership, SessionRegistry};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub struct RoomServer {
    registry: Arc<SessionRegistry>,
}

impl RoomServer {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Recover persisted rooms, bind the configured address and serve
    /// connections until an accept error occurs.
    pub async fn run(&self) -> Result<(), BoxError> {
        let recovered = self.registry.recover().await?;
        if recovered > 0 {
            log::info!("Recovered {recovered} rooms from persistent storage");
        }

        let bind_addr = self.registry.config().bind_addr;
        let listener = TcpListener::bind(bind_addr).await?;
        log::info!("Room server listening on {bind_addr}");
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let registry = self.registry.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, registry).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<SessionRegistry>,
    ) -> Result<(), BoxError> {
        let mut target = None;
        let config = websocket_config(registry.config().max_message_bytes);
        let ws_stream = tokio_tungstenite::accept_hdr_async_with_config(
            stream,
            |request: &Request, response: Response| {
                match parse_target(request.uri().path(), request.uri().query()) {
                    Some(parsed) => {
                        target = Some(parsed);
                        Ok(response)
                    }
                    None => {
                        log::warn!("Rejecting {addr}: no room at {}", request.uri());
                        Err(not_found())
                    }
                }
            },
            Some(config),
        )
        .await?;
        let Some((room, requested)) = target else {
            return Ok(());
        };

        let mut membership = registry.connect(&room, requested).await?;
        log::info!(
            "WebSocket connection established from {addr} as player {} in room {room}",
            membership.player_id
        );

        let outcome = pump(&registry, &mut membership, ws_stream).await;
        registry.disconnect(&membership).await;
        log::info!("Connection from {addr} closed");
        outcome
    }
}

/// Frames and messages above `max_message_bytes` are refused while reading.
fn websocket_config(max_message_bytes: usize) -> WebSocketConfig {
    WebSocketConfig::default()
        .max_message_size(Some(max_message_bytes))
        .max_frame_size(Some(max_message_bytes))
}

async fn pump<T>(
    registry: &SessionRegistry,
    membership: &mut Membership,
    ws_stream: WebSocketStream<T>,
) -> Result<(), BoxError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    ws_sender
        .send(Message::Binary(membership.init.encode()?.into()))
        .await?;

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        if let Err(e) = registry.handle_message(membership, data.to_vec()).await {
                            log::error!("Closing player {}: {e}", membership.player_id);
                            close(&mut ws_sender, CloseCode::Protocol, "malformed message").await;
                            return Err(e.into());
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        ws_sender.send(Message::Pong(payload)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(WsError::Capacity(e))) => {
                        log::error!("Player {} exceeded the size limit: {e}", membership.player_id);
                        close(&mut ws_sender, CloseCode::Size, "message too large").await;
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        log::warn!("Socket error for player {}: {e}", membership.player_id);
                        break;
                    }
                }
            }

            item = membership.receiver.recv() => {
                match item {
                    Ok(item) if !item.is_for(membership.connection) => {}
                    Ok(Outbound::Frame { bytes, .. }) => {
                        log::trace!("Relaying {} bytes to player {}", bytes.len(), membership.player_id);
                        ws_sender.send(Message::Binary(bytes.to_vec().into())).await?;
                    }
                    Ok(Outbound::Terminate) => {
                        close(&mut ws_sender, CloseCode::Away, "room deleted").await;
                        break;
                    }
                    Err(RecvError::Lagged(n)) => {
                        log::warn!(
                            "Player {} lagged by {n} messages, closing for resync",
                            membership.player_id
                        );
                        close(&mut ws_sender, CloseCode::Again, "lagged behind room").await;
                        break;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
    Ok(())
}

async fn close<S>(sender: &mut S, code: CloseCode, reason: &'static str)
where
    S: Sink<Message> + Unpin,
{
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = sender.send(Message::Close(Some(frame))).await;
}

fn not_found() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("unknown room".to_string()));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

/// Room name and requested player id from a connection URL. The path must be
/// exactly one segment of ASCII letters, digits, `-` or `_`. A missing or
/// invalid `playerId` requests a server-assigned id.
fn parse_target(path: &str, query: Option<&str>) -> Option<(String, PlayerId)> {
    let room = path.strip_prefix('/')?;
    if !is_room_name(room) {
        return None;
    }

    let requested = query
        .into_iter()
        .flat_map(|q| q.split('&'))
        .find_map(|pair| pair.strip_prefix("playerId="))
        .and_then(|value| value.parse::<PlayerId>().ok())
        .unwrap_or(UNASSIGNED);

    Some((room.to_string(), requested))
}

fn is_room_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use tokio::io::DuplexStream;
    use tokio::time::{timeout, Duration};
    use tokio_tungstenite::tungstenite::protocol::Role;

    async fn socket_pair(
        max_message_bytes: usize,
    ) -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(
            server_io,
            Role::Server,
            Some(websocket_config(max_message_bytes)),
        )
        .await;
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        (server, client)
    }

    async fn next_frame(client: &mut WebSocketStream<DuplexStream>) -> Option<Message> {
        timeout(Duration::from_secs(3), client.next())
            .await
            .expect("timed out reading socket")
            .and_then(|msg| msg.ok())
    }

    #[test]
    fn test_parse_target() {
        assert_eq!(
            parse_target("/lobby", Some("playerId=42")),
            Some(("lobby".to_string(), 42))
        );
        assert_eq!(
            parse_target("/lobby", Some("x=1&playerId=7")),
            Some(("lobby".to_string(), 7))
        );
        assert_eq!(parse_target("/lobby", None), Some(("lobby".to_string(), 0)));
        assert_eq!(
            parse_target("/lobby", Some("playerId=-3")),
            Some(("lobby".to_string(), 0))
        );
        assert_eq!(
            parse_target("/lobby", Some("playerId=abc")),
            Some(("lobby".to_string(), 0))
        );
    }

    #[test]
    fn test_parse_target_rejects_bad_paths() {
        assert_eq!(parse_target("/", None), None);
        assert_eq!(parse_target("", None), None);
        assert_eq!(parse_target("/rooms/lobby", None), None);
        assert_eq!(parse_target("lobby", None), None);
        assert_eq!(parse_target("/..", None), None);
        assert_eq!(parse_target("/my%20room", None), None);
        assert_eq!(parse_target("/caf\u{e9}", None), None);
        assert_eq!(parse_target("/a.b", None), None);
    }

    #[test]
    fn test_room_names_allow_letters_digits_dash_underscore() {
        assert_eq!(
            parse_target("/Room_1-b", Some("playerId=3")),
            Some(("Room_1-b".to_string(), 3))
        );
        assert!(is_room_name("LOBBY"));
        assert!(!is_room_name(""));
    }

    #[test]
    fn test_not_found_response() {
        let response = not_found();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_server_exposes_registry() {
        let registry = Arc::new(SessionRegistry::in_memory());
        let server = RoomServer::new(registry.clone());
        assert!(Arc::ptr_eq(server.registry(), &registry));
    }

    #[tokio::test]
    async fn test_lagging_member_is_closed_for_resync() {
        let config = ServerConfig {
            broadcast_capacity: 2,
            ..ServerConfig::default()
        };
        let registry = Arc::new(SessionRegistry::open(config).unwrap());
        let mut slow = registry.connect("r", 1).await.unwrap();
        let mut others = Vec::new();
        for id in 2..=5 {
            others.push(registry.connect("r", id).await.unwrap());
        }
        registry.disconnect(&others[0]).await;

        let (server, mut client) = socket_pair(1024).await;
        let pumping = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let outcome = pump(&registry, &mut slow, server).await;
                registry.disconnect(&slow).await;
                outcome.is_ok()
            })
        };

        assert!(matches!(next_frame(&mut client).await, Some(Message::Binary(_))));
        match next_frame(&mut client).await {
            Some(Message::Close(Some(frame))) => assert_eq!(frame.code, CloseCode::Again),
            other => panic!("expected close frame, got {other:?}"),
        }
        assert!(pumping.await.unwrap());
        let room = registry.room("r").await.unwrap();
        assert_eq!(room.member_ids().await, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_with_size_code() {
        let config = ServerConfig {
            max_message_bytes: 64,
            ..ServerConfig::default()
        };
        let registry = Arc::new(SessionRegistry::open(config).unwrap());
        let mut member = registry.connect("r", 1).await.unwrap();
        let (server, mut client) = socket_pair(registry.config().max_message_bytes).await;
        let pumping = tokio::spawn(async move { pump(&registry, &mut member, server).await.is_ok() });

        assert!(matches!(next_frame(&mut client).await, Some(Message::Binary(_))));
        client
            .send(Message::Binary(vec![7u8; 200].into()))
            .await
            .unwrap();
        match next_frame(&mut client).await {
            Some(Message::Close(Some(frame))) => assert_eq!(frame.code, CloseCode::Size),
            other => panic!("expected close frame, got {other:?}"),
        }
        assert!(pumping.await.unwrap());
    }
}
