//! Room client: the connection state machine and its WebSocket driver.
//!
//! ```text
//!  Connecting ──open──► AwaitingInit ──Init──► Open ──close──► Closed
//! ```
//!
//! [`Session`] is the transport-free state machine. It consumes received
//! frames, keeps the remote player mirrors, the room document and the audio
//! decode pipelines, and queues outgoing frames on an [`Outbox`].
//! [`RoomClient`] connects a `Session` to a real socket.
//!
//! Newcomers learn existing state only from peers re-announcing themselves
//! when they see a `Join`; there is no server-side resend of player state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chorus_core::document::DocumentEvent;
use chorus_core::{
    ChangeOrigin, DocumentError, Lifecycle, ListenerId, Listeners, Player, PlayerError,
    PlayerId, Pose, RoomDocument, WireError, UNASSIGNED,
};
use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::audio::worker::{CodecOutput, DecoderHandle};
use crate::audio::{AudioFrame, AudioRelay, CaptureHandle, CodecError, KeyFramePolicy};
use crate::protocol::WireMessage;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection is not open")]
    NotOpen,

    #[error("microphone capture is already enabled")]
    CaptureAlreadyEnabled,

    #[error("microphone capture is not enabled")]
    CaptureNotEnabled,

    #[error("connection closed")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(#[from] WireError),

    #[error("document error: {0}")]
    Document(#[from] DocumentError),

    #[error("player error: {0}")]
    Player(#[from] PlayerError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    AwaitingInit,
    Open,
    Closed,
}

/// Room-level notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    Open { local_id: PlayerId },
    Join(PlayerId),
    Leave(PlayerId),
    Pose { id: PlayerId, pose: Pose },
    Metadata { id: PlayerId, keys: Vec<String> },
    Volume { id: PlayerId, level: f32 },
    EntityAdded(String),
    EntityRemoved(String),
    Error(String),
    Close,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base WebSocket URL, e.g. `ws://127.0.0.1:9090`.
    pub server_url: String,
    pub room: String,
    /// Requested id; 0 lets the server assign one.
    pub player_id: PlayerId,
    pub key_frame_policy: KeyFramePolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:9090".to_string(),
            room: "lobby".to_string(),
            player_id: UNASSIGNED,
            key_frame_policy: KeyFramePolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn url(&self) -> String {
        format!(
            "{}/{}?playerId={}",
            self.server_url.trim_end_matches('/'),
            self.room,
            self.player_id
        )
    }
}

/// Item queued for the socket writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Frame(Vec<u8>),
    Close,
}

/// Sending half of a connection. Frames are refused until the handshake
/// has completed.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Outgoing>,
    open: Arc<AtomicBool>,
}

impl Outbox {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let outbox = Self {
            tx,
            open: Arc::new(AtomicBool::new(false)),
        };
        (outbox, rx)
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn send(&self, message: &WireMessage) -> Result<(), ClientError> {
        if !self.is_open() {
            return Err(ClientError::NotOpen);
        }
        let bytes = message.encode()?;
        self.tx
            .send(Outgoing::Frame(bytes))
            .map_err(|_| ClientError::Closed)
    }

    /// Ask the writer to close the socket.
    fn shutdown(&self) {
        self.set_open(false);
        let _ = self.tx.send(Outgoing::Close);
    }
}

struct RemotePlayer {
    player: Arc<Player>,
    decoder: DecoderHandle,
}

/// Connection state machine for one room.
pub struct Session {
    state: ConnectionState,
    local: Player,
    players: HashMap<PlayerId, RemotePlayer>,
    document: RoomDocument,
    relay: AudioRelay,
    outbox: Outbox,
    events: Arc<Listeners<RoomEvent>>,
    capture: Option<CaptureHandle>,
    pending_edits: Arc<AtomicBool>,
    document_listener: ListenerId,
}

impl Session {
    /// Create a session in `Connecting`. Must be called inside a tokio
    /// runtime; decoders and meters are spawned as players appear.
    pub fn new(relay: AudioRelay, outbox: Outbox) -> Self {
        let document = RoomDocument::new();
        let events = Arc::new(Listeners::new());
        let pending_edits = Arc::new(AtomicBool::new(false));

        let document_listener = {
            let outbox = outbox.clone();
            let events = events.clone();
            let pending_edits = pending_edits.clone();
            document.subscribe(move |event| match event {
                DocumentEvent::Update {
                    update,
                    origin: ChangeOrigin::Local,
                } => {
                    if !outbox.is_open() {
                        pending_edits.store(true, Ordering::SeqCst);
                        return;
                    }
                    let message = WireMessage::RoomState {
                        update: update.clone(),
                    };
                    if let Err(e) = outbox.send(&message) {
                        log::warn!("Failed to send room update: {e}");
                    }
                }
                DocumentEvent::Update { .. } => {}
                DocumentEvent::EntityAdded(id) => events.notify(&RoomEvent::EntityAdded(id.clone())),
                DocumentEvent::EntityRemoved(id) => {
                    events.notify(&RoomEvent::EntityRemoved(id.clone()))
                }
            })
        };

        Self {
            state: ConnectionState::Connecting,
            local: Player::local(),
            players: HashMap::new(),
            document,
            relay,
            outbox,
            events,
            capture: None,
            pending_edits,
            document_listener,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn local(&self) -> &Player {
        &self.local
    }

    pub fn document(&self) -> &RoomDocument {
        &self.document
    }

    pub fn events(&self) -> Arc<Listeners<RoomEvent>> {
        self.events.clone()
    }

    /// Remote player ids, ascending.
    pub fn player_ids(&self) -> Vec<PlayerId> {
        let mut ids: Vec<PlayerId> = self.players.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn player(&self, id: PlayerId) -> Option<Arc<Player>> {
        self.players.get(&id).map(|remote| remote.player.clone())
    }

    pub fn transport_opened(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::AwaitingInit;
        }
    }

    /// Process one received frame. An error means the stream is corrupt and
    /// the connection should be closed.
    pub fn handle_incoming(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        let message = match WireMessage::decode(bytes) {
            Ok(message) => message,
            Err(WireError::UnknownMethod(method)) => {
                log::warn!("Ignoring message with unknown method {method}");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        match (self.state, message) {
            (
                ConnectionState::AwaitingInit,
                WireMessage::Init {
                    local_id,
                    peer_ids,
                    room_snapshot,
                },
            ) => self.open(local_id, peer_ids, &room_snapshot),
            (ConnectionState::Open, message) => self.dispatch(message),
            (state, message) => {
                log::warn!("Ignoring {:?} while {state:?}", message.method());
                Ok(())
            }
        }
    }

    fn open(
        &mut self,
        local_id: PlayerId,
        peer_ids: Vec<PlayerId>,
        snapshot: &[u8],
    ) -> Result<(), ClientError> {
        self.local.bind_id(local_id)?;
        for id in peer_ids {
            if id != local_id {
                self.add_player(id);
            }
        }
        self.document.apply_update(snapshot)?;

        self.state = ConnectionState::Open;
        self.outbox.set_open(true);
        log::info!("Room open as player {local_id}, {} peers", self.players.len());
        self.events.notify(&RoomEvent::Open { local_id });

        self.announce()?;
        self.flush_pending_edits()
    }

    fn flush_pending_edits(&self) -> Result<(), ClientError> {
        // Pre-open edits live in the local document; one snapshot carries them all.
        if self.pending_edits.swap(false, Ordering::SeqCst) {
            self.outbox.send(&WireMessage::RoomState {
                update: self.document.encode_snapshot(),
            })?;
        }
        Ok(())
    }

    fn dispatch(&mut self, message: WireMessage) -> Result<(), ClientError> {
        match message {
            WireMessage::Init { .. } => log::warn!("Ignoring repeated Init"),
            WireMessage::Join { id } => {
                if id == self.local.id() {
                    return Ok(());
                }
                if self.players.contains_key(&id) {
                    log::debug!("Player {id} joined twice");
                } else {
                    self.add_player(id);
                }
                self.announce()?;
            }
            WireMessage::Leave { id } => {
                self.remove_player(id);
            }
            WireMessage::Pose { id, pose } => match self.players.get(&id) {
                Some(remote) => {
                    remote.player.update_pose(pose);
                    self.events.notify(&RoomEvent::Pose { id, pose });
                }
                None => log::warn!("Pose for unknown player {id}"),
            },
            WireMessage::UserState { id, metadata_json } => {
                let Some(remote) = self.players.get(&id) else {
                    log::warn!("Metadata for unknown player {id}");
                    return Ok(());
                };
                let delta = match serde_json::from_str::<Value>(&metadata_json) {
                    Ok(Value::Object(delta)) => delta,
                    _ => {
                        log::warn!("Ignoring malformed metadata from player {id}");
                        return Ok(());
                    }
                };
                let keys = remote.player.merge_metadata(&delta);
                if !keys.is_empty() {
                    self.events.notify(&RoomEvent::Metadata { id, keys });
                }
            }
            message @ WireMessage::Audio { .. } => {
                let Some((id, chunk)) = self.relay.unframe(message) else {
                    return Ok(());
                };
                match self.players.get_mut(&id) {
                    Some(remote) => {
                        if let Err(e) = remote.decoder.decode(chunk) {
                            log::warn!("Dropping audio from player {id}: {e}");
                        }
                    }
                    None => log::warn!("Audio for unknown player {id}"),
                }
            }
            WireMessage::RoomState { update } => self.document.apply_update(&update)?,
        }
        Ok(())
    }

    /// Push the local pose and full metadata.
    fn announce(&self) -> Result<(), ClientError> {
        let id = self.local.id();
        self.outbox.send(&WireMessage::Pose {
            id,
            pose: self.local.pose(),
        })?;
        self.outbox.send(&WireMessage::UserState {
            id,
            metadata_json: self.local.metadata().to_json().to_string(),
        })
    }

    fn add_player(&mut self, id: PlayerId) {
        let player = Arc::new(Player::remote(id));
        let (decoder, outputs) = self.relay.open_decoder();
        tokio::spawn(meter(id, outputs, player.clone(), self.events.clone()));

        player.notify_lifecycle(Lifecycle::Join);
        self.players.insert(
            id,
            RemotePlayer {
                player,
                decoder,
            },
        );
        log::info!("Player {id} joined");
        self.events.notify(&RoomEvent::Join(id));
    }

    /// Returns `false` for an id that is not present.
    fn remove_player(&mut self, id: PlayerId) -> bool {
        let Some(remote) = self.players.remove(&id) else {
            log::info!("Leave for unknown player {id}, ignoring");
            return false;
        };
        // Dropping the handle stops the decoder worker, which ends the meter.
        drop(remote.decoder);
        remote.player.notify_lifecycle(Lifecycle::Leave);
        log::info!("Player {id} left");
        self.events.notify(&RoomEvent::Leave(id));
        true
    }

    /// Update the local pose, transmitting it once the connection is open.
    pub fn set_pose(&self, pose: Pose) -> Result<(), ClientError> {
        self.local.update_pose(pose);
        if self.is_open() {
            self.outbox.send(&WireMessage::Pose {
                id: self.local.id(),
                pose,
            })?;
        }
        Ok(())
    }

    /// Merge a local metadata delta, transmitting it once the connection is open.
    pub fn set_metadata(&self, delta: &Map<String, Value>) -> Result<Vec<String>, ClientError> {
        let keys = self.local.set_metadata(delta)?;
        if self.is_open() && !keys.is_empty() {
            self.outbox.send(&WireMessage::UserState {
                id: self.local.id(),
                metadata_json: Value::Object(delta.clone()).to_string(),
            })?;
        }
        Ok(keys)
    }

    /// Send an arbitrary message. Refused until the connection is open.
    pub fn send(&self, message: &WireMessage) -> Result<(), ClientError> {
        self.outbox.send(message)
    }

    /// Start the capture → encode → send loop for the local player.
    pub fn enable_capture<S>(&mut self, source: S) -> Result<(), ClientError>
    where
        S: Stream<Item = AudioFrame> + Send + Unpin + 'static,
    {
        if !self.is_open() {
            return Err(ClientError::NotOpen);
        }
        if self.capture.is_some() {
            return Err(ClientError::CaptureAlreadyEnabled);
        }

        let id = self.local.id();
        let relay = self.relay.clone();
        let outbox = self.outbox.clone();
        let encoder = self.relay.open_encoder();
        self.capture = Some(CaptureHandle::start(source, encoder, move |chunk| {
            match outbox.send(&relay.frame(id, chunk)) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("Stopping capture: {e}");
                    false
                }
            }
        }));
        log::info!("Capture enabled for player {id}");
        Ok(())
    }

    /// Detach the running capture loop so the caller can stop it.
    pub fn take_capture(&mut self) -> Result<CaptureHandle, ClientError> {
        self.capture.take().ok_or(ClientError::CaptureNotEnabled)
    }

    /// Transport is gone: drop every remote player and hand back any running
    /// capture loop. Calling this again has no effect.
    pub fn transport_closed(&mut self) -> Option<CaptureHandle> {
        if self.state == ConnectionState::Closed {
            return None;
        }
        self.state = ConnectionState::Closed;
        self.outbox.set_open(false);
        for (_, remote) in self.players.drain() {
            drop(remote.decoder);
            remote.player.notify_lifecycle(Lifecycle::Leave);
        }
        self.document.unsubscribe(self.document_listener);
        log::info!("Room connection closed");
        self.events.notify(&RoomEvent::Close);
        self.capture.take()
    }
}

/// Publish the level of every decoded frame as the player's volume.
async fn meter(
    id: PlayerId,
    mut outputs: mpsc::UnboundedReceiver<CodecOutput>,
    player: Arc<Player>,
    events: Arc<Listeners<RoomEvent>>,
) {
    let volume = player.volume();
    while let Some(output) = outputs.recv().await {
        match output {
            CodecOutput::Decoded(frame) => {
                let level = frame.rms();
                volume.set(level);
                events.notify(&RoomEvent::Volume { id, level });
            }
            CodecOutput::Error(e) => log::warn!("Decoder for player {id} failed: {e}"),
        }
    }
    log::debug!("Meter for player {id} stopped");
}

/// Hand queued session events to the client's listeners, outside any
/// session lock.
async fn deliver(
    mut queued: mpsc::UnboundedReceiver<RoomEvent>,
    listeners: Arc<Listeners<RoomEvent>>,
) {
    while let Some(event) = queued.recv().await {
        listeners.notify(&event);
    }
    log::debug!("Event delivery stopped");
}

/// A live connection to one room.
pub struct RoomClient {
    session: Arc<Mutex<Session>>,
    listeners: Arc<Listeners<RoomEvent>>,
    document: RoomDocument,
    outbox: Outbox,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl RoomClient {
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let relay = AudioRelay::new(
            Arc::new(crate::audio::codec::PcmCodec::default()),
            config.key_frame_policy,
        );
        Self::connect_with(config, relay).await
    }

    /// Connect with a specific audio relay (codec and key-frame policy).
    pub async fn connect_with(config: ClientConfig, relay: AudioRelay) -> Result<Self, ClientError> {
        let url = config.url();
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        log::info!("Connected to {url}");
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let (outbox, mut outgoing) = Outbox::new();
        let mut session = Session::new(relay, outbox.clone());
        session.transport_opened();
        let events = session.events();
        let document = session.document().clone();

        // Listeners run on their own task, never under the session lock.
        let (queue, queued) = mpsc::unbounded_channel();
        events.subscribe(move |event: &RoomEvent| {
            let _ = queue.send(event.clone());
        });
        let listeners = Arc::new(Listeners::new());
        tokio::spawn(deliver(queued, listeners.clone()));
        let session = Arc::new(Mutex::new(session));

        let writer = tokio::spawn(async move {
            while let Some(item) = outgoing.recv().await {
                let result = match item {
                    Outgoing::Frame(bytes) => ws_sender.send(Message::Binary(bytes.into())).await,
                    Outgoing::Close => {
                        let _ = ws_sender.send(Message::Close(None)).await;
                        break;
                    }
                };
                if let Err(e) = result {
                    log::warn!("Send failed: {e}");
                    break;
                }
            }
        });

        let reader = {
            let session = session.clone();
            let events = events.clone();
            let outbox = outbox.clone();
            tokio::spawn(async move {
                while let Some(msg) = ws_receiver.next().await {
                    match msg {
                        Ok(Message::Binary(data)) => {
                            let result = lock(&session).handle_incoming(&data);
                            if let Err(e) = result {
                                log::error!("Closing connection: {e}");
                                events.notify(&RoomEvent::Error(e.to_string()));
                                break;
                            }
                        }
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            log::warn!("Socket error: {e}");
                            events.notify(&RoomEvent::Error(e.to_string()));
                            break;
                        }
                    }
                }
                outbox.shutdown();
                let capture = lock(&session).transport_closed();
                if let Some(capture) = capture {
                    if let Err(e) = capture.stop().await {
                        log::warn!("Capture did not stop cleanly: {e}");
                    }
                }
            })
        };

        Ok(Self {
            session,
            listeners,
            document,
            outbox,
            reader,
            writer,
        })
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.session).state()
    }

    pub fn local_id(&self) -> PlayerId {
        lock(&self.session).local().id()
    }

    pub fn player_ids(&self) -> Vec<PlayerId> {
        lock(&self.session).player_ids()
    }

    pub fn player(&self, id: PlayerId) -> Option<Arc<Player>> {
        lock(&self.session).player(id)
    }

    /// The room's shared document. Local edits are sent to the room.
    pub fn document(&self) -> &RoomDocument {
        &self.document
    }

    /// Callbacks run in order on the client's event delivery task. They may
    /// call back into the client but must not block.
    pub fn subscribe<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&RoomEvent) + Send + Sync + 'static,
    {
        self.listeners.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    pub fn set_pose(&self, pose: Pose) -> Result<(), ClientError> {
        lock(&self.session).set_pose(pose)
    }

    pub fn set_metadata(&self, delta: &Map<String, Value>) -> Result<Vec<String>, ClientError> {
        lock(&self.session).set_metadata(delta)
    }

    pub fn send(&self, message: &WireMessage) -> Result<(), ClientError> {
        lock(&self.session).send(message)
    }

    pub fn enable_mic<S>(&self, source: S) -> Result<(), ClientError>
    where
        S: Stream<Item = AudioFrame> + Send + Unpin + 'static,
    {
        lock(&self.session).enable_capture(source)
    }

    /// Stop the capture loop and wait until the encoder is released.
    /// Returns the number of frames that were captured.
    pub async fn disable_mic(&self) -> Result<u64, ClientError> {
        let capture = lock(&self.session).take_capture()?;
        Ok(capture.stop().await?)
    }

    /// Close the socket and wait for the connection to wind down.
    pub async fn close(self) -> Result<(), ClientError> {
        self.outbox.shutdown();
        let _ = self.writer.await;
        if let Err(e) = self.reader.await {
            log::warn!("Reader task failed: {e}");
        }
        Ok(())
    }
}

fn lock(session: &Mutex<Session>) -> std::sync::MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}
