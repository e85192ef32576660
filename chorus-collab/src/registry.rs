//! Server-side room and membership registry.
//!
//! ```text
//!            ┌──────────────── SessionRegistry ────────────────┐
//! connect ──►│ rooms: name → Room                               │
//!            │   Room { document, broadcast, members (Mutex) }  │──► SnapshotStore
//! bytes ────►│ handle_message: relay verbatim, merge RoomState  │
//!            └──────────────────────────────────────────────────┘
//! ```
//!
//! Each room's `members` mutex is its serialization point: membership
//! changes, relays and document merges for one room happen while holding
//! it, so a merge never interleaves with another member's relay. Different
//! rooms never contend.
//!
//! Membership is announced by the registry itself: a new member triggers a
//! `Join` and a departing one a `Leave`. Control messages sent by clients
//! (`Init`, `Join`, `Leave`) are dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chorus_core::document::DocOp;
use chorus_core::{DocumentError, PlayerId, RoomDocument, WireError, UNASSIGNED};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};
use uuid::Uuid;

use crate::broadcast::{BroadcastGroup, Outbound};
use crate::config::ServerConfig;
use crate::protocol::WireMessage;
use crate::storage::{SnapshotStore, StoreConfig, StoreError};

/// Server-assigned ids stay below 2^24.
const ASSIGNED_ID_MASK: u32 = 0x00FF_FFFF;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("protocol error: {0}")]
    Protocol(#[from] WireError),

    #[error("document error: {0}")]
    Document(#[from] DocumentError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub dropped_messages: u64,
    pub active_rooms: usize,
    pub persisted_snapshots: u64,
}

/// Live counters behind [`ServerStats`].
#[derive(Default)]
struct StatCounters {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    total_messages: AtomicU64,
    total_bytes: AtomicU64,
    dropped_messages: AtomicU64,
    active_rooms: AtomicUsize,
    persisted_snapshots: AtomicU64,
}

impl StatCounters {
    fn snapshot(&self) -> ServerStats {
        ServerStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_messages: self.total_messages.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            dropped_messages: self.dropped_messages.load(Ordering::Relaxed),
            active_rooms: self.active_rooms.load(Ordering::Relaxed),
            persisted_snapshots: self.persisted_snapshots.load(Ordering::Relaxed),
        }
    }

    fn release_connections(&self, count: u64) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |active| {
                Some(active.saturating_sub(count))
            });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member {
    pub connection: Uuid,
    pub player_id: PlayerId,
}

pub struct Room {
    name: String,
    document: RoomDocument,
    broadcast: BroadcastGroup,
    members: Mutex<Vec<Member>>,
}

impl Room {
    fn new(name: &str, capacity: usize) -> Self {
        Self {
            name: name.to_string(),
            document: RoomDocument::new(),
            broadcast: BroadcastGroup::new(capacity),
            members: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn document(&self) -> &RoomDocument {
        &self.document
    }

    pub fn broadcast(&self) -> &BroadcastGroup {
        &self.broadcast
    }

    pub async fn member_ids(&self) -> Vec<PlayerId> {
        self.members.lock().await.iter().map(|m| m.player_id).collect()
    }

    /// `{ "name": ..., "state": <document json> }`
    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "state": self.document.to_json(),
        })
    }
}

/// One connection's place in a room, returned by [`SessionRegistry::connect`].
pub struct Membership {
    pub connection: Uuid,
    pub player_id: PlayerId,
    pub room: Arc<Room>,
    /// The `Init` message to send before anything else.
    pub init: WireMessage,
    /// Room traffic; skip items where [`Outbound::is_for`] is false.
    pub receiver: broadcast::Receiver<Outbound>,
}

pub struct SessionRegistry {
    config: ServerConfig,
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    store: Option<Arc<SnapshotStore>>,
    stats: StatCounters,
}

impl SessionRegistry {
    /// Build the registry, opening the snapshot store if one is configured.
    pub fn open(config: ServerConfig) -> Result<Self, RegistryError> {
        let store = match &config.storage_path {
            Some(path) => Some(Arc::new(SnapshotStore::open(StoreConfig::new(path))?)),
            None => None,
        };
        Ok(Self {
            config,
            rooms: RwLock::new(HashMap::new()),
            store,
            stats: StatCounters::default(),
        })
    }

    /// Registry with default settings and no persistence.
    pub fn in_memory() -> Self {
        Self {
            config: ServerConfig::default(),
            rooms: RwLock::new(HashMap::new()),
            store: None,
            stats: StatCounters::default(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Load every persisted room and create the configured initial rooms.
    /// Returns the number of rooms restored from storage.
    pub async fn recover(&self) -> Result<usize, RegistryError> {
        let mut recovered = 0;
        if let Some(store) = &self.store {
            let names = store.list_rooms()?;
            for name in &names {
                self.get_or_create_room(name).await?;
                recovered += 1;
            }
            log::info!("Recovery complete: {recovered}/{} rooms restored", names.len());
        }
        for name in &self.config.initial_room_names {
            self.get_or_create_room(name).await?;
        }
        Ok(recovered)
    }

    pub async fn room(&self, name: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(name).cloned()
    }

    /// All rooms, ordered by name.
    pub async fn rooms(&self) -> Vec<Arc<Room>> {
        let mut rooms: Vec<Arc<Room>> = self.rooms.read().await.values().cloned().collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        rooms
    }

    /// Look up a room, creating it on first reference. A new room starts from
    /// its persisted snapshot if there is one, otherwise from the configured
    /// initial state.
    pub async fn get_or_create_room(&self, name: &str) -> Result<Arc<Room>, RegistryError> {
        if let Some(room) = self.rooms.read().await.get(name) {
            return Ok(room.clone());
        }

        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(name) {
            return Ok(room.clone());
        }

        let room = Arc::new(Room::new(name, self.config.broadcast_capacity));
        let snapshot = match &self.store {
            Some(store) => store.load_snapshot(name)?,
            None => None,
        };
        match snapshot {
            Some(snapshot) => {
                room.document.apply_update(&snapshot)?;
                log::info!("Loaded persisted snapshot for room {name}");
            }
            None => self.seed(&room.document)?,
        }

        rooms.insert(name.to_string(), room.clone());
        self.stats.active_rooms.store(rooms.len(), Ordering::Relaxed);
        drop(rooms);
        log::info!("Room {name} created");
        Ok(room)
    }

    fn seed(&self, document: &RoomDocument) -> Result<(), RegistryError> {
        let Some(Value::Object(state)) = &self.config.initial_room_state else {
            return Ok(());
        };
        let mut ops = Vec::new();
        for (root, value) in state {
            match value {
                Value::Array(items) => ops.extend(items.iter().map(|item| DocOp::Push {
                    array: root.clone(),
                    value: item.clone(),
                })),
                Value::Object(entries) => ops.extend(entries.iter().map(|(key, value)| DocOp::Set {
                    map: root.clone(),
                    key: key.clone(),
                    value: value.clone(),
                })),
                other => log::warn!("Ignoring initial state '{root}': {other} is not a map or array"),
            }
        }
        if !ops.is_empty() {
            document.transact(&ops)?;
        }
        Ok(())
    }

    /// Register a new connection in `room_name`.
    ///
    /// `requested` is kept if it is non-zero and free, otherwise a random
    /// id is assigned. The new member is announced with a `Join` to everyone
    /// else in the room.
    pub async fn connect(
        &self,
        room_name: &str,
        requested: PlayerId,
    ) -> Result<Membership, RegistryError> {
        let room = self.get_or_create_room(room_name).await?;
        let connection = Uuid::new_v4();

        let mut members = room.members.lock().await;
        let taken = |id: PlayerId| members.iter().any(|m| m.player_id == id);
        let player_id = if requested != UNASSIGNED && !taken(requested) {
            requested
        } else {
            if requested != UNASSIGNED {
                log::warn!("Player id {requested} already in room {room_name}, reassigning");
            }
            loop {
                let candidate = Uuid::new_v4().as_u128() as u32 & ASSIGNED_ID_MASK;
                if candidate != UNASSIGNED && !taken(candidate) {
                    break candidate;
                }
            }
        };

        let receiver = room.broadcast.subscribe();
        let init = WireMessage::Init {
            local_id: player_id,
            peer_ids: members.iter().map(|m| m.player_id).collect(),
            room_snapshot: room.document.encode_snapshot(),
        };
        members.push(Member {
            connection,
            player_id,
        });
        room.broadcast
            .send_message(Some(connection), &WireMessage::Join { id: player_id })?;
        let member_count = members.len();
        drop(members);

        self.stats.total_connections.fetch_add(1, Ordering::Relaxed);
        self.stats.active_connections.fetch_add(1, Ordering::Relaxed);
        log::info!("Player {player_id} joined room {room_name} ({member_count} members)");

        Ok(Membership {
            connection,
            player_id,
            room,
            init,
            receiver,
        })
    }

    /// Process one frame received from `membership`.
    ///
    /// Returns an error only for corrupt frames; the caller should close the
    /// connection in that case.
    pub async fn handle_message(
        &self,
        membership: &Membership,
        bytes: Vec<u8>,
    ) -> Result<(), RegistryError> {
        self.stats.total_messages.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_bytes
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        let room = &membership.room;

        let message = match WireMessage::decode(&bytes) {
            Ok(message) => Some(message),
            Err(WireError::UnknownMethod(method)) => {
                log::warn!(
                    "Unknown method {method} from player {} in room {}, relaying",
                    membership.player_id,
                    room.name
                );
                None
            }
            Err(e) => return Err(e.into()),
        };

        match message {
            Some(WireMessage::Init { .. } | WireMessage::Join { .. } | WireMessage::Leave { .. }) => {
                log::warn!(
                    "Dropping client-sent control message from player {}",
                    membership.player_id
                );
                self.stats.dropped_messages.fetch_add(1, Ordering::Relaxed);
            }
            Some(WireMessage::RoomState { update }) => {
                let members = room.members.lock().await;
                room.document.apply_update(&update)?;
                self.persist(room).await;
                room.broadcast
                    .relay(Some(membership.connection), Arc::new(bytes));
                drop(members);
            }
            _ => {
                let _members = room.members.lock().await;
                room.broadcast
                    .relay(Some(membership.connection), Arc::new(bytes));
            }
        }
        Ok(())
    }

    /// Remove a connection from its room and announce the departure.
    /// Returns `false` if the connection was no longer a member.
    pub async fn disconnect(&self, membership: &Membership) -> bool {
        let room = &membership.room;
        let mut members = room.members.lock().await;
        let Some(index) = members
            .iter()
            .position(|m| m.connection == membership.connection)
        else {
            return false;
        };
        let member = members.remove(index);
        if let Err(e) = room.broadcast.send_message(
            Some(membership.connection),
            &WireMessage::Leave {
                id: member.player_id,
            },
        ) {
            log::error!("Failed to announce leave of {}: {e}", member.player_id);
        }
        drop(members);

        self.stats.release_connections(1);
        log::info!("Player {} left room {}", member.player_id, room.name);
        true
    }

    /// Merge an externally supplied update into `room_name` (created if
    /// absent) and forward it to the room's members.
    pub async fn merge_update(&self, room_name: &str, update: &[u8]) -> Result<(), RegistryError> {
        let room = self.get_or_create_room(room_name).await?;
        let _members = room.members.lock().await;
        room.document.apply_update(update)?;
        self.persist(&room).await;
        room.broadcast.send_message(
            None,
            &WireMessage::RoomState {
                update: update.to_vec(),
            },
        )?;
        Ok(())
    }

    /// Discard a room: every member is disconnected and its snapshot deleted.
    /// Returns `false` if no such room exists.
    pub async fn delete_room(&self, room_name: &str) -> Result<bool, RegistryError> {
        let removed = {
            let mut rooms = self.rooms.write().await;
            let removed = rooms.remove(room_name);
            self.stats.active_rooms.store(rooms.len(), Ordering::Relaxed);
            removed
        };
        let Some(room) = removed else {
            return Ok(false);
        };

        let dropped = {
            let mut members = room.members.lock().await;
            room.broadcast.terminate();
            std::mem::take(&mut *members).len()
        };
        if let Some(store) = &self.store {
            store.delete(room_name)?;
        }

        self.stats.release_connections(dropped as u64);
        log::info!("Room {room_name} deleted, {dropped} members disconnected");
        Ok(true)
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.snapshot()
    }

    async fn persist(&self, room: &Room) {
        let Some(store) = &self.store else {
            return;
        };
        match store.save_snapshot(&room.name, &room.document.encode_snapshot()) {
            Ok(_) => {
                self.stats.persisted_snapshots.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => log::error!("Failed to persist snapshot for room {}: {e}", room.name),
        }
    }
}
