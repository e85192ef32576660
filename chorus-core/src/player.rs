//! Per-participant replicated state: pose, metadata and observed volume.
//!
//! A [`Player`] is the same shape whether it mirrors a remote participant
//! or represents the local one; `is_local` marks the instance whose changes
//! are pushed onto the wire by the owning session.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::events::{ListenerId, Listeners};
use crate::wire::WireError;

/// Player identifier. Zero means "not yet assigned".
pub type PlayerId = u32;

/// The unassigned sentinel.
pub const UNASSIGNED: PlayerId = 0;

/// Number of floats in a serialized pose (position, quaternion, scale).
pub const POSE_FLOATS: usize = 3 + 4 + 3;

/// Serialized pose size in bytes.
pub const POSE_BYTES: usize = POSE_FLOATS * 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlayerError {
    #[error("player id 0 is reserved for unassigned players")]
    ZeroId,

    #[error("player id already bound to {current}, refusing {requested}")]
    IdAlreadyBound {
        current: PlayerId,
        requested: PlayerId,
    },

    #[error("metadata key '{0}' is reserved")]
    ReservedKey(String),
}

/// Position, orientation quaternion and scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: [f32; 3],
    pub quaternion: [f32; 4],
    pub scale: [f32; 3],
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: [0.0, 0.0, 0.0],
            quaternion: [0.0, 0.0, 0.0, 1.0],
            scale: [1.0, 1.0, 1.0],
        }
    }
}

impl Pose {
    pub fn new(position: [f32; 3], quaternion: [f32; 4], scale: [f32; 3]) -> Self {
        Self {
            position,
            quaternion,
            scale,
        }
    }

    pub fn to_bytes(&self) -> [u8; POSE_BYTES] {
        let mut out = [0u8; POSE_BYTES];
        let floats = self
            .position
            .iter()
            .chain(self.quaternion.iter())
            .chain(self.scale.iter());
        for (chunk, value) in out.chunks_exact_mut(4).zip(floats) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        out
    }

    /// Parse exactly ten little-endian floats. Any other length is rejected
    /// so a malformed pose is never partially applied.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() != POSE_BYTES {
            return Err(WireError::InvalidPose(bytes.len()));
        }
        let mut floats = [0f32; POSE_FLOATS];
        for (value, chunk) in floats.iter_mut().zip(bytes.chunks_exact(4)) {
            *value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(Self {
            position: [floats[0], floats[1], floats[2]],
            quaternion: [floats[3], floats[4], floats[5], floats[6]],
            scale: [floats[7], floats[8], floats[9]],
        })
    }
}

/// String-keyed metadata, last writer wins per key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata(Map<String, Value>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Merge `delta` into this map and return the keys it carried.
    pub fn merge(&mut self, delta: &Map<String, Value>) -> Vec<String> {
        let mut keys = Vec::with_capacity(delta.len());
        for (key, value) in delta {
            self.0.insert(key.clone(), value.clone());
            keys.push(key.clone());
        }
        keys
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<Map<String, Value>> for Metadata {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Locally observed playback level. Never transmitted.
#[derive(Debug, Default)]
pub struct Volume {
    bits: AtomicU32,
    listeners: Listeners<f32>,
}

impl Volume {
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
        self.listeners.notify(&value);
    }

    pub fn subscribe<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&f32) + Send + Sync + 'static,
    {
        self.listeners.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }
}

/// Join/leave notification raised on a player's own lifecycle registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Join,
    Leave,
}

/// Metadata change notification: the keys that were written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataUpdate {
    pub keys: Vec<String>,
}

pub struct Player {
    id: PlayerId,
    is_local: bool,
    pose: Mutex<Pose>,
    metadata: Mutex<Metadata>,
    volume: Arc<Volume>,
    pose_listeners: Listeners<Pose>,
    metadata_listeners: Listeners<MetadataUpdate>,
    lifecycle: Listeners<Lifecycle>,
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("id", &self.id)
            .field("is_local", &self.is_local)
            .field("pose", &self.pose())
            .finish()
    }
}

impl Player {
    fn with(id: PlayerId, is_local: bool) -> Self {
        Self {
            id,
            is_local,
            pose: Mutex::new(Pose::default()),
            metadata: Mutex::new(Metadata::new()),
            volume: Arc::new(Volume::default()),
            pose_listeners: Listeners::new(),
            metadata_listeners: Listeners::new(),
            lifecycle: Listeners::new(),
        }
    }

    /// Mirror of a remote participant.
    pub fn remote(id: PlayerId) -> Self {
        Self::with(id, false)
    }

    /// The local participant, unassigned until the handshake binds an id.
    pub fn local() -> Self {
        Self::with(UNASSIGNED, true)
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    pub fn is_local(&self) -> bool {
        self.is_local
    }

    pub fn is_bound(&self) -> bool {
        self.id != UNASSIGNED
    }

    /// Bind the player id. Rebinding to the same id is accepted; any other
    /// change of a non-zero id is refused.
    pub fn bind_id(&mut self, id: PlayerId) -> Result<(), PlayerError> {
        if id == UNASSIGNED {
            return Err(PlayerError::ZeroId);
        }
        if self.id != UNASSIGNED && self.id != id {
            return Err(PlayerError::IdAlreadyBound {
                current: self.id,
                requested: id,
            });
        }
        self.id = id;
        Ok(())
    }

    pub fn pose(&self) -> Pose {
        *self.pose.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn update_pose(&self, pose: Pose) {
        *self.pose.lock().unwrap_or_else(PoisonError::into_inner) = pose;
        self.pose_listeners.notify(&pose);
    }

    pub fn metadata(&self) -> Metadata {
        self.metadata
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Merge a metadata delta and return the keys that were written.
    /// An empty delta raises no event.
    pub fn merge_metadata(&self, delta: &Map<String, Value>) -> Vec<String> {
        let keys = self
            .metadata
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .merge(delta);
        if !keys.is_empty() {
            self.metadata_listeners.notify(&MetadataUpdate { keys: keys.clone() });
        }
        keys
    }

    /// Local edit of metadata. The `id` key belongs to the player itself
    /// and cannot be written through metadata.
    pub fn set_metadata(&self, delta: &Map<String, Value>) -> Result<Vec<String>, PlayerError> {
        if delta.contains_key("id") {
            return Err(PlayerError::ReservedKey("id".into()));
        }
        Ok(self.merge_metadata(delta))
    }

    pub fn volume(&self) -> Arc<Volume> {
        self.volume.clone()
    }

    pub fn on_pose<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&Pose) + Send + Sync + 'static,
    {
        self.pose_listeners.subscribe(callback)
    }

    pub fn on_metadata<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&MetadataUpdate) + Send + Sync + 'static,
    {
        self.metadata_listeners.subscribe(callback)
    }

    pub fn on_lifecycle<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&Lifecycle) + Send + Sync + 'static,
    {
        self.lifecycle.subscribe(callback)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.pose_listeners.unsubscribe(id)
            || self.metadata_listeners.unsubscribe(id)
            || self.lifecycle.unsubscribe(id)
    }

    pub fn notify_lifecycle(&self, event: Lifecycle) {
        self.lifecycle.notify(&event);
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "pose": self.pose(),
            "metadata": self.metadata().to_json(),
            "volume": self.volume.get(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_default_pose_is_identity() {
        let pose = Pose::default();
        assert_eq!(pose.position, [0.0; 3]);
        assert_eq!(pose.quaternion, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(pose.scale, [1.0; 3]);
    }

    #[test]
    fn test_pose_bytes_roundtrip() {
        let pose = Pose::new([1.0, 2.0, 3.0], [0.0, 0.5, 0.0, 0.5], [2.0, 2.0, 2.0]);
        let bytes = pose.to_bytes();
        assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
        assert_eq!(Pose::from_bytes(&bytes).unwrap(), pose);
    }

    #[test]
    fn test_pose_wrong_length_is_rejected() {
        let bytes = Pose::default().to_bytes();
        assert_eq!(Pose::from_bytes(&bytes[..36]), Err(WireError::InvalidPose(36)));
        let mut longer = bytes.to_vec();
        longer.extend_from_slice(&[0; 4]);
        assert_eq!(Pose::from_bytes(&longer), Err(WireError::InvalidPose(44)));
    }

    #[test]
    fn test_bind_id_is_write_once() {
        let mut player = Player::local();
        assert!(!player.is_bound());
        assert_eq!(player.bind_id(0), Err(PlayerError::ZeroId));

        player.bind_id(7).unwrap();
        player.bind_id(7).unwrap();
        assert_eq!(
            player.bind_id(8),
            Err(PlayerError::IdAlreadyBound {
                current: 7,
                requested: 8
            })
        );
        assert_eq!(player.id(), 7);
    }

    #[test]
    fn test_metadata_merges_instead_of_replacing() {
        let player = Player::remote(7);
        player.merge_metadata(&obj(json!({"name": "Amy"})));
        player.merge_metadata(&obj(json!({"score": 5})));
        assert_eq!(player.metadata().to_json(), json!({"name": "Amy", "score": 5}));
    }

    #[test]
    fn test_set_metadata_rejects_id_key() {
        let player = Player::local();
        assert_eq!(
            player.set_metadata(&obj(json!({"id": 3, "name": "x"}))),
            Err(PlayerError::ReservedKey("id".into()))
        );
        assert!(player.metadata().as_map().is_empty());
    }

    #[test]
    fn test_metadata_event_carries_changed_keys() {
        let player = Player::remote(1);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        player.on_metadata(move |update| {
            s.lock().unwrap().push(update.keys.clone());
        });

        player.merge_metadata(&obj(json!({"a": 1, "b": 2})));
        player.merge_metadata(&Map::new());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_pose_and_volume_listeners() {
        let player = Player::remote(2);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = player.on_pose(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        player.update_pose(Pose::default());
        assert!(player.off(id));
        player.update_pose(Pose::default());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let volume = player.volume();
        volume.set(0.25);
        assert_eq!(player.volume().get(), 0.25);
    }

    #[test]
    fn test_off_removes_only_the_named_listener() {
        let player = Player::remote(3);
        let pose_hits = Arc::new(AtomicUsize::new(0));
        let meta_hits = Arc::new(AtomicUsize::new(0));
        let h = pose_hits.clone();
        player.on_pose(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        let h = meta_hits.clone();
        let meta_id = player.on_metadata(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert!(player.off(meta_id));
        assert!(!player.off(meta_id));
        player.update_pose(Pose::default());
        player.merge_metadata(&obj(json!({"name": "Amy"})));

        assert_eq!(pose_hits.load(Ordering::SeqCst), 1);
        assert_eq!(meta_hits.load(Ordering::SeqCst), 0);
    }
}
