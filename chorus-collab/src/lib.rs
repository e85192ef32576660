//! # chorus-collab: Networking layer for real-time rooms
//!
//! Carries players, voice and shared room state between participants
//! through a central relay server.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────────┐
//! │ RoomClient  │ ◄─────────────────► │ RoomServer      │
//! │ (Session)   │     LE wire codec   │ SessionRegistry │
//! └──────┬──────┘                     └────────┬────────┘
//!        │                                     │
//!        ▼                                     ▼
//! ┌─────────────┐                     ┌─────────────────┐
//! │ RoomDocument│                     │ RoomDocument    │
//! │ Players     │                     │ (authority)     │
//! │ AudioRelay  │                     └────────┬────────┘
//! └─────────────┘                              │
//!                                      ┌───────┴───────┐
//!                                      │ BroadcastGroup│
//!                                      │ SnapshotStore │
//!                                      └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: `WireMessage` catalog over the core wire codec
//! - [`audio`]: Codec workers, framing and the capture loop
//! - [`broadcast`]: Per-room fan-out
//! - [`registry`]: Rooms, membership and document merges
//! - [`server`]: WebSocket accept loop
//! - [`admin`]: Administrative HTTP endpoints
//! - [`client`]: Connection state machine and WebSocket driver
//! - [`storage`]: RocksDB snapshot persistence
//! - [`config`]: TOML server configuration

pub mod protocol;
pub mod audio;
pub mod broadcast;
pub mod registry;
pub mod server;
pub mod admin;
pub mod client;
pub mod storage;
pub mod config;

pub use protocol::{FrameKind, Method, WireMessage};
pub use audio::{AudioFrame, AudioRelay, CaptureHandle, CodecError, KeyFramePolicy};
pub use broadcast::{BroadcastGroup, BroadcastStats, Outbound};
pub use registry::{Membership, RegistryError, Room, ServerStats, SessionRegistry};
pub use server::RoomServer;
pub use client::{
    ClientConfig, ClientError, ConnectionState, Outbox, RoomClient, RoomEvent, Session,
};
pub use storage::{RoomMetadata, SnapshotStore, StoreConfig, StoreError};
pub use config::{ConfigError, ServerConfig};
