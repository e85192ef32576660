//! # chorus-core: Shared state for real-time rooms
//!
//! Transport-independent building blocks used by both the room server and
//! the room client.
//!
//! ```text
//! ┌──────────────┐   fields    ┌──────────────┐
//! │ Player       │ ──────────► │ wire         │ ──► bytes
//! │ RoomDocument │ ◄────────── │ (LE codec)   │ ◄── bytes
//! └──────┬───────┘             └──────────────┘
//!        │ notify
//!        ▼
//! ┌──────────────┐
//! │ Listeners<E> │
//! └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`wire`]: Little-endian field codec, compact and tagged layouts
//! - [`events`]: Subscribe/unsubscribe/notify listener registries
//! - [`player`]: Pose, metadata and volume replicas
//! - [`document`]: Entity CRUD over a conflict-free shared document

pub mod wire;
pub mod events;
pub mod player;
pub mod document;

pub use wire::{Field, FieldKind, WireError};
pub use events::{ListenerId, Listeners};
pub use player::{
    Lifecycle, Metadata, MetadataUpdate, Player, PlayerError, PlayerId, Pose, Volume,
    POSE_BYTES, UNASSIGNED,
};
pub use document::{
    ChangeOrigin, DocOp, DocumentError, DocumentEvent, Entity, RoomDocument, SharedDocument,
    YrsDocument,
};
