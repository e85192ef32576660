//! Room wire protocol.
//!
//! Every message starts with a 4-byte little-endian method discriminator
//! followed by a method-specific payload in the compact field layout:
//!
//! ```text
//! Init       │ 1 │ local_id u32 │ peers (len + u32 LE ids) │ snapshot (len + bytes) │
//! Join       │ 2 │ id u32 │
//! Leave      │ 3 │ id u32 │
//! Pose       │ 4 │ id u32 │ 10 × f32 (static, no prefix) │
//! Audio      │ 5 │ id u32 │ kind u32 │ timestamp f32 │ duration f32 │ payload (len + bytes) │
//! UserState  │ 6 │ id u32 │ metadata json (len + utf-8) │
//! RoomState  │ 7 │ update (len + bytes) │
//! ```
//!
//! Discriminator values are part of the deployment contract and must not
//! be renumbered.

use chorus_core::player::{PlayerId, Pose, POSE_BYTES};
use chorus_core::wire::{self, Field, FieldKind, WireError};

/// Method discriminators, numbered from 1 in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Method {
    Init = 1,
    Join = 2,
    Leave = 3,
    Pose = 4,
    Audio = 5,
    UserState = 6,
    RoomState = 7,
}

impl Method {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            1 => Self::Init,
            2 => Self::Join,
            3 => Self::Leave,
            4 => Self::Pose,
            5 => Self::Audio,
            6 => Self::UserState,
            7 => Self::RoomState,
            _ => return None,
        })
    }

    fn schema(self) -> &'static [FieldKind] {
        use FieldKind::*;
        match self {
            Self::Init => &[U32, U32, Bytes, Bytes],
            Self::Join | Self::Leave => &[U32, U32],
            Self::Pose => &[U32, U32, Static(POSE_BYTES)],
            Self::Audio => &[U32, U32, U32, F32, F32, Bytes],
            Self::UserState => &[U32, U32, Str],
            Self::RoomState => &[U32, Bytes],
        }
    }
}

/// Audio chunk dependency: key chunks decode on their own, delta chunks do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Key = 0,
    Delta = 1,
}

impl FrameKind {
    /// Zero is a key frame; every other value is treated as a delta frame.
    pub fn from_u32(value: u32) -> Self {
        if value == 0 {
            Self::Key
        } else {
            Self::Delta
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Init {
        local_id: PlayerId,
        peer_ids: Vec<PlayerId>,
        room_snapshot: Vec<u8>,
    },
    Join {
        id: PlayerId,
    },
    Leave {
        id: PlayerId,
    },
    Pose {
        id: PlayerId,
        pose: Pose,
    },
    Audio {
        id: PlayerId,
        kind: FrameKind,
        timestamp: f32,
        duration: f32,
        payload: Vec<u8>,
    },
    UserState {
        id: PlayerId,
        metadata_json: String,
    },
    RoomState {
        update: Vec<u8>,
    },
}

impl WireMessage {
    pub fn method(&self) -> Method {
        match self {
            Self::Init { .. } => Method::Init,
            Self::Join { .. } => Method::Join,
            Self::Leave { .. } => Method::Leave,
            Self::Pose { .. } => Method::Pose,
            Self::Audio { .. } => Method::Audio,
            Self::UserState { .. } => Method::UserState,
            Self::RoomState { .. } => Method::RoomState,
        }
    }

    /// The player a message is about, if any.
    pub fn player_id(&self) -> Option<PlayerId> {
        match self {
            Self::Init { local_id, .. } => Some(*local_id),
            Self::Join { id }
            | Self::Leave { id }
            | Self::Pose { id, .. }
            | Self::Audio { id, .. }
            | Self::UserState { id, .. } => Some(*id),
            Self::RoomState { .. } => None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let method = Field::U32(self.method() as u32);
        let fields = match self {
            Self::Init {
                local_id,
                peer_ids,
                room_snapshot,
            } => {
                let peers: Vec<u8> = peer_ids.iter().flat_map(|id| id.to_le_bytes()).collect();
                vec![
                    method,
                    Field::U32(*local_id),
                    Field::Bytes(peers),
                    Field::Bytes(room_snapshot.clone()),
                ]
            }
            Self::Join { id } | Self::Leave { id } => vec![method, Field::U32(*id)],
            Self::Pose { id, pose } => vec![
                method,
                Field::U32(*id),
                Field::Static(pose.to_bytes().to_vec()),
            ],
            Self::Audio {
                id,
                kind,
                timestamp,
                duration,
                payload,
            } => vec![
                method,
                Field::U32(*id),
                Field::U32(*kind as u32),
                Field::F32(*timestamp),
                Field::F32(*duration),
                Field::Bytes(payload.clone()),
            ],
            Self::UserState { id, metadata_json } => vec![
                method,
                Field::U32(*id),
                Field::Str(metadata_json.clone()),
            ],
            Self::RoomState { update } => vec![method, Field::Bytes(update.clone())],
        };
        wire::encode_with(&fields, self.method().schema())
    }

    /// Decode one message. An unknown method yields
    /// [`WireError::UnknownMethod`]; every other error means corruption.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let raw = wire::peek_u32(bytes)?;
        let method = Method::from_u32(raw).ok_or(WireError::UnknownMethod(raw))?;
        let schema = method.schema();
        let fields = match wire::decode_with(bytes, schema) {
            Ok(fields) => fields,
            // A pose with the wrong float count is reported as such
            Err(WireError::Truncated { .. } | WireError::TrailingBytes(_))
                if method == Method::Pose =>
            {
                return Err(WireError::InvalidPose(bytes.len().saturating_sub(8)));
            }
            Err(e) => return Err(e),
        };
        let mut it = fields.into_iter().skip(1);
        let mut next = || it.next().ok_or(WireError::Truncated {
            offset: bytes.len(),
            needed: wire::WORD,
            available: 0,
        });

        Ok(match method {
            Method::Init => {
                let local_id = u32_field(next()?)?;
                let peers = bytes_field(next()?)?;
                if peers.len() % 4 != 0 {
                    return Err(WireError::InvalidPeerList(peers.len()));
                }
                let peer_ids = peers
                    .chunks_exact(4)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                let room_snapshot = bytes_field(next()?)?;
                Self::Init {
                    local_id,
                    peer_ids,
                    room_snapshot,
                }
            }
            Method::Join => Self::Join {
                id: u32_field(next()?)?,
            },
            Method::Leave => Self::Leave {
                id: u32_field(next()?)?,
            },
            Method::Pose => {
                let id = u32_field(next()?)?;
                let pose = Pose::from_bytes(&bytes_field(next()?)?)?;
                Self::Pose { id, pose }
            }
            Method::Audio => Self::Audio {
                id: u32_field(next()?)?,
                kind: FrameKind::from_u32(u32_field(next()?)?),
                timestamp: f32_field(next()?)?,
                duration: f32_field(next()?)?,
                payload: bytes_field(next()?)?,
            },
            Method::UserState => {
                let id = u32_field(next()?)?;
                let metadata_json = match next()? {
                    Field::Str(s) => s,
                    other => return Err(unexpected(FieldKind::Str, &other)),
                };
                Self::UserState { id, metadata_json }
            }
            Method::RoomState => Self::RoomState {
                update: bytes_field(next()?)?,
            },
        })
    }
}

/// Read the method of an encoded message without decoding its payload.
pub fn peek_method(bytes: &[u8]) -> Result<Method, WireError> {
    let raw = wire::peek_u32(bytes)?;
    Method::from_u32(raw).ok_or(WireError::UnknownMethod(raw))
}

fn unexpected(expected: FieldKind, found: &Field) -> WireError {
    WireError::UnexpectedField {
        expected,
        found: found.kind(),
    }
}

fn u32_field(field: Field) -> Result<u32, WireError> {
    field.as_u32().ok_or_else(|| unexpected(FieldKind::U32, &field))
}

fn f32_field(field: Field) -> Result<f32, WireError> {
    field.as_f32().ok_or_else(|| unexpected(FieldKind::F32, &field))
}

fn bytes_field(field: Field) -> Result<Vec<u8>, WireError> {
    match field {
        Field::Bytes(b) | Field::Static(b) => Ok(b),
        other => Err(unexpected(FieldKind::Bytes, &other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_numbering_is_stable() {
        assert_eq!(Method::Init as u32, 1);
        assert_eq!(Method::Join as u32, 2);
        assert_eq!(Method::Leave as u32, 3);
        assert_eq!(Method::Pose as u32, 4);
        assert_eq!(Method::Audio as u32, 5);
        assert_eq!(Method::UserState as u32, 6);
        assert_eq!(Method::RoomState as u32, 7);
        assert_eq!(Method::from_u32(8), None);
    }

    #[test]
    fn test_init_roundtrip() {
        let msg = WireMessage::Init {
            local_id: 11,
            peer_ids: vec![3, 5],
            room_snapshot: vec![1, 2, 3],
        };
        let encoded = msg.encode().unwrap();
        assert_eq!(&encoded[8..12], &8u32.to_le_bytes());
        assert_eq!(WireMessage::decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_audio_layout_is_byte_exact() {
        let payload: Vec<u8> = (0..32).collect();
        let msg = WireMessage::Audio {
            id: 3,
            kind: FrameKind::Key,
            timestamp: 0.0,
            duration: 20.0,
            payload: payload.clone(),
        };
        let encoded = msg.encode().unwrap();

        assert_eq!(encoded.len(), 6 * 4 + 32);
        assert_eq!(&encoded[0..4], &5u32.to_le_bytes());
        assert_eq!(&encoded[4..8], &3u32.to_le_bytes());
        assert_eq!(&encoded[8..12], &0u32.to_le_bytes());
        assert_eq!(&encoded[16..20], &20.0f32.to_le_bytes());
        assert_eq!(&encoded[20..24], &32u32.to_le_bytes());
        assert_eq!(&encoded[24..], payload.as_slice());
        assert_eq!(WireMessage::decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_pose_has_no_length_prefix() {
        let pose = Pose::new([1.0, 2.0, 3.0], [0.0, 0.0, 0.0, 1.0], [1.0, 1.0, 1.0]);
        let encoded = WireMessage::Pose { id: 2, pose }.encode().unwrap();
        assert_eq!(encoded.len(), 8 + POSE_BYTES);
        assert_eq!(&encoded[8..12], &1.0f32.to_le_bytes());
    }

    #[test]
    fn test_pose_with_wrong_float_count_is_rejected() {
        let encoded = WireMessage::Pose {
            id: 2,
            pose: Pose::default(),
        }
        .encode()
        .unwrap();

        let short = &encoded[..encoded.len() - 4];
        assert_eq!(WireMessage::decode(short), Err(WireError::InvalidPose(36)));

        let mut long = encoded.clone();
        long.extend_from_slice(&0f32.to_le_bytes());
        assert_eq!(WireMessage::decode(&long), Err(WireError::InvalidPose(44)));
    }

    #[test]
    fn test_user_state_roundtrip() {
        let msg = WireMessage::UserState {
            id: 7,
            metadata_json: r#"{"name":"Amy"}"#.into(),
        };
        assert_eq!(WireMessage::decode(&msg.encode().unwrap()).unwrap(), msg);
    }

    #[test]
    fn test_unknown_method_is_distinguishable() {
        let bytes = 99u32.to_le_bytes();
        assert_eq!(WireMessage::decode(&bytes), Err(WireError::UnknownMethod(99)));
        assert_eq!(peek_method(&bytes), Err(WireError::UnknownMethod(99)));
    }

    #[test]
    fn test_truncated_messages_fail() {
        let encoded = WireMessage::RoomState {
            update: vec![9; 10],
        }
        .encode()
        .unwrap();
        for cut in 0..encoded.len() {
            assert!(WireMessage::decode(&encoded[..cut]).is_err());
        }
    }

    #[test]
    fn test_peer_list_must_be_whole_ids() {
        let bytes = wire::encode(&[
            Field::U32(Method::Init as u32),
            Field::U32(1),
            Field::Bytes(vec![1, 0, 0]),
            Field::Bytes(vec![]),
        ])
        .unwrap();
        assert_eq!(WireMessage::decode(&bytes), Err(WireError::InvalidPeerList(3)));
    }

    #[test]
    fn test_nonzero_frame_kind_is_delta() {
        assert_eq!(FrameKind::from_u32(0), FrameKind::Key);
        assert_eq!(FrameKind::from_u32(1), FrameKind::Delta);
        assert_eq!(FrameKind::from_u32(7), FrameKind::Delta);
    }
}
