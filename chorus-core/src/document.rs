//! Room document: entity CRUD over a conflict-free shared document.
//!
//! The merge algorithm belongs to the [`SharedDocument`] backend; this
//! module only requires that applying the same set of updates in any order
//! converges. [`YrsDocument`] is the production backend.
//!
//! Layout inside the backend:
//!
//! ```text
//! array  "<prefix>"        ordered entity ids
//! map    "<prefix>.<id>"   one key/value map per entity, "id" is write-once
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Number, Value};
use thiserror::Error;
use yrs::updates::decoder::Decode;
use yrs::{Any, Array, Doc, Map as _, Out, ReadTxn, StateVector, Transact, Update, WriteTxn};

use crate::events::{ListenerId, Listeners};

/// Default name of the entity id list.
pub const DEFAULT_PREFIX: &str = "entities";

/// The entity key that may not be written or deleted by callers.
pub const RESERVED_KEY: &str = "id";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("key '{0}' is reserved and cannot be modified")]
    ReservedKey(String),

    #[error("failed to decode document update: {0}")]
    Decode(String),

    #[error("failed to apply document update: {0}")]
    Apply(String),
}

/// One edit inside a backend transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum DocOp {
    Push { array: String, value: Value },
    /// Append `value` to `array` unless it is already present.
    PushUnique { array: String, value: Value },
    /// Remove every occurrence of `value` from `array`.
    RemoveValue { array: String, value: Value },
    Set { map: String, key: String, value: Value },
    /// Set `key` only if the map does not hold it yet.
    SetIfAbsent { map: String, key: String, value: Value },
    Delete { map: String, key: String },
    Clear { map: String },
}

/// The conflict-free document collaborator.
///
/// `transact` applies all ops atomically and returns the encoded update
/// those ops produced. Reads on a missing array or map return empty values.
pub trait SharedDocument: Send + Sync {
    fn apply_update(&self, update: &[u8]) -> Result<(), DocumentError>;
    fn encode_snapshot(&self) -> Vec<u8>;
    fn transact(&self, ops: &[DocOp]) -> Result<Vec<u8>, DocumentError>;
    fn read_array(&self, name: &str) -> Vec<Value>;
    fn read_map(&self, name: &str) -> Map<String, Value>;
}

/// [`SharedDocument`] backed by a yrs document.
pub struct YrsDocument {
    doc: Doc,
    lock: Mutex<()>,
}

impl Default for YrsDocument {
    fn default() -> Self {
        Self {
            doc: Doc::new(),
            lock: Mutex::new(()),
        }
    }
}

impl YrsDocument {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SharedDocument for YrsDocument {
    fn apply_update(&self, update: &[u8]) -> Result<(), DocumentError> {
        let update = Update::decode_v1(update).map_err(|e| DocumentError::Decode(e.to_string()))?;
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| DocumentError::Apply(e.to_string()))
    }

    fn encode_snapshot(&self) -> Vec<u8> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    fn transact(&self, ops: &[DocOp]) -> Result<Vec<u8>, DocumentError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut txn = self.doc.transact_mut();
        for op in ops {
            match op {
                DocOp::Push { array, value } => {
                    let list = txn.get_or_insert_array(array.as_str());
                    list.push_back(&mut txn, json_to_any(value));
                }
                DocOp::PushUnique { array, value } => {
                    let list = txn.get_or_insert_array(array.as_str());
                    let present = list.iter(&txn).any(|out| out_to_json(&out) == *value);
                    if !present {
                        list.push_back(&mut txn, json_to_any(value));
                    }
                }
                DocOp::RemoveValue { array, value } => {
                    let list = txn.get_or_insert_array(array.as_str());
                    let positions: Vec<u32> = list
                        .iter(&txn)
                        .enumerate()
                        .filter(|(_, out)| out_to_json(out) == *value)
                        .map(|(index, _)| index as u32)
                        .collect();
                    for index in positions.into_iter().rev() {
                        list.remove(&mut txn, index);
                    }
                }
                DocOp::Set { map, key, value } => {
                    let entries = txn.get_or_insert_map(map.as_str());
                    entries.insert(&mut txn, key.as_str(), json_to_any(value));
                }
                DocOp::SetIfAbsent { map, key, value } => {
                    let entries = txn.get_or_insert_map(map.as_str());
                    if entries.get(&txn, key).is_none() {
                        entries.insert(&mut txn, key.as_str(), json_to_any(value));
                    }
                }
                DocOp::Delete { map, key } => {
                    let entries = txn.get_or_insert_map(map.as_str());
                    entries.remove(&mut txn, key);
                }
                DocOp::Clear { map } => {
                    let entries = txn.get_or_insert_map(map.as_str());
                    entries.clear(&mut txn);
                }
            }
        }
        Ok(txn.encode_update_v1())
    }

    fn read_array(&self, name: &str) -> Vec<Value> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let txn = self.doc.transact();
        match txn.get_array(name) {
            Some(list) => list.iter(&txn).map(|out| out_to_json(&out)).collect(),
            None => Vec::new(),
        }
    }

    fn read_map(&self, name: &str) -> Map<String, Value> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let txn = self.doc.transact();
        match txn.get_map(name) {
            Some(entries) => entries
                .iter(&txn)
                .map(|(key, out)| (key.to_string(), out_to_json(&out)))
                .collect(),
            None => Map::new(),
        }
    }
}

fn json_to_any(value: &Value) -> Any {
    match value {
        Value::Null => Any::Null,
        Value::Bool(b) => Any::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Any::BigInt(i),
            None => Any::Number(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => Any::String(s.as_str().into()),
        Value::Array(items) => Any::Array(items.iter().map(json_to_any).collect::<Vec<_>>().into()),
        Value::Object(map) => Any::Map(Arc::new(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_any(v)))
                .collect::<HashMap<_, _>>(),
        )),
    }
}

fn any_to_json(any: &Any) -> Value {
    match any {
        Any::Bool(b) => Value::Bool(*b),
        Any::Number(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        Any::BigInt(i) => Value::Number((*i).into()),
        Any::String(s) => Value::String(s.to_string()),
        Any::Array(items) => Value::Array(items.iter().map(any_to_json).collect()),
        Any::Map(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), any_to_json(v)))
                .collect(),
        ),
        Any::Buffer(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
        _ => Value::Null,
    }
}

fn out_to_json(out: &Out) -> Value {
    match out {
        Out::Any(any) => any_to_json(any),
        _ => Value::Null,
    }
}

/// Where a document change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Produced by an edit on this replica; should be transmitted.
    Local,
    /// Merged from another replica.
    Remote,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentEvent {
    Update { update: Vec<u8>, origin: ChangeOrigin },
    EntityAdded(String),
    EntityRemoved(String),
}

struct Inner {
    backend: Box<dyn SharedDocument>,
    prefix: String,
    known_ids: Mutex<Vec<String>>,
    listeners: Listeners<DocumentEvent>,
}

/// Shared handle to one room's document. Clones refer to the same document.
#[derive(Clone)]
pub struct RoomDocument {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RoomDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomDocument")
            .field("prefix", &self.inner.prefix)
            .field("entities", &self.list_entity_ids())
            .finish()
    }
}

impl Default for RoomDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomDocument {
    pub fn new() -> Self {
        Self::with_backend(Box::new(YrsDocument::new()), DEFAULT_PREFIX)
    }

    pub fn with_backend(backend: Box<dyn SharedDocument>, prefix: &str) -> Self {
        let doc = Self {
            inner: Arc::new(Inner {
                backend,
                prefix: prefix.to_string(),
                known_ids: Mutex::new(Vec::new()),
                listeners: Listeners::new(),
            }),
        };
        *doc.inner.known_ids.lock().unwrap_or_else(PoisonError::into_inner) = doc.list_entity_ids();
        doc
    }

    pub fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    fn map_name(&self, id: &str) -> String {
        format!("{}.{}", self.inner.prefix, id)
    }

    /// Ordered entity ids, duplicates from concurrent creation collapsed.
    pub fn list_entity_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for value in self.inner.backend.read_array(&self.inner.prefix) {
            let id = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                _ => continue,
            };
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    pub fn entities(&self) -> Vec<Entity> {
        self.list_entity_ids()
            .into_iter()
            .map(|id| self.handle(id))
            .collect()
    }

    /// Handle to an entity that is currently listed.
    pub fn entity(&self, id: &str) -> Option<Entity> {
        if self.list_entity_ids().iter().any(|existing| existing == id) {
            Some(self.handle(id.to_string()))
        } else {
            None
        }
    }

    fn handle(&self, id: String) -> Entity {
        Entity {
            map_name: self.map_name(&id),
            id,
            doc: self.clone(),
        }
    }

    /// Look up an entity, creating it in one transaction if it is missing.
    pub fn get_or_create_entity(&self, id: &str) -> Result<Entity, DocumentError> {
        let map_name = self.map_name(id);
        let listed = self.list_entity_ids().iter().any(|existing| existing == id);
        let has_id = self.inner.backend.read_map(&map_name).contains_key(RESERVED_KEY);
        if !(listed && has_id) {
            self.transact(&[
                DocOp::PushUnique {
                    array: self.inner.prefix.clone(),
                    value: Value::String(id.to_string()),
                },
                DocOp::SetIfAbsent {
                    map: map_name,
                    key: RESERVED_KEY.to_string(),
                    value: Value::String(id.to_string()),
                },
            ])?;
        }
        Ok(self.handle(id.to_string()))
    }

    /// Clear every key of the entity and drop it from the id list, atomically.
    /// Returns `false` if the entity was not listed.
    pub fn remove_entity(&self, id: &str) -> Result<bool, DocumentError> {
        if self.entity(id).is_none() {
            return Ok(false);
        }
        self.transact(&[
            DocOp::Clear {
                map: self.map_name(id),
            },
            DocOp::RemoveValue {
                array: self.inner.prefix.clone(),
                value: Value::String(id.to_string()),
            },
        ])?;
        Ok(true)
    }

    /// Apply a local transaction and announce the resulting update.
    pub fn transact(&self, ops: &[DocOp]) -> Result<Vec<u8>, DocumentError> {
        let update = self.inner.backend.transact(ops)?;
        self.changed(update.clone(), ChangeOrigin::Local);
        Ok(update)
    }

    /// Merge an update received from another replica.
    pub fn apply_update(&self, update: &[u8]) -> Result<(), DocumentError> {
        self.inner
            .backend
            .apply_update(update)
            .inspect_err(|e| log::warn!("Rejected document update of {} bytes: {e}", update.len()))?;
        self.changed(update.to_vec(), ChangeOrigin::Remote);
        Ok(())
    }

    pub fn encode_snapshot(&self) -> Vec<u8> {
        self.inner.backend.encode_snapshot()
    }

    pub fn subscribe<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&DocumentEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.listeners.unsubscribe(id)
    }

    fn changed(&self, update: Vec<u8>, origin: ChangeOrigin) {
        self.inner
            .listeners
            .notify(&DocumentEvent::Update { update, origin });

        let next = self.list_entity_ids();
        let previous = {
            let mut known = self
                .inner
                .known_ids
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *known, next.clone())
        };
        for id in next.iter().filter(|id| !previous.contains(id)) {
            self.inner
                .listeners
                .notify(&DocumentEvent::EntityAdded(id.clone()));
        }
        for id in previous.iter().filter(|id| !next.contains(id)) {
            self.inner
                .listeners
                .notify(&DocumentEvent::EntityRemoved(id.clone()));
        }
    }

    /// `{ "<prefix>": [ids], "<prefix>.<id>": {...}, ... }`
    pub fn to_json(&self) -> Value {
        let ids = self.list_entity_ids();
        let mut out = Map::new();
        for id in &ids {
            let map_name = self.map_name(id);
            let entries = self.inner.backend.read_map(&map_name);
            out.insert(map_name, Value::Object(entries));
        }
        out.insert(
            self.inner.prefix.clone(),
            Value::Array(ids.into_iter().map(Value::String).collect()),
        );
        Value::Object(out)
    }
}

/// Handle to one entity's key/value map.
#[derive(Debug, Clone)]
pub struct Entity {
    id: String,
    map_name: String,
    doc: RoomDocument,
}

impl Entity {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.doc.inner.backend.read_map(&self.map_name).remove(key)
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.doc.inner.backend.read_map(&self.map_name))
    }

    pub fn set(&self, key: &str, value: Value) -> Result<(), DocumentError> {
        reject_reserved(key)?;
        self.doc.transact(&[DocOp::Set {
            map: self.map_name.clone(),
            key: key.to_string(),
            value,
        }])?;
        Ok(())
    }

    /// Write several keys in one transaction. Nothing is written if any key is reserved.
    pub fn set_many(&self, values: Map<String, Value>) -> Result<(), DocumentError> {
        if values.contains_key(RESERVED_KEY) {
            return Err(DocumentError::ReservedKey(RESERVED_KEY.to_string()));
        }
        let ops: Vec<DocOp> = values
            .into_iter()
            .map(|(key, value)| DocOp::Set {
                map: self.map_name.clone(),
                key,
                value,
            })
            .collect();
        self.doc.transact(&ops)?;
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<(), DocumentError> {
        reject_reserved(key)?;
        self.doc.transact(&[DocOp::Delete {
            map: self.map_name.clone(),
            key: key.to_string(),
        }])?;
        Ok(())
    }
}

fn reject_reserved(key: &str) -> Result<(), DocumentError> {
    if key == RESERVED_KEY {
        Err(DocumentError::ReservedKey(key.to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collect_events(doc: &RoomDocument) -> Arc<Mutex<Vec<DocumentEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        doc.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
        events
    }

    #[test]
    fn test_get_or_create_entity_sets_id() {
        let doc = RoomDocument::new();
        let entity = doc.get_or_create_entity("lamp").unwrap();
        entity.set("color", json!("red")).unwrap();

        assert_eq!(doc.list_entity_ids(), vec!["lamp".to_string()]);
        assert_eq!(entity.get("id"), Some(json!("lamp")));
        assert_eq!(entity.to_json(), json!({"id": "lamp", "color": "red"}));
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let doc = RoomDocument::new();
        let events = collect_events(&doc);
        doc.get_or_create_entity("a").unwrap();
        doc.get_or_create_entity("a").unwrap();

        assert_eq!(doc.list_entity_ids().len(), 1);
        let updates = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, DocumentEvent::Update { .. }))
            .count();
        assert_eq!(updates, 1);
    }

    #[test]
    fn test_reserved_key_is_rejected() {
        let doc = RoomDocument::new();
        let entity = doc.get_or_create_entity("a").unwrap();

        assert_eq!(
            entity.set("id", json!("b")),
            Err(DocumentError::ReservedKey("id".into()))
        );
        assert_eq!(
            entity.delete("id"),
            Err(DocumentError::ReservedKey("id".into()))
        );
        let mut many = Map::new();
        many.insert("x".into(), json!(1));
        many.insert("id".into(), json!("c"));
        assert!(entity.set_many(many).is_err());

        assert_eq!(entity.to_json(), json!({"id": "a"}));
    }

    #[test]
    fn test_set_many_and_delete() {
        let doc = RoomDocument::new();
        let entity = doc.get_or_create_entity("a").unwrap();
        let mut many = Map::new();
        many.insert("x".into(), json!(1));
        many.insert("y".into(), json!([true, null]));
        entity.set_many(many).unwrap();
        entity.delete("x").unwrap();

        assert_eq!(entity.to_json(), json!({"id": "a", "y": [true, null]}));
    }

    #[test]
    fn test_remove_entity_clears_keys_and_list() {
        let doc = RoomDocument::new();
        let entity = doc.get_or_create_entity("a").unwrap();
        entity.set("x", json!(1)).unwrap();
        doc.get_or_create_entity("b").unwrap();

        assert!(doc.remove_entity("a").unwrap());
        assert!(!doc.remove_entity("a").unwrap());
        assert_eq!(doc.list_entity_ids(), vec!["b".to_string()]);
        assert_eq!(entity.to_json(), json!({}));
    }

    #[test]
    fn test_add_and_remove_events() {
        let doc = RoomDocument::new();
        let events = collect_events(&doc);
        doc.get_or_create_entity("a").unwrap();
        doc.remove_entity("a").unwrap();

        let membership: Vec<DocumentEvent> = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| !matches!(e, DocumentEvent::Update { .. }))
            .cloned()
            .collect();
        assert_eq!(
            membership,
            vec![
                DocumentEvent::EntityAdded("a".into()),
                DocumentEvent::EntityRemoved("a".into()),
            ]
        );
    }

    #[test]
    fn test_remote_updates_are_tagged_remote() {
        let a = RoomDocument::new();
        let b = RoomDocument::new();
        let events = collect_events(&b);
        a.get_or_create_entity("x").unwrap();
        b.apply_update(&a.encode_snapshot()).unwrap();

        let events = events.lock().unwrap();
        assert!(matches!(
            events[0],
            DocumentEvent::Update {
                origin: ChangeOrigin::Remote,
                ..
            }
        ));
        assert!(events.contains(&DocumentEvent::EntityAdded("x".into())));
    }

    #[test]
    fn test_replicas_converge_in_either_order() {
        let a = RoomDocument::new();
        let b = RoomDocument::new();
        a.get_or_create_entity("chair").unwrap().set("x", json!(1)).unwrap();
        let shared = a.get_or_create_entity("table").unwrap();
        shared.set("color", json!("oak")).unwrap();
        b.get_or_create_entity("lamp").unwrap().set("on", json!(true)).unwrap();
        b.get_or_create_entity("table").unwrap().set("color", json!("pine")).unwrap();

        let update_a = a.encode_snapshot();
        let update_b = b.encode_snapshot();

        // a ← b and b ← a
        a.apply_update(&update_b).unwrap();
        b.apply_update(&update_a).unwrap();
        assert_eq!(a.to_json(), b.to_json());

        // fresh replicas receiving the updates in opposite orders
        let c = RoomDocument::new();
        c.apply_update(&update_a).unwrap();
        c.apply_update(&update_b).unwrap();
        let d = RoomDocument::new();
        d.apply_update(&update_b).unwrap();
        d.apply_update(&update_a).unwrap();
        assert_eq!(c.to_json(), d.to_json());
        assert_eq!(c.to_json(), a.to_json());

        let ids = a.list_entity_ids();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&"table".to_string()));
    }

    #[test]
    fn test_invalid_update_is_rejected() {
        let doc = RoomDocument::new();
        assert!(matches!(
            doc.apply_update(&[0xFF, 0xFF, 0xFF]),
            Err(DocumentError::Decode(_))
        ));
    }

    #[test]
    fn test_to_json_shape() {
        let doc = RoomDocument::new();
        doc.get_or_create_entity("a").unwrap().set("n", json!(2.5)).unwrap();
        assert_eq!(
            doc.to_json(),
            json!({
                "entities": ["a"],
                "entities.a": {"id": "a", "n": 2.5},
            })
        );
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        /// (entity, key, value, remove instead of set)
        type Edit = (u8, u8, i32, bool);

        fn edit() -> impl Strategy<Value = Edit> {
            (0u8..3, 0u8..3, any::<i32>(), proptest::bool::weighted(0.2))
        }

        /// Apply `edits` locally and return the updates they produced, in order.
        fn edit_replica(doc: &RoomDocument, edits: &[Edit]) -> Vec<Vec<u8>> {
            let updates = Arc::new(Mutex::new(Vec::new()));
            let sink = updates.clone();
            let id = doc.subscribe(move |event| {
                if let DocumentEvent::Update {
                    update,
                    origin: ChangeOrigin::Local,
                } = event
                {
                    sink.lock().unwrap().push(update.clone());
                }
            });
            for &(entity, key, value, remove) in edits {
                let entity = format!("e{entity}");
                if remove {
                    doc.remove_entity(&entity).unwrap();
                } else {
                    doc.get_or_create_entity(&entity)
                        .unwrap()
                        .set(&format!("k{key}"), json!(value))
                        .unwrap();
                }
            }
            doc.unsubscribe(id);
            let produced = updates.lock().unwrap().clone();
            produced
        }

        /// Merge two update streams, keeping each stream's own order.
        fn interleave(a: &[Vec<u8>], b: &[Vec<u8>], picks: &[bool]) -> Vec<Vec<u8>> {
            let (mut a, mut b) = (a.iter(), b.iter());
            let mut merged = Vec::new();
            for &take_a in picks {
                let next = if take_a { a.next() } else { b.next() };
                merged.extend(next.cloned());
            }
            merged.extend(a.cloned());
            merged.extend(b.cloned());
            merged
        }

        proptest! {
            #[test]
            fn replicas_converge_in_any_delivery_order(
                edits_a in proptest::collection::vec(edit(), 0..10),
                edits_b in proptest::collection::vec(edit(), 0..10),
                picks in proptest::collection::vec(any::<bool>(), 0..20),
            ) {
                let a = RoomDocument::new();
                let b = RoomDocument::new();
                let from_a = edit_replica(&a, &edits_a);
                let from_b = edit_replica(&b, &edits_b);

                let mixed = RoomDocument::new();
                for update in interleave(&from_a, &from_b, &picks) {
                    mixed.apply_update(&update).unwrap();
                }
                let reversed = RoomDocument::new();
                for update in from_b.iter().chain(&from_a) {
                    reversed.apply_update(update).unwrap();
                }

                let snapshot_a = a.encode_snapshot();
                let snapshot_b = b.encode_snapshot();
                a.apply_update(&snapshot_b).unwrap();
                b.apply_update(&snapshot_a).unwrap();

                prop_assert_eq!(a.to_json(), b.to_json());
                prop_assert_eq!(mixed.to_json(), reversed.to_json());
                prop_assert_eq!(mixed.to_json(), a.to_json());
            }
        }
    }
}
