//! RocksDB-backed room snapshot store.
//!
//! Only the current merged document of each room is kept; there is no
//! history or delta log.
//!
//! Column families:
//! - `rooms`: LZ4-compressed document snapshots, keyed by room name
//! - `metadata`: bincode-encoded [`RoomMetadata`], keyed by room name

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const CF_ROOMS: &str = "rooms";
const CF_METADATA: &str = "metadata";

const COLUMN_FAMILIES: &[&str] = &[CF_ROOMS, CF_METADATA];

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// fsync on every write (default: false)
    pub sync_writes: bool,
    pub max_open_files: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("chorus_data"),
            block_cache_size: 64 * 1024 * 1024,
            sync_writes: false,
            max_open_files: 256,
        }
    }
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Small caches for tests.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024,
            sync_writes: false,
            max_open_files: 64,
        }
    }
}

/// Bookkeeping stored next to each snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMetadata {
    pub room: String,
    /// Incremented on every save.
    pub version: u64,
    pub snapshot_size: u64,
    pub compressed_size: u64,
    /// Seconds since the epoch.
    pub created_at: u64,
    pub updated_at: u64,
}

impl RoomMetadata {
    fn new(room: &str) -> Self {
        let now = now_secs();
        Self {
            room: room.to_string(),
            version: 0,
            snapshot_size: 0,
            compressed_size: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        Ok(meta)
    }
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("compression error: {0}")]
    Compression(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

pub struct SnapshotStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl SnapshotStore {
    /// Open the store, creating the database and column families if needed.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(&config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Opened snapshot store at {}", config.path.display());
        Ok(Self { db, config })
    }

    fn cf_options(config: &StoreConfig) -> Options {
        let mut opts = Options::default();
        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        // Values are already LZ4-compressed
        opts.set_compression_type(DBCompressionType::None);
        opts.optimize_for_point_lookup(config.block_cache_size as u64);
        opts
    }

    /// Replace the stored snapshot of `room`.
    pub fn save_snapshot(&self, room: &str, snapshot: &[u8]) -> Result<RoomMetadata, StoreError> {
        let cf_rooms = self.cf(CF_ROOMS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let compressed = lz4_flex::compress_prepend_size(snapshot);

        let mut meta = self
            .load_metadata(room)?
            .unwrap_or_else(|| RoomMetadata::new(room));
        meta.version += 1;
        meta.snapshot_size = snapshot.len() as u64;
        meta.compressed_size = compressed.len() as u64;
        meta.updated_at = now_secs();

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_rooms, room.as_bytes(), &compressed);
        batch.put_cf(&cf_meta, room.as_bytes(), &meta.encode()?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        Ok(meta)
    }

    pub fn load_snapshot(&self, room: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.cf(CF_ROOMS)?;
        match self.db.get_cf(&cf, room.as_bytes())? {
            Some(compressed) => lz4_flex::decompress_size_prepended(&compressed)
                .map(Some)
                .map_err(|e| StoreError::Compression(e.to_string())),
            None => Ok(None),
        }
    }

    pub fn load_metadata(&self, room: &str) -> Result<Option<RoomMetadata>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        match self.db.get_cf(&cf, room.as_bytes())? {
            Some(bytes) => RoomMetadata::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Remove a room's snapshot and metadata. Deleting a missing room is not an error.
    pub fn delete(&self, room: &str) -> Result<(), StoreError> {
        let cf_rooms = self.cf(CF_ROOMS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_rooms, room.as_bytes());
        batch.delete_cf(&cf_meta, room.as_bytes());
        self.db.write(batch)?;
        Ok(())
    }

    /// Names of every stored room.
    pub fn list_rooms(&self) -> Result<Vec<String>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        let mut rooms = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = item?;
            match String::from_utf8(key.to_vec()) {
                Ok(name) => rooms.push(name),
                Err(_) => log::warn!("Skipping stored room with non-utf8 name"),
            }
        }
        Ok(rooms)
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
