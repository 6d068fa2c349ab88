use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use serde::{de::DeserializeOwned, Serialize};
use tokio::time;
use tracing::{debug, info, warn};

use super::config::{ConfigStore, SETTINGS};
use super::shares::{ShareStore, SHARES};
use super::users::{UsersStore, USERNAMES, USERS};
use crate::error::{Error, Result};

const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

/// Leading byte of every encoded record. Anything else is rejected on decode.
const RECORD_V1_MARKER: u8 = 0x01;

/// Handle to the redb database, split into its three collections.
///
/// Every collection holds the same `Arc<Database>`, so the file stays open
/// until the last clone of any of them is dropped.
#[derive(Clone)]
pub struct Store {
    pub config: ConfigStore,
    pub users: UsersStore,
    pub shares: ShareStore,
}

impl Store {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(|source| Error::StoreOpen {
            path: path.to_owned(),
            source,
        })?;

        // Ensure all tables exist.
        let write_txn = db.begin_write()?;
        write_txn.open_table(SETTINGS)?;
        write_txn.open_table(USERS)?;
        write_txn.open_table(USERNAMES)?;
        write_txn.open_table(SHARES)?;
        write_txn.open_table(COUNTERS)?;
        write_txn.commit()?;

        debug!(path = %path.display(), "store opened");

        let db = Arc::new(db);
        Ok(Self {
            config: ConfigStore::new(db.clone()),
            users: UsersStore::new(db.clone()),
            shares: ShareStore::new(db),
        })
    }

    /// Release this handle. The database file is unlocked once no other
    /// clone (e.g. a running sweep) holds it.
    pub fn close(self) {
        drop(self);
        debug!("store handle closed");
    }

    /// Spawn a background Tokio task that prunes expired shares every `interval`.
    pub fn spawn_sweep(self, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.tick().await; // skip first immediate tick
            loop {
                ticker.tick().await;
                match self.shares.prune() {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "pruned expired shares"),
                    Err(e) => warn!(error = %e, "share sweep error"),
                }
            }
        });
    }
}

pub(crate) fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Allocate the next id for `counter` inside an open write transaction.
pub(crate) fn next_id(txn: &WriteTransaction, counter: &str) -> Result<u64> {
    let mut counters = txn.open_table(COUNTERS)?;
    let next = counters.get(counter)?.map(|g| g.value()).unwrap_or(0) + 1;
    counters.insert(counter, next)?;
    Ok(next)
}

/// Encode a record as `[RECORD_V1_MARKER] + bincode(record)`.
pub(crate) fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    let payload = bincode::serde::encode_to_vec(record, bincode::config::standard())
        .map_err(|e| Error::Codec(format!("bincode encode: {e}")))?;
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(RECORD_V1_MARKER);
    out.extend_from_slice(&payload);
    Ok(out)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    match bytes.split_first() {
        Some((&RECORD_V1_MARKER, payload)) => {
            let (record, _) =
                bincode::serde::decode_from_slice(payload, bincode::config::standard())
                    .map_err(|e| Error::Codec(format!("bincode decode: {e}")))?;
            Ok(record)
        }
        Some((marker, _)) => Err(Error::Codec(format!("unknown record marker {marker:#04x}"))),
        None => Err(Error::Codec("empty record".into())),
    }
}
