use std::sync::Arc;

use redb::{Database, TableDefinition};

use super::db::{decode, encode};
use super::model::Settings;
use crate::error::Result;

pub(crate) const SETTINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("settings");
const SETTINGS_KEY: &str = "settings";

/// The singleton server-config record.
#[derive(Clone)]
pub struct ConfigStore {
    db: Arc<Database>,
}

impl ConfigStore {
    pub(crate) fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get(&self) -> Result<Option<Settings>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SETTINGS)?;
        let raw: Option<Vec<u8>> = table.get(SETTINGS_KEY)?.map(|g| g.value().to_vec());
        raw.map(|bytes| decode(&bytes)).transpose()
    }

    pub fn put(&self, settings: &Settings) -> Result<()> {
        let bytes = encode(settings)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SETTINGS)?;
            table.insert(SETTINGS_KEY, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}
