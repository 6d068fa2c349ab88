use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use super::db::{decode, encode, now};
use super::model::Share;
use crate::error::{Error, Result};

pub(crate) const SHARES: TableDefinition<&str, &[u8]> = TableDefinition::new("shares");

/// Generate a share token: 16 random hex chars.
pub fn generate_token() -> String {
    use rand::Rng;
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

#[derive(Clone)]
pub struct ShareStore {
    db: Arc<Database>,
}

impl ShareStore {
    pub(crate) fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Fails with `DuplicateKey` if the token is already in use.
    pub fn create(&self, share: &Share) -> Result<()> {
        let bytes = encode(share)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SHARES)?;
            if table.get(share.token.as_str())?.is_some() {
                return Err(Error::DuplicateKey(format!("share {}", share.token)));
            }
            table.insert(share.token.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;

        debug!(token = %share.token, path = %share.path, "created share");
        Ok(())
    }

    /// Look up a live share. Expired shares are evicted on the way out.
    pub fn get_by_token(&self, token: &str) -> Result<Option<Share>> {
        let now = now();

        // Read first; only take the write lock when there is something to evict.
        let share: Option<Share> = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(SHARES)?;
            let raw: Option<Vec<u8>> = table.get(token)?.map(|g| g.value().to_vec());
            raw.map(|bytes| decode(&bytes)).transpose()?
        };

        match share {
            Some(s) if s.is_expired(now) => {
                self.delete(token)?;
                debug!(token, "lazy-evicted expired share");
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Revoke a share. Returns true if it existed.
    pub fn delete(&self, token: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(SHARES)?;
            let existed = table.remove(token)?.is_some();
            existed
        };
        write_txn.commit()?;
        Ok(existed)
    }

    /// Live shares pointing at exactly `path`.
    pub fn list_by_path(&self, path: &str) -> Result<Vec<Share>> {
        self.filter(|s| s.path == path)
    }

    /// Live shares created by user `owner`.
    pub fn list_by_owner(&self, owner: u64) -> Result<Vec<Share>> {
        self.filter(|s| s.owner == owner)
    }

    /// Remove all expired shares. Returns how many were removed.
    pub fn prune(&self) -> Result<usize> {
        let now = now();

        // Collect expired tokens in a read pass first.
        let expired: Vec<String> = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(SHARES)?;
            let mut tokens = Vec::new();
            for item in table.iter()? {
                let (k, v) = item?;
                let share: Share = decode(v.value())?;
                if share.is_expired(now) {
                    tokens.push(k.value().to_owned());
                }
            }
            tokens
        };

        if expired.is_empty() {
            return Ok(0);
        }

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SHARES)?;
            for token in &expired {
                table.remove(token.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(expired.len())
    }

    fn filter(&self, keep: impl Fn(&Share) -> bool) -> Result<Vec<Share>> {
        let now = now();
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SHARES)?;

        let mut out = Vec::new();
        for item in table.iter()? {
            let (_k, v) = item?;
            let share: Share = decode(v.value())?;
            if !share.is_expired(now) && keep(&share) {
                out.push(share);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use tempfile::tempdir;

    fn make_store() -> (Store, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.db")).unwrap();
        (store, dir)
    }

    fn share(token: &str, path: &str, expires_at: Option<i64>) -> Share {
        Share {
            token: token.into(),
            path: path.into(),
            owner: 1,
            created_at: now(),
            expires_at,
        }
    }

    #[test]
    fn create_get_delete() {
        let (s, _dir) = make_store();
        s.shares.create(&share("abc", "/notes.md", None)).unwrap();
        assert_eq!(
            s.shares.get_by_token("abc").unwrap().unwrap().path,
            "/notes.md"
        );
        assert!(s.shares.delete("abc").unwrap());
        assert!(s.shares.get_by_token("abc").unwrap().is_none());
        assert!(!s.shares.delete("abc").unwrap());
    }

    #[test]
    fn duplicate_token_rejected() {
        let (s, _dir) = make_store();
        s.shares.create(&share("abc", "/a", None)).unwrap();
        assert!(matches!(
            s.shares.create(&share("abc", "/b", None)),
            Err(Error::DuplicateKey(_))
        ));
        assert_eq!(s.shares.get_by_token("abc").unwrap().unwrap().path, "/a");
    }

    #[test]
    fn expired_share_is_evicted_on_read() {
        let (s, _dir) = make_store();
        s.shares
            .create(&share("old", "/a", Some(now() - 10)))
            .unwrap();
        assert!(s.shares.get_by_token("old").unwrap().is_none());
        // Already gone, so a second delete reports nothing removed.
        assert!(!s.shares.delete("old").unwrap());
    }

    #[test]
    fn list_by_path_skips_expired_and_other_paths() {
        let (s, _dir) = make_store();
        s.shares.create(&share("a", "/docs", None)).unwrap();
        s.shares
            .create(&share("b", "/docs", Some(now() + 3600)))
            .unwrap();
        s.shares.create(&share("c", "/docs", Some(now() - 1))).unwrap();
        s.shares.create(&share("d", "/other", None)).unwrap();

        let mut tokens: Vec<String> = s
            .shares
            .list_by_path("/docs")
            .unwrap()
            .into_iter()
            .map(|sh| sh.token)
            .collect();
        tokens.sort();
        assert_eq!(tokens, vec!["a", "b"]);
        assert_eq!(s.shares.list_by_owner(1).unwrap().len(), 3);
    }

    #[test]
    fn prune_removes_only_expired() {
        let (s, _dir) = make_store();
        s.shares.create(&share("live", "/a", None)).unwrap();
        s.shares.create(&share("dead", "/a", Some(0))).unwrap();
        assert_eq!(s.shares.prune().unwrap(), 1);
        assert_eq!(s.shares.prune().unwrap(), 0);
        assert!(s.shares.get_by_token("live").unwrap().is_some());
    }

    #[test]
    fn generate_token_format() {
        let t = generate_token();
        assert_eq!(t.len(), 16);
        assert!(t.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
