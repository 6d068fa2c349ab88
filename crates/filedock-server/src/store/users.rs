use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use super::db::{decode, encode, next_id};
use super::model::User;
use crate::error::{Error, Result};

pub(crate) const USERS: TableDefinition<u64, &[u8]> = TableDefinition::new("users");
/// Username index: name -> user id. Written in the same transaction as `USERS`.
pub(crate) const USERNAMES: TableDefinition<&str, u64> = TableDefinition::new("usernames");
const USER_SEQ_KEY: &str = "user_seq";

#[derive(Clone)]
pub struct UsersStore {
    db: Arc<Database>,
}

impl UsersStore {
    pub(crate) fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new user, assigning its id. The incoming `id` is ignored.
    /// Fails with `DuplicateKey` if the username is taken.
    pub fn create(&self, mut user: User) -> Result<User> {
        let write_txn = self.db.begin_write()?;
        {
            let mut names = write_txn.open_table(USERNAMES)?;
            if names.get(user.username.as_str())?.is_some() {
                return Err(Error::DuplicateKey(format!("username {}", user.username)));
            }

            user.id = next_id(&write_txn, USER_SEQ_KEY)?;
            let bytes = encode(&user)?;
            let mut users = write_txn.open_table(USERS)?;
            users.insert(user.id, bytes.as_slice())?;
            names.insert(user.username.as_str(), user.id)?;
        }
        write_txn.commit()?;

        debug!(id = user.id, username = %user.username, "created user");
        Ok(user)
    }

    pub fn get(&self, id: u64) -> Result<Option<User>> {
        let read_txn = self.db.begin_read()?;
        let users = read_txn.open_table(USERS)?;
        let raw: Option<Vec<u8>> = users.get(id)?.map(|g| g.value().to_vec());
        raw.map(|bytes| decode(&bytes)).transpose()
    }

    pub fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let read_txn = self.db.begin_read()?;
        let names = read_txn.open_table(USERNAMES)?;
        let Some(id) = names.get(username)?.map(|g| g.value()) else {
            return Ok(None);
        };
        let users = read_txn.open_table(USERS)?;
        let raw: Option<Vec<u8>> = users.get(id)?.map(|g| g.value().to_vec());
        raw.map(|bytes| decode(&bytes)).transpose()
    }

    /// Overwrite an existing user. Renames keep the username index in step
    /// and fail with `DuplicateKey` if the new name belongs to someone else.
    pub fn update(&self, user: &User) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut users = write_txn.open_table(USERS)?;
            let raw: Option<Vec<u8>> = users.get(user.id)?.map(|g| g.value().to_vec());
            let Some(raw) = raw else {
                return Err(Error::NotFound(format!("user {}", user.id)));
            };
            let previous: User = decode(&raw)?;

            if previous.username != user.username {
                let mut names = write_txn.open_table(USERNAMES)?;
                let holder = names.get(user.username.as_str())?.map(|g| g.value());
                if holder.is_some_and(|id| id != user.id) {
                    return Err(Error::DuplicateKey(format!("username {}", user.username)));
                }
                names.remove(previous.username.as_str())?;
                names.insert(user.username.as_str(), user.id)?;
            }

            let bytes = encode(user)?;
            users.insert(user.id, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Delete a user by id. Returns true if it existed.
    pub fn delete(&self, id: u64) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut users = write_txn.open_table(USERS)?;
            let removed: Option<Vec<u8>> = users.remove(id)?.map(|g| g.value().to_vec());
            match removed {
                Some(bytes) => {
                    let user: User = decode(&bytes)?;
                    let mut names = write_txn.open_table(USERNAMES)?;
                    names.remove(user.username.as_str())?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(existed)
    }

    /// All users, ordered by id.
    pub fn list(&self) -> Result<Vec<User>> {
        let read_txn = self.db.begin_read()?;
        let users = read_txn.open_table(USERS)?;

        let mut out = Vec::new();
        for item in users.iter()? {
            let (_id, v) = item?;
            out.push(decode(v.value())?);
        }
        Ok(out)
    }

    pub fn is_empty(&self) -> Result<bool> {
        let read_txn = self.db.begin_read()?;
        let users = read_txn.open_table(USERS)?;
        let has_any = users.iter()?.next().is_some();
        Ok(!has_any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Permissions;
    use crate::store::Store;
    use tempfile::tempdir;

    fn make_store() -> (Store, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.db")).unwrap();
        (store, dir)
    }

    fn user(name: &str) -> User {
        User {
            id: 0,
            username: name.into(),
            password_hash: "hash".into(),
            admin: false,
            permissions: Permissions::default(),
        }
    }

    #[test]
    fn create_assigns_sequential_ids() {
        let (s, _dir) = make_store();
        assert!(s.users.is_empty().unwrap());
        let a = s.users.create(user("alice")).unwrap();
        let b = s.users.create(user("bob")).unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert!(!s.users.is_empty().unwrap());
        assert_eq!(s.users.get(2).unwrap().unwrap().username, "bob");
    }

    #[test]
    fn duplicate_username_rejected() {
        let (s, _dir) = make_store();
        let mut first = user("alice");
        first.admin = true;
        let first = s.users.create(first).unwrap();

        let err = s.users.create(user("alice")).unwrap_err();
        assert!(matches!(err, Error::DuplicateKey(_)));

        let stored = s.users.get_by_username("alice").unwrap().unwrap();
        assert_eq!(stored, first);
        assert_eq!(s.users.list().unwrap().len(), 1);
    }

    #[test]
    fn rejected_create_does_not_burn_id() {
        let (s, _dir) = make_store();
        s.users.create(user("alice")).unwrap();
        s.users.create(user("alice")).unwrap_err();
        assert_eq!(s.users.create(user("bob")).unwrap().id, 2);
    }

    #[test]
    fn update_renames_and_reindexes() {
        let (s, _dir) = make_store();
        let mut a = s.users.create(user("alice")).unwrap();
        a.username = "alicia".into();
        a.permissions.allow_edit = false;
        s.users.update(&a).unwrap();

        assert!(s.users.get_by_username("alice").unwrap().is_none());
        let renamed = s.users.get_by_username("alicia").unwrap().unwrap();
        assert_eq!(renamed.id, a.id);
        assert!(!renamed.permissions.allow_edit);
    }

    #[test]
    fn update_to_taken_name_rejected() {
        let (s, _dir) = make_store();
        s.users.create(user("alice")).unwrap();
        let mut b = s.users.create(user("bob")).unwrap();
        b.username = "alice".into();
        assert!(matches!(s.users.update(&b), Err(Error::DuplicateKey(_))));
        assert_eq!(s.users.get(b.id).unwrap().unwrap().username, "bob");
    }

    #[test]
    fn update_missing_user() {
        let (s, _dir) = make_store();
        let mut ghost = user("ghost");
        ghost.id = 42;
        assert!(matches!(s.users.update(&ghost), Err(Error::NotFound(_))));
    }

    #[test]
    fn delete_frees_username() {
        let (s, _dir) = make_store();
        let a = s.users.create(user("alice")).unwrap();
        assert!(s.users.delete(a.id).unwrap());
        assert!(!s.users.delete(a.id).unwrap());
        assert!(s.users.get_by_username("alice").unwrap().is_none());
        s.users.create(user("alice")).unwrap();
    }
}
