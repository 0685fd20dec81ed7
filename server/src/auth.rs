//! Credential storage consulted by the handshake
//!
//! The handshake only needs three questions answered, so the store is a small
//! trait. `MemoryAuthStore` backs tests and throwaway servers;
//! `FileAuthStore` keeps the table on disk as bincode and rewrites it after
//! every registration.

use crate::error::StoreError;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use shared::Credentials;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Account lookup and creation
///
/// Implementations may block on disk I/O; the handshake always calls them
/// from `tokio::task::spawn_blocking`.
pub trait AuthStore: Send + Sync {
    fn user_exists(&self, pseudo: &str) -> Result<bool, StoreError>;

    fn create_user(&self, pseudo: &str, password: &str) -> Result<(), StoreError>;

    /// Exact, case-sensitive match on both pseudo and password
    fn verify_credentials(&self, pseudo: &str, password: &str) -> Result<bool, StoreError>;
}

/// Persisted form of the credential table
#[derive(Debug, Default, Serialize, Deserialize)]
struct UserTable {
    users: HashMap<String, String>,
}

impl UserTable {
    fn insert(&mut self, pseudo: &str, password: &str) -> Result<(), StoreError> {
        if self.users.contains_key(pseudo) {
            return Err(StoreError::AlreadyExists(pseudo.to_string()));
        }
        self.users.insert(pseudo.to_string(), password.to_string());
        Ok(())
    }

    fn verify(&self, pseudo: &str, password: &str) -> bool {
        self.users
            .get(pseudo)
            .map(|stored| stored == password)
            .unwrap_or(false)
    }
}

#[derive(Debug, Default)]
pub struct MemoryAuthStore {
    table: Mutex<UserTable>,
}

impl MemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users<'a>(users: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let users = users
            .into_iter()
            .map(|(pseudo, password)| (pseudo.to_string(), password.to_string()))
            .collect();
        Self {
            table: Mutex::new(UserTable { users }),
        }
    }
}

impl AuthStore for MemoryAuthStore {
    fn user_exists(&self, pseudo: &str) -> Result<bool, StoreError> {
        let table = self.table.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(table.users.contains_key(pseudo))
    }

    fn create_user(&self, pseudo: &str, password: &str) -> Result<(), StoreError> {
        let mut table = self.table.lock().map_err(|_| StoreError::Poisoned)?;
        table.insert(pseudo, password)
    }

    fn verify_credentials(&self, pseudo: &str, password: &str) -> Result<bool, StoreError> {
        let table = self.table.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(table.verify(pseudo, password))
    }
}

pub struct FileAuthStore {
    path: PathBuf,
    table: Mutex<UserTable>,
}

impl FileAuthStore {
    /// Loads the table at `path`; a missing file starts an empty table
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let table = if path.exists() {
            let bytes = fs::read(&path)?;
            bincode::deserialize(&bytes)?
        } else {
            debug!("No credential table at {}, starting empty", path.display());
            UserTable::default()
        };

        info!(
            "Loaded {} account(s) from {}",
            table.users.len(),
            path.display()
        );
        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    fn persist(&self, table: &UserTable) -> Result<(), StoreError> {
        let bytes = bincode::serialize(table)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl AuthStore for FileAuthStore {
    fn user_exists(&self, pseudo: &str) -> Result<bool, StoreError> {
        let table = self.table.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(table.users.contains_key(pseudo))
    }

    fn create_user(&self, pseudo: &str, password: &str) -> Result<(), StoreError> {
        let mut table = self.table.lock().map_err(|_| StoreError::Poisoned)?;
        table.insert(pseudo, password)?;
        if let Err(e) = self.persist(&table) {
            table.users.remove(pseudo);
            return Err(e);
        }
        Ok(())
    }

    fn verify_credentials(&self, pseudo: &str, password: &str) -> Result<bool, StoreError> {
        let table = self.table.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(table.verify(pseudo, password))
    }
}

/// Startup check for the operator console, independent of chat accounts
pub fn operator_gate(expected: &Credentials, supplied: &Credentials) -> bool {
    expected.pseudo == supplied.pseudo && expected.password == supplied.password
}
