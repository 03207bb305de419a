//! The relational store from §6: one row per container, keyed either by its
//! numeric id or by a human-assigned name, plus the authorized public keys
//! for the row's owner. `auth.rs` is the only caller; it does not know or
//! care whether a username was the `id.`-prefixed form or the bare name
//! form, because [`ContainerRegistry::lookup`] takes the already-classified
//! [`Lookup`] key.

use async_trait::async_trait;
use sqlx::mysql::MySqlPool;
use sqlx::Row;

use crate::error::AuthError;

/// A registry row: everything `auth.rs` needs to build [`crate::model::Credentials`].
#[derive(Debug, Clone)]
pub struct ContainerRow {
    pub account_id: i64,
    pub container_id: String,
    pub owner_id: i64,
    /// `NULL` in the table means "no override"; callers fall through the
    /// rest of the §4.G precedence chain.
    pub default_shell: Option<String>,
}

/// The two ways a client's SSH username can identify a container, per
/// `connWorker.go`'s `id.`-prefix convention.
pub enum Lookup<'a> {
    Id(i64),
    Name(&'a str),
}

#[async_trait]
pub trait ContainerRegistry: Send + Sync {
    async fn lookup(&self, key: Lookup<'_>) -> Result<ContainerRow, AuthError>;
    async fn authorized_keys(&self, owner_id: i64) -> anyhow::Result<Vec<String>>;
}

pub struct MySqlRegistry {
    pool: MySqlPool,
}

impl MySqlRegistry {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContainerRegistry for MySqlRegistry {
    async fn lookup(&self, key: Lookup<'_>) -> Result<ContainerRow, AuthError> {
        let row = match key {
            Lookup::Id(id) => {
                sqlx::query("SELECT id, cid, uid, defaultShell FROM containers WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| AuthError::Internal(e.into()))?
            }
            Lookup::Name(name) => {
                sqlx::query("SELECT id, cid, uid, defaultShell FROM containers WHERE name = ?")
                    .bind(name)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| AuthError::Internal(e.into()))?
            }
        };
        let row = row.ok_or(AuthError::NotFound)?;
        Ok(ContainerRow {
            account_id: row.try_get("id").map_err(|e| AuthError::Internal(e.into()))?,
            container_id: row.try_get("cid").map_err(|e| AuthError::Internal(e.into()))?,
            owner_id: row.try_get("uid").map_err(|e| AuthError::Internal(e.into()))?,
            default_shell: row
                .try_get("defaultShell")
                .map_err(|e| AuthError::Internal(e.into()))?,
        })
    }

    async fn authorized_keys(&self, owner_id: i64) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query("SELECT pubkey FROM authorized_keys WHERE uid = ?")
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| row.try_get::<String, _>("pubkey").map_err(Into::into))
            .collect()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeRegistry {
        by_id: HashMap<i64, ContainerRow>,
        by_name: HashMap<String, ContainerRow>,
        keys: HashMap<i64, Vec<String>>,
        pub lookups: Mutex<Vec<String>>,
    }

    impl FakeRegistry {
        pub fn with_container(mut self, row: ContainerRow, name: Option<&str>) -> Self {
            if let Some(name) = name {
                self.by_name.insert(name.to_string(), row.clone());
            }
            self.by_id.insert(row.account_id, row);
            self
        }

        pub fn with_keys(mut self, owner_id: i64, keys: Vec<String>) -> Self {
            self.keys.insert(owner_id, keys);
            self
        }
    }

    #[async_trait]
    impl ContainerRegistry for FakeRegistry {
        async fn lookup(&self, key: Lookup<'_>) -> Result<ContainerRow, AuthError> {
            match key {
                Lookup::Id(id) => {
                    self.lookups.lock().unwrap().push(format!("id:{id}"));
                    self.by_id.get(&id).cloned().ok_or(AuthError::NotFound)
                }
                Lookup::Name(name) => {
                    self.lookups.lock().unwrap().push(format!("name:{name}"));
                    self.by_name.get(name).cloned().ok_or(AuthError::NotFound)
                }
            }
        }

        async fn authorized_keys(&self, owner_id: i64) -> anyhow::Result<Vec<String>> {
            Ok(self.keys.get(&owner_id).cloned().unwrap_or_default())
        }
    }
}
