//! The Consul-like KV store from §4.G's default-shell precedence chain:
//! `GET /v1/kv/<prefix>/<owner_id>` returning the shell path as a plain
//! string, or nothing if the key is unset.

use async_trait::async_trait;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Looks up a per-owner default shell override. `Ok(None)` means the key
    /// is simply absent, which is not an error: the caller falls through to
    /// the next link in the precedence chain.
    async fn default_shell(&self, owner_id: i64) -> anyhow::Result<Option<String>>;
}

pub struct ConsulKvStore {
    client: reqwest::Client,
    base_url: String,
    key_prefix: String,
}

impl ConsulKvStore {
    pub fn new(base_url: impl Into<String>, key_prefix: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            key_prefix: key_prefix.into(),
        }
    }
}

#[async_trait]
impl KvStore for ConsulKvStore {
    async fn default_shell(&self, owner_id: i64) -> anyhow::Result<Option<String>> {
        let url = format!(
            "{}/v1/kv/{}/{owner_id}?raw",
            self.base_url.trim_end_matches('/'),
            self.key_prefix
        );
        let resp = self.client.get(&url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp.error_for_status()?;
        let body = resp.text().await?;
        if body.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(body))
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct FakeKvStore {
        pub shells: HashMap<i64, String>,
    }

    impl FakeKvStore {
        pub fn with_shell(mut self, owner_id: i64, shell: impl Into<String>) -> Self {
            self.shells.insert(owner_id, shell.into());
            self
        }
    }

    #[async_trait]
    impl KvStore for FakeKvStore {
        async fn default_shell(&self, owner_id: i64) -> anyhow::Result<Option<String>> {
            Ok(self.shells.get(&owner_id).cloned())
        }
    }
}
