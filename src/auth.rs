//! §4.F Auth resolver: turns an offered `(username, public key)` pair into
//! [`Credentials`] or an [`AuthError`]. The registry lookup and the
//! authorized-keys comparison are the only things this module does; it
//! does not know about SSH wire details beyond the key's serialized form.

use std::sync::Arc;

use subtle::ConstantTimeEq;

use crate::error::AuthError;
use crate::model::Credentials;
use crate::registry::{ContainerRegistry, Lookup};

/// Classifies an SSH username: `id.<n>` names a row by numeric id, anything
/// else names it by the `name` column.
fn classify_username(username: &str) -> Result<UsernameKind<'_>, AuthError> {
    match username.strip_prefix("id.") {
        Some(rest) => rest
            .parse::<i64>()
            .map(UsernameKind::Id)
            .map_err(|_| AuthError::IdNotInteger),
        None => Ok(UsernameKind::Name(username)),
    }
}

enum UsernameKind<'a> {
    Id(i64),
    Name(&'a str),
}

/// Resolves public-key auth against a [`ContainerRegistry`]. One instance is
/// shared across all connections; it holds no per-connection state.
pub struct AuthResolver {
    registry: Arc<dyn ContainerRegistry>,
}

impl AuthResolver {
    pub fn new(registry: Arc<dyn ContainerRegistry>) -> Self {
        Self { registry }
    }

    /// Runs the full §4.F flow for one offered key. `offered_wire_form` is
    /// the candidate key's serialized wire bytes (e.g. from
    /// `PublicKeyBase64::public_key_base64()`), used as the right-hand side
    /// of every constant-time comparison.
    pub async fn authenticate(
        &self,
        username: &str,
        offered_wire_form: &[u8],
    ) -> Result<Credentials, AuthError> {
        let key = classify_username(username)?;
        let lookup = match key {
            UsernameKind::Id(id) => Lookup::Id(id),
            UsernameKind::Name(name) => Lookup::Name(name),
        };
        let row = self.registry.lookup(lookup).await?;

        let candidates = self
            .registry
            .authorized_keys(row.owner_id)
            .await
            .map_err(AuthError::Internal)?;

        let matched = candidates
            .iter()
            .filter_map(|line| ssh_key::PublicKey::from_openssh(line).ok())
            .any(|parsed| key_matches(&parsed, offered_wire_form));

        if !matched {
            return Err(AuthError::PermissionDenied);
        }

        Ok(Credentials {
            container_id: row.container_id,
            account_id: row.account_id,
            owner_id: row.owner_id,
            default_shell: row.default_shell.unwrap_or_default(),
        })
    }
}

/// Constant-time comparison of `candidate`'s wire form against
/// `offered_wire_form`. Mismatched lengths short-circuit (lengths are not
/// secret: they are determined by key type, which is sent in the clear),
/// but once lengths match, every byte is compared.
fn key_matches(candidate: &ssh_key::PublicKey, offered_wire_form: &[u8]) -> bool {
    let candidate_bytes = candidate.to_bytes().unwrap_or_default();
    if candidate_bytes.len() != offered_wire_form.len() {
        return false;
    }
    candidate_bytes.ct_eq(offered_wire_form).into()
}
