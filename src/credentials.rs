//! Per-user Spotify credential storage.
//!
//! The OAuth handshake that first obtains a token pair happens outside this
//! process. This module only reads credentials back and persists refreshed
//! access tokens; the playlist client is the sole writer.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{Database, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const CREDENTIALS: TableDefinition<&str, &[u8]> = TableDefinition::new("credentials");

/// A user's token pair as issued by the accounts service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessCredential {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Keyed credential storage, owned by the auth collaborator.
///
/// Async so remote-backed implementations can slot in behind the same
/// interface as the local redb one.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the stored credential for a user. Returns None if the user
    /// never completed the authorization handshake.
    async fn load(&self, user_id: &str) -> Result<Option<AccessCredential>>;

    /// Persist a credential, overwriting any previous one.
    async fn save(&self, user_id: &str, credential: &AccessCredential) -> Result<()>;
}

/// Credential store backed by a table in the shared redb database.
pub struct RedbCredentialStore {
    db: Arc<Database>,
}

impl RedbCredentialStore {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        // Ensure the table exists
        let txn = db.begin_write()?;
        txn.open_table(CREDENTIALS)?;
        txn.commit()?;
        Ok(Self { db })
    }
}

#[async_trait]
impl CredentialStore for RedbCredentialStore {
    async fn load(&self, user_id: &str) -> Result<Option<AccessCredential>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CREDENTIALS)?;
        match table.get(user_id)? {
            Some(data) => {
                let credential: AccessCredential = serde_json::from_slice(data.value())
                    .map_err(|e| Error::Validation(format!(
                        "corrupt credential record for user {user_id}: {e}"
                    )))?;
                Ok(Some(credential))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, user_id: &str, credential: &AccessCredential) -> Result<()> {
        let data = serde_json::to_vec(credential)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(CREDENTIALS)?;
            table.insert(user_id, data.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }
}
