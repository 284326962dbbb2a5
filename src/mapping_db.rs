//! Sync-mapping documents backed by redb.
//!
//! One table, one JSON document per user:
//!   mappings:  user_id → { destination_playlist_id → SyncMapping }
//!
//! Every operation is a single read-modify-write transaction against one
//! user's document. There is no cross-writer version check; last writer
//! wins when a user-submitted mapping races a reconciliation pass.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const MAPPINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("mappings");

/// A remote playlist at a point in time. The snapshot id is the opaque
/// version token the service assigns; two equal snapshot ids for the same
/// playlist mean its track membership is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistRef {
    pub id: String,
    pub uri: String,
    pub snapshot_id: String,
}

/// One destination playlist merged from N source playlists, owned by one
/// user. `last_synced_at` is the low-water-mark: only tracks added to a
/// source strictly after it are propagated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMapping {
    pub destination: PlaylistRef,
    pub sources: Vec<PlaylistRef>,
    pub last_synced_at: DateTime<Utc>,
}

impl SyncMapping {
    /// A mapping must have at least one source, and source ids must be
    /// distinct.
    fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(Error::Validation(format!(
                "mapping for destination {} has no sources",
                self.destination.id
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.id.as_str()) {
                return Err(Error::Validation(format!(
                    "mapping for destination {} lists source {} twice",
                    self.destination.id, source.id
                )));
            }
        }
        Ok(())
    }
}

/// The per-user mapping document: destination playlist id → mapping.
/// BTreeMap keeps iteration order stable across passes.
pub type MappingDocument = BTreeMap<String, SyncMapping>;

/// Handle to the mappings table of the shared redb database. The database
/// itself is opened by the process entry point and passed in.
pub struct MappingDb {
    db: Arc<Database>,
}

impl MappingDb {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        // Ensure the table exists
        let txn = db.begin_write()?;
        txn.open_table(MAPPINGS)?;
        txn.commit()?;
        Ok(Self { db })
    }

    /// Full scan of every user's mapping document. Used once per
    /// reconciliation pass.
    pub fn all_mappings(&self) -> Result<BTreeMap<String, MappingDocument>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(MAPPINGS)?;
        let mut collections = BTreeMap::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            let document = Self::decode(key.value(), value.value())?;
            collections.insert(key.value().to_string(), document);
        }
        Ok(collections)
    }

    /// One user's mapping document. Empty if the user has no mappings.
    pub fn user_mappings(&self, user_id: &str) -> Result<MappingDocument> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(MAPPINGS)?;
        match table.get(user_id)? {
            Some(data) => Self::decode(user_id, data.value()),
            None => Ok(MappingDocument::new()),
        }
    }

    /// A single mapping, keyed by its destination playlist id.
    pub fn get_mapping(&self, user_id: &str, destination_id: &str) -> Result<SyncMapping> {
        self.user_mappings(user_id)?
            .remove(destination_id)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "mapping {destination_id} for user {user_id}"
                ))
            })
    }

    /// Insert or overwrite a mapping, keyed by its destination id. Creates
    /// the user's document on first use.
    pub fn upsert_mapping(&self, user_id: &str, mapping: SyncMapping) -> Result<()> {
        mapping.validate()?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(MAPPINGS)?;
            let mut document = match table.get(user_id)? {
                Some(data) => Self::decode(user_id, data.value())?,
                None => MappingDocument::new(),
            };
            document.insert(mapping.destination.id.clone(), mapping);
            let data = serde_json::to_vec(&document)?;
            table.insert(user_id, data.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Update exactly one snapshot id within a mapping — the destination's
    /// when `source_id` is None, otherwise the matching source's — and
    /// advance `last_synced_at`. The timestamp never moves backward.
    pub fn update_snapshot(
        &self,
        user_id: &str,
        destination_id: &str,
        new_snapshot_id: &str,
        source_id: Option<&str>,
    ) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(MAPPINGS)?;
            let mut document = match table.get(user_id)? {
                Some(data) => Self::decode(user_id, data.value())?,
                None => {
                    return Err(Error::NotFound(format!(
                        "mapping document for user {user_id}"
                    )))
                }
            };
            let mapping = document.get_mut(destination_id).ok_or_else(|| {
                Error::NotFound(format!(
                    "mapping {destination_id} for user {user_id}"
                ))
            })?;
            match source_id {
                None => mapping.destination.snapshot_id = new_snapshot_id.to_string(),
                Some(id) => {
                    let source = mapping
                        .sources
                        .iter_mut()
                        .find(|s| s.id == id)
                        .ok_or_else(|| {
                            Error::NotFound(format!(
                                "source {id} in mapping {destination_id} for user {user_id}"
                            ))
                        })?;
                    source.snapshot_id = new_snapshot_id.to_string();
                }
            }
            mapping.last_synced_at = mapping.last_synced_at.max(Utc::now());
            let data = serde_json::to_vec(&document)?;
            table.insert(user_id, data.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Remove one mapping. Removes the whole user document when the last
    /// mapping goes, rather than leaving an empty map behind.
    pub fn delete_mapping(&self, user_id: &str, destination_id: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(MAPPINGS)?;
            let mut document = match table.get(user_id)? {
                Some(data) => Self::decode(user_id, data.value())?,
                None => {
                    return Err(Error::NotFound(format!(
                        "mapping document for user {user_id}"
                    )))
                }
            };
            if document.remove(destination_id).is_none() {
                return Err(Error::NotFound(format!(
                    "mapping {destination_id} for user {user_id}"
                )));
            }
            if document.is_empty() {
                table.remove(user_id)?;
            } else {
                let data = serde_json::to_vec(&document)?;
                table.insert(user_id, data.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn decode(user_id: &str, data: &[u8]) -> Result<MappingDocument> {
        serde_json::from_slice(data).map_err(|e| {
            Error::Validation(format!(
                "corrupt mapping document for user {user_id}: {e}"
            ))
        })
    }
}
