//! One-way merge-sync reconciliation.
//!
//! A pass walks every stored mapping and converges each destination
//! playlist toward the union of its source playlists:
//!   additions — tracks added to a changed source after the mapping's
//!   `last_synced_at` watermark, not yet in the destination;
//!   removals  — destination tracks no longer present in any live source.
//!
//! Change detection is by snapshot id: a source whose live snapshot equals
//! the stored one is unchanged, and a mapping with no changed sources is
//! skipped without mutation. Stored snapshots are only advanced after the
//! corresponding mutations succeed, so a failed pass is retried in full on
//! the next run.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::try_join_all;

use crate::error::{Error, Result};
use crate::mapping_db::{MappingDb, SyncMapping};
use crate::service::{
    Playlist, PlaylistService, ServiceFactory, MAX_TRACKS_PER_CALL, SYNC_FIELDS,
};

/// Counts for one reconciliation pass, for logging and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub users: usize,
    pub applied: usize,
    pub unchanged: usize,
    pub pruned: usize,
    pub failed: usize,
}

#[derive(Debug)]
enum Outcome {
    Unchanged,
    Applied { added: usize, removed: usize },
    Pruned,
}

pub struct SyncEngine {
    mappings: Arc<MappingDb>,
    services: Arc<dyn ServiceFactory>,
}

impl SyncEngine {
    pub fn new(mappings: Arc<MappingDb>, services: Arc<dyn ServiceFactory>) -> Self {
        Self { mappings, services }
    }

    /// Run one full reconciliation pass over every user's mappings.
    ///
    /// Failures are contained per mapping: one broken mapping does not stop
    /// the rest of the user's document, and one broken user does not stop
    /// other users. Authorization failures abort the remaining mappings of
    /// that user only, since every one of them would fail the same way.
    pub async fn run_pass(&self) -> Result<PassSummary> {
        let all = self.mappings.all_mappings()?;
        let mut summary = PassSummary {
            users: all.len(),
            ..PassSummary::default()
        };
        tracing::info!(users = all.len(), "starting reconciliation pass");

        for (user_id, document) in all {
            let service = match self.services.open(&user_id).await {
                Ok(service) => service,
                Err(Error::CredentialNotFound(_)) => {
                    tracing::warn!(user = %user_id, "no stored credential; skipping user");
                    summary.failed += document.len();
                    continue;
                }
                Err(e) => {
                    tracing::warn!(user = %user_id, error = %e, "failed to open service; skipping user");
                    summary.failed += document.len();
                    continue;
                }
            };

            let mut remaining = document.len();
            for (destination_id, mapping) in document {
                match self
                    .sync_mapping(&user_id, service.as_ref(), &destination_id, &mapping)
                    .await
                {
                    Ok(Outcome::Unchanged) => summary.unchanged += 1,
                    Ok(Outcome::Applied { added, removed }) => {
                        tracing::info!(
                            user = %user_id,
                            destination = %destination_id,
                            added,
                            removed,
                            "mapping synced"
                        );
                        summary.applied += 1;
                    }
                    Ok(Outcome::Pruned) => {
                        tracing::info!(
                            user = %user_id,
                            destination = %destination_id,
                            "destination deleted remotely; mapping pruned"
                        );
                        summary.pruned += 1;
                    }
                    Err(e @ (Error::Authorization(_) | Error::CredentialNotFound(_))) => {
                        tracing::warn!(
                            user = %user_id,
                            error = %e,
                            "authorization failed; skipping user's remaining mappings"
                        );
                        summary.failed += remaining;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            user = %user_id,
                            destination = %destination_id,
                            error = %e,
                            "mapping failed; continuing"
                        );
                        summary.failed += 1;
                    }
                }
                remaining -= 1;
            }
        }

        tracing::info!(
            applied = summary.applied,
            unchanged = summary.unchanged,
            pruned = summary.pruned,
            failed = summary.failed,
            "reconciliation pass finished"
        );
        Ok(summary)
    }

    async fn sync_mapping(
        &self,
        user_id: &str,
        service: &dyn PlaylistService,
        destination_id: &str,
        mapping: &SyncMapping,
    ) -> Result<Outcome> {
        if !service.playlist_exists(destination_id).await? {
            self.mappings.delete_mapping(user_id, destination_id)?;
            return Ok(Outcome::Pruned);
        }

        let destination = service.get_playlist(destination_id, SYNC_FIELDS).await?;
        let live_sources = try_join_all(
            mapping
                .sources
                .iter()
                .map(|source| service.get_playlist(&source.id, SYNC_FIELDS)),
        )
        .await?;

        // A source is changed when its live snapshot differs from the one
        // recorded after the last successful sync.
        let changed: Vec<&Playlist> = mapping
            .sources
            .iter()
            .zip(&live_sources)
            .filter(|(stored, live)| stored.snapshot_id != live.snapshot_id)
            .map(|(_, live)| live)
            .collect();
        if changed.is_empty() {
            tracing::debug!(
                user = %user_id,
                destination = %destination_id,
                "no source changed; skipping"
            );
            return Ok(Outcome::Unchanged);
        }

        let destination_uris: HashSet<&str> =
            destination.tracks.iter().map(|t| t.uri.as_str()).collect();

        // Additions come only from changed sources: tracks added after the
        // watermark and not already in the destination. First occurrence
        // wins when sources overlap.
        let mut seen = HashSet::new();
        let additions: Vec<String> = changed
            .iter()
            .flat_map(|source| &source.tracks)
            .filter(|track| track.added_at > mapping.last_synced_at)
            .filter(|track| !destination_uris.contains(track.uri.as_str()))
            .filter(|track| seen.insert(track.uri.as_str()))
            .map(|track| track.uri.clone())
            .collect();

        // Removals compare against the union of ALL live sources, changed
        // or not: a track is only dropped once no source carries it.
        let union: HashSet<&str> = live_sources
            .iter()
            .flat_map(|source| &source.tracks)
            .map(|track| track.uri.as_str())
            .collect();
        let mut seen = HashSet::new();
        let removals: Vec<String> = destination
            .tracks
            .iter()
            .filter(|track| !union.contains(track.uri.as_str()))
            .filter(|track| seen.insert(track.uri.as_str()))
            .map(|track| track.uri.clone())
            .collect();

        if !additions.is_empty() {
            let mut snapshot = String::new();
            for chunk in additions.chunks(MAX_TRACKS_PER_CALL) {
                snapshot = service.add_tracks(destination_id, chunk, None).await?;
            }
            self.mappings
                .update_snapshot(user_id, destination_id, &snapshot, None)?;
        }
        if !removals.is_empty() {
            let mut snapshot = String::new();
            for chunk in removals.chunks(MAX_TRACKS_PER_CALL) {
                snapshot = service.remove_tracks(destination_id, chunk).await?;
            }
            self.mappings
                .update_snapshot(user_id, destination_id, &snapshot, None)?;
        }

        // Record the source snapshots we reconciled against so the next
        // pass sees these sources as unchanged.
        for source in &changed {
            self.mappings
                .update_snapshot(user_id, destination_id, &source.snapshot_id, Some(&source.id))?;
        }

        Ok(Outcome::Applied {
            added: additions.len(),
            removed: removals.len(),
        })
    }
}
