//! Remote playlist service abstraction.
//!
//! The reconciliation engine talks to the remote service through
//! [`PlaylistService`], constructed per user via [`ServiceFactory`]. The
//! real implementation is [`spotify::SpotifyClient`]; tests substitute an
//! in-memory mock.

pub mod spotify;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::Result;

/// Hard remote-service limit on track uris per add/remove call.
pub const MAX_TRACKS_PER_CALL: usize = 100;

/// Field projection used by the sync pass: just enough to diff membership
/// by uri and filter by add-timestamp.
pub const SYNC_FIELDS: &str = "id,uri,snapshot_id,tracks.items(added_at,track(uri))";

/// A playlist as listed in the current user's library.
#[derive(Debug, Clone)]
pub struct PlaylistSummary {
    pub id: String,
    pub uri: String,
    pub name: String,
    pub snapshot_id: String,
}

/// A playlist fetched with the sync field projection.
#[derive(Debug, Clone)]
pub struct Playlist {
    pub id: String,
    pub uri: String,
    pub snapshot_id: String,
    pub tracks: Vec<PlaylistTrack>,
}

/// One track within a playlist-fetch result. Transient: used during
/// diffing, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistTrack {
    pub uri: String,
    pub added_at: DateTime<Utc>,
}

/// One page of a playlist's tracks. `total` is the playlist-wide count as
/// reported by the service, not the page size.
#[derive(Debug, Clone)]
pub struct TracksPage {
    pub items: Vec<PlaylistTrack>,
    pub total: u32,
    pub limit: u32,
    pub offset: u32,
}

impl TracksPage {
    /// More pages remain only while the running offset has not reached the
    /// reported total. A page shorter than `limit` alone does not end the
    /// loop.
    pub fn has_more(&self) -> bool {
        self.total > self.offset + self.limit
    }
}

/// Everything the reconciliation engine needs from the remote service.
#[async_trait]
pub trait PlaylistService: Send + Sync {
    /// Whether the playlist still exists remotely. Used to detect deletion
    /// by the user outside the system.
    async fn playlist_exists(&self, id: &str) -> Result<bool>;

    /// Fetch one playlist with a server-side field projection.
    async fn get_playlist(&self, id: &str, fields: &str) -> Result<Playlist>;

    /// Add up to [`MAX_TRACKS_PER_CALL`] tracks; returns the new snapshot
    /// id. Callers chunk.
    async fn add_tracks(
        &self,
        playlist_id: &str,
        uris: &[String],
        position: Option<u32>,
    ) -> Result<String>;

    /// Remove up to [`MAX_TRACKS_PER_CALL`] tracks; returns the new
    /// snapshot id. Callers chunk.
    async fn remove_tracks(&self, playlist_id: &str, uris: &[String]) -> Result<String>;
}

/// Per-user construction of a ready-to-use [`PlaylistService`].
///
/// Construction is two-phase on purpose: the factory holds no per-user
/// state, and `open` does the credential lookup, failing with
/// [`crate::Error::CredentialNotFound`] when the user never authorized.
#[async_trait]
pub trait ServiceFactory: Send + Sync {
    async fn open(&self, user_id: &str) -> Result<Box<dyn PlaylistService>>;
}

/// Generic `limit`/`next`-cursor page envelope shared by the Spotify
/// listing and track endpoints.
#[derive(Debug, Deserialize)]
pub(crate) struct PagingResponse<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    pub next: Option<String>,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}
