//! Tributary — one-way merge-sync of Spotify playlists.
//!
//! Each user can map several "source" playlists onto one "destination"
//! playlist. A scheduled reconciliation pass detects which sources changed
//! since the last run (by snapshot id), propagates newly added tracks into
//! the destination, and removes destination tracks that no longer appear in
//! any live source.
//!
//! Modules:
//! - [`service`]: the remote playlist client (pagination, batched mutation,
//!   refresh-once token renewal) behind the [`service::PlaylistService`] trait
//! - [`mapping_db`]: durable per-user sync-mapping documents in redb
//! - [`sync`]: the reconciliation engine, one pass over all mappings
//! - [`credentials`]: per-user access/refresh token storage

pub mod config;
pub mod credentials;
pub mod error;
pub mod mapping_db;
pub mod service;
pub mod sync;

pub use error::{Error, Result};
