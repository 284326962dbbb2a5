//! Spotify Web API client.
//!
//! One client per user, bound to that user's stored credential. Every
//! request goes through [`SpotifyClient::send_with_auth_retry`], which
//! performs at most one token refresh and one retry on a 401 — a revoked
//! refresh token therefore fails fast instead of looping.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use reqwest::{header, Client as HttpClient, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;

use super::{
    PagingResponse, Playlist, PlaylistService, PlaylistSummary, PlaylistTrack, ServiceFactory,
    TracksPage, MAX_TRACKS_PER_CALL,
};
use crate::credentials::{AccessCredential, CredentialStore};
use crate::error::{Error, Result};

/// Endpoints and app credentials for the Spotify Web API. Base urls are
/// configurable so tests and the config file can point elsewhere.
#[derive(Debug, Clone)]
pub struct SpotifyApiConfig {
    pub api_base_url: String,
    pub accounts_base_url: String,
    pub client_id: String,
    pub client_secret: String,
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    id: String,
    uri: String,
    name: String,
    snapshot_id: String,
}

impl From<PlaylistItem> for PlaylistSummary {
    fn from(item: PlaylistItem) -> Self {
        Self {
            id: item.id,
            uri: item.uri,
            name: item.name,
            snapshot_id: item.snapshot_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlaylistResponse {
    id: String,
    uri: String,
    snapshot_id: String,
    tracks: Option<TracksEnvelope>,
}

#[derive(Debug, Deserialize)]
struct TracksEnvelope {
    #[serde(default)]
    items: Vec<TrackItem>,
}

#[derive(Debug, Deserialize)]
struct TrackItem {
    added_at: DateTime<Utc>,
    // Null for tracks the service can no longer resolve
    track: Option<TrackBody>,
}

#[derive(Debug, Deserialize)]
struct TrackBody {
    uri: String,
}

impl From<PlaylistResponse> for Playlist {
    fn from(body: PlaylistResponse) -> Self {
        let tracks = body
            .tracks
            .map(|envelope| {
                envelope
                    .items
                    .into_iter()
                    .filter_map(|item| {
                        item.track.map(|t| PlaylistTrack {
                            uri: t.uri,
                            added_at: item.added_at,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            id: body.id,
            uri: body.uri,
            snapshot_id: body.snapshot_id,
            tracks,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    snapshot_id: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    token_type: Option<String>,
    expires_in: Option<i64>,
    // The accounts service rotates refresh tokens only sometimes
    refresh_token: Option<String>,
}

// ── Client ───────────────────────────────────────────────────────────────

pub struct SpotifyClient {
    http: HttpClient,
    user_id: String,
    api: SpotifyApiConfig,
    credentials: Arc<dyn CredentialStore>,
    credential: Mutex<AccessCredential>,
}

impl SpotifyClient {
    /// Open a client for one user. Fails with
    /// [`Error::CredentialNotFound`] when the user never completed the
    /// authorization handshake. Does no network I/O.
    pub async fn open(
        user_id: &str,
        http: HttpClient,
        api: SpotifyApiConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self> {
        let credential = credentials
            .load(user_id)
            .await?
            .ok_or_else(|| Error::CredentialNotFound(user_id.to_string()))?;
        Ok(Self {
            http,
            user_id: user_id.to_string(),
            api,
            credentials,
            credential: Mutex::new(credential),
        })
    }

    /// Lazy pager over the current user's playlists. Follows the service's
    /// `next` cursor; restartable from the last cursor via
    /// [`PlaylistPager::resume`].
    pub fn owned_playlists(&self, page_size: u32) -> PlaylistPager<'_> {
        let first = format!("{}/me/playlists?limit={page_size}", self.api.api_base_url);
        PlaylistPager {
            client: self,
            next: Some(first),
        }
    }

    pub async fn get_playlist(&self, id: &str, fields: &str) -> Result<Playlist> {
        let url = format!("{}/playlists/{id}", self.api.api_base_url);
        let resp = self
            .send_with_auth_retry(|token| {
                self.http.get(&url).query(&[("fields", fields)]).bearer_auth(token)
            })
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("playlist {id}")));
        }
        let body: PlaylistResponse = Self::checked(resp).await?.json().await?;
        Ok(body.into())
    }

    pub async fn playlist_tracks_page(
        &self,
        id: &str,
        limit: u32,
        offset: u32,
        fields: &str,
    ) -> Result<TracksPage> {
        let url = format!("{}/playlists/{id}/tracks", self.api.api_base_url);
        let resp = self
            .send_with_auth_retry(|token| {
                self.http
                    .get(&url)
                    .query(&[
                        ("limit", limit.to_string()),
                        ("offset", offset.to_string()),
                        ("fields", fields.to_string()),
                    ])
                    .bearer_auth(token)
            })
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("playlist {id}")));
        }
        let page: PagingResponse<TrackItem> = Self::checked(resp).await?.json().await?;
        let items = page
            .items
            .into_iter()
            .filter_map(|item| {
                item.track.map(|t| PlaylistTrack {
                    uri: t.uri,
                    added_at: item.added_at,
                })
            })
            .collect();
        Ok(TracksPage {
            items,
            total: page.total,
            limit: if page.limit > 0 { page.limit } else { limit },
            offset: page.offset,
        })
    }

    /// Fetch every track of a playlist by repeated paging.
    pub async fn all_playlist_tracks(&self, id: &str, fields: &str) -> Result<Vec<PlaylistTrack>> {
        let limit = MAX_TRACKS_PER_CALL as u32;
        let mut offset = 0;
        let mut tracks = Vec::new();
        loop {
            let page = self.playlist_tracks_page(id, limit, offset, fields).await?;
            let more = page.has_more();
            tracks.extend(page.items);
            if !more {
                return Ok(tracks);
            }
            offset += limit;
        }
    }

    pub async fn add_tracks(
        &self,
        playlist_id: &str,
        uris: &[String],
        position: Option<u32>,
    ) -> Result<String> {
        Self::check_batch(uris, "add_tracks")?;
        let url = format!("{}/playlists/{playlist_id}/tracks", self.api.api_base_url);
        let mut body = json!({ "uris": uris });
        if let Some(pos) = position {
            body["position"] = json!(pos);
        }
        let resp = self
            .send_with_auth_retry(|token| self.http.post(&url).bearer_auth(token).json(&body))
            .await?;
        let snapshot: SnapshotResponse = Self::checked(resp).await?.json().await?;
        Ok(snapshot.snapshot_id)
    }

    pub async fn remove_tracks(&self, playlist_id: &str, uris: &[String]) -> Result<String> {
        Self::check_batch(uris, "remove_tracks")?;
        let url = format!("{}/playlists/{playlist_id}/tracks", self.api.api_base_url);
        let tracks: Vec<_> = uris.iter().map(|uri| json!({ "uri": uri })).collect();
        let body = json!({ "tracks": tracks });
        let resp = self
            .send_with_auth_retry(|token| self.http.delete(&url).bearer_auth(token).json(&body))
            .await?;
        let snapshot: SnapshotResponse = Self::checked(resp).await?.json().await?;
        Ok(snapshot.snapshot_id)
    }

    pub async fn create_playlist(
        &self,
        name: &str,
        public: bool,
        collaborative: bool,
        description: Option<&str>,
    ) -> Result<Playlist> {
        let url = format!("{}/users/{}/playlists", self.api.api_base_url, self.user_id);
        let mut body = json!({
            "name": name,
            "public": public,
            "collaborative": collaborative,
        });
        if let Some(desc) = description {
            body["description"] = json!(desc);
        }
        let resp = self
            .send_with_auth_retry(|token| self.http.post(&url).bearer_auth(token).json(&body))
            .await?;
        let created: PlaylistResponse = Self::checked(resp).await?.json().await?;
        Ok(created.into())
    }

    pub async fn playlist_exists(&self, id: &str) -> Result<bool> {
        let url = format!("{}/playlists/{id}", self.api.api_base_url);
        let resp = self
            .send_with_auth_retry(|token| {
                self.http.get(&url).query(&[("fields", "id")]).bearer_auth(token)
            })
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::checked(resp).await?;
        Ok(true)
    }

    fn check_batch(uris: &[String], operation: &str) -> Result<()> {
        if uris.is_empty() {
            return Err(Error::Validation(format!("{operation} called with no uris")));
        }
        if uris.len() > MAX_TRACKS_PER_CALL {
            return Err(Error::Validation(format!(
                "{operation} called with {} uris; the service accepts at most {MAX_TRACKS_PER_CALL} per call",
                uris.len()
            )));
        }
        Ok(())
    }

    /// Send a request, refreshing the access token at most once on a 401.
    ///
    /// The build closure is re-invoked for the retry so the request carries
    /// the renewed token. A second 401, or a failed refresh, surfaces as
    /// [`Error::Authorization`] without further retries.
    async fn send_with_auth_retry<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let token = self.credential.lock().await.access_token.clone();
        let resp = build(&token).send().await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        tracing::debug!(user = %self.user_id, "access token rejected; refreshing once");
        let token = self.refresh_access_token().await?;
        let resp = build(&token).send().await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(Error::Authorization(format!(
                "request for user {} rejected again after token refresh",
                self.user_id
            )));
        }
        Ok(resp)
    }

    /// Exchange the refresh token for a new access token and persist the
    /// renewed credential.
    async fn refresh_access_token(&self) -> Result<String> {
        let mut credential = self.credential.lock().await;
        let url = format!("{}/api/token", self.api.accounts_base_url);
        let basic = general_purpose::STANDARD
            .encode(format!("{}:{}", self.api.client_id, self.api.client_secret));

        let resp = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, format!("Basic {basic}"))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", &credential.refresh_token),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Authorization(format!(
                "token refresh for user {} failed (status {status}): {body}",
                self.user_id
            )));
        }

        let refreshed: RefreshResponse = resp.json().await?;
        credential.access_token = refreshed.access_token;
        if let Some(refresh_token) = refreshed.refresh_token {
            credential.refresh_token = refresh_token;
        }
        if let Some(token_type) = refreshed.token_type {
            credential.token_type = token_type;
        }
        if let Some(expires_in) = refreshed.expires_in {
            credential.expires_at = Some(Utc::now() + Duration::seconds(expires_in));
        }
        self.credentials.save(&self.user_id, &credential).await?;
        tracing::debug!(user = %self.user_id, "access token refreshed");
        Ok(credential.access_token.clone())
    }

    /// Map any non-2xx response to an error, keeping the body as context.
    async fn checked(resp: Response) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = resp.text().await.unwrap_or_default();
        Err(Error::RemoteService {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl PlaylistService for SpotifyClient {
    async fn playlist_exists(&self, id: &str) -> Result<bool> {
        SpotifyClient::playlist_exists(self, id).await
    }

    async fn get_playlist(&self, id: &str, fields: &str) -> Result<Playlist> {
        SpotifyClient::get_playlist(self, id, fields).await
    }

    async fn add_tracks(
        &self,
        playlist_id: &str,
        uris: &[String],
        position: Option<u32>,
    ) -> Result<String> {
        SpotifyClient::add_tracks(self, playlist_id, uris, position).await
    }

    async fn remove_tracks(&self, playlist_id: &str, uris: &[String]) -> Result<String> {
        SpotifyClient::remove_tracks(self, playlist_id, uris).await
    }
}

/// Iterative cursor-following pager over the user's playlists. Holding a
/// cursor rather than accumulating recursively keeps memory bounded and
/// lets a caller stop early or resume later.
pub struct PlaylistPager<'a> {
    client: &'a SpotifyClient,
    next: Option<String>,
}

impl<'a> PlaylistPager<'a> {
    /// Resume paging from a cursor previously returned by [`Self::cursor`].
    pub fn resume(client: &'a SpotifyClient, cursor: String) -> Self {
        Self {
            client,
            next: Some(cursor),
        }
    }

    /// The cursor for the next page, if any. None once exhausted.
    pub fn cursor(&self) -> Option<&str> {
        self.next.as_deref()
    }

    /// Fetch the next page. Returns None exactly when the service reported
    /// no further page.
    pub async fn next_page(&mut self) -> Result<Option<Vec<PlaylistSummary>>> {
        let Some(url) = self.next.take() else {
            return Ok(None);
        };
        let resp = self
            .client
            .send_with_auth_retry(|token| self.client.http.get(&url).bearer_auth(token))
            .await?;
        let page: PagingResponse<PlaylistItem> =
            SpotifyClient::checked(resp).await?.json().await?;
        self.next = page.next;
        Ok(Some(page.items.into_iter().map(Into::into).collect()))
    }

    /// Drain the pager into one vector.
    pub async fn collect_all(mut self) -> Result<Vec<PlaylistSummary>> {
        let mut playlists = Vec::new();
        while let Some(page) = self.next_page().await? {
            playlists.extend(page);
        }
        Ok(playlists)
    }
}

/// Opens one [`SpotifyClient`] per user, sharing the HTTP connection pool
/// and the credential store.
pub struct SpotifyServiceFactory {
    http: HttpClient,
    api: SpotifyApiConfig,
    credentials: Arc<dyn CredentialStore>,
}

impl SpotifyServiceFactory {
    pub fn new(api: SpotifyApiConfig, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            http: HttpClient::new(),
            api,
            credentials,
        }
    }
}

#[async_trait]
impl ServiceFactory for SpotifyServiceFactory {
    async fn open(&self, user_id: &str) -> Result<Box<dyn PlaylistService>> {
        let client = SpotifyClient::open(
            user_id,
            self.http.clone(),
            self.api.clone(),
            Arc::clone(&self.credentials),
        )
        .await?;
        Ok(Box::new(client))
    }
}
