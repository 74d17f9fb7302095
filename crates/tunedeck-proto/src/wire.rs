//! JSON bodies exchanged with the media backend.
//!
//! The backend speaks snake_case and names the creator `artist` for tracks
//! and `host` for podcasts.  These structs stay separate from the domain
//! model so the wire schema can drift without touching the core.

use serde::{Deserialize, Serialize};

use crate::model::{ContentItem, ContentKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user_id: i64,
    /// Older backends omit this; the submitted username is used instead.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

/// One catalog row as returned by `/tracks` and `/favorites/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireItem {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<ContentKind>,
}

impl From<WireItem> for ContentItem {
    fn from(w: WireItem) -> Self {
        let kind = w.kind.unwrap_or(if w.host.is_some() && w.artist.is_none() {
            ContentKind::Podcast
        } else {
            ContentKind::Track
        });
        ContentItem {
            id: w.id,
            title: w.title,
            creator_name: w.artist.or(w.host).unwrap_or_default(),
            category: w.category.filter(|c| !c.is_empty()),
            file_path: w.file_path.filter(|p| !p.is_empty()),
            kind,
        }
    }
}

impl From<&ContentItem> for WireItem {
    fn from(item: &ContentItem) -> Self {
        let (artist, host) = match item.kind {
            ContentKind::Track => (Some(item.creator_name.clone()), None),
            ContentKind::Podcast => (None, Some(item.creator_name.clone())),
        };
        WireItem {
            id: item.id,
            title: item.title.clone(),
            artist,
            host,
            category: item.category.clone(),
            file_path: item.file_path.clone(),
            kind: Some(item.kind),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FavoriteToggleRequest {
    pub track_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub file_path: String,
}

/// Registration body for `/admin/tracks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTrack {
    pub title: String,
    pub artist: String,
    pub category: String,
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedResponse {
    pub id: i64,
}

/// `{"message": "..."}` error body used by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
}
