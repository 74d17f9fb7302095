//! Domain values shared between the client core and its front ends.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// The authenticated user.  Immutable once login succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: i64,
    pub username: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    #[default]
    Track,
    Podcast,
}

impl ContentKind {
    /// Path segment used by the stream endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Podcast => "podcast",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: i64,
    pub title: String,
    /// Artist for tracks, host for podcasts.
    pub creator_name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub kind: ContentKind,
}

/// Which data source the list is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum View {
    #[default]
    Music,
    Favorites,
    Admin,
}

impl View {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Music => "music",
            Self::Favorites => "favorites",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for View {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "music" => Ok(Self::Music),
            "favorites" | "favs" => Ok(Self::Favorites),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown view '{other}'")),
        }
    }
}

/// Items of one fetch, in server order, keyed by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Catalog {
    items: Vec<ContentItem>,
}

impl Catalog {
    /// Build a catalog from a server response.  Later duplicates of an id are
    /// dropped so that lookups by id stay unambiguous.
    pub fn from_items(items: Vec<ContentItem>) -> Self {
        let mut seen = HashSet::with_capacity(items.len());
        let mut kept = Vec::with_capacity(items.len());
        for item in items {
            if seen.insert(item.id) {
                kept.push(item);
            } else {
                warn!("catalog: dropping duplicate item id={}", item.id);
            }
        }
        Self { items: kept }
    }

    pub fn items(&self) -> &[ContentItem] {
        &self.items
    }

    pub fn get(&self, id: i64) -> Option<&ContentItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// The active view together with the catalog currently rendered for it.
/// `catalog` is `None` until the first successful fetch for the view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CatalogView {
    pub view: View,
    pub catalog: Option<Catalog>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle,
    /// Source assigned, not producing audio.
    Loaded,
    Playing,
}

/// The single active playback binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackSession {
    pub item_id: i64,
    pub source_url: String,
    pub is_playing: bool,
    /// Bumped on every play; transport events carry it back.
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum UploadPhase {
    #[default]
    Empty,
    FileSelected,
    Uploading,
    Uploaded,
    Submitting,
    Committed,
}

impl UploadPhase {
    /// True while a network phase is running.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Uploading | Self::Submitting)
    }
}
