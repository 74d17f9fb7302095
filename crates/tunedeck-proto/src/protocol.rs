use serde::{Deserialize, Serialize};

use crate::model::{ContentItem, Identity, PlaybackSession, PlaybackStatus, UploadPhase, View};

/// Messages sent from a front end to the client core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    Login { username: String, password: String },
    /// Create an account; does not log in.
    Register {
        username: String,
        email: String,
        password: String,
    },
    Logout,
    SelectView { view: View },
    /// Re-fetch the active view.
    Refresh,
    ToggleFavorite { item_id: i64 },
    Play { item_id: i64 },
    Stop,
    SelectFile { path: String },
    SetDetails {
        title: String,
        creator_name: String,
        category: String,
    },
    Upload,
    Submit,
    GetState,
}

/// Which failure family a notice belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Auth,
    Sync,
    Favorite,
    Upload,
    Playback,
}

impl ErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Auth => "login",
            Self::Sync => "catalog",
            Self::Favorite => "favorite",
            Self::Upload => "upload",
            Self::Playback => "playback",
        }
    }
}

/// Messages sent from the client core to front ends (broadcasts)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    State { data: ClientState },
    /// A failure the user must acknowledge.
    Error { kind: ErrorKind, message: String },
    Log { message: String },
}

/// Summary of the admin draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UploadStatus {
    pub phase: UploadPhase,
    pub file_name: Option<String>,
    pub uploaded_path: Option<String>,
    pub title: String,
    pub creator_name: String,
    pub category: String,
    /// Failure of the last upload or submit, cleared by the next success.
    #[serde(default)]
    pub last_error: Option<String>,
}

/// Snapshot of everything a front end renders.  `rev` is a monotonically
/// increasing counter bumped on every change.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientState {
    #[serde(default)]
    pub rev: u64,
    pub identity: Option<Identity>,
    pub active_view: View,
    /// Rendered list for the active view; `None` until the first fetch lands.
    pub catalog: Option<Vec<ContentItem>>,
    pub playback: Option<PlaybackSession>,
    pub playback_status: PlaybackStatus,
    pub upload: UploadStatus,
}

impl ClientState {
    pub fn find_item(&self, id: i64) -> Option<&ContentItem> {
        self.catalog.as_ref()?.iter().find(|item| item.id == id)
    }
}
