//! The seam between the client core and the media backend.
//!
//! Every call except `login` and `register` receives the [`SessionTicket`]
//! the work was issued under and sends that ticket's credential.

use async_trait::async_trait;
use std::path::PathBuf;
use tunedeck_proto::model::ContentItem;
use tunedeck_proto::wire::{LoginResponse, NewTrack};

use crate::catalog::CatalogEndpoint;
use crate::error::BackendError;
use crate::session::SessionTicket;

/// A local file chosen for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub path: PathBuf,
    /// Name sent in the multipart part.
    pub file_name: String,
}

impl SelectedFile {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        Self { path, file_name }
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, BackendError>;

    /// Create an account.  The server's `{message}` explains a refusal.
    async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<(), BackendError>;

    /// `cache_token` is unique per call and must reach the wire so that no
    /// intermediate cache can answer with an older list.
    async fn fetch_catalog(
        &self,
        ticket: &SessionTicket,
        endpoint: &CatalogEndpoint,
        cache_token: &str,
    ) -> Result<Vec<ContentItem>, BackendError>;

    async fn toggle_favorite(
        &self,
        ticket: &SessionTicket,
        user_id: i64,
        item_id: i64,
    ) -> Result<(), BackendError>;

    /// Returns the opaque server-side path of the stored file.
    async fn upload_file(
        &self,
        ticket: &SessionTicket,
        file: &SelectedFile,
    ) -> Result<String, BackendError>;

    /// Returns the id of the new catalog entry.
    async fn create_track(
        &self,
        ticket: &SessionTicket,
        track: &NewTrack,
    ) -> Result<i64, BackendError>;
}
