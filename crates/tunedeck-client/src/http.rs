use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use tunedeck_proto::config::BackendConfig;
use tunedeck_proto::model::ContentItem;
use tunedeck_proto::wire::{
    CreatedResponse, ErrorBody, FavoriteToggleRequest, LoginRequest, LoginResponse, NewTrack,
    RegisterRequest, UploadResponse, WireItem,
};

use crate::backend::{Backend, SelectedFile};
use crate::catalog::CatalogEndpoint;
use crate::error::BackendError;
use crate::session::SessionTicket;

/// [`Backend`] over HTTP/JSON.  One shared client; each request carries the
/// bearer token of the [`SessionTicket`] it was issued under.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: config.base().to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, req: RequestBuilder, ticket: &SessionTicket) -> RequestBuilder {
        match ticket.bearer() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

fn transport(e: reqwest::Error) -> BackendError {
    if e.is_decode() {
        BackendError::Decode(e.to_string())
    } else {
        BackendError::Network(e.to_string())
    }
}

/// Pass 2xx through; turn anything else into a [`BackendError`] carrying the
/// `{message}` body when the server sent one.
async fn check(resp: Response) -> Result<Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .map(|b| b.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });
    debug!("http: {} {}", status, message);
    if status == StatusCode::UNAUTHORIZED {
        Err(BackendError::Unauthorized(message))
    } else {
        Err(BackendError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

async fn json<T: DeserializeOwned>(resp: Response) -> Result<T, BackendError> {
    let resp = check(resp).await?;
    resp.json::<T>()
        .await
        .map_err(|e| BackendError::Decode(e.to_string()))
}

#[async_trait]
impl Backend for HttpBackend {
    async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, BackendError> {
        let body = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let resp = self
            .client
            .post(self.url("/login"))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        json(resp).await
    }

    async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<(), BackendError> {
        let body = RegisterRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        };
        let resp = self
            .client
            .post(self.url("/register"))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        check(resp).await?;
        Ok(())
    }

    async fn fetch_catalog(
        &self,
        ticket: &SessionTicket,
        endpoint: &CatalogEndpoint,
        cache_token: &str,
    ) -> Result<Vec<ContentItem>, BackendError> {
        let req = self
            .client
            .get(self.url(&endpoint.path()))
            .query(&[("t", cache_token)])
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache");
        let resp = self
            .authorized(req, ticket)
            .send()
            .await
            .map_err(transport)?;
        let items: Vec<WireItem> = json(resp).await?;
        Ok(items.into_iter().map(ContentItem::from).collect())
    }

    async fn toggle_favorite(
        &self,
        ticket: &SessionTicket,
        user_id: i64,
        item_id: i64,
    ) -> Result<(), BackendError> {
        let req = self
            .client
            .post(self.url(&format!("/favorites/{}", user_id)))
            .json(&FavoriteToggleRequest { track_id: item_id });
        let resp = self
            .authorized(req, ticket)
            .send()
            .await
            .map_err(transport)?;
        check(resp).await?;
        Ok(())
    }

    async fn upload_file(
        &self,
        ticket: &SessionTicket,
        file: &SelectedFile,
    ) -> Result<String, BackendError> {
        let bytes = tokio::fs::read(&file.path)
            .await
            .map_err(|e| BackendError::Io(format!("{}: {}", file.path.display(), e)))?;
        debug!("http: uploading {} ({} bytes)", file.file_name, bytes.len());

        let part = Part::bytes(bytes).file_name(file.file_name.clone());
        let form = Form::new().part("file", part);
        let req = self.client.post(self.url("/admin/upload")).multipart(form);
        let resp = self
            .authorized(req, ticket)
            .send()
            .await
            .map_err(transport)?;
        let uploaded: UploadResponse = json(resp).await?;
        if uploaded.file_path.is_empty() {
            warn!("http: upload of {} returned no file path", file.file_name);
            return Err(BackendError::Decode("empty file_path".to_string()));
        }
        Ok(uploaded.file_path)
    }

    async fn create_track(
        &self,
        ticket: &SessionTicket,
        track: &NewTrack,
    ) -> Result<i64, BackendError> {
        let req = self.client.post(self.url("/admin/tracks")).json(track);
        let resp = self
            .authorized(req, ticket)
            .send()
            .await
            .map_err(transport)?;
        let created: CreatedResponse = json(resp).await?;
        Ok(created.id)
    }
}
