//! Client for the debrid service's REST API.
//!
//! [`DebridClient::call`] is the single authenticated request wrapper: it
//! attaches the bearer credential, encodes the body and normalizes the three
//! response shapes (JSON, no content, HTTP failure). The typed operations the
//! workflow needs sit on top of it behind the [`DebridApi`] trait.

use async_trait::async_trait;
use reqwest::{
    Client, Method, StatusCode,
    header::{CONTENT_LENGTH, CONTENT_TYPE},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::DebridError;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const TORRENT_CONTENT_TYPE: &str = "application/x-bittorrent";
const SELECT_FILES_ENDPOINT: &str = "/torrents/selectFiles/";

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Form(String),
    Binary {
        bytes: Vec<u8>,
        content_type: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteResponse {
    Json(Value),
    NoContent,
}

/// Identifier the debrid service hands back after adding a torrent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteTorrentHandle {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentStatus {
    Queued,
    Downloading,
    Downloaded,
    WaitingFilesSelection,
    Error,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteFile {
    pub id: u64,
    #[serde(default)]
    pub bytes: u64,
}

/// Status snapshot of one remote torrent. Always fetched fresh.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteTorrentInfo {
    pub id: String,
    #[serde(default)]
    pub filename: Option<String>,
    pub status: TorrentStatus,
    #[serde(default)]
    pub files: Vec<RemoteFile>,
    #[serde(default)]
    pub links: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UnrestrictedLink {
    pub download: String,
}

/// Entry of the account torrent list, passed through to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentSummary {
    pub id: String,
    #[serde(default)]
    pub filename: String,
    pub status: String,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub speed: Option<u64>,
    #[serde(default)]
    pub added: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSelection {
    All,
    Indices(Vec<u64>),
}

impl FileSelection {
    /// Selects every file of a listing, numbered `1..=N`.
    pub fn from_files(files: &[RemoteFile]) -> Self {
        FileSelection::Indices((1..=files.len() as u64).collect())
    }

    fn form_value(&self) -> String {
        match self {
            FileSelection::All => "all".to_string(),
            FileSelection::Indices(ids) => ids
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

#[async_trait]
pub trait DebridApi: Send + Sync {
    async fn add_magnet(&self, magnet: &str) -> Result<RemoteTorrentHandle, DebridError>;
    async fn add_torrent(&self, torrent: Vec<u8>) -> Result<RemoteTorrentHandle, DebridError>;
    async fn select_files(
        &self,
        torrent_id: &str,
        selection: &FileSelection,
    ) -> Result<(), DebridError>;
    async fn torrent_info(&self, torrent_id: &str) -> Result<RemoteTorrentInfo, DebridError>;
    async fn unrestrict_link(&self, link: &str) -> Result<UnrestrictedLink, DebridError>;
    async fn list_torrents(&self) -> Result<Vec<TorrentSummary>, DebridError>;
}

#[derive(Clone)]
pub struct DebridClient {
    http_client: Client,
    base_url: String,
    api_key: String,
}

impl DebridClient {
    pub fn new(http_client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    pub async fn call(
        &self,
        endpoint: &str,
        method: Method,
        body: RequestBody,
    ) -> Result<RemoteResponse, DebridError> {
        let transport = |source: reqwest::Error| DebridError::Transport {
            endpoint: endpoint.to_string(),
            source,
        };

        let mut request = self
            .http_client
            .request(method, format!("{}{endpoint}", self.base_url))
            .bearer_auth(&self.api_key);
        request = match body {
            RequestBody::Empty => request,
            RequestBody::Form(form) => request.header(CONTENT_TYPE, FORM_CONTENT_TYPE).body(form),
            RequestBody::Binary {
                bytes,
                content_type,
            } => request.header(CONTENT_TYPE, content_type).body(bytes),
        };

        let response = request.send().await.map_err(transport)?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                endpoint,
                status = status.as_u16(),
                body = %body,
                "debrid api error"
            );
            return Err(DebridError::Api {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                body,
            });
        }

        let declared_empty = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.trim() == "0");
        if endpoint.starts_with(SELECT_FILES_ENDPOINT)
            || status == StatusCode::NO_CONTENT
            || declared_empty
        {
            debug!(endpoint, "debrid api success (no content)");
            return Ok(RemoteResponse::NoContent);
        }

        let bytes = response.bytes().await.map_err(transport)?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            debug!(endpoint, "debrid api success (empty body)");
            return Ok(RemoteResponse::NoContent);
        }

        let value = serde_json::from_slice(&bytes).map_err(|source| DebridError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })?;
        debug!(endpoint, "debrid api success");
        Ok(RemoteResponse::Json(value))
    }

    async fn call_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        method: Method,
        body: RequestBody,
    ) -> Result<T, DebridError> {
        let value = match self.call(endpoint, method, body).await? {
            RemoteResponse::Json(value) => value,
            RemoteResponse::NoContent => Value::Null,
        };

        serde_json::from_value(value).map_err(|source| DebridError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })
    }
}

fn form_pair(key: &str, value: &str) -> String {
    format!("{key}={}", urlencoding::encode(value))
}

#[async_trait]
impl DebridApi for DebridClient {
    async fn add_magnet(&self, magnet: &str) -> Result<RemoteTorrentHandle, DebridError> {
        self.call_json(
            "/torrents/addMagnet",
            Method::POST,
            RequestBody::Form(form_pair("magnet", magnet)),
        )
        .await
    }

    async fn add_torrent(&self, torrent: Vec<u8>) -> Result<RemoteTorrentHandle, DebridError> {
        self.call_json(
            "/torrents/addTorrent",
            Method::PUT,
            RequestBody::Binary {
                bytes: torrent,
                content_type: TORRENT_CONTENT_TYPE,
            },
        )
        .await
    }

    async fn select_files(
        &self,
        torrent_id: &str,
        selection: &FileSelection,
    ) -> Result<(), DebridError> {
        self.call(
            &format!("{SELECT_FILES_ENDPOINT}{torrent_id}"),
            Method::POST,
            RequestBody::Form(form_pair("files", &selection.form_value())),
        )
        .await
        .map(|_| ())
    }

    async fn torrent_info(&self, torrent_id: &str) -> Result<RemoteTorrentInfo, DebridError> {
        self.call_json(
            &format!("/torrents/info/{torrent_id}"),
            Method::GET,
            RequestBody::Empty,
        )
        .await
    }

    async fn unrestrict_link(&self, link: &str) -> Result<UnrestrictedLink, DebridError> {
        self.call_json(
            "/unrestrict/link",
            Method::POST,
            RequestBody::Form(form_pair("link", link)),
        )
        .await
    }

    async fn list_torrents(&self) -> Result<Vec<TorrentSummary>, DebridError> {
        match self.call("/torrents", Method::GET, RequestBody::Empty).await? {
            RemoteResponse::Json(value) => {
                serde_json::from_value(value).map_err(|source| DebridError::Decode {
                    endpoint: "/torrents".to_string(),
                    source,
                })
            }
            RemoteResponse::NoContent => Ok(Vec::new()),
        }
    }
}
