use std::{collections::HashSet, sync::Arc};

use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, State,
        multipart::MultipartError,
        rejection::JsonRejection,
    },
    http::{HeaderValue, Method, StatusCode},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use url::Url;

use crate::{
    config::{ConfigError, Settings},
    debrid::{DebridApi, DebridClient, TorrentSummary},
    error::{ApiError, StartupError, error_chain},
    proxy::{ProxyClient, ProxyUrlBuilder},
    resolver::ProxyLinkResolver,
    workflow::{Submission, SubmissionWorkflow},
};

const TORRENT_FIELD: &str = "torrent";
const DEFAULT_TORRENT_FILENAME: &str = "upload.torrent";

#[derive(Clone)]
pub struct AppState {
    pub workflow: Arc<SubmissionWorkflow>,
    pub debrid: Arc<dyn DebridApi>,
    pub proxy_urls: ProxyUrlBuilder,
}

impl AppState {
    pub fn from_settings(settings: &Settings) -> Result<Self, StartupError> {
        let http_client = reqwest::Client::builder()
            .timeout(settings.http_timeout)
            .build()
            .map_err(StartupError::HttpClient)?;

        let debrid: Arc<dyn DebridApi> = Arc::new(DebridClient::new(
            http_client.clone(),
            settings.debrid_base_url.clone(),
            settings.debrid_api_key.clone(),
        ));
        let proxy_urls = ProxyUrlBuilder::new(
            settings.proxy_base_url.clone(),
            settings.proxy_token.clone(),
        );
        let resolver = Arc::new(ProxyLinkResolver::new(
            debrid.clone(),
            ProxyClient::new(http_client, proxy_urls.clone()),
        ));
        let workflow = Arc::new(SubmissionWorkflow::new(
            debrid.clone(),
            resolver,
            settings.poll_policy,
            settings.upload_settle,
        ));

        Ok(Self {
            workflow,
            debrid,
            proxy_urls,
        })
    }
}

#[derive(Debug, Deserialize)]
struct MagnetRequest {
    #[serde(rename = "magnetLink", default)]
    magnet_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UnrestrictRequest {
    #[serde(default)]
    link: Option<String>,
}

#[derive(Debug, Serialize)]
struct SubmissionResponse {
    success: bool,
    links: Vec<String>,
}

#[derive(Debug, Serialize)]
struct TorrentListResponse {
    torrents: Vec<TorrentSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UnrestrictResponse {
    proxy_url: String,
    download: String,
}

/// Builds the HTTP surface. Every route is served both at `/x` and `/api/x`.
pub fn build_router(state: AppState, settings: &Settings) -> Result<Router, StartupError> {
    let routes = Router::new()
        .route("/health", get(health))
        .route("/magnet", post(submit_magnet))
        .route("/torrent", post(submit_torrent))
        .route("/torrents", get(list_torrents))
        .route("/unrestrict-link", post(unrestrict_link));

    Ok(Router::new()
        .merge(routes.clone())
        .nest("/api", routes)
        .with_state(state)
        .layer(DefaultBodyLimit::max(settings.max_torrent_bytes))
        .layer(build_cors_layer(&settings.allowed_origins)?)
        .layer(TraceLayer::new_for_http()))
}

pub async fn serve(settings: Settings) -> Result<(), StartupError> {
    let state = AppState::from_settings(&settings)?;
    let app = build_router(state, &settings)?;

    let listener = TcpListener::bind(&settings.bind_addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: settings.bind_addr.clone(),
            source,
        })?;

    info!(
        poll_interval_ms = settings.poll_policy.interval.as_millis() as u64,
        poll_max_attempts = settings.poll_policy.max_attempts,
        "server listening on http://{}",
        settings.bind_addr
    );

    axum::serve(listener, app)
        .await
        .map_err(StartupError::Serve)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn submit_magnet(
    State(state): State<AppState>,
    payload: Result<Json<MagnetRequest>, JsonRejection>,
) -> Result<Json<SubmissionResponse>, ApiError> {
    let Json(payload) = payload.map_err(|rejection| {
        reject(
            "magnet",
            "Request body must be JSON with a magnetLink field",
            &rejection,
        )
    })?;

    let magnet = payload
        .magnet_link
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| reject("magnet", "No magnet link provided", &"magnetLink is missing"))?;
    if !is_valid_magnet(magnet) {
        return Err(reject("magnet", "Invalid magnet link", &magnet));
    }

    let links = state.workflow.run(Submission::magnet(magnet)).await?;
    Ok(Json(SubmissionResponse {
        success: true,
        links,
    }))
}

async fn submit_torrent(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SubmissionResponse>, ApiError> {
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| multipart_rejection(error, "Invalid multipart upload"))?
    {
        if field.name() != Some(TORRENT_FIELD) {
            continue;
        }

        let filename = field
            .file_name()
            .map(ToString::to_string)
            .unwrap_or_else(|| DEFAULT_TORRENT_FILENAME.to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|error| multipart_rejection(error, "Failed to read torrent file"))?;
        upload = Some((filename, bytes));
        break;
    }

    let (filename, bytes) = upload
        .ok_or_else(|| reject("torrent", "No torrent file provided", &"torrent field is missing"))?;
    if bytes.is_empty() {
        return Err(reject("torrent", "Torrent file is empty", &filename));
    }

    info!(filename = %filename, size = bytes.len(), "processing torrent file");
    let links = state
        .workflow
        .run(Submission::torrent_file(filename, bytes.to_vec()))
        .await?;
    Ok(Json(SubmissionResponse {
        success: true,
        links,
    }))
}

async fn list_torrents(
    State(state): State<AppState>,
) -> Result<Json<TorrentListResponse>, ApiError> {
    let torrents = state.debrid.list_torrents().await.map_err(|error| {
        warn!("failed to list torrents: {}", error_chain(&error));
        ApiError::internal("Failed to fetch torrents")
    })?;

    Ok(Json(TorrentListResponse { torrents }))
}

async fn unrestrict_link(
    State(state): State<AppState>,
    payload: Result<Json<UnrestrictRequest>, JsonRejection>,
) -> Result<Json<UnrestrictResponse>, ApiError> {
    let Json(payload) = payload.map_err(|rejection| {
        reject(
            "unrestrict-link",
            "Request body must be JSON with a link field",
            &rejection,
        )
    })?;
    let link = payload
        .link
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| reject("unrestrict-link", "No link provided", &"link is missing"))?;

    let unrestricted = state.debrid.unrestrict_link(link).await.map_err(|error| {
        warn!(link, "failed to unrestrict link: {}", error_chain(&error));
        ApiError::internal("Failed to get download link")
    })?;

    Ok(Json(UnrestrictResponse {
        proxy_url: state.proxy_urls.build(&unrestricted.download),
        download: unrestricted.download,
    }))
}

fn reject(route: &'static str, message: &'static str, detail: &dyn std::fmt::Display) -> ApiError {
    warn!(route, "rejected request: {message} ({detail})");
    ApiError::bad_request(message)
}

fn multipart_rejection(error: MultipartError, message: &'static str) -> ApiError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        warn!(route = "torrent", "rejected request: upload over the size limit ({error})");
        return ApiError::payload_too_large("Torrent file exceeds the upload size limit");
    }
    reject("torrent", message, &error)
}

fn is_valid_magnet(input: &str) -> bool {
    let Ok(parsed) = Url::parse(input) else {
        return false;
    };

    parsed.scheme() == "magnet"
        && parsed
            .query_pairs()
            .any(|(key, value)| key == "xt" && !value.trim().is_empty())
}

fn build_cors_layer(origins: &[String]) -> Result<CorsLayer, ConfigError> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    if origins.is_empty() {
        return Ok(layer.allow_origin(Any));
    }

    let normalized_origins = origins
        .iter()
        .map(|origin| {
            normalize_origin(origin).ok_or_else(|| ConfigError::InvalidUrl {
                name: "ALLOWED_ORIGINS",
                value: origin.clone(),
            })
        })
        .collect::<Result<HashSet<_>, _>>()?;
    info!(
        "CORS allow-list loaded with {} origin(s): {:?}",
        normalized_origins.len(),
        normalized_origins
    );

    let allowed_origins = Arc::new(normalized_origins);
    Ok(layer.allow_origin(AllowOrigin::predicate(
        move |origin: &HeaderValue, _| {
            origin
                .to_str()
                .ok()
                .and_then(normalize_origin)
                .is_some_and(|value| allowed_origins.contains(&value))
        },
    )))
}

fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match parsed.port() {
        Some(port) if port != default_port => Some(format!("{scheme}://{host}:{port}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}
