//! HTTP surface of the vidra control plane.
//!
//! A thin axum layer over [`TorrentPool`]: status listings, tag merges,
//! playback preparation, ranged streaming of in-progress downloads, and the
//! cached TMDB/Jackett proxies. Every response carries a permissive CORS
//! header; errors leave as `{"error": "..."}` JSON.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Form, Path, Query, State};
use axum::http::header::{
    ACCEPT_RANGES, CONNECTION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE,
};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use vidra_controller::{FileState, TorrentInfo, TorrentPool, TorrentRecord, prepare_for_play};
use vidra_tags::Tags;

pub mod cache;
pub mod error;
pub mod proxy;
pub mod range;

pub use cache::ResponseCache;
pub use error::ApiError;
use proxy::{JACKETT_API_KEY, JACKETT_URL, LinkPayload, TMDB_API_KEY, TMDB_URL};
use range::ByteRange;

const DEFAULT_TMDB_TTL_MIN: u64 = 5;
const DEFAULT_JACKETT_TTL_MIN: u64 = 10;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct ApiState {
    pool: Arc<TorrentPool>,
    cache: Arc<ResponseCache>,
    http: reqwest::Client,
    kodi_category: String,
}

impl ApiState {
    /// Bundle the dependencies the handlers need.
    pub fn new(
        pool: Arc<TorrentPool>,
        cache: Arc<ResponseCache>,
        kodi_category: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            cache,
            http: proxy::build_client(),
            kodi_category: kodi_category.into(),
        }
    }
}

/// Build the full route table.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/list", get(list))
        .route("/torrent_file_list", get(torrent_file_list))
        .route("/torrentStatus/{name}", get(torrent_status))
        .route("/playPrepare/{name}/{file}", get(play_prepare))
        .route("/play/{name}/{file}", get(play).head(play_head))
        .route("/tag/{name}", post(tag_torrent))
        .route("/watchLaterList", get(watch_later_list))
        .route("/api/tmdb", get(api_tmdb))
        .route("/api/jacket", get(api_jackett))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Bind and serve until the listener fails.
///
/// # Errors
///
/// Returns binding or accept-loop failures.
pub async fn serve(addr: SocketAddr, state: ApiState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "http server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[derive(Serialize)]
struct TorrentList {
    #[serde(rename = "Torrents")]
    torrents: Vec<TorrentInfo>,
}

async fn home() -> impl IntoResponse {
    let routes = [
        "GET  /list",
        "GET  /torrent_file_list?name=&link=",
        "GET  /torrentStatus/{name}",
        "GET  /playPrepare/{name}/{file}",
        "HEAD /play/{name}/{file}",
        "GET  /play/{name}/{file}",
        "POST /tag/{name}",
        "GET  /watchLaterList",
        "GET  /api/tmdb",
        "GET  /api/jacket",
    ];
    routes.join("\n")
}

async fn list(State(state): State<ApiState>) -> Json<TorrentList> {
    Json(TorrentList {
        torrents: state.pool.list_info().await,
    })
}

async fn watch_later_list(State(state): State<ApiState>) -> Json<TorrentList> {
    Json(TorrentList {
        torrents: state.pool.watch_later_info().await,
    })
}

async fn torrent_status(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<TorrentInfo>, ApiError> {
    let record = find_record(&state, &name).await?;
    Ok(Json(record.torrent_info()))
}

async fn torrent_file_list(
    State(state): State<ApiState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Result<Json<TorrentInfo>, ApiError> {
    let name = params
        .get("name")
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::bad_request("torrent's name is missing"))?;

    if let Some(record) = state.pool.get(name).await {
        return Ok(Json(record.torrent_info()));
    }

    let link = params
        .get("link")
        .filter(|link| !link.is_empty())
        .ok_or_else(|| ApiError::bad_request("link is missing"))?;
    debug!(name, link, "loading descriptor link");

    let payload = proxy::fetch_descriptor(&state.http, link)
        .await
        .map_err(|err| ApiError::bad_request(format!("failed to load torrent: {err}")))?;
    let bytes = match payload {
        LinkPayload::Metainfo(bytes) => bytes,
        LinkPayload::Magnet(uri) => state
            .pool
            .resolver()
            .resolve_magnet(&uri)
            .await
            .map_err(|err| {
                ApiError::bad_request(format!("failed to load metadata for magnet: {err}"))
            })?,
    };

    let mut tags = Tags::new();
    tags.set("source", "kodi");
    let record = state
        .pool
        .add_torrent_from_data(&state.kodi_category, name, &bytes, tags)
        .await
        .map_err(|err| ApiError::bad_request(format!("failed to add {name}: {err}")))?;
    Ok(Json(record.torrent_info()))
}

async fn play_prepare(
    State(state): State<ApiState>,
    Path((name, file)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let record = find_record(&state, &name).await?;
    let file = find_file(&record, &file)?;

    state.pool.pause_not_in_play().await;
    tokio::spawn(prepare_for_play(record, file));
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "started" }))))
}

async fn play_head(
    State(state): State<ApiState>,
    Path((name, file)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let record = find_record(&state, &name).await?;
    let file = find_file(&record, &file)?;
    Ok((
        [
            (CONTENT_TYPE, "video/mp4".to_string()),
            (CONTENT_LENGTH, file.length().to_string()),
            (ACCEPT_RANGES, "bytes".to_string()),
            (CONNECTION, "Keep-Alive".to_string()),
        ],
        Body::empty(),
    )
        .into_response())
}

async fn play(
    State(state): State<ApiState>,
    Path((name, file)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let record = find_record(&state, &name).await?;
    let file = find_file(&record, &file)?;
    let length = file.length();

    state.pool.pause_not_in_play().await;
    info!(torrent = %record.name(), file = %file.display_path(), "starting stream");

    let requested = headers
        .get(RANGE)
        .and_then(|value| value.to_str().ok());
    let parsed = range::parse_range(requested, length);
    if parsed == ByteRange::Unsatisfiable {
        return Err(ApiError::unsatisfiable_range(length));
    }
    let mut lease = file.open_reader(&record);

    match parsed {
        ByteRange::Unsatisfiable => Err(ApiError::unsatisfiable_range(length)),
        ByteRange::Full => Ok((
            [
                (CONTENT_TYPE, "application/octet-stream".to_string()),
                (CONTENT_LENGTH, length.to_string()),
                (ACCEPT_RANGES, "bytes".to_string()),
            ],
            [("X-Content-Type-Options", "nosniff")],
            Body::from_stream(ReaderStream::new(lease.take(length))),
        )
            .into_response()),
        ByteRange::Span(start, end) => {
            lease
                .seek(SeekFrom::Start(start))
                .await
                .map_err(|err| ApiError::internal(format!("seek failed: {err}")))?;
            let span = end - start + 1;
            Ok((
                StatusCode::PARTIAL_CONTENT,
                [
                    (CONTENT_TYPE, "application/octet-stream".to_string()),
                    (CONTENT_LENGTH, span.to_string()),
                    (CONTENT_RANGE, format!("bytes {start}-{end}/{length}")),
                    (ACCEPT_RANGES, "bytes".to_string()),
                ],
                Body::from_stream(ReaderStream::new(lease.take(span))),
            )
                .into_response())
        }
    }
}

async fn tag_torrent(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Form(pairs): Form<Vec<(String, String)>>,
) -> Result<StatusCode, ApiError> {
    debug!(name, count = pairs.len(), "merging tags over http");
    if state.pool.apply_tags(&name, pairs).await {
        Ok(StatusCode::OK)
    } else {
        Err(ApiError::bad_request(format!(
            "failed to find torrent {name}"
        )))
    }
}

async fn api_tmdb(
    State(state): State<ApiState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Result<Response, ApiError> {
    cached_proxy(
        &state,
        params,
        TMDB_URL,
        DEFAULT_TMDB_TTL_MIN,
        &[("api_key", TMDB_API_KEY), ("include_adult", "false")],
    )
    .await
}

async fn api_jackett(
    State(state): State<ApiState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Result<Response, ApiError> {
    cached_proxy(
        &state,
        params,
        JACKETT_URL,
        DEFAULT_JACKETT_TTL_MIN,
        &[("apikey", JACKETT_API_KEY)],
    )
    .await
}

async fn cached_proxy(
    state: &ApiState,
    mut params: BTreeMap<String, String>,
    base: &str,
    default_ttl_min: u64,
    extra: &[(&str, &str)],
) -> Result<Response, ApiError> {
    // Cache key covers the query as the client sent it, ttl and path included.
    let key: String = params
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&");

    let ttl_minutes = params
        .remove("ttl")
        .and_then(|raw| raw.parse::<u64>().ok())
        .unwrap_or(default_ttl_min);
    let path = params.remove("path").unwrap_or_default();

    if let Some(data) = state.cache.read(&key).await {
        debug!(bytes = data.len(), "serving cached proxy response");
        return Ok(data.into_response());
    }

    let mut query: Vec<(String, String)> = params.into_iter().collect();
    for (name, value) in extra {
        query.push(((*name).to_string(), (*value).to_string()));
    }
    let url = format!("{base}{path}");
    debug!(url = %url, "proxying request upstream");

    let response = state
        .http
        .get(&url)
        .query(&query)
        .send()
        .await
        .map_err(|err| ApiError::internal(format!("upstream request failed: {err}")))?;
    if !response.status().is_success() {
        return Err(ApiError::internal(format!(
            "bad upstream response {}",
            response.status()
        )));
    }
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);
    let body = response
        .bytes()
        .await
        .map_err(|err| ApiError::internal(format!("upstream read failed: {err}")))?;

    if let Err(err) = state
        .cache
        .write(&key, &body, Duration::from_secs(ttl_minutes * 60))
        .await
    {
        warn!(error = %err, "failed to cache proxy response");
    }

    let mut response = body.to_vec().into_response();
    if let Some(content_type) = content_type
        && let Ok(value) = content_type.parse()
    {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    Ok(response)
}

async fn find_record(state: &ApiState, name: &str) -> Result<Arc<TorrentRecord>, ApiError> {
    state
        .pool
        .get(name)
        .await
        .ok_or_else(|| ApiError::bad_request(format!("failed to find torrent '{name}'")))
}

fn find_file(record: &Arc<TorrentRecord>, key: &str) -> Result<Arc<FileState>, ApiError> {
    key.parse::<usize>()
        .ok()
        .and_then(|index| record.file_by_index(index))
        .or_else(|| record.file_by_name(key))
        .ok_or_else(|| {
            ApiError::bad_request(format!(
                "failed to find file '{key}' in '{}'",
                record.name()
            ))
        })
}
