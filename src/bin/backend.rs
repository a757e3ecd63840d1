#![forbid(unsafe_code)]

//! Axum backend for the portfolio site.
//!
//! Visitors read works, view-log history, the total view counter and channel
//! testimonials. Everything that writes (or spends YouTube API quota) requires
//! a Supabase session whose email is on the admin allow-list. The server keeps
//! no state of its own besides that allow-list: rows live in Supabase,
//! testimonials behind the ratings API and metadata comes from YouTube.

use std::{
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{
        FromRequest, FromRequestParts, Path as AxumPath, Query, Request, State,
        rejection::JsonRejection,
    },
    http::{HeaderMap, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use clap::Parser;
use portfolio_backend::config::{RuntimeOverrides, resolve_runtime_settings};
use portfolio_backend::models::{
    ChannelRating, NewViewLog, RatingDeleted, RatingSubmission, RatingSubmitted, VideoPreview,
    ViewLog, ViewLogQuery, Work, WorkMetadata, WorkRefresh, WorkUpsert,
};
use portfolio_backend::ratings::{
    RatingsApi, RatingsClient, sort_newest_first, validate_submission,
};
use portfolio_backend::security::AccessGate;
use portfolio_backend::store::{IdentityProvider, PortfolioStore, SupabaseClient};
use portfolio_backend::upstream::{UpstreamError, UpstreamResult};
use portfolio_backend::youtube::{VideoCatalog, YouTubeApi, extract_video_id};
use serde::{Deserialize, Serialize};
use tokio::signal;
use tracing_subscriber::EnvFilter;

// Public list is safe to cache at the edge for a minute.
const WORKS_CACHE_CONTROL: &str = "public, s-maxage=60, stale-while-revalidate=300";

#[derive(Debug, Parser)]
#[command(name = "backend", about = "Portfolio site API server")]
struct BackendArgs {
    /// Address to bind (overrides PORTFOLIO_HOST).
    #[arg(long)]
    host: Option<String>,
    /// Port to bind (overrides PORTFOLIO_PORT).
    #[arg(long)]
    port: Option<u16>,
    /// JSON array of admin emails (overrides ADMINS_FILE).
    #[arg(long)]
    admins_file: Option<PathBuf>,
    /// Alternative .env file.
    #[arg(long)]
    env_file: Option<PathBuf>,
}

impl BackendArgs {
    fn into_overrides(self) -> RuntimeOverrides {
        RuntimeOverrides {
            host: self.host,
            port: self.port,
            admins_file: self.admins_file,
            env_path: self.env_file,
        }
    }
}

fn parse_host(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .with_context(|| format!("expected a valid IPv4 or IPv6 address for --host/PORTFOLIO_HOST, got {value:?}"))
}

/// Shared state injected into every Axum handler.
///
/// * `store` and `identity` are the same Supabase client in production.
/// * `videos` is `None` when no YouTube API key is configured; routes that
///   need it answer 500 instead of failing at start-up.
/// * `gate` owns the cached admin allow-list.
#[derive(Clone)]
struct AppState {
    store: Arc<dyn PortfolioStore>,
    identity: Arc<dyn IdentityProvider>,
    videos: Option<Arc<dyn VideoCatalog>>,
    ratings: Arc<dyn RatingsApi>,
    gate: Arc<AccessGate>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

/// Upstream 4xx/5xx statuses are forwarded; anything else becomes a 500.
impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> Self {
        let status = err
            .status
            .and_then(|code| StatusCode::from_u16(code).ok())
            .filter(|status| status.is_client_error() || status.is_server_error())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, err.message)
    }
}

/// Malformed or missing bodies keep the `{"error": ...}` shape.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// `Json` body extractor whose rejection is an [`ApiError`].
struct ApiJson<T>(T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> ApiResult<Self> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}

#[derive(Debug, Serialize)]
struct Envelope<T> {
    success: bool,
    data: T,
}

fn success<T>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data,
    })
}

#[derive(Debug, Serialize, PartialEq)]
struct Deleted {
    success: bool,
    id: i64,
}

#[derive(Debug, Serialize, PartialEq)]
struct SessionInfo {
    email: String,
    admin: bool,
}

/// Signed-in user whose email passed the allow-list.
#[derive(Debug, Clone)]
struct AdminUser {
    email: String,
}

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> ApiResult<Self> {
        let email = state
            .session_email(&parts.headers)
            .await?
            .ok_or_else(|| ApiError::unauthorized("Not signed in"))?;
        if !state.gate.is_email_allowed(Some(&email)) {
            tracing::warn!(%email, path = %parts.uri.path(), "admin route refused");
            return Err(ApiError::forbidden("Not an admin"));
        }
        Ok(AdminUser { email })
    }
}

#[derive(Debug, Deserialize)]
struct PreviewRequest {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SaveWorkRequest {
    youtube_url: Option<String>,
    note: Option<String>,
    preview: Option<WorkMetadata>,
}

#[derive(Debug, Deserialize)]
struct RefreshWorkRequest {
    id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct LogViewsRequest {
    work_id: Option<i64>,
    video_id: Option<String>,
    youtube_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ViewLogParams {
    work_id: Option<String>,
    video_id: Option<String>,
    limit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRatingRequest {
    #[serde(default)]
    youtube_handle: String,
    #[serde(default)]
    stars: i64,
    #[serde(default)]
    comment: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = resolve_runtime_settings(BackendArgs::parse().into_overrides())?;
    let host = parse_host(&settings.host)?;

    let supabase = Arc::new(SupabaseClient::new(
        &settings.supabase_url,
        settings.supabase_anon_key.clone(),
        settings.upstream_timeout,
    ));
    let videos: Option<Arc<dyn VideoCatalog>> = match &settings.youtube_api_key {
        Some(key) => Some(Arc::new(YouTubeApi::new(
            key.clone(),
            settings.upstream_timeout,
        ))),
        None => {
            tracing::warn!("YOUTUBE_API_KEY not set; preview, refresh and view logging are disabled");
            None
        }
    };

    let state = AppState {
        store: supabase.clone(),
        identity: supabase,
        videos,
        ratings: Arc::new(RatingsClient::new(
            &settings.ratings_api_base,
            settings.upstream_timeout,
        )),
        gate: preload_gate(&settings.admins_file),
    };

    let app = build_router(state);

    let addr = SocketAddr::new(host, settings.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    tracing::info!(%addr, admins_file = %settings.admins_file.display(), "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/youtube/works", get(list_works).post(save_work))
        .route("/api/youtube/works/refresh", post(refresh_work))
        .route("/api/youtube/works/{id}", delete(delete_work))
        .route("/api/youtube/preview", post(preview_video))
        .route("/api/youtube/views/log", post(log_views))
        .route("/api/youtube/views/list", get(list_view_logs))
        .route("/api/youtube/views/total", get(total_views))
        .route("/api/youtube/views/{id}", delete(delete_view_log))
        .route("/api/ratings", get(list_ratings).post(submit_rating))
        .route("/api/ratings/{id}", delete(delete_rating))
        .route("/api/admin/session", get(admin_session))
        .fallback(endpoint_not_found)
        .with_state(state)
}

/// Reads the allow-list before serving so the first admin request does not
/// touch the disk. A failed read still denies everyone.
fn preload_gate(admins_file: &Path) -> Arc<AccessGate> {
    let gate = Arc::new(AccessGate::from_file(admins_file));
    gate.load_allow_list();
    gate
}

async fn shutdown_signal() {
    // Only graceful shutdown depends on this; Ctrl+C still terminates.
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install Ctrl+C handler");
    }
}

async fn endpoint_not_found() -> ApiError {
    ApiError::not_found("endpoint not found")
}

async fn list_works(State(state): State<AppState>) -> ApiResult<Response> {
    let works = state.list_works().await?;
    Ok((
        [(header::CACHE_CONTROL, WORKS_CACHE_CONTROL)],
        success(works),
    )
        .into_response())
}

async fn save_work(
    admin: AdminUser,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<SaveWorkRequest>,
) -> ApiResult<Json<Envelope<Work>>> {
    let youtube_url = non_blank(body.youtube_url)
        .ok_or_else(|| ApiError::bad_request("youtube_url is required"))?;

    // A preview the admin already looked at is trusted as-is.
    let meta = match body.preview {
        Some(preview) => preview,
        None => {
            let catalog = state.catalog()?;
            let video_id = extract_video_id(&youtube_url)
                .ok_or_else(|| ApiError::bad_request("Invalid YouTube URL"))?;
            WorkMetadata::from(state.fetch_preview(catalog, video_id, &youtube_url).await?)
        }
    };

    let work = state
        .upsert_work(WorkUpsert::new(youtube_url, body.note, meta))
        .await?;
    tracing::info!(admin = %admin.email, work_id = work.id, video_id = ?work.video_id, "work saved");
    Ok(success(work))
}

async fn delete_work(
    admin: AdminUser,
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<Deleted>> {
    let id = parse_id(&id)?;
    state.delete_work(id).await?;
    tracing::info!(admin = %admin.email, work_id = id, "work deleted");
    Ok(Json(Deleted { success: true, id }))
}

async fn refresh_work(
    admin: AdminUser,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RefreshWorkRequest>,
) -> ApiResult<Json<Envelope<Work>>> {
    let id = body
        .id
        .filter(|id| *id != 0)
        .ok_or_else(|| ApiError::bad_request("id is required"))?;
    let catalog = state.catalog()?;

    let existing = state
        .find_work(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Work not found"))?;
    let video_id = extract_video_id(&existing.youtube_url)
        .ok_or_else(|| ApiError::bad_request("Invalid YouTube URL on record"))?;
    let preview = state
        .fetch_preview(catalog, video_id, &existing.youtube_url)
        .await?;

    let work = state.refresh_work(id, WorkRefresh::from(preview)).await?;
    tracing::info!(admin = %admin.email, work_id = id, views = work.view_count, "work refreshed");
    Ok(success(work))
}

async fn preview_video(
    _admin: AdminUser,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<PreviewRequest>,
) -> ApiResult<Json<Envelope<VideoPreview>>> {
    let url = non_blank(body.url).ok_or_else(|| ApiError::bad_request("url is required"))?;
    let video_id =
        extract_video_id(&url).ok_or_else(|| ApiError::bad_request("Invalid YouTube URL"))?;
    let catalog = state.catalog()?;
    let preview = state.fetch_preview(catalog, video_id, &url).await?;
    Ok(success(preview))
}

async fn log_views(
    admin: AdminUser,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<LogViewsRequest>,
) -> ApiResult<Json<Envelope<ViewLog>>> {
    let catalog = state.catalog()?;

    let work_id = body.work_id.filter(|id| *id != 0);
    let mut video_id = non_blank(body.video_id);
    let mut youtube_url = non_blank(body.youtube_url);

    if let Some(id) = work_id {
        let work = state
            .find_work(id)
            .await?
            .ok_or_else(|| ApiError::not_found("Work not found"))?;
        video_id = video_id.or_else(|| non_blank(work.video_id));
        youtube_url = youtube_url.or_else(|| non_blank(Some(work.youtube_url)));
    }

    if video_id.is_none() {
        video_id = youtube_url.as_deref().and_then(extract_video_id);
    }
    let video_id = video_id.ok_or_else(|| {
        ApiError::bad_request("video_id or youtube_url (resolvable) is required")
    })?;

    let view_count = state.fetch_view_count(catalog, video_id.clone()).await?;
    let log = state
        .insert_view_log(NewViewLog {
            work_id,
            video_id,
            youtube_url,
            view_count,
        })
        .await?;

    if let Some(id) = work_id {
        // The snapshot is already stored; a stale counter on the work is not
        // worth failing the request over.
        if let Err(err) = state.set_work_views(id, view_count).await {
            tracing::warn!(work_id = id, error = %err.message, "could not update work view count");
        }
    }

    tracing::info!(admin = %admin.email, video_id = %log.video_id, views = view_count, "views logged");
    Ok(success(log))
}

async fn list_view_logs(
    State(state): State<AppState>,
    Query(params): Query<ViewLogParams>,
) -> ApiResult<Json<Envelope<Vec<ViewLog>>>> {
    let query = view_log_query(params)?;
    let logs = state.list_view_logs(query).await?;
    Ok(success(logs))
}

async fn delete_view_log(
    admin: AdminUser,
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<Deleted>> {
    let id = parse_id(&id)?;
    state.delete_view_log(id).await?;
    tracing::info!(admin = %admin.email, log_id = id, "view log deleted");
    Ok(Json(Deleted { success: true, id }))
}

async fn total_views(State(state): State<AppState>) -> ApiResult<Json<Envelope<i64>>> {
    Ok(success(state.total_views().await?))
}

async fn list_ratings(
    State(state): State<AppState>,
) -> ApiResult<Json<Envelope<Vec<ChannelRating>>>> {
    let mut ratings = state.list_ratings().await?;
    sort_newest_first(&mut ratings);
    Ok(success(ratings))
}

async fn submit_rating(
    admin: AdminUser,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<SubmitRatingRequest>,
) -> ApiResult<Json<RatingSubmitted>> {
    let submission = validate_submission(RatingSubmission {
        youtube_handle: body.youtube_handle,
        stars: body.stars,
        comment: body.comment,
    })
    .map_err(ApiError::bad_request)?;
    let submitted = state.submit_rating(submission).await?;
    tracing::info!(admin = %admin.email, rating_id = submitted.data.id, "rating submitted");
    Ok(Json(submitted))
}

async fn delete_rating(
    admin: AdminUser,
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<RatingDeleted>> {
    let id = parse_id(&id)?;
    let deleted = state.delete_rating(id).await?;
    tracing::info!(admin = %admin.email, rating_id = id, "rating deleted");
    Ok(Json(deleted))
}

async fn admin_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Envelope<SessionInfo>>> {
    let email = state
        .session_email(&headers)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Not signed in"))?;
    let admin = state.gate.is_email_allowed(Some(&email));
    Ok(success(SessionInfo { email, admin }))
}

/// Every upstream client is blocking (`ureq`), so each call hops onto the
/// blocking pool. The wrappers below keep handlers free of that plumbing.
impl AppState {
    fn catalog(&self) -> ApiResult<Arc<dyn VideoCatalog>> {
        self.videos
            .clone()
            .ok_or_else(|| ApiError::internal("Server missing YOUTUBE_API_KEY"))
    }

    async fn session_email(&self, headers: &HeaderMap) -> ApiResult<Option<String>> {
        let Some(token) = bearer_token(headers) else {
            return Ok(None);
        };
        let identity = Arc::clone(&self.identity);
        run_blocking(move || identity.user_email(&token)).await
    }

    async fn fetch_preview(
        &self,
        catalog: Arc<dyn VideoCatalog>,
        video_id: String,
        youtube_url: &str,
    ) -> ApiResult<VideoPreview> {
        let youtube_url = youtube_url.to_string();
        run_blocking(move || catalog.fetch_preview(&video_id, &youtube_url)).await
    }

    async fn fetch_view_count(
        &self,
        catalog: Arc<dyn VideoCatalog>,
        video_id: String,
    ) -> ApiResult<i64> {
        run_blocking(move || catalog.fetch_view_count(&video_id)).await
    }

    async fn list_works(&self) -> ApiResult<Vec<Work>> {
        let store = Arc::clone(&self.store);
        run_blocking(move || store.list_works()).await
    }

    async fn find_work(&self, id: i64) -> ApiResult<Option<Work>> {
        let store = Arc::clone(&self.store);
        run_blocking(move || store.find_work(id)).await
    }

    async fn upsert_work(&self, work: WorkUpsert) -> ApiResult<Work> {
        let store = Arc::clone(&self.store);
        run_blocking(move || store.upsert_work(&work)).await
    }

    async fn refresh_work(&self, id: i64, patch: WorkRefresh) -> ApiResult<Work> {
        let store = Arc::clone(&self.store);
        run_blocking(move || store.refresh_work(id, &patch)).await
    }

    async fn set_work_views(&self, id: i64, view_count: i64) -> ApiResult<()> {
        let store = Arc::clone(&self.store);
        run_blocking(move || store.set_work_views(id, view_count)).await
    }

    async fn delete_work(&self, id: i64) -> ApiResult<()> {
        let store = Arc::clone(&self.store);
        run_blocking(move || store.delete_work(id)).await
    }

    async fn insert_view_log(&self, log: NewViewLog) -> ApiResult<ViewLog> {
        let store = Arc::clone(&self.store);
        run_blocking(move || store.insert_view_log(&log)).await
    }

    async fn list_view_logs(&self, query: ViewLogQuery) -> ApiResult<Vec<ViewLog>> {
        let store = Arc::clone(&self.store);
        run_blocking(move || store.list_view_logs(&query)).await
    }

    async fn delete_view_log(&self, id: i64) -> ApiResult<()> {
        let store = Arc::clone(&self.store);
        run_blocking(move || store.delete_view_log(id)).await
    }

    async fn total_views(&self) -> ApiResult<i64> {
        let store = Arc::clone(&self.store);
        run_blocking(move || store.total_views()).await
    }

    async fn list_ratings(&self) -> ApiResult<Vec<ChannelRating>> {
        let ratings = Arc::clone(&self.ratings);
        run_blocking(move || ratings.list()).await
    }

    async fn submit_rating(&self, submission: RatingSubmission) -> ApiResult<RatingSubmitted> {
        let ratings = Arc::clone(&self.ratings);
        run_blocking(move || ratings.submit(&submission)).await
    }

    async fn delete_rating(&self, id: i64) -> ApiResult<RatingDeleted> {
        let ratings = Arc::clone(&self.ratings);
        run_blocking(move || ratings.delete(id)).await
    }
}

async fn run_blocking<T, F>(task: F) -> ApiResult<T>
where
    F: FnOnce() -> UpstreamResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| ApiError::internal(format!("upstream task failed: {err}")))?
        .map_err(ApiError::from)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

/// Path ids must be non-zero integers.
fn parse_id(raw: &str) -> ApiResult<i64> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id != 0)
        .ok_or_else(|| ApiError::bad_request("Invalid id"))
}

fn view_log_query(params: ViewLogParams) -> ApiResult<ViewLogQuery> {
    let work_id = match non_blank(params.work_id) {
        Some(raw) => Some(
            raw.trim()
                .parse::<i64>()
                .map_err(|_| ApiError::bad_request("Invalid work_id"))?,
        ),
        None => None,
    };
    let video_id = non_blank(params.video_id);
    if work_id.is_none() && video_id.is_none() {
        return Err(ApiError::bad_request("work_id or video_id is required"));
    }
    let limit = non_blank(params.limit).and_then(|raw| raw.trim().parse::<i64>().ok());
    Ok(ViewLogQuery {
        work_id,
        video_id,
        limit: ViewLogQuery::clamp_limit(limit),
    })
}
