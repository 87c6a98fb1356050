pub mod auth;
mod config;
mod email;

use crate::server::auth::{AuthCtx, LoginLimiter};
use crate::storage::{GoalWithChildren, NewGoalSpec, StorageError, Store, models};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware;
use axum::response::{IntoResponse, Response as AxumResponse};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{Method, StatusCode, header},
    routing::{delete, get, patch, post},
};
pub use config::{AppConfig, EmailConfig};
use mime_guess::from_path;
use rust_embed::RustEmbed;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info_span;
use uuid::Uuid;
use yeargoals_shared::api;
use yeargoals_shared::progress::{did_complete, valid_progress};

/// Accepted range for goal years.
const MIN_YEAR: i32 = 2000;
const MAX_YEAR: i32 = 2100;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Store,
    login_limiter: Arc<LoginLimiter>,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: AppConfig, store: Store) -> Self {
        Self {
            config,
            store,
            login_limiter: Arc::new(LoginLimiter::default()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

#[derive(Clone, Debug)]
struct ReqId(pub String);

pub fn router(state: AppState) -> Router {
    let private = Router::new()
        .route("/api/logout", post(api_logout))
        .route("/api/auth/check", get(api_auth_check))
        .route("/api/config", get(api_config))
        .route("/api/years", get(api_years))
        .route("/api/goals", get(api_list_goals).post(api_create_goal))
        .route(
            "/api/goals/{id}",
            get(api_get_goal).patch(api_update_goal).delete(api_delete_goal),
        )
        .route("/api/goals/{id}/checkins", post(api_add_checkin))
        .route("/api/checkins/{id}", delete(api_delete_checkin))
        .route("/api/goals/{id}/milestones", post(api_add_milestone))
        .route(
            "/api/milestones/{id}",
            patch(api_update_milestone).delete(api_delete_milestone),
        )
        .route("/api/email/test", post(api_email_test))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    // Trace with request context (method, path, request_id)
    let trace = TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
        let request_id = req
            .extensions()
            .get::<ReqId>()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id,
        )
    });

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/login", post(api_login))
        .route("/api/email/monthly-summary", post(api_email_monthly_summary))
        .merge(private)
        .fallback(get(serve_embedded))
        .with_state(state.clone())
        .layer(trace)
        .layer(middleware::from_fn(add_security_headers))
        .layer(middleware::from_fn(add_request_id));

    // Optionally add CORS for dev if configured

    if let Some(origin) = &state.config.dev_cors_origin {
        let hv = header::HeaderValue::from_str(origin)
            .unwrap_or(header::HeaderValue::from_static("http://localhost:5173"));
        let cors = CorsLayer::new()
            .allow_origin(hv)
            .allow_credentials(true)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
        app.layer(cors)
    } else {
        app
    }
}

async fn health() -> Json<api::HealthDto> {
    Json(api::HealthDto {
        status: "ok".to_string(),
    })
}

async fn add_request_id(
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let hdr = HeaderName::from_static("x-request-id");
    // Use provided x-request-id if present, else generate
    let rid = req
        .headers()
        .get(&hdr)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    req.extensions_mut().insert(ReqId(rid.clone()));
    let mut resp = next.run(req).await;
    if let Ok(hv) = HeaderValue::from_str(&rid) {
        resp.headers_mut().insert(hdr, hv);
    }
    Ok(resp)
}

async fn add_security_headers(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let path = req.uri().path().to_string();
    let mut resp = next.run(req).await;

    let headers = resp.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("SAMEORIGIN"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("no-referrer"),
    );

    // Disable caching for API and health endpoints
    if path == "/health" || path.starts_with("/api/") || path == "/api" {
        headers.insert(
            HeaderName::from_static("cache-control"),
            HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
        );
        headers.insert(
            HeaderName::from_static("pragma"),
            HeaderValue::from_static("no-cache"),
        );
    }

    Ok(resp)
}

// ---- Auth ----

async fn api_login(
    State(state): State<AppState>,
    Json(body): Json<api::LoginReq>,
) -> Result<AxumResponse, AppError> {
    state.login_limiter.check().await?;

    let ok = bcrypt::verify(&body.password, &state.config.password_hash).map_err(|e| {
        tracing::error!(error=%e, "login: bcrypt verify failed");
        AppError::internal(e)
    })?;
    if !ok {
        tracing::warn!("login: invalid password");
        state.login_limiter.record_failure().await;
        let body = api::LoginResp {
            success: false,
            token: None,
            message: "Incorrect password".to_string(),
        };
        return Ok(Json(body).into_response());
    }

    let token = auth::issue_token(&state).await?;
    let cookie = auth::session_cookie(&token);
    let body = api::LoginResp {
        success: true,
        token: Some(token),
        message: "Welcome!".to_string(),
    };
    let mut resp = Json(body).into_response();
    if let Ok(hv) = HeaderValue::from_str(&cookie) {
        resp.headers_mut().insert(header::SET_COOKIE, hv);
    }
    Ok(resp)
}

async fn api_logout(
    State(state): State<AppState>,
    axum::extract::Extension(auth): axum::extract::Extension<AuthCtx>,
) -> Result<AxumResponse, AppError> {
    state
        .store
        .delete_session(&auth.claims.jti)
        .await
        .map_err(AppError::internal)?;
    let mut resp = StatusCode::NO_CONTENT.into_response();
    if let Ok(hv) = HeaderValue::from_str(&auth::clear_cookie()) {
        resp.headers_mut().insert(header::SET_COOKIE, hv);
    }
    Ok(resp)
}

async fn api_auth_check() -> Json<api::AuthCheckResp> {
    Json(api::AuthCheckResp {
        authenticated: true,
    })
}

// ---- Config ----

async fn api_config(State(state): State<AppState>) -> Json<api::ConfigDto> {
    Json(api::ConfigDto {
        persons: state.config.persons.clone(),
        categories: state.config.categories.clone(),
        current_year: state.config.current_year(),
    })
}

async fn api_years(State(state): State<AppState>) -> Result<Json<api::YearsDto>, AppError> {
    let mut years = state.store.list_years().await?;
    let current = state.config.current_year();
    if !years.contains(&current) {
        years.insert(0, current);
    }
    Ok(Json(api::YearsDto { years }))
}

// ---- Goals ----

#[derive(Deserialize)]
struct GoalsQuery {
    year: Option<i32>,
    person: Option<String>,
}

async fn api_list_goals(
    State(state): State<AppState>,
    Query(q): Query<GoalsQuery>,
) -> Result<Json<Vec<api::GoalDto>>, AppError> {
    if let Some(person) = &q.person {
        require_known_person(&state.config, person)?;
    }
    let rows = state
        .store
        .list_goals(q.year, q.person.as_deref())
        .await?;
    Ok(Json(rows.into_iter().map(goal_dto).collect()))
}

async fn api_create_goal(
    State(state): State<AppState>,
    Json(body): Json<api::GoalCreateReq>,
) -> Result<(StatusCode, Json<api::GoalDto>), AppError> {
    require_known_person(&state.config, &body.person)?;
    require_known_category(&state.config, &body.category)?;
    require_valid_year(body.year)?;
    let title = body.title.trim();
    if title.is_empty() {
        return Err(AppError::validation("title must not be empty"));
    }
    let milestone_titles: Vec<String> = body
        .milestones
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .take(crate::storage::MILESTONE_CAP)
        .collect();

    let created = state
        .store
        .create_goal(NewGoalSpec {
            person: body.person,
            year: body.year,
            title: title.to_string(),
            description: body.description,
            category: body.category,
            target_date: body.target_date,
            is_habit: body.is_habit,
            milestone_titles,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(goal_dto(created))))
}

async fn api_get_goal(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<api::GoalDto>, AppError> {
    let row = state.store.get_goal(id).await?;
    Ok(Json(goal_dto(row)))
}

async fn api_update_goal(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(body): Json<api::GoalUpdateReq>,
) -> Result<Json<api::GoalUpdateResp>, AppError> {
    if let Some(title) = &body.title
        && title.trim().is_empty()
    {
        return Err(AppError::validation("title must not be empty"));
    }
    if let Some(category) = &body.category {
        require_known_category(&state.config, category)?;
    }
    if let Some(progress) = body.progress
        && !valid_progress(progress)
    {
        return Err(AppError::validation("progress must be between 0 and 100"));
    }

    let changes = models::GoalChanges {
        title: body.title,
        description: body.description,
        category: body.category,
        progress: body.progress,
        target_date: body.target_date,
        is_habit: body.is_habit,
    };
    let (old_progress, row) = state.store.update_goal(id, changes).await?;
    let just_completed = did_complete(old_progress, row.0.progress);
    if just_completed {
        tracing::info!(goal_id = id, title = %row.0.title, "goal reached 100%");
    }
    Ok(Json(api::GoalUpdateResp {
        goal: goal_dto(row),
        just_completed,
    }))
}

async fn api_delete_goal(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    state.store.delete_goal(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- Checkins ----

async fn api_add_checkin(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(body): Json<api::CheckinCreateReq>,
) -> Result<(StatusCode, Json<api::CheckinDto>), AppError> {
    let note = body.note.trim();
    if note.is_empty() {
        return Err(AppError::validation("note must not be empty"));
    }
    let row = state.store.add_checkin(id, note).await?;
    Ok((StatusCode::CREATED, Json(checkin_dto(row))))
}

async fn api_delete_checkin(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    state.store.delete_checkin(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- Milestones ----

async fn api_add_milestone(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(body): Json<api::MilestoneCreateReq>,
) -> Result<(StatusCode, Json<api::MilestoneDto>), AppError> {
    let title = body.title.trim();
    if title.is_empty() {
        return Err(AppError::validation("title must not be empty"));
    }
    let row = state.store.add_milestone(id, title).await?;
    Ok((StatusCode::CREATED, Json(milestone_dto(row))))
}

async fn api_update_milestone(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(body): Json<api::MilestoneUpdateReq>,
) -> Result<Json<api::MilestoneDto>, AppError> {
    let row = state.store.set_milestone_completed(id, body.completed).await?;
    Ok(Json(milestone_dto(row)))
}

async fn api_delete_milestone(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    state.store.delete_milestone(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- Email summary ----

#[derive(Debug, Serialize)]
struct MessageBody {
    message: String,
}

/// Triggered by an external scheduler; guarded by the cron secret rather
/// than a session token.
async fn api_email_monthly_summary(
    State(state): State<AppState>,
    req: axum::http::Request<axum::body::Body>,
) -> Result<Json<MessageBody>, AppError> {
    let Some(secret) = &state.config.cron_secret else {
        return Err(AppError::forbidden());
    };
    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));
    if presented != Some(secret.as_str()) {
        tracing::warn!("email: invalid cron secret");
        return Err(AppError::forbidden());
    }
    email::send_summary(&state, state.config.current_year()).await?;
    Ok(Json(MessageBody {
        message: "Monthly summary sent successfully".to_string(),
    }))
}

async fn api_email_test(
    State(state): State<AppState>,
) -> Result<Json<MessageBody>, AppError> {
    email::send_summary(&state, state.config.current_year()).await?;
    Ok(Json(MessageBody {
        message: "Test email sent successfully".to_string(),
    }))
}

// ---- Validation helpers ----

fn require_known_person(config: &AppConfig, person: &str) -> Result<(), AppError> {
    if config.persons.iter().any(|p| p == person) {
        Ok(())
    } else {
        Err(AppError::validation(format!("unknown person: {person}")))
    }
}

fn require_known_category(config: &AppConfig, category: &str) -> Result<(), AppError> {
    if config.categories.iter().any(|c| c == category) {
        Ok(())
    } else {
        Err(AppError::validation(format!("unknown category: {category}")))
    }
}

fn require_valid_year(year: i32) -> Result<(), AppError> {
    if (MIN_YEAR..=MAX_YEAR).contains(&year) {
        Ok(())
    } else {
        Err(AppError::validation(format!(
            "year must be between {MIN_YEAR} and {MAX_YEAR}"
        )))
    }
}

// ---- DTO mapping ----

fn rfc3339(dt: chrono::NaiveDateTime) -> String {
    chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(dt, chrono::Utc).to_rfc3339()
}

fn goal_dto((goal, checkins, milestones): GoalWithChildren) -> api::GoalDto {
    let milestones_total = milestones.len();
    let milestones_done = milestones.iter().filter(|m| m.completed).count();
    api::GoalDto {
        id: goal.id,
        person: goal.person,
        year: goal.year,
        title: goal.title,
        description: goal.description,
        category: goal.category,
        progress: goal.progress,
        target_date: goal.target_date,
        is_habit: goal.is_habit,
        created_at: rfc3339(goal.created_at),
        checkins: checkins.into_iter().map(checkin_dto).collect(),
        milestones: milestones.into_iter().map(milestone_dto).collect(),
        milestones_done,
        milestones_total,
    }
}

fn checkin_dto(row: models::Checkin) -> api::CheckinDto {
    api::CheckinDto {
        id: row.id,
        goal_id: row.goal_id,
        note: row.note,
        created_at: rfc3339(row.created_at),
    }
}

fn milestone_dto(row: models::Milestone) -> api::MilestoneDto {
    api::MilestoneDto {
        id: row.id,
        goal_id: row.goal_id,
        title: row.title,
        completed: row.completed,
        position: row.position,
    }
}

// ---- Errors ----

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
pub enum AppError {
    Validation(String),
    BadRequest(String),
    Unauthorized,
    Forbidden,
    NotFound(String),
    RateLimited,
    Internal(String),
}

impl AppError {
    pub fn validation<T: Into<String>>(msg: T) -> Self {
        Self::Validation(msg.into())
    }
    pub fn bad_request<T: Into<String>>(msg: T) -> Self {
        Self::BadRequest(msg.into())
    }
    pub fn unauthorized() -> Self {
        Self::Unauthorized
    }
    pub fn forbidden() -> Self {
        Self::Forbidden
    }
    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        Self::NotFound(msg.into())
    }
    pub fn rate_limited() -> Self {
        Self::RateLimited
    }
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(what) => AppError::not_found(format!("{what} not found")),
            StorageError::MilestoneLimit => AppError::bad_request(e.to_string()),
            other => AppError::internal(other),
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, msg, kind, detail) = match self {
            AppError::Validation(m) => (StatusCode::UNPROCESSABLE_ENTITY, m, "validation", None),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m, "bad_request", None),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized".into(),
                "unauthorized",
                None,
            ),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden".into(), "forbidden", None),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m, "not_found", None),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "too many login attempts, try again later".into(),
                "rate_limited",
                None,
            ),
            // Do not leak internal error details to clients, but log them
            AppError::Internal(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".into(),
                "internal",
                Some(m),
            ),
        };
        if let Some(detail) = detail {
            tracing::error!(status = %status, kind = kind, message = %msg, detail = %detail, "request failed");
        } else {
            tracing::warn!(status = %status, kind = kind, message = %msg, "request failed");
        }
        let body = axum::Json(ErrorBody { error: msg });
        (status, body).into_response()
    }
}

#[derive(RustEmbed)]
#[folder = "assets/"]
struct WebAssets;

async fn serve_embedded(
    uri: axum::http::Uri,
) -> Result<axum::response::Response, (StatusCode, String)> {
    let path = uri.path().trim_start_matches('/');
    let candidate = if path.is_empty() { "index.html" } else { path };
    let asset = WebAssets::get(candidate)
        .or_else(|| WebAssets::get("index.html"))
        .ok_or((StatusCode::NOT_FOUND, "asset not found".to_string()))?;

    let bytes = asset.data.into_owned();
    let mime = from_path(candidate).first_or_octet_stream();

    let mut resp = axum::response::Response::new(axum::body::Body::from(bytes));
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_str(mime.as_ref())
            .unwrap_or(header::HeaderValue::from_static("application/octet-stream")),
    );
    Ok(resp)
}
