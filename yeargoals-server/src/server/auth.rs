use axum::http::{Request, header};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{Duration, Utc};
use std::time::Instant;
use tokio::sync::Mutex;
use yeargoals_shared::jwt::{self, JwtClaims};

use super::{AppError, AppState};

/// Days of inactivity before a session is considered expired.
const SESSION_IDLE_DAYS: i64 = 14;
/// Days before mandatory re-login.
const TOKEN_TTL_DAYS: i64 = 30;
/// Cookie carrying the session token for browser clients.
pub const AUTH_COOKIE: &str = "auth_token";

/// Failed login attempts allowed per window before 429.
const LOGIN_MAX_FAILURES: u32 = 10;
const LOGIN_WINDOW_SECS: u64 = 15 * 60;

#[derive(Clone, Debug)]
pub struct AuthCtx {
    pub claims: JwtClaims,
}

/// Fixed-window limiter on failed logins. Global rather than per-IP: the
/// app has one shared password and two users, so a single window is enough
/// to blunt guessing.
#[derive(Default)]
pub struct LoginLimiter {
    window: Mutex<Option<(Instant, u32)>>,
}

impl LoginLimiter {
    pub async fn check(&self) -> Result<(), AppError> {
        let mut guard = self.window.lock().await;
        if let Some((start, count)) = *guard {
            if start.elapsed().as_secs() >= LOGIN_WINDOW_SECS {
                *guard = None;
            } else if count >= LOGIN_MAX_FAILURES {
                return Err(AppError::rate_limited());
            }
        }
        Ok(())
    }

    pub async fn record_failure(&self) {
        let mut guard = self.window.lock().await;
        match guard.as_mut() {
            Some((start, count)) if start.elapsed().as_secs() < LOGIN_WINDOW_SECS => {
                *count += 1;
            }
            _ => *guard = Some((Instant::now(), 1)),
        }
    }
}

/// Pull the session token from the `auth_token` cookie, falling back to an
/// `Authorization: Bearer` header (used by tests and scripted clients).
pub fn extract_token<B>(req: &Request<B>) -> Option<String> {
    if let Some(cookie_header) = req.headers().get(header::COOKIE)
        && let Ok(cookies) = cookie_header.to_str()
    {
        for pair in cookies.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=')
                && name == AUTH_COOKIE
                && !value.is_empty()
            {
                return Some(value.to_string());
            }
        }
    }
    let header_str = req
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    header_str
        .strip_prefix("Bearer ")
        .map(|token| token.to_string())
}

/// Uniform guard applied to every protected route: verify the JWT, then
/// touch the backing session row so idle sessions expire and logged-out
/// tokens stop working immediately.
pub async fn require_auth(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let Some(token) = extract_token(&req) else {
        return Err(AppError::unauthorized());
    };

    let claims = match jwt::decode_and_verify(&token, state.config.jwt_secret.as_bytes()) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error=%e, "auth: jwt decode failed");
            return Err(AppError::unauthorized());
        }
    };

    let jti = claims.jti.clone();
    let cutoff = Utc::now() - Duration::days(SESSION_IDLE_DAYS);
    match state
        .store
        .touch_session_with_cutoff(&jti, cutoff.naive_utc())
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(
                jti = %jti,
                cutoff = %cutoff,
                "auth: session missing or expired (last_used_at < cutoff)"
            );
            return Err(AppError::unauthorized());
        }
        Err(e) => {
            tracing::error!(jti = %jti, error=%e, "auth: touch_session_with_cutoff failed");
            return Err(AppError::internal(e));
        }
    }
    req.extensions_mut().insert(AuthCtx { claims });
    Ok(next.run(req).await)
}

/// Create a session row and mint the matching token.
pub async fn issue_token(state: &AppState) -> Result<String, AppError> {
    let jti = uuid::Uuid::new_v4().to_string();
    let exp = (Utc::now() + Duration::days(TOKEN_TTL_DAYS)).timestamp();
    let claims = JwtClaims {
        sub: "shared".to_string(),
        jti: jti.clone(),
        exp,
    };
    state.store.create_session(&jti).await.map_err(|e| {
        tracing::error!(error=%e, "login: create_session failed");
        AppError::internal(e)
    })?;
    jwt::encode(&claims, state.config.jwt_secret.as_bytes()).map_err(|e| {
        tracing::error!(error=%e, "login: jwt encode failed");
        AppError::internal(e)
    })
}

/// Cookie attributes for freshly issued tokens.
pub fn session_cookie(token: &str) -> String {
    format!(
        "{AUTH_COOKIE}={token}; HttpOnly; Path=/; Max-Age={}; SameSite=Lax",
        TOKEN_TTL_DAYS * 24 * 60 * 60
    )
}

/// Cookie attributes that clear the token on logout.
pub fn clear_cookie() -> String {
    format!("{AUTH_COOKIE}=; HttpOnly; Path=/; Max-Age=0; SameSite=Lax")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn req_with(header_name: header::HeaderName, value: &str) -> Request<Body> {
        Request::builder()
            .header(header_name, value)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn token_from_cookie() {
        let req = req_with(header::COOKIE, "theme=dark; auth_token=tok123");
        assert_eq!(extract_token(&req).as_deref(), Some("tok123"));
    }

    #[test]
    fn token_from_bearer() {
        let req = req_with(header::AUTHORIZATION, "Bearer tok456");
        assert_eq!(extract_token(&req).as_deref(), Some("tok456"));
    }

    #[test]
    fn cookie_wins_over_header() {
        let req = Request::builder()
            .header(header::COOKIE, "auth_token=cookie-tok")
            .header(header::AUTHORIZATION, "Bearer header-tok")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_token(&req).as_deref(), Some("cookie-tok"));
    }

    #[test]
    fn missing_token_is_none() {
        let req = Request::builder().body(Body::empty()).unwrap();
        assert!(extract_token(&req).is_none());
    }

    #[tokio::test]
    async fn limiter_blocks_after_max_failures() {
        let limiter = LoginLimiter::default();
        assert!(limiter.check().await.is_ok());
        for _ in 0..LOGIN_MAX_FAILURES {
            limiter.record_failure().await;
        }
        assert!(limiter.check().await.is_err());
    }
}
