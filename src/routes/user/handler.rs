use axum::{
    extract::{Extension, Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::{
    AppState,
    auth::{TokenPurpose, hash_password, verify_password},
    error::AppError,
    store::{NewUser, UserIdentity},
    utils::{ApiResponse, success_to_api_response},
};

use super::model::{
    LoginRequest, LoginResponse, SignupRequest, SignupResponse, TokenResponse,
    VerifyEmailRequest, normalize_email,
};

#[axum::debug_handler]
pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, AppError> {
    let req = req.normalized()?;

    let cost = state.config.bcrypt_cost;
    let password = req.password;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password, cost))
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?
        .map_err(|e| AppError::InternalServerError(format!("Failed to hash password: {}", e)))?;

    let user = state
        .users
        .create(NewUser {
            email: req.email,
            display_name: req.display_name,
            password_hash,
        })
        .await?;

    let (token, _) = state
        .keys
        .issue(
            &user.user_id,
            TokenPurpose::VerifyEmail,
            state.config.verify_token_expiration(),
        )
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;
    let link = format!(
        "{}{}/users/verify-email?token={}",
        state.config.app_base_url.trim_end_matches('/'),
        state.config.api_base_uri.trim_end_matches('/'),
        token
    );
    state.mailer.send_verification(&user.email, &link).await;

    Ok((
        StatusCode::CREATED,
        success_to_api_response(SignupResponse {
            user_id: user.user_id,
            email: user.email,
            display_name: user.display_name,
            email_verified: user.email_verified,
        }),
    ))
}

#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    // 邮箱不存在和密码错误返回同样的结果
    let email = normalize_email(&req.email).ok_or(AppError::Unauthorized)?;
    let user = state
        .users
        .find_by_email(&email)
        .await?
        .ok_or(AppError::Unauthorized)?;

    let password = req.password;
    let password_hash = user.password_hash.clone();
    let valid = tokio::task::spawn_blocking(move || verify_password(&password, &password_hash))
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?
        .unwrap_or(false);
    if !valid {
        tracing::debug!("Login rejected for user {}", user.user_id);
        return Err(AppError::Unauthorized);
    }

    if !user.email_verified {
        return Err(AppError::Unverified);
    }

    let (token, expires_at) = state
        .keys
        .issue(
            &user.user_id,
            TokenPurpose::Session,
            state.config.jwt_expiration(),
        )
        .map_err(|e| AppError::InternalServerError(format!("生成令牌失败: {}", e)))?;

    tracing::info!("User {} logged in", user.user_id);
    Ok((
        jar.add(session_cookie(&state, token.clone())),
        success_to_api_response(LoginResponse {
            user_id: user.user_id,
            token,
            expires_at,
        }),
    ))
}

#[axum::debug_handler]
pub async fn verify_email(
    State(state): State<AppState>,
    Json(req): Json<VerifyEmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    confirm_email(&state, &req.token).await
}

/// 邮件中的链接直接 GET 访问
#[axum::debug_handler]
pub async fn verify_email_link(
    State(state): State<AppState>,
    Query(req): Query<VerifyEmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    confirm_email(&state, &req.token).await
}

#[axum::debug_handler]
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    let jar = jar.remove(Cookie::build((state.config.auth_cookie_name.clone(), "")).path("/"));
    (jar, success_to_api_response(()))
}

/// 返回当前登录用户，认证中间件已完成校验
#[axum::debug_handler]
pub async fn me(Extension(user): Extension<UserIdentity>) -> impl IntoResponse {
    success_to_api_response(user)
}

#[axum::debug_handler]
pub async fn refresh_token(
    State(state): State<AppState>,
    jar: CookieJar,
    Extension(user): Extension<UserIdentity>,
) -> Result<impl IntoResponse, AppError> {
    let (token, expires_at) = state
        .keys
        .issue(
            &user.user_id,
            TokenPurpose::Session,
            state.config.jwt_expiration(),
        )
        .map_err(|e| AppError::InternalServerError(format!("刷新令牌失败: {}", e)))?;

    Ok((
        jar.add(session_cookie(&state, token.clone())),
        success_to_api_response(TokenResponse { token, expires_at }),
    ))
}

async fn confirm_email(state: &AppState, token: &str) -> Result<Json<ApiResponse<()>>, AppError> {
    let claims = state
        .keys
        .verify(token, TokenPurpose::VerifyEmail)
        .map_err(|e| {
            tracing::debug!("Email verification rejected: {}", e.reason());
            AppError::Validation("验证链接无效或已过期".to_string())
        })?;

    if !state.users.mark_verified(&claims.sub).await? {
        return Err(AppError::NotFound("用户"));
    }

    tracing::info!("User {} verified email", claims.sub);
    Ok(success_to_api_response(()))
}

// 站点走 https 时 cookie 只在 https 下发送
fn session_cookie(state: &AppState, token: String) -> Cookie<'static> {
    Cookie::build((state.config.auth_cookie_name.clone(), token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.app_base_url.starts_with("https://"))
        .build()
}
