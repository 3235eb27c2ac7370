use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::{AppState, auth::resolve_user, error::AppError};

/// 解析请求用户并放入 extensions，失败返回 401
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let user = resolve_user(
        req.headers(),
        &state.keys,
        &state.config.auth_cookie_name,
        state.users.as_ref(),
    )
    .await
    .ok_or(AppError::Unauthorized)?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
