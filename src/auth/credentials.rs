use axum::http::{HeaderMap, header::AUTHORIZATION};
use axum_extra::extract::cookie::CookieJar;

use super::AuthError;

/// 从请求中提取令牌
///
/// 所有调用点使用同一顺序：先 `Authorization: Bearer <token>`，
/// 请求头不存在时再读取认证 cookie。请求头存在但格式不对时直接判为
/// `Malformed`，不回退到 cookie。
pub fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Result<String, AuthError> {
    if let Some(value) = headers.get(AUTHORIZATION) {
        let value = value.to_str().map_err(|_| AuthError::Malformed)?;
        let token = value
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::Malformed)?;
        return Ok(token.to_string());
    }

    let jar = CookieJar::from_headers(headers);
    match jar.get(cookie_name).map(|cookie| cookie.value().trim()) {
        Some("") => Err(AuthError::Malformed),
        Some(token) => Ok(token.to_string()),
        None => Err(AuthError::Missing),
    }
}
