use axum::http::HeaderMap;

use super::{AuthError, TokenKeys, TokenPurpose, extract_token};
use crate::store::{UserIdentity, UserStore};

/// 解析请求对应的用户，失败时返回具体原因
pub async fn authenticate(
    headers: &HeaderMap,
    keys: &TokenKeys,
    cookie_name: &str,
    store: &dyn UserStore,
) -> Result<UserIdentity, AuthError> {
    let token = extract_token(headers, cookie_name)?;
    let claims = keys.verify(&token, TokenPurpose::Session)?;

    match store.find_by_id(&claims.sub).await {
        Ok(Some(user)) => Ok(user.into()),
        Ok(None) => Err(AuthError::UnknownSubject),
        Err(e) => Err(AuthError::Store(e.to_string())),
    }
}

/// 解析请求对应的用户
///
/// 任何失败（无令牌、格式错误、签名不符、过期、用户不存在）都返回 `None`，
/// 原因只记录到日志。
pub async fn resolve_user(
    headers: &HeaderMap,
    keys: &TokenKeys,
    cookie_name: &str,
    store: &dyn UserStore,
) -> Option<UserIdentity> {
    match authenticate(headers, keys, cookie_name, store).await {
        Ok(user) => Some(user),
        Err(AuthError::Store(e)) => {
            tracing::error!("User lookup failed during authentication: {}", e);
            None
        }
        Err(e) => {
            tracing::debug!("Authentication rejected: {}", e.reason());
            None
        }
    }
}
