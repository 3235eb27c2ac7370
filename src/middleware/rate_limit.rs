use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request, StatusCode, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{
    limiter::{Decision, DynClock, RateLimiter},
    utils::{error_codes, error_to_api_response},
};

#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub capacity: u32,
    pub window: Duration,
}

/// 一个限流作用域：共享同一个限流器，key 前缀为 `scope`
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<RateLimiter<DynClock>>,
    pub policy: RateLimitPolicy,
    pub scope: &'static str,
    pub trusted_proxies: Arc<[IpAddr]>,
}

impl RateLimitState {
    pub fn new(
        limiter: Arc<RateLimiter<DynClock>>,
        policy: RateLimitPolicy,
        scope: &'static str,
        trusted_proxies: Arc<[IpAddr]>,
    ) -> Self {
        Self {
            limiter,
            policy,
            scope,
            trusted_proxies,
        }
    }
}

/// 客户端 IP
///
/// 只有当连接来自 `trusted` 中的代理时才读取转发头：先看代理写入的
/// x-real-ip，再从右往左找 x-forwarded-for 中第一个不是代理的地址。
/// 其他情况一律使用连接地址，没有连接信息时为 `unknown`。
pub fn client_ip(req: &Request<Body>, trusted: &[IpAddr]) -> String {
    let Some(peer) = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
    else {
        return "unknown".to_string();
    };

    if !trusted.contains(&peer) {
        return peer.to_string();
    }

    let header_ip = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|h| h.to_str().ok())
            .map(str::to_owned)
    };

    let real_ip = header_ip("x-real-ip").and_then(|v| v.trim().parse::<IpAddr>().ok());
    let forwarded = || {
        header_ip("x-forwarded-for").and_then(|v| {
            v.rsplit(',')
                .filter_map(|ip| ip.trim().parse::<IpAddr>().ok())
                .find(|ip| !trusted.contains(ip))
        })
    };

    real_ip.or_else(forwarded).unwrap_or(peer).to_string()
}

pub async fn rate_limit(
    State(state): State<RateLimitState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let key = format!("{}:{}", state.scope, client_ip(&req, &state.trusted_proxies));

    match state
        .limiter
        .check(&key, state.policy.capacity, state.policy.window)
    {
        Decision::Allowed { .. } => next.run(req).await,
        Decision::Denied {
            reason,
            retry_after,
        } => {
            tracing::info!("Rate limited {} ({})", key, reason.as_str());

            // 向上取整到秒，至少 1 秒
            let secs = retry_after.as_millis().div_ceil(1000).max(1);
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                error_to_api_response::<()>(
                    error_codes::RATE_LIMIT,
                    format!("请求过于频繁，请在{}秒后重试", secs),
                ),
            )
                .into_response();
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
            response
        }
    }
}
