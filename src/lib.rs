use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use auth::TokenKeys;
use config::Config;
use limiter::{DynClock, RateLimiter};
use mailer::Mailer;
use middleware::{RateLimitPolicy, RateLimitState, auth_middleware, log_errors, rate_limit};
use store::UserStore;

pub mod auth;
pub mod config;
pub mod error;
pub mod limiter;
pub mod mailer;
pub mod middleware;
pub mod routes;
pub mod store;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub keys: TokenKeys,
    pub users: Arc<dyn UserStore>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub fn new(config: Config, users: Arc<dyn UserStore>, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            keys: TokenKeys::from_secret(&config.jwt_secret),
            config,
            users,
            mailer,
        }
    }
}

/// 组装全部路由和中间件
///
/// 全局限流按 IP 作用于所有请求；注册和登录另有更严格的 `login` 作用域限流。
pub fn app(state: AppState, limiter: Arc<RateLimiter<DynClock>>) -> Router {
    let config = &state.config;
    let trusted: Arc<[IpAddr]> = config.trusted_proxies.clone().into();

    let global_limit = RateLimitState::new(
        limiter.clone(),
        RateLimitPolicy {
            capacity: config.rate_limit_requests,
            window: config.rate_limit_window(),
        },
        "ip",
        trusted.clone(),
    );
    let login_limit = RateLimitState::new(
        limiter,
        RateLimitPolicy {
            capacity: config.login_rate_limit_requests,
            window: config.login_rate_limit_window(),
        },
        "login",
        trusted,
    );

    // 凭证接口
    let credential_routes = Router::new()
        .route("/users/signup", post(routes::user::signup))
        .route("/users/login", post(routes::user::login))
        .route_layer(axum::middleware::from_fn_with_state(login_limit, rate_limit));

    let public_routes = Router::new()
        .route("/ping", get(routes::health::ping))
        .route(
            "/users/verify-email",
            get(routes::user::verify_email_link).post(routes::user::verify_email),
        )
        .route("/users/logout", post(routes::user::logout));

    let protected_routes = Router::new()
        .route("/users/me", get(routes::user::me))
        .route("/users/refresh-token", post(routes::user::refresh_token))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let api = Router::new()
        .merge(credential_routes)
        .merge(public_routes)
        .merge(protected_routes);

    // axum 不允许在根路径 nest
    let base = config.api_base_uri.trim_end_matches('/');
    let router = if base.is_empty() {
        api
    } else {
        Router::new().nest(base, api)
    };

    router
        .layer(axum::middleware::from_fn(log_errors))
        .layer(axum::middleware::from_fn_with_state(global_limit, rate_limit))
        .with_state(state)
}
