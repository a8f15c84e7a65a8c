//! 防伪令牌（CSRF）中间件
//!
//! 双重提交 Cookie：`GET /admin/antiforgery/token` 下发随机令牌并写入 Cookie，
//! 前端在写操作时把同一令牌放入请求头，中间件比对两者。

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderValue, Method, Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::headers::{Cookie, HeaderMapExt};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::{dto::ApiResponse, error::AdminError, state::AppState};

const TOKEN_BYTES: usize = 32;

/// 下发给前端的令牌
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AntiforgeryToken {
    pub token: String,
    pub header_name: String,
}

/// 生成 URL 安全的随机令牌
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// 先做摘要再逐字节比较，比较耗时与令牌内容无关
pub fn tokens_match(expected: &str, provided: &str) -> bool {
    let a = Sha256::digest(expected.as_bytes());
    let b = Sha256::digest(provided.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn is_state_changing(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}

/// 校验写操作的防伪令牌
pub async fn antiforgery_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let settings = &state.config.antiforgery;
    if !settings.enabled || !is_state_changing(request.method()) {
        return next.run(request).await;
    }

    let cookie_token = request
        .headers()
        .typed_get::<Cookie>()
        .and_then(|c| c.get(&settings.cookie_name).map(str::to_string));
    let header_token = request
        .headers()
        .get(settings.header_name.as_str())
        .and_then(|v| v.to_str().ok());

    match (cookie_token.as_deref(), header_token) {
        (Some(expected), Some(provided)) if !expected.is_empty() && tokens_match(expected, provided) => {
            next.run(request).await
        }
        (cookie, header) => {
            warn!(
                method = %request.method(),
                path = %request.uri().path(),
                has_cookie = cookie.is_some(),
                has_header = header.is_some(),
                "Antiforgery check failed"
            );
            AdminError::AntiforgeryRejected.into_response()
        }
    }
}

/// 下发防伪令牌
///
/// GET /admin/antiforgery/token
pub async fn issue_token(State(state): State<AppState>) -> Response {
    let settings = &state.config.antiforgery;
    let token = generate_token();

    // 前端需要读取该 Cookie，因此不设置 HttpOnly
    let mut cookie = format!("{}={}; Path=/; SameSite=Strict", settings.cookie_name, token);
    if state.config.is_production() {
        cookie.push_str("; Secure");
    }

    let body = Json(ApiResponse::success(AntiforgeryToken {
        token,
        header_name: settings.header_name.clone(),
    }));
    let mut response = body.into_response();
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
        Err(e) => {
            // cookie_name 来自配置，非法字符会导致无法写入
            warn!(error = %e, "Invalid antiforgery cookie, check antiforgery.cookie_name");
        }
    }
    debug!("Antiforgery token issued");
    response
}
