//! 自定义提取器
//!
//! 后台身份认证由网关完成，网关通过 `x-operator-id` 头传递操作人。

use axum::{extract::FromRequestParts, http::request::Parts};
use std::convert::Infallible;

/// 操作人请求头
pub const OPERATOR_HEADER: &str = "x-operator-id";

/// 当前操作人，缺省为 `system`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator(pub String);

impl Operator {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for Operator
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let operator = parts
            .headers
            .get(OPERATOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or("system");
        Ok(Self(operator.chars().take(100).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Operator {
        let (mut parts, _) = request.into_parts();
        Operator::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn test_operator_from_header() {
        let request = Request::builder()
            .header(OPERATOR_HEADER, "alice")
            .body(())
            .unwrap();
        assert_eq!(extract(request).await.as_str(), "alice");
    }

    #[tokio::test]
    async fn test_operator_defaults_to_system() {
        let request = Request::builder().body(()).unwrap();
        assert_eq!(extract(request).await.as_str(), "system");

        let blank = Request::builder()
            .header(OPERATOR_HEADER, "  ")
            .body(())
            .unwrap();
        assert_eq!(extract(blank).await.as_str(), "system");
    }
}
