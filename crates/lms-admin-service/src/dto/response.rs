//! 通用响应 DTO 定义
//!
//! 统一响应信封与分页结构。`message` 字段承载操作结果的提示文案，
//! 前端在跳转后以提示条形式展示一次。

use serde::{Deserialize, Serialize};

use super::request::Page;

/// 分页响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

impl<T> PageResponse<T> {
    /// 创建分页响应
    ///
    /// total 为过滤后、分页前的总数
    pub fn new(items: Vec<T>, total: i64, page: Page) -> Self {
        let total_pages = if page.page_size > 0 {
            (total + page.page_size - 1) / page.page_size
        } else {
            0
        };

        Self {
            items,
            total,
            page: page.page,
            page_size: page.page_size,
            total_pages,
        }
    }

    /// 创建空分页响应
    pub fn empty(page: Page) -> Self {
        Self::new(Vec::new(), 0, page)
    }
}

/// API 统一响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// 创建成功响应
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: Some(data),
        }
    }

    /// 创建成功响应（自定义提示）
    pub fn success_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: message.into(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    /// 创建成功响应（无数据）
    pub fn success_empty(message: impl Into<String>) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: message.into(),
            data: None,
        }
    }

    /// 创建错误响应
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            code: code.into(),
            message: message.into(),
            data: None,
        }
    }
}

/// 创建资源成功响应
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedResponse {
    pub id: i64,
}

impl CreatedResponse {
    pub fn new(id: i64) -> Self {
        Self { id }
    }
}

/// 批量操作影响行数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectedResponse {
    pub affected: u64,
}

impl AffectedResponse {
    pub fn new(affected: u64) -> Self {
        Self { affected }
    }
}

/// 按状态分组的计数
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(page: i64, page_size: i64) -> Page {
        Page { page, page_size }
    }

    #[test]
    fn test_page_response_new() {
        let response = PageResponse::new(vec![1, 2, 3], 100, page(2, 10));

        assert_eq!(response.total, 100);
        assert_eq!(response.page, 2);
        assert_eq!(response.page_size, 10);
        assert_eq!(response.total_pages, 10);
        assert_eq!(response.items.len(), 3);
    }

    #[test]
    fn test_page_response_total_pages_calculation() {
        // 45 条记录，每页 20 条，共 3 页
        let response = PageResponse::<i32>::new(vec![], 45, page(1, 20));
        assert_eq!(response.total_pages, 3);

        // 恰好整除
        let response = PageResponse::<i32>::new(vec![], 40, page(1, 20));
        assert_eq!(response.total_pages, 2);

        // 空数据
        let response = PageResponse::<i32>::empty(page(1, 20));
        assert_eq!(response.total_pages, 0);
    }

    #[test]
    fn test_api_response_success() {
        let response = ApiResponse::success("test data");
        assert!(response.success);
        assert_eq!(response.code, "SUCCESS");
        assert_eq!(response.data, Some("test data"));
    }

    #[test]
    fn test_api_response_error() {
        let response = ApiResponse::error("TEST_ERROR", "测试错误");
        assert!(!response.success);
        assert_eq!(response.code, "TEST_ERROR");
        assert!(response.data.is_none());
    }

    #[test]
    fn test_api_response_serialization() {
        let response = ApiResponse::success_with_message(CreatedResponse::new(123), "徽章已创建");
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"success\":true"));
        assert!(json.contains("\"id\":123"));
        assert!(json.contains("徽章已创建"));

        let empty = serde_json::to_value(ApiResponse::success_empty("已删除")).unwrap();
        assert!(empty.get("data").is_none());
    }

    #[test]
    fn test_page_response_camel_case() {
        let json = serde_json::to_value(PageResponse::new(vec![1], 1, page(1, 20))).unwrap();
        assert_eq!(json["pageSize"], 20);
        assert_eq!(json["totalPages"], 1);
    }
}
