//! 管理后台错误类型定义
//!
//! 包含所有 admin service 特有的错误类型

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// 管理后台错误类型
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    // 请求错误
    #[error("参数验证失败: {0}")]
    Validation(String),
    #[error("防伪令牌校验失败，请刷新页面后重试")]
    AntiforgeryRejected,
    #[error("无效的 cron 表达式: {0}")]
    InvalidCronExpression(String),

    // 资源不存在
    #[error("成就不存在: {0}")]
    AchievementNotFound(i64),
    #[error("徽章不存在: {0}")]
    BadgeNotFound(i64),
    #[error("推广链接不存在: {0}")]
    AffiliateNotFound(i64),
    #[error("佣金记录不存在: {0}")]
    CommissionNotFound(i64),
    #[error("评论不存在: {0}")]
    CommentNotFound(i64),
    #[error("地区限制规则不存在: {0}")]
    CountryRestrictionNotFound(i64),
    #[error("课程不存在: {0}")]
    CourseNotFound(i64),
    #[error("用户不存在: {0}")]
    UserNotFound(i64),
    #[error("选课记录不存在: {0}")]
    EnrollmentNotFound(i64),
    #[error("错误日志不存在: {0}")]
    ErrorLogNotFound(i64),
    #[error("工单不存在: {0}")]
    TicketNotFound(i64),
    #[error("会话不存在: {0}")]
    SessionNotFound(i64),
    #[error("定时报表不存在: {0}")]
    ScheduledReportNotFound(i64),
    #[error("报表运行记录不存在: {0}")]
    ReportRunNotFound(i64),
    #[error("限时特惠不存在: {0}")]
    FlashSaleNotFound(i64),
    #[error("税率设置不存在: {0}")]
    TaxSettingNotFound(i64),
    #[error("资源不存在: {0}")]
    NotFound(String),

    // 业务冲突
    #[error("{entity}状态不允许从 {from} 变更为 {to}")]
    InvalidStatusTransition {
        entity: &'static str,
        from: String,
        to: String,
    },
    #[error("只有已审核的佣金才能标记为已支付: {0}")]
    CommissionNotApproved(i64),
    #[error("限时特惠已被使用，无法删除: {0}")]
    FlashSaleInUse(i64),
    #[error("默认税率不能删除，请先设置其他默认税率")]
    DefaultTaxSettingProtected,
    #[error("数据已存在: {0}")]
    Duplicate(String),

    // 系统错误
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Redis错误: {0}")]
    Redis(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

impl AdminError {
    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidCronExpression(_) => StatusCode::BAD_REQUEST,
            Self::AntiforgeryRejected => StatusCode::FORBIDDEN,

            Self::AchievementNotFound(_)
            | Self::BadgeNotFound(_)
            | Self::AffiliateNotFound(_)
            | Self::CommissionNotFound(_)
            | Self::CommentNotFound(_)
            | Self::CountryRestrictionNotFound(_)
            | Self::CourseNotFound(_)
            | Self::UserNotFound(_)
            | Self::EnrollmentNotFound(_)
            | Self::ErrorLogNotFound(_)
            | Self::TicketNotFound(_)
            | Self::SessionNotFound(_)
            | Self::ScheduledReportNotFound(_)
            | Self::ReportRunNotFound(_)
            | Self::FlashSaleNotFound(_)
            | Self::TaxSettingNotFound(_)
            | Self::NotFound(_) => StatusCode::NOT_FOUND,

            Self::InvalidStatusTransition { .. }
            | Self::CommissionNotApproved(_)
            | Self::FlashSaleInUse(_)
            | Self::DefaultTaxSettingProtected
            | Self::Duplicate(_) => StatusCode::CONFLICT,

            Self::Database(_) | Self::Redis(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// 返回错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::AntiforgeryRejected => "ANTIFORGERY_REJECTED",
            Self::InvalidCronExpression(_) => "INVALID_CRON_EXPRESSION",
            Self::AchievementNotFound(_) => "ACHIEVEMENT_NOT_FOUND",
            Self::BadgeNotFound(_) => "BADGE_NOT_FOUND",
            Self::AffiliateNotFound(_) => "AFFILIATE_NOT_FOUND",
            Self::CommissionNotFound(_) => "COMMISSION_NOT_FOUND",
            Self::CommentNotFound(_) => "COMMENT_NOT_FOUND",
            Self::CountryRestrictionNotFound(_) => "COUNTRY_RESTRICTION_NOT_FOUND",
            Self::CourseNotFound(_) => "COURSE_NOT_FOUND",
            Self::UserNotFound(_) => "USER_NOT_FOUND",
            Self::EnrollmentNotFound(_) => "ENROLLMENT_NOT_FOUND",
            Self::ErrorLogNotFound(_) => "ERROR_LOG_NOT_FOUND",
            Self::TicketNotFound(_) => "TICKET_NOT_FOUND",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::ScheduledReportNotFound(_) => "SCHEDULED_REPORT_NOT_FOUND",
            Self::ReportRunNotFound(_) => "REPORT_RUN_NOT_FOUND",
            Self::FlashSaleNotFound(_) => "FLASH_SALE_NOT_FOUND",
            Self::TaxSettingNotFound(_) => "TAX_SETTING_NOT_FOUND",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            Self::CommissionNotApproved(_) => "COMMISSION_NOT_APPROVED",
            Self::FlashSaleInUse(_) => "FLASH_SALE_IN_USE",
            Self::DefaultTaxSettingProtected => "DEFAULT_TAX_SETTING_PROTECTED",
            Self::Duplicate(_) => "DUPLICATE",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 将唯一约束冲突（SQLSTATE 23505）转为业务可读的 Duplicate 错误
    pub fn from_unique_violation(err: sqlx::Error, message: impl Into<String>) -> Self {
        let is_unique_violation = err
            .as_database_error()
            .and_then(|db| db.code())
            .is_some_and(|code| code == "23505");

        if is_unique_violation {
            Self::Duplicate(message.into())
        } else {
            Self::Database(err)
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详细信息仅记录日志，防止信息泄露
        let message = match &self {
            Self::Database(e) => {
                tracing::error!(error = %e, "数据库操作失败");
                "服务内部错误，请稍后重试".to_string()
            }
            Self::Redis(e) => {
                tracing::error!(error = %e, "Redis 操作失败");
                "服务内部错误，请稍后重试".to_string()
            }
            Self::Internal(e) => {
                tracing::error!(error = %e, "内部错误");
                "服务内部错误，请稍后重试".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}

/// 从 validator 错误转换
impl From<validator::ValidationErrors> for AdminError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

/// 从 JSON 序列化错误转换
impl From<serde_json::Error> for AdminError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON 处理错误: {}", err))
    }
}

/// 从共享基础设施错误转换
impl From<lms_shared::error::LmsError> for AdminError {
    fn from(err: lms_shared::error::LmsError) -> Self {
        use lms_shared::error::LmsError;
        match err {
            LmsError::Database(e) => Self::Database(e),
            LmsError::Redis(e) => Self::Redis(e.to_string()),
            LmsError::NotFound { entity, id } => Self::NotFound(format!("{} {}", entity, id)),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// 服务层 Result 类型别名
pub type Result<T> = std::result::Result<T, AdminError>;
