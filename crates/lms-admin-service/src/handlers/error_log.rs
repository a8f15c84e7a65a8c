//! 错误日志 API 处理器

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Duration, Utc};
use lms_shared::observability::metrics::record_mutation;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use validator::Validate;

use crate::{
    dto::{
        AffectedResponse, ApiResponse, DateRangeParams, IdsRequest, PageResponse,
        PaginationParams, StatusCount, like_pattern,
    },
    error::AdminError,
    extract::Operator,
    models::ErrorLevel,
    state::AppState,
};

const DEFAULT_RETENTION_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLogDto {
    pub id: i64,
    pub level: ErrorLevel,
    pub message: String,
    pub exception_type: Option<String>,
    pub stack_trace: Option<String>,
    pub request_path: Option<String>,
    pub user_id: Option<i64>,
    pub is_resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLogQueryFilter {
    pub level: Option<ErrorLevel>,
    pub is_resolved: Option<bool>,
    pub keyword: Option<String>,
}

/// 错误日志统计
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLogStats {
    pub total: i64,
    pub unresolved: i64,
    pub last_24h: i64,
    pub by_level: Vec<StatusCount>,
}

/// 清理已解决日志请求
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ClearErrorLogsRequest {
    #[validate(range(min = 1, max = 3650, message = "保留天数必须在1-3650之间"))]
    pub older_than_days: Option<i64>,
}

impl ClearErrorLogsRequest {
    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.older_than_days.unwrap_or(DEFAULT_RETENTION_DAYS))
    }
}

const ERROR_LOG_SELECT_SQL: &str = r#"
    SELECT id, level, message, exception_type, stack_trace, request_path, user_id,
           is_resolved, resolved_at, resolved_by, created_at
    FROM error_logs
"#;

const ERROR_LOG_FILTER_SQL: &str = r#"
    WHERE ($1::text IS NULL OR level = $1)
      AND ($2::bool IS NULL OR is_resolved = $2)
      AND ($3::text IS NULL OR message ILIKE $3 OR exception_type ILIKE $3 OR request_path ILIKE $3)
      AND ($4::timestamptz IS NULL OR created_at >= $4)
      AND ($5::timestamptz IS NULL OR created_at < $5)
"#;

/// 获取错误日志列表
///
/// GET /admin/error-logs
pub async fn list_error_logs(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<ErrorLogQueryFilter>,
    Query(range): Query<DateRangeParams>,
) -> Result<Json<ApiResponse<PageResponse<ErrorLogDto>>>, AdminError> {
    range.validate()?;
    let page = pagination.resolve(&state.config.pagination, "error_logs");
    let keyword = like_pattern(filter.keyword.as_deref());
    let level = filter.level.map(|l| l.as_str());

    let count_sql = format!("SELECT COUNT(*) FROM error_logs {}", ERROR_LOG_FILTER_SQL);
    let total: (i64,) = sqlx::query_as(&count_sql)
        .bind(level)
        .bind(filter.is_resolved)
        .bind(&keyword)
        .bind(range.start_time())
        .bind(range.end_time_exclusive())
        .fetch_one(&state.pool)
        .await?;

    if total.0 == 0 {
        return Ok(Json(ApiResponse::success(PageResponse::empty(page))));
    }

    let sql = format!(
        "{} {} ORDER BY created_at DESC, id DESC LIMIT $6 OFFSET $7",
        ERROR_LOG_SELECT_SQL, ERROR_LOG_FILTER_SQL
    );
    let items = sqlx::query_as::<_, ErrorLogDto>(&sql)
        .bind(level)
        .bind(filter.is_resolved)
        .bind(&keyword)
        .bind(range.start_time())
        .bind(range.end_time_exclusive())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(ApiResponse::success(PageResponse::new(items, total.0, page))))
}

/// 错误日志统计
///
/// GET /admin/error-logs/stats
#[instrument(skip(state))]
pub async fn error_log_stats(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<ErrorLogStats>>, AdminError> {
    let (total, unresolved, last_24h): (i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COUNT(*),
            COUNT(*) FILTER (WHERE NOT is_resolved),
            COUNT(*) FILTER (WHERE created_at >= NOW() - INTERVAL '24 hours')
        FROM error_logs
        "#,
    )
    .fetch_one(&state.pool)
    .await?;

    let by_level = sqlx::query_as::<_, StatusCount>(
        "SELECT level AS status, COUNT(*) AS count FROM error_logs GROUP BY level ORDER BY level",
    )
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(ErrorLogStats {
        total,
        unresolved,
        last_24h,
        by_level,
    })))
}

/// 获取错误日志详情
///
/// GET /admin/error-logs/{id}
pub async fn get_error_log(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<ErrorLogDto>>, AdminError> {
    let sql = format!("{} WHERE id = $1", ERROR_LOG_SELECT_SQL);
    let dto = sqlx::query_as::<_, ErrorLogDto>(&sql)
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AdminError::ErrorLogNotFound(id))?;

    Ok(Json(ApiResponse::success(dto)))
}

/// 标记错误日志为已解决
///
/// POST /admin/error-logs/{id}/resolve
pub async fn resolve_error_log(
    State(state): State<AppState>,
    operator: Operator,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, AdminError> {
    // 重复标记保留首次解决人与时间
    let result = sqlx::query(
        r#"
        UPDATE error_logs
        SET is_resolved = TRUE,
            resolved_at = COALESCE(resolved_at, NOW()),
            resolved_by = COALESCE(resolved_by, $2)
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(operator.as_str())
    .execute(&state.pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AdminError::ErrorLogNotFound(id));
    }

    record_mutation("error_log", "resolve");
    info!(error_log_id = id, operator = operator.as_str(), "Error log resolved");

    Ok(Json(ApiResponse::success_empty("错误日志已标记为已解决")))
}

/// 批量标记为已解决
///
/// POST /admin/error-logs/resolve
pub async fn bulk_resolve_error_logs(
    State(state): State<AppState>,
    operator: Operator,
    Json(req): Json<IdsRequest>,
) -> Result<Json<ApiResponse<AffectedResponse>>, AdminError> {
    req.validate()?;

    let affected = sqlx::query(
        r#"
        UPDATE error_logs
        SET is_resolved = TRUE, resolved_at = NOW(), resolved_by = $2
        WHERE id = ANY($1) AND NOT is_resolved
        "#,
    )
    .bind(&req.ids)
    .bind(operator.as_str())
    .execute(&state.pool)
    .await?
    .rows_affected();

    record_mutation("error_log", "bulk_resolve");
    info!(requested = req.ids.len(), affected, "Error logs resolved in bulk");

    Ok(Json(ApiResponse::success_with_message(
        AffectedResponse::new(affected),
        format!("已解决 {} 条错误日志", affected),
    )))
}

/// 删除错误日志
///
/// DELETE /admin/error-logs/{id}
pub async fn delete_error_log(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, AdminError> {
    let result = sqlx::query("DELETE FROM error_logs WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AdminError::ErrorLogNotFound(id));
    }

    record_mutation("error_log", "delete");
    info!(error_log_id = id, "Error log deleted");

    Ok(Json(ApiResponse::success_empty("错误日志已删除")))
}

/// 清理早于指定天数的已解决日志（默认 30 天）
///
/// POST /admin/error-logs/clear
pub async fn clear_error_logs(
    State(state): State<AppState>,
    Json(req): Json<ClearErrorLogsRequest>,
) -> Result<Json<ApiResponse<AffectedResponse>>, AdminError> {
    req.validate()?;
    let cutoff = req.cutoff(Utc::now());

    let affected = sqlx::query("DELETE FROM error_logs WHERE is_resolved AND created_at < $1")
        .bind(cutoff)
        .execute(&state.pool)
        .await?
        .rows_affected();

    record_mutation("error_log", "clear");
    info!(affected, cutoff = %cutoff, "Resolved error logs cleared");

    Ok(Json(ApiResponse::success_with_message(
        AffectedResponse::new(affected),
        format!("已清理 {} 条已解决的错误日志", affected),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_clear_request_defaults_to_30_days() {
        let now = Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap();
        let req = ClearErrorLogsRequest::default();
        assert!(req.validate().is_ok());
        assert_eq!(req.cutoff(now), Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_clear_request_rejects_zero_days() {
        let req = ClearErrorLogsRequest {
            older_than_days: Some(0),
        };
        assert!(req.validate().is_err());

        let req = ClearErrorLogsRequest {
            older_than_days: Some(7),
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_filter_deserialize() {
        let filter: ErrorLogQueryFilter =
            serde_json::from_str(r#"{"level":"critical","isResolved":false}"#).unwrap();
        assert_eq!(filter.level, Some(ErrorLevel::Critical));
        assert_eq!(filter.is_resolved, Some(false));
        assert!(filter.keyword.is_none());
    }
}
