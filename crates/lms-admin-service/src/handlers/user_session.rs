//! 用户会话 API 处理器
//!
//! 未撤销且未过期的会话视为活跃会话

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
    dto::{AffectedResponse, ApiResponse, PageResponse, PaginationParams, like_pattern},
    error::AdminError,
    models::DeviceType,
    state::AppState,
};

const DEFAULT_PURGE_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserSessionDto {
    pub id: i64,
    pub user_id: i64,
    pub user_email: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_type: DeviceType,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQueryFilter {
    pub user_id: Option<i64>,
    #[serde(default)]
    pub active_only: bool,
    pub keyword: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub active_sessions: i64,
    pub active_users: i64,
    pub started_last_24h: i64,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PurgeSessionsRequest {
    #[validate(range(min = 1, max = 3650, message = "保留天数必须在1-3650之间"))]
    pub older_than_days: Option<i64>,
}

impl PurgeSessionsRequest {
    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.older_than_days.unwrap_or(DEFAULT_PURGE_DAYS))
    }
}

const SESSION_SELECT_SQL: &str = r#"
    SELECT
        s.id, s.user_id, u.email AS user_email, s.ip_address, s.user_agent, s.device_type,
        s.created_at, s.last_activity_at, s.expires_at, s.revoked_at,
        (s.revoked_at IS NULL AND s.expires_at > NOW()) AS is_active
    FROM user_sessions s
    JOIN users u ON u.id = s.user_id
"#;

const SESSION_FILTER_SQL: &str = r#"
    WHERE ($1::bigint IS NULL OR s.user_id = $1)
      AND (NOT $2 OR (s.revoked_at IS NULL AND s.expires_at > NOW()))
      AND ($3::text IS NULL OR s.ip_address ILIKE $3 OR s.user_agent ILIKE $3 OR u.email ILIKE $3)
"#;

/// 获取会话列表
///
/// GET /admin/user-sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<SessionQueryFilter>,
) -> Result<Json<ApiResponse<PageResponse<UserSessionDto>>>, AdminError> {
    let page = pagination.resolve(&state.config.pagination, "user_sessions");
    let keyword = like_pattern(filter.keyword.as_deref());

    let count_sql = format!(
        "SELECT COUNT(*) FROM user_sessions s JOIN users u ON u.id = s.user_id {}",
        SESSION_FILTER_SQL
    );
    let total: (i64,) = sqlx::query_as(&count_sql)
        .bind(filter.user_id)
        .bind(filter.active_only)
        .bind(&keyword)
        .fetch_one(&state.pool)
        .await?;

    if total.0 == 0 {
        return Ok(Json(ApiResponse::success(PageResponse::empty(page))));
    }

    let sql = format!(
        "{} {} ORDER BY s.last_activity_at DESC, s.id DESC LIMIT $4 OFFSET $5",
        SESSION_SELECT_SQL, SESSION_FILTER_SQL
    );
    let items = sqlx::query_as::<_, UserSessionDto>(&sql)
        .bind(filter.user_id)
        .bind(filter.active_only)
        .bind(&keyword)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(ApiResponse::success(PageResponse::new(items, total.0, page))))
}

/// 会话统计
///
/// GET /admin/user-sessions/stats
#[instrument(skip(state))]
pub async fn session_stats(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<SessionStats>>, AdminError> {
    let stats = sqlx::query_as::<_, SessionStats>(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE revoked_at IS NULL AND expires_at > NOW()) AS active_sessions,
            COUNT(DISTINCT user_id) FILTER (WHERE revoked_at IS NULL AND expires_at > NOW()) AS active_users,
            COUNT(*) FILTER (WHERE created_at >= NOW() - INTERVAL '24 hours') AS started_last_24h
        FROM user_sessions
        "#,
    )
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(stats)))
}

/// 撤销单个会话
///
/// POST /admin/user-sessions/{id}/revoke
pub async fn revoke_session(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, AdminError> {
    let result = sqlx::query(
        "UPDATE user_sessions SET revoked_at = COALESCE(revoked_at, NOW()) WHERE id = $1",
    )
    .bind(id)
    .execute(&state.pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AdminError::SessionNotFound(id));
    }

    record_mutation("user_session", "revoke");
    info!(session_id = id, "User session revoked");

    Ok(Json(ApiResponse::success_empty("会话已撤销")))
}

/// 撤销某用户的全部活跃会话
///
/// POST /admin/user-sessions/users/{user_id}/revoke
pub async fn revoke_all_for_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<ApiResponse<AffectedResponse>>, AdminError> {
    let user_exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
        .bind(user_id)
        .fetch_one(&state.pool)
        .await?;
    if !user_exists {
        return Err(AdminError::UserNotFound(user_id));
    }

    let affected = sqlx::query(
        r#"
        UPDATE user_sessions
        SET revoked_at = NOW()
        WHERE user_id = $1 AND revoked_at IS NULL AND expires_at > NOW()
        "#,
    )
    .bind(user_id)
    .execute(&state.pool)
    .await?
    .rows_affected();

    record_mutation("user_session", "revoke_all");
    info!(user_id, affected, "All sessions revoked for user");

    Ok(Json(ApiResponse::success_with_message(
        AffectedResponse::new(affected),
        format!("已撤销该用户的 {} 个会话", affected),
    )))
}

/// 清理过期或已撤销超过指定天数的会话
///
/// POST /admin/user-sessions/purge
pub async fn purge_expired_sessions(
    State(state): State<AppState>,
    Json(req): Json<PurgeSessionsRequest>,
) -> Result<Json<ApiResponse<AffectedResponse>>, AdminError> {
    req.validate()?;
    let cutoff = req.cutoff(Utc::now());

    let affected = sqlx::query(
        "DELETE FROM user_sessions WHERE expires_at < $1 OR revoked_at < $1",
    )
    .bind(cutoff)
    .execute(&state.pool)
    .await?
    .rows_affected();

    record_mutation("user_session", "purge");
    info!(affected, cutoff = %cutoff, "Stale sessions purged");

    Ok(Json(ApiResponse::success_with_message(
        AffectedResponse::new(affected),
        format!("已清理 {} 个会话", affected),
    )))
}
