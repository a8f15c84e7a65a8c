//! 评论审核 API 处理器

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use lms_shared::observability::metrics::record_mutation;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, instrument};
use validator::Validate;

use crate::{
    dto::{
        AffectedResponse, ApiResponse, DateRangeParams, PageResponse, PaginationParams,
        StatusCount, like_pattern,
    },
    error::AdminError,
    models::CommentStatus,
    state::AppState,
};

/// 评论视图
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CommentDto {
    pub id: i64,
    pub course_id: i64,
    pub course_title: String,
    pub lesson_id: Option<i64>,
    pub user_id: i64,
    pub user_name: String,
    pub parent_id: Option<i64>,
    pub content: String,
    pub status: CommentStatus,
    pub reply_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentQueryFilter {
    pub status: Option<CommentStatus>,
    pub course_id: Option<i64>,
    pub keyword: Option<String>,
}

/// 批量审核动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkCommentAction {
    Approve,
    Reject,
    Spam,
    Delete,
}

impl BulkCommentAction {
    /// 对应的目标状态，删除动作没有目标状态
    fn target_status(&self) -> Option<CommentStatus> {
        match self {
            Self::Approve => Some(CommentStatus::Approved),
            Self::Reject => Some(CommentStatus::Rejected),
            Self::Spam => Some(CommentStatus::Spam),
            Self::Delete => None,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BulkCommentRequest {
    pub action: BulkCommentAction,
    #[validate(length(min = 1, max = 100, message = "一次最多处理1-100条评论"))]
    pub ids: Vec<i64>,
}

/// 评论统计
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentStats {
    pub total: i64,
    pub pending: i64,
    pub approved: i64,
    pub spam: i64,
    pub rejected: i64,
}

impl CommentStats {
    fn from_counts(counts: &[StatusCount]) -> Self {
        let mut stats = Self::default();
        for c in counts {
            match c.status.as_str() {
                "pending" => stats.pending = c.count,
                "approved" => stats.approved = c.count,
                "spam" => stats.spam = c.count,
                "rejected" => stats.rejected = c.count,
                _ => {}
            }
            stats.total += c.count;
        }
        stats
    }
}

const COMMENT_SELECT_SQL: &str = r#"
    SELECT
        cm.id, cm.course_id, co.title AS course_title, cm.lesson_id, cm.user_id,
        u.full_name AS user_name, cm.parent_id, cm.content, cm.status,
        (SELECT COUNT(*) FROM comments r WHERE r.parent_id = cm.id) AS reply_count,
        cm.created_at, cm.updated_at
    FROM comments cm
    JOIN courses co ON co.id = cm.course_id
    JOIN users u ON u.id = cm.user_id
"#;

const COMMENT_FILTER_SQL: &str = r#"
    WHERE ($1::text IS NULL OR cm.status = $1)
      AND ($2::bigint IS NULL OR cm.course_id = $2)
      AND ($3::text IS NULL OR cm.content ILIKE $3 OR u.full_name ILIKE $3)
      AND ($4::timestamptz IS NULL OR cm.created_at >= $4)
      AND ($5::timestamptz IS NULL OR cm.created_at < $5)
"#;

/// 获取评论列表
///
/// GET /admin/comments
pub async fn list_comments(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<CommentQueryFilter>,
    Query(range): Query<DateRangeParams>,
) -> Result<Json<ApiResponse<PageResponse<CommentDto>>>, AdminError> {
    range.validate()?;
    let page = pagination.resolve(&state.config.pagination, "comments");
    let keyword = like_pattern(filter.keyword.as_deref());
    let status = filter.status.map(|s| s.as_str());

    let total: (i64,) = sqlx::query_as(&format!(
        "SELECT COUNT(*) FROM comments cm JOIN users u ON u.id = cm.user_id {}",
        COMMENT_FILTER_SQL
    ))
    .bind(status)
    .bind(filter.course_id)
    .bind(&keyword)
    .bind(range.start_time())
    .bind(range.end_time_exclusive())
    .fetch_one(&state.pool)
    .await?;

    if total.0 == 0 {
        return Ok(Json(ApiResponse::success(PageResponse::empty(page))));
    }

    let sql = format!(
        "{} {} ORDER BY cm.created_at DESC LIMIT $6 OFFSET $7",
        COMMENT_SELECT_SQL, COMMENT_FILTER_SQL
    );
    let items = sqlx::query_as::<_, CommentDto>(&sql)
        .bind(status)
        .bind(filter.course_id)
        .bind(&keyword)
        .bind(range.start_time())
        .bind(range.end_time_exclusive())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(ApiResponse::success(PageResponse::new(items, total.0, page))))
}

/// 评论状态统计
///
/// GET /admin/comments/stats
#[instrument(skip(state))]
pub async fn comment_stats(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<CommentStats>>, AdminError> {
    let counts = sqlx::query_as::<_, StatusCount>(
        "SELECT status, COUNT(*) AS count FROM comments GROUP BY status",
    )
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(CommentStats::from_counts(&counts))))
}

async fn set_comment_status(
    pool: &PgPool,
    id: i64,
    status: CommentStatus,
) -> Result<CommentDto, AdminError> {
    let result = sqlx::query("UPDATE comments SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(status.as_str())
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AdminError::CommentNotFound(id));
    }

    record_mutation("comment", status.as_str());
    info!(comment_id = id, status = status.as_str(), "Comment moderated");

    let sql = format!("{} WHERE cm.id = $1", COMMENT_SELECT_SQL);
    sqlx::query_as::<_, CommentDto>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AdminError::CommentNotFound(id))
}

/// 审核通过评论
///
/// POST /admin/comments/{id}/approve
pub async fn approve_comment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<CommentDto>>, AdminError> {
    let dto = set_comment_status(&state.pool, id, CommentStatus::Approved).await?;
    Ok(Json(ApiResponse::success_with_message(dto, "评论已通过审核")))
}

/// 驳回评论
///
/// POST /admin/comments/{id}/reject
pub async fn reject_comment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<CommentDto>>, AdminError> {
    let dto = set_comment_status(&state.pool, id, CommentStatus::Rejected).await?;
    Ok(Json(ApiResponse::success_with_message(dto, "评论已驳回")))
}

/// 标记为垃圾评论
///
/// POST /admin/comments/{id}/spam
pub async fn mark_comment_spam(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<CommentDto>>, AdminError> {
    let dto = set_comment_status(&state.pool, id, CommentStatus::Spam).await?;
    Ok(Json(ApiResponse::success_with_message(dto, "评论已标记为垃圾评论")))
}

/// 删除评论（回复级联删除）
///
/// DELETE /admin/comments/{id}
pub async fn delete_comment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, AdminError> {
    let result = sqlx::query("DELETE FROM comments WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AdminError::CommentNotFound(id));
    }

    record_mutation("comment", "delete");
    info!(comment_id = id, "Comment deleted");

    Ok(Json(ApiResponse::success_empty("评论已删除")))
}

/// 批量审核/删除评论
///
/// POST /admin/comments/bulk
pub async fn bulk_comment_action(
    State(state): State<AppState>,
    Json(req): Json<BulkCommentRequest>,
) -> Result<Json<ApiResponse<AffectedResponse>>, AdminError> {
    req.validate()?;

    let affected = match req.action.target_status() {
        Some(status) => sqlx::query(
            "UPDATE comments SET status = $2, updated_at = NOW() WHERE id = ANY($1)",
        )
        .bind(&req.ids)
        .bind(status.as_str())
        .execute(&state.pool)
        .await?
        .rows_affected(),
        None => sqlx::query("DELETE FROM comments WHERE id = ANY($1)")
            .bind(&req.ids)
            .execute(&state.pool)
            .await?
            .rows_affected(),
    };

    record_mutation("comment", "bulk");
    info!(action = ?req.action, requested = req.ids.len(), affected, "Bulk comment action");

    Ok(Json(ApiResponse::success_with_message(
        AffectedResponse::new(affected),
        format!("已处理 {} 条评论", affected),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_request_limits() {
        let ok = BulkCommentRequest {
            action: BulkCommentAction::Approve,
            ids: vec![1, 2, 3],
        };
        assert!(ok.validate().is_ok());

        let empty = BulkCommentRequest {
            action: BulkCommentAction::Delete,
            ids: vec![],
        };
        assert!(empty.validate().is_err());

        let too_many = BulkCommentRequest {
            action: BulkCommentAction::Spam,
            ids: (1..=101).collect(),
        };
        assert!(too_many.validate().is_err());
    }

    #[test]
    fn test_bulk_action_deserialize() {
        let req: BulkCommentRequest =
            serde_json::from_str(r#"{"action":"spam","ids":[4,5]}"#).unwrap();
        assert_eq!(req.action, BulkCommentAction::Spam);
        assert_eq!(req.action.target_status(), Some(CommentStatus::Spam));
        assert_eq!(BulkCommentAction::Delete.target_status(), None);
    }

    #[test]
    fn test_stats_from_counts() {
        let counts = vec![
            StatusCount {
                status: "pending".to_string(),
                count: 4,
            },
            StatusCount {
                status: "approved".to_string(),
                count: 10,
            },
            StatusCount {
                status: "spam".to_string(),
                count: 1,
            },
        ];
        let stats = CommentStats::from_counts(&counts);
        assert_eq!(stats.total, 15);
        assert_eq!(stats.pending, 4);
        assert_eq!(stats.rejected, 0);
    }
}
