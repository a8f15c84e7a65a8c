//! 客服工单 API 处理器
//!
//! 状态流转规则见 [`TicketStatus::can_transition_to`]。
//! 客服回复待处理工单时自动转为处理中。

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use lms_shared::observability::metrics::record_mutation;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, instrument};
use validator::Validate;

use crate::{
    dto::{ApiResponse, CreatedResponse, PageResponse, PaginationParams, StatusCount, like_pattern},
    error::AdminError,
    extract::Operator,
    models::{TicketPriority, TicketStatus, generate_ticket_number},
    state::AppState,
};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TicketDto {
    pub id: i64,
    pub ticket_number: String,
    pub user_id: i64,
    pub user_name: String,
    pub user_email: String,
    pub subject: String,
    pub description: String,
    pub category: String,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub assigned_to: Option<String>,
    pub reply_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TicketReplyDto {
    pub id: i64,
    pub author_id: String,
    pub is_staff: bool,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// 工单详情（含全部回复）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketDetailDto {
    #[serde(flatten)]
    pub ticket: TicketDto,
    pub replies: Vec<TicketReplyDto>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketQueryFilter {
    pub status: Option<TicketStatus>,
    pub priority: Option<TicketPriority>,
    pub assigned_to: Option<String>,
    pub keyword: Option<String>,
}

/// 工单统计
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketStats {
    pub total: i64,
    pub open: i64,
    pub in_progress: i64,
    pub resolved: i64,
    pub closed: i64,
}

impl TicketStats {
    pub fn from_counts(counts: &[StatusCount]) -> Self {
        let mut stats = Self::default();
        for c in counts {
            match c.status.as_str() {
                "open" => stats.open = c.count,
                "in_progress" => stats.in_progress = c.count,
                "resolved" => stats.resolved = c.count,
                "closed" => stats.closed = c.count,
                _ => {}
            }
            stats.total += c.count;
        }
        stats
    }
}

/// 代学员创建工单
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTicketRequest {
    pub user_id: i64,
    #[validate(length(min = 1, max = 200, message = "主题长度必须在1-200个字符之间"))]
    pub subject: String,
    #[validate(length(min = 1, max = 10000, message = "描述长度必须在1-10000个字符之间"))]
    pub description: String,
    #[validate(length(min = 1, max = 50, message = "分类长度必须在1-50个字符之间"))]
    pub category: Option<String>,
    #[serde(default)]
    pub priority: TicketPriority,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReplyTicketRequest {
    #[validate(length(min = 1, max = 10000, message = "回复内容长度必须在1-10000个字符之间"))]
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTicketStatusRequest {
    pub status: TicketStatus,
}

/// 指派工单，assigned_to 为空表示取消指派
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AssignTicketRequest {
    #[validate(length(min = 1, max = 100, message = "处理人长度必须在1-100个字符之间"))]
    pub assigned_to: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTicketPriorityRequest {
    pub priority: TicketPriority,
}

const TICKET_SELECT_SQL: &str = r#"
    SELECT
        t.id, t.ticket_number, t.user_id, u.full_name AS user_name, u.email AS user_email,
        t.subject, t.description, t.category, t.priority, t.status, t.assigned_to,
        (SELECT COUNT(*) FROM ticket_replies r WHERE r.ticket_id = t.id) AS reply_count,
        t.created_at, t.updated_at, t.resolved_at, t.closed_at
    FROM support_tickets t
    JOIN users u ON u.id = t.user_id
"#;

const TICKET_FILTER_SQL: &str = r#"
    WHERE ($1::text IS NULL OR t.status = $1)
      AND ($2::text IS NULL OR t.priority = $2)
      AND ($3::text IS NULL OR t.assigned_to = $3)
      AND ($4::text IS NULL OR t.ticket_number ILIKE $4 OR t.subject ILIKE $4 OR u.email ILIKE $4)
"#;

async fn fetch_ticket(pool: &PgPool, id: i64) -> Result<TicketDto, AdminError> {
    let sql = format!("{} WHERE t.id = $1", TICKET_SELECT_SQL);
    sqlx::query_as::<_, TicketDto>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AdminError::TicketNotFound(id))
}

async fn lock_ticket_status(
    tx: &mut Transaction<'_, Postgres>,
    id: i64,
) -> Result<TicketStatus, AdminError> {
    sqlx::query_scalar("SELECT status FROM support_tickets WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(AdminError::TicketNotFound(id))
}

fn check_ticket_transition(current: TicketStatus, target: TicketStatus) -> Result<(), AdminError> {
    if current.can_transition_to(target) {
        Ok(())
    } else {
        Err(AdminError::InvalidStatusTransition {
            entity: "工单",
            from: current.as_str().to_string(),
            to: target.as_str().to_string(),
        })
    }
}

/// 获取工单列表
///
/// GET /admin/support-tickets
pub async fn list_tickets(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<TicketQueryFilter>,
) -> Result<Json<ApiResponse<PageResponse<TicketDto>>>, AdminError> {
    let page = pagination.resolve(&state.config.pagination, "support_tickets");
    let keyword = like_pattern(filter.keyword.as_deref());
    let status = filter.status.map(|s| s.as_str());
    let priority = filter.priority.map(|p| p.as_str());
    let assigned_to = filter
        .assigned_to
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty());

    let count_sql = format!(
        "SELECT COUNT(*) FROM support_tickets t JOIN users u ON u.id = t.user_id {}",
        TICKET_FILTER_SQL
    );
    let total: (i64,) = sqlx::query_as(&count_sql)
        .bind(status)
        .bind(priority)
        .bind(assigned_to)
        .bind(&keyword)
        .fetch_one(&state.pool)
        .await?;

    if total.0 == 0 {
        return Ok(Json(ApiResponse::success(PageResponse::empty(page))));
    }

    let sql = format!(
        "{} {} ORDER BY t.created_at DESC, t.id DESC LIMIT $5 OFFSET $6",
        TICKET_SELECT_SQL, TICKET_FILTER_SQL
    );
    let items = sqlx::query_as::<_, TicketDto>(&sql)
        .bind(status)
        .bind(priority)
        .bind(assigned_to)
        .bind(&keyword)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(ApiResponse::success(PageResponse::new(items, total.0, page))))
}

/// 工单统计
///
/// GET /admin/support-tickets/stats
#[instrument(skip(state))]
pub async fn ticket_stats(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<TicketStats>>, AdminError> {
    let counts = sqlx::query_as::<_, StatusCount>(
        "SELECT status, COUNT(*) AS count FROM support_tickets GROUP BY status",
    )
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(TicketStats::from_counts(&counts))))
}

/// 获取工单详情（含回复）
///
/// GET /admin/support-tickets/{id}
pub async fn get_ticket(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<TicketDetailDto>>, AdminError> {
    let ticket = fetch_ticket(&state.pool, id).await?;

    let replies = sqlx::query_as::<_, TicketReplyDto>(
        r#"
        SELECT id, author_id, is_staff, message, created_at
        FROM ticket_replies
        WHERE ticket_id = $1
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(TicketDetailDto { ticket, replies })))
}

/// 代学员创建工单
///
/// POST /admin/support-tickets
pub async fn create_ticket(
    State(state): State<AppState>,
    Json(req): Json<CreateTicketRequest>,
) -> Result<Json<ApiResponse<CreatedResponse>>, AdminError> {
    req.validate()?;

    let user_exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
        .bind(req.user_id)
        .fetch_one(&state.pool)
        .await?;
    if !user_exists {
        return Err(AdminError::UserNotFound(req.user_id));
    }

    let ticket_number = generate_ticket_number(Utc::now());
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO support_tickets (ticket_number, user_id, subject, description, category, priority)
        VALUES ($1, $2, $3, $4, COALESCE($5, 'general'), $6)
        RETURNING id
        "#,
    )
    .bind(&ticket_number)
    .bind(req.user_id)
    .bind(&req.subject)
    .bind(&req.description)
    .bind(&req.category)
    .bind(req.priority.as_str())
    .fetch_one(&state.pool)
    .await
    .map_err(|e| AdminError::from_unique_violation(e, "工单编号冲突，请重试"))?;

    record_mutation("ticket", "create");
    info!(ticket_id = id, ticket_number = %ticket_number, "Support ticket created");

    Ok(Json(ApiResponse::success_with_message(
        CreatedResponse::new(id),
        format!("工单 {} 已创建", ticket_number),
    )))
}

/// 客服回复工单
///
/// POST /admin/support-tickets/{id}/replies
pub async fn reply_ticket(
    State(state): State<AppState>,
    operator: Operator,
    Path(id): Path<i64>,
    Json(req): Json<ReplyTicketRequest>,
) -> Result<Json<ApiResponse<TicketReplyDto>>, AdminError> {
    req.validate()?;

    let mut tx = state.pool.begin().await?;
    let current = lock_ticket_status(&mut tx, id).await?;
    if current == TicketStatus::Closed {
        return Err(AdminError::Validation("工单已关闭，无法回复".to_string()));
    }

    let reply = sqlx::query_as::<_, TicketReplyDto>(
        r#"
        INSERT INTO ticket_replies (ticket_id, author_id, is_staff, message)
        VALUES ($1, $2, TRUE, $3)
        RETURNING id, author_id, is_staff, message, created_at
        "#,
    )
    .bind(id)
    .bind(operator.as_str())
    .bind(&req.message)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        UPDATE support_tickets
        SET status = CASE WHEN status = 'open' THEN 'in_progress' ELSE status END,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    record_mutation("ticket", "reply");
    info!(ticket_id = id, reply_id = reply.id, operator = operator.as_str(), "Ticket replied");

    Ok(Json(ApiResponse::success_with_message(reply, "回复已发送")))
}

/// 更新工单状态
///
/// PUT /admin/support-tickets/{id}/status
pub async fn update_ticket_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateTicketStatusRequest>,
) -> Result<Json<ApiResponse<TicketDto>>, AdminError> {
    let target = req.status;

    let mut tx = state.pool.begin().await?;
    let current = lock_ticket_status(&mut tx, id).await?;
    check_ticket_transition(current, target)?;

    // 重新打开时清空解决时间
    sqlx::query(
        r#"
        UPDATE support_tickets
        SET status = $2,
            resolved_at = CASE
                WHEN $2 = 'resolved' THEN NOW()
                WHEN $2 = 'in_progress' THEN NULL
                ELSE resolved_at
            END,
            closed_at = CASE WHEN $2 = 'closed' THEN NOW() ELSE closed_at END,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(target.as_str())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    record_mutation("ticket", "update_status");
    info!(ticket_id = id, from = current.as_str(), to = target.as_str(), "Ticket status changed");

    let dto = fetch_ticket(&state.pool, id).await?;
    Ok(Json(ApiResponse::success_with_message(
        dto,
        format!("工单状态已更新为「{}」", target.label()),
    )))
}

/// 指派工单
///
/// PUT /admin/support-tickets/{id}/assign
pub async fn assign_ticket(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<AssignTicketRequest>,
) -> Result<Json<ApiResponse<TicketDto>>, AdminError> {
    req.validate()?;
    let assignee = req
        .assigned_to
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty());

    let result = sqlx::query(
        "UPDATE support_tickets SET assigned_to = $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .bind(assignee)
    .execute(&state.pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AdminError::TicketNotFound(id));
    }

    record_mutation("ticket", "assign");
    info!(ticket_id = id, assigned_to = ?assignee, "Ticket assigned");

    let dto = fetch_ticket(&state.pool, id).await?;
    let message = match assignee {
        Some(a) => format!("工单已指派给 {}", a),
        None => "已取消工单指派".to_string(),
    };
    Ok(Json(ApiResponse::success_with_message(dto, message)))
}

/// 更新工单优先级
///
/// PUT /admin/support-tickets/{id}/priority
pub async fn update_ticket_priority(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateTicketPriorityRequest>,
) -> Result<Json<ApiResponse<TicketDto>>, AdminError> {
    let result = sqlx::query(
        "UPDATE support_tickets SET priority = $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .bind(req.priority.as_str())
    .execute(&state.pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AdminError::TicketNotFound(id));
    }

    record_mutation("ticket", "update_priority");
    info!(ticket_id = id, priority = req.priority.as_str(), "Ticket priority updated");

    let dto = fetch_ticket(&state.pool, id).await?;
    Ok(Json(ApiResponse::success_with_message(dto, "工单优先级已更新")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(status: &str, count: i64) -> StatusCount {
        StatusCount {
            status: status.to_string(),
            count,
        }
    }

    #[test]
    fn test_stats_from_counts() {
        let stats = TicketStats::from_counts(&[
            count("open", 4),
            count("in_progress", 2),
            count("closed", 9),
        ]);
        assert_eq!(stats.total, 15);
        assert_eq!(stats.open, 4);
        assert_eq!(stats.in_progress, 2);
        assert_eq!(stats.resolved, 0);
        assert_eq!(stats.closed, 9);
    }

    #[test]
    fn test_transition_check() {
        assert!(check_ticket_transition(TicketStatus::Open, TicketStatus::InProgress).is_ok());
        assert!(check_ticket_transition(TicketStatus::Resolved, TicketStatus::InProgress).is_ok());

        let err = check_ticket_transition(TicketStatus::Closed, TicketStatus::Open).unwrap_err();
        assert!(matches!(err, AdminError::InvalidStatusTransition { entity: "工单", .. }));
        assert!(check_ticket_transition(TicketStatus::Open, TicketStatus::Resolved).is_err());
    }

    #[test]
    fn test_create_request_defaults() {
        let req: CreateTicketRequest = serde_json::from_str(
            r#"{"userId":3,"subject":"无法播放视频","description":"第 2 课视频一直加载"}"#,
        )
        .unwrap();
        assert_eq!(req.priority, TicketPriority::Medium);
        assert!(req.category.is_none());
        assert!(req.validate().is_ok());

        let blank: CreateTicketRequest =
            serde_json::from_str(r#"{"userId":3,"subject":"","description":"x"}"#).unwrap();
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_reply_validation() {
        assert!(ReplyTicketRequest { message: String::new() }.validate().is_err());
        assert!(ReplyTicketRequest { message: "已处理".to_string() }.validate().is_ok());
    }
}
