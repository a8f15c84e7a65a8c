//! 推广联盟 API 处理器
//!
//! 推广链接管理与佣金审核。佣金状态流转：
//! pending -> approved -> paid，pending -> rejected

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use lms_shared::observability::metrics::record_mutation;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, instrument};
use validator::{Validate, ValidationError};

use crate::{
    dto::{
        ApiResponse, CreatedResponse, DateRangeParams, PageResponse, PaginationParams,
        like_pattern,
    },
    error::AdminError,
    models::{CommissionStatus, PaymentStatus, commission_amount_cents, generate_affiliate_code},
    state::AppState,
};

// ---------------------------------------------------------------------------
// DTO
// ---------------------------------------------------------------------------

/// 推广链接视图（含佣金汇总）
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AffiliateDto {
    pub id: i64,
    pub user_id: i64,
    pub user_email: String,
    pub user_name: String,
    pub code: String,
    pub commission_rate: f64,
    pub clicks: i64,
    pub conversions: i64,
    pub is_active: bool,
    pub pending_cents: i64,
    pub approved_cents: i64,
    pub paid_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffiliateQueryFilter {
    pub keyword: Option<String>,
    pub is_active: Option<bool>,
}

fn validate_code(code: &str) -> Result<(), ValidationError> {
    if code.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        Err(ValidationError::new("code").with_message("推广码只能包含字母和数字".into()))
    }
}

/// 创建推广链接请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateAffiliateRequest {
    pub user_id: i64,
    /// 不提供时自动生成 8 位推广码
    #[validate(
        length(min = 4, max = 32, message = "推广码长度必须在4-32个字符之间"),
        custom(function = "validate_code")
    )]
    pub code: Option<String>,
    #[validate(range(exclusive_min = 0.0, max = 100.0, message = "佣金比例必须大于0且不超过100"))]
    pub commission_rate: f64,
}

/// 更新推广链接请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAffiliateRequest {
    #[validate(range(exclusive_min = 0.0, max = 100.0, message = "佣金比例必须大于0且不超过100"))]
    pub commission_rate: Option<f64>,
    pub is_active: Option<bool>,
}

/// 佣金记录视图
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CommissionDto {
    pub id: i64,
    pub affiliate_id: i64,
    pub affiliate_code: String,
    pub payment_id: Option<i64>,
    pub sale_amount_cents: i64,
    pub amount_cents: i64,
    pub status: CommissionStatus,
    pub note: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionQueryFilter {
    pub affiliate_id: Option<i64>,
    pub status: Option<CommissionStatus>,
}

/// 为一笔已完成的订单记录佣金
///
/// 关联支付单时以支付金额为准
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommissionRequest {
    pub affiliate_id: i64,
    pub payment_id: Option<i64>,
    #[validate(range(min = 1, message = "订单金额必须大于0"))]
    pub sale_amount_cents: Option<i64>,
}

/// 驳回佣金请求
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RejectCommissionRequest {
    #[validate(length(max = 500, message = "备注不能超过500个字符"))]
    pub note: Option<String>,
}

/// 按状态汇总的佣金
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CommissionStatusSummary {
    pub status: CommissionStatus,
    pub count: i64,
    pub amount_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionStats {
    pub total_count: i64,
    pub total_amount_cents: i64,
    pub by_status: Vec<CommissionStatusSummary>,
}

// ---------------------------------------------------------------------------
// 推广链接
// ---------------------------------------------------------------------------

const AFFILIATE_SELECT_SQL: &str = r#"
    SELECT
        a.id, a.user_id, u.email AS user_email, u.full_name AS user_name,
        a.code, a.commission_rate, a.clicks, a.conversions, a.is_active,
        COALESCE(SUM(c.amount_cents) FILTER (WHERE c.status = 'pending'), 0)::bigint AS pending_cents,
        COALESCE(SUM(c.amount_cents) FILTER (WHERE c.status = 'approved'), 0)::bigint AS approved_cents,
        COALESCE(SUM(c.amount_cents) FILTER (WHERE c.status = 'paid'), 0)::bigint AS paid_cents,
        a.created_at, a.updated_at
    FROM affiliate_links a
    JOIN users u ON u.id = a.user_id
    LEFT JOIN affiliate_commissions c ON c.affiliate_id = a.id
"#;

const AFFILIATE_FILTER_SQL: &str = r#"
    WHERE ($1::text IS NULL OR a.code ILIKE $1 OR u.email ILIKE $1)
      AND ($2::bool IS NULL OR a.is_active = $2)
"#;

async fn fetch_affiliate(pool: &PgPool, id: i64) -> Result<AffiliateDto, AdminError> {
    let sql = format!("{} WHERE a.id = $1 GROUP BY a.id, u.id", AFFILIATE_SELECT_SQL);
    sqlx::query_as::<_, AffiliateDto>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AdminError::AffiliateNotFound(id))
}

/// 获取推广链接列表
///
/// GET /admin/affiliates
pub async fn list_affiliates(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<AffiliateQueryFilter>,
) -> Result<Json<ApiResponse<PageResponse<AffiliateDto>>>, AdminError> {
    let page = pagination.resolve(&state.config.pagination, "affiliates");
    let keyword = like_pattern(filter.keyword.as_deref());

    let total: (i64,) = sqlx::query_as(&format!(
        "SELECT COUNT(*) FROM affiliate_links a JOIN users u ON u.id = a.user_id {}",
        AFFILIATE_FILTER_SQL
    ))
    .bind(&keyword)
    .bind(filter.is_active)
    .fetch_one(&state.pool)
    .await?;

    if total.0 == 0 {
        return Ok(Json(ApiResponse::success(PageResponse::empty(page))));
    }

    let sql = format!(
        "{} {} GROUP BY a.id, u.id ORDER BY a.created_at DESC LIMIT $3 OFFSET $4",
        AFFILIATE_SELECT_SQL, AFFILIATE_FILTER_SQL
    );
    let items = sqlx::query_as::<_, AffiliateDto>(&sql)
        .bind(&keyword)
        .bind(filter.is_active)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(ApiResponse::success(PageResponse::new(items, total.0, page))))
}

/// 获取推广链接详情
///
/// GET /admin/affiliates/{id}
pub async fn get_affiliate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<AffiliateDto>>, AdminError> {
    let dto = fetch_affiliate(&state.pool, id).await?;
    Ok(Json(ApiResponse::success(dto)))
}

/// 创建推广链接
///
/// POST /admin/affiliates
pub async fn create_affiliate(
    State(state): State<AppState>,
    Json(req): Json<CreateAffiliateRequest>,
) -> Result<Json<ApiResponse<CreatedResponse>>, AdminError> {
    req.validate()?;

    let user_exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
        .bind(req.user_id)
        .fetch_one(&state.pool)
        .await?;
    if !user_exists {
        return Err(AdminError::UserNotFound(req.user_id));
    }

    let code = req
        .code
        .as_deref()
        .map(|c| c.trim().to_uppercase())
        .unwrap_or_else(generate_affiliate_code);

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO affiliate_links (user_id, code, commission_rate)
        VALUES ($1, $2, $3)
        RETURNING id
        "#,
    )
    .bind(req.user_id)
    .bind(&code)
    .bind(req.commission_rate)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| AdminError::from_unique_violation(e, format!("推广码已存在: {}", code)))?;

    record_mutation("affiliate", "create");
    info!(affiliate_id = id, user_id = req.user_id, code = %code, "Affiliate link created");

    Ok(Json(ApiResponse::success_with_message(
        CreatedResponse::new(id),
        format!("推广链接已创建，推广码 {}", code),
    )))
}

/// 更新推广链接
///
/// PUT /admin/affiliates/{id}
pub async fn update_affiliate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateAffiliateRequest>,
) -> Result<Json<ApiResponse<AffiliateDto>>, AdminError> {
    req.validate()?;

    let result = sqlx::query(
        r#"
        UPDATE affiliate_links
        SET commission_rate = COALESCE($2, commission_rate),
            is_active = COALESCE($3, is_active),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(req.commission_rate)
    .bind(req.is_active)
    .execute(&state.pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AdminError::AffiliateNotFound(id));
    }

    record_mutation("affiliate", "update");
    info!(affiliate_id = id, "Affiliate link updated");

    let dto = fetch_affiliate(&state.pool, id).await?;
    Ok(Json(ApiResponse::success_with_message(dto, "推广链接已更新")))
}

/// 切换推广链接启用状态
///
/// POST /admin/affiliates/{id}/toggle-active
pub async fn toggle_affiliate_active(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<AffiliateDto>>, AdminError> {
    let is_active: bool = sqlx::query_scalar(
        "UPDATE affiliate_links SET is_active = NOT is_active, updated_at = NOW() WHERE id = $1 RETURNING is_active",
    )
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AdminError::AffiliateNotFound(id))?;

    record_mutation("affiliate", "toggle_active");
    info!(affiliate_id = id, is_active, "Affiliate active flag toggled");

    let dto = fetch_affiliate(&state.pool, id).await?;
    let message = if is_active { "推广链接已启用" } else { "推广链接已停用" };
    Ok(Json(ApiResponse::success_with_message(dto, message)))
}

/// 删除推广链接及其全部佣金记录
///
/// DELETE /admin/affiliates/{id}
pub async fn delete_affiliate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, AdminError> {
    let mut tx = state.pool.begin().await?;

    let commissions = sqlx::query("DELETE FROM affiliate_commissions WHERE affiliate_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    let result = sqlx::query("DELETE FROM affiliate_links WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(AdminError::AffiliateNotFound(id));
    }

    tx.commit().await?;

    record_mutation("affiliate", "delete");
    info!(affiliate_id = id, commissions, "Affiliate link deleted with commissions");

    Ok(Json(ApiResponse::success_empty(format!(
        "推广链接已删除，同时删除 {} 条佣金记录",
        commissions
    ))))
}

// ---------------------------------------------------------------------------
// 佣金
// ---------------------------------------------------------------------------

const COMMISSION_SELECT_SQL: &str = r#"
    SELECT
        c.id, c.affiliate_id, a.code AS affiliate_code, c.payment_id,
        c.sale_amount_cents, c.amount_cents, c.status, c.note,
        c.approved_at, c.rejected_at, c.paid_at, c.created_at
    FROM affiliate_commissions c
    JOIN affiliate_links a ON a.id = c.affiliate_id
"#;

const COMMISSION_FILTER_SQL: &str = r#"
    WHERE ($1::bigint IS NULL OR c.affiliate_id = $1)
      AND ($2::text IS NULL OR c.status = $2)
      AND ($3::timestamptz IS NULL OR c.created_at >= $3)
      AND ($4::timestamptz IS NULL OR c.created_at < $4)
"#;

async fn fetch_commission(pool: &PgPool, id: i64) -> Result<CommissionDto, AdminError> {
    let sql = format!("{} WHERE c.id = $1", COMMISSION_SELECT_SQL);
    sqlx::query_as::<_, CommissionDto>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AdminError::CommissionNotFound(id))
}

/// 获取佣金列表
///
/// GET /admin/affiliates/commissions
pub async fn list_commissions(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<CommissionQueryFilter>,
    Query(range): Query<DateRangeParams>,
) -> Result<Json<ApiResponse<PageResponse<CommissionDto>>>, AdminError> {
    range.validate()?;
    let page = pagination.resolve(&state.config.pagination, "commissions");
    let status = filter.status.map(|s| s.as_str());

    let total: (i64,) = sqlx::query_as(&format!(
        "SELECT COUNT(*) FROM affiliate_commissions c {}",
        COMMISSION_FILTER_SQL
    ))
    .bind(filter.affiliate_id)
    .bind(status)
    .bind(range.start_time())
    .bind(range.end_time_exclusive())
    .fetch_one(&state.pool)
    .await?;

    if total.0 == 0 {
        return Ok(Json(ApiResponse::success(PageResponse::empty(page))));
    }

    let sql = format!(
        "{} {} ORDER BY c.created_at DESC LIMIT $5 OFFSET $6",
        COMMISSION_SELECT_SQL, COMMISSION_FILTER_SQL
    );
    let items = sqlx::query_as::<_, CommissionDto>(&sql)
        .bind(filter.affiliate_id)
        .bind(status)
        .bind(range.start_time())
        .bind(range.end_time_exclusive())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(ApiResponse::success(PageResponse::new(items, total.0, page))))
}

/// 佣金统计（按状态汇总笔数与金额）
///
/// GET /admin/affiliates/commissions/stats
#[instrument(skip(state))]
pub async fn commission_stats(
    State(state): State<AppState>,
    Query(filter): Query<CommissionQueryFilter>,
    Query(range): Query<DateRangeParams>,
) -> Result<Json<ApiResponse<CommissionStats>>, AdminError> {
    range.validate()?;

    let by_status = sqlx::query_as::<_, CommissionStatusSummary>(&format!(
        r#"
        SELECT c.status, COUNT(*) AS count, COALESCE(SUM(c.amount_cents), 0)::bigint AS amount_cents
        FROM affiliate_commissions c
        {}
        GROUP BY c.status
        ORDER BY c.status
        "#,
        COMMISSION_FILTER_SQL
    ))
    .bind(filter.affiliate_id)
    .bind(filter.status.map(|s| s.as_str()))
    .bind(range.start_time())
    .bind(range.end_time_exclusive())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(summarize_commissions(by_status))))
}

fn summarize_commissions(by_status: Vec<CommissionStatusSummary>) -> CommissionStats {
    CommissionStats {
        total_count: by_status.iter().map(|s| s.count).sum(),
        total_amount_cents: by_status.iter().map(|s| s.amount_cents).sum(),
        by_status,
    }
}

/// 记录佣金
///
/// POST /admin/affiliates/commissions
pub async fn create_commission(
    State(state): State<AppState>,
    Json(req): Json<CreateCommissionRequest>,
) -> Result<Json<ApiResponse<CommissionDto>>, AdminError> {
    req.validate()?;

    let mut tx = state.pool.begin().await?;

    let rate: f64 = sqlx::query_scalar("SELECT commission_rate FROM affiliate_links WHERE id = $1 FOR UPDATE")
        .bind(req.affiliate_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AdminError::AffiliateNotFound(req.affiliate_id))?;

    let sale_amount_cents = match req.payment_id {
        Some(payment_id) => {
            let (amount, status): (i64, PaymentStatus) =
                sqlx::query_as("SELECT amount_cents, status FROM payments WHERE id = $1")
                    .bind(payment_id)
                    .fetch_optional(&mut *tx)
                    .await?
                    .ok_or_else(|| AdminError::NotFound(format!("支付记录 {}", payment_id)))?;
            if status != PaymentStatus::Completed {
                return Err(AdminError::Validation(
                    "只能为已完成的订单记录佣金".to_string(),
                ));
            }
            let booked: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM affiliate_commissions WHERE payment_id = $1)",
            )
            .bind(payment_id)
            .fetch_one(&mut *tx)
            .await?;
            if booked {
                return Err(duplicate_commission(payment_id));
            }
            amount
        }
        None => req.sale_amount_cents.ok_or_else(|| {
            AdminError::Validation("未关联支付单时必须提供订单金额".to_string())
        })?,
    };

    let amount_cents = commission_amount_cents(sale_amount_cents, rate);

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO affiliate_commissions (affiliate_id, payment_id, sale_amount_cents, amount_cents, status)
        VALUES ($1, $2, $3, $4, 'pending')
        RETURNING id
        "#,
    )
    .bind(req.affiliate_id)
    .bind(req.payment_id)
    .bind(sale_amount_cents)
    .bind(amount_cents)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match req.payment_id {
        Some(payment_id) => AdminError::from_unique_violation(e, duplicate_commission_message(payment_id)),
        None => AdminError::Database(e),
    })?;

    sqlx::query("UPDATE affiliate_links SET conversions = conversions + 1, updated_at = NOW() WHERE id = $1")
        .bind(req.affiliate_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    record_mutation("commission", "create");
    info!(
        commission_id = id,
        affiliate_id = req.affiliate_id,
        amount_cents,
        "Commission recorded"
    );

    let dto = fetch_commission(&state.pool, id).await?;
    Ok(Json(ApiResponse::success_with_message(dto, "佣金已记录")))
}

fn duplicate_commission_message(payment_id: i64) -> String {
    format!("支付单 {} 已记录过佣金", payment_id)
}

fn duplicate_commission(payment_id: i64) -> AdminError {
    AdminError::Duplicate(duplicate_commission_message(payment_id))
}

/// 在事务内校验并执行佣金状态流转
async fn transition_commission(
    pool: &PgPool,
    id: i64,
    target: CommissionStatus,
    note: Option<&str>,
) -> Result<CommissionDto, AdminError> {
    let mut tx = pool.begin().await?;

    let current: CommissionStatus =
        sqlx::query_scalar("SELECT status FROM affiliate_commissions WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AdminError::CommissionNotFound(id))?;

    check_commission_transition(id, current, target)?;

    sqlx::query(
        r#"
        UPDATE affiliate_commissions
        SET status = $2,
            note = COALESCE($3, note),
            approved_at = CASE WHEN $2 = 'approved' THEN NOW() ELSE approved_at END,
            rejected_at = CASE WHEN $2 = 'rejected' THEN NOW() ELSE rejected_at END,
            paid_at = CASE WHEN $2 = 'paid' THEN NOW() ELSE paid_at END
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(target.as_str())
    .bind(note)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    record_mutation("commission", target.as_str());
    info!(
        commission_id = id,
        from = current.as_str(),
        to = target.as_str(),
        "Commission status changed"
    );

    fetch_commission(pool, id).await
}

fn check_commission_transition(
    id: i64,
    current: CommissionStatus,
    target: CommissionStatus,
) -> Result<(), AdminError> {
    if current.can_transition_to(target) {
        return Ok(());
    }
    if target == CommissionStatus::Paid {
        return Err(AdminError::CommissionNotApproved(id));
    }
    Err(AdminError::InvalidStatusTransition {
        entity: "佣金",
        from: current.as_str().to_string(),
        to: target.as_str().to_string(),
    })
}

/// 审核通过佣金
///
/// POST /admin/affiliates/commissions/{id}/approve
pub async fn approve_commission(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<CommissionDto>>, AdminError> {
    let dto = transition_commission(&state.pool, id, CommissionStatus::Approved, None).await?;
    Ok(Json(ApiResponse::success_with_message(dto, "佣金已审核通过")))
}

/// 驳回佣金
///
/// POST /admin/affiliates/commissions/{id}/reject
pub async fn reject_commission(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<RejectCommissionRequest>,
) -> Result<Json<ApiResponse<CommissionDto>>, AdminError> {
    req.validate()?;
    let note = req.note.as_deref().map(str::trim).filter(|n| !n.is_empty());
    let dto = transition_commission(&state.pool, id, CommissionStatus::Rejected, note).await?;
    Ok(Json(ApiResponse::success_with_message(dto, "佣金已驳回")))
}

/// 标记佣金已支付（仅限已审核）
///
/// POST /admin/affiliates/commissions/{id}/mark-paid
pub async fn mark_commission_paid(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<CommissionDto>>, AdminError> {
    let dto = transition_commission(&state.pool, id, CommissionStatus::Paid, None).await?;
    Ok(Json(ApiResponse::success_with_message(dto, "佣金已标记为已支付")))
}
