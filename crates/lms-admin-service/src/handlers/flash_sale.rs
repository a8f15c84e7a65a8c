//! 限时特惠 API 处理器
//!
//! 阶段（未启用/未开始/进行中/已结束）由开关和时间窗口实时推导。

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use lms_shared::observability::metrics::record_mutation;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::info;
use validator::Validate;

use crate::{
    dto::{ApiResponse, CreatedResponse, PageResponse, PaginationParams, like_pattern},
    error::AdminError,
    models::FlashSalePhase,
    state::AppState,
};

fn default_true() -> bool {
    true
}

#[derive(sqlx::FromRow)]
struct FlashSaleRow {
    id: i64,
    name: String,
    course_id: Option<i64>,
    course_title: Option<String>,
    discount_percent: i32,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    max_uses: Option<i32>,
    used_count: i32,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashSaleDto {
    pub id: i64,
    pub name: String,
    /// 为空表示全站课程适用
    pub course_id: Option<i64>,
    pub course_title: Option<String>,
    pub discount_percent: i32,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub max_uses: Option<i32>,
    pub used_count: i32,
    pub is_active: bool,
    pub phase: FlashSalePhase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FlashSaleDto {
    fn from_row(row: FlashSaleRow, now: DateTime<Utc>) -> Self {
        Self {
            phase: FlashSalePhase::resolve(row.is_active, row.starts_at, row.ends_at, now),
            id: row.id,
            name: row.name,
            course_id: row.course_id,
            course_title: row.course_title,
            discount_percent: row.discount_percent,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            max_uses: row.max_uses,
            used_count: row.used_count,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashSaleQueryFilter {
    pub keyword: Option<String>,
    pub phase: Option<FlashSalePhase>,
    pub course_id: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateFlashSaleRequest {
    #[validate(length(min = 1, max = 100, message = "活动名称长度必须在1-100个字符之间"))]
    pub name: String,
    pub course_id: Option<i64>,
    #[validate(range(min = 1, max = 90, message = "折扣必须在1-90之间"))]
    pub discount_percent: i32,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[validate(range(min = 1, message = "最大使用次数必须大于0"))]
    pub max_uses: Option<i32>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFlashSaleRequest {
    #[validate(length(min = 1, max = 100, message = "活动名称长度必须在1-100个字符之间"))]
    pub name: Option<String>,
    #[validate(range(min = 1, max = 90, message = "折扣必须在1-90之间"))]
    pub discount_percent: Option<i32>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    #[validate(range(min = 1, message = "最大使用次数必须大于0"))]
    pub max_uses: Option<i32>,
}

/// 结束时间必须晚于开始时间
pub fn check_sale_window(starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Result<(), AdminError> {
    if ends_at <= starts_at {
        return Err(AdminError::Validation("结束时间必须晚于开始时间".to_string()));
    }
    Ok(())
}

fn check_max_uses(max_uses: Option<i32>, used_count: i32) -> Result<(), AdminError> {
    match max_uses {
        Some(max) if max < used_count => Err(AdminError::Validation(format!(
            "最大使用次数不能小于已使用次数 {}",
            used_count
        ))),
        _ => Ok(()),
    }
}

const FLASH_SALE_SELECT_SQL: &str = r#"
    SELECT f.id, f.name, f.course_id, c.title AS course_title, f.discount_percent,
           f.starts_at, f.ends_at, f.max_uses, f.used_count, f.is_active, f.created_at, f.updated_at
    FROM flash_sales f
    LEFT JOIN courses c ON c.id = f.course_id
"#;

// 阶段表达式与 FlashSalePhase::resolve 保持一致
const FLASH_SALE_FILTER_SQL: &str = r#"
    WHERE ($1::text IS NULL OR f.name ILIKE $1)
      AND ($2::text IS NULL OR (
            CASE
                WHEN NOT f.is_active THEN 'inactive'
                WHEN NOW() < f.starts_at THEN 'scheduled'
                WHEN NOW() < f.ends_at THEN 'running'
                ELSE 'ended'
            END) = $2)
      AND ($3::bigint IS NULL OR f.course_id = $3)
"#;

async fn fetch_flash_sale(pool: &PgPool, id: i64) -> Result<FlashSaleDto, AdminError> {
    let sql = format!("{} WHERE f.id = $1", FLASH_SALE_SELECT_SQL);
    sqlx::query_as::<_, FlashSaleRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .map(|row| FlashSaleDto::from_row(row, Utc::now()))
        .ok_or(AdminError::FlashSaleNotFound(id))
}

/// 获取限时特惠列表
///
/// GET /admin/flash-sales
pub async fn list_flash_sales(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<FlashSaleQueryFilter>,
) -> Result<Json<ApiResponse<PageResponse<FlashSaleDto>>>, AdminError> {
    let page = pagination.resolve(&state.config.pagination, "flash_sales");
    let keyword = like_pattern(filter.keyword.as_deref());
    let phase = filter.phase.map(|p| p.as_str());

    let count_sql = format!("SELECT COUNT(*) FROM flash_sales f {}", FLASH_SALE_FILTER_SQL);
    let total: (i64,) = sqlx::query_as(&count_sql)
        .bind(&keyword)
        .bind(phase)
        .bind(filter.course_id)
        .fetch_one(&state.pool)
        .await?;

    if total.0 == 0 {
        return Ok(Json(ApiResponse::success(PageResponse::empty(page))));
    }

    let sql = format!(
        "{} {} ORDER BY f.starts_at DESC, f.id DESC LIMIT $4 OFFSET $5",
        FLASH_SALE_SELECT_SQL, FLASH_SALE_FILTER_SQL
    );
    let rows = sqlx::query_as::<_, FlashSaleRow>(&sql)
        .bind(&keyword)
        .bind(phase)
        .bind(filter.course_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&state.pool)
        .await?;

    let now = Utc::now();
    let items = rows
        .into_iter()
        .map(|row| FlashSaleDto::from_row(row, now))
        .collect();
    Ok(Json(ApiResponse::success(PageResponse::new(items, total.0, page))))
}

/// 获取限时特惠详情
///
/// GET /admin/flash-sales/{id}
pub async fn get_flash_sale(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<FlashSaleDto>>, AdminError> {
    let dto = fetch_flash_sale(&state.pool, id).await?;
    Ok(Json(ApiResponse::success(dto)))
}

/// 创建限时特惠
///
/// POST /admin/flash-sales
pub async fn create_flash_sale(
    State(state): State<AppState>,
    Json(req): Json<CreateFlashSaleRequest>,
) -> Result<Json<ApiResponse<CreatedResponse>>, AdminError> {
    req.validate()?;
    check_sale_window(req.starts_at, req.ends_at)?;

    if let Some(course_id) = req.course_id {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM courses WHERE id = $1)")
            .bind(course_id)
            .fetch_one(&state.pool)
            .await?;
        if !exists {
            return Err(AdminError::CourseNotFound(course_id));
        }
    }

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO flash_sales (name, course_id, discount_percent, starts_at, ends_at, max_uses, is_active)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id
        "#,
    )
    .bind(&req.name)
    .bind(req.course_id)
    .bind(req.discount_percent)
    .bind(req.starts_at)
    .bind(req.ends_at)
    .bind(req.max_uses)
    .bind(req.is_active)
    .fetch_one(&state.pool)
    .await?;

    record_mutation("flash_sale", "create");
    info!(flash_sale_id = id, discount = req.discount_percent, "Flash sale created");

    Ok(Json(ApiResponse::success_with_message(
        CreatedResponse::new(id),
        "限时特惠创建成功",
    )))
}

/// 更新限时特惠
///
/// PUT /admin/flash-sales/{id}
pub async fn update_flash_sale(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateFlashSaleRequest>,
) -> Result<Json<ApiResponse<FlashSaleDto>>, AdminError> {
    req.validate()?;

    let current = fetch_flash_sale(&state.pool, id).await?;
    check_sale_window(
        req.starts_at.unwrap_or(current.starts_at),
        req.ends_at.unwrap_or(current.ends_at),
    )?;
    check_max_uses(req.max_uses, current.used_count)?;

    let result = sqlx::query(
        r#"
        UPDATE flash_sales
        SET name = COALESCE($2, name),
            discount_percent = COALESCE($3, discount_percent),
            starts_at = COALESCE($4, starts_at),
            ends_at = COALESCE($5, ends_at),
            max_uses = COALESCE($6, max_uses),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(&req.name)
    .bind(req.discount_percent)
    .bind(req.starts_at)
    .bind(req.ends_at)
    .bind(req.max_uses)
    .execute(&state.pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AdminError::FlashSaleNotFound(id));
    }

    record_mutation("flash_sale", "update");
    info!(flash_sale_id = id, "Flash sale updated");

    let dto = fetch_flash_sale(&state.pool, id).await?;
    Ok(Json(ApiResponse::success_with_message(dto, "限时特惠更新成功")))
}

/// 切换限时特惠启用状态
///
/// POST /admin/flash-sales/{id}/toggle-active
pub async fn toggle_flash_sale_active(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<FlashSaleDto>>, AdminError> {
    let is_active: bool = sqlx::query_scalar(
        "UPDATE flash_sales SET is_active = NOT is_active, updated_at = NOW() WHERE id = $1 RETURNING is_active",
    )
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AdminError::FlashSaleNotFound(id))?;

    record_mutation("flash_sale", "toggle");
    info!(flash_sale_id = id, is_active, "Flash sale toggled");

    let dto = fetch_flash_sale(&state.pool, id).await?;
    let message = if is_active { "限时特惠已启用" } else { "限时特惠已停用" };
    Ok(Json(ApiResponse::success_with_message(dto, message)))
}

/// 删除限时特惠（已有使用记录的不能删除）
///
/// DELETE /admin/flash-sales/{id}
pub async fn delete_flash_sale(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, AdminError> {
    let mut tx = state.pool.begin().await?;

    let used_count: i32 =
        sqlx::query_scalar("SELECT used_count FROM flash_sales WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AdminError::FlashSaleNotFound(id))?;

    if used_count > 0 {
        return Err(AdminError::FlashSaleInUse(id));
    }

    sqlx::query("DELETE FROM flash_sales WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    record_mutation("flash_sale", "delete");
    info!(flash_sale_id = id, "Flash sale deleted");

    Ok(Json(ApiResponse::success_empty("限时特惠已删除")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn row(is_active: bool, starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> FlashSaleRow {
        FlashSaleRow {
            id: 1,
            name: "双十一".to_string(),
            course_id: None,
            course_title: None,
            discount_percent: 30,
            starts_at,
            ends_at,
            max_uses: Some(100),
            used_count: 0,
            is_active,
            created_at: starts_at,
            updated_at: starts_at,
        }
    }

    #[test]
    fn test_phase_on_dto() {
        let start = Utc.with_ymd_and_hms(2024, 11, 11, 0, 0, 0).unwrap();
        let end = start + Duration::days(1);

        let running = FlashSaleDto::from_row(row(true, start, end), start + Duration::hours(1));
        assert_eq!(running.phase, FlashSalePhase::Running);

        let disabled = FlashSaleDto::from_row(row(false, start, end), start + Duration::hours(1));
        assert_eq!(disabled.phase, FlashSalePhase::Inactive);

        let ended = FlashSaleDto::from_row(row(true, start, end), end);
        assert_eq!(ended.phase, FlashSalePhase::Ended);
    }

    #[test]
    fn test_sale_window() {
        let start = Utc.with_ymd_and_hms(2024, 11, 11, 0, 0, 0).unwrap();
        assert!(check_sale_window(start, start + Duration::minutes(1)).is_ok());
        assert!(check_sale_window(start, start).is_err());
        assert!(check_sale_window(start, start - Duration::days(1)).is_err());
    }

    #[test]
    fn test_discount_bounds() {
        let start = Utc.with_ymd_and_hms(2024, 11, 11, 0, 0, 0).unwrap();
        let build = |discount: i32| CreateFlashSaleRequest {
            name: "限时".to_string(),
            course_id: None,
            discount_percent: discount,
            starts_at: start,
            ends_at: start + Duration::days(1),
            max_uses: None,
            is_active: true,
        };
        assert!(build(1).validate().is_ok());
        assert!(build(90).validate().is_ok());
        assert!(build(0).validate().is_err());
        assert!(build(91).validate().is_err());
    }

    #[test]
    fn test_max_uses_not_below_used() {
        assert!(check_max_uses(Some(5), 5).is_ok());
        assert!(check_max_uses(None, 50).is_ok());
        assert!(check_max_uses(Some(4), 5).is_err());
    }
}
