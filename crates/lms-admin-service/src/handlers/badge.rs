//! 徽章管理 API 处理器
//!
//! 实现徽章的 CRUD 操作及启用状态切换

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use lms_shared::observability::metrics::record_mutation;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::{Validate, ValidationError};

use crate::{
    dto::{ApiResponse, CreatedResponse, PageResponse, PaginationParams, like_pattern},
    error::AdminError,
    state::AppState,
};

/// 徽章视图
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeDto {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub icon_url: Option<String>,
    pub color: String,
    pub required_points: i32,
    pub is_active: bool,
    pub holder_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 徽章列表过滤条件
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeQueryFilter {
    pub keyword: Option<String>,
    pub is_active: Option<bool>,
}

/// 校验 `#RRGGBB` 颜色格式
pub fn validate_color(value: &str) -> Result<(), ValidationError> {
    let valid = value.len() == 7
        && value.starts_with('#')
        && value[1..].chars().all(|c| c.is_ascii_hexdigit());
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("color").with_message("颜色格式必须为 #RRGGBB".into()))
    }
}

/// 创建徽章请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateBadgeRequest {
    #[validate(length(min = 1, max = 100, message = "名称长度必须在1-100个字符之间"))]
    pub name: String,
    #[validate(length(max = 500, message = "描述不能超过500个字符"))]
    pub description: Option<String>,
    #[validate(url(message = "图标地址必须是有效的URL"))]
    pub icon_url: Option<String>,
    #[validate(custom(function = "validate_color"))]
    pub color: Option<String>,
    #[validate(range(min = 0, message = "所需积分不能为负数"))]
    pub required_points: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// 更新徽章请求（未提供的字段保持不变）
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBadgeRequest {
    #[validate(length(min = 1, max = 100, message = "名称长度必须在1-100个字符之间"))]
    pub name: Option<String>,
    #[validate(length(max = 500, message = "描述不能超过500个字符"))]
    pub description: Option<String>,
    #[validate(url(message = "图标地址必须是有效的URL"))]
    pub icon_url: Option<String>,
    #[validate(custom(function = "validate_color"))]
    pub color: Option<String>,
    #[validate(range(min = 0, message = "所需积分不能为负数"))]
    pub required_points: Option<i32>,
    pub is_active: Option<bool>,
}

fn default_true() -> bool {
    true
}

#[derive(sqlx::FromRow)]
struct BadgeRow {
    id: i64,
    name: String,
    description: Option<String>,
    icon_url: Option<String>,
    color: String,
    required_points: i32,
    is_active: bool,
    holder_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<BadgeRow> for BadgeDto {
    fn from(row: BadgeRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            icon_url: row.icon_url,
            color: row.color,
            required_points: row.required_points,
            is_active: row.is_active,
            holder_count: row.holder_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const BADGE_SELECT_SQL: &str = r#"
    SELECT
        b.id, b.name, b.description, b.icon_url, b.color, b.required_points, b.is_active,
        (SELECT COUNT(*) FROM user_badges ub WHERE ub.badge_id = b.id) AS holder_count,
        b.created_at, b.updated_at
    FROM badges b
"#;

const BADGE_FILTER_SQL: &str = r#"
    WHERE ($1::text IS NULL OR b.name ILIKE $1 OR b.description ILIKE $1)
      AND ($2::bool IS NULL OR b.is_active = $2)
"#;

async fn fetch_badge(pool: &sqlx::PgPool, id: i64) -> Result<BadgeDto, AdminError> {
    let sql = format!("{} WHERE b.id = $1", BADGE_SELECT_SQL);
    let row = sqlx::query_as::<_, BadgeRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AdminError::BadgeNotFound(id))?;
    Ok(row.into())
}

/// 获取徽章列表（分页）
///
/// GET /admin/badges
pub async fn list_badges(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<BadgeQueryFilter>,
) -> Result<Json<ApiResponse<PageResponse<BadgeDto>>>, AdminError> {
    let page = pagination.resolve(&state.config.pagination, "badges");
    let keyword = like_pattern(filter.keyword.as_deref());

    let total: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM badges b {}", BADGE_FILTER_SQL))
        .bind(&keyword)
        .bind(filter.is_active)
        .fetch_one(&state.pool)
        .await?;

    if total.0 == 0 {
        return Ok(Json(ApiResponse::success(PageResponse::empty(page))));
    }

    let sql = format!(
        "{} {} ORDER BY b.required_points ASC, b.id ASC LIMIT $3 OFFSET $4",
        BADGE_SELECT_SQL, BADGE_FILTER_SQL
    );
    let rows = sqlx::query_as::<_, BadgeRow>(&sql)
        .bind(&keyword)
        .bind(filter.is_active)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&state.pool)
        .await?;

    let items = rows.into_iter().map(Into::into).collect();
    Ok(Json(ApiResponse::success(PageResponse::new(items, total.0, page))))
}

/// 获取徽章详情
///
/// GET /admin/badges/{id}
pub async fn get_badge(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<BadgeDto>>, AdminError> {
    let dto = fetch_badge(&state.pool, id).await?;
    Ok(Json(ApiResponse::success(dto)))
}

/// 创建徽章
///
/// POST /admin/badges
pub async fn create_badge(
    State(state): State<AppState>,
    Json(req): Json<CreateBadgeRequest>,
) -> Result<Json<ApiResponse<CreatedResponse>>, AdminError> {
    req.validate()?;

    let color = req.color.as_deref().unwrap_or("#3B82F6").to_uppercase();
    let row: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO badges (name, description, icon_url, color, required_points, is_active)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id
        "#,
    )
    .bind(req.name.trim())
    .bind(&req.description)
    .bind(&req.icon_url)
    .bind(&color)
    .bind(req.required_points)
    .bind(req.is_active)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| AdminError::from_unique_violation(e, format!("徽章名称已存在: {}", req.name)))?;

    record_mutation("badge", "create");
    info!(badge_id = row.0, name = %req.name, "Badge created");

    Ok(Json(ApiResponse::success_with_message(
        CreatedResponse::new(row.0),
        "徽章创建成功",
    )))
}

/// 更新徽章
///
/// PUT /admin/badges/{id}
pub async fn update_badge(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateBadgeRequest>,
) -> Result<Json<ApiResponse<BadgeDto>>, AdminError> {
    req.validate()?;

    let result = sqlx::query(
        r#"
        UPDATE badges
        SET name = COALESCE($2, name),
            description = COALESCE($3, description),
            icon_url = COALESCE($4, icon_url),
            color = COALESCE($5, color),
            required_points = COALESCE($6, required_points),
            is_active = COALESCE($7, is_active),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(req.name.as_deref().map(str::trim))
    .bind(&req.description)
    .bind(&req.icon_url)
    .bind(req.color.as_ref().map(|c| c.to_uppercase()))
    .bind(req.required_points)
    .bind(req.is_active)
    .execute(&state.pool)
    .await
    .map_err(|e| AdminError::from_unique_violation(e, "徽章名称已存在"))?;

    if result.rows_affected() == 0 {
        return Err(AdminError::BadgeNotFound(id));
    }

    record_mutation("badge", "update");
    info!(badge_id = id, "Badge updated");

    let dto = fetch_badge(&state.pool, id).await?;
    Ok(Json(ApiResponse::success_with_message(dto, "徽章已更新")))
}

/// 删除徽章（同时移除已授予的记录）
///
/// DELETE /admin/badges/{id}
pub async fn delete_badge(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, AdminError> {
    let result = sqlx::query("DELETE FROM badges WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AdminError::BadgeNotFound(id));
    }

    record_mutation("badge", "delete");
    info!(badge_id = id, "Badge deleted");

    Ok(Json(ApiResponse::success_empty("徽章已删除")))
}

/// 切换徽章启用状态
///
/// POST /admin/badges/{id}/toggle-active
pub async fn toggle_badge_active(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<BadgeDto>>, AdminError> {
    let is_active: bool = sqlx::query_scalar(
        "UPDATE badges SET is_active = NOT is_active, updated_at = NOW() WHERE id = $1 RETURNING is_active",
    )
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AdminError::BadgeNotFound(id))?;

    record_mutation("badge", "toggle_active");
    info!(badge_id = id, is_active, "Badge active flag toggled");

    let dto = fetch_badge(&state.pool, id).await?;
    let message = if is_active { "徽章已启用" } else { "徽章已停用" };
    Ok(Json(ApiResponse::success_with_message(dto, message)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_request() -> CreateBadgeRequest {
        CreateBadgeRequest {
            name: "Early Bird".to_string(),
            description: Some("完成第一门课程".to_string()),
            icon_url: Some("https://cdn.example.com/badges/early.png".to_string()),
            color: Some("#10b981".to_string()),
            required_points: 100,
            is_active: true,
        }
    }

    #[test]
    fn test_validate_color() {
        assert!(validate_color("#3B82F6").is_ok());
        assert!(validate_color("#abcdef").is_ok());
        assert!(validate_color("3B82F6").is_err());
        assert!(validate_color("#3B82F").is_err());
        assert!(validate_color("#GGGGGG").is_err());
    }

    #[test]
    fn test_create_badge_request_validation() {
        assert!(create_request().validate().is_ok());

        let mut empty_name = create_request();
        empty_name.name = String::new();
        assert!(empty_name.validate().is_err());

        let mut bad_color = create_request();
        bad_color.color = Some("blue".to_string());
        assert!(bad_color.validate().is_err());

        let mut negative = create_request();
        negative.required_points = -1;
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_create_badge_request_defaults_active() {
        let req: CreateBadgeRequest =
            serde_json::from_str(r#"{"name":"Streak","requiredPoints":10}"#).unwrap();
        assert!(req.is_active);
        assert!(req.color.is_none());
    }

    #[test]
    fn test_badge_row_conversion() {
        let row = BadgeRow {
            id: 1,
            name: "Early Bird".to_string(),
            description: None,
            icon_url: None,
            color: "#3B82F6".to_string(),
            required_points: 50,
            is_active: true,
            holder_count: 12,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let dto: BadgeDto = row.into();
        assert_eq!(dto.holder_count, 12);
        let json = serde_json::to_value(&dto).unwrap();
        assert_eq!(json["requiredPoints"], 50);
        assert_eq!(json["isActive"], true);
    }
}
