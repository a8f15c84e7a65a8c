//! 成就管理 API 处理器
//!
//! 成就定义了学员达成某类条件（完成课程数、连续学习天数等）后获得的积分

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use lms_shared::observability::metrics::record_mutation;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use crate::{
    dto::{ApiResponse, CreatedResponse, PageResponse, PaginationParams, like_pattern},
    error::AdminError,
    models::CriteriaType,
    state::AppState,
};

/// 成就视图
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementDto {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub icon_url: Option<String>,
    pub points: i32,
    pub criteria_type: CriteriaType,
    pub criteria_value: i32,
    pub is_active: bool,
    /// 已获得该成就的学员数
    pub awarded_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementQueryFilter {
    pub keyword: Option<String>,
    pub criteria_type: Option<CriteriaType>,
    pub is_active: Option<bool>,
}

/// 创建成就请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateAchievementRequest {
    #[validate(length(min = 1, max = 100, message = "名称长度必须在1-100个字符之间"))]
    pub name: String,
    #[validate(length(max = 500, message = "描述不能超过500个字符"))]
    pub description: Option<String>,
    #[validate(url(message = "图标地址必须是有效的URL"))]
    pub icon_url: Option<String>,
    #[validate(range(min = 0, message = "积分不能为负数"))]
    pub points: i32,
    pub criteria_type: CriteriaType,
    #[validate(range(min = 1, message = "达成条件数值必须大于0"))]
    pub criteria_value: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// 更新成就请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAchievementRequest {
    #[validate(length(min = 1, max = 100, message = "名称长度必须在1-100个字符之间"))]
    pub name: Option<String>,
    #[validate(length(max = 500, message = "描述不能超过500个字符"))]
    pub description: Option<String>,
    #[validate(url(message = "图标地址必须是有效的URL"))]
    pub icon_url: Option<String>,
    #[validate(range(min = 0, message = "积分不能为负数"))]
    pub points: Option<i32>,
    pub criteria_type: Option<CriteriaType>,
    #[validate(range(min = 1, message = "达成条件数值必须大于0"))]
    pub criteria_value: Option<i32>,
    pub is_active: Option<bool>,
}

fn default_true() -> bool {
    true
}

#[derive(sqlx::FromRow)]
struct AchievementRow {
    id: i64,
    name: String,
    description: Option<String>,
    icon_url: Option<String>,
    points: i32,
    criteria_type: CriteriaType,
    criteria_value: i32,
    is_active: bool,
    awarded_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AchievementRow> for AchievementDto {
    fn from(row: AchievementRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            icon_url: row.icon_url,
            points: row.points,
            criteria_type: row.criteria_type,
            criteria_value: row.criteria_value,
            is_active: row.is_active,
            awarded_count: row.awarded_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const ACHIEVEMENT_SELECT_SQL: &str = r#"
    SELECT
        a.id, a.name, a.description, a.icon_url, a.points, a.criteria_type, a.criteria_value,
        a.is_active,
        (SELECT COUNT(*) FROM user_achievements ua WHERE ua.achievement_id = a.id) AS awarded_count,
        a.created_at, a.updated_at
    FROM achievements a
"#;

const ACHIEVEMENT_FILTER_SQL: &str = r#"
    WHERE ($1::text IS NULL OR a.name ILIKE $1 OR a.description ILIKE $1)
      AND ($2::text IS NULL OR a.criteria_type = $2)
      AND ($3::bool IS NULL OR a.is_active = $3)
"#;

async fn fetch_achievement(pool: &sqlx::PgPool, id: i64) -> Result<AchievementDto, AdminError> {
    let sql = format!("{} WHERE a.id = $1", ACHIEVEMENT_SELECT_SQL);
    let row = sqlx::query_as::<_, AchievementRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AdminError::AchievementNotFound(id))?;
    Ok(row.into())
}

/// 获取成就列表（分页）
///
/// GET /admin/achievements
pub async fn list_achievements(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<AchievementQueryFilter>,
) -> Result<Json<ApiResponse<PageResponse<AchievementDto>>>, AdminError> {
    let page = pagination.resolve(&state.config.pagination, "achievements");
    let keyword = like_pattern(filter.keyword.as_deref());
    let criteria_type = filter.criteria_type.map(|c| c.as_str());

    let total: (i64,) = sqlx::query_as(&format!(
        "SELECT COUNT(*) FROM achievements a {}",
        ACHIEVEMENT_FILTER_SQL
    ))
    .bind(&keyword)
    .bind(criteria_type)
    .bind(filter.is_active)
    .fetch_one(&state.pool)
    .await?;

    if total.0 == 0 {
        return Ok(Json(ApiResponse::success(PageResponse::empty(page))));
    }

    let sql = format!(
        "{} {} ORDER BY a.created_at DESC LIMIT $4 OFFSET $5",
        ACHIEVEMENT_SELECT_SQL, ACHIEVEMENT_FILTER_SQL
    );
    let rows = sqlx::query_as::<_, AchievementRow>(&sql)
        .bind(&keyword)
        .bind(criteria_type)
        .bind(filter.is_active)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&state.pool)
        .await?;

    let items = rows.into_iter().map(Into::into).collect();
    Ok(Json(ApiResponse::success(PageResponse::new(items, total.0, page))))
}

/// 获取成就详情
///
/// GET /admin/achievements/{id}
pub async fn get_achievement(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<AchievementDto>>, AdminError> {
    let dto = fetch_achievement(&state.pool, id).await?;
    Ok(Json(ApiResponse::success(dto)))
}

/// 创建成就
///
/// POST /admin/achievements
pub async fn create_achievement(
    State(state): State<AppState>,
    Json(req): Json<CreateAchievementRequest>,
) -> Result<Json<ApiResponse<CreatedResponse>>, AdminError> {
    req.validate()?;

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO achievements (name, description, icon_url, points, criteria_type, criteria_value, is_active)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id
        "#,
    )
    .bind(req.name.trim())
    .bind(&req.description)
    .bind(&req.icon_url)
    .bind(req.points)
    .bind(req.criteria_type)
    .bind(req.criteria_value)
    .bind(req.is_active)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| AdminError::from_unique_violation(e, format!("成就名称已存在: {}", req.name)))?;

    record_mutation("achievement", "create");
    info!(achievement_id = id, name = %req.name, "Achievement created");

    Ok(Json(ApiResponse::success_with_message(
        CreatedResponse::new(id),
        "成就创建成功",
    )))
}

/// 更新成就
///
/// PUT /admin/achievements/{id}
pub async fn update_achievement(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateAchievementRequest>,
) -> Result<Json<ApiResponse<AchievementDto>>, AdminError> {
    req.validate()?;

    let result = sqlx::query(
        r#"
        UPDATE achievements
        SET name = COALESCE($2, name),
            description = COALESCE($3, description),
            icon_url = COALESCE($4, icon_url),
            points = COALESCE($5, points),
            criteria_type = COALESCE($6, criteria_type),
            criteria_value = COALESCE($7, criteria_value),
            is_active = COALESCE($8, is_active),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(req.name.as_deref().map(str::trim))
    .bind(&req.description)
    .bind(&req.icon_url)
    .bind(req.points)
    .bind(req.criteria_type.map(|c| c.as_str()))
    .bind(req.criteria_value)
    .bind(req.is_active)
    .execute(&state.pool)
    .await
    .map_err(|e| AdminError::from_unique_violation(e, "成就名称已存在"))?;

    if result.rows_affected() == 0 {
        return Err(AdminError::AchievementNotFound(id));
    }

    record_mutation("achievement", "update");
    info!(achievement_id = id, "Achievement updated");

    let dto = fetch_achievement(&state.pool, id).await?;
    Ok(Json(ApiResponse::success_with_message(dto, "成就已更新")))
}

/// 删除成就（学员获得记录随之删除）
///
/// DELETE /admin/achievements/{id}
pub async fn delete_achievement(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, AdminError> {
    let result = sqlx::query("DELETE FROM achievements WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AdminError::AchievementNotFound(id));
    }

    record_mutation("achievement", "delete");
    info!(achievement_id = id, "Achievement deleted");

    Ok(Json(ApiResponse::success_empty("成就已删除")))
}

/// 切换成就启用状态
///
/// POST /admin/achievements/{id}/toggle-active
pub async fn toggle_achievement_active(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<AchievementDto>>, AdminError> {
    let is_active: bool = sqlx::query_scalar(
        "UPDATE achievements SET is_active = NOT is_active, updated_at = NOW() WHERE id = $1 RETURNING is_active",
    )
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AdminError::AchievementNotFound(id))?;

    record_mutation("achievement", "toggle_active");
    info!(achievement_id = id, is_active, "Achievement active flag toggled");

    let dto = fetch_achievement(&state.pool, id).await?;
    let message = if is_active { "成就已启用" } else { "成就已停用" };
    Ok(Json(ApiResponse::success_with_message(dto, message)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_deserialize() {
        let req: CreateAchievementRequest = serde_json::from_str(
            r#"{"name":"坚持不懈","points":50,"criteriaType":"streak_days","criteriaValue":7}"#,
        )
        .unwrap();
        assert_eq!(req.criteria_type, CriteriaType::StreakDays);
        assert!(req.is_active);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_create_request_validation() {
        let req = CreateAchievementRequest {
            name: "First Course".to_string(),
            description: None,
            icon_url: Some("not a url".to_string()),
            points: 10,
            criteria_type: CriteriaType::CoursesCompleted,
            criteria_value: 0,
            is_active: true,
        };
        let errors = req.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("icon_url"));
        assert!(fields.contains_key("criteria_value"));
    }

    #[test]
    fn test_unknown_criteria_type_rejected() {
        let result = serde_json::from_str::<CreateAchievementRequest>(
            r#"{"name":"x","points":1,"criteriaType":"logins","criteriaValue":1}"#,
        );
        assert!(result.is_err());
    }
}
