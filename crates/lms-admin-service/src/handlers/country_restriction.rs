//! 国家/地区访问限制 API 处理器
//!
//! 规则分为全站规则（course_id 为空）和课程规则，同一作用域下每个国家只能有一条规则

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use lms_shared::observability::metrics::record_mutation;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::info;
use validator::{Validate, ValidationError};

use crate::{
    dto::{ApiResponse, CreatedResponse, PageResponse, PaginationParams, like_pattern},
    error::AdminError,
    models::{AccessDecision, AccessRule, RestrictionType, evaluate_access},
    state::AppState,
};

/// 访问限制规则视图
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CountryRestrictionDto {
    pub id: i64,
    pub country_code: String,
    pub country_name: String,
    pub restriction_type: RestrictionType,
    pub course_id: Option<i64>,
    pub course_title: Option<String>,
    pub reason: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountryRestrictionQueryFilter {
    pub keyword: Option<String>,
    pub restriction_type: Option<RestrictionType>,
    pub course_id: Option<i64>,
    pub is_active: Option<bool>,
}

/// ISO 3166-1 alpha-2 国家代码（大小写不敏感）
pub fn validate_country_code(code: &str) -> Result<(), ValidationError> {
    if code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(())
    } else {
        Err(ValidationError::new("country_code").with_message("国家代码必须是两位字母".into()))
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCountryRestrictionRequest {
    #[validate(custom(function = "validate_country_code"))]
    pub country_code: String,
    #[validate(length(min = 1, max = 100, message = "国家名称长度必须在1-100个字符之间"))]
    pub country_name: String,
    pub restriction_type: RestrictionType,
    pub course_id: Option<i64>,
    #[validate(length(max = 500, message = "原因不能超过500个字符"))]
    pub reason: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCountryRestrictionRequest {
    #[validate(length(min = 1, max = 100, message = "国家名称长度必须在1-100个字符之间"))]
    pub country_name: Option<String>,
    pub restriction_type: Option<RestrictionType>,
    #[validate(length(max = 500, message = "原因不能超过500个字符"))]
    pub reason: Option<String>,
    pub is_active: Option<bool>,
}

fn default_true() -> bool {
    true
}

/// 访问检查参数
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessCheckQuery {
    pub country_code: String,
    pub course_id: Option<i64>,
}

const RESTRICTION_SELECT_SQL: &str = r#"
    SELECT
        r.id, r.country_code, r.country_name, r.restriction_type, r.course_id,
        co.title AS course_title, r.reason, r.is_active, r.created_at, r.updated_at
    FROM country_restrictions r
    LEFT JOIN courses co ON co.id = r.course_id
"#;

const RESTRICTION_FILTER_SQL: &str = r#"
    WHERE ($1::text IS NULL OR r.country_code ILIKE $1 OR r.country_name ILIKE $1)
      AND ($2::text IS NULL OR r.restriction_type = $2)
      AND ($3::bigint IS NULL OR r.course_id = $3)
      AND ($4::bool IS NULL OR r.is_active = $4)
"#;

async fn fetch_restriction(pool: &PgPool, id: i64) -> Result<CountryRestrictionDto, AdminError> {
    let sql = format!("{} WHERE r.id = $1", RESTRICTION_SELECT_SQL);
    sqlx::query_as::<_, CountryRestrictionDto>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AdminError::CountryRestrictionNotFound(id))
}

/// 获取访问限制规则列表
///
/// GET /admin/country-restrictions
pub async fn list_country_restrictions(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<CountryRestrictionQueryFilter>,
) -> Result<Json<ApiResponse<PageResponse<CountryRestrictionDto>>>, AdminError> {
    let page = pagination.resolve(&state.config.pagination, "country_restrictions");
    let keyword = like_pattern(filter.keyword.as_deref());
    let restriction_type = filter.restriction_type.map(|t| t.as_str());

    let total: (i64,) = sqlx::query_as(&format!(
        "SELECT COUNT(*) FROM country_restrictions r {}",
        RESTRICTION_FILTER_SQL
    ))
    .bind(&keyword)
    .bind(restriction_type)
    .bind(filter.course_id)
    .bind(filter.is_active)
    .fetch_one(&state.pool)
    .await?;

    if total.0 == 0 {
        return Ok(Json(ApiResponse::success(PageResponse::empty(page))));
    }

    let sql = format!(
        "{} {} ORDER BY r.country_code ASC, r.course_id NULLS FIRST LIMIT $5 OFFSET $6",
        RESTRICTION_SELECT_SQL, RESTRICTION_FILTER_SQL
    );
    let items = sqlx::query_as::<_, CountryRestrictionDto>(&sql)
        .bind(&keyword)
        .bind(restriction_type)
        .bind(filter.course_id)
        .bind(filter.is_active)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(ApiResponse::success(PageResponse::new(items, total.0, page))))
}

/// 获取访问限制规则详情
///
/// GET /admin/country-restrictions/{id}
pub async fn get_country_restriction(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<CountryRestrictionDto>>, AdminError> {
    let dto = fetch_restriction(&state.pool, id).await?;
    Ok(Json(ApiResponse::success(dto)))
}

/// 创建访问限制规则
///
/// POST /admin/country-restrictions
pub async fn create_country_restriction(
    State(state): State<AppState>,
    Json(req): Json<CreateCountryRestrictionRequest>,
) -> Result<Json<ApiResponse<CreatedResponse>>, AdminError> {
    req.validate()?;

    if let Some(course_id) = req.course_id {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM courses WHERE id = $1)")
            .bind(course_id)
            .fetch_one(&state.pool)
            .await?;
        if !exists {
            return Err(AdminError::CourseNotFound(course_id));
        }
    }

    let country_code = req.country_code.to_ascii_uppercase();
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO country_restrictions (country_code, country_name, restriction_type, course_id, reason, is_active)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id
        "#,
    )
    .bind(&country_code)
    .bind(req.country_name.trim())
    .bind(req.restriction_type)
    .bind(req.course_id)
    .bind(&req.reason)
    .bind(req.is_active)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| {
        AdminError::from_unique_violation(e, format!("{} 在该范围内已有限制规则", country_code))
    })?;

    record_mutation("country_restriction", "create");
    info!(restriction_id = id, country_code = %country_code, course_id = ?req.course_id, "Country restriction created");

    Ok(Json(ApiResponse::success_with_message(
        CreatedResponse::new(id),
        format!("已添加 {} 的访问限制", req.country_name),
    )))
}

/// 更新访问限制规则
///
/// PUT /admin/country-restrictions/{id}
pub async fn update_country_restriction(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateCountryRestrictionRequest>,
) -> Result<Json<ApiResponse<CountryRestrictionDto>>, AdminError> {
    req.validate()?;

    let result = sqlx::query(
        r#"
        UPDATE country_restrictions
        SET country_name = COALESCE($2, country_name),
            restriction_type = COALESCE($3, restriction_type),
            reason = COALESCE($4, reason),
            is_active = COALESCE($5, is_active),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(req.country_name.as_deref().map(str::trim))
    .bind(req.restriction_type.map(|t| t.as_str()))
    .bind(&req.reason)
    .bind(req.is_active)
    .execute(&state.pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AdminError::CountryRestrictionNotFound(id));
    }

    record_mutation("country_restriction", "update");
    info!(restriction_id = id, "Country restriction updated");

    let dto = fetch_restriction(&state.pool, id).await?;
    Ok(Json(ApiResponse::success_with_message(dto, "访问限制已更新")))
}

/// 删除访问限制规则
///
/// DELETE /admin/country-restrictions/{id}
pub async fn delete_country_restriction(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, AdminError> {
    let result = sqlx::query("DELETE FROM country_restrictions WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AdminError::CountryRestrictionNotFound(id));
    }

    record_mutation("country_restriction", "delete");
    info!(restriction_id = id, "Country restriction deleted");

    Ok(Json(ApiResponse::success_empty("访问限制已删除")))
}

/// 切换规则启用状态
///
/// POST /admin/country-restrictions/{id}/toggle-active
pub async fn toggle_country_restriction_active(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<CountryRestrictionDto>>, AdminError> {
    let is_active: bool = sqlx::query_scalar(
        "UPDATE country_restrictions SET is_active = NOT is_active, updated_at = NOW() WHERE id = $1 RETURNING is_active",
    )
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AdminError::CountryRestrictionNotFound(id))?;

    record_mutation("country_restriction", "toggle_active");
    info!(restriction_id = id, is_active, "Country restriction toggled");

    let dto = fetch_restriction(&state.pool, id).await?;
    let message = if is_active { "访问限制已启用" } else { "访问限制已停用" };
    Ok(Json(ApiResponse::success_with_message(dto, message)))
}

#[derive(sqlx::FromRow)]
struct AccessRuleRow {
    country_code: String,
    restriction_type: RestrictionType,
    course_id: Option<i64>,
    reason: Option<String>,
}

impl From<AccessRuleRow> for AccessRule {
    fn from(row: AccessRuleRow) -> Self {
        Self {
            country_code: row.country_code,
            restriction_type: row.restriction_type,
            course_id: row.course_id,
            reason: row.reason,
        }
    }
}

/// 检查国家是否可访问（全站 + 课程规则）
///
/// GET /admin/country-restrictions/check
pub async fn check_country_access(
    State(state): State<AppState>,
    Query(query): Query<AccessCheckQuery>,
) -> Result<Json<ApiResponse<AccessDecision>>, AdminError> {
    validate_country_code(&query.country_code)
        .map_err(|_| AdminError::Validation("国家代码必须是两位字母".to_string()))?;

    let rules: Vec<AccessRule> = sqlx::query_as::<_, AccessRuleRow>(
        r#"
        SELECT country_code, restriction_type, course_id, reason
        FROM country_restrictions
        WHERE is_active
          AND (course_id IS NULL OR course_id = $1)
        "#,
    )
    .bind(query.course_id)
    .fetch_all(&state.pool)
    .await?
    .into_iter()
    .map(Into::into)
    .collect();

    let decision = evaluate_access(&query.country_code, &rules);
    Ok(Json(ApiResponse::success(decision)))
}
