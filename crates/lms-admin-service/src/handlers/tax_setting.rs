//! 税率设置 API 处理器
//!
//! 全平台最多一个默认税率：设为默认时在同一事务内清除其他记录的默认标记

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use lms_shared::observability::metrics::record_mutation;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;
use validator::Validate;

use super::country_restriction::validate_country_code;
use crate::{
    dto::{ApiResponse, CreatedResponse, PageResponse, PaginationParams, like_pattern},
    error::AdminError,
    state::AppState,
};

const DEFAULT_EXISTS_MESSAGE: &str = "默认税率已存在";

/// 税率视图
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TaxSettingDto {
    pub id: i64,
    pub name: String,
    pub country_code: String,
    pub region: Option<String>,
    pub rate: f64,
    pub is_inclusive: bool,
    pub is_default: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxSettingQueryFilter {
    pub keyword: Option<String>,
    pub country_code: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaxSettingRequest {
    #[validate(length(min = 1, max = 100, message = "名称长度必须在1-100个字符之间"))]
    pub name: String,
    #[validate(custom(function = "validate_country_code"))]
    pub country_code: String,
    #[validate(length(max = 100, message = "地区不能超过100个字符"))]
    pub region: Option<String>,
    #[validate(range(min = 0.0, max = 100.0, message = "税率必须在0-100之间"))]
    pub rate: f64,
    #[serde(default)]
    pub is_inclusive: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaxSettingRequest {
    #[validate(length(min = 1, max = 100, message = "名称长度必须在1-100个字符之间"))]
    pub name: Option<String>,
    #[validate(custom(function = "validate_country_code"))]
    pub country_code: Option<String>,
    #[validate(length(max = 100, message = "地区不能超过100个字符"))]
    pub region: Option<String>,
    #[validate(range(min = 0.0, max = 100.0, message = "税率必须在0-100之间"))]
    pub rate: Option<f64>,
    pub is_inclusive: Option<bool>,
    pub is_default: Option<bool>,
    pub is_active: Option<bool>,
}

fn default_true() -> bool {
    true
}

const TAX_SELECT_SQL: &str = r#"
    SELECT id, name, country_code, region, rate, is_inclusive, is_default, is_active, created_at, updated_at
    FROM tax_settings
"#;

const TAX_FILTER_SQL: &str = r#"
    WHERE ($1::text IS NULL OR name ILIKE $1 OR region ILIKE $1)
      AND ($2::text IS NULL OR country_code = $2)
      AND ($3::bool IS NULL OR is_active = $3)
"#;

async fn fetch_tax_setting(pool: &PgPool, id: i64) -> Result<TaxSettingDto, AdminError> {
    let sql = format!("{} WHERE id = $1", TAX_SELECT_SQL);
    sqlx::query_as::<_, TaxSettingDto>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AdminError::TaxSettingNotFound(id))
}

/// 清除除 `keep_id` 外所有记录的默认标记
async fn clear_other_defaults(
    tx: &mut Transaction<'_, Postgres>,
    keep_id: Option<i64>,
) -> Result<u64, AdminError> {
    let result = sqlx::query(
        r#"
        UPDATE tax_settings
        SET is_default = FALSE, updated_at = NOW()
        WHERE is_default AND ($1::bigint IS NULL OR id <> $1)
        "#,
    )
    .bind(keep_id)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

/// 获取税率列表
///
/// GET /admin/tax-settings
pub async fn list_tax_settings(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<TaxSettingQueryFilter>,
) -> Result<Json<ApiResponse<PageResponse<TaxSettingDto>>>, AdminError> {
    let page = pagination.resolve(&state.config.pagination, "tax_settings");
    let keyword = like_pattern(filter.keyword.as_deref());
    let country_code = filter
        .country_code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_ascii_uppercase);

    let total: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM tax_settings {}", TAX_FILTER_SQL))
        .bind(&keyword)
        .bind(&country_code)
        .bind(filter.is_active)
        .fetch_one(&state.pool)
        .await?;

    if total.0 == 0 {
        return Ok(Json(ApiResponse::success(PageResponse::empty(page))));
    }

    let sql = format!(
        "{} {} ORDER BY is_default DESC, country_code ASC, name ASC LIMIT $4 OFFSET $5",
        TAX_SELECT_SQL, TAX_FILTER_SQL
    );
    let items = sqlx::query_as::<_, TaxSettingDto>(&sql)
        .bind(&keyword)
        .bind(&country_code)
        .bind(filter.is_active)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(ApiResponse::success(PageResponse::new(items, total.0, page))))
}

/// 获取税率详情
///
/// GET /admin/tax-settings/{id}
pub async fn get_tax_setting(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<TaxSettingDto>>, AdminError> {
    let dto = fetch_tax_setting(&state.pool, id).await?;
    Ok(Json(ApiResponse::success(dto)))
}

/// 创建税率
///
/// POST /admin/tax-settings
pub async fn create_tax_setting(
    State(state): State<AppState>,
    Json(req): Json<CreateTaxSettingRequest>,
) -> Result<Json<ApiResponse<CreatedResponse>>, AdminError> {
    req.validate()?;

    let mut tx = state.pool.begin().await?;
    if req.is_default {
        clear_other_defaults(&mut tx, None).await?;
    }

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO tax_settings (name, country_code, region, rate, is_inclusive, is_default, is_active)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id
        "#,
    )
    .bind(req.name.trim())
    .bind(req.country_code.to_ascii_uppercase())
    .bind(&req.region)
    .bind(req.rate)
    .bind(req.is_inclusive)
    .bind(req.is_default)
    .bind(req.is_active)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| AdminError::from_unique_violation(e, DEFAULT_EXISTS_MESSAGE))?;

    tx.commit().await?;

    record_mutation("tax_setting", "create");
    info!(tax_setting_id = id, is_default = req.is_default, "Tax setting created");

    Ok(Json(ApiResponse::success_with_message(
        CreatedResponse::new(id),
        "税率创建成功",
    )))
}

/// 更新税率
///
/// PUT /admin/tax-settings/{id}
pub async fn update_tax_setting(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateTaxSettingRequest>,
) -> Result<Json<ApiResponse<TaxSettingDto>>, AdminError> {
    req.validate()?;

    let mut tx = state.pool.begin().await?;
    if req.is_default == Some(true) {
        clear_other_defaults(&mut tx, Some(id)).await?;
    }

    let result = sqlx::query(
        r#"
        UPDATE tax_settings
        SET name = COALESCE($2, name),
            country_code = COALESCE($3, country_code),
            region = COALESCE($4, region),
            rate = COALESCE($5, rate),
            is_inclusive = COALESCE($6, is_inclusive),
            is_default = COALESCE($7, is_default),
            is_active = COALESCE($8, is_active),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(req.name.as_deref().map(str::trim))
    .bind(req.country_code.as_deref().map(str::to_ascii_uppercase))
    .bind(&req.region)
    .bind(req.rate)
    .bind(req.is_inclusive)
    .bind(req.is_default)
    .bind(req.is_active)
    .execute(&mut *tx)
    .await
    .map_err(|e| AdminError::from_unique_violation(e, DEFAULT_EXISTS_MESSAGE))?;

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(AdminError::TaxSettingNotFound(id));
    }

    tx.commit().await?;

    record_mutation("tax_setting", "update");
    info!(tax_setting_id = id, "Tax setting updated");

    let dto = fetch_tax_setting(&state.pool, id).await?;
    Ok(Json(ApiResponse::success_with_message(dto, "税率已更新")))
}

/// 设为默认税率
///
/// POST /admin/tax-settings/{id}/set-default
pub async fn set_default_tax_setting(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<TaxSettingDto>>, AdminError> {
    let mut tx = state.pool.begin().await?;

    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM tax_settings WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        tx.rollback().await?;
        return Err(AdminError::TaxSettingNotFound(id));
    }

    let cleared = clear_other_defaults(&mut tx, Some(id)).await?;
    // 并发设置默认税率时由唯一索引兜底
    sqlx::query("UPDATE tax_settings SET is_default = TRUE, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AdminError::from_unique_violation(e, DEFAULT_EXISTS_MESSAGE))?;

    tx.commit().await?;

    record_mutation("tax_setting", "set_default");
    info!(tax_setting_id = id, cleared, "Default tax setting changed");

    let dto = fetch_tax_setting(&state.pool, id).await?;
    let message = format!("已将 {} 设为默认税率", dto.name);
    Ok(Json(ApiResponse::success_with_message(dto, message)))
}

/// 删除税率（默认税率不可删除）
///
/// DELETE /admin/tax-settings/{id}
pub async fn delete_tax_setting(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, AdminError> {
    let is_default: bool = sqlx::query_scalar("SELECT is_default FROM tax_settings WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AdminError::TaxSettingNotFound(id))?;

    if is_default {
        return Err(AdminError::DefaultTaxSettingProtected);
    }

    let result = sqlx::query("DELETE FROM tax_settings WHERE id = $1 AND NOT is_default")
        .bind(id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AdminError::DefaultTaxSettingProtected);
    }

    record_mutation("tax_setting", "delete");
    info!(tax_setting_id = id, "Tax setting deleted");

    Ok(Json(ApiResponse::success_empty("税率已删除")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_defaults() {
        let req: CreateTaxSettingRequest =
            serde_json::from_str(r#"{"name":"VAT","countryCode":"de","rate":19.0}"#).unwrap();
        assert!(req.validate().is_ok());
        assert!(!req.is_default);
        assert!(!req.is_inclusive);
        assert!(req.is_active);
    }

    #[test]
    fn test_rate_bounds() {
        let mut req = CreateTaxSettingRequest {
            name: "GST".to_string(),
            country_code: "SG".to_string(),
            region: None,
            rate: 100.0,
            is_inclusive: true,
            is_default: false,
            is_active: true,
        };
        assert!(req.validate().is_ok());

        req.rate = 100.01;
        assert!(req.validate().is_err());

        req.rate = -1.0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_default_conflict_maps_to_409() {
        let err = AdminError::Duplicate(DEFAULT_EXISTS_MESSAGE.to_string());
        assert_eq!(err.status_code(), axum::http::StatusCode::CONFLICT);
        assert_eq!(err.error_code(), "DUPLICATE");
    }

    #[test]
    fn test_update_rejects_bad_country() {
        let req = UpdateTaxSettingRequest {
            name: None,
            country_code: Some("DEU".to_string()),
            region: None,
            rate: None,
            is_inclusive: None,
            is_default: None,
            is_active: None,
        };
        assert!(req.validate().is_err());
    }
}
