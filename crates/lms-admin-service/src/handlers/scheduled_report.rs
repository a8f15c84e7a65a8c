//! 定时报表 API 处理器
//!
//! 创建、修改和启用报表时根据调度配置重新计算 next_run_at，
//! 实际生成逻辑在 [`crate::report`] 中，与后台 worker 共用。

use axum::{
    Json,
    extract::{Path, Query, State},
    response::Response,
};
use chrono::{DateTime, Utc};
use lms_shared::observability::metrics::{record_csv_export, record_mutation};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, warn};
use validator::{Validate, ValidateEmail, ValidationError};

use crate::{
    dto::{ApiResponse, CreatedResponse, PageResponse, PaginationParams, like_pattern},
    error::AdminError,
    export::csv_download,
    models::{ReportFrequency, ReportRunStatus, ReportSchedule, ReportType},
    report::{self, RunOutcome},
    state::AppState,
};

const RECENT_RUNS: i64 = 10;

fn default_send_hour() -> u32 {
    6
}

fn default_true() -> bool {
    true
}

/// 收件人邮箱校验
fn validate_recipients(recipients: &[String]) -> Result<(), ValidationError> {
    if recipients.iter().all(|r| r.validate_email()) {
        Ok(())
    } else {
        Err(ValidationError::new("recipients").with_message("收件人必须是有效的邮箱地址".into()))
    }
}

#[derive(sqlx::FromRow)]
struct ScheduledReportRow {
    id: i64,
    name: String,
    report_type: ReportType,
    frequency: ReportFrequency,
    send_hour: i32,
    day_of_week: Option<i32>,
    day_of_month: Option<i32>,
    cron_expression: Option<String>,
    recipients: sqlx::types::Json<Vec<String>>,
    is_active: bool,
    last_run_at: Option<DateTime<Utc>>,
    next_run_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledReportDto {
    pub id: i64,
    pub name: String,
    pub report_type: ReportType,
    pub frequency: ReportFrequency,
    pub send_hour: i32,
    pub day_of_week: Option<i32>,
    pub day_of_month: Option<i32>,
    pub cron_expression: Option<String>,
    pub recipients: Vec<String>,
    pub is_active: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ScheduledReportRow> for ScheduledReportDto {
    fn from(row: ScheduledReportRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            report_type: row.report_type,
            frequency: row.frequency,
            send_hour: row.send_hour,
            day_of_week: row.day_of_week,
            day_of_month: row.day_of_month,
            cron_expression: row.cron_expression,
            recipients: row.recipients.0,
            is_active: row.is_active,
            last_run_at: row.last_run_at,
            next_run_at: row.next_run_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// 运行记录（不含 CSV 内容）
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReportRunDto {
    pub id: i64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub status: ReportRunStatus,
    pub row_count: i32,
    pub error_message: Option<String>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledReportDetailDto {
    #[serde(flatten)]
    pub report: ScheduledReportDto,
    pub recent_runs: Vec<ReportRunDto>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledReportQueryFilter {
    pub report_type: Option<ReportType>,
    pub is_active: Option<bool>,
    pub keyword: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateScheduledReportRequest {
    #[validate(length(min = 1, max = 100, message = "报表名称长度必须在1-100个字符之间"))]
    pub name: String,
    pub report_type: ReportType,
    pub frequency: ReportFrequency,
    #[serde(default = "default_send_hour")]
    pub send_hour: u32,
    pub day_of_week: Option<u32>,
    pub day_of_month: Option<u32>,
    #[validate(length(max = 100, message = "cron 表达式不能超过100个字符"))]
    pub cron_expression: Option<String>,
    #[validate(
        length(min = 1, max = 20, message = "收件人数量必须在1-20之间"),
        custom(function = "validate_recipients")
    )]
    pub recipients: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl CreateScheduledReportRequest {
    fn schedule(&self) -> ReportSchedule {
        ReportSchedule {
            frequency: self.frequency,
            send_hour: self.send_hour,
            day_of_week: self.day_of_week,
            day_of_month: self.day_of_month,
            cron_expression: self.cron_expression.clone(),
        }
    }
}

/// 部分更新，未提供的字段保持原值
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateScheduledReportRequest {
    #[validate(length(min = 1, max = 100, message = "报表名称长度必须在1-100个字符之间"))]
    pub name: Option<String>,
    pub report_type: Option<ReportType>,
    pub frequency: Option<ReportFrequency>,
    pub send_hour: Option<u32>,
    pub day_of_week: Option<u32>,
    pub day_of_month: Option<u32>,
    #[validate(length(max = 100, message = "cron 表达式不能超过100个字符"))]
    pub cron_expression: Option<String>,
    #[validate(
        length(min = 1, max = 20, message = "收件人数量必须在1-20之间"),
        custom(function = "validate_recipients")
    )]
    pub recipients: Option<Vec<String>>,
}

impl UpdateScheduledReportRequest {
    fn merged_schedule(&self, current: &ScheduledReportDto) -> ReportSchedule {
        let to_u32 = |v: i32| u32::try_from(v).unwrap_or(u32::MAX);
        ReportSchedule {
            frequency: self.frequency.unwrap_or(current.frequency),
            send_hour: self.send_hour.unwrap_or_else(|| to_u32(current.send_hour)),
            day_of_week: self.day_of_week.or(current.day_of_week.map(to_u32)),
            day_of_month: self.day_of_month.or(current.day_of_month.map(to_u32)),
            cron_expression: self
                .cron_expression
                .clone()
                .or_else(|| current.cron_expression.clone()),
        }
    }
}

const REPORT_SELECT_SQL: &str = r#"
    SELECT id, name, report_type, frequency, send_hour, day_of_week, day_of_month,
           cron_expression, recipients, is_active, last_run_at, next_run_at, created_at, updated_at
    FROM scheduled_reports
"#;

const REPORT_FILTER_SQL: &str = r#"
    WHERE ($1::text IS NULL OR report_type = $1)
      AND ($2::bool IS NULL OR is_active = $2)
      AND ($3::text IS NULL OR name ILIKE $3)
"#;

async fn fetch_report(pool: &PgPool, id: i64) -> Result<ScheduledReportDto, AdminError> {
    let sql = format!("{} WHERE id = $1", REPORT_SELECT_SQL);
    sqlx::query_as::<_, ScheduledReportRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .map(ScheduledReportDto::from)
        .ok_or(AdminError::ScheduledReportNotFound(id))
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// 获取定时报表列表
///
/// GET /admin/scheduled-reports
pub async fn list_scheduled_reports(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<ScheduledReportQueryFilter>,
) -> Result<Json<ApiResponse<PageResponse<ScheduledReportDto>>>, AdminError> {
    let page = pagination.resolve(&state.config.pagination, "scheduled_reports");
    let keyword = like_pattern(filter.keyword.as_deref());
    let report_type = filter.report_type.map(|t| t.as_str());

    let count_sql = format!("SELECT COUNT(*) FROM scheduled_reports {}", REPORT_FILTER_SQL);
    let total: (i64,) = sqlx::query_as(&count_sql)
        .bind(report_type)
        .bind(filter.is_active)
        .bind(&keyword)
        .fetch_one(&state.pool)
        .await?;

    if total.0 == 0 {
        return Ok(Json(ApiResponse::success(PageResponse::empty(page))));
    }

    let sql = format!(
        "{} {} ORDER BY created_at DESC, id DESC LIMIT $4 OFFSET $5",
        REPORT_SELECT_SQL, REPORT_FILTER_SQL
    );
    let rows = sqlx::query_as::<_, ScheduledReportRow>(&sql)
        .bind(report_type)
        .bind(filter.is_active)
        .bind(&keyword)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&state.pool)
        .await?;

    let items = rows.into_iter().map(ScheduledReportDto::from).collect();
    Ok(Json(ApiResponse::success(PageResponse::new(items, total.0, page))))
}

/// 获取定时报表详情（含最近 10 次运行）
///
/// GET /admin/scheduled-reports/{id}
pub async fn get_scheduled_report(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<ScheduledReportDetailDto>>, AdminError> {
    let report = fetch_report(&state.pool, id).await?;

    let recent_runs = sqlx::query_as::<_, ReportRunDto>(
        r#"
        SELECT id, period_start, period_end, status, row_count, error_message, generated_at
        FROM report_runs
        WHERE report_id = $1
        ORDER BY generated_at DESC, id DESC
        LIMIT $2
        "#,
    )
    .bind(id)
    .bind(RECENT_RUNS)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(ScheduledReportDetailDto {
        report,
        recent_runs,
    })))
}

/// 创建定时报表
///
/// POST /admin/scheduled-reports
pub async fn create_scheduled_report(
    State(state): State<AppState>,
    Json(req): Json<CreateScheduledReportRequest>,
) -> Result<Json<ApiResponse<CreatedResponse>>, AdminError> {
    req.validate()?;
    let schedule = req.schedule();
    let next_run_at = if req.is_active {
        Some(schedule.next_run_after(Utc::now())?)
    } else {
        schedule.validate()?;
        None
    };

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO scheduled_reports
            (name, report_type, frequency, send_hour, day_of_week, day_of_month,
             cron_expression, recipients, is_active, next_run_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING id
        "#,
    )
    .bind(&req.name)
    .bind(req.report_type.as_str())
    .bind(req.frequency.as_str())
    .bind(to_i32(schedule.send_hour))
    .bind(schedule.day_of_week.map(to_i32))
    .bind(schedule.day_of_month.map(to_i32))
    .bind(&schedule.cron_expression)
    .bind(sqlx::types::Json(&req.recipients))
    .bind(req.is_active)
    .bind(next_run_at)
    .fetch_one(&state.pool)
    .await?;

    record_mutation("scheduled_report", "create");
    info!(report_id = id, name = %req.name, next_run_at = ?next_run_at, "Scheduled report created");

    Ok(Json(ApiResponse::success_with_message(
        CreatedResponse::new(id),
        "定时报表创建成功",
    )))
}

/// 更新定时报表，调度变更时重新计算下次运行时间
///
/// PUT /admin/scheduled-reports/{id}
pub async fn update_scheduled_report(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateScheduledReportRequest>,
) -> Result<Json<ApiResponse<ScheduledReportDto>>, AdminError> {
    req.validate()?;

    let current = fetch_report(&state.pool, id).await?;
    let schedule = req.merged_schedule(&current);
    let next_run_at = if current.is_active {
        Some(schedule.next_run_after(Utc::now())?)
    } else {
        schedule.validate()?;
        None
    };

    let result = sqlx::query(
        r#"
        UPDATE scheduled_reports
        SET name = COALESCE($2, name),
            report_type = COALESCE($3, report_type),
            frequency = $4,
            send_hour = $5,
            day_of_week = $6,
            day_of_month = $7,
            cron_expression = $8,
            recipients = COALESCE($9, recipients),
            next_run_at = $10,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(&req.name)
    .bind(req.report_type.map(|t| t.as_str()))
    .bind(schedule.frequency.as_str())
    .bind(to_i32(schedule.send_hour))
    .bind(schedule.day_of_week.map(to_i32))
    .bind(schedule.day_of_month.map(to_i32))
    .bind(&schedule.cron_expression)
    .bind(req.recipients.as_ref().map(sqlx::types::Json))
    .bind(next_run_at)
    .execute(&state.pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AdminError::ScheduledReportNotFound(id));
    }

    record_mutation("scheduled_report", "update");
    info!(report_id = id, next_run_at = ?next_run_at, "Scheduled report updated");

    let dto = fetch_report(&state.pool, id).await?;
    Ok(Json(ApiResponse::success_with_message(dto, "定时报表更新成功")))
}

/// 删除定时报表（运行记录级联删除）
///
/// DELETE /admin/scheduled-reports/{id}
pub async fn delete_scheduled_report(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, AdminError> {
    let result = sqlx::query("DELETE FROM scheduled_reports WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AdminError::ScheduledReportNotFound(id));
    }

    record_mutation("scheduled_report", "delete");
    info!(report_id = id, "Scheduled report deleted");

    Ok(Json(ApiResponse::success_empty("定时报表已删除")))
}

/// 切换启用状态，启用时重新计算下次运行时间
///
/// POST /admin/scheduled-reports/{id}/toggle-active
pub async fn toggle_scheduled_report_active(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<ScheduledReportDto>>, AdminError> {
    let current = fetch_report(&state.pool, id).await?;
    let activate = !current.is_active;

    let next_run_at = if activate {
        let to_u32 = |v: i32| u32::try_from(v).unwrap_or(u32::MAX);
        let schedule = ReportSchedule {
            frequency: current.frequency,
            send_hour: to_u32(current.send_hour),
            day_of_week: current.day_of_week.map(to_u32),
            day_of_month: current.day_of_month.map(to_u32),
            cron_expression: current.cron_expression.clone(),
        };
        Some(schedule.next_run_after(Utc::now())?)
    } else {
        None
    };

    let result = sqlx::query(
        "UPDATE scheduled_reports SET is_active = $2, next_run_at = $3, updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .bind(activate)
    .bind(next_run_at)
    .execute(&state.pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AdminError::ScheduledReportNotFound(id));
    }

    record_mutation("scheduled_report", "toggle");
    info!(report_id = id, is_active = activate, "Scheduled report toggled");

    let dto = fetch_report(&state.pool, id).await?;
    let message = if activate { "定时报表已启用" } else { "定时报表已停用" };
    Ok(Json(ApiResponse::success_with_message(dto, message)))
}

/// 立即生成一次报表
///
/// POST /admin/scheduled-reports/{id}/run
pub async fn run_scheduled_report_now(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<RunOutcome>>, AdminError> {
    let outcome = report::generate_now(&state.pool, state.report_source.as_ref(), id).await?;

    record_mutation("scheduled_report", "run");
    let message = match outcome.status {
        ReportRunStatus::Succeeded => format!("报表已生成，共 {} 行", outcome.row_count),
        ReportRunStatus::Failed => {
            warn!(report_id = id, run_id = outcome.run_id, "Manual report run failed");
            "报表生成失败，请查看运行记录".to_string()
        }
    };

    Ok(Json(ApiResponse::success_with_message(outcome, message)))
}

#[derive(sqlx::FromRow)]
struct RunDownloadRow {
    report_name: String,
    status: ReportRunStatus,
    content: Option<String>,
    generated_at: DateTime<Utc>,
}

/// 下载某次运行生成的 CSV
///
/// GET /admin/scheduled-reports/{id}/runs/{run_id}/download
pub async fn download_report_run(
    State(state): State<AppState>,
    Path((id, run_id)): Path<(i64, i64)>,
) -> Result<Response, AdminError> {
    let run = sqlx::query_as::<_, RunDownloadRow>(
        r#"
        SELECT s.name AS report_name, r.status, r.content, r.generated_at
        FROM report_runs r
        JOIN scheduled_reports s ON s.id = r.report_id
        WHERE r.id = $1 AND r.report_id = $2
        "#,
    )
    .bind(run_id)
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AdminError::ReportRunNotFound(run_id))?;

    let content = match (run.status, run.content) {
        (ReportRunStatus::Succeeded, Some(content)) => content,
        _ => {
            return Err(AdminError::NotFound(format!(
                "运行记录 {} 生成失败，没有可下载的文件",
                run_id
            )));
        }
    };

    record_csv_export("scheduled_report", content.lines().count().saturating_sub(1));
    let filename = run_filename(&run.report_name, run.generated_at);
    Ok(csv_download(&filename, content))
}

/// 下载文件名，非 ASCII 字母数字统一替换为 `-`
fn run_filename(report_name: &str, generated_at: DateTime<Utc>) -> String {
    let slug: String = report_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "report" } else { slug };
    format!("{}-{}.csv", slug, generated_at.format("%Y%m%d%H%M"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn create_request(json: &str) -> CreateScheduledReportRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_create_request_defaults() {
        let req = create_request(
            r#"{"name":"周收入","reportType":"revenue","frequency":"weekly","dayOfWeek":1,"recipients":["ops@example.com"]}"#,
        );
        assert_eq!(req.send_hour, 6);
        assert!(req.is_active);
        assert!(req.validate().is_ok());
        assert!(req.schedule().validate().is_ok());
    }

    #[test]
    fn test_create_request_recipients() {
        let none = create_request(
            r#"{"name":"日报","reportType":"enrollments","frequency":"daily","recipients":[]}"#,
        );
        assert!(none.validate().is_err());

        let bad = create_request(
            r#"{"name":"日报","reportType":"enrollments","frequency":"daily","recipients":["not-an-email"]}"#,
        );
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_custom_frequency_requires_cron() {
        let req = create_request(
            r#"{"name":"自定义","reportType":"commissions","frequency":"custom","recipients":["a@example.com"]}"#,
        );
        assert!(req.validate().is_ok());
        assert!(matches!(
            req.schedule().validate(),
            Err(AdminError::InvalidCronExpression(_))
        ));
    }

    #[test]
    fn test_merged_schedule_keeps_existing_fields() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let current = ScheduledReportDto {
            id: 1,
            name: "月报".to_string(),
            report_type: ReportType::CoursePerformance,
            frequency: ReportFrequency::Monthly,
            send_hour: 8,
            day_of_week: None,
            day_of_month: Some(5),
            cron_expression: None,
            recipients: vec!["a@example.com".to_string()],
            is_active: true,
            last_run_at: None,
            next_run_at: None,
            created_at: now,
            updated_at: now,
        };

        let req = UpdateScheduledReportRequest {
            send_hour: Some(9),
            ..Default::default()
        };
        let schedule = req.merged_schedule(&current);
        assert_eq!(schedule.frequency, ReportFrequency::Monthly);
        assert_eq!(schedule.send_hour, 9);
        assert_eq!(schedule.day_of_month, Some(5));
        assert_eq!(
            schedule.next_run_after(now).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 5, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_run_filename() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap();
        assert_eq!(run_filename("Weekly Revenue", at), "weekly-revenue-202403010600.csv");
        assert_eq!(run_filename("周报", at), "report-202403010600.csv");
    }
}
