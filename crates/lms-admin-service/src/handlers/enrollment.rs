//! 选课管理 API 处理器
//!
//! 选课列表、统计、手动选课、状态与进度调整以及 CSV 导出

use axum::{
    Json,
    extract::{Path, Query, State},
    response::Response,
};
use chrono::{DateTime, Utc};
use lms_shared::observability::metrics::{record_csv_export, record_mutation};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, instrument};
use validator::Validate;

use crate::{
    dto::{
        ApiResponse, CreatedResponse, DateRangeParams, PageResponse, PaginationParams,
        like_pattern,
    },
    error::AdminError,
    export::{CsvWriter, csv_download, format_cents, opt},
    models::EnrollmentStatus,
    state::AppState,
};

/// 选课视图（含学员与课程信息）
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentDto {
    pub id: i64,
    pub user_id: i64,
    pub student_name: String,
    pub student_email: String,
    pub course_id: i64,
    pub course_title: String,
    pub status: EnrollmentStatus,
    pub progress_percent: i32,
    pub amount_paid_cents: i64,
    pub enrolled_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentQueryFilter {
    pub keyword: Option<String>,
    pub course_id: Option<i64>,
    pub user_id: Option<i64>,
    pub status: Option<EnrollmentStatus>,
}

/// 选课统计（基于过滤后的集合）
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentStats {
    pub total: i64,
    pub active: i64,
    pub completed: i64,
    pub suspended: i64,
    pub average_progress: f64,
}

/// 手动选课请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateEnrollmentRequest {
    pub user_id: i64,
    pub course_id: i64,
    #[validate(range(min = 0, message = "支付金额不能为负数"))]
    #[serde(default)]
    pub amount_paid_cents: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEnrollmentStatusRequest {
    pub status: EnrollmentStatus,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProgressRequest {
    #[validate(range(min = 0, max = 100, message = "进度必须在0-100之间"))]
    pub progress_percent: i32,
}

const ENROLLMENT_SELECT_SQL: &str = r#"
    SELECT
        e.id, e.user_id, u.full_name AS student_name, u.email AS student_email,
        e.course_id, c.title AS course_title, e.status, e.progress_percent,
        e.amount_paid_cents, e.enrolled_at, e.completed_at, e.last_accessed_at, e.expires_at
    FROM enrollments e
    JOIN users u ON u.id = e.user_id
    JOIN courses c ON c.id = e.course_id
"#;

const ENROLLMENT_FROM_SQL: &str = r#"
    FROM enrollments e
    JOIN users u ON u.id = e.user_id
    JOIN courses c ON c.id = e.course_id
"#;

const ENROLLMENT_FILTER_SQL: &str = r#"
    WHERE ($1::text IS NULL OR u.full_name ILIKE $1 OR u.email ILIKE $1 OR c.title ILIKE $1)
      AND ($2::bigint IS NULL OR e.course_id = $2)
      AND ($3::bigint IS NULL OR e.user_id = $3)
      AND ($4::text IS NULL OR e.status = $4)
      AND ($5::timestamptz IS NULL OR e.enrolled_at >= $5)
      AND ($6::timestamptz IS NULL OR e.enrolled_at < $6)
"#;

/// 已解析的过滤参数，列表、统计、导出共用
struct EnrollmentFilterArgs {
    keyword: Option<String>,
    course_id: Option<i64>,
    user_id: Option<i64>,
    status: Option<&'static str>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

impl EnrollmentFilterArgs {
    fn new(filter: &EnrollmentQueryFilter, range: &DateRangeParams) -> Result<Self, AdminError> {
        range.validate()?;
        Ok(Self {
            keyword: like_pattern(filter.keyword.as_deref()),
            course_id: filter.course_id,
            user_id: filter.user_id,
            status: filter.status.map(|s| s.as_str()),
            start: range.start_time(),
            end: range.end_time_exclusive(),
        })
    }
}

macro_rules! bind_enrollment_filter {
    ($query:expr, $args:expr) => {
        $query
            .bind(&$args.keyword)
            .bind($args.course_id)
            .bind($args.user_id)
            .bind($args.status)
            .bind($args.start)
            .bind($args.end)
    };
}

async fn fetch_enrollment(pool: &PgPool, id: i64) -> Result<EnrollmentDto, AdminError> {
    let sql = format!("{} WHERE e.id = $1", ENROLLMENT_SELECT_SQL);
    sqlx::query_as::<_, EnrollmentDto>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AdminError::EnrollmentNotFound(id))
}

/// 获取选课列表
///
/// GET /admin/enrollments
pub async fn list_enrollments(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<EnrollmentQueryFilter>,
    Query(range): Query<DateRangeParams>,
) -> Result<Json<ApiResponse<PageResponse<EnrollmentDto>>>, AdminError> {
    let args = EnrollmentFilterArgs::new(&filter, &range)?;
    let page = pagination.resolve(&state.config.pagination, "enrollments");

    let count_sql = format!("SELECT COUNT(*) {} {}", ENROLLMENT_FROM_SQL, ENROLLMENT_FILTER_SQL);
    let total: (i64,) = bind_enrollment_filter!(sqlx::query_as(&count_sql), args)
        .fetch_one(&state.pool)
        .await?;

    if total.0 == 0 {
        return Ok(Json(ApiResponse::success(PageResponse::empty(page))));
    }

    let sql = format!(
        "{} {} ORDER BY e.enrolled_at DESC LIMIT $7 OFFSET $8",
        ENROLLMENT_SELECT_SQL, ENROLLMENT_FILTER_SQL
    );
    let items = bind_enrollment_filter!(sqlx::query_as::<_, EnrollmentDto>(&sql), args)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(ApiResponse::success(PageResponse::new(items, total.0, page))))
}

/// 选课统计
///
/// GET /admin/enrollments/stats
#[instrument(skip(state))]
pub async fn enrollment_stats(
    State(state): State<AppState>,
    Query(filter): Query<EnrollmentQueryFilter>,
    Query(range): Query<DateRangeParams>,
) -> Result<Json<ApiResponse<EnrollmentStats>>, AdminError> {
    let args = EnrollmentFilterArgs::new(&filter, &range)?;

    let sql = format!(
        r#"
        SELECT
            COUNT(*) AS total,
            COUNT(*) FILTER (WHERE e.status = 'active') AS active,
            COUNT(*) FILTER (WHERE e.status = 'completed') AS completed,
            COUNT(*) FILTER (WHERE e.status = 'suspended') AS suspended,
            COALESCE(ROUND(AVG(e.progress_percent), 2), 0)::float8 AS average_progress
        {} {}
        "#,
        ENROLLMENT_FROM_SQL, ENROLLMENT_FILTER_SQL
    );
    let stats = bind_enrollment_filter!(sqlx::query_as::<_, EnrollmentStats>(&sql), args)
        .fetch_one(&state.pool)
        .await?;

    Ok(Json(ApiResponse::success(stats)))
}

/// 获取选课详情
///
/// GET /admin/enrollments/{id}
pub async fn get_enrollment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<EnrollmentDto>>, AdminError> {
    let dto = fetch_enrollment(&state.pool, id).await?;
    Ok(Json(ApiResponse::success(dto)))
}

/// 手动为学员选课
///
/// POST /admin/enrollments
pub async fn create_enrollment(
    State(state): State<AppState>,
    Json(req): Json<CreateEnrollmentRequest>,
) -> Result<Json<ApiResponse<CreatedResponse>>, AdminError> {
    req.validate()?;

    let user_exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
        .bind(req.user_id)
        .fetch_one(&state.pool)
        .await?;
    if !user_exists {
        return Err(AdminError::UserNotFound(req.user_id));
    }

    let course_exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM courses WHERE id = $1)")
        .bind(req.course_id)
        .fetch_one(&state.pool)
        .await?;
    if !course_exists {
        return Err(AdminError::CourseNotFound(req.course_id));
    }

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO enrollments (user_id, course_id, status, amount_paid_cents, expires_at)
        VALUES ($1, $2, 'active', $3, $4)
        RETURNING id
        "#,
    )
    .bind(req.user_id)
    .bind(req.course_id)
    .bind(req.amount_paid_cents)
    .bind(req.expires_at)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| AdminError::from_unique_violation(e, "该学员已选修此课程"))?;

    record_mutation("enrollment", "create");
    info!(enrollment_id = id, user_id = req.user_id, course_id = req.course_id, "Enrollment created");

    Ok(Json(ApiResponse::success_with_message(
        CreatedResponse::new(id),
        "选课成功",
    )))
}

/// 更新选课状态
///
/// 设为 completed 时记录完成时间，离开 completed 时清空
///
/// PUT /admin/enrollments/{id}/status
pub async fn update_enrollment_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateEnrollmentStatusRequest>,
) -> Result<Json<ApiResponse<EnrollmentDto>>, AdminError> {
    let result = sqlx::query(
        r#"
        UPDATE enrollments
        SET status = $2,
            completed_at = CASE
                WHEN $2 = 'completed' THEN COALESCE(completed_at, NOW())
                ELSE NULL
            END,
            progress_percent = CASE WHEN $2 = 'completed' THEN 100 ELSE progress_percent END
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(req.status.as_str())
    .execute(&state.pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AdminError::EnrollmentNotFound(id));
    }

    record_mutation("enrollment", "update_status");
    info!(enrollment_id = id, status = req.status.as_str(), "Enrollment status updated");

    let dto = fetch_enrollment(&state.pool, id).await?;
    Ok(Json(ApiResponse::success_with_message(
        dto,
        format!("选课状态已更新为「{}」", req.status.label()),
    )))
}

/// 更新学习进度（达到 100 自动完成）
///
/// PUT /admin/enrollments/{id}/progress
pub async fn update_enrollment_progress(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateProgressRequest>,
) -> Result<Json<ApiResponse<EnrollmentDto>>, AdminError> {
    req.validate()?;

    let result = sqlx::query(
        r#"
        UPDATE enrollments
        SET progress_percent = $2,
            status = CASE WHEN $2 = 100 THEN 'completed' ELSE status END,
            completed_at = CASE WHEN $2 = 100 THEN COALESCE(completed_at, NOW()) ELSE completed_at END,
            last_accessed_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(req.progress_percent)
    .execute(&state.pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AdminError::EnrollmentNotFound(id));
    }

    record_mutation("enrollment", "update_progress");
    info!(enrollment_id = id, progress = req.progress_percent, "Enrollment progress updated");

    let dto = fetch_enrollment(&state.pool, id).await?;
    let message = if dto.status == EnrollmentStatus::Completed {
        "学习进度已更新，课程已完成".to_string()
    } else {
        format!("学习进度已更新为 {}%", dto.progress_percent)
    };
    Ok(Json(ApiResponse::success_with_message(dto, message)))
}

/// 删除选课记录
///
/// DELETE /admin/enrollments/{id}
pub async fn delete_enrollment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, AdminError> {
    let result = sqlx::query("DELETE FROM enrollments WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AdminError::EnrollmentNotFound(id));
    }

    record_mutation("enrollment", "delete");
    info!(enrollment_id = id, "Enrollment deleted");

    Ok(Json(ApiResponse::success_empty("选课记录已删除")))
}

const EXPORT_HEADERS: &[&str] = &[
    "ID",
    "Student",
    "Email",
    "Course",
    "Status",
    "Progress (%)",
    "Amount Paid",
    "Enrolled At",
    "Completed At",
    "Last Accessed At",
];

fn render_enrollments_csv(rows: &[EnrollmentDto]) -> CsvWriter {
    let mut writer = CsvWriter::new(EXPORT_HEADERS);
    for e in rows {
        writer.write_row([
            e.id.to_string(),
            e.student_name.clone(),
            e.student_email.clone(),
            e.course_title.clone(),
            e.status.as_str().to_string(),
            e.progress_percent.to_string(),
            format_cents(e.amount_paid_cents),
            e.enrolled_at.to_rfc3339(),
            opt(e.completed_at.map(|t| t.to_rfc3339())),
            opt(e.last_accessed_at.map(|t| t.to_rfc3339())),
        ]);
    }
    writer
}

/// 导出选课记录（与列表相同的过滤条件，不分页）
///
/// GET /admin/enrollments/export
pub async fn export_enrollments(
    State(state): State<AppState>,
    Query(filter): Query<EnrollmentQueryFilter>,
    Query(range): Query<DateRangeParams>,
) -> Result<Response, AdminError> {
    let args = EnrollmentFilterArgs::new(&filter, &range)?;

    let sql = format!(
        "{} {} ORDER BY e.enrolled_at DESC LIMIT $7",
        ENROLLMENT_SELECT_SQL, ENROLLMENT_FILTER_SQL
    );
    let rows = bind_enrollment_filter!(sqlx::query_as::<_, EnrollmentDto>(&sql), args)
        .bind(state.config.reports.max_export_rows)
        .fetch_all(&state.pool)
        .await?;

    let writer = render_enrollments_csv(&rows);
    record_csv_export("enrollments", writer.row_count());
    info!(rows = writer.row_count(), "Enrollments exported");

    let filename = format!("enrollments-{}.csv", Utc::now().format("%Y%m%d"));
    Ok(csv_download(&filename, writer.finish()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(status: EnrollmentStatus) -> EnrollmentDto {
        EnrollmentDto {
            id: 7,
            user_id: 3,
            student_name: "Li, Lei".to_string(),
            student_email: "lilei@example.com".to_string(),
            course_id: 2,
            course_title: "Rust 入门".to_string(),
            status,
            progress_percent: 40,
            amount_paid_cents: 19_900,
            enrolled_at: Utc::now(),
            completed_at: None,
            last_accessed_at: None,
            expires_at: None,
        }
    }

    #[test]
    fn test_progress_validation() {
        assert!(UpdateProgressRequest { progress_percent: 100 }.validate().is_ok());
        assert!(UpdateProgressRequest { progress_percent: 101 }.validate().is_err());
        assert!(UpdateProgressRequest { progress_percent: -1 }.validate().is_err());
    }

    #[test]
    fn test_status_request_deserialize() {
        let req: UpdateEnrollmentStatusRequest =
            serde_json::from_str(r#"{"status":"completed"}"#).unwrap();
        assert_eq!(req.status, EnrollmentStatus::Completed);
        assert!(serde_json::from_str::<UpdateEnrollmentStatusRequest>(r#"{"status":"done"}"#).is_err());
    }

    #[test]
    fn test_render_csv() {
        let writer = render_enrollments_csv(&[sample(EnrollmentStatus::Active)]);
        assert_eq!(writer.row_count(), 1);
        let csv = writer.finish();
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("ID,Student,Email"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("7,\"Li, Lei\",lilei@example.com,Rust 入门,active,40,199.00,"));
    }

    #[test]
    fn test_filter_args_reject_reversed_range() {
        let range = DateRangeParams {
            start_date: chrono::NaiveDate::from_ymd_opt(2024, 5, 2),
            end_date: chrono::NaiveDate::from_ymd_opt(2024, 5, 1),
        };
        assert!(EnrollmentFilterArgs::new(&EnrollmentQueryFilter::default(), &range).is_err());
    }
}
