//! 课程分析 API 处理器
//!
//! 提供全站总览、单课程明细与课程排行。总览结果缓存 5 分钟。

use std::time::Duration;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    dto::{ApiResponse, DateRangeParams},
    error::AdminError,
    state::AppState,
};

const OVERVIEW_CACHE_KEY: &str = "analytics:overview";
const OVERVIEW_CACHE_TTL: Duration = Duration::from_secs(300);
const DEFAULT_TREND_DAYS: u64 = 30;
const MAX_TREND_DAYS: i64 = 366;

/// 全站课程总览
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsOverview {
    pub total_courses: i64,
    pub published_courses: i64,
    pub total_enrollments: i64,
    pub active_enrollments: i64,
    pub completed_enrollments: i64,
    /// 完成率（百分比，保留两位小数）
    pub completion_rate: f64,
    pub total_revenue_cents: i64,
    pub average_progress: f64,
}

#[derive(sqlx::FromRow)]
struct OverviewRow {
    total_courses: i64,
    published_courses: i64,
    total_enrollments: i64,
    active_enrollments: i64,
    completed_enrollments: i64,
    average_progress: f64,
    total_revenue_cents: i64,
}

impl From<OverviewRow> for AnalyticsOverview {
    fn from(row: OverviewRow) -> Self {
        Self {
            total_courses: row.total_courses,
            published_courses: row.published_courses,
            total_enrollments: row.total_enrollments,
            active_enrollments: row.active_enrollments,
            completed_enrollments: row.completed_enrollments,
            completion_rate: completion_rate(row.completed_enrollments, row.total_enrollments),
            total_revenue_cents: row.total_revenue_cents,
            average_progress: round2(row.average_progress),
        }
    }
}

/// 单课程分析
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseAnalyticsDto {
    pub course_id: i64,
    pub title: String,
    pub is_published: bool,
    pub total_enrollments: i64,
    pub active_enrollments: i64,
    pub completed_enrollments: i64,
    pub completion_rate: f64,
    pub average_progress: f64,
    pub revenue_cents: i64,
    pub enrollment_trend: Vec<DailyCount>,
}

#[derive(sqlx::FromRow)]
struct CourseSummaryRow {
    id: i64,
    title: String,
    is_published: bool,
    total_enrollments: i64,
    active_enrollments: i64,
    completed_enrollments: i64,
    average_progress: f64,
}

/// 每日计数
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: i64,
}

/// 排行排序方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopCourseSort {
    #[default]
    Enrollments,
    Revenue,
    CompletionRate,
}

impl TopCourseSort {
    fn order_column(&self) -> &'static str {
        match self {
            Self::Enrollments => "enrollments",
            Self::Revenue => "revenue_cents",
            Self::CompletionRate => "completion_rate",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopCoursesQuery {
    #[serde(default)]
    pub sort_by: TopCourseSort,
    pub limit: Option<i64>,
}

impl TopCoursesQuery {
    fn resolved_limit(&self) -> Result<i64, AdminError> {
        match self.limit {
            None => Ok(10),
            Some(limit @ 1..=50) => Ok(limit),
            Some(_) => Err(AdminError::Validation("排行数量必须在1-50之间".to_string())),
        }
    }
}

/// 课程排行条目
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TopCourseDto {
    pub course_id: i64,
    pub title: String,
    pub enrollments: i64,
    pub completed: i64,
    pub completion_rate: f64,
    pub revenue_cents: i64,
}

/// 完成率百分比，保留两位小数
pub fn completion_rate(completed: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    round2(completed as f64 * 100.0 / total as f64)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// 课程总览
///
/// GET /admin/course-analytics/overview
#[instrument(skip(state))]
pub async fn get_overview(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<AnalyticsOverview>>, AdminError> {
    if let Some(cached) = state.cache_get::<AnalyticsOverview>(OVERVIEW_CACHE_KEY).await {
        return Ok(Json(ApiResponse::success(cached)));
    }

    let row = sqlx::query_as::<_, OverviewRow>(
        r#"
        SELECT
            (SELECT COUNT(*) FROM courses) AS total_courses,
            (SELECT COUNT(*) FROM courses WHERE is_published) AS published_courses,
            COUNT(e.id) AS total_enrollments,
            COUNT(e.id) FILTER (WHERE e.status = 'active') AS active_enrollments,
            COUNT(e.id) FILTER (WHERE e.status = 'completed') AS completed_enrollments,
            COALESCE(AVG(e.progress_percent), 0)::float8 AS average_progress,
            (SELECT COALESCE(SUM(amount_cents), 0)::bigint FROM payments WHERE status = 'completed')
                AS total_revenue_cents
        FROM enrollments e
        "#,
    )
    .fetch_one(&state.pool)
    .await?;

    let overview = AnalyticsOverview::from(row);
    state
        .cache_set(OVERVIEW_CACHE_KEY, &overview, OVERVIEW_CACHE_TTL)
        .await;

    Ok(Json(ApiResponse::success(overview)))
}

/// 单课程分析（默认最近 30 天的选课趋势）
///
/// GET /admin/course-analytics/courses/{course_id}
#[instrument(skip(state))]
pub async fn get_course_analytics(
    State(state): State<AppState>,
    Path(course_id): Path<i64>,
    Query(range): Query<DateRangeParams>,
) -> Result<Json<ApiResponse<CourseAnalyticsDto>>, AdminError> {
    let (start, end) =
        range.bounded_window(DEFAULT_TREND_DAYS, MAX_TREND_DAYS, Utc::now().date_naive())?;

    let summary = sqlx::query_as::<_, CourseSummaryRow>(
        r#"
        SELECT
            c.id, c.title, c.is_published,
            COUNT(e.id) AS total_enrollments,
            COUNT(e.id) FILTER (WHERE e.status = 'active') AS active_enrollments,
            COUNT(e.id) FILTER (WHERE e.status = 'completed') AS completed_enrollments,
            COALESCE(AVG(e.progress_percent), 0)::float8 AS average_progress
        FROM courses c
        LEFT JOIN enrollments e ON e.course_id = c.id
        WHERE c.id = $1
        GROUP BY c.id
        "#,
    )
    .bind(course_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AdminError::CourseNotFound(course_id))?;

    let revenue_cents: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount_cents), 0)::bigint FROM payments WHERE course_id = $1 AND status = 'completed'",
    )
    .bind(course_id)
    .fetch_one(&state.pool)
    .await?;

    let enrollment_trend = sqlx::query_as::<_, DailyCount>(
        r#"
        SELECT (d AT TIME ZONE 'UTC')::date AS date, COUNT(e.id) AS count
        FROM generate_series($2::timestamptz, $3::timestamptz - INTERVAL '1 day', INTERVAL '1 day') AS d
        LEFT JOIN enrollments e
          ON e.course_id = $1
         AND e.enrolled_at >= d
         AND e.enrolled_at < d + INTERVAL '1 day'
        GROUP BY d
        ORDER BY d
        "#,
    )
    .bind(course_id)
    .bind(start)
    .bind(end)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(CourseAnalyticsDto {
        course_id: summary.id,
        title: summary.title,
        is_published: summary.is_published,
        total_enrollments: summary.total_enrollments,
        active_enrollments: summary.active_enrollments,
        completed_enrollments: summary.completed_enrollments,
        completion_rate: completion_rate(summary.completed_enrollments, summary.total_enrollments),
        average_progress: round2(summary.average_progress),
        revenue_cents,
        enrollment_trend,
    })))
}

/// 课程排行
///
/// GET /admin/course-analytics/top-courses
#[instrument(skip(state))]
pub async fn get_top_courses(
    State(state): State<AppState>,
    Query(query): Query<TopCoursesQuery>,
) -> Result<Json<ApiResponse<Vec<TopCourseDto>>>, AdminError> {
    let limit = query.resolved_limit()?;

    let sql = format!(
        r#"
        SELECT
            c.id AS course_id,
            c.title,
            COALESCE(e.total, 0) AS enrollments,
            COALESCE(e.completed, 0) AS completed,
            CASE WHEN COALESCE(e.total, 0) = 0 THEN 0
                 ELSE ROUND(e.completed * 100.0 / e.total, 2)
            END::float8 AS completion_rate,
            COALESCE(p.revenue, 0)::bigint AS revenue_cents
        FROM courses c
        LEFT JOIN (
            SELECT course_id, COUNT(*) AS total, COUNT(*) FILTER (WHERE status = 'completed') AS completed
            FROM enrollments
            GROUP BY course_id
        ) e ON e.course_id = c.id
        LEFT JOIN (
            SELECT course_id, SUM(amount_cents) AS revenue
            FROM payments
            WHERE status = 'completed'
            GROUP BY course_id
        ) p ON p.course_id = c.id
        ORDER BY {} DESC, c.id ASC
        LIMIT $1
        "#,
        query.sort_by.order_column()
    );

    let items = sqlx::query_as::<_, TopCourseDto>(&sql)
        .bind(limit)
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(ApiResponse::success(items)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_rate() {
        assert_eq!(completion_rate(0, 0), 0.0);
        assert_eq!(completion_rate(1, 3), 33.33);
        assert_eq!(completion_rate(2, 3), 66.67);
        assert_eq!(completion_rate(5, 5), 100.0);
    }

    #[test]
    fn test_top_courses_limit() {
        let query = TopCoursesQuery::default();
        assert_eq!(query.resolved_limit().unwrap(), 10);

        let query = TopCoursesQuery {
            sort_by: TopCourseSort::Revenue,
            limit: Some(50),
        };
        assert_eq!(query.resolved_limit().unwrap(), 50);

        for bad in [0, 51, -3] {
            let query = TopCoursesQuery {
                sort_by: TopCourseSort::Enrollments,
                limit: Some(bad),
            };
            assert!(query.resolved_limit().is_err());
        }
    }

    #[test]
    fn test_sort_deserialize() {
        let query: TopCoursesQuery =
            serde_json::from_str(r#"{"sortBy":"completion_rate","limit":5}"#).unwrap();
        assert_eq!(query.sort_by, TopCourseSort::CompletionRate);
        assert_eq!(query.sort_by.order_column(), "completion_rate");
    }

    #[test]
    fn test_overview_from_row() {
        let overview = AnalyticsOverview::from(OverviewRow {
            total_courses: 12,
            published_courses: 9,
            total_enrollments: 200,
            active_enrollments: 120,
            completed_enrollments: 50,
            average_progress: 47.456,
            total_revenue_cents: 1_234_500,
        });
        assert_eq!(overview.completion_rate, 25.0);
        assert_eq!(overview.average_progress, 47.46);
    }
}
