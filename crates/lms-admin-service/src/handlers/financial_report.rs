//! 财务报表 API 处理器
//!
//! 毛收入 = 已完成 + 已退款订单金额；净收入 = 毛收入 - 退款。
//! 所有金额单位为分。

use axum::{
    Json,
    extract::{Query, State},
    response::Response,
};
use chrono::{DateTime, NaiveDate, Utc};
use lms_shared::observability::metrics::record_csv_export;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{
    dto::{ApiResponse, DateRangeParams, PageResponse, PaginationParams, like_pattern},
    error::AdminError,
    export::{CsvWriter, csv_download, format_cents, opt},
    models::PaymentStatus,
    state::AppState,
};

const DEFAULT_SERIES_DAYS: u64 = 30;

/// 收入汇总
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueSummary {
    pub gross_revenue_cents: i64,
    pub refunded_cents: i64,
    pub net_revenue_cents: i64,
    pub completed_count: i64,
    pub refunded_count: i64,
    pub average_order_value_cents: i64,
}

#[derive(sqlx::FromRow)]
struct SummaryRow {
    gross_revenue_cents: i64,
    refunded_cents: i64,
    completed_count: i64,
    refunded_count: i64,
}

impl From<SummaryRow> for RevenueSummary {
    fn from(row: SummaryRow) -> Self {
        let orders = row.completed_count + row.refunded_count;
        Self {
            gross_revenue_cents: row.gross_revenue_cents,
            refunded_cents: row.refunded_cents,
            net_revenue_cents: row.gross_revenue_cents - row.refunded_cents,
            completed_count: row.completed_count,
            refunded_count: row.refunded_count,
            average_order_value_cents: average_order_value(row.gross_revenue_cents, orders),
        }
    }
}

/// 客单价（分），四舍五入
pub fn average_order_value(gross_cents: i64, orders: i64) -> i64 {
    if orders <= 0 {
        return 0;
    }
    (gross_cents as f64 / orders as f64).round() as i64
}

/// 收入序列的聚合粒度
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevenuePeriod {
    #[default]
    Day,
    Week,
    Month,
}

impl RevenuePeriod {
    /// date_trunc 字段名，同时用于构造步长 interval
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }

    /// 单次查询允许的最大天数，限制生成的分组数量
    pub fn max_window_days(&self) -> i64 {
        match self {
            Self::Day => 366,
            Self::Week => 366 * 3,
            Self::Month => 366 * 10,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueSeriesQuery {
    #[serde(default)]
    pub group_by: RevenuePeriod,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RevenuePoint {
    pub period_start: NaiveDate,
    pub gross_revenue_cents: i64,
    pub refunded_cents: i64,
    pub net_revenue_cents: i64,
    pub orders: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueByCourseQuery {
    pub limit: Option<i64>,
}

impl RevenueByCourseQuery {
    fn resolved_limit(&self) -> Result<i64, AdminError> {
        match self.limit {
            None => Ok(10),
            Some(limit @ 1..=50) => Ok(limit),
            Some(_) => Err(AdminError::Validation("排行数量必须在1-50之间".to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CourseRevenueDto {
    pub course_id: i64,
    pub title: String,
    pub orders: i64,
    pub gross_revenue_cents: i64,
    pub refunded_cents: i64,
    pub net_revenue_cents: i64,
}

/// 支付记录
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDto {
    pub id: i64,
    pub user_id: i64,
    pub user_email: String,
    pub course_id: i64,
    pub course_title: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub payment_method: String,
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub refunded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentQueryFilter {
    pub status: Option<PaymentStatus>,
    pub payment_method: Option<String>,
    pub course_id: Option<i64>,
    pub keyword: Option<String>,
}

const PAYMENT_SELECT_SQL: &str = r#"
    SELECT
        p.id, p.user_id, u.email AS user_email, p.course_id, c.title AS course_title,
        p.amount_cents, p.currency, p.status, p.payment_method, p.transaction_id,
        p.created_at, p.refunded_at
    FROM payments p
    JOIN users u ON u.id = p.user_id
    JOIN courses c ON c.id = p.course_id
"#;

const PAYMENT_FROM_SQL: &str = r#"
    FROM payments p
    JOIN users u ON u.id = p.user_id
    JOIN courses c ON c.id = p.course_id
"#;

const PAYMENT_FILTER_SQL: &str = r#"
    WHERE ($1::text IS NULL OR p.status = $1)
      AND ($2::text IS NULL OR p.payment_method = $2)
      AND ($3::bigint IS NULL OR p.course_id = $3)
      AND ($4::text IS NULL OR p.transaction_id ILIKE $4 OR u.email ILIKE $4 OR c.title ILIKE $4)
      AND ($5::timestamptz IS NULL OR p.created_at >= $5)
      AND ($6::timestamptz IS NULL OR p.created_at < $6)
"#;

struct PaymentFilterArgs {
    status: Option<&'static str>,
    method: Option<String>,
    course_id: Option<i64>,
    keyword: Option<String>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

impl PaymentFilterArgs {
    fn new(filter: &PaymentQueryFilter, range: &DateRangeParams) -> Result<Self, AdminError> {
        range.validate()?;
        Ok(Self {
            status: filter.status.map(|s| s.as_str()),
            method: filter
                .payment_method
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string),
            course_id: filter.course_id,
            keyword: like_pattern(filter.keyword.as_deref()),
            start: range.start_time(),
            end: range.end_time_exclusive(),
        })
    }
}

macro_rules! bind_payment_filter {
    ($query:expr, $args:expr) => {
        $query
            .bind($args.status)
            .bind(&$args.method)
            .bind($args.course_id)
            .bind(&$args.keyword)
            .bind($args.start)
            .bind($args.end)
    };
}

/// 收入汇总
///
/// GET /admin/financial-reports/summary
#[instrument(skip(state))]
pub async fn revenue_summary(
    State(state): State<AppState>,
    Query(range): Query<DateRangeParams>,
) -> Result<Json<ApiResponse<RevenueSummary>>, AdminError> {
    range.validate()?;

    let row = sqlx::query_as::<_, SummaryRow>(
        r#"
        SELECT
            COALESCE(SUM(amount_cents) FILTER (WHERE status IN ('completed', 'refunded')), 0)::bigint
                AS gross_revenue_cents,
            COALESCE(SUM(amount_cents) FILTER (WHERE status = 'refunded'), 0)::bigint AS refunded_cents,
            COUNT(*) FILTER (WHERE status = 'completed') AS completed_count,
            COUNT(*) FILTER (WHERE status = 'refunded') AS refunded_count
        FROM payments
        WHERE ($1::timestamptz IS NULL OR created_at >= $1)
          AND ($2::timestamptz IS NULL OR created_at < $2)
        "#,
    )
    .bind(range.start_time())
    .bind(range.end_time_exclusive())
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(RevenueSummary::from(row))))
}

/// 收入序列（按日/周/月分组，空档补零；默认最近 30 天）
///
/// GET /admin/financial-reports/revenue
#[instrument(skip(state))]
pub async fn revenue_series(
    State(state): State<AppState>,
    Query(query): Query<RevenueSeriesQuery>,
    Query(range): Query<DateRangeParams>,
) -> Result<Json<ApiResponse<Vec<RevenuePoint>>>, AdminError> {
    let (start, end) = range.bounded_window(
        DEFAULT_SERIES_DAYS,
        query.group_by.max_window_days(),
        Utc::now().date_naive(),
    )?;

    let points = sqlx::query_as::<_, RevenuePoint>(
        r#"
        WITH buckets AS (
            SELECT b AS bucket_start, b + ('1 ' || $1::text)::interval AS bucket_end
            FROM generate_series(
                date_trunc($1::text, $2::timestamptz AT TIME ZONE 'UTC') AT TIME ZONE 'UTC',
                $3::timestamptz - INTERVAL '1 microsecond',
                ('1 ' || $1::text)::interval
            ) AS b
        )
        SELECT
            (bk.bucket_start AT TIME ZONE 'UTC')::date AS period_start,
            COALESCE(SUM(p.amount_cents) FILTER (WHERE p.status IN ('completed', 'refunded')), 0)::bigint
                AS gross_revenue_cents,
            COALESCE(SUM(p.amount_cents) FILTER (WHERE p.status = 'refunded'), 0)::bigint
                AS refunded_cents,
            (COALESCE(SUM(p.amount_cents) FILTER (WHERE p.status = 'completed'), 0))::bigint
                AS net_revenue_cents,
            COUNT(p.id) FILTER (WHERE p.status IN ('completed', 'refunded')) AS orders
        FROM buckets bk
        LEFT JOIN payments p
          ON p.created_at >= GREATEST(bk.bucket_start, $2)
         AND p.created_at < LEAST(bk.bucket_end, $3)
        GROUP BY bk.bucket_start
        ORDER BY bk.bucket_start
        "#,
    )
    .bind(query.group_by.as_str())
    .bind(start)
    .bind(end)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(points)))
}

/// 课程收入排行
///
/// GET /admin/financial-reports/by-course
#[instrument(skip(state))]
pub async fn revenue_by_course(
    State(state): State<AppState>,
    Query(query): Query<RevenueByCourseQuery>,
    Query(range): Query<DateRangeParams>,
) -> Result<Json<ApiResponse<Vec<CourseRevenueDto>>>, AdminError> {
    range.validate()?;
    let limit = query.resolved_limit()?;

    let items = sqlx::query_as::<_, CourseRevenueDto>(
        r#"
        SELECT
            c.id AS course_id,
            c.title,
            COUNT(p.id) AS orders,
            COALESCE(SUM(p.amount_cents), 0)::bigint AS gross_revenue_cents,
            COALESCE(SUM(p.amount_cents) FILTER (WHERE p.status = 'refunded'), 0)::bigint AS refunded_cents,
            COALESCE(SUM(p.amount_cents) FILTER (WHERE p.status = 'completed'), 0)::bigint AS net_revenue_cents
        FROM payments p
        JOIN courses c ON c.id = p.course_id
        WHERE p.status IN ('completed', 'refunded')
          AND ($1::timestamptz IS NULL OR p.created_at >= $1)
          AND ($2::timestamptz IS NULL OR p.created_at < $2)
        GROUP BY c.id
        ORDER BY net_revenue_cents DESC, c.id ASC
        LIMIT $3
        "#,
    )
    .bind(range.start_time())
    .bind(range.end_time_exclusive())
    .bind(limit)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(items)))
}

/// 支付记录列表
///
/// GET /admin/financial-reports/payments
pub async fn list_payments(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<PaymentQueryFilter>,
    Query(range): Query<DateRangeParams>,
) -> Result<Json<ApiResponse<PageResponse<PaymentDto>>>, AdminError> {
    let args = PaymentFilterArgs::new(&filter, &range)?;
    let page = pagination.resolve(&state.config.pagination, "payments");

    let count_sql = format!("SELECT COUNT(*) {} {}", PAYMENT_FROM_SQL, PAYMENT_FILTER_SQL);
    let total: (i64,) = bind_payment_filter!(sqlx::query_as(&count_sql), args)
        .fetch_one(&state.pool)
        .await?;

    if total.0 == 0 {
        return Ok(Json(ApiResponse::success(PageResponse::empty(page))));
    }

    let sql = format!(
        "{} {} ORDER BY p.created_at DESC, p.id DESC LIMIT $7 OFFSET $8",
        PAYMENT_SELECT_SQL, PAYMENT_FILTER_SQL
    );
    let items = bind_payment_filter!(sqlx::query_as::<_, PaymentDto>(&sql), args)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(ApiResponse::success(PageResponse::new(items, total.0, page))))
}

const PAYMENT_EXPORT_HEADERS: &[&str] = &[
    "ID",
    "User Email",
    "Course",
    "Amount",
    "Currency",
    "Status",
    "Method",
    "Transaction ID",
    "Created At",
    "Refunded At",
];

fn render_payments_csv(rows: &[PaymentDto]) -> CsvWriter {
    let mut writer = CsvWriter::new(PAYMENT_EXPORT_HEADERS);
    for p in rows {
        writer.write_row([
            p.id.to_string(),
            p.user_email.clone(),
            p.course_title.clone(),
            format_cents(p.amount_cents),
            p.currency.clone(),
            p.status.as_str().to_string(),
            p.payment_method.clone(),
            opt(p.transaction_id.as_deref()),
            p.created_at.to_rfc3339(),
            opt(p.refunded_at.map(|t| t.to_rfc3339())),
        ]);
    }
    writer
}

/// 导出支付记录
///
/// GET /admin/financial-reports/payments/export
pub async fn export_payments(
    State(state): State<AppState>,
    Query(filter): Query<PaymentQueryFilter>,
    Query(range): Query<DateRangeParams>,
) -> Result<Response, AdminError> {
    let args = PaymentFilterArgs::new(&filter, &range)?;

    let sql = format!(
        "{} {} ORDER BY p.created_at DESC, p.id DESC LIMIT $7",
        PAYMENT_SELECT_SQL, PAYMENT_FILTER_SQL
    );
    let rows = bind_payment_filter!(sqlx::query_as::<_, PaymentDto>(&sql), args)
        .bind(state.config.reports.max_export_rows)
        .fetch_all(&state.pool)
        .await?;

    let writer = render_payments_csv(&rows);
    record_csv_export("payments", writer.row_count());
    info!(rows = writer.row_count(), "Payments exported");

    let filename = format!("payments-{}.csv", Utc::now().format("%Y%m%d"));
    Ok(csv_download(&filename, writer.finish()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_from_row() {
        let summary = RevenueSummary::from(SummaryRow {
            gross_revenue_cents: 100_000,
            refunded_cents: 15_000,
            completed_count: 7,
            refunded_count: 1,
        });
        assert_eq!(summary.net_revenue_cents, 85_000);
        assert_eq!(summary.average_order_value_cents, 12_500);
    }

    #[test]
    fn test_average_order_value() {
        assert_eq!(average_order_value(0, 0), 0);
        assert_eq!(average_order_value(1_000, 3), 333);
        assert_eq!(average_order_value(2_000, 3), 667);
    }

    #[test]
    fn test_series_window_limit_per_period() {
        assert_eq!(RevenuePeriod::Day.max_window_days(), 366);
        assert!(RevenuePeriod::Week.max_window_days() > RevenuePeriod::Day.max_window_days());
        assert!(RevenuePeriod::Month.max_window_days() > RevenuePeriod::Week.max_window_days());
    }

    #[test]
    fn test_series_query_default_and_parse() {
        assert_eq!(RevenueSeriesQuery::default().group_by, RevenuePeriod::Day);
        let q: RevenueSeriesQuery = serde_json::from_str(r#"{"groupBy":"month"}"#).unwrap();
        assert_eq!(q.group_by.as_str(), "month");
        assert!(serde_json::from_str::<RevenueSeriesQuery>(r#"{"groupBy":"year"}"#).is_err());
    }

    #[test]
    fn test_by_course_limit() {
        assert_eq!(RevenueByCourseQuery::default().resolved_limit().unwrap(), 10);
        assert!(RevenueByCourseQuery { limit: Some(0) }.resolved_limit().is_err());
        assert!(RevenueByCourseQuery { limit: Some(51) }.resolved_limit().is_err());
    }

    #[test]
    fn test_render_payments_csv() {
        let rows = vec![PaymentDto {
            id: 1,
            user_id: 2,
            user_email: "a@example.com".to_string(),
            course_id: 3,
            course_title: "SQL \"进阶\"".to_string(),
            amount_cents: 4_990,
            currency: "USD".to_string(),
            status: PaymentStatus::Refunded,
            payment_method: "card".to_string(),
            transaction_id: None,
            created_at: Utc::now(),
            refunded_at: None,
        }];
        let csv = render_payments_csv(&rows).finish();
        let row = csv.lines().nth(1).unwrap();
        assert!(row.starts_with("1,a@example.com,\"SQL \"\"进阶\"\"\",49.90,USD,refunded,card,,"));
    }
}
