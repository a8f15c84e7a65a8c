//! 报表数据源
//!
//! 生成器只依赖 [`ReportSource`]，便于在测试中替换为 mock。

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;

use crate::{error::AdminError, export::format_cents, models::ReportType};

/// 报表数据：表头与按列对齐的文本行
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ReportTable {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }
}

/// 报表数据源接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReportSource: Send + Sync {
    /// 读取 `[start, end)` 区间内指定类型报表的数据
    async fn fetch(
        &self,
        report_type: ReportType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ReportTable, AdminError>;
}

/// 基于 PostgreSQL 的报表数据源
#[derive(Clone)]
pub struct PgReportSource {
    pool: PgPool,
}

impl PgReportSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct RevenueRow {
    day: NaiveDate,
    orders: i64,
    gross_cents: i64,
    refunded_cents: i64,
}

#[derive(sqlx::FromRow)]
struct EnrollmentRow {
    id: i64,
    student_name: String,
    student_email: String,
    course_title: String,
    status: String,
    progress_percent: i32,
    enrolled_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct CommissionRow {
    id: i64,
    affiliate_code: String,
    sale_amount_cents: i64,
    amount_cents: i64,
    status: String,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct CoursePerformanceRow {
    title: String,
    new_enrollments: i64,
    completions: i64,
    revenue_cents: i64,
}

impl PgReportSource {
    async fn revenue(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<ReportTable, AdminError> {
        let rows = sqlx::query_as::<_, RevenueRow>(
            r#"
            SELECT
                (created_at AT TIME ZONE 'UTC')::date AS day,
                COUNT(*) AS orders,
                COALESCE(SUM(amount_cents), 0)::bigint AS gross_cents,
                COALESCE(SUM(amount_cents) FILTER (WHERE status = 'refunded'), 0)::bigint AS refunded_cents
            FROM payments
            WHERE status IN ('completed', 'refunded')
              AND created_at >= $1 AND created_at < $2
            GROUP BY day
            ORDER BY day
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let mut table = ReportTable::new(&["Date", "Orders", "Gross", "Refunds", "Net"]);
        for r in rows {
            table.push(vec![
                r.day.to_string(),
                r.orders.to_string(),
                format_cents(r.gross_cents),
                format_cents(r.refunded_cents),
                format_cents(r.gross_cents - r.refunded_cents),
            ]);
        }
        Ok(table)
    }

    async fn enrollments(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<ReportTable, AdminError> {
        let rows = sqlx::query_as::<_, EnrollmentRow>(
            r#"
            SELECT e.id, u.full_name AS student_name, u.email AS student_email,
                   c.title AS course_title, e.status, e.progress_percent, e.enrolled_at
            FROM enrollments e
            JOIN users u ON u.id = e.user_id
            JOIN courses c ON c.id = e.course_id
            WHERE e.enrolled_at >= $1 AND e.enrolled_at < $2
            ORDER BY e.enrolled_at
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let mut table = ReportTable::new(&[
            "ID",
            "Student",
            "Email",
            "Course",
            "Status",
            "Progress (%)",
            "Enrolled At",
        ]);
        for r in rows {
            table.push(vec![
                r.id.to_string(),
                r.student_name,
                r.student_email,
                r.course_title,
                r.status,
                r.progress_percent.to_string(),
                r.enrolled_at.to_rfc3339(),
            ]);
        }
        Ok(table)
    }

    async fn commissions(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<ReportTable, AdminError> {
        let rows = sqlx::query_as::<_, CommissionRow>(
            r#"
            SELECT c.id, a.code AS affiliate_code, c.sale_amount_cents, c.amount_cents,
                   c.status, c.created_at
            FROM affiliate_commissions c
            JOIN affiliate_links a ON a.id = c.affiliate_id
            WHERE c.created_at >= $1 AND c.created_at < $2
            ORDER BY c.created_at
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let mut table = ReportTable::new(&[
            "ID",
            "Affiliate Code",
            "Sale Amount",
            "Commission",
            "Status",
            "Created At",
        ]);
        for r in rows {
            table.push(vec![
                r.id.to_string(),
                r.affiliate_code,
                format_cents(r.sale_amount_cents),
                format_cents(r.amount_cents),
                r.status,
                r.created_at.to_rfc3339(),
            ]);
        }
        Ok(table)
    }

    async fn course_performance(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ReportTable, AdminError> {
        let rows = sqlx::query_as::<_, CoursePerformanceRow>(
            r#"
            SELECT
                c.title,
                (SELECT COUNT(*) FROM enrollments e
                  WHERE e.course_id = c.id AND e.enrolled_at >= $1 AND e.enrolled_at < $2) AS new_enrollments,
                (SELECT COUNT(*) FROM enrollments e
                  WHERE e.course_id = c.id AND e.completed_at >= $1 AND e.completed_at < $2) AS completions,
                (SELECT COALESCE(SUM(p.amount_cents), 0)::bigint FROM payments p
                  WHERE p.course_id = c.id AND p.status = 'completed'
                    AND p.created_at >= $1 AND p.created_at < $2) AS revenue_cents
            FROM courses c
            ORDER BY revenue_cents DESC, c.id ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let mut table = ReportTable::new(&["Course", "New Enrollments", "Completions", "Revenue"]);
        for r in rows {
            table.push(vec![
                r.title,
                r.new_enrollments.to_string(),
                r.completions.to_string(),
                format_cents(r.revenue_cents),
            ]);
        }
        Ok(table)
    }
}

#[async_trait]
impl ReportSource for PgReportSource {
    async fn fetch(
        &self,
        report_type: ReportType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ReportTable, AdminError> {
        match report_type {
            ReportType::Revenue => self.revenue(start, end).await,
            ReportType::Enrollments => self.enrollments(start, end).await,
            ReportType::Commissions => self.commissions(start, end).await,
            ReportType::CoursePerformance => self.course_performance(start, end).await,
        }
    }
}
