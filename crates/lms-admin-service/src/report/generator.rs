//! 报表生成
//!
//! 单个报表的一次运行在一个事务内完成：锁定报表行、读取数据并渲染 CSV、
//! 写入运行记录、推进 last_run_at / next_run_at。数据读取失败时写入失败记录。

use std::time::Instant;

use chrono::{DateTime, Utc};
use lms_shared::observability::metrics::record_report_run;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{error, info, warn};

use super::source::{ReportSource, ReportTable};
use crate::{
    error::AdminError,
    export::CsvWriter,
    models::{ReportFrequency, ReportRunStatus, ReportSchedule, ReportType, reporting_period},
};

/// 调度所需的报表字段
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DueReport {
    pub id: i64,
    pub name: String,
    pub report_type: ReportType,
    pub frequency: ReportFrequency,
    pub send_hour: i32,
    pub day_of_week: Option<i32>,
    pub day_of_month: Option<i32>,
    pub cron_expression: Option<String>,
    pub is_active: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
}

pub const DUE_REPORT_COLUMNS: &str = "id, name, report_type, frequency, send_hour, day_of_week, \
     day_of_month, cron_expression, is_active, last_run_at, next_run_at";

impl DueReport {
    pub fn schedule(&self) -> ReportSchedule {
        // 负值转换为越界值，交给 validate 拒绝
        let to_u32 = |v: i32| u32::try_from(v).unwrap_or(u32::MAX);
        ReportSchedule {
            frequency: self.frequency,
            send_hour: to_u32(self.send_hour),
            day_of_week: self.day_of_week.map(to_u32),
            day_of_month: self.day_of_month.map(to_u32),
            cron_expression: self.cron_expression.clone(),
        }
    }
}

/// 渲染结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReport {
    pub status: ReportRunStatus,
    pub row_count: usize,
    pub content: Option<String>,
    pub error_message: Option<String>,
}

/// 一次运行的结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub run_id: i64,
    pub report_id: i64,
    pub status: ReportRunStatus,
    pub row_count: i64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub next_run_at: Option<DateTime<Utc>>,
}

/// 表格渲染为 CSV 文本
pub fn table_to_csv(table: &ReportTable) -> CsvWriter {
    let headers: Vec<&str> = table.headers.iter().map(String::as_str).collect();
    let mut writer = CsvWriter::new(&headers);
    for row in &table.rows {
        writer.write_row(row);
    }
    writer
}

/// 读取数据并渲染，读取失败时返回失败结果而不是错误
pub async fn render_report<S>(
    source: &S,
    report_type: ReportType,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> RenderedReport
where
    S: ReportSource + ?Sized,
{
    match source.fetch(report_type, period_start, period_end).await {
        Ok(table) => {
            let writer = table_to_csv(&table);
            RenderedReport {
                status: ReportRunStatus::Succeeded,
                row_count: writer.row_count(),
                content: Some(writer.finish()),
                error_message: None,
            }
        }
        Err(e) => RenderedReport {
            status: ReportRunStatus::Failed,
            row_count: 0,
            content: None,
            error_message: Some(e.to_string()),
        },
    }
}

/// 报表停用或调度无效时不再排期
fn next_run_for(report: &DueReport, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if !report.is_active {
        return None;
    }
    match report.schedule().next_run_after(now) {
        Ok(next) => Some(next),
        Err(e) => {
            warn!(report_id = report.id, error = %e, "Report schedule is invalid, not rescheduling");
            None
        }
    }
}

/// 在调用方的事务内生成一次报表
///
/// `run_at` 决定统计区间：调度触发时为计划时间，手动触发时为当前时间
pub async fn generate_in_tx<S>(
    tx: &mut Transaction<'_, Postgres>,
    source: &S,
    report: &DueReport,
    run_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<RunOutcome, AdminError>
where
    S: ReportSource + ?Sized,
{
    let started = Instant::now();
    let (period_start, period_end) = reporting_period(report.frequency, run_at, report.last_run_at);

    let rendered = render_report(source, report.report_type, period_start, period_end).await;
    let row_count = i64::try_from(rendered.row_count).unwrap_or(i64::MAX);

    let run_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO report_runs (report_id, period_start, period_end, status, row_count, content, error_message, generated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id
        "#,
    )
    .bind(report.id)
    .bind(period_start)
    .bind(period_end)
    .bind(rendered.status.as_str())
    .bind(row_count)
    .bind(&rendered.content)
    .bind(&rendered.error_message)
    .bind(now)
    .fetch_one(&mut **tx)
    .await?;

    let next_run_at = next_run_for(report, now);
    sqlx::query(
        "UPDATE scheduled_reports SET last_run_at = $2, next_run_at = $3, updated_at = NOW() WHERE id = $1",
    )
    .bind(report.id)
    .bind(now)
    .bind(next_run_at)
    .execute(&mut **tx)
    .await?;

    record_report_run(
        report.report_type.as_str(),
        rendered.status.as_str(),
        started.elapsed().as_secs_f64(),
    );
    match &rendered.error_message {
        None => info!(
            report_id = report.id,
            run_id,
            rows = rendered.row_count,
            "Scheduled report generated"
        ),
        Some(message) => error!(
            report_id = report.id,
            run_id,
            error = %message,
            "Scheduled report generation failed"
        ),
    }

    Ok(RunOutcome {
        run_id,
        report_id: report.id,
        status: rendered.status,
        row_count,
        period_start,
        period_end,
        next_run_at,
    })
}

/// 立即生成指定报表（独立事务）
pub async fn generate_now<S>(
    pool: &PgPool,
    source: &S,
    report_id: i64,
) -> Result<RunOutcome, AdminError>
where
    S: ReportSource + ?Sized,
{
    let mut tx = pool.begin().await?;

    let sql = format!(
        "SELECT {} FROM scheduled_reports WHERE id = $1 FOR UPDATE",
        DUE_REPORT_COLUMNS
    );
    let report = sqlx::query_as::<_, DueReport>(&sql)
        .bind(report_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AdminError::ScheduledReportNotFound(report_id))?;

    let now = Utc::now();
    let outcome = generate_in_tx(&mut tx, source, &report, now, now).await?;
    tx.commit().await?;

    Ok(outcome)
}

/// 领取一个到期报表并生成，没有到期报表时返回 `None`
///
/// `FOR UPDATE SKIP LOCKED` 保证多实例不会重复领取同一报表
pub async fn generate_next_due<S>(
    pool: &PgPool,
    source: &S,
    now: DateTime<Utc>,
) -> Result<Option<RunOutcome>, AdminError>
where
    S: ReportSource + ?Sized,
{
    let mut tx = pool.begin().await?;

    let sql = format!(
        r#"
        SELECT {} FROM scheduled_reports
        WHERE is_active AND next_run_at IS NOT NULL AND next_run_at <= $1
        ORDER BY next_run_at ASC
        LIMIT 1
        FOR UPDATE SKIP LOCKED
        "#,
        DUE_REPORT_COLUMNS
    );
    let Some(report) = sqlx::query_as::<_, DueReport>(&sql)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?
    else {
        tx.rollback().await?;
        return Ok(None);
    };

    let run_at = report.next_run_at.unwrap_or(now);
    let outcome = generate_in_tx(&mut tx, source, &report, run_at, now).await?;
    tx.commit().await?;

    Ok(Some(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::source::MockReportSource;
    use chrono::TimeZone;

    fn due_report(frequency: ReportFrequency, is_active: bool) -> DueReport {
        DueReport {
            id: 1,
            name: "日报".to_string(),
            report_type: ReportType::Revenue,
            frequency,
            send_hour: 6,
            day_of_week: None,
            day_of_month: None,
            cron_expression: None,
            is_active,
            last_run_at: None,
            next_run_at: None,
        }
    }

    #[tokio::test]
    async fn test_render_report_success() {
        let mut source = MockReportSource::new();
        source
            .expect_fetch()
            .withf(|report_type, start, end| *report_type == ReportType::Revenue && start < end)
            .times(1)
            .returning(|_, _, _| {
                let mut table = ReportTable::new(&["Date", "Net"]);
                table.push(vec!["2024-01-14".to_string(), "10.00".to_string()]);
                table.push(vec!["2024-01-15".to_string(), "3.50".to_string()]);
                Ok(table)
            });

        let start = Utc.with_ymd_and_hms(2024, 1, 14, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 16, 0, 0, 0).unwrap();
        let rendered = render_report(&source, ReportType::Revenue, start, end).await;

        assert_eq!(rendered.status, ReportRunStatus::Succeeded);
        assert_eq!(rendered.row_count, 2);
        assert_eq!(
            rendered.content.as_deref(),
            Some("Date,Net\n2024-01-14,10.00\n2024-01-15,3.50\n")
        );
        assert!(rendered.error_message.is_none());
    }

    #[tokio::test]
    async fn test_render_report_failure_is_captured() {
        let mut source = MockReportSource::new();
        source
            .expect_fetch()
            .returning(|_, _, _| Err(AdminError::Internal("数据源不可用".to_string())));

        let now = Utc::now();
        let rendered = render_report(&source, ReportType::Commissions, now, now).await;

        assert_eq!(rendered.status, ReportRunStatus::Failed);
        assert_eq!(rendered.row_count, 0);
        assert!(rendered.content.is_none());
        assert!(rendered.error_message.is_some());
    }

    #[test]
    fn test_next_run_for() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 7, 0, 0).unwrap();

        let active = due_report(ReportFrequency::Daily, true);
        assert_eq!(
            next_run_for(&active, now),
            Some(Utc.with_ymd_and_hms(2024, 1, 16, 6, 0, 0).unwrap())
        );

        let inactive = due_report(ReportFrequency::Daily, false);
        assert_eq!(next_run_for(&inactive, now), None);

        // 缺少星期的周报无法排期
        let broken = due_report(ReportFrequency::Weekly, true);
        assert_eq!(next_run_for(&broken, now), None);
    }

    #[tokio::test]
    #[ignore = "需要数据库"]
    async fn test_failed_fetch_is_recorded_and_rescheduled() {
        use lms_shared::{database::Database, test_utils::test_database_config};

        let db = Database::connect(&test_database_config()).await.unwrap();
        db.run_migrations().await.unwrap();
        let pool = db.pool();

        let report_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO scheduled_reports (name, report_type, frequency, send_hour, next_run_at)
            VALUES ('失败日报', 'revenue', 'daily', 6, NOW() - INTERVAL '1 hour')
            RETURNING id
            "#,
        )
        .fetch_one(pool)
        .await
        .unwrap();
        let report: DueReport = sqlx::query_as(&format!(
            "SELECT {} FROM scheduled_reports WHERE id = $1",
            DUE_REPORT_COLUMNS
        ))
        .bind(report_id)
        .fetch_one(pool)
        .await
        .unwrap();

        let mut source = MockReportSource::new();
        source
            .expect_fetch()
            .times(1)
            .returning(|_, _, _| Err(AdminError::Internal("数据源不可用".to_string())));

        let run_at = report.next_run_at.unwrap();
        let now = Utc::now();
        let mut tx = pool.begin().await.unwrap();
        let outcome = generate_in_tx(&mut tx, &source, &report, run_at, now)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(outcome.status, ReportRunStatus::Failed);
        assert_eq!(outcome.row_count, 0);

        let (status, error_message): (String, Option<String>) =
            sqlx::query_as("SELECT status, error_message FROM report_runs WHERE id = $1")
                .bind(outcome.run_id)
                .fetch_one(pool)
                .await
                .unwrap();
        assert_eq!(status, "failed");
        assert!(error_message.is_some());

        let next_run_at: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT next_run_at FROM scheduled_reports WHERE id = $1")
                .bind(report_id)
                .fetch_one(pool)
                .await
                .unwrap();
        assert!(next_run_at.is_some_and(|next| next > now && next > run_at));

        sqlx::query("DELETE FROM scheduled_reports WHERE id = $1")
            .bind(report_id)
            .execute(pool)
            .await
            .unwrap();
    }

    #[test]
    fn test_schedule_conversion_rejects_negative_values() {
        let mut report = due_report(ReportFrequency::Daily, true);
        report.send_hour = -1;
        assert!(report.schedule().validate().is_err());
    }
}
