//! 定时报表 Worker
//!
//! 轮询 `scheduled_reports`，逐条生成 `next_run_at` 已到期的报表。
//! 每条报表在独立事务中用 `FOR UPDATE SKIP LOCKED` 认领，多实例部署时不会重复生成。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lms_shared::observability::metrics;
use sqlx::PgPool;
use tracing::{debug, error, info};

use crate::error::AdminError;
use crate::report::{self, ReportSource};

/// 单次轮询最多生成的报表数，剩余的留给下一轮
const MAX_REPORTS_PER_TICK: usize = 20;

/// 定时报表 Worker
pub struct ScheduledReportWorker {
    pool: PgPool,
    source: Arc<dyn ReportSource>,
    poll_interval: Duration,
}

impl ScheduledReportWorker {
    pub fn new(pool: PgPool, source: Arc<dyn ReportSource>) -> Self {
        Self::with_config(pool, source, 60)
    }

    /// 创建带自定义轮询间隔的 Worker
    pub fn with_config(pool: PgPool, source: Arc<dyn ReportSource>, poll_secs: u64) -> Self {
        Self {
            pool,
            source,
            poll_interval: Duration::from_secs(poll_secs.max(1)),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// 主循环：持续生成到期报表直到进程退出
    pub async fn run(&self) {
        info!(poll_interval = ?self.poll_interval, "ScheduledReportWorker started");
        loop {
            match self.run_due_reports().await {
                Ok(0) => debug!("No scheduled reports due"),
                Ok(count) => info!(count, "Scheduled reports generated"),
                Err(e) => error!(error = %e, "Scheduled report generation failed"),
            }

            metrics::set_worker_last_run("scheduled_report_worker");

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// 生成当前所有到期报表，返回本轮生成的数量
    pub async fn run_due_reports(&self) -> Result<usize, AdminError> {
        let mut generated = 0;
        while generated < MAX_REPORTS_PER_TICK {
            let outcome =
                report::generate_next_due(&self.pool, self.source.as_ref(), Utc::now()).await?;
            match outcome {
                Some(run) => {
                    debug!(
                        report_id = run.report_id,
                        run_id = run.run_id,
                        status = ?run.status,
                        "Scheduled report run recorded"
                    );
                    generated += 1;
                }
                None => break,
            }
        }
        Ok(generated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::MockReportSource;
    use lms_shared::{database::Database, test_utils::test_database_config};

    #[tokio::test]
    async fn test_poll_interval_has_lower_bound() {
        let db = Database::connect_lazy(&test_database_config()).unwrap();
        let worker =
            ScheduledReportWorker::with_config(db.pool().clone(), Arc::new(MockReportSource::new()), 0);
        assert_eq!(worker.poll_interval(), Duration::from_secs(1));

        let worker = ScheduledReportWorker::new(db.pool().clone(), Arc::new(MockReportSource::new()));
        assert_eq!(worker.poll_interval(), Duration::from_secs(60));
    }
}
