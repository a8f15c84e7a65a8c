//! 工单编号

use chrono::{DateTime, Utc};

use super::affiliate::random_alnum;

const TICKET_SUFFIX_LEN: usize = 6;

/// 生成形如 `TKT-20240115-A1B2C3` 的工单编号
pub fn generate_ticket_number(now: DateTime<Utc>) -> String {
    format!("TKT-{}-{}", now.format("%Y%m%d"), random_alnum(TICKET_SUFFIX_LEN))
}
