//! 通用请求 DTO 定义
//!
//! 分页、日期范围、关键字等所有列表接口共用的查询参数。
//! 各实体的请求体定义在对应的 handler 模块中。

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use lms_shared::config::PaginationConfig;
use serde::Deserialize;
use validator::Validate;

use crate::error::AdminError;

/// 分页查询参数
///
/// page_size 缺省时按列表名从配置解析
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl PaginationParams {
    /// 结合配置解析出实际的分页参数
    ///
    /// 页码上限保证 offset 不会溢出 i64
    pub fn resolve(&self, config: &PaginationConfig, list_name: &str) -> Page {
        let page_size = config.resolve(list_name, self.page_size).max(1);
        let max_page = i64::MAX / page_size;
        Page {
            page: self.page.unwrap_or(1).clamp(1, max_page),
            page_size,
        }
    }
}

/// 已解析的分页参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: i64,
    pub page_size: i64,
}

impl Page {
    /// 计算数据库查询的 offset
    pub fn offset(&self) -> i64 {
        (self.page - 1).max(0).saturating_mul(self.page_size)
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }
}

/// 日期范围过滤（按天，闭区间）
///
/// 查询串形如 `startDate=2024-01-01&endDate=2024-01-31`
#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeParams {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl DateRangeParams {
    /// 校验起止顺序
    pub fn validate(&self) -> Result<(), AdminError> {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) if start > end => Err(AdminError::Validation(
                "开始日期不能晚于结束日期".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// 起始时刻（含）：开始日期的 00:00 UTC
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_date.map(start_of_day)
    }

    /// 结束时刻（不含）：结束日期次日的 00:00 UTC
    pub fn end_time_exclusive(&self) -> Option<DateTime<Utc>> {
        self.end_date
            .and_then(|d| d.checked_add_days(Days::new(1)))
            .map(start_of_day)
    }

    /// 补齐缺省值后的时间窗口，缺省为截至今天的最近 `default_days` 天
    pub fn window_or_last_days(&self, default_days: u64, today: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let end = self.end_date.unwrap_or(today);
        let start = self
            .start_date
            .unwrap_or_else(|| end.checked_sub_days(Days::new(default_days.saturating_sub(1))).unwrap_or(end));
        let range = DateRangeParams {
            start_date: Some(start),
            end_date: Some(end),
        };
        (
            start_of_day(start),
            range.end_time_exclusive().unwrap_or_else(|| start_of_day(end)),
        )
    }
}

impl DateRangeParams {
    /// 带长度上限的时间窗口，超过 `max_days` 天返回校验错误
    pub fn bounded_window(
        &self,
        default_days: u64,
        max_days: i64,
        today: NaiveDate,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>), AdminError> {
        self.validate()?;
        let (start, end) = self.window_or_last_days(default_days, today);
        if (end - start).num_days() > max_days {
            return Err(AdminError::Validation(format!(
                "日期范围不能超过{}天",
                max_days
            )));
        }
        Ok((start, end))
    }
}

/// 当天 00:00 UTC
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// 将搜索关键字转换为 ILIKE 模式
///
/// 空白关键字视为未提供；`%`、`_`、`\` 会被转义为字面量
pub fn like_pattern(keyword: Option<&str>) -> Option<String> {
    let keyword = keyword.map(str::trim).filter(|k| !k.is_empty())?;
    let mut escaped = String::with_capacity(keyword.len() + 2);
    escaped.push('%');
    for ch in keyword.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    Some(escaped)
}

/// 批量操作的 ID 列表
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct IdsRequest {
    #[validate(length(min = 1, max = 100, message = "一次最多处理1-100条记录"))]
    pub ids: Vec<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_resolve_defaults() {
        let config = PaginationConfig::default();
        let page = PaginationParams::default().resolve(&config, "badges");
        assert_eq!(page, Page { page: 1, page_size: 20 });
        assert_eq!(page.offset(), 0);
    }

    #[test]
    fn test_pagination_offset() {
        let config = PaginationConfig::default();
        let params = PaginationParams {
            page: Some(3),
            page_size: Some(10),
        };
        let page = params.resolve(&config, "badges");
        assert_eq!(page.offset(), 20);
        assert_eq!(page.limit(), 10);
    }

    #[test]
    fn test_pagination_page_below_one() {
        let config = PaginationConfig::default();
        let params = PaginationParams {
            page: Some(0),
            page_size: None,
        };
        assert_eq!(params.resolve(&config, "x").page, 1);
    }

    #[test]
    fn test_pagination_huge_page_does_not_overflow() {
        let config = PaginationConfig::default();
        let params = PaginationParams {
            page: Some(i64::MAX / 2),
            page_size: None,
        };
        let page = params.resolve(&config, "badges");
        assert_eq!(page.page, i64::MAX / 20);
        assert!(page.offset() > 0);

        let params = PaginationParams {
            page: Some(i64::MAX),
            page_size: Some(100),
        };
        let page = params.resolve(&config, "badges");
        assert!(page.offset() >= 0);
        assert!(page.offset() <= i64::MAX - page.limit());

        let raw = Page { page: i64::MAX, page_size: 100 };
        assert_eq!(raw.offset(), i64::MAX);
    }

    #[test]
    fn test_bounded_window_rejects_long_ranges() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();

        let range = DateRangeParams {
            start_date: Some(NaiveDate::from_ymd_opt(1, 1, 1).unwrap()),
            end_date: None,
        };
        assert!(matches!(
            range.bounded_window(30, 366, today),
            Err(AdminError::Validation(_))
        ));

        let range = DateRangeParams {
            start_date: Some(NaiveDate::from_ymd_opt(2023, 7, 1).unwrap()),
            end_date: Some(today),
        };
        let (start, end) = range.bounded_window(30, 366, today).unwrap();
        assert_eq!((end - start).num_days(), 366);

        let (start, end) = DateRangeParams::default().bounded_window(30, 366, today).unwrap();
        assert_eq!((end - start).num_days(), 30);
    }

    #[test]
    fn test_pagination_uses_list_override() {
        let mut config = PaginationConfig::default();
        config.lists.insert("enrollments".to_string(), 50);
        let page = PaginationParams::default().resolve(&config, "enrollments");
        assert_eq!(page.page_size, 50);
    }

    #[test]
    fn test_date_range_bounds() {
        let range = DateRangeParams {
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 31),
        };
        assert!(range.validate().is_ok());
        assert_eq!(
            range.start_time().unwrap().to_rfc3339(),
            "2024-01-01T00:00:00+00:00"
        );
        // 结束日期当天全部包含在内
        assert_eq!(
            range.end_time_exclusive().unwrap().to_rfc3339(),
            "2024-02-01T00:00:00+00:00"
        );
    }

    #[test]
    fn test_date_range_rejects_reversed() {
        let range = DateRangeParams {
            start_date: NaiveDate::from_ymd_opt(2024, 2, 1),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 1),
        };
        assert!(matches!(range.validate(), Err(AdminError::Validation(_))));
    }

    #[test]
    fn test_window_defaults_to_last_days() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 30).unwrap();
        let (start, end) = DateRangeParams::default().window_or_last_days(30, today);
        assert_eq!(start.date_naive(), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(end.date_naive(), NaiveDate::from_ymd_opt(2024, 3, 31).unwrap());
    }

    #[test]
    fn test_like_pattern() {
        assert_eq!(like_pattern(Some("rust")), Some("%rust%".to_string()));
        assert_eq!(like_pattern(Some("  ")), None);
        assert_eq!(like_pattern(None), None);
        assert_eq!(like_pattern(Some("50%_off")), Some("%50\\%\\_off%".to_string()));
    }
}
