//! 定时报表调度计算
//!
//! 下次运行时间与报表统计区间的纯函数计算，全部使用 UTC。

use std::str::FromStr;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, Utc};
use cron::Schedule;

use super::ReportFrequency;
use crate::error::AdminError;

/// 报表调度配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSchedule {
    pub frequency: ReportFrequency,
    /// 发送时刻（0-23 点）
    pub send_hour: u32,
    /// 周几发送（1=周一 ... 7=周日），weekly 必填
    pub day_of_week: Option<u32>,
    /// 每月几号发送（1-28），monthly 必填
    pub day_of_month: Option<u32>,
    /// custom 频率的 cron 表达式（秒 分 时 日 月 周）
    pub cron_expression: Option<String>,
}

impl ReportSchedule {
    /// 校验调度参数组合
    pub fn validate(&self) -> Result<(), AdminError> {
        if self.send_hour > 23 {
            return Err(AdminError::Validation("发送时刻必须在0-23之间".to_string()));
        }
        match self.frequency {
            ReportFrequency::Daily => Ok(()),
            ReportFrequency::Weekly => match self.day_of_week {
                Some(1..=7) => Ok(()),
                _ => Err(AdminError::Validation(
                    "每周报表必须指定1-7之间的星期".to_string(),
                )),
            },
            ReportFrequency::Monthly => match self.day_of_month {
                Some(1..=28) => Ok(()),
                _ => Err(AdminError::Validation(
                    "每月报表必须指定1-28之间的日期".to_string(),
                )),
            },
            ReportFrequency::Custom => self.cron().map(|_| ()),
        }
    }

    fn cron(&self) -> Result<Schedule, AdminError> {
        let expr = self
            .cron_expression
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| AdminError::InvalidCronExpression("自定义频率必须提供 cron 表达式".to_string()))?;
        Schedule::from_str(expr).map_err(|e| AdminError::InvalidCronExpression(format!("{}: {}", expr, e)))
    }

    /// 严格晚于 `after` 的下一次运行时间
    pub fn next_run_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, AdminError> {
        self.validate()?;
        let hour = NaiveTime::from_hms_opt(self.send_hour, 0, 0)
            .ok_or_else(|| AdminError::Validation("发送时刻必须在0-23之间".to_string()))?;
        let at = |date: NaiveDate| date.and_time(hour).and_utc();
        let today = after.date_naive();

        let next = match self.frequency {
            ReportFrequency::Daily => (0..=1)
                .filter_map(|offset| today.checked_add_days(Days::new(offset)))
                .map(at)
                .find(|candidate| *candidate > after),
            ReportFrequency::Weekly => {
                let weekday = self.day_of_week.unwrap_or(1);
                (0..=7)
                    .filter_map(|offset| today.checked_add_days(Days::new(offset)))
                    .filter(|date| date.weekday().number_from_monday() == weekday)
                    .map(at)
                    .find(|candidate| *candidate > after)
            }
            ReportFrequency::Monthly => {
                let day = self.day_of_month.unwrap_or(1);
                let month_start = today.with_day(1);
                (0..=1)
                    .filter_map(|offset| month_start?.checked_add_months(Months::new(offset)))
                    .filter_map(|first| first.with_day(day))
                    .map(at)
                    .find(|candidate| *candidate > after)
            }
            ReportFrequency::Custom => self.cron()?.after(&after).next(),
        };

        next.ok_or_else(|| AdminError::InvalidCronExpression("无法计算下次运行时间".to_string()))
    }
}

/// 报表统计区间 `[start, end)`
///
/// - daily：运行日的前一天
/// - weekly：截至运行日 0 点的前 7 天
/// - monthly：上一个自然月
/// - custom：自上次运行至本次运行，首次运行取前一天
pub fn reporting_period(
    frequency: ReportFrequency,
    run_at: DateTime<Utc>,
    last_run_at: Option<DateTime<Utc>>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let run_day = run_at.date_naive();
    let midnight = run_day.and_time(NaiveTime::MIN).and_utc();
    let days_before = |n: u64| {
        run_day
            .checked_sub_days(Days::new(n))
            .unwrap_or(run_day)
            .and_time(NaiveTime::MIN)
            .and_utc()
    };

    match frequency {
        ReportFrequency::Daily => (days_before(1), midnight),
        ReportFrequency::Weekly => (days_before(7), midnight),
        ReportFrequency::Monthly => {
            let this_month = run_day.with_day(1).unwrap_or(run_day);
            let last_month = this_month
                .checked_sub_months(Months::new(1))
                .unwrap_or(this_month);
            (
                last_month.and_time(NaiveTime::MIN).and_utc(),
                this_month.and_time(NaiveTime::MIN).and_utc(),
            )
        }
        ReportFrequency::Custom => match last_run_at {
            Some(last) if last < run_at => (last, run_at),
            _ => (days_before(1), midnight),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn schedule(frequency: ReportFrequency) -> ReportSchedule {
        ReportSchedule {
            frequency,
            send_hour: 6,
            day_of_week: None,
            day_of_month: None,
            cron_expression: None,
        }
    }

    #[test]
    fn test_daily_next_run() {
        let s = schedule(ReportFrequency::Daily);
        assert_eq!(s.next_run_after(utc(2024, 1, 15, 5, 0)).unwrap(), utc(2024, 1, 15, 6, 0));
        // 恰好等于发送时刻时顺延到次日
        assert_eq!(s.next_run_after(utc(2024, 1, 15, 6, 0)).unwrap(), utc(2024, 1, 16, 6, 0));
        assert_eq!(s.next_run_after(utc(2024, 12, 31, 23, 0)).unwrap(), utc(2025, 1, 1, 6, 0));
    }

    #[test]
    fn test_weekly_next_run() {
        // 2024-01-15 是周一
        let mut s = schedule(ReportFrequency::Weekly);
        s.day_of_week = Some(1);
        assert_eq!(s.next_run_after(utc(2024, 1, 15, 7, 0)).unwrap(), utc(2024, 1, 22, 6, 0));
        assert_eq!(s.next_run_after(utc(2024, 1, 15, 5, 0)).unwrap(), utc(2024, 1, 15, 6, 0));

        s.day_of_week = Some(3);
        assert_eq!(s.next_run_after(utc(2024, 1, 15, 7, 0)).unwrap(), utc(2024, 1, 17, 6, 0));

        s.day_of_week = Some(7);
        assert_eq!(s.next_run_after(utc(2024, 1, 15, 7, 0)).unwrap(), utc(2024, 1, 21, 6, 0));
    }

    #[test]
    fn test_monthly_next_run() {
        let mut s = schedule(ReportFrequency::Monthly);
        s.day_of_month = Some(1);
        assert_eq!(s.next_run_after(utc(2024, 1, 15, 0, 0)).unwrap(), utc(2024, 2, 1, 6, 0));
        assert_eq!(s.next_run_after(utc(2024, 12, 20, 0, 0)).unwrap(), utc(2025, 1, 1, 6, 0));

        s.day_of_month = Some(28);
        assert_eq!(s.next_run_after(utc(2024, 2, 10, 0, 0)).unwrap(), utc(2024, 2, 28, 6, 0));
    }

    #[test]
    fn test_custom_next_run() {
        let mut s = schedule(ReportFrequency::Custom);
        s.cron_expression = Some("0 0 9 * * *".to_string());
        assert_eq!(s.next_run_after(utc(2024, 1, 15, 10, 0)).unwrap(), utc(2024, 1, 16, 9, 0));
    }

    #[test]
    fn test_validate_rejects_bad_schedules() {
        let mut weekly = schedule(ReportFrequency::Weekly);
        assert!(weekly.validate().is_err());
        weekly.day_of_week = Some(8);
        assert!(weekly.validate().is_err());

        let mut monthly = schedule(ReportFrequency::Monthly);
        monthly.day_of_month = Some(31);
        assert!(monthly.validate().is_err());

        let mut custom = schedule(ReportFrequency::Custom);
        assert!(matches!(custom.validate(), Err(AdminError::InvalidCronExpression(_))));
        custom.cron_expression = Some("invalid cron".to_string());
        assert!(matches!(custom.validate(), Err(AdminError::InvalidCronExpression(_))));

        let mut late = schedule(ReportFrequency::Daily);
        late.send_hour = 24;
        assert!(matches!(late.validate(), Err(AdminError::Validation(_))));
    }

    #[test]
    fn test_reporting_periods() {
        let run = utc(2024, 1, 16, 6, 0);
        assert_eq!(
            reporting_period(ReportFrequency::Daily, run, None),
            (utc(2024, 1, 15, 0, 0), utc(2024, 1, 16, 0, 0))
        );
        assert_eq!(
            reporting_period(ReportFrequency::Weekly, run, None),
            (utc(2024, 1, 9, 0, 0), utc(2024, 1, 16, 0, 0))
        );
        assert_eq!(
            reporting_period(ReportFrequency::Monthly, utc(2024, 3, 1, 6, 0), None),
            (utc(2024, 2, 1, 0, 0), utc(2024, 3, 1, 0, 0))
        );
        // 跨年
        assert_eq!(
            reporting_period(ReportFrequency::Monthly, utc(2024, 1, 1, 6, 0), None),
            (utc(2023, 12, 1, 0, 0), utc(2024, 1, 1, 0, 0))
        );
    }

    #[test]
    fn test_custom_period_since_last_run() {
        let last = utc(2024, 1, 15, 9, 0);
        let run = utc(2024, 1, 16, 9, 0);
        assert_eq!(reporting_period(ReportFrequency::Custom, run, Some(last)), (last, run));
        assert_eq!(
            reporting_period(ReportFrequency::Custom, run, None),
            (utc(2024, 1, 15, 0, 0), utc(2024, 1, 16, 0, 0))
        );
    }
}
