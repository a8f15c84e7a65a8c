//! 后台枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx，VARCHAR 存储）和 JSON（serde）序列化。
//! 带状态流转的枚举在这里集中定义合法的转换关系。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 成就达成条件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum CriteriaType {
    CoursesCompleted,
    LessonsCompleted,
    QuizzesPassed,
    ReviewsWritten,
    StreakDays,
}

impl CriteriaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CoursesCompleted => "courses_completed",
            Self::LessonsCompleted => "lessons_completed",
            Self::QuizzesPassed => "quizzes_passed",
            Self::ReviewsWritten => "reviews_written",
            Self::StreakDays => "streak_days",
        }
    }
}

/// 佣金状态
///
/// pending -> approved | rejected，approved -> paid
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum CommissionStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Paid,
}

impl CommissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Paid => "paid",
        }
    }

    pub fn can_transition_to(&self, target: CommissionStatus) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Approved)
                | (Self::Pending, Self::Rejected)
                | (Self::Approved, Self::Paid)
        )
    }
}

/// 评论审核状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum CommentStatus {
    #[default]
    Pending,
    Approved,
    Spam,
    Rejected,
}

impl CommentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Spam => "spam",
            Self::Rejected => "rejected",
        }
    }
}

/// 地区限制类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum RestrictionType {
    /// 黑名单：命中即拒绝
    Block,
    /// 白名单：存在白名单时，未命中即拒绝
    Allow,
}

impl RestrictionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Allow => "allow",
        }
    }
}

/// 选课状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum EnrollmentStatus {
    #[default]
    Active,
    Completed,
    Suspended,
    Cancelled,
    Expired,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Suspended => "suspended",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Active => "学习中",
            Self::Completed => "已完成",
            Self::Suspended => "已暂停",
            Self::Cancelled => "已取消",
            Self::Expired => "已过期",
        }
    }
}

/// 错误日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum ErrorLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

/// 工单状态
///
/// open -> in_progress | closed
/// in_progress -> resolved | closed
/// resolved -> closed | in_progress（重新打开）
/// closed 为终态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum TicketStatus {
    #[default]
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Open => "待处理",
            Self::InProgress => "处理中",
            Self::Resolved => "已解决",
            Self::Closed => "已关闭",
        }
    }

    pub fn can_transition_to(&self, target: TicketStatus) -> bool {
        matches!(
            (self, target),
            (Self::Open, Self::InProgress)
                | (Self::Open, Self::Closed)
                | (Self::InProgress, Self::Resolved)
                | (Self::InProgress, Self::Closed)
                | (Self::Resolved, Self::Closed)
                | (Self::Resolved, Self::InProgress)
        )
    }
}

/// 工单优先级
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum TicketPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl TicketPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

/// 支付状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }
}

/// 会话设备类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
    #[default]
    Unknown,
}

/// 定时报表类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum ReportType {
    Revenue,
    Enrollments,
    Commissions,
    CoursePerformance,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Revenue => "revenue",
            Self::Enrollments => "enrollments",
            Self::Commissions => "commissions",
            Self::CoursePerformance => "course_performance",
        }
    }
}

/// 定时报表频率
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum ReportFrequency {
    Daily,
    Weekly,
    Monthly,
    /// 自定义 cron 表达式
    Custom,
}

impl ReportFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Custom => "custom",
        }
    }
}

/// 报表运行结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum ReportRunStatus {
    Succeeded,
    Failed,
}

impl ReportRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

/// 限时特惠阶段（由开关和时间窗口推导，不落库）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashSalePhase {
    Inactive,
    Scheduled,
    Running,
    Ended,
}

impl FlashSalePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Ended => "ended",
        }
    }

    /// 根据开关与时间窗口推导当前阶段
    pub fn resolve(
        is_active: bool,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        if !is_active {
            Self::Inactive
        } else if now < starts_at {
            Self::Scheduled
        } else if now < ends_at {
            Self::Running
        } else {
            Self::Ended
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commission_transitions() {
        use CommissionStatus::*;

        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Paid));

        // 未审核不能直接支付
        assert!(!Pending.can_transition_to(Paid));
        assert!(!Rejected.can_transition_to(Paid));
        assert!(!Paid.can_transition_to(Paid));
        assert!(!Paid.can_transition_to(Pending));
        assert!(!Approved.can_transition_to(Rejected));
    }

    #[test]
    fn test_ticket_transitions() {
        use TicketStatus::*;

        assert!(Open.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Resolved));
        assert!(InProgress.can_transition_to(Closed));
        assert!(Resolved.can_transition_to(Closed));
        assert!(Resolved.can_transition_to(InProgress));

        assert!(!Open.can_transition_to(Resolved));
        assert!(!Open.can_transition_to(Open));
        for target in [Open, InProgress, Resolved, Closed] {
            assert!(!Closed.can_transition_to(target), "closed 是终态");
        }
    }

    #[test]
    fn test_as_str_matches_serde() {
        let json = serde_json::to_value(TicketStatus::InProgress).unwrap();
        assert_eq!(json, TicketStatus::InProgress.as_str());

        let json = serde_json::to_value(ReportType::CoursePerformance).unwrap();
        assert_eq!(json, ReportType::CoursePerformance.as_str());

        let json = serde_json::to_value(CriteriaType::StreakDays).unwrap();
        assert_eq!(json, CriteriaType::StreakDays.as_str());
    }

    #[test]
    fn test_flash_sale_phase() {
        use chrono::Duration;

        let now = Utc::now();
        let start = now - Duration::hours(1);
        let end = now + Duration::hours(1);

        assert_eq!(FlashSalePhase::resolve(false, start, end, now), FlashSalePhase::Inactive);
        assert_eq!(FlashSalePhase::resolve(true, start, end, now), FlashSalePhase::Running);
        assert_eq!(
            FlashSalePhase::resolve(true, now + Duration::minutes(5), end, now),
            FlashSalePhase::Scheduled
        );
        // 结束时刻本身视为已结束
        assert_eq!(FlashSalePhase::resolve(true, start, now, now), FlashSalePhase::Ended);
    }

    #[test]
    fn test_deserialize_from_query_value() {
        let status: EnrollmentStatus = serde_json::from_str("\"suspended\"").unwrap();
        assert_eq!(status, EnrollmentStatus::Suspended);
        assert!(serde_json::from_str::<EnrollmentStatus>("\"Suspended\"").is_err());
    }
}
