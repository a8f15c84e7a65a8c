//! 后台领域模型
//!
//! 枚举、状态规则以及不依赖数据库的业务计算

pub mod access;
pub mod affiliate;
pub mod enums;
pub mod schedule;
pub mod ticket;

pub use access::{AccessDecision, AccessRule, evaluate_access};
pub use affiliate::{commission_amount_cents, generate_affiliate_code};
pub use enums::*;
pub use schedule::{ReportSchedule, reporting_period};
pub use ticket::generate_ticket_number;
