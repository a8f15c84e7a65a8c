//! HTTP 请求处理器模块
//!
//! 每个模块对应一个后台功能，请求/响应 DTO 与处理器放在一起

pub mod achievement;
pub mod affiliate;
pub mod badge;
pub mod comment;
pub mod country_restriction;
pub mod course_analytics;
pub mod enrollment;
pub mod error_log;
pub mod financial_report;
pub mod flash_sale;
pub mod scheduled_report;
pub mod settings;
pub mod support_ticket;
pub mod tax_setting;
pub mod user_session;
