//! 后台 Worker
//!
//! 与 HTTP 服务同进程运行的轮询任务

pub mod scheduled_report_worker;

pub use scheduled_report_worker::ScheduledReportWorker;
