//! 定时报表生成

pub mod generator;
pub mod source;

pub use generator::{
    DUE_REPORT_COLUMNS, DueReport, RenderedReport, RunOutcome, generate_next_due, generate_now,
    render_report, table_to_csv,
};
pub use source::{PgReportSource, ReportSource, ReportTable};

#[cfg(test)]
pub use source::MockReportSource;
