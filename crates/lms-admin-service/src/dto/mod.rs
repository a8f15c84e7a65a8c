//! 通用 DTO 模块
//!
//! 分页、过滤参数与统一响应结构

pub mod request;
pub mod response;

pub use request::{DateRangeParams, IdsRequest, Page, PaginationParams, like_pattern, start_of_day};
pub use response::{AffectedResponse, ApiResponse, CreatedResponse, PageResponse, StatusCount};
