//! 在线学习平台管理后台服务
//!
//! 提供课程运营、营销、财务与系统设置相关的 REST API，统一挂载在 `/admin` 下。
//!
//! ## 核心功能
//!
//! - **激励体系**：成就、徽章的配置
//! - **推广分销**：推广员管理、佣金审核与结算
//! - **内容运营**：评论审核、国家/地区访问限制、限时特价
//! - **学习数据**：选课管理、课程分析、财务报表、定时报表
//! - **运维支持**：错误日志、工单、用户会话
//! - **系统设置**：邮件、媒体、支付、视频、短信、SEO 六组设置以及税率
//!
//! ## 模块结构
//!
//! - `dto`: 分页、过滤参数与统一响应结构
//! - `models`: 枚举与不依赖数据库的业务规则
//! - `error`: 错误类型定义
//! - `export`: CSV 导出
//! - `extract`: 自定义请求提取器
//! - `handlers`: HTTP 请求处理器
//! - `middleware`: 防伪令牌校验
//! - `report`: 定时报表生成
//! - `routes`: 路由配置
//! - `state`: 应用状态
//! - `worker`: 后台轮询任务
//!
//! ## 技术栈
//!
//! - Web 框架：Axum
//! - 数据库：sqlx (PostgreSQL)
//! - 数据验证：validator
//! - 序列化：serde (camelCase)

pub mod dto;
pub mod error;
pub mod export;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod report;
pub mod routes;
pub mod state;
pub mod worker;

// 重新导出核心类型
pub use dto::{ApiResponse, PageResponse, PaginationParams};
pub use error::{AdminError, Result};
pub use routes::build_router;
pub use state::AppState;
