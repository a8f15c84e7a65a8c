//! 中间件模块
//!
//! 提供写操作的防伪令牌校验

mod antiforgery;

pub use antiforgery::{
    AntiforgeryToken, antiforgery_middleware, generate_token, issue_token, tokens_match,
};
