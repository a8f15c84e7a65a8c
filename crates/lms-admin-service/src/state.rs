//! 应用状态定义
//!
//! 包含 Axum 路由共享的应用状态

use lms_shared::{cache::Cache, config::AppConfig};
use serde::{Serialize, de::DeserializeOwned};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::report::{PgReportSource, ReportSource};

/// Axum 应用共享状态
///
/// 包含数据库连接池、缓存客户端和配置，通过 Arc 在 handler 间共享
#[derive(Clone)]
pub struct AppState {
    /// PostgreSQL 连接池
    pub pool: PgPool,
    /// Redis 缓存客户端
    pub cache: Arc<Cache>,
    /// 应用配置（分页、防伪令牌、报表等）
    pub config: Arc<AppConfig>,
    /// 定时报表数据源
    pub report_source: Arc<dyn ReportSource>,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(pool: PgPool, cache: Arc<Cache>, config: Arc<AppConfig>) -> Self {
        let report_source = Arc::new(PgReportSource::new(pool.clone()));
        Self {
            pool,
            cache,
            config,
            report_source,
        }
    }
}

// 缓存只做加速：读写失败记录告警后回退到数据库
impl AppState {
    /// 读取缓存，失败视为未命中
    pub async fn cache_get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.cache.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, falling back to database");
                None
            }
        }
    }

    /// 写入缓存
    pub async fn cache_set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        if let Err(e) = self.cache.set(key, value, ttl).await {
            warn!(key, error = %e, "Cache write failed");
        }
    }

    /// 删除缓存
    pub async fn cache_invalidate(&self, key: &str) {
        if let Err(e) = self.cache.delete(key).await {
            warn!(key, error = %e, "Cache invalidation failed");
        }
    }
}
