//! Redis 缓存管理模块
//!
//! 提供 Redis 连接管理和常用缓存操作封装。

use crate::config::RedisConfig;
use crate::error::{LmsError, Result};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;
use tracing::{info, instrument};

/// Redis 缓存客户端
///
/// 创建时不建立连接，每次操作获取多路复用连接
#[derive(Clone)]
pub struct Cache {
    client: Client,
    key_prefix: String,
}

impl Cache {
    /// 创建 Redis 客户端
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        info!("Redis client created");
        Ok(Self {
            client,
            key_prefix: config.key_prefix.clone(),
        })
    }

    /// 拼接带前缀的缓存键
    pub fn key(&self, key: &str) -> String {
        if self.key_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.key_prefix, key)
        }
    }

    async fn get_conn(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(LmsError::from)
    }

    /// 健康检查
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.get_conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(LmsError::from)
    }

    /// 获取值
    #[instrument(skip(self))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.get_conn().await?;
        let value: Option<String> = conn.get(self.key(key)).await?;

        match value {
            Some(v) => Ok(Some(serde_json::from_str(&v)?)),
            None => Ok(None),
        }
    }

    /// 设置值
    #[instrument(skip(self, value))]
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let serialized = serde_json::to_string(value)?;

        let _: () = conn.set_ex(self.key(key), serialized, ttl.as_secs()).await?;
        Ok(())
    }

    /// 删除值
    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let _: () = conn.del(self.key(key)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_prefix() {
        let cache = Cache::new(&RedisConfig::default()).unwrap();
        assert_eq!(cache.key("analytics:overview"), "lms:analytics:overview");

        let bare = Cache::new(&RedisConfig {
            key_prefix: String::new(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(bare.key("settings:email"), "settings:email");
    }

    #[tokio::test]
    #[ignore] // 需要 Redis 连接
    async fn test_set_get_delete() {
        let cache = Cache::new(&crate::test_utils::test_redis_config()).unwrap();
        cache
            .set("test:value", &42_i64, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(cache.get::<i64>("test:value").await.unwrap(), Some(42));
        cache.delete("test:value").await.unwrap();
        assert_eq!(cache.get::<i64>("test:value").await.unwrap(), None);
    }
}
