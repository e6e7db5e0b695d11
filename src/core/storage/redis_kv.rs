//! Redis-backed [`KvClient`]

use super::kv::KvClient;
use crate::error::{RbacError, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::HashMap;

/// [`KvClient`] over a multiplexed Redis connection
#[derive(Clone)]
pub struct RedisKv {
    conn: MultiplexedConnection,
}

impl RedisKv {
    pub fn new(conn: MultiplexedConnection) -> Self {
        RedisKv { conn }
    }

    /// Open a multiplexed connection to `url`
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(unavailable)?;
        Ok(RedisKv { conn })
    }
}

fn unavailable(err: redis::RedisError) -> RbacError {
    RbacError::Unavailable(err.to_string())
}

/// Escape glob metacharacters so a prefix matches literally in `SSCAN MATCH`
fn glob_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

#[async_trait]
impl KvClient for RedisKv {
    async fn set_add(&self, set: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(set, member).await.map_err(unavailable)
    }

    async fn set_remove(&self, set: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>(set, member).await.map_err(unavailable)
    }

    async fn set_contains(&self, set: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        conn.sismember::<_, _, bool>(set, member)
            .await
            .map_err(unavailable)
    }

    async fn set_scan(&self, set: &str, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut iter = conn
            .sscan_match::<_, _, String>(set, glob_prefix(prefix))
            .await
            .map_err(unavailable)?;

        let mut members = Vec::new();
        while let Some(member) = iter.next_item().await {
            members.push(member);
        }
        Ok(members)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        conn.hgetall::<_, HashMap<String, String>>(key)
            .await
            .map_err(unavailable)
    }

    async fn hash_set(&self, key: &str, fields: Vec<(String, String)>) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.hset_multiple::<_, _, _, ()>(key, &fields)
            .await
            .map_err(unavailable)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(unavailable)
    }
}
