//! Redis-backed KVS: streams via XADD/XRANGE/XREAD, overrides via GETDEL,
//! wake-up hints via PUBLISH.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamRangeReply, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;

use super::{Kvs, KvsError, StreamEntry, StreamId};

/// Field name events are stored under inside each stream entry.
const DATA_FIELD: &str = "data";

/// KVS over a multiplexed Redis connection.
pub struct RedisKvs {
    manager: ConnectionManager,
}

impl RedisKvs {
    /// Opens a managed connection to the given Redis URL.
    pub async fn connect(url: &str) -> Result<Self, KvsError> {
        let client = redis::Client::open(url).map_err(transport)?;
        let manager = ConnectionManager::new(client).await.map_err(transport)?;
        Ok(Self { manager })
    }
}

fn transport(e: redis::RedisError) -> KvsError {
    KvsError::Transport(e.to_string())
}

fn decode_entry(id: &str, map: &std::collections::HashMap<String, redis::Value>) -> Result<StreamEntry, KvsError> {
    let id = StreamId::from_str(id)?;
    let value = map
        .get(DATA_FIELD)
        .ok_or_else(|| KvsError::Decode(format!("stream entry {id} missing data field")))?;
    let payload: String = redis::from_redis_value(value).map_err(|e| KvsError::Decode(e.to_string()))?;
    Ok(StreamEntry { id, payload })
}

#[async_trait]
impl Kvs for RedisKvs {
    async fn append(&self, stream: &str, payload: &str) -> Result<StreamId, KvsError> {
        let mut con = self.manager.clone();
        let id: String = con
            .xadd(stream, "*", &[(DATA_FIELD, payload)])
            .await
            .map_err(transport)?;
        StreamId::from_str(&id)
    }

    async fn range_from(&self, stream: &str, from: StreamId) -> Result<Vec<StreamEntry>, KvsError> {
        let mut con = self.manager.clone();
        let reply: StreamRangeReply = con
            .xrange(stream, from.to_string(), "+")
            .await
            .map_err(transport)?;
        reply
            .ids
            .iter()
            .map(|entry| decode_entry(&entry.id, &entry.map))
            .collect()
    }

    async fn read_after(
        &self,
        stream: &str,
        after: StreamId,
        block: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, KvsError> {
        let mut con = self.manager.clone();
        let options = StreamReadOptions::default()
            .block(block.as_millis() as usize)
            .count(count);
        let reply: Option<StreamReadReply> = con
            .xread_options(&[stream], &[after.to_string()], &options)
            .await
            .map_err(transport)?;
        let Some(reply) = reply else {
            return Ok(Vec::new());
        };
        let mut entries = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                entries.push(decode_entry(&entry.id, &entry.map)?);
            }
        }
        Ok(entries)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvsError> {
        let mut con = self.manager.clone();
        con.set::<_, _, ()>(key, value).await.map_err(transport)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvsError> {
        let mut con = self.manager.clone();
        con.set_ex::<_, _, ()>(key, value, ttl.as_secs())
            .await
            .map_err(transport)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvsError> {
        let mut con = self.manager.clone();
        con.get(key).await.map_err(transport)
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>, KvsError> {
        let mut con = self.manager.clone();
        let value: Option<String> = redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut con)
            .await
            .map_err(transport)?;
        Ok(value)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), KvsError> {
        let mut con = self.manager.clone();
        con.publish::<_, _, ()>(channel, payload)
            .await
            .map_err(transport)
    }

    async fn ping(&self) -> Result<(), KvsError> {
        let mut con = self.manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut con)
            .await
            .map_err(transport)?;
        Ok(())
    }
}
