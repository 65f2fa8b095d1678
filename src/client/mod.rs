//! Async cache client
//!
//! Mirrors the server command set with typed results. One address gives a
//! plain pooled client; several addresses shard single-key commands by a
//! stable hash, fan `KEYS` out as a union and `DEL` as a sum.

pub mod connection;

use std::hash::Hasher;
use std::time::Duration;

use siphasher::sip::SipHasher13;
use thiserror::Error;

use crate::value::Value;
use crate::wire::{Payload, WireError};
pub use connection::{Connection, Pool};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("dial timeout")]
    DialTimeout,

    #[error("wire: {0}")]
    Wire(#[from] WireError),

    /// An `E` payload from the server, message verbatim.
    #[error("{0}")]
    Server(String),

    #[error("unexpected reply kind")]
    UnexpectedReply,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub addrs: Vec<String>,
    pub auth: String,
    pub pool_size: usize,
    pub dial_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            addrs: vec!["127.0.0.1:1234".to_owned()],
            auth: String::new(),
            pool_size: 10,
            dial_timeout: Duration::from_secs(5),
        }
    }
}

/// The client proper. Every method is one command; multi-address clients
/// route by key hash.
pub struct Cache {
    shards: Vec<Pool>,
    auth: String,
}

impl Cache {
    pub fn new(opts: Options) -> Self {
        let shards = opts
            .addrs
            .iter()
            .map(|addr| Pool::new(addr.clone(), opts.pool_size, opts.dial_timeout))
            .collect();
        Self {
            shards,
            auth: opts.auth,
        }
    }

    /// Stable shard index for a key: same key, same process or not, same
    /// shard.
    fn shard_index(&self, key: &[u8]) -> usize {
        let mut hasher = SipHasher13::new();
        hasher.write(key);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    fn request(name: &str, args: Vec<Payload>) -> Payload {
        let mut items = Vec::with_capacity(args.len() + 1);
        items.push(Payload::Value(Value::from(name)));
        items.extend(args);
        Payload::Array(items)
    }

    async fn ensure_auth(&self, conn: &mut Connection) -> Result<(), ClientError> {
        if self.auth.is_empty() || conn.authenticated() {
            return Ok(());
        }
        let reply = conn
            .call(&Self::request("AUTH", vec![Payload::from(self.auth.as_str())]))
            .await?;
        reply.as_bool().map_err(|_| ClientError::UnexpectedReply)?;
        conn.set_authenticated(true);
        Ok(())
    }

    async fn call_shard(
        &self,
        shard: usize,
        name: &str,
        args: Vec<Payload>,
    ) -> Result<Payload, ClientError> {
        let pool = &self.shards[shard];
        let mut conn = pool.get().await?;
        let result = async {
            self.ensure_auth(&mut conn).await?;
            conn.call(&Self::request(name, args)).await
        }
        .await;
        pool.put(conn);
        result
    }

    async fn call_keyed(
        &self,
        key: &[u8],
        name: &str,
        args: Vec<Payload>,
    ) -> Result<Payload, ClientError> {
        self.call_shard(self.shard_index(key), name, args).await
    }

    // ---- keyspace ----

    pub async fn del(&self, keys: &[&[u8]]) -> Result<i64, ClientError> {
        let args: Vec<Payload> = keys.iter().map(|k| Payload::from(k.to_vec())).collect();
        let mut deleted = 0;
        for shard in 0..self.shards.len() {
            let reply = self.call_shard(shard, "DEL", args.clone()).await?;
            deleted += expect_int(reply)?;
        }
        Ok(deleted)
    }

    pub async fn keys(&self) -> Result<Vec<Vec<u8>>, ClientError> {
        let mut all = Vec::new();
        for shard in 0..self.shards.len() {
            let reply = self.call_shard(shard, "KEYS", Vec::new()).await?;
            all.extend(expect_bytes_list(reply)?);
        }
        Ok(all)
    }

    pub async fn ttl(&self, key: &[u8]) -> Result<i64, ClientError> {
        let reply = self
            .call_keyed(key, "TTL", vec![Payload::from(key.to_vec())])
            .await?;
        expect_int(reply)
    }

    pub async fn expire(&self, key: &[u8], seconds: i64) -> Result<bool, ClientError> {
        let reply = self
            .call_keyed(
                key,
                "EXPIRE",
                vec![Payload::from(key.to_vec()), Payload::Int(seconds)],
            )
            .await?;
        expect_bool(reply)
    }

    // ---- string ----

    pub async fn set(&self, key: &[u8], value: &[u8]) -> Result<bool, ClientError> {
        let reply = self
            .call_keyed(
                key,
                "SET",
                vec![Payload::from(key.to_vec()), Payload::from(value.to_vec())],
            )
            .await?;
        expect_bool(reply)
    }

    pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ClientError> {
        let reply = self
            .call_keyed(key, "GET", vec![Payload::from(key.to_vec())])
            .await?;
        expect_opt_bytes(reply)
    }

    // ---- list ----

    async fn push(
        &self,
        name: &str,
        key: &[u8],
        values: &[&[u8]],
    ) -> Result<i64, ClientError> {
        let mut args = vec![Payload::from(key.to_vec())];
        args.extend(values.iter().map(|v| Payload::from(v.to_vec())));
        let reply = self.call_keyed(key, name, args).await?;
        expect_int(reply)
    }

    pub async fn lpush(&self, key: &[u8], values: &[&[u8]]) -> Result<i64, ClientError> {
        self.push("LPUSH", key, values).await
    }

    pub async fn rpush(&self, key: &[u8], values: &[&[u8]]) -> Result<i64, ClientError> {
        self.push("RPUSH", key, values).await
    }

    pub async fn lpop(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ClientError> {
        let reply = self
            .call_keyed(key, "LPOP", vec![Payload::from(key.to_vec())])
            .await?;
        expect_opt_bytes(reply)
    }

    pub async fn rpop(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ClientError> {
        let reply = self
            .call_keyed(key, "RPOP", vec![Payload::from(key.to_vec())])
            .await?;
        expect_opt_bytes(reply)
    }

    pub async fn lrange(
        &self,
        key: &[u8],
        start: i64,
        stop: i64,
    ) -> Result<Vec<Vec<u8>>, ClientError> {
        let reply = self
            .call_keyed(
                key,
                "LRANGE",
                vec![
                    Payload::from(key.to_vec()),
                    Payload::Int(start),
                    Payload::Int(stop),
                ],
            )
            .await?;
        expect_bytes_list(reply)
    }

    pub async fn lindex(&self, key: &[u8], index: i64) -> Result<Option<Vec<u8>>, ClientError> {
        let reply = self
            .call_keyed(
                key,
                "LINDEX",
                vec![Payload::from(key.to_vec()), Payload::Int(index)],
            )
            .await?;
        expect_opt_bytes(reply)
    }

    // ---- hash ----

    pub async fn hset(
        &self,
        key: &[u8],
        field: &[u8],
        value: &[u8],
    ) -> Result<bool, ClientError> {
        let reply = self
            .call_keyed(
                key,
                "HSET",
                vec![
                    Payload::from(key.to_vec()),
                    Payload::from(field.to_vec()),
                    Payload::from(value.to_vec()),
                ],
            )
            .await?;
        expect_bool(reply)
    }

    pub async fn hget(&self, key: &[u8], field: &[u8]) -> Result<Option<Vec<u8>>, ClientError> {
        let reply = self
            .call_keyed(
                key,
                "HGET",
                vec![Payload::from(key.to_vec()), Payload::from(field.to_vec())],
            )
            .await?;
        expect_opt_bytes(reply)
    }

    pub async fn hdel(&self, key: &[u8], fields: &[&[u8]]) -> Result<i64, ClientError> {
        let mut args = vec![Payload::from(key.to_vec())];
        args.extend(fields.iter().map(|f| Payload::from(f.to_vec())));
        let reply = self.call_keyed(key, "HDEL", args).await?;
        expect_int(reply)
    }

    pub async fn hkeys(&self, key: &[u8]) -> Result<Vec<Vec<u8>>, ClientError> {
        let reply = self
            .call_keyed(key, "HKEYS", vec![Payload::from(key.to_vec())])
            .await?;
        expect_bytes_list(reply)
    }
}

fn expect_int(reply: Payload) -> Result<i64, ClientError> {
    match reply {
        Payload::Int(n) => Ok(n),
        Payload::Nil => Ok(0),
        _ => Err(ClientError::UnexpectedReply),
    }
}

fn expect_bool(reply: Payload) -> Result<bool, ClientError> {
    match reply {
        Payload::Bool(b) => Ok(b),
        _ => Err(ClientError::UnexpectedReply),
    }
}

fn expect_opt_bytes(reply: Payload) -> Result<Option<Vec<u8>>, ClientError> {
    match reply {
        Payload::Value(v) => Ok(Some(v.into_bytes())),
        Payload::Nil => Ok(None),
        _ => Err(ClientError::UnexpectedReply),
    }
}

fn expect_bytes_list(reply: Payload) -> Result<Vec<Vec<u8>>, ClientError> {
    match reply {
        Payload::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Payload::Value(v) => Ok(v.into_bytes()),
                _ => Err(ClientError::UnexpectedReply),
            })
            .collect(),
        Payload::Nil => Ok(Vec::new()),
        _ => Err(ClientError::UnexpectedReply),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_index_is_stable_and_in_range() {
        let cache = Cache::new(Options {
            addrs: vec!["a:1".into(), "b:1".into(), "c:1".into()],
            ..Options::default()
        });
        for key in [b"alpha".as_slice(), b"beta", b"", b"\xff\x00"] {
            let first = cache.shard_index(key);
            assert!(first < 3);
            assert_eq!(first, cache.shard_index(key));
        }
        // different keys spread over more than one shard
        let spread: std::collections::HashSet<usize> = (0..64)
            .map(|i| cache.shard_index(format!("key-{}", i).as_bytes()))
            .collect();
        assert!(spread.len() > 1);
    }

    #[test]
    fn test_reply_decoding() {
        assert_eq!(expect_int(Payload::Int(7)).unwrap(), 7);
        assert_eq!(expect_int(Payload::Nil).unwrap(), 0);
        assert!(expect_int(Payload::Bool(true)).is_err());

        assert_eq!(
            expect_opt_bytes(Payload::Value(Value::from("x"))).unwrap(),
            Some(b"x".to_vec())
        );
        assert_eq!(expect_opt_bytes(Payload::Nil).unwrap(), None);

        let list = Payload::Array(vec![
            Payload::Value(Value::from("a")),
            Payload::Value(Value::from("b")),
        ]);
        assert_eq!(
            expect_bytes_list(list).unwrap(),
            vec![b"a".to_vec(), b"b".to_vec()]
        );
        assert_eq!(expect_bytes_list(Payload::Nil).unwrap(), Vec::<Vec<u8>>::new());
    }
}
