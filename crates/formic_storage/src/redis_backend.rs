#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::backend::{BackendError, KvBackend, KvConnection, KvWrite, WriteBatch};

const REDIS_PORT: u16 = 6379;
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Redis-backed pool. Each checkout hands out one pooled connection for the duration of a
/// single store operation; a `PING` on borrow weeds out dead connections.
pub struct RedisBackend {
    pool: r2d2::Pool<redis::Client>,
}

impl RedisBackend {
    pub fn connect(host: &str, pool_size: u32) -> Result<Self, BackendError> {
        let url = format!("redis://{host}:{REDIS_PORT}/");
        let client = redis::Client::open(url.as_str())
            .map_err(|err| BackendError::Unavailable(format!("invalid redis url {url}: {err}")))?;
        let pool = r2d2::Pool::builder()
            .max_size(pool_size.max(1))
            .connection_timeout(CONNECTION_TIMEOUT)
            .test_on_check_out(true)
            .build(client)
            .map_err(|err| BackendError::Unavailable(format!("redis pool: {err}")))?;
        Ok(Self { pool })
    }
}

impl KvBackend for RedisBackend {
    fn checkout(&self) -> Result<Box<dyn KvConnection + '_>, BackendError> {
        let conn = self
            .pool
            .get()
            .map_err(|err| BackendError::Unavailable(format!("redis checkout: {err}")))?;
        Ok(Box::new(RedisConnection { conn }))
    }
}

struct RedisConnection {
    conn: r2d2::PooledConnection<redis::Client>,
}

fn command_error(command: &'static str) -> impl FnOnce(redis::RedisError) -> BackendError {
    move |err| BackendError::Command {
        command,
        detail: err.to_string(),
    }
}

impl KvConnection for RedisConnection {
    fn hash_get_all(&mut self, key: &str) -> Result<BTreeMap<String, String>, BackendError> {
        redis::cmd("HGETALL")
            .arg(key)
            .query(&mut *self.conn)
            .map_err(command_error("HGETALL"))
    }

    fn exists(&mut self, key: &str) -> Result<bool, BackendError> {
        redis::cmd("EXISTS")
            .arg(key)
            .query(&mut *self.conn)
            .map_err(command_error("EXISTS"))
    }

    fn set_members(&mut self, key: &str) -> Result<BTreeSet<String>, BackendError> {
        redis::cmd("SMEMBERS")
            .arg(key)
            .query(&mut *self.conn)
            .map_err(command_error("SMEMBERS"))
    }

    fn set_contains(&mut self, key: &str, member: &str) -> Result<bool, BackendError> {
        redis::cmd("SISMEMBER")
            .arg(key)
            .arg(member)
            .query(&mut *self.conn)
            .map_err(command_error("SISMEMBER"))
    }

    fn sorted_set_rev_with_scores(
        &mut self,
        key: &str,
    ) -> Result<Vec<(String, i64)>, BackendError> {
        let rows: Vec<(String, f64)> = redis::cmd("ZREVRANGEBYSCORE")
            .arg(key)
            .arg("+inf")
            .arg("-inf")
            .arg("WITHSCORES")
            .query(&mut *self.conn)
            .map_err(command_error("ZREVRANGEBYSCORE"))?;
        Ok(rows
            .into_iter()
            .map(|(member, score)| (member, score as i64))
            .collect())
    }

    fn apply(&mut self, batch: WriteBatch) -> Result<(), BackendError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for write in batch.into_writes() {
            let mut cmd = redis::cmd(write.command());
            match write {
                KvWrite::HashSet { key, fields } => {
                    cmd.arg(key);
                    for (field, value) in fields {
                        cmd.arg(field).arg(value);
                    }
                }
                KvWrite::SetAdd { key, member } | KvWrite::SetRemove { key, member } => {
                    cmd.arg(key).arg(member);
                }
                KvWrite::SortedSetAdd { key, score, member } => {
                    cmd.arg(key).arg(score).arg(member);
                }
            }
            pipe.add_command(cmd).ignore();
        }
        pipe.query::<()>(&mut *self.conn)
            .map_err(command_error("EXEC"))
    }

    fn ping(&mut self) -> Result<(), BackendError> {
        redis::cmd("PING")
            .query::<String>(&mut *self.conn)
            .map(|_| ())
            .map_err(command_error("PING"))
    }
}
