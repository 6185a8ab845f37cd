//! JSON encode/decode for request and response bodies.
//!
//! Encoding writes into a process-wide pool of scratch buffers so serialization
//! does not re-grow a fresh buffer under load. Decoding reads straight from the
//! response bytes and needs no scratch buffer. Output and decoding semantics are
//! exactly those of `serde_json`.

use std::sync::{LazyLock, Mutex};

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Error;
use crate::util::truncate_body;

const MAX_POOLED_BUFFERS: usize = 64;
const MAX_RETAINED_CAPACITY: usize = 256 * 1024;
const INITIAL_CAPACITY: usize = 1024;

static ENCODE_POOL: LazyLock<BufferPool> = LazyLock::new(|| BufferPool::new(MAX_POOLED_BUFFERS));

pub(crate) struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    max_buffers: usize,
}

impl BufferPool {
    pub(crate) fn new(max_buffers: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
            max_buffers,
        }
    }

    /// Takes a cleared buffer. Never waits: contention or an empty pool
    /// falls back to a fresh allocation.
    pub(crate) fn acquire(&self) -> PooledBuffer<'_> {
        let recycled = self
            .buffers
            .try_lock()
            .ok()
            .and_then(|mut buffers| buffers.pop());
        PooledBuffer {
            buffer: recycled.unwrap_or_else(|| Vec::with_capacity(INITIAL_CAPACITY)),
            pool: self,
        }
    }

    fn release(&self, mut buffer: Vec<u8>) {
        if buffer.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }
        buffer.clear();
        if let Ok(mut buffers) = self.buffers.try_lock()
            && buffers.len() < self.max_buffers
        {
            buffers.push(buffer);
        }
    }

    #[cfg(test)]
    pub(crate) fn idle_len(&self) -> usize {
        crate::util::lock_unpoisoned(&self.buffers).len()
    }
}

pub(crate) struct PooledBuffer<'a> {
    buffer: Vec<u8>,
    pool: &'a BufferPool,
}

impl std::ops::Deref for PooledBuffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl std::ops::DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buffer));
    }
}

pub fn encode_json<T>(value: &T) -> Result<Bytes, Error>
where
    T: Serialize + ?Sized,
{
    encode_json_with(&ENCODE_POOL, value)
}

pub(crate) fn encode_json_with<T>(pool: &BufferPool, value: &T) -> Result<Bytes, Error>
where
    T: Serialize + ?Sized,
{
    let mut buffer = pool.acquire();
    serde_json::to_writer(&mut *buffer, value).map_err(|source| Error::Serialize { source })?;
    Ok(Bytes::copy_from_slice(&buffer))
}

/// Decodes from the response body in place; unlike encoding there is no
/// intermediate buffer to pool.
pub fn decode_json<T>(body: &[u8]) -> Result<T, Error>
where
    T: DeserializeOwned,
{
    serde_json::from_slice(body).map_err(|source| Error::Deserialize {
        source,
        body: truncate_body(body),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use serde::{Deserialize, Serialize};

    use super::{BufferPool, decode_json, encode_json, encode_json_with};
    use crate::error::ErrorKind;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Ledger {
        #[serde(default)]
        id: String,
        #[serde(default)]
        balances: BTreeMap<String, i64>,
        #[serde(default)]
        tags: Vec<String>,
    }

    #[test]
    fn pooled_output_matches_serde_json() {
        let ledger = Ledger {
            id: "ldg_1".to_owned(),
            balances: BTreeMap::from([("usd".to_owned(), 1200), ("eur".to_owned(), -5)]),
            tags: vec!["main".to_owned()],
        };
        let pooled = encode_json(&ledger).expect("encode");
        let direct = serde_json::to_vec(&ledger).expect("direct encode");
        assert_eq!(pooled.as_ref(), direct.as_slice());
        let decoded: Ledger = decode_json(&pooled).expect("decode");
        assert_eq!(decoded, ledger);
    }

    #[test]
    fn empty_object_decodes_to_default_value() {
        let decoded: Ledger = decode_json(b"{}").expect("decode");
        assert_eq!(decoded, Ledger::default());
    }

    #[test]
    fn malformed_json_is_an_internal_error() {
        let error = decode_json::<Ledger>(b"{\"id\":").expect_err("should fail");
        assert_eq!(error.kind(), ErrorKind::Internal);
        let error = decode_json::<Ledger>(b"{} trailing").expect_err("should fail");
        assert_eq!(error.kind(), ErrorKind::Internal);
    }

    #[test]
    fn released_buffers_are_reused_and_cleared() {
        let pool = BufferPool::new(2);
        let first = encode_json_with(&pool, &serde_json::json!({"a": [1, 2, 3]})).expect("encode");
        assert_eq!(pool.idle_len(), 1);
        let second = encode_json_with(&pool, &serde_json::json!({})).expect("encode");
        assert_eq!(second.as_ref(), b"{}");
        assert_eq!(first.as_ref(), br#"{"a":[1,2,3]}"#);
        assert_eq!(pool.idle_len(), 1);
    }

    #[test]
    fn pool_never_retains_more_than_its_bound() {
        let pool = BufferPool::new(1);
        let first = pool.acquire();
        let second = pool.acquire();
        drop(first);
        drop(second);
        assert_eq!(pool.idle_len(), 1);
    }

    #[test]
    fn concurrent_encoding_is_isolated() {
        let pool = Arc::new(BufferPool::new(4));
        let handles = (0..16)
            .map(|index| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for round in 0..50 {
                        let value = serde_json::json!({ "worker": index, "round": round });
                        let bytes = encode_json_with(&pool, &value).expect("encode");
                        let decoded: serde_json::Value =
                            serde_json::from_slice(&bytes).expect("decode");
                        assert_eq!(decoded, value);
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().expect("worker thread");
        }
    }
}
