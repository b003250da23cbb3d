use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::sync::oneshot;
use tracing::debug;

use tabwire_core::Message;

const BASE62: &[u8; 62] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

fn base62_encode(mut num: u128) -> String {
    if num == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while num > 0 {
        out.push(BASE62[(num % 62) as usize]);
        num /= 62;
    }
    out.reverse();
    String::from_utf8(out).expect("base62 output is ascii")
}

/// Tracks outstanding requests awaiting their reply. One pending entry
/// per correlation id; resolving removes the entry atomically, so a
/// caller is fulfilled at most once.
pub struct CorrelationTable {
    pending: Mutex<HashMap<String, oneshot::Sender<Message>>>,
    last_stamp_ms: AtomicI64,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            last_stamp_ms: AtomicI64::new(0),
        }
    }

    /// Generates a fresh correlation id: base62 millisecond timestamp,
    /// three random base62 characters, and a two-character base62
    /// checksum of the preceding parts. The timestamp is forced strictly
    /// monotonic so ids cannot collide within the process lifetime even
    /// under bursts.
    fn next_id(&self) -> String {
        let now = chrono::Utc::now().timestamp_millis();
        let prev = self
            .last_stamp_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .expect("fetch_update closure always returns Some");
        let stamp = now.max(prev + 1);
        let mut id = base62_encode(stamp as u128);

        let mut rng = rand::rng();
        for _ in 0..3 {
            id.push(BASE62[rng.random_range(0..62)] as char);
        }

        let digest = Sha256::digest(id.as_bytes());
        let checksum = base62_encode(u128::from_be_bytes(
            digest[..16].try_into().expect("digest is 32 bytes"),
        ));
        id.push_str(&checksum[..2]);
        id
    }

    /// Issues an id and an awaitable for the eventual reply. The caller
    /// stamps the id into the outbound message.
    pub fn register(&self) -> (String, oneshot::Receiver<Message>) {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock().unwrap();
        let mut id = self.next_id();
        while pending.contains_key(&id) {
            id = self.next_id();
        }
        pending.insert(id.clone(), tx);
        (id, rx)
    }

    /// Fulfills the matching pending request with `reply`. Returns false
    /// for late, duplicate or unknown ids; that is a logged no-op, not an
    /// error, since replies can legitimately arrive after a caller gave
    /// up.
    pub fn resolve(&self, correlation_id: &str, reply: Message) -> bool {
        let sender = self.pending.lock().unwrap().remove(correlation_id);
        match sender {
            Some(tx) => {
                // The receiver may have been dropped by a caller that
                // timed out between cancel and now.
                let _ = tx.send(reply);
                true
            }
            None => {
                debug!(correlation_id = %correlation_id, "No pending request for reply");
                false
            }
        }
    }

    /// Timeout path: releases the id without fulfilling the caller. Any
    /// later resolve for the id takes the no-op path above.
    pub fn cancel(&self, correlation_id: &str) {
        self.pending.lock().unwrap().remove(correlation_id);
    }

    pub fn contains(&self, correlation_id: &str) -> bool {
        self.pending.lock().unwrap().contains_key(correlation_id)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}
