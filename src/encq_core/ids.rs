use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

const BASE62: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Random-looking base62 token. Per-process uniqueness is what matters (temp
/// file suffixes, session ids), not cryptographic strength.
pub(crate) fn short_id(len: usize) -> String {
    let mut out = String::with_capacity(len);
    while out.len() < len {
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let mut hasher = DefaultHasher::new();
        now.hash(&mut hasher);
        counter.hash(&mut hasher);
        let mut v = hasher.finish();
        for _ in 0..8 {
            out.push(BASE62[(v % 62) as usize] as char);
            v /= 62;
            if out.len() == len {
                break;
            }
        }
    }
    out
}

pub(crate) fn session_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    format!("s_{millis}_{}", short_id(8))
}
