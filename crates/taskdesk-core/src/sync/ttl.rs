//! Server-side TTL arithmetic.

/// Oldest `synced_at` still retained at `now_ms`.
pub const fn retention_cutoff(now_ms: i64, ttl_ms: i64) -> i64 {
    now_ms.saturating_sub(ttl_ms)
}

/// A row is evicted once `synced_at < now - ttl`; the boundary instant itself is kept.
pub const fn is_expired(synced_at: i64, now_ms: i64, ttl_ms: i64) -> bool {
    synced_at < retention_cutoff(now_ms, ttl_ms)
}
