//! Per-request audit logging and the rolling bbox popularity counter.
//!
//! Grounded in `request_logging_middleware` (`web.rs`): a `Uuid` request id,
//! `Instant`-based timing, and a structured `info!` line at completion. The
//! bbox popularity counter is a supplemented feature (prewarm candidate
//! discovery) built the way `coverage_cache.rs` tracks its own hit counts —
//! a `DashMap` keyed by a coarse bucket rather than a full histogram.

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use uuid::Uuid;

use crate::cache::CacheOutcome;
use crate::web::AppState;

/// Stashed in response extensions by a handler so [`audit_middleware`], which
/// only sees the framework-level `Response`, can still log the cache outcome
/// a service call produced.
#[derive(Debug, Clone, Copy)]
pub struct CacheHitMarker(pub CacheOutcome);

/// Fields captured for each request, independent of the handler's own
/// business-level response body.
struct AuditRecord {
    request_id: Uuid,
    method: String,
    path: String,
    status: u16,
    duration_ms: u64,
    cache_outcome: Option<&'static str>,
    client_ip: Option<String>,
}

/// Logs one structured line per request and records bbox popularity when the
/// request targeted a bbox-bearing endpoint.
pub async fn audit_middleware(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let request_id = Uuid::new_v4();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let query = request.uri().query().map(str::to_string);
    let client_ip = client_ip(request.headers(), addr);
    let started = Instant::now();

    let mut response = next.run(request).await;
    let duration_ms = started.elapsed().as_millis() as u64;
    let status = response.status().as_u16();
    let cache_outcome = response
        .extensions_mut()
        .remove::<CacheHitMarker>()
        .map(|marker| marker.0.as_str());

    let record = AuditRecord {
        request_id,
        method,
        path,
        status,
        duration_ms,
        cache_outcome,
        client_ip,
    };

    tracing::info!(
        request_id = %record.request_id,
        method = %record.method,
        path = %record.path,
        status = record.status,
        duration_ms = record.duration_ms,
        cache_outcome = record.cache_outcome.unwrap_or("n/a"),
        client_ip = record.client_ip.as_deref().unwrap_or("unknown"),
        "request completed"
    );

    if let Some(query) = query.as_deref() {
        if let Some(bbox_raw) = extract_bbox_param(query) {
            if let Some(key) = bbox_bucket_key(&bbox_raw) {
                state.bbox_stats.record(key);
            }
        }
    }

    response
}

/// `X-Forwarded-For`'s first hop, falling back to the socket's peer address.
fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| Some(peer.ip().to_string()))
}

fn extract_bbox_param(query: &str) -> Option<String> {
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("bbox="))
        .map(|raw| {
            percent_decode(raw)
        })
}

fn percent_decode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '+' => out.push(' '),
            '%' => {
                let hi = chars.next();
                let lo = chars.next();
                if let (Some(hi), Some(lo)) = (hi, lo) {
                    if let Ok(byte) = u8::from_str_radix(&format!("{hi}{lo}"), 16) {
                        out.push(byte as char);
                        continue;
                    }
                }
                out.push('%');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Quantizes a raw `min_lon,min_lat,max_lon,max_lat` (or 6-field volume) bbox
/// string to a 0.25-degree grid so nearby requests collapse onto the same
/// popularity bucket. Returns `None` for anything that doesn't parse as at
/// least 4 comma-separated numbers.
pub fn bbox_bucket_key(raw: &str) -> Option<String> {
    const BUCKET_DEG: f64 = 0.25;
    let values: Vec<f64> = raw
        .split(',')
        .take(4)
        .map(str::trim)
        .map(|v| v.parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    if values.len() != 4 {
        return None;
    }
    let bucketed: Vec<String> = values
        .iter()
        .map(|v| format!("{:.2}", (v / BUCKET_DEG).round() * BUCKET_DEG))
        .collect();
    Some(bucketed.join(","))
}

/// Rolling popularity counter over bbox buckets, read by the prewarm handler
/// to decide what's worth precomputing.
pub struct BboxStatsCounter {
    counts: DashMap<String, u64>,
}

impl BboxStatsCounter {
    pub fn new() -> Self {
        BboxStatsCounter {
            counts: DashMap::new(),
        }
    }

    pub fn record(&self, key: String) {
        *self.counts.entry(key).or_insert(0) += 1;
    }

    /// The `k` most-requested bbox buckets, most popular first.
    pub fn top_k(&self, k: usize) -> Vec<(String, u64)> {
        let mut entries: Vec<(String, u64)> = self
            .counts
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries.truncate(k);
        entries
    }
}

impl Default for BboxStatsCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_key_quantizes_nearby_bboxes_together() {
        let a = bbox_bucket_key("10.01,20.02,11.03,21.04").unwrap();
        let b = bbox_bucket_key("10.03,19.99,11.01,21.02").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn bucket_key_rejects_malformed_bbox() {
        assert!(bbox_bucket_key("not,a,bbox").is_none());
        assert!(bbox_bucket_key("1,2,3").is_none());
    }

    #[test]
    fn top_k_orders_by_descending_count() {
        let counter = BboxStatsCounter::new();
        counter.record("a".to_string());
        counter.record("b".to_string());
        counter.record("b".to_string());
        let top = counter.top_k(2);
        assert_eq!(top[0].0, "b");
        assert_eq!(top[0].1, 2);
    }

    #[test]
    fn percent_decode_handles_escaped_commas() {
        assert_eq!(percent_decode("1%2C2%2C3%2C4"), "1,2,3,4");
    }
}
