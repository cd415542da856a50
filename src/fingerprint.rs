//! Canonical JSON fingerprinting for cache keys.
//!
//! Grounded in `_cache_identity` (`routers/vector.py`) and the analogous
//! hashing in `routes/volume.py`: sorted keys, compact separators, ASCII
//! output, stable numeric rendering (integral values render without a
//! decimal point; `levels` dedupes while preserving first-appearance order).

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Builds the canonical JSON string for a set of request parameters and
/// hashes it with SHA-256, returning the lowercase hex digest.
pub fn fingerprint(params: &Value) -> String {
    let canonical = canonicalize(params);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    hex_encode(&digest)
}

/// Renders `value` as compact, key-sorted, ASCII-only JSON with stable
/// numeric formatting.
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&canonical_number(n)),
        Value::String(s) => write_canonical_string(s.trim(), out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical_string(key, out);
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
    }
}

fn canonical_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(f) = n.as_f64() {
        if f.fract() == 0.0 && f.abs() < 1e15 {
            return format!("{}", f as i64);
        }
        // Fixed precision, no scientific notation.
        let mut rendered = format!("{f:.10}");
        while rendered.ends_with('0') {
            rendered.pop();
        }
        if rendered.ends_with('.') {
            rendered.pop();
        }
        return rendered;
    }
    n.to_string()
}

fn write_canonical_string(s: &str, out: &mut String) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || (c as u32) > 0x7e => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Deduplicates `levels` while preserving first-appearance order, matching
/// the canonicalization rule for list-valued level parameters.
pub fn dedupe_preserve_order(levels: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(levels.len());
    for level in levels {
        if seen.insert(level.clone()) {
            out.push(level.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_fingerprint() {
        let a = json!({"run": "x", "stride": 2, "bbox": null});
        let b = json!({"bbox": null, "stride": 2, "run": "x"});
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn integral_floats_render_without_decimal() {
        assert_eq!(canonical_number(&serde_json::Number::from_f64(100.0).unwrap()), "100");
    }

    #[test]
    fn non_integral_floats_render_fixed_precision() {
        let rendered = canonical_number(&serde_json::Number::from_f64(0.5).unwrap());
        assert_eq!(rendered, "0.5");
    }

    #[test]
    fn whitespace_is_stripped_from_strings() {
        let a = json!({"run": " x "});
        let b = json!({"run": "x"});
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn dedupe_preserves_first_appearance_order() {
        let levels = vec!["850".to_string(), "500".to_string(), "850".to_string()];
        assert_eq!(dedupe_preserve_order(&levels), vec!["850", "500"]);
    }
}
