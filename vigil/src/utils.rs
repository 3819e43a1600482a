//! # Utility module

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in microseconds since the unix epoch.
///
/// This is the timestamp domain used for meta store discard times and for the `last_seen_ts`
/// argument of [`Source::get_frame`](crate::collab::Source::get_frame).
pub fn get_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

/// Parse a `key=value,key=value` parameter string.
///
/// Entries without `=` are returned with an empty value. Whitespace around keys and values is
/// trimmed, empty entries are skipped.
pub fn parse_kv(par: &str) -> impl Iterator<Item = (&str, &str)> + '_ {
    par.split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(|e| match e.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (e, ""),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv_pairs() {
        let pairs = parse_kv("min_size=0.2, subdivide = 8,,flag").collect::<Vec<_>>();
        assert_eq!(
            pairs,
            vec![("min_size", "0.2"), ("subdivide", "8"), ("flag", "")]
        );
    }

    #[test]
    fn clock_moves() {
        let a = get_us();
        let b = get_us();
        assert!(a > 0);
        assert!(b >= a);
    }
}
