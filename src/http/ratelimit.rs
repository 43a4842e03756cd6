//! Rate limit budget observed from response headers.

use std::fmt;
use std::sync::RwLock;

use reqwest::header::HeaderMap;

pub const RATELIMIT_LIMIT_HEADER: &str = "X-RateLimit-Limit";
pub const RATELIMIT_REMAINING_HEADER: &str = "X-RateLimit-Remaining";

/// A counter that is either known or unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Bound {
    Limited(u64),
    #[default]
    Unbounded,
}

impl Bound {
    fn from_header(headers: &HeaderMap, name: &str) -> Self {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .map(Bound::Limited)
            .unwrap_or(Bound::Unbounded)
    }

    pub fn value(&self) -> Option<u64> {
        match self {
            Bound::Limited(n) => Some(*n),
            Bound::Unbounded => None,
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Limited(n) => write!(f, "{}", n),
            Bound::Unbounded => write!(f, "unbounded"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimitSnapshot {
    pub limit: Bound,
    pub remaining: Bound,
}

/// Budget shared by everything that uses one client.
///
/// Readers get a copy; only the rate-limit policy writes, replacing both
/// counters together.
#[derive(Debug, Default)]
pub struct RateLimitBudget {
    inner: RwLock<RateLimitSnapshot>,
}

impl RateLimitBudget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        *self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn update_from_headers(&self, headers: &HeaderMap) {
        let snapshot = RateLimitSnapshot {
            limit: Bound::from_header(headers, RATELIMIT_LIMIT_HEADER),
            remaining: Bound::from_header(headers, RATELIMIT_REMAINING_HEADER),
        };
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = snapshot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use std::sync::Arc;

    fn headers(limit: &'static str, remaining: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(RATELIMIT_LIMIT_HEADER, HeaderValue::from_static(limit));
        headers.insert(RATELIMIT_REMAINING_HEADER, HeaderValue::from_static(remaining));
        headers
    }

    #[test]
    fn test_starts_unbounded() {
        let budget = RateLimitBudget::new();
        let snapshot = budget.snapshot();
        assert_eq!(snapshot.limit, Bound::Unbounded);
        assert_eq!(snapshot.remaining, Bound::Unbounded);
    }

    #[test]
    fn test_update_from_headers() {
        let budget = RateLimitBudget::new();
        budget.update_from_headers(&headers("50", "49"));
        assert_eq!(
            budget.snapshot(),
            RateLimitSnapshot {
                limit: Bound::Limited(50),
                remaining: Bound::Limited(49),
            }
        );
    }

    #[test]
    fn test_missing_or_garbage_headers_are_unbounded() {
        let budget = RateLimitBudget::new();
        budget.update_from_headers(&headers("50", "49"));
        budget.update_from_headers(&headers("lots", "49"));
        let snapshot = budget.snapshot();
        assert_eq!(snapshot.limit, Bound::Unbounded);
        assert_eq!(snapshot.remaining.value(), Some(49));

        budget.update_from_headers(&HeaderMap::new());
        assert_eq!(budget.snapshot(), RateLimitSnapshot::default());
    }

    #[test]
    fn test_concurrent_readers_see_consistent_pairs() {
        let budget = Arc::new(RateLimitBudget::new());
        let writer = {
            let budget = budget.clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    budget.update_from_headers(&headers("10", "10"));
                    budget.update_from_headers(&headers("20", "20"));
                }
            })
        };
        for _ in 0..1000 {
            let snapshot = budget.snapshot();
            assert_eq!(snapshot.limit, snapshot.remaining);
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_bound_display() {
        assert_eq!(Bound::Limited(7).to_string(), "7");
        assert_eq!(Bound::Unbounded.to_string(), "unbounded");
    }
}
