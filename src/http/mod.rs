//! HTTP plumbing: the transport seam, rate-limit policy, and budget.

pub mod policy;
pub mod ratelimit;
pub mod transport;

pub use policy::{DEFAULT_FALLBACK_DELAY, LEGACY_RATE_LIMIT_MARKER, RateLimitPolicy};
pub use ratelimit::{Bound, RateLimitBudget, RateLimitSnapshot};
pub use transport::{BearerAuth, HttpBody, HttpRequest, HttpResponse, ReqwestTransport, Transport};
