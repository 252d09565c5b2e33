//! Rate limiting logic and state management.

pub mod clock;
pub mod cookie;
pub mod counter;
pub mod hash;
mod limiter;
pub mod request;
mod retry;
pub mod rules;
pub mod strategy;
pub mod unit;

pub use clock::{Clock, MockClock, SystemClock};
pub use cookie::{CookieStrategy, SignedCookie};
pub use counter::{CounterStore, RetryAfterStore, TtlStore};
pub use hash::{default_hash_function, sha256_hex, HashFunction};
pub use limiter::{
    CookieSettings, Decision, LimitCause, OnLimited, RateLimiter, RateLimiterBuilder, Reason,
};
pub use request::{CookieJar, CookieOptions, RequestEvent, SameSite, SetCookie};
pub use retry::{RetryAfterDecision, RetryAfterRateLimiter};
pub use rules::{Binding, RateDeclaration, RateRule, RateWindow};
pub use strategy::{
    IdentificationStrategy, IdentityResult, IpStrategy, IpUserAgentStrategy, StrategyKind,
};
pub use unit::TimeUnit;
