//! Core rate limiter implementation.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace};

use super::clock::{Clock, SystemClock};
use super::cookie::CookieStrategy;
use super::counter::{CounterStore, TtlStore};
use super::hash::{default_hash_function, HashFunction};
use super::request::{CookieOptions, RequestEvent};
use super::rules::{compile, Binding, RateDeclaration};
use super::strategy::{
    IdentificationStrategy, IdentityResult, IpStrategy, IpUserAgentStrategy, StrategyKind,
};
use crate::config::RateLimitingConfig;
use crate::error::{Result, TurnstileError};

/// Why a request was throttled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    Ip,
    IpUserAgent,
    Cookie,
    /// A custom strategy, identified by its position in evaluation order.
    Binding(usize),
}

impl Reason {
    fn for_binding(kind: StrategyKind, index: usize) -> Self {
        match kind {
            StrategyKind::Ip => Reason::Ip,
            StrategyKind::IpUserAgent => Reason::IpUserAgent,
            StrategyKind::Cookie => Reason::Cookie,
            StrategyKind::Custom => Reason::Binding(index),
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Ip => write!(f, "IP"),
            Reason::IpUserAgent => write!(f, "IPUA"),
            Reason::Cookie => write!(f, "cookie"),
            Reason::Binding(index) => write!(f, "{}", index),
        }
    }
}

impl Serialize for Reason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The outcome of evaluating one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub limited: bool,
    /// Counter key of the binding that tripped, if a counter tripped it.
    pub hash: Option<String>,
    pub window_ms: u64,
    pub reason: Reason,
}

/// What made a binding want to limit a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitCause {
    /// The counter exceeded its quota.
    Rate,
    /// The strategy refused to identify the client.
    Rejected,
}

/// Called before a binding limits a request. Returning `true` admits the
/// request past that binding.
pub type OnLimited = Arc<dyn Fn(&RequestEvent, LimitCause) -> bool + Send + Sync>;

/// Settings for the built-in cookie strategy.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub name: String,
    pub secret: String,
    pub rate: RateDeclaration,
    pub preflight: bool,
    pub options: CookieOptions,
}

/// Builder for [`RateLimiter`].
#[derive(Default)]
pub struct RateLimiterBuilder {
    ip: Option<RateDeclaration>,
    ip_user_agent: Option<RateDeclaration>,
    cookie: Option<CookieSettings>,
    custom: Vec<(Arc<dyn IdentificationStrategy>, RateDeclaration)>,
    hash: Option<HashFunction>,
    store: Option<Arc<dyn CounterStore>>,
    on_limited: Option<OnLimited>,
    max_keys: Option<usize>,
    clock: Option<Arc<dyn Clock>>,
}

impl RateLimiterBuilder {
    /// Limit by client address.
    pub fn ip(mut self, rate: impl Into<RateDeclaration>) -> Self {
        self.ip = Some(rate.into());
        self
    }

    /// Limit by client address plus user agent.
    pub fn ip_user_agent(mut self, rate: impl Into<RateDeclaration>) -> Self {
        self.ip_user_agent = Some(rate.into());
        self
    }

    /// Limit by signed cookie.
    pub fn cookie(mut self, settings: CookieSettings) -> Self {
        self.cookie = Some(settings);
        self
    }

    /// Limit with a caller-supplied strategy.
    pub fn strategy(
        mut self,
        strategy: Arc<dyn IdentificationStrategy>,
        rate: impl Into<RateDeclaration>,
    ) -> Self {
        self.custom.push((strategy, rate.into()));
        self
    }

    /// Replace the SHA-256 default used for cookie signatures and counter keys.
    pub fn hash_function(mut self, hash: HashFunction) -> Self {
        self.hash = Some(hash);
        self
    }

    /// Use a caller-supplied counter store. `max_keys` and `clock` are then ignored.
    pub fn store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Intercept limiting decisions.
    pub fn on_limited(mut self, on_limited: OnLimited) -> Self {
        self.on_limited = Some(on_limited);
        self
    }

    /// Cap the number of keys tracked by the default store.
    pub fn max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = Some(max_keys);
        self
    }

    /// Clock for the default store.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Compile every declared rate and build the limiter.
    pub fn build(self) -> Result<RateLimiter> {
        let hash = self.hash.unwrap_or_else(default_hash_function);
        let mut bindings = Vec::new();
        let mut cookie_strategy = None;

        if let Some(rate) = &self.ip {
            bindings.extend(compile(Arc::new(IpStrategy), rate)?);
        }
        if let Some(rate) = &self.ip_user_agent {
            bindings.extend(compile(Arc::new(IpUserAgentStrategy), rate)?);
        }
        if let Some(settings) = self.cookie {
            let strategy = Arc::new(CookieStrategy::new(
                settings.name,
                settings.secret,
                settings.preflight,
                settings.options,
                Arc::clone(&hash),
            )?);
            bindings.extend(compile(strategy.clone(), &settings.rate)?);
            cookie_strategy = Some(strategy);
        }
        for (strategy, rate) in &self.custom {
            bindings.extend(compile(Arc::clone(strategy), rate)?);
        }

        if bindings.is_empty() {
            return Err(TurnstileError::Config(
                "no identification strategies configured".to_string(),
            ));
        }

        // Stable: custom strategies with equal keys keep registration order
        bindings.sort_by_key(Binding::sort_key);

        let store: Arc<dyn CounterStore> = match self.store {
            Some(store) => store,
            None => {
                let clock: Arc<dyn Clock> = match self.clock {
                    Some(clock) => clock,
                    None => Arc::new(SystemClock),
                };
                Arc::new(TtlStore::with_clock(self.max_keys, clock))
            }
        };

        info!(
            bindings = bindings.len(),
            order = ?bindings,
            "Rate limiter initialized"
        );

        Ok(RateLimiter {
            bindings,
            store,
            hash,
            on_limited: self.on_limited,
            cookie: cookie_strategy,
        })
    }
}

/// Decides whether each request should be throttled.
///
/// This struct is thread-safe and can be shared across request handlers.
pub struct RateLimiter {
    /// Compiled bindings in evaluation order
    bindings: Vec<Binding>,
    store: Arc<dyn CounterStore>,
    hash: HashFunction,
    on_limited: Option<OnLimited>,
    cookie: Option<Arc<CookieStrategy>>,
}

impl RateLimiter {
    /// Start configuring a rate limiter.
    pub fn builder() -> RateLimiterBuilder {
        RateLimiterBuilder::default()
    }

    /// Build a rate limiter from its configuration section.
    pub fn from_config(config: &RateLimitingConfig) -> Result<Self> {
        Self::configure(config).build()
    }

    /// A builder pre-populated from configuration, for adding hooks before building.
    pub fn configure(config: &RateLimitingConfig) -> RateLimiterBuilder {
        let mut builder = Self::builder();
        if let Some(rate) = &config.ip {
            builder = builder.ip(rate.clone());
        }
        if let Some(rate) = &config.ip_ua {
            builder = builder.ip_user_agent(rate.clone());
        }
        if let Some(cookie) = &config.cookie {
            builder = builder.cookie(CookieSettings {
                name: cookie.name.clone(),
                secret: cookie.secret.clone(),
                rate: cookie.rate.clone(),
                preflight: cookie.preflight,
                options: cookie.options.clone(),
            });
        }
        if let Some(max_keys) = config.max_keys {
            builder = builder.max_keys(max_keys);
        }
        builder
    }

    /// Check whether a request should be throttled.
    pub fn is_limited(&self, event: &mut RequestEvent) -> Result<bool> {
        Ok(self.check(event)?.limited)
    }

    /// Evaluate a request against every binding, in order.
    ///
    /// An exemption from any binding admits the whole request. A rejection or
    /// an exceeded quota limits it unless the on-limited hook admits it. If
    /// some binding was indeterminate and none identified the client, the
    /// request is limited.
    pub fn check(&self, event: &mut RequestEvent) -> Result<Decision> {
        let mut indeterminate: Option<bool> = None;

        for (index, binding) in self.bindings.iter().enumerate() {
            let reason = Reason::for_binding(binding.strategy.kind(), index);
            let window = binding.window;

            let identity = binding.strategy.identify(event)?;
            trace!(index, reason = %reason, "Evaluating binding");

            match identity {
                IdentityResult::Rejected => {
                    if self.admitted_by_hook(event, LimitCause::Rejected) {
                        debug!(reason = %reason, "Rejected request admitted by hook");
                        continue;
                    }
                    debug!(reason = %reason, "Request rejected");
                    return Ok(Decision {
                        limited: true,
                        hash: None,
                        window_ms: window.window_ms,
                        reason,
                    });
                }
                IdentityResult::Indeterminate => {
                    indeterminate.get_or_insert(true);
                }
                IdentityResult::Exempt => {
                    return Ok(Decision {
                        limited: false,
                        hash: None,
                        window_ms: window.window_ms,
                        reason,
                    });
                }
                IdentityResult::Identity(id) => {
                    let key = format!("{}{}", index, (self.hash)(&id)?);
                    let count = self.store.increment(&key, window.window_ms)?;
                    trace!(key = %key, count, max_count = window.max_count, "Counted request");

                    if count > window.max_count {
                        if self.admitted_by_hook(event, LimitCause::Rate) {
                            debug!(key = %key, reason = %reason, "Over-limit request admitted by hook");
                        } else {
                            debug!(
                                key = %key,
                                count,
                                max_count = window.max_count,
                                reason = %reason,
                                "Rate limit exceeded"
                            );
                            return Ok(Decision {
                                limited: true,
                                hash: Some(key),
                                window_ms: window.window_ms,
                                reason,
                            });
                        }
                    }
                    indeterminate = Some(false);
                }
            }
        }

        let last_index = self.bindings.len() - 1;
        let last = &self.bindings[last_index];
        let limited = indeterminate.unwrap_or(false);
        if limited {
            debug!("No binding could identify the client");
        }

        Ok(Decision {
            limited,
            hash: None,
            window_ms: last.window.window_ms,
            reason: Reason::for_binding(last.strategy.kind(), last_index),
        })
    }

    /// Ensure the client holds a limiter cookie, without counting the request.
    ///
    /// Fails if no cookie strategy is configured.
    pub fn preflight(&self, event: &mut RequestEvent) -> Result<String> {
        match &self.cookie {
            Some(cookie) => cookie.preflight(event),
            None => Err(TurnstileError::Config(
                "preflight requires a cookie strategy".to_string(),
            )),
        }
    }

    /// Clear all counters.
    pub fn clear(&self) -> Result<()> {
        self.store.clear()
    }

    /// Compiled bindings in evaluation order.
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    fn admitted_by_hook(&self, event: &RequestEvent, cause: LimitCause) -> bool {
        self.on_limited
            .as_ref()
            .map_or(false, |on_limited| on_limited(event, cause))
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("bindings", &self.bindings)
            .field("store", &self.store)
            .field("on_limited", &self.on_limited.is_some())
            .finish()
    }
}
