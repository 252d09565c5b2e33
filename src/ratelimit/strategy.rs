//! Client identification strategies.

use std::fmt::Debug;

use super::request::RequestEvent;
use crate::error::Result;

/// Outcome of asking a strategy who sent a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityResult {
    /// A stable per-client fingerprint.
    Identity(String),
    /// The client could not be identified and the request should be denied.
    Rejected,
    /// No opinion; the binding is neither counted nor cleared.
    Indeterminate,
    /// The request bypasses rate limiting entirely.
    Exempt,
}

/// Which built-in strategy a binding uses, for reporting and ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StrategyKind {
    Ip,
    IpUserAgent,
    Cookie,
    Custom,
}

/// Trait for identification strategies.
///
/// A strategy may be shared by several bindings (one per rate window), so
/// `identify` is called once per binding and must return the same identity
/// each time within a request.
pub trait IdentificationStrategy: Send + Sync + Debug {
    /// Identify the client behind `event`.
    ///
    /// Errors are propagated to the caller unchanged.
    fn identify(&self, event: &mut RequestEvent) -> Result<IdentityResult>;

    /// The kind reported when this strategy limits a request.
    fn kind(&self) -> StrategyKind {
        StrategyKind::Custom
    }
}

/// Identifies clients by network address.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpStrategy;

impl IdentificationStrategy for IpStrategy {
    fn identify(&self, event: &mut RequestEvent) -> Result<IdentityResult> {
        Ok(IdentityResult::Identity(event.client_address().to_string()))
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Ip
    }
}

/// Identifies clients by network address plus user agent.
///
/// Requests without a user agent are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpUserAgentStrategy;

impl IdentificationStrategy for IpUserAgentStrategy {
    fn identify(&self, event: &mut RequestEvent) -> Result<IdentityResult> {
        match event.header("user-agent") {
            Some(user_agent) if !user_agent.is_empty() => Ok(IdentityResult::Identity(format!(
                "{}{}",
                event.client_address(),
                user_agent
            ))),
            _ => Ok(IdentityResult::Rejected),
        }
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::IpUserAgent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_ip_strategy_uses_address() {
        let mut event = RequestEvent::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 7)));
        assert_eq!(
            IpStrategy.identify(&mut event).unwrap(),
            IdentityResult::Identity("192.168.1.7".to_string())
        );

        let mut event = RequestEvent::new(IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(
            IpStrategy.identify(&mut event).unwrap(),
            IdentityResult::Identity("::1".to_string())
        );
    }

    #[test]
    fn test_ip_user_agent_strategy() {
        let mut event = RequestEvent::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
            .with_header("User-Agent", "Mozilla/5.0");
        assert_eq!(
            IpUserAgentStrategy.identify(&mut event).unwrap(),
            IdentityResult::Identity("10.0.0.1Mozilla/5.0".to_string())
        );
    }

    #[test]
    fn test_ip_user_agent_strategy_rejects_missing_agent() {
        let mut event = RequestEvent::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(
            IpUserAgentStrategy.identify(&mut event).unwrap(),
            IdentityResult::Rejected
        );

        let mut event = event.with_header("user-agent", "");
        assert_eq!(
            IpUserAgentStrategy.identify(&mut event).unwrap(),
            IdentityResult::Rejected
        );
    }

    #[test]
    fn test_kinds() {
        assert_eq!(IpStrategy.kind(), StrategyKind::Ip);
        assert_eq!(IpUserAgentStrategy.kind(), StrategyKind::IpUserAgent);
    }
}
