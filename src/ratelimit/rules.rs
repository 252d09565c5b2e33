//! Rate declarations and their compilation into bindings.
//!
//! A strategy is configured with one `[count, unit]` pair or a list of
//! them. Each pair becomes a `Binding` of a `RateWindow` to that strategy;
//! all of a strategy's bindings must pass for a request to be admitted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::strategy::{IdentificationStrategy, StrategyKind};
use super::unit;
use crate::error::{Result, TurnstileError};

/// A raw `[count, unit]` declaration, e.g. `[100, "m"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateRule(pub u64, pub String);

impl RateRule {
    pub fn new(max_count: u64, unit: impl Into<String>) -> Self {
        Self(max_count, unit.into())
    }
}

/// One rate rule or several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RateDeclaration {
    One(RateRule),
    Many(Vec<RateRule>),
}

impl RateDeclaration {
    /// The declared rules, in declaration order.
    pub fn rules(&self) -> &[RateRule] {
        match self {
            RateDeclaration::One(rule) => std::slice::from_ref(rule),
            RateDeclaration::Many(rules) => rules,
        }
    }
}

impl From<RateRule> for RateDeclaration {
    fn from(rule: RateRule) -> Self {
        RateDeclaration::One(rule)
    }
}

impl From<Vec<RateRule>> for RateDeclaration {
    fn from(rules: Vec<RateRule>) -> Self {
        RateDeclaration::Many(rules)
    }
}

impl From<(u64, &str)> for RateDeclaration {
    fn from((max_count, unit): (u64, &str)) -> Self {
        RateDeclaration::One(RateRule::new(max_count, unit))
    }
}

impl From<Vec<(u64, &str)>> for RateDeclaration {
    fn from(rules: Vec<(u64, &str)>) -> Self {
        RateDeclaration::Many(
            rules
                .into_iter()
                .map(|(max_count, unit)| RateRule::new(max_count, unit))
                .collect(),
        )
    }
}

/// A compiled quota: at most `max_count` requests per `window_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateWindow {
    pub max_count: u64,
    pub window_ms: u64,
}

impl RateWindow {
    /// Resolve a rule's unit token and validate its quota.
    pub fn from_rule(rule: &RateRule) -> Result<Self> {
        let RateRule(max_count, token) = rule;
        if *max_count == 0 {
            return Err(TurnstileError::Config(format!(
                "rate [{}, {:?}] must allow at least one request",
                max_count, token
            )));
        }
        Ok(Self {
            max_count: *max_count,
            window_ms: unit::resolve(token)?,
        })
    }
}

/// A rate window paired with the strategy that identifies clients for it.
#[derive(Clone)]
pub struct Binding {
    pub window: RateWindow,
    pub strategy: Arc<dyn IdentificationStrategy>,
}

impl Binding {
    /// Ordering key: shorter windows first, then smaller quotas, then by
    /// strategy kind.
    pub(crate) fn sort_key(&self) -> (u64, u64, StrategyKind) {
        (self.window.window_ms, self.window.max_count, self.strategy.kind())
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("max_count", &self.window.max_count)
            .field("window_ms", &self.window.window_ms)
            .field("kind", &self.strategy.kind())
            .finish()
    }
}

/// Compile a strategy's rate declaration into one binding per rule.
pub fn compile(
    strategy: Arc<dyn IdentificationStrategy>,
    declaration: &RateDeclaration,
) -> Result<Vec<Binding>> {
    let rules = declaration.rules();
    if rules.is_empty() {
        return Err(TurnstileError::Config(format!(
            "no rates declared for {:?} strategy",
            strategy.kind()
        )));
    }

    rules
        .iter()
        .map(|rule| {
            Ok(Binding {
                window: RateWindow::from_rule(rule)?,
                strategy: Arc::clone(&strategy),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::strategy::{IpStrategy, IpUserAgentStrategy};

    #[test]
    fn test_parse_single_rule() {
        let declaration: RateDeclaration = serde_yaml::from_str("[100, m]").unwrap();
        assert_eq!(declaration, RateDeclaration::One(RateRule::new(100, "m")));
    }

    #[test]
    fn test_parse_rule_list() {
        let yaml = r#"
- [10, s]
- [500, h]
"#;
        let declaration: RateDeclaration = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            declaration.rules(),
            &[RateRule::new(10, "s"), RateRule::new(500, "h")]
        );
    }

    #[test]
    fn test_compile_one_binding_per_rule() {
        let declaration = RateDeclaration::from(vec![(5, "s"), (100, "h")]);
        let bindings = compile(Arc::new(IpStrategy), &declaration).unwrap();

        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].window, RateWindow { max_count: 5, window_ms: 1_000 });
        assert_eq!(bindings[1].window, RateWindow { max_count: 100, window_ms: 3_600_000 });
        assert!(bindings.iter().all(|b| b.strategy.kind() == StrategyKind::Ip));
    }

    #[test]
    fn test_compile_empty_declaration_fails() {
        let declaration = RateDeclaration::Many(Vec::new());
        let err = compile(Arc::new(IpUserAgentStrategy), &declaration).unwrap_err();
        assert!(matches!(err, TurnstileError::Config(msg) if msg.contains("IpUserAgent")));
    }

    #[test]
    fn test_compile_unknown_unit_fails() {
        let declaration = RateDeclaration::from((10, "fortnight"));
        assert!(matches!(
            compile(Arc::new(IpStrategy), &declaration),
            Err(TurnstileError::Config(_))
        ));
    }

    #[test]
    fn test_compile_zero_quota_fails() {
        let declaration = RateDeclaration::from((0, "m"));
        assert!(matches!(
            compile(Arc::new(IpStrategy), &declaration),
            Err(TurnstileError::Config(_))
        ));
    }

    #[test]
    fn test_sort_key_orders_window_then_quota_then_kind() {
        let ip = compile(Arc::new(IpStrategy), &RateDeclaration::from((10, "m"))).unwrap();
        let ua = compile(Arc::new(IpUserAgentStrategy), &RateDeclaration::from((10, "m"))).unwrap();
        assert!(ip[0].sort_key() < ua[0].sort_key());

        let short = compile(Arc::new(IpStrategy), &RateDeclaration::from((1000, "s"))).unwrap();
        assert!(short[0].sort_key() < ua[0].sort_key());
    }
}
