//! Anonymous client identity carried in a signed cookie.
//!
//! The cookie value is `<random_id>;<signature>` where the signature is
//! `hash(secret + random_id)`. Nothing is stored server-side: validity is
//! recomputed from the secret on every request, so identities survive
//! restarts as long as the secret does.

use std::fmt;
use tracing::debug;
use uuid::Uuid;

use super::hash::{constant_time_eq, HashFunction};
use super::request::{CookieOptions, RequestEvent};
use super::strategy::{IdentificationStrategy, IdentityResult, StrategyKind};
use crate::error::{Result, TurnstileError};

/// Parsed form of the limiter cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedCookie {
    pub random_id: String,
    pub signature: String,
}

impl SignedCookie {
    /// Sign `random_id` with `secret`.
    pub fn sign(random_id: &str, secret: &str, hash: &HashFunction) -> Result<Self> {
        Ok(Self {
            random_id: random_id.to_string(),
            signature: hash(&format!("{}{}", secret, random_id))?,
        })
    }

    /// Parse a cookie value. Returns `None` unless both parts are non-empty.
    pub fn parse(value: &str) -> Option<Self> {
        let (random_id, signature) = value.split_once(';')?;
        if random_id.is_empty() || signature.is_empty() || signature.contains(';') {
            return None;
        }
        Some(Self {
            random_id: random_id.to_string(),
            signature: signature.to_string(),
        })
    }

    /// Check the signature against one recomputed from `secret`.
    pub fn verify(&self, secret: &str, hash: &HashFunction) -> Result<bool> {
        let expected = hash(&format!("{}{}", secret, self.random_id))?;
        Ok(constant_time_eq(&expected, &self.signature))
    }
}

impl fmt::Display for SignedCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{}", self.random_id, self.signature)
    }
}

/// Identifies clients by a server-issued signed cookie.
pub struct CookieStrategy {
    name: String,
    secret: String,
    require_preflight: bool,
    options: CookieOptions,
    hash: HashFunction,
}

impl CookieStrategy {
    /// Create a cookie strategy.
    ///
    /// With `require_preflight`, requests without a valid cookie are left
    /// indeterminate instead of being issued one; call [`preflight`] first.
    ///
    /// [`preflight`]: CookieStrategy::preflight
    pub fn new(
        name: impl Into<String>,
        secret: impl Into<String>,
        require_preflight: bool,
        options: CookieOptions,
        hash: HashFunction,
    ) -> Result<Self> {
        let name = name.into();
        let secret = secret.into();
        if name.is_empty() {
            return Err(TurnstileError::Config("cookie name must not be empty".to_string()));
        }
        if secret.is_empty() {
            return Err(TurnstileError::Config("cookie secret must not be empty".to_string()));
        }
        Ok(Self {
            name,
            secret,
            require_preflight,
            options,
            hash,
        })
    }

    /// Name of the cookie this strategy reads and sets.
    pub fn cookie_name(&self) -> &str {
        &self.name
    }

    /// Ensure the client holds a valid cookie without counting the request.
    ///
    /// Returns the existing identity, or issues a new cookie.
    pub fn preflight(&self, event: &mut RequestEvent) -> Result<String> {
        match self.verified_id(event)? {
            Some(id) => Ok(id),
            None => self.issue(event),
        }
    }

    /// Identity from a present, well-formed, correctly signed cookie.
    fn verified_id(&self, event: &RequestEvent) -> Result<Option<String>> {
        let Some(value) = event.cookies().get(&self.name) else {
            return Ok(None);
        };

        let Some(cookie) = SignedCookie::parse(value) else {
            debug!(cookie = %self.name, "Malformed limiter cookie");
            return Ok(None);
        };

        if cookie.verify(&self.secret, &self.hash)? {
            Ok(Some(cookie.random_id))
        } else {
            debug!(cookie = %self.name, "Limiter cookie signature mismatch");
            Ok(None)
        }
    }

    /// Mint a fresh identity and set it on the response.
    fn issue(&self, event: &mut RequestEvent) -> Result<String> {
        let random_id = Uuid::new_v4().simple().to_string();
        let cookie = SignedCookie::sign(&random_id, &self.secret, &self.hash)?;

        event
            .cookies_mut()
            .set(&self.name, cookie.to_string(), &self.options);
        debug!(cookie = %self.name, "Issued limiter cookie");

        Ok(random_id)
    }
}

impl fmt::Debug for CookieStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieStrategy")
            .field("name", &self.name)
            .field("secret", &"<redacted>")
            .field("require_preflight", &self.require_preflight)
            .field("options", &self.options)
            .finish()
    }
}

impl IdentificationStrategy for CookieStrategy {
    fn identify(&self, event: &mut RequestEvent) -> Result<IdentityResult> {
        if let Some(id) = self.verified_id(event)? {
            return Ok(IdentityResult::Identity(id));
        }
        if self.require_preflight {
            return Ok(IdentityResult::Indeterminate);
        }
        self.issue(event).map(IdentityResult::Identity)
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Cookie
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::hash::{default_hash_function, sha256_hex};
    use std::net::{IpAddr, Ipv4Addr};

    const SECRET: &str = "s3cr3t";

    fn strategy(require_preflight: bool) -> CookieStrategy {
        CookieStrategy::new(
            "limiterid",
            SECRET,
            require_preflight,
            CookieOptions::default(),
            default_hash_function(),
        )
        .unwrap()
    }

    fn event() -> RequestEvent {
        RequestEvent::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
    }

    fn signed_value(random_id: &str) -> String {
        format!("{};{}", random_id, sha256_hex(&format!("{}{}", SECRET, random_id)))
    }

    #[test]
    fn test_verify_signature() {
        let hash = default_hash_function();
        let cookie = SignedCookie::sign("R", SECRET, &hash).unwrap();
        assert!(cookie.verify(SECRET, &hash).unwrap());

        let forged = SignedCookie {
            random_id: "R".to_string(),
            signature: sha256_hex(&format!("{}{}", SECRET, "R2")),
        };
        assert!(!forged.verify(SECRET, &hash).unwrap());
        assert!(!cookie.verify("other-secret", &hash).unwrap());
    }

    #[test]
    fn test_parse_wire_format() {
        let cookie = SignedCookie::parse("abc;def").unwrap();
        assert_eq!(cookie.random_id, "abc");
        assert_eq!(cookie.signature, "def");
        assert_eq!(cookie.to_string(), "abc;def");

        assert!(SignedCookie::parse("abc").is_none());
        assert!(SignedCookie::parse(";def").is_none());
        assert!(SignedCookie::parse("abc;").is_none());
        assert!(SignedCookie::parse("a;b;c").is_none());
    }

    #[test]
    fn test_valid_cookie_identifies_without_reissuing() {
        let strategy = strategy(false);
        let mut event = event().with_cookie("limiterid", signed_value("client-1"));

        assert_eq!(
            strategy.identify(&mut event).unwrap(),
            IdentityResult::Identity("client-1".to_string())
        );
        assert!(event.cookies().outgoing().is_empty());
    }

    #[test]
    fn test_missing_cookie_is_issued() {
        let strategy = strategy(false);
        let mut event = event();

        let IdentityResult::Identity(id) = strategy.identify(&mut event).unwrap() else {
            panic!("expected an identity");
        };

        let outgoing = event.cookies().outgoing();
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].name, "limiterid");
        assert_eq!(outgoing[0].value, signed_value(&id));
        assert_eq!(outgoing[0].options, CookieOptions::default());
    }

    #[test]
    fn test_issued_cookie_reused_within_request() {
        let strategy = strategy(false);
        let mut event = event();

        let first = strategy.identify(&mut event).unwrap();
        let second = strategy.identify(&mut event).unwrap();

        assert_eq!(first, second);
        assert_eq!(event.cookies().outgoing().len(), 1);
    }

    #[test]
    fn test_forged_cookie_is_replaced() {
        let strategy = strategy(false);
        let forged = format!("victim;{}", sha256_hex(&format!("{}{}", SECRET, "attacker")));
        let mut event = event().with_cookie("limiterid", forged);

        let IdentityResult::Identity(id) = strategy.identify(&mut event).unwrap() else {
            panic!("expected an identity");
        };

        assert_ne!(id, "victim");
        assert_eq!(event.cookies().get("limiterid"), Some(signed_value(&id).as_str()));
    }

    #[test]
    fn test_malformed_cookie_is_replaced() {
        let strategy = strategy(false);
        let mut event = event().with_cookie("limiterid", "garbage");

        assert!(matches!(
            strategy.identify(&mut event).unwrap(),
            IdentityResult::Identity(_)
        ));
        assert_eq!(event.cookies().outgoing().len(), 1);
    }

    #[test]
    fn test_require_preflight_leaves_missing_cookie_indeterminate() {
        let strategy = strategy(true);
        let mut event = event();

        assert_eq!(
            strategy.identify(&mut event).unwrap(),
            IdentityResult::Indeterminate
        );
        assert!(event.cookies().outgoing().is_empty());
    }

    #[test]
    fn test_preflight_issues_then_identifies() {
        let strategy = strategy(true);
        let mut event = event();

        let id = strategy.preflight(&mut event).unwrap();
        assert_eq!(event.cookies().outgoing().len(), 1);
        assert_eq!(
            strategy.identify(&mut event).unwrap(),
            IdentityResult::Identity(id.clone())
        );

        // A later request echoing the Set-Cookie pair keeps the same identity
        let set_cookie = event.cookies().outgoing()[0].to_header_value();
        let pair = set_cookie.split("; ").next().unwrap();
        let mut next = RequestEvent::new(event.client_address()).with_cookie_header(pair);
        assert_eq!(strategy.preflight(&mut next).unwrap(), id);
        assert!(next.cookies().outgoing().is_empty());
    }

    #[test]
    fn test_empty_name_or_secret_is_config_error() {
        let hash = default_hash_function();
        assert!(matches!(
            CookieStrategy::new("", SECRET, false, CookieOptions::default(), hash.clone()),
            Err(TurnstileError::Config(_))
        ));
        assert!(matches!(
            CookieStrategy::new("id", "", false, CookieOptions::default(), hash),
            Err(TurnstileError::Config(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", strategy(false));
        assert!(!rendered.contains(SECRET));
        assert!(rendered.contains("<redacted>"));
    }
}
