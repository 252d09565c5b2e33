//! The inbound request as seen by identification strategies.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

/// Everything the limiter may read from a request, plus the cookies it sets.
#[derive(Debug, Clone)]
pub struct RequestEvent {
    client_address: IpAddr,
    headers: HashMap<String, String>,
    cookies: CookieJar,
}

impl RequestEvent {
    /// Create an event for a client address with no headers or cookies.
    pub fn new(client_address: IpAddr) -> Self {
        Self {
            client_address,
            headers: HashMap::new(),
            cookies: CookieJar::default(),
        }
    }

    /// Add a request header. Names are matched case-insensitively.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Add request cookies from a `Cookie` header value.
    pub fn with_cookie_header(mut self, header: &str) -> Self {
        self.cookies = CookieJar::from_header(header);
        self
    }

    /// Add a single request cookie.
    pub fn with_cookie(mut self, name: &str, value: impl Into<String>) -> Self {
        self.cookies.incoming.insert(name.to_string(), value.into());
        self
    }

    /// The peer address of the client.
    pub fn client_address(&self) -> IpAddr {
        self.client_address
    }

    /// Get a header value (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The request's cookies, including any set while handling it.
    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    /// Mutable access to the cookie jar.
    pub fn cookies_mut(&mut self) -> &mut CookieJar {
        &mut self.cookies
    }
}

/// Request cookies together with cookies to be sent back on the response.
///
/// A cookie set on the jar is returned by later `get` calls for the same
/// request, the way a framework's per-request cookie jar behaves.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    incoming: HashMap<String, String>,
    outgoing: Vec<SetCookie>,
}

impl CookieJar {
    /// Parse a `Cookie` header (`a=1; b=2`).
    pub fn from_header(header: &str) -> Self {
        let mut incoming = HashMap::new();
        for cookie in header.split(';') {
            let parts: Vec<&str> = cookie.trim().splitn(2, '=').collect();
            if parts.len() == 2 && !parts[0].is_empty() {
                let value = urlencoding::decode(parts[1])
                    .map(|decoded| decoded.into_owned())
                    .unwrap_or_else(|_| parts[1].to_string());
                // The first occurrence is the most specific one
                incoming.entry(parts[0].to_string()).or_insert(value);
            }
        }
        Self {
            incoming,
            outgoing: Vec::new(),
        }
    }

    /// Current value of a cookie, preferring one set during this request.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.outgoing
            .iter()
            .rev()
            .find(|cookie| cookie.name == name)
            .map(|cookie| cookie.value.as_str())
            .or_else(|| self.incoming.get(name).map(String::as_str))
    }

    /// Set a cookie on the response.
    pub fn set(&mut self, name: &str, value: impl Into<String>, options: &CookieOptions) {
        self.outgoing.retain(|cookie| cookie.name != name);
        self.outgoing.push(SetCookie {
            name: name.to_string(),
            value: value.into(),
            options: options.clone(),
        });
    }

    /// Cookies set while handling this request.
    pub fn outgoing(&self) -> &[SetCookie] {
        &self.outgoing
    }
}

/// `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SameSite::Strict => write!(f, "Strict"),
            SameSite::Lax => write!(f, "Lax"),
            SameSite::None => write!(f, "None"),
        }
    }
}

/// Attributes for cookies issued by the limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieOptions {
    #[serde(default = "default_path")]
    pub path: String,

    #[serde(default = "default_true")]
    pub http_only: bool,

    #[serde(default = "default_same_site")]
    pub same_site: SameSite,

    #[serde(default)]
    pub secure: bool,

    /// Cookie lifetime in seconds (default: one week)
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

fn default_path() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

fn default_same_site() -> SameSite {
    SameSite::Strict
}

fn default_max_age_secs() -> u64 {
    60 * 60 * 24 * 7
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: default_path(),
            http_only: default_true(),
            same_site: default_same_site(),
            secure: false,
            max_age_secs: default_max_age_secs(),
        }
    }
}

/// A cookie to be sent with the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub options: CookieOptions,
}

impl SetCookie {
    /// Render as a `Set-Cookie` header value.
    pub fn to_header_value(&self) -> String {
        let mut header = format!(
            "{}={}; Path={}; Max-Age={}",
            self.name,
            urlencoding::encode(&self.value),
            self.options.path,
            self.options.max_age_secs
        );
        if self.options.http_only {
            header.push_str("; HttpOnly");
        }
        if self.options.secure {
            header.push_str("; Secure");
        }
        header.push_str("; SameSite=");
        header.push_str(&self.options.same_site.to_string());
        header
    }
}

impl fmt::Display for SetCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_header_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn event() -> RequestEvent {
        RequestEvent::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let event = event().with_header("User-Agent", "curl/8.0");
        assert_eq!(event.header("user-agent"), Some("curl/8.0"));
        assert_eq!(event.header("USER-AGENT"), Some("curl/8.0"));
        assert_eq!(event.header("accept"), None);
    }

    #[test]
    fn test_parse_cookie_header() {
        let jar = CookieJar::from_header("a=1; limiter=abc%3Bdef; broken; =x");
        assert_eq!(jar.get("a"), Some("1"));
        assert_eq!(jar.get("limiter"), Some("abc;def"));
        assert_eq!(jar.get("broken"), None);
    }

    #[test]
    fn test_set_cookie_visible_within_request() {
        let mut event = event().with_cookie("id", "old");
        event
            .cookies_mut()
            .set("id", "new", &CookieOptions::default());

        assert_eq!(event.cookies().get("id"), Some("new"));
        assert_eq!(event.cookies().outgoing().len(), 1);
    }

    #[test]
    fn test_set_cookie_header_value() {
        let cookie = SetCookie {
            name: "limiter".to_string(),
            value: "id;sig".to_string(),
            options: CookieOptions::default(),
        };
        assert_eq!(
            cookie.to_header_value(),
            "limiter=id%3Bsig; Path=/; Max-Age=604800; HttpOnly; SameSite=Strict"
        );
    }

    #[test]
    fn test_cookie_value_survives_header_round_trip() {
        let value = "a;b%c d";
        let jar = CookieJar::from_header(&format!("k={}", urlencoding::encode(value)));
        assert_eq!(jar.get("k"), Some(value));
    }

    #[test]
    fn test_malformed_escapes_are_kept() {
        let jar = CookieJar::from_header("a=100%; b=%zz; c=%4; d=%FF");
        assert_eq!(jar.get("a"), Some("100%"));
        assert_eq!(jar.get("b"), Some("%zz"));
        assert_eq!(jar.get("c"), Some("%4"));
        assert_eq!(jar.get("d"), Some("%FF"));
    }

    #[test]
    fn test_duplicate_cookie_keeps_first_value() {
        let jar = CookieJar::from_header("limiter=specific; other=1; limiter=generic");
        assert_eq!(jar.get("limiter"), Some("specific"));
        assert_eq!(jar.get("other"), Some("1"));
    }
}
