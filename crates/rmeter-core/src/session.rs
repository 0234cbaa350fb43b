//! Session store: per-VU state — variables, cookies, tokens — isolated from
//! every other VU. Each VU owns its own session rather than sharing a
//! process-wide singleton, and each session holds its own lock rather than
//! contending on one lock shared across every VU.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// A single cookie with optional scoping metadata.
#[derive(Debug, Clone)]
pub struct Cookie {
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
}

/// A single credential token (`bearer`, `api_key`, or a custom kind).
#[derive(Debug, Clone)]
pub struct Token {
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Token {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(exp) => Utc::now() > exp,
            None => false,
        }
    }
}

/// Per-VU persistent state across operations: named variables, cookies, and
/// auth tokens. Created lazily on first access; `last_access` updated on
/// every read/write.
pub struct Session {
    pub variables: HashMap<String, serde_json::Value>,
    pub cookies: HashMap<String, Cookie>,
    pub tokens: HashMap<String, Token>,
    /// Header name override for a given token kind, e.g. the API key header
    /// name configured by `AuthFlow::ApiKey`.
    pub token_headers: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    last_access: Instant,
}

impl Session {
    pub(crate) fn new() -> Self {
        Session {
            variables: HashMap::new(),
            cookies: HashMap::new(),
            tokens: HashMap::new(),
            token_headers: HashMap::new(),
            created_at: Utc::now(),
            last_access: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_access = Instant::now();
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.variables.insert(name.into(), value);
        self.touch();
    }

    pub fn get_variable(&mut self, name: &str) -> Option<&serde_json::Value> {
        self.touch();
        self.variables.get(name)
    }

    pub fn set_cookie(&mut self, name: impl Into<String>, cookie: Cookie) {
        self.cookies.insert(name.into(), cookie);
        self.touch();
    }

    pub fn set_token(&mut self, kind: impl Into<String>, token: Token) {
        self.tokens.insert(kind.into(), token);
        self.touch();
    }

    pub fn set_token_header_name(&mut self, kind: impl Into<String>, header_name: impl Into<String>) {
        self.token_headers.insert(kind.into(), header_name.into());
    }

    pub fn clear_tokens(&mut self) {
        self.tokens.clear();
        self.touch();
    }

    fn idle_duration(&self) -> Duration {
        self.last_access.elapsed()
    }

    /// Build the headers to send with the next request: cookies joined onto
    /// any existing `Cookie` header, then a non-expired bearer token, then a
    /// configured API-key token, then any other custom token kind — each only
    /// added when `base` does not already set that header name (explicit base
    /// headers win).
    pub fn prepare_request_headers(&mut self, base: &HashMap<String, String>) -> HashMap<String, String> {
        self.touch();
        let mut headers = base.clone();

        if !self.cookies.is_empty() && !headers.contains_key("Cookie") {
            let joined = self
                .cookies
                .iter()
                .map(|(name, cookie)| format!("{name}={}", cookie.value))
                .collect::<Vec<_>>()
                .join("; ");
            headers.insert("Cookie".to_string(), joined);
        }

        if let Some(bearer) = self.tokens.get("bearer") {
            if !bearer.is_expired() && !headers.contains_key("Authorization") {
                headers.insert("Authorization".to_string(), format!("Bearer {}", bearer.value));
            }
        }

        for (kind, token) in &self.tokens {
            if kind == "bearer" || token.is_expired() {
                continue;
            }
            let header_name = self
                .token_headers
                .get(kind)
                .cloned()
                .unwrap_or_else(|| format!("X-{}-Token", titlecase(kind)));
            headers.entry(header_name).or_insert_with(|| token.value.clone());
        }

        headers
    }
}

fn titlecase(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

const SESSION_IDLE_TTL: Duration = Duration::from_secs(3600);
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Owns every VU's [`Session`], keyed by VU id. One lock per session (never a
/// single lock across all sessions); the sweep that evicts idle sessions is
/// piggybacked on access rather than run on a dedicated thread.
pub struct SessionStore {
    sessions: Mutex<HashMap<u64, Mutex<Session>>>,
    last_sweep: Mutex<Instant>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        SessionStore {
            sessions: Mutex::new(HashMap::new()),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Run `f` against the session for `user_id`, creating it lazily if this
    /// is the first access.
    pub fn with_session<R>(&self, user_id: u64, f: impl FnOnce(&mut Session) -> R) -> R {
        self.maybe_sweep();
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let entry = sessions.entry(user_id).or_insert_with(|| Mutex::new(Session::new()));
        let mut session = entry.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut session)
    }

    fn maybe_sweep(&self) {
        let mut last_sweep = self.last_sweep.lock().unwrap_or_else(|e| e.into_inner());
        if last_sweep.elapsed() < SWEEP_INTERVAL {
            return;
        }
        *last_sweep = Instant::now();
        drop(last_sweep);

        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.retain(|_, session| {
            let session = session.lock().unwrap_or_else(|e| e.into_inner());
            session.idle_duration() < SESSION_IDLE_TTL
        });
    }

    pub fn remove(&self, user_id: u64) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.remove(&user_id);
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_created_lazily_on_first_access() {
        let store = SessionStore::new();
        assert!(store.is_empty());
        store.with_session(0, |s| s.set_variable("x", serde_json::json!(1)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn sessions_isolated_per_vu() {
        let store = SessionStore::new();
        store.with_session(0, |s| s.set_variable("id", serde_json::json!("vu0")));
        store.with_session(1, |s| s.set_variable("id", serde_json::json!("vu1")));
        store.with_session(0, |s| {
            assert_eq!(s.get_variable("id").unwrap(), &serde_json::json!("vu0"));
        });
        store.with_session(1, |s| {
            assert_eq!(s.get_variable("id").unwrap(), &serde_json::json!("vu1"));
        });
    }

    #[test]
    fn prepare_request_headers_joins_cookies() {
        let store = SessionStore::new();
        store.with_session(0, |s| {
            s.set_cookie("sid", Cookie { value: "XYZ".to_string(), domain: None, path: None });
            let headers = s.prepare_request_headers(&HashMap::new());
            assert_eq!(headers.get("Cookie").unwrap(), "sid=XYZ");
        });
    }

    #[test]
    fn prepare_request_headers_leaves_an_explicit_base_cookie_header_untouched() {
        let store = SessionStore::new();
        store.with_session(0, |s| {
            s.set_cookie("sid", Cookie { value: "XYZ".to_string(), domain: None, path: None });
            let mut base = HashMap::new();
            base.insert("Cookie".to_string(), "explicit=1".to_string());
            let headers = s.prepare_request_headers(&base);
            assert_eq!(headers.get("Cookie").unwrap(), "explicit=1");
        });
    }

    #[test]
    fn prepare_request_headers_adds_bearer_when_not_expired() {
        let store = SessionStore::new();
        store.with_session(0, |s| {
            s.set_token("bearer", Token { value: "TTT".to_string(), expires_at: None });
            let headers = s.prepare_request_headers(&HashMap::new());
            assert_eq!(headers.get("Authorization").unwrap(), "Bearer TTT");
        });
    }

    #[test]
    fn prepare_request_headers_skips_expired_bearer() {
        let store = SessionStore::new();
        store.with_session(0, |s| {
            s.set_token(
                "bearer",
                Token { value: "TTT".to_string(), expires_at: Some(Utc::now() - chrono::Duration::seconds(10)) },
            );
            let headers = s.prepare_request_headers(&HashMap::new());
            assert!(!headers.contains_key("Authorization"));
        });
    }

    #[test]
    fn base_headers_win_on_conflict() {
        let store = SessionStore::new();
        store.with_session(0, |s| {
            s.set_token("bearer", Token { value: "TTT".to_string(), expires_at: None });
            let mut base = HashMap::new();
            base.insert("Authorization".to_string(), "Basic abc".to_string());
            let headers = s.prepare_request_headers(&base);
            assert_eq!(headers.get("Authorization").unwrap(), "Basic abc");
        });
    }

    #[test]
    fn api_key_uses_configured_header_name() {
        let store = SessionStore::new();
        store.with_session(0, |s| {
            s.set_token_header_name("api_key", "X-API-Key");
            s.set_token("api_key", Token { value: "secret".to_string(), expires_at: None });
            let headers = s.prepare_request_headers(&HashMap::new());
            assert_eq!(headers.get("X-API-Key").unwrap(), "secret");
        });
    }
}
