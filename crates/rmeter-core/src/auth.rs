//! Authentication flows: pluggable strategies that populate a VU's
//! [`crate::session::Session`] with the headers a scenario needs to look
//! authenticated. Grounded on `examples/original_source/loadspiker/
//! authentication.py`'s `AuthenticationFlow` subclasses, redesigned as an
//! `AuthFlow` trait over owned params rather than a class hierarchy.

use std::collections::HashMap;

use base64::Engine as _;
use chrono::Utc;
use serde::Deserialize;

use crate::error::RmeterError;
use crate::session::{Session, Token};

/// What an [`AuthFlow`] attempt produced.
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub success: bool,
    /// Present when a flow needs the caller to complete an out-of-band step,
    /// e.g. `OAuth2AuthCode`'s authorization URL before a code is available.
    pub redirect_url: Option<String>,
    pub message: String,
}

impl AuthResult {
    fn ok(message: impl Into<String>) -> Self {
        AuthResult { success: true, redirect_url: None, message: message.into() }
    }

    fn pending(redirect_url: impl Into<String>, message: impl Into<String>) -> Self {
        AuthResult { success: false, redirect_url: Some(redirect_url.into()), message: message.into() }
    }
}

/// A named authentication strategy. `authenticate` stores whatever headers or
/// tokens the flow produces directly into `session`; nothing is returned to
/// the caller beyond pass/fail.
#[async_trait::async_trait]
pub trait AuthFlow: Send + Sync {
    async fn authenticate(
        &self,
        http: &reqwest::Client,
        session: &mut Session,
    ) -> Result<AuthResult, RmeterError>;

    fn is_authenticated(&self, session: &Session) -> bool {
        session.tokens.values().any(|t| !t.is_expired())
    }

    fn logout(&self, session: &mut Session) {
        session.clear_tokens();
    }
}

/// HTTP Basic — stores `Basic <base64(user:pass)>` under the `basic_auth`
/// token kind, emitted as the `Authorization` header.
pub struct BasicAuthFlow {
    pub username: String,
    pub password: String,
}

#[async_trait::async_trait]
impl AuthFlow for BasicAuthFlow {
    async fn authenticate(
        &self,
        _http: &reqwest::Client,
        session: &mut Session,
    ) -> Result<AuthResult, RmeterError> {
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.username, self.password));
        session.set_token_header_name("basic_auth", "Authorization");
        session.set_token("basic_auth", Token { value: format!("Basic {encoded}"), expires_at: None });
        Ok(AuthResult::ok("basic auth header prepared"))
    }
}

/// Bearer token, supplied directly or fetched from a token endpoint via a
/// real `grant_type=client_credentials`-style form POST.
pub struct BearerTokenAuthFlow {
    pub token: Option<String>,
    pub token_endpoint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub extra_params: HashMap<String, String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    #[allow(dead_code)]
    refresh_token: Option<String>,
}

#[async_trait::async_trait]
impl AuthFlow for BearerTokenAuthFlow {
    async fn authenticate(
        &self,
        http: &reqwest::Client,
        session: &mut Session,
    ) -> Result<AuthResult, RmeterError> {
        if let Some(token) = &self.token {
            session.set_token("bearer", Token { value: token.clone(), expires_at: None });
            return Ok(AuthResult::ok("bearer token set directly"));
        }

        let endpoint = self
            .token_endpoint
            .as_ref()
            .ok_or_else(|| RmeterError::InvalidInput("bearer auth needs token or token_endpoint".to_string()))?;

        let mut form = HashMap::new();
        form.insert("grant_type".to_string(), "client_credentials".to_string());
        if let Some(id) = &self.client_id {
            form.insert("client_id".to_string(), id.clone());
        }
        if let Some(secret) = &self.client_secret {
            form.insert("client_secret".to_string(), secret.clone());
        }
        for (k, v) in &self.extra_params {
            form.insert(k.clone(), v.clone());
        }

        let response = http.post(endpoint).form(&form).send().await?;
        if !response.status().is_success() {
            return Ok(AuthResult { success: false, redirect_url: None, message: format!("token endpoint returned {}", response.status()) });
        }
        let parsed: TokenResponse = response.json().await?;
        let expires_at = parsed.expires_in.map(|secs| Utc::now() + chrono::Duration::seconds(secs));
        session.set_token("bearer", Token { value: parsed.access_token, expires_at });
        Ok(AuthResult::ok("bearer token fetched from token endpoint"))
    }
}

/// API key, emitted either as a header or — when the caller composes it in
/// manually — a query parameter; we only deal with the header form here, the
/// query-param form is applied by the scenario compiler when building the URL.
pub struct ApiKeyAuthFlow {
    pub key: String,
    pub header_name: String,
}

#[async_trait::async_trait]
impl AuthFlow for ApiKeyAuthFlow {
    async fn authenticate(
        &self,
        _http: &reqwest::Client,
        session: &mut Session,
    ) -> Result<AuthResult, RmeterError> {
        session.set_token_header_name("api_key", self.header_name.clone());
        session.set_token("api_key", Token { value: self.key.clone(), expires_at: None });
        Ok(AuthResult::ok("api key header prepared"))
    }
}

/// Form-based login: POSTs credentials, absorbs any `Set-Cookie` response
/// headers into the session, and checks for a success indicator.
pub struct FormAuthFlow {
    pub login_url: String,
    pub username_field: String,
    pub password_field: String,
    pub username: String,
    pub password: String,
    /// Optional substring that must appear in the response body for the
    /// login to be considered successful (beyond a non-4xx/5xx status).
    pub success_indicator: Option<String>,
}

#[async_trait::async_trait]
impl AuthFlow for FormAuthFlow {
    async fn authenticate(
        &self,
        http: &reqwest::Client,
        session: &mut Session,
    ) -> Result<AuthResult, RmeterError> {
        let mut form = HashMap::new();
        form.insert(self.username_field.clone(), self.username.clone());
        form.insert(self.password_field.clone(), self.password.clone());

        let response = http.post(&self.login_url).form(&form).send().await?;
        let status = response.status();
        let set_cookie_headers: Vec<String> = response
            .headers()
            .get_all(reqwest::header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_string))
            .collect();
        let body = response.text().await.unwrap_or_default();

        for raw in &set_cookie_headers {
            store_set_cookie(session, raw);
        }

        let indicator_ok = match &self.success_indicator {
            Some(needle) => body.contains(needle.as_str()),
            None => true,
        };
        let success = status.as_u16() < 400 && indicator_ok;
        if success {
            Ok(AuthResult::ok("form login succeeded"))
        } else {
            Ok(AuthResult { success: false, redirect_url: None, message: format!("form login failed with status {status}") })
        }
    }
}

/// OAuth2 authorization-code flow. Without a `code` this only produces the
/// authorization URL plus a CSRF `state` for the caller to complete
/// out-of-band; with a `code` it exchanges it for tokens.
pub struct OAuth2AuthCodeFlow {
    pub authorize_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scope: Option<String>,
    pub code: Option<String>,
    pub state: String,
}

#[async_trait::async_trait]
impl AuthFlow for OAuth2AuthCodeFlow {
    async fn authenticate(
        &self,
        http: &reqwest::Client,
        session: &mut Session,
    ) -> Result<AuthResult, RmeterError> {
        let Some(code) = &self.code else {
            let mut url = format!(
                "{}?response_type=code&client_id={}&redirect_uri={}&state={}",
                self.authorize_url, self.client_id, self.redirect_uri, self.state
            );
            if let Some(scope) = &self.scope {
                url.push_str(&format!("&scope={scope}"));
            }
            return Ok(AuthResult::pending(url, "authorization required, no code yet"));
        };

        let mut form = HashMap::new();
        form.insert("grant_type".to_string(), "authorization_code".to_string());
        form.insert("code".to_string(), code.clone());
        form.insert("client_id".to_string(), self.client_id.clone());
        form.insert("client_secret".to_string(), self.client_secret.clone());
        form.insert("redirect_uri".to_string(), self.redirect_uri.clone());

        let response = http.post(&self.token_url).form(&form).send().await?;
        if !response.status().is_success() {
            return Ok(AuthResult { success: false, redirect_url: None, message: format!("token exchange returned {}", response.status()) });
        }
        let parsed: TokenResponse = response.json().await?;
        let expires_at = parsed.expires_in.map(|secs| Utc::now() + chrono::Duration::seconds(secs));
        session.set_token("bearer", Token { value: parsed.access_token, expires_at });
        Ok(AuthResult::ok("authorization code exchanged for access token"))
    }
}

/// Wraps an arbitrary closure, for scenarios whose auth scheme is bespoke
/// enough that none of the named flows fit.
pub struct CustomAuthFlow<F>
where
    F: Fn(&mut Session) -> Result<AuthResult, RmeterError> + Send + Sync,
{
    pub run: F,
}

#[async_trait::async_trait]
impl<F> AuthFlow for CustomAuthFlow<F>
where
    F: Fn(&mut Session) -> Result<AuthResult, RmeterError> + Send + Sync,
{
    async fn authenticate(
        &self,
        _http: &reqwest::Client,
        session: &mut Session,
    ) -> Result<AuthResult, RmeterError> {
        (self.run)(session)
    }
}

fn store_set_cookie(session: &mut Session, raw: &str) {
    let (name_value, rest) = raw.split_once(';').unwrap_or((raw, ""));
    let Some((name, value)) = name_value.trim().split_once('=') else { return };

    let mut domain = None;
    let mut path = None;
    for attr in rest.split(';') {
        let attr = attr.trim();
        if let Some(v) = attr.strip_prefix("Domain=").or_else(|| attr.strip_prefix("domain=")) {
            domain = Some(v.to_string());
        } else if let Some(v) = attr.strip_prefix("Path=").or_else(|| attr.strip_prefix("path=")) {
            path = Some(v.to_string());
        }
    }

    session.set_cookie(
        name.trim().to_string(),
        crate::session::Cookie { value: value.trim().to_string(), domain, path },
    );
}
