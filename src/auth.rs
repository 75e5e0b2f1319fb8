use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{COOKIE, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

pub const SESSION_COOKIE: &str = "next-auth.session-token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    GitHub,
    Discord,
    Google,
    Twitch,
    Reddit,
}

impl Provider {
    /// Registration order on the site.
    pub const ALL: [Provider; 5] = [
        Provider::GitHub,
        Provider::Discord,
        Provider::Google,
        Provider::Twitch,
        Provider::Reddit,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Provider::GitHub => "github",
            Provider::Discord => "discord",
            Provider::Google => "google",
            Provider::Twitch => "twitch",
            Provider::Reddit => "reddit",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::GitHub => "GitHub",
            Provider::Discord => "Discord",
            Provider::Google => "Google",
            Provider::Twitch => "Twitch",
            Provider::Reddit => "Reddit",
        }
    }

    fn env_key(&self) -> &'static str {
        match self {
            Provider::GitHub => "GITHUB",
            Provider::Discord => "DISCORD",
            Provider::Google => "GOOGLE",
            Provider::Twitch => "TWITCH",
            Provider::Reddit => "REDDIT",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        Provider::ALL
            .into_iter()
            .find(|provider| provider.id().eq_ignore_ascii_case(value.trim()))
            .with_context(|| format!("unknown sign-in provider {value:?}"))
    }
}

/// Providers whose `AUTH_<NAME>_ID` and `AUTH_<NAME>_SECRET` are both set.
pub fn enabled_providers<F>(lookup: F) -> Vec<Provider>
where
    F: Fn(&str) -> Option<String>,
{
    let present = |key: String| lookup(&key).is_some_and(|value| !value.trim().is_empty());
    Provider::ALL
        .into_iter()
        .filter(|provider| {
            present(format!("AUTH_{}_ID", provider.env_key()))
                && present(format!("AUTH_{}_SECRET", provider.env_key()))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AdminLevel {
    #[default]
    User,
    Department,
    Domain,
    Site,
}

impl AdminLevel {
    pub fn can_manage_departments(&self) -> bool {
        matches!(self, AdminLevel::Site | AdminLevel::Domain)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub admin_level: AdminLevel,
    #[serde(default)]
    pub admin_scope: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user: SessionUser,
    #[serde(default)]
    pub expires: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    pub provider: Provider,
    pub signin_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session endpoint returned {0}")]
    Status(u16),
    #[error("session response missing user id")]
    MissingUser,
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub session_token: Option<String>,
    pub timeout: Option<Duration>,
}

pub struct SessionClient {
    http: HttpClient,
    base_url: Url,
    user_agent: String,
    session_token: Option<String>,
}

impl SessionClient {
    pub fn new(cfg: ClientConfig) -> Result<Self> {
        if cfg.user_agent.trim().is_empty() {
            bail!("auth: user agent is required");
        }
        let base_url = Url::parse(&format!("{}/", cfg.base_url.trim_end_matches('/')))
            .context("auth: parse site url")?;
        let http = HttpClient::builder()
            .timeout(cfg.timeout.unwrap_or(Duration::from_secs(20)))
            .build()
            .context("auth: build http client")?;
        Ok(Self {
            http,
            base_url,
            user_agent: cfg.user_agent,
            session_token: cfg.session_token.filter(|token| !token.trim().is_empty()),
        })
    }

    pub fn has_token(&self) -> bool {
        self.session_token.is_some()
    }

    /// The signed-in session, or `None` for an anonymous viewer.
    pub fn session(&self) -> Result<Option<Session>> {
        let Some(token) = &self.session_token else {
            return Ok(None);
        };
        let value = self
            .get("api/auth/session", Some(token))
            .context("auth: fetch session")?;
        parse_session(value)
    }

    pub fn providers(&self) -> Result<Vec<ProviderInfo>> {
        let value = self
            .get("api/auth/providers", None)
            .context("auth: fetch providers")?;
        let Value::Object(entries) = value else {
            return Ok(Vec::new());
        };
        let mut providers: Vec<ProviderInfo> = entries
            .iter()
            .filter_map(|(key, entry)| {
                let provider = key.parse::<Provider>().ok()?;
                let signin_url = entry
                    .get("signinUrl")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| self.signin_url(provider));
                Some(ProviderInfo {
                    provider,
                    signin_url,
                })
            })
            .collect();
        providers.sort_by_key(|info| Provider::ALL.iter().position(|p| *p == info.provider));
        Ok(providers)
    }

    /// Used when the provider listing cannot be fetched.
    pub fn default_providers(&self) -> Vec<ProviderInfo> {
        Provider::ALL
            .into_iter()
            .map(|provider| ProviderInfo {
                provider,
                signin_url: self.signin_url(provider),
            })
            .collect()
    }

    pub fn signin_url(&self, provider: Provider) -> String {
        signin_url(&self.base_url, provider)
    }

    fn get(&self, path: &str, token: Option<&String>) -> Result<Value> {
        let url = self.base_url.join(path)?;
        let mut request = self.http.get(url).header(USER_AGENT, &self.user_agent);
        if let Some(token) = token {
            request = request.header(COOKIE, format!("{SESSION_COOKIE}={token}"));
        }
        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            bail!(SessionError::Status(status.as_u16()));
        }
        let text = response.text()?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

pub fn signin_url(base: &Url, provider: Provider) -> String {
    base.join(&format!("api/auth/signin/{}", provider.id()))
        .map(|url| url.to_string())
        .unwrap_or_else(|_| format!("{base}api/auth/signin/{}", provider.id()))
}

/// `null` and `{}` both mean "not signed in".
fn parse_session(value: Value) -> Result<Option<Session>> {
    match &value {
        Value::Null => return Ok(None),
        Value::Object(map) if map.is_empty() || !map.contains_key("user") => return Ok(None),
        _ => {}
    }
    let session: Session = serde_json::from_value(value).context("auth: decode session")?;
    if session.user.id.trim().is_empty() {
        bail!(SessionError::MissingUser);
    }
    Ok(Some(session))
}

/// Sign-in modal: one provider may be in flight at a time.
#[derive(Debug, Clone, Default)]
pub struct SignIn {
    providers: Vec<ProviderInfo>,
    selected: usize,
    loading: Option<Provider>,
    open: bool,
}

impl SignIn {
    pub fn new(providers: Vec<ProviderInfo>) -> Self {
        Self {
            providers,
            ..Default::default()
        }
    }

    pub fn open(&mut self) {
        self.open = true;
        self.selected = 0;
    }

    pub fn close(&mut self) {
        self.open = false;
        self.loading = None;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn providers(&self) -> &[ProviderInfo] {
        &self.providers
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn loading(&self) -> Option<Provider> {
        self.loading
    }

    pub fn is_disabled(&self) -> bool {
        self.loading.is_some()
    }

    pub fn move_selection(&mut self, delta: i32) {
        if self.providers.is_empty() || self.is_disabled() {
            return;
        }
        let len = self.providers.len() as i32;
        self.selected = (self.selected as i32 + delta).rem_euclid(len) as usize;
    }

    /// Marks the selected provider as in flight and returns its sign-in URL.
    pub fn begin(&mut self) -> Option<&ProviderInfo> {
        if self.is_disabled() {
            return None;
        }
        let info = self.providers.get(self.selected)?;
        self.loading = Some(info.provider);
        Some(info)
    }

    pub fn finish(&mut self) {
        self.loading = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::thread;
    use tiny_http::{Response, Server};

    #[test]
    fn providers_need_both_credentials() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("AUTH_DISCORD_ID", "id"),
            ("AUTH_DISCORD_SECRET", "secret"),
            ("AUTH_GITHUB_ID", "gh"),
            ("AUTH_GITHUB_SECRET", "gh-secret"),
            ("AUTH_TWITCH_ID", "only-id"),
            ("AUTH_REDDIT_ID", "r"),
            ("AUTH_REDDIT_SECRET", "  "),
        ]);
        let enabled = enabled_providers(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(enabled, vec![Provider::GitHub, Provider::Discord]);
    }

    #[test]
    fn admin_levels_gate_department_management() {
        assert!(AdminLevel::Site.can_manage_departments());
        assert!(AdminLevel::Domain.can_manage_departments());
        assert!(!AdminLevel::Department.can_manage_departments());
        assert!(!AdminLevel::User.can_manage_departments());
    }

    #[test]
    fn session_parsing() {
        assert_eq!(parse_session(Value::Null).unwrap(), None);
        assert_eq!(parse_session(serde_json::json!({})).unwrap(), None);

        let session = parse_session(serde_json::json!({
            "user": {"id": "u1", "name": "Ada", "adminLevel": "DOMAIN", "adminScope": "eng"},
            "expires": "2025-01-01T00:00:00.000Z"
        }))
        .unwrap()
        .unwrap();
        assert_eq!(session.user.admin_level, AdminLevel::Domain);
        assert_eq!(session.user.admin_scope.as_deref(), Some("eng"));

        let plain = parse_session(serde_json::json!({"user": {"id": "u2"}}))
            .unwrap()
            .unwrap();
        assert_eq!(plain.user.admin_level, AdminLevel::User);

        assert!(parse_session(serde_json::json!({"user": {"id": ""}})).is_err());
    }

    #[test]
    fn fetches_session_with_cookie() {
        let server = Server::http("127.0.0.1:0").unwrap();
        let base = format!("http://{}", server.server_addr());
        let handle = thread::spawn(move || {
            let request = server.recv().unwrap();
            let cookie = request
                .headers()
                .iter()
                .find(|h| h.field.equiv("Cookie"))
                .map(|h| h.value.to_string());
            request
                .respond(Response::from_string(r#"{"user":{"id":"u9","adminLevel":"SITE"}}"#))
                .unwrap();
            cookie
        });

        let client = SessionClient::new(ClientConfig {
            base_url: base,
            user_agent: "kudos-tui/test".into(),
            session_token: Some("abc".into()),
            timeout: None,
        })
        .unwrap();
        let session = client.session().unwrap().unwrap();
        assert_eq!(session.user.id, "u9");
        assert_eq!(
            handle.join().unwrap().as_deref(),
            Some("next-auth.session-token=abc")
        );
    }

    #[test]
    fn no_token_means_anonymous_without_request() {
        let client = SessionClient::new(ClientConfig {
            base_url: "http://127.0.0.1:9".into(),
            user_agent: "kudos-tui/test".into(),
            session_token: Some("   ".into()),
            timeout: None,
        })
        .unwrap();
        assert!(!client.has_token());
        assert_eq!(client.session().unwrap(), None);
        assert_eq!(
            client.signin_url(Provider::Discord),
            "http://127.0.0.1:9/api/auth/signin/discord"
        );
    }

    #[test]
    fn sign_in_allows_one_provider_at_a_time() {
        let base = Url::parse("https://kudos.example/").unwrap();
        let providers = [Provider::Discord, Provider::GitHub]
            .into_iter()
            .map(|provider| ProviderInfo {
                provider,
                signin_url: signin_url(&base, provider),
            })
            .collect();
        let mut modal = SignIn::new(providers);
        modal.open();
        modal.move_selection(-1);
        assert_eq!(modal.selected(), 1);

        let url = modal.begin().unwrap().signin_url.clone();
        assert_eq!(url, "https://kudos.example/api/auth/signin/github");
        assert!(modal.is_disabled());
        assert!(modal.begin().is_none());
        modal.move_selection(1);
        assert_eq!(modal.selected(), 1);

        modal.finish();
        assert_eq!(modal.loading(), None);
        assert!(modal.begin().is_some());
        modal.close();
        assert!(!modal.is_open());
    }
}
