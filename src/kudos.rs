use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{COOKIE, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::auth::SESSION_COOKIE;

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_PAGE_SIZE: u32 = 10;

const TRPC_PATH: &str = "api/trpc";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Department,
    Domain,
    #[default]
    Site,
}

impl Scope {
    pub const ALL: [Scope; 3] = [Scope::Department, Scope::Domain, Scope::Site];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Department => "department",
            Scope::Domain => "domain",
            Scope::Site => "site",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Scope::Department => "Department",
            Scope::Domain => "Domain",
            Scope::Site => "Site",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Scope::Department => "See kudos from your department colleagues",
            Scope::Domain => "See kudos from your domain",
            Scope::Site => "See all kudos from the entire site",
        }
    }

    /// Department and domain feeds only exist for a signed-in user.
    pub fn requires_session(&self) -> bool {
        !matches!(self, Scope::Site)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "department" => Ok(Scope::Department),
            "domain" => Ok(Scope::Domain),
            "site" => Ok(Scope::Site),
            other => Err(FetchError::Decode(format!("unknown scope {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WishlistAssignment {
    pub wishlist_owner: UserRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Purchase {
    pub wishlist_assignment: WishlistAssignment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KudosRecord {
    pub id: String,
    pub user: UserRef,
    pub message: String,
    /// JSON-encoded array of image URLs.
    #[serde(default)]
    pub images: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub purchase: Option<Purchase>,
}

impl KudosRecord {
    pub fn image_urls(&self) -> Vec<String> {
        crate::images::parse_image_list(self.images.as_deref())
    }

    pub fn gift_owner_id(&self) -> Option<&str> {
        self.purchase
            .as_ref()
            .map(|purchase| purchase.wishlist_assignment.wishlist_owner.id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPage {
    pub items: Vec<KudosRecord>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedRequest {
    pub scope: Scope,
    pub limit: u32,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("{code}: {message}")]
    Rpc { code: String, message: String },
    #[error("unexpected response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub session_token: Option<String>,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
    session_token: Option<String>,
}

impl Client {
    pub fn new(config: ClientConfig) -> anyhow::Result<Self> {
        if config.user_agent.trim().is_empty() {
            anyhow::bail!("kudos client user agent required");
        }
        let base = if config.base_url.trim().is_empty() {
            DEFAULT_BASE_URL.to_string()
        } else {
            config.base_url
        };
        let base_url = Url::parse(&format!("{}/", base.trim_end_matches('/')))?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
            session_token: config.session_token.filter(|token| !token.trim().is_empty()),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn recommended_scope(&self) -> Result<Scope, FetchError> {
        let value: Value = self.query("kudos.getRecommendedScope", None)?;
        match value {
            Value::String(raw) => raw.parse(),
            Value::Null => Ok(Scope::Site),
            other => Err(FetchError::Decode(format!(
                "recommended scope was not a string: {other}"
            ))),
        }
    }

    pub fn feed(&self, request: &FeedRequest) -> Result<FeedPage, FetchError> {
        let input = serde_json::to_value(request)
            .map_err(|err| FetchError::Decode(err.to_string()))?;
        self.query("kudos.getFeed", Some(input))
    }

    fn query<T>(&self, procedure: &str, input: Option<Value>) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
    {
        let mut url = self
            .base_url
            .join(&format!("{TRPC_PATH}/{procedure}"))
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        if let Some(input) = input {
            let wrapped = serde_json::json!({ "json": input });
            url.query_pairs_mut()
                .append_pair("input", &wrapped.to_string());
        }

        log::debug!("kudos: GET {procedure}");
        let mut request = self.http.get(url).header(USER_AGENT, &self.user_agent);
        if let Some(token) = &self.session_token {
            request = request.header(COOKIE, format!("{SESSION_COOKIE}={token}"));
        }
        let response = request
            .send()
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|err| FetchError::Transport(err.to_string()))?;

        let envelope: Value = match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(_) if !status.is_success() => {
                return Err(FetchError::Status {
                    status: status.as_u16(),
                    message: body.trim().chars().take(200).collect(),
                })
            }
            Err(err) => return Err(FetchError::Decode(err.to_string())),
        };
        unwrap_envelope(envelope, status.as_u16())
    }
}

/// Reads `{"result":{"data":{"json":…}}}`, tolerating a bare `data` payload
/// from servers without a transformer.
fn unwrap_envelope<T>(envelope: Value, status: u16) -> Result<T, FetchError>
where
    T: DeserializeOwned,
{
    if let Some(error) = envelope.get("error") {
        let error = error.get("json").unwrap_or(error);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        let code = error
            .pointer("/data/code")
            .and_then(Value::as_str)
            .unwrap_or("INTERNAL_SERVER_ERROR")
            .to_string();
        return Err(FetchError::Rpc { code, message });
    }

    let Some(data) = envelope.pointer("/result/data") else {
        return Err(FetchError::Status {
            status,
            message: "response had no result".to_string(),
        });
    };
    let payload = data.get("json").unwrap_or(data).clone();
    serde_json::from_value(payload).map_err(|err| FetchError::Decode(err.to_string()))
}
