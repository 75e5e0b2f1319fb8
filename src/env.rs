//! Validation of the site's deployment environment.
//!
//! Empty values count as unset. Setting `SKIP_ENV_VALIDATION` to anything
//! non-empty turns every check off.

use std::fmt;

use url::Url;

use crate::auth::{self, Provider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeEnv {
    #[default]
    Development,
    Test,
    Production,
}

impl NodeEnv {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "development" => Some(NodeEnv::Development),
            "test" => Some(NodeEnv::Test),
            "production" => Some(NodeEnv::Production),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvIssue {
    pub key: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct EnvError {
    pub issues: Vec<EnvIssue>,
}

impl fmt::Display for EnvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid environment variables:")?;
        for issue in &self.issues {
            write!(f, "\n  {}: {}", issue.key, issue.message)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerEnv {
    pub auth_secret: Option<String>,
    pub auth_url: Option<String>,
    pub discord_id: String,
    pub discord_secret: String,
    pub twitch_id: Option<String>,
    pub twitch_secret: Option<String>,
    pub github_id: Option<String>,
    pub github_secret: Option<String>,
    pub database_url: String,
    pub node_env: NodeEnv,
    pub providers: Vec<Provider>,
    pub validated: bool,
}

impl ServerEnv {
    pub fn from_process() -> Result<Self, EnvError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, EnvError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());
        let skip = get("SKIP_ENV_VALIDATION").is_some();
        let mut issues = Vec::new();

        let node_env = match get("NODE_ENV") {
            None => NodeEnv::default(),
            Some(raw) => NodeEnv::parse(&raw).unwrap_or_else(|| {
                issues.push(EnvIssue {
                    key: "NODE_ENV",
                    message: format!(
                        "expected 'development' | 'test' | 'production', received {raw:?}"
                    ),
                });
                NodeEnv::default()
            }),
        };

        let mut required = |key: &'static str| {
            get(key).unwrap_or_else(|| {
                issues.push(EnvIssue {
                    key,
                    message: "required".to_string(),
                });
                String::new()
            })
        };
        let discord_id = required("AUTH_DISCORD_ID");
        let discord_secret = required("AUTH_DISCORD_SECRET");
        let database_url = required("DATABASE_URL");

        let auth_secret = get("AUTH_SECRET");
        if node_env == NodeEnv::Production && auth_secret.is_none() {
            issues.push(EnvIssue {
                key: "AUTH_SECRET",
                message: "required in production".to_string(),
            });
        }
        if !database_url.is_empty() {
            if let Err(err) = Url::parse(&database_url) {
                issues.push(EnvIssue {
                    key: "DATABASE_URL",
                    message: format!("invalid url: {err}"),
                });
            }
        }

        if !skip && !issues.is_empty() {
            return Err(EnvError { issues });
        }
        if skip {
            log::info!("env: validation skipped");
        }

        Ok(Self {
            auth_secret,
            auth_url: get("AUTH_URL"),
            discord_id,
            discord_secret,
            twitch_id: get("AUTH_TWITCH_ID"),
            twitch_secret: get("AUTH_TWITCH_SECRET"),
            github_id: get("AUTH_GITHUB_ID"),
            github_secret: get("AUTH_GITHUB_SECRET"),
            database_url,
            node_env,
            providers: auth::enabled_providers(&lookup),
            validated: !skip,
        })
    }

    /// Debug output from the auth layer is only on in development.
    pub fn auth_debug(&self) -> bool {
        self.node_env == NodeEnv::Development
    }

    /// Cookies are marked secure in production.
    pub fn secure_cookies(&self) -> bool {
        self.node_env == NodeEnv::Production
    }
}
