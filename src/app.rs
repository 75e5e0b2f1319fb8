use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use url::Url;

use crate::auth::{self, SessionClient};
use crate::bucket::BucketStore;
use crate::config::{self, Config};
use crate::data::{FeedService, KudosFeedService, MockFeedService};
use crate::env::ServerEnv;
use crate::feed;
use crate::kudos;
use crate::ui;

pub fn run() -> Result<()> {
    let cfg = load_config()?;
    init_logging(&cfg);
    cfg.validate()?;
    let display_path = friendly_path(config::default_path().as_ref());

    let site_url = Url::parse(&format!("{}/", cfg.site.base_url.trim_end_matches('/')))
        .context("parse site url")?;
    let token = cfg.session_token();

    let sessions = SessionClient::new(auth::ClientConfig {
        base_url: cfg.site.base_url.clone(),
        user_agent: cfg.site.user_agent.clone(),
        session_token: token.clone(),
        timeout: Some(cfg.site.timeout),
    })
    .context("build session client")?;

    let session = match sessions.session() {
        Ok(None) if sessions.has_token() => {
            log::warn!("app: saved session token was rejected or expired; run --set-token again");
            None
        }
        Ok(session) => session,
        Err(err) => {
            log::warn!("app: session lookup failed, continuing signed out: {err:#}");
            None
        }
    };
    let providers = sessions.providers().unwrap_or_else(|err| {
        log::warn!("app: provider listing failed: {err:#}");
        sessions.default_providers()
    });

    let (feed_service, status): (Arc<dyn FeedService>, String) =
        match kudos::Client::new(kudos::ClientConfig {
            base_url: cfg.site.base_url.clone(),
            user_agent: cfg.site.user_agent.clone(),
            session_token: token,
            timeout: Some(cfg.site.timeout),
            http_client: None,
        }) {
            Ok(client) => (
                Arc::new(KudosFeedService::new(Arc::new(client))),
                "j/k move · 1/2/3 scope · m more · h/l images · ⏎ expand · 1-9 pick image · o open · s sign in · q quit"
                    .to_string(),
            ),
            Err(err) => {
                log::error!("app: kudos client unavailable: {err:#}");
                (
                    Arc::new(MockFeedService),
                    format!("Offline: {err}. Showing sample kudos."),
                )
            }
        };

    let options = ui::Options {
        feed_service,
        feed: feed::Options {
            authenticated: session.is_some(),
            page_size: cfg.feed.page_size,
            visibility_threshold: cfg.feed.visibility_threshold,
            root_margin: cfg.feed.root_margin_rows,
        },
        session,
        providers,
        site_url,
        status_message: status,
        theme: cfg.ui.theme.clone(),
        config_path: display_path,
    };

    let mut model = ui::Model::new(options);
    model.run()
}

/// Uploads one file to the configured bucket and prints its public URL.
pub fn upload(path: &Path) -> Result<String> {
    let store = open_bucket()?;
    let url = store.upload_file(path)?;
    println!("{url}");
    Ok(url)
}

/// Removes a previously uploaded object. Storage failures are logged only.
pub fn delete(url: &str) -> Result<()> {
    let store = open_bucket()?;
    store.delete(url);
    Ok(())
}

/// Validates the site deployment environment of the current process.
pub fn check_env() -> Result<()> {
    let env = ServerEnv::from_process()?;
    if !env.validated {
        println!("Environment validation skipped (SKIP_ENV_VALIDATION is set).");
        return Ok(());
    }
    let providers: Vec<&str> = env
        .providers
        .iter()
        .map(|provider| provider.display_name())
        .collect();
    println!(
        "Environment OK ({:?}). Sign-in providers: {}",
        env.node_env,
        if providers.is_empty() {
            "none".to_string()
        } else {
            providers.join(", ")
        }
    );
    println!(
        "Auth debug output: {}. Secure cookies: {}.",
        on_off(env.auth_debug()),
        on_off(env.secure_cookies())
    );
    Ok(())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

pub fn set_token(token: &str) -> Result<PathBuf> {
    let path = config::save_session_token(None, token)?;
    println!("Saved session token to {}", friendly_path(Some(&path)));
    Ok(path)
}

fn open_bucket() -> Result<BucketStore> {
    let cfg = load_config()?;
    init_logging(&cfg);
    cfg.validate_storage()?;
    BucketStore::new(cfg.bucket_config())
}

fn load_config() -> Result<Config> {
    config::load(config::LoadOptions::default()).context("load config")
}

fn init_logging(cfg: &Config) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cfg.log.level));
    if let Some(path) = &cfg.log.file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(err) => eprintln!("warning: cannot open log file {}: {err}", path.display()),
        }
    }
    // A second init (tests, repeated CLI helpers) keeps the first logger.
    let _ = builder.try_init();
}

fn friendly_path(path: Option<&PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/kudos-tui/config.yaml".to_string()
    }
}
