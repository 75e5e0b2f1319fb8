use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::kudos::{self, FeedPage, FeedRequest, FetchError, KudosRecord, Scope, UserRef};

pub trait FeedService: Send + Sync {
    fn recommended_scope(&self) -> Result<Scope, FetchError>;
    fn load_feed(&self, request: &FeedRequest) -> Result<FeedPage, FetchError>;
}

pub struct KudosFeedService {
    client: Arc<kudos::Client>,
}

impl KudosFeedService {
    pub fn new(client: Arc<kudos::Client>) -> Self {
        Self { client }
    }
}

impl FeedService for KudosFeedService {
    fn recommended_scope(&self) -> Result<Scope, FetchError> {
        self.client.recommended_scope()
    }

    fn load_feed(&self, request: &FeedRequest) -> Result<FeedPage, FetchError> {
        self.client.feed(request)
    }
}

/// Offline feed used when the site cannot be reached at startup.
#[derive(Default)]
pub struct MockFeedService;

impl FeedService for MockFeedService {
    fn recommended_scope(&self) -> Result<Scope, FetchError> {
        Ok(Scope::Site)
    }

    fn load_feed(&self, request: &FeedRequest) -> Result<FeedPage, FetchError> {
        let now = Utc::now();
        let items = match request.cursor.as_deref() {
            None => vec![
                mock_record("welcome", "offline-1", "Welcome to Kudos-TUI! The site could not be reached, so this is sample content.", now),
                mock_record(
                    "shortcuts",
                    "offline-2",
                    "j/k: move between kudos\n1/2/3: switch scope\nh/l: browse images\nenter, 1-9: expand and pick an image\ns: sign in\nq: quit",
                    now - Duration::minutes(5),
                ),
            ],
            Some(_) => Vec::new(),
        };
        Ok(FeedPage {
            items,
            next_cursor: None,
        })
    }
}

fn mock_record(
    id: &str,
    user_id: &str,
    message: &str,
    created_at: chrono::DateTime<Utc>,
) -> KudosRecord {
    KudosRecord {
        id: id.into(),
        user: UserRef {
            id: user_id.into(),
        },
        message: message.into(),
        images: None,
        created_at,
        purchase: None,
    }
}
