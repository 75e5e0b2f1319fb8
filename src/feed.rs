//! Scope-aware, cursor-paginated kudos feed.
//!
//! [`Controller`] is a plain state machine: commands return a [`FetchTicket`]
//! describing the request to run, and results come back through
//! [`Controller::apply`]. [`Feed`] runs tickets on worker threads and feeds the
//! results back over a channel drained by the UI loop.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::data::FeedService;
use crate::kudos::{FeedPage, FeedRequest, FetchError, KudosRecord, Scope, DEFAULT_PAGE_SIZE};
use crate::visibility::{Observer, Region, DEFAULT_ROOT_MARGIN, DEFAULT_THRESHOLD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    LoadingFirst,
    LoadingNext,
    Ready,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recommendation {
    Pending,
    Resolved(Scope),
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    Replace,
    Append,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub request_id: u64,
    pub mode: LoadMode,
    pub request: FeedRequest,
}

#[derive(Debug)]
pub struct FetchResponse {
    pub request_id: u64,
    pub scope: Scope,
    pub result: Result<FeedPage, FetchError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Replaced,
    Appended,
    Failed,
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("the {0} feed requires signing in")]
pub struct ScopeUnavailable(pub Scope);

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub authenticated: bool,
    pub page_size: u32,
    pub visibility_threshold: f32,
    pub root_margin: u16,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            authenticated: false,
            page_size: DEFAULT_PAGE_SIZE,
            visibility_threshold: DEFAULT_THRESHOLD,
            root_margin: DEFAULT_ROOT_MARGIN,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingFetch {
    request_id: u64,
    scope: Scope,
    mode: LoadMode,
}

#[derive(Debug)]
pub struct Controller {
    authenticated: bool,
    page_size: u32,
    explicit_scope: Option<Scope>,
    recommendation: Recommendation,
    pages: Vec<FeedPage>,
    loaded_scope: Option<Scope>,
    phase: Phase,
    error: Option<String>,
    pending: Option<PendingFetch>,
    next_request_id: u64,
    sentinel: Observer,
}

impl Controller {
    pub fn new(options: Options) -> Self {
        Self {
            authenticated: options.authenticated,
            page_size: options.page_size.max(1),
            explicit_scope: None,
            recommendation: Recommendation::Pending,
            pages: Vec::new(),
            loaded_scope: None,
            phase: Phase::Idle,
            error: None,
            pending: None,
            next_request_id: 1,
            sentinel: Observer::new(options.visibility_threshold, options.root_margin),
        }
    }

    /// Back to a fresh feed waiting on its scope recommendation.
    pub fn mount(&mut self) {
        self.explicit_scope = None;
        self.recommendation = Recommendation::Pending;
        self.pages.clear();
        self.loaded_scope = None;
        self.phase = Phase::Idle;
        self.error = None;
        self.pending = None;
        self.sentinel.rearm();
    }

    /// `explicit ?? recommended ?? site`, never a signed-in-only scope for an
    /// anonymous viewer.
    pub fn effective_scope(&self) -> Scope {
        let recommended = match self.recommendation {
            Recommendation::Resolved(scope) => Some(scope),
            Recommendation::Pending | Recommendation::Unavailable => None,
        };
        let scope = self
            .explicit_scope
            .or(recommended)
            .unwrap_or(Scope::Site);
        if scope.requires_session() && !self.authenticated {
            Scope::Site
        } else {
            scope
        }
    }

    pub fn available_scopes(&self) -> &'static [Scope] {
        if self.authenticated {
            &Scope::ALL
        } else {
            &[Scope::Site]
        }
    }

    pub fn set_authenticated(&mut self, authenticated: bool) -> Option<FetchTicket> {
        if self.authenticated == authenticated {
            return None;
        }
        let before = self.effective_scope();
        self.authenticated = authenticated;
        if !authenticated && self.explicit_scope.is_some_and(|scope| scope.requires_session()) {
            self.explicit_scope = None;
        }
        if self.phase == Phase::Idle || before == self.effective_scope() {
            return None;
        }
        Some(self.load_first_page())
    }

    pub fn apply_recommendation(&mut self, result: Result<Scope, FetchError>) -> Option<FetchTicket> {
        self.recommendation = match result {
            Ok(scope) => {
                log::debug!("feed: recommended scope {scope}");
                Recommendation::Resolved(scope)
            }
            Err(err) => {
                log::warn!("feed: recommended scope unavailable: {err}");
                Recommendation::Unavailable
            }
        };
        if self.explicit_scope.is_some() {
            return None;
        }
        let target = self.effective_scope();
        let current = self
            .pending
            .map(|pending| pending.scope)
            .or(self.loaded_scope);
        if current == Some(target) {
            return None;
        }
        Some(self.load_first_page())
    }

    pub fn select_scope(&mut self, scope: Scope) -> Result<FetchTicket, ScopeUnavailable> {
        if scope.requires_session() && !self.authenticated {
            return Err(ScopeUnavailable(scope));
        }
        self.explicit_scope = Some(scope);
        Ok(self.load_first_page())
    }

    /// Drops every loaded page and supersedes any fetch in flight.
    pub fn load_first_page(&mut self) -> FetchTicket {
        let scope = self.effective_scope();
        self.pages.clear();
        self.loaded_scope = None;
        self.error = None;
        self.phase = Phase::LoadingFirst;
        self.sentinel.rearm();
        self.issue(scope, LoadMode::Replace, None)
    }

    pub fn load_next_page(&mut self) -> Option<FetchTicket> {
        if self.pending.is_some() {
            return None;
        }
        let cursor = self.next_cursor()?.to_string();
        let scope = self.loaded_scope?;
        self.error = None;
        self.phase = Phase::LoadingNext;
        Some(self.issue(scope, LoadMode::Append, Some(cursor)))
    }

    /// Explicit user retry after a failed load.
    pub fn retry(&mut self) -> Option<FetchTicket> {
        if self.pending.is_some() {
            return None;
        }
        if self.pages.is_empty() {
            Some(self.load_first_page())
        } else {
            self.load_next_page()
        }
    }

    pub fn apply(&mut self, response: FetchResponse) -> Applied {
        let Some(pending) = self.pending else {
            log::debug!("feed: dropping response {} with nothing pending", response.request_id);
            return Applied::Discarded;
        };
        if pending.request_id != response.request_id {
            log::debug!(
                "feed: dropping stale response {} (waiting on {})",
                response.request_id,
                pending.request_id
            );
            return Applied::Discarded;
        }
        self.pending = None;
        if response.scope != self.effective_scope() {
            log::debug!("feed: dropping {} response after scope change", response.scope);
            self.phase = if self.pages.is_empty() {
                Phase::Idle
            } else {
                Phase::Ready
            };
            return Applied::Discarded;
        }

        match response.result {
            Ok(page) => {
                log::debug!(
                    "feed: {} kudos for {} (more: {})",
                    page.items.len(),
                    response.scope,
                    page.next_cursor.is_some()
                );
                if pending.mode == LoadMode::Replace {
                    self.pages.clear();
                }
                self.pages.push(page);
                self.loaded_scope = Some(response.scope);
                self.error = None;
                self.phase = Phase::Ready;
                self.sentinel.rearm();
                match pending.mode {
                    LoadMode::Replace => Applied::Replaced,
                    LoadMode::Append => Applied::Appended,
                }
            }
            Err(err) => {
                log::warn!("feed: failed to load {} feed: {err}", response.scope);
                self.error = Some(err.to_string());
                self.phase = Phase::Error;
                Applied::Failed
            }
        }
    }

    /// Continues the feed when the sentinel row scrolls into view.
    pub fn sentinel_visibility(&mut self, target: Region, root: Region) -> Option<FetchTicket> {
        let became_visible = self.sentinel.observe(target, root);
        if !became_visible || self.phase == Phase::Error || !self.has_next_page() {
            return None;
        }
        self.load_next_page()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn explicit_scope(&self) -> Option<Scope> {
        self.explicit_scope
    }

    pub fn recommendation(&self) -> Recommendation {
        self.recommendation
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn pages(&self) -> &[FeedPage] {
        &self.pages
    }

    pub fn items(&self) -> impl Iterator<Item = &KudosRecord> + '_ {
        self.pages.iter().flat_map(|page| page.items.iter())
    }

    pub fn item_count(&self) -> usize {
        self.pages.iter().map(|page| page.items.len()).sum()
    }

    pub fn next_cursor(&self) -> Option<&str> {
        self.pages
            .last()
            .and_then(|page| page.next_cursor.as_deref())
            .filter(|cursor| !cursor.trim().is_empty())
    }

    pub fn has_next_page(&self) -> bool {
        self.next_cursor().is_some()
    }

    pub fn is_loading_first(&self) -> bool {
        matches!(self.phase, Phase::Idle | Phase::LoadingFirst)
    }

    pub fn is_loading_next(&self) -> bool {
        self.phase == Phase::LoadingNext
    }

    pub fn is_in_flight(&self) -> bool {
        self.pending.is_some()
    }

    /// A loaded first page with nothing in it.
    pub fn is_empty(&self) -> bool {
        self.phase == Phase::Ready && self.item_count() == 0
    }

    /// Scope shown by default for a signed-in viewer who has not picked one.
    pub fn default_notice(&self) -> Option<Scope> {
        match (self.authenticated, self.explicit_scope, self.recommendation) {
            (true, None, Recommendation::Resolved(scope)) => Some(scope),
            _ => None,
        }
    }

    fn issue(&mut self, scope: Scope, mode: LoadMode, cursor: Option<String>) -> FetchTicket {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.pending = Some(PendingFetch {
            request_id,
            scope,
            mode,
        });
        FetchTicket {
            request_id,
            mode,
            request: FeedRequest {
                scope,
                limit: self.page_size,
                cursor,
            },
        }
    }
}

enum Event {
    Recommendation(Result<Scope, FetchError>),
    Page(FetchResponse),
}

/// Runs a [`Controller`]'s fetches against a [`FeedService`].
pub struct Feed {
    controller: Controller,
    service: Arc<dyn FeedService>,
    tx: Sender<Event>,
    rx: Receiver<Event>,
}

impl Feed {
    pub fn new(service: Arc<dyn FeedService>, options: Options) -> Self {
        let (tx, rx) = unbounded();
        Self {
            controller: Controller::new(options),
            service,
            tx,
            rx,
        }
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn mount(&mut self) {
        self.controller.mount();
        let tx = self.tx.clone();
        let service = self.service.clone();
        thread::spawn(move || {
            let result = service.recommended_scope();
            let _ = tx.send(Event::Recommendation(result));
        });
    }

    pub fn select_scope(&mut self, scope: Scope) -> Result<(), ScopeUnavailable> {
        let ticket = self.controller.select_scope(scope)?;
        self.dispatch(ticket);
        Ok(())
    }

    pub fn set_authenticated(&mut self, authenticated: bool) {
        if let Some(ticket) = self.controller.set_authenticated(authenticated) {
            self.dispatch(ticket);
        }
    }

    pub fn load_first_page(&mut self) {
        let ticket = self.controller.load_first_page();
        self.dispatch(ticket);
    }

    pub fn load_next_page(&mut self) -> bool {
        self.run(|controller| controller.load_next_page())
    }

    pub fn retry(&mut self) -> bool {
        self.run(|controller| controller.retry())
    }

    pub fn sentinel_visibility(&mut self, target: Region, root: Region) -> bool {
        self.run(|controller| controller.sentinel_visibility(target, root))
    }

    /// Applies every result that has arrived; true when state changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Ok(event) = self.rx.try_recv() {
            changed |= self.handle(event);
        }
        changed
    }

    /// Blocks for the next result, then drains the rest.
    pub fn poll_timeout(&mut self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => {
                let changed = self.handle(event);
                self.poll() || changed
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    fn run(&mut self, command: impl FnOnce(&mut Controller) -> Option<FetchTicket>) -> bool {
        match command(&mut self.controller) {
            Some(ticket) => {
                self.dispatch(ticket);
                true
            }
            None => false,
        }
    }

    fn handle(&mut self, event: Event) -> bool {
        match event {
            Event::Recommendation(result) => {
                if let Some(ticket) = self.controller.apply_recommendation(result) {
                    self.dispatch(ticket);
                }
                true
            }
            Event::Page(response) => self.controller.apply(response) != Applied::Discarded,
        }
    }

    fn dispatch(&self, ticket: FetchTicket) {
        let tx = self.tx.clone();
        let service = self.service.clone();
        thread::spawn(move || {
            let result = service.load_feed(&ticket.request);
            let _ = tx.send(Event::Page(FetchResponse {
                request_id: ticket.request_id,
                scope: ticket.request.scope,
                result,
            }));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kudos::UserRef;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn record(id: &str) -> KudosRecord {
        KudosRecord {
            id: id.into(),
            user: UserRef {
                id: format!("user-{id}"),
            },
            message: format!("thanks {id}"),
            images: None,
            created_at: Utc::now(),
            purchase: None,
        }
    }

    fn page(ids: &[&str], cursor: Option<&str>) -> FeedPage {
        FeedPage {
            items: ids.iter().map(|id| record(id)).collect(),
            next_cursor: cursor.map(str::to_string),
        }
    }

    fn signed_in() -> Controller {
        Controller::new(Options {
            authenticated: true,
            ..Default::default()
        })
    }

    fn respond(ticket: &FetchTicket, result: Result<FeedPage, FetchError>) -> FetchResponse {
        FetchResponse {
            request_id: ticket.request_id,
            scope: ticket.request.scope,
            result,
        }
    }

    fn ids(controller: &Controller) -> Vec<String> {
        controller.items().map(|item| item.id.clone()).collect()
    }

    #[test]
    fn waits_for_recommendation_then_loads_it() {
        let mut controller = signed_in();
        controller.mount();
        assert_eq!(controller.phase(), Phase::Idle);
        assert!(controller.is_loading_first());

        let ticket = controller
            .apply_recommendation(Ok(Scope::Department))
            .unwrap();
        assert_eq!(ticket.request.scope, Scope::Department);
        assert_eq!(ticket.request.limit, DEFAULT_PAGE_SIZE);
        assert_eq!(ticket.request.cursor, None);
        assert_eq!(controller.phase(), Phase::LoadingFirst);
        assert_eq!(controller.default_notice(), Some(Scope::Department));
    }

    #[test]
    fn failed_recommendation_falls_back_to_site() {
        let mut controller = signed_in();
        controller.mount();
        let ticket = controller
            .apply_recommendation(Err(FetchError::Transport("offline".into())))
            .unwrap();
        assert_eq!(ticket.request.scope, Scope::Site);
        assert_eq!(controller.recommendation(), Recommendation::Unavailable);
        assert_eq!(controller.default_notice(), None);
    }

    #[test]
    fn explicit_scope_wins_over_recommendation() {
        let mut controller = signed_in();
        controller.mount();
        let ticket = controller.select_scope(Scope::Domain).unwrap();
        assert_eq!(ticket.request.scope, Scope::Domain);

        assert!(controller.apply_recommendation(Ok(Scope::Department)).is_none());
        assert_eq!(controller.effective_scope(), Scope::Domain);
        assert_eq!(controller.default_notice(), None);
    }

    #[test]
    fn anonymous_viewer_is_limited_to_site() {
        let mut controller = Controller::new(Options::default());
        controller.mount();
        assert_eq!(controller.available_scopes(), &[Scope::Site]);
        assert_eq!(
            controller.select_scope(Scope::Department),
            Err(ScopeUnavailable(Scope::Department))
        );

        let ticket = controller.apply_recommendation(Ok(Scope::Domain)).unwrap();
        assert_eq!(ticket.request.scope, Scope::Site);
        assert_eq!(controller.effective_scope(), Scope::Site);
        assert_eq!(controller.default_notice(), None);
    }

    #[test]
    fn pages_append_in_arrival_order_until_cursor_runs_out() {
        let mut controller = signed_in();
        controller.mount();
        let first = controller.apply_recommendation(Ok(Scope::Site)).unwrap();
        assert_eq!(
            controller.apply(respond(&first, Ok(page(&["a", "b", "c"], Some("c1"))))),
            Applied::Replaced
        );
        assert!(controller.has_next_page());

        let next = controller.load_next_page().unwrap();
        assert_eq!(next.mode, LoadMode::Append);
        assert_eq!(next.request.cursor.as_deref(), Some("c1"));
        assert!(controller.is_loading_next());
        // the server may repeat an item; it is kept as delivered
        assert_eq!(
            controller.apply(respond(&next, Ok(page(&["c", "d"], None)))),
            Applied::Appended
        );

        assert_eq!(controller.item_count(), 5);
        assert_eq!(ids(&controller), vec!["a", "b", "c", "c", "d"]);
        assert_eq!(controller.pages().len(), 2);
        assert!(!controller.has_next_page());
        assert!(controller.load_next_page().is_none());
        assert_eq!(controller.phase(), Phase::Ready);
    }

    #[test]
    fn second_next_page_request_is_a_no_op_while_in_flight() {
        let mut controller = signed_in();
        controller.mount();
        let first = controller.apply_recommendation(Ok(Scope::Site)).unwrap();
        controller.apply(respond(&first, Ok(page(&["a"], Some("c1")))));

        assert!(controller.load_next_page().is_some());
        assert!(controller.load_next_page().is_none());
        assert!(controller.retry().is_none());
    }

    #[test]
    fn scope_change_discards_stale_response() {
        let mut controller = signed_in();
        controller.mount();
        let site = controller.apply_recommendation(Ok(Scope::Site)).unwrap();
        let domain = controller.select_scope(Scope::Domain).unwrap();
        assert_ne!(site.request_id, domain.request_id);

        assert_eq!(
            controller.apply(respond(&site, Ok(page(&["site-1"], Some("s1"))))),
            Applied::Discarded
        );
        assert!(controller.pages().is_empty());
        assert_eq!(controller.phase(), Phase::LoadingFirst);

        assert_eq!(
            controller.apply(respond(&domain, Ok(page(&["domain-1"], None)))),
            Applied::Replaced
        );
        assert_eq!(ids(&controller), vec!["domain-1"]);
    }

    #[test]
    fn stale_next_page_never_mixes_into_new_scope() {
        let mut controller = signed_in();
        controller.mount();
        let first = controller.apply_recommendation(Ok(Scope::Site)).unwrap();
        controller.apply(respond(&first, Ok(page(&["s1"], Some("c1")))));
        let next = controller.load_next_page().unwrap();

        let department = controller.select_scope(Scope::Department).unwrap();
        assert!(controller.pages().is_empty());
        assert_eq!(
            controller.apply(respond(&next, Ok(page(&["s2"], None)))),
            Applied::Discarded
        );
        controller.apply(respond(&department, Ok(page(&["d1"], None))));
        assert_eq!(ids(&controller), vec!["d1"]);
    }

    #[test]
    fn first_page_error_then_retry() {
        let mut controller = signed_in();
        controller.mount();
        let first = controller.apply_recommendation(Ok(Scope::Site)).unwrap();
        assert_eq!(
            controller.apply(respond(&first, Err(FetchError::Transport("boom".into())))),
            Applied::Failed
        );
        assert_eq!(controller.phase(), Phase::Error);
        assert_eq!(controller.error(), Some("request failed: boom"));

        let retry = controller.retry().unwrap();
        assert_eq!(retry.mode, LoadMode::Replace);
        assert_eq!(controller.error(), None);
    }

    #[test]
    fn next_page_error_keeps_loaded_items() {
        let mut controller = signed_in();
        controller.mount();
        let first = controller.apply_recommendation(Ok(Scope::Site)).unwrap();
        controller.apply(respond(&first, Ok(page(&["a"], Some("c1")))));
        let next = controller.load_next_page().unwrap();
        controller.apply(respond(&next, Err(FetchError::Decode("bad".into()))));

        assert_eq!(controller.phase(), Phase::Error);
        assert_eq!(ids(&controller), vec!["a"]);
        let retry = controller.retry().unwrap();
        assert_eq!(retry.request.cursor.as_deref(), Some("c1"));
    }

    #[test]
    fn empty_first_page_is_not_an_error() {
        let mut controller = signed_in();
        controller.mount();
        let first = controller.apply_recommendation(Ok(Scope::Site)).unwrap();
        controller.apply(respond(&first, Ok(page(&[], None))));
        assert!(controller.is_empty());
        assert_eq!(controller.error(), None);
    }

    #[test]
    fn sentinel_triggers_once_per_visibility_edge() {
        let mut controller = signed_in();
        controller.mount();
        let first = controller.apply_recommendation(Ok(Scope::Site)).unwrap();
        controller.apply(respond(&first, Ok(page(&["a"], Some("c1")))));

        let root = Region::new(0, 10);
        let hidden = Region::new(40, 1);
        let shown = Region::new(8, 1);
        assert!(controller.sentinel_visibility(hidden, root).is_none());
        let next = controller.sentinel_visibility(shown, root).unwrap();
        assert!(controller.sentinel_visibility(shown, root).is_none());

        controller.apply(respond(&next, Ok(page(&["b"], Some("c2")))));
        // still visible after the page lands: continue once more
        assert!(controller.sentinel_visibility(shown, root).is_some());
        assert!(controller.sentinel_visibility(shown, root).is_none());
    }

    #[test]
    fn signing_out_drops_restricted_scope() {
        let mut controller = signed_in();
        controller.mount();
        controller.select_scope(Scope::Department).unwrap();
        let ticket = controller.set_authenticated(false).unwrap();
        assert_eq!(ticket.request.scope, Scope::Site);
        assert_eq!(controller.explicit_scope(), None);
    }

    #[test]
    fn signing_in_switches_to_recommended_scope() {
        let mut controller = Controller::new(Options::default());
        controller.mount();
        let site = controller.apply_recommendation(Ok(Scope::Department)).unwrap();
        assert_eq!(site.request.scope, Scope::Site);

        let ticket = controller.set_authenticated(true).unwrap();
        assert_eq!(ticket.request.scope, Scope::Department);
        assert!(controller.is_authenticated());
        assert_eq!(controller.available_scopes(), &Scope::ALL);
        assert_eq!(controller.set_authenticated(true), None);

        // the anonymous page finishing late must not land on the new scope
        assert_eq!(
            controller.apply(respond(&site, Ok(FeedPage::default()))),
            Applied::Discarded
        );
        assert_eq!(
            controller.apply(respond(&ticket, Ok(FeedPage::default()))),
            Applied::Replaced
        );
        let domain = controller.select_scope(Scope::Domain).unwrap();
        assert_eq!(domain.request.scope, Scope::Domain);
    }

    #[test]
    fn signing_in_before_mount_waits_for_mount() {
        let mut controller = Controller::new(Options::default());
        assert_eq!(controller.set_authenticated(true), None);
        assert!(controller.is_authenticated());
    }

    struct GatedService {
        calls: AtomicUsize,
        gate: Receiver<()>,
        pages: HashMap<(Scope, Option<String>), FeedPage>,
    }

    impl FeedService for GatedService {
        fn recommended_scope(&self) -> Result<Scope, FetchError> {
            Ok(Scope::Site)
        }

        fn load_feed(&self, request: &FeedRequest) -> Result<FeedPage, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate
                .recv_timeout(Duration::from_secs(5))
                .map_err(|err| FetchError::Transport(err.to_string()))?;
            Ok(self
                .pages
                .get(&(request.scope, request.cursor.clone()))
                .cloned()
                .unwrap_or_default())
        }
    }

    fn gated(pages: HashMap<(Scope, Option<String>), FeedPage>) -> (Arc<GatedService>, Sender<()>) {
        let (tx, rx) = unbounded();
        let service = Arc::new(GatedService {
            calls: AtomicUsize::new(0),
            gate: rx,
            pages,
        });
        (service, tx)
    }

    fn poll_until(feed: &mut Feed, done: impl Fn(&Controller) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(feed.controller()) {
            assert!(Instant::now() < deadline, "feed did not settle");
            feed.poll_timeout(Duration::from_millis(50));
        }
    }

    #[test]
    fn driver_issues_one_call_for_repeated_next_page() {
        let mut pages = HashMap::new();
        pages.insert((Scope::Site, None), page(&["a", "b"], Some("c1")));
        pages.insert((Scope::Site, Some("c1".into())), page(&["c"], None));
        let (service, gate) = gated(pages);
        let mut feed = Feed::new(
            service.clone(),
            Options {
                authenticated: true,
                ..Default::default()
            },
        );

        feed.mount();
        poll_until(&mut feed, |c| c.is_in_flight());
        gate.send(()).unwrap();
        poll_until(&mut feed, |c| c.phase() == Phase::Ready);
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);

        assert!(feed.load_next_page());
        assert!(!feed.load_next_page());
        gate.send(()).unwrap();
        poll_until(&mut feed, |c| c.phase() == Phase::Ready);

        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
        assert_eq!(ids(feed.controller()), vec!["a", "b", "c"]);
        assert!(!feed.load_next_page());
    }

    #[test]
    fn driver_discards_result_from_previous_scope() {
        let mut pages = HashMap::new();
        pages.insert((Scope::Site, None), page(&["site-1"], None));
        pages.insert((Scope::Domain, None), page(&["domain-1"], None));
        let (service, gate) = gated(pages);
        let mut feed = Feed::new(
            service.clone(),
            Options {
                authenticated: true,
                ..Default::default()
            },
        );

        feed.mount();
        poll_until(&mut feed, |c| c.is_in_flight());
        feed.select_scope(Scope::Domain).unwrap();
        gate.send(()).unwrap();
        gate.send(()).unwrap();
        poll_until(&mut feed, |c| c.phase() == Phase::Ready);

        let deadline = Instant::now() + Duration::from_millis(200);
        while Instant::now() < deadline {
            feed.poll_timeout(Duration::from_millis(20));
        }
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
        assert_eq!(ids(feed.controller()), vec!["domain-1"]);
    }
}
