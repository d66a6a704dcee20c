pub mod throttle;

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    protocol::{AlertsRequest, AlertsResponse},
    state::{ResponseLogger, ResponseOutcome, Session},
    transport::Transport,
};

pub use throttle::{Decision, Throttle};

pub const DEFAULT_REFRESH: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchStatus {
    #[default]
    Idle,
    Fetching,
    Processing,
    Failure,
}

/// Fetch state machine plus the pause switch.
///
/// `stop()` is terminal: once stopped the controller stays paused for the
/// rest of the session, whatever `resume()` or `toggle_pause()` say.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Status {
    value: FetchStatus,
    last_update_at: Option<DateTime<Utc>>,
    error: Option<String>,
    stopped: bool,
    paused: bool,
}

impl Status {
    pub fn value(&self) -> FetchStatus {
        self.value
    }

    pub fn last_update_at(&self) -> Option<DateTime<Utc>> {
        self.last_update_at
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn is_updating(&self) -> bool {
        matches!(self.value, FetchStatus::Fetching | FetchStatus::Processing)
    }

    pub fn set_idle(&mut self) {
        self.value = FetchStatus::Idle;
        self.error = None;
        self.last_update_at = Some(Utc::now());
    }

    pub fn set_fetching(&mut self) {
        self.value = FetchStatus::Fetching;
    }

    pub fn set_processing(&mut self) {
        self.value = FetchStatus::Processing;
        self.error = None;
    }

    pub fn set_failure(&mut self, error: impl Into<String>) {
        self.value = FetchStatus::Failure;
        self.error = Some(error.into());
        self.last_update_at = Some(Utc::now());
    }

    /// Puts back the state a discarded request found when it started.
    fn revert_to(&mut self, value: FetchStatus) {
        self.value = value;
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = self.stopped;
    }

    pub fn toggle_pause(&mut self) {
        self.paused = self.stopped || !self.paused;
    }

    pub fn stop(&mut self) {
        self.paused = true;
        self.stopped = true;
    }
}

/// Grid and sort parameters sent along with the filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub grid_label: String,
    pub grid_sort_reverse: bool,
    pub sort_order: String,
    pub sort_label: String,
    pub sort_reverse: bool,
}

impl QueryOptions {
    pub fn request(&self, filters: Vec<String>) -> AlertsRequest {
        AlertsRequest {
            filters,
            grid_label: self.grid_label.clone(),
            grid_sort_reverse: self.grid_sort_reverse,
            sort_order: self.sort_order.clone(),
            sort_label: self.sort_label.clone(),
            sort_reverse: self.sort_reverse,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Response matched the current filters and was applied.
    Applied,
    /// Response belonged to an older filter set and was dropped.
    Stale,
    Failed(String),
    /// Paused, stopped, or folded into a pending trailing call.
    Skipped,
}

/// Drives requests for one session: throttling, pause handling and
/// applying whatever comes back.
pub struct FetchController<T> {
    session: Session,
    transport: T,
    throttle: Throttle,
    options: QueryOptions,
    refresh: Duration,
    logger: Option<Arc<ResponseLogger>>,
}

impl<T: Transport> FetchController<T> {
    pub fn new(session: Session, transport: T, options: QueryOptions) -> Self {
        Self {
            session,
            transport,
            throttle: Throttle::default(),
            options,
            refresh: DEFAULT_REFRESH,
            logger: None,
        }
    }

    pub fn with_throttle(mut self, throttle: Throttle) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_refresh(mut self, refresh: Duration) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn with_logger(mut self, logger: Option<Arc<ResponseLogger>>) -> Self {
        self.logger = logger;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn status(&self) -> &Status {
        &self.session.status
    }

    pub fn options_mut(&mut self) -> &mut QueryOptions {
        &mut self.options
    }

    pub async fn add_filter(&mut self, raw: &str) -> FetchOutcome {
        self.session.add_filter(raw);
        self.trigger().await
    }

    pub async fn remove_filter(&mut self, raw: &str) -> FetchOutcome {
        self.session.remove_filter(raw);
        self.trigger().await
    }

    pub async fn replace_filter(&mut self, old_raw: &str, new_raw: &str) -> FetchOutcome {
        self.session.replace_filter(old_raw, new_raw);
        self.trigger().await
    }

    pub async fn set_filters<S: AsRef<str>>(&mut self, raws: &[S]) -> FetchOutcome {
        self.session.set_filters(raws);
        self.trigger().await
    }

    /// History navigation: the location already matches `raws`.
    pub async fn restore_filters<S: AsRef<str>>(&mut self, raws: &[S]) -> FetchOutcome {
        self.session.restore_filters(raws);
        self.trigger().await
    }

    pub fn pause(&mut self) {
        self.session.status.pause();
    }

    pub fn resume(&mut self) {
        self.session.status.resume();
    }

    pub fn toggle_pause(&mut self) {
        self.session.status.toggle_pause();
    }

    pub fn stop(&mut self) {
        self.session.status.stop();
        self.throttle.cancel();
    }

    pub fn can_fetch(&self) -> bool {
        !self.session.status.is_paused() && !self.session.status.is_stopped()
    }

    /// Throttled entry point for anything that wants fresh data.
    pub async fn trigger(&mut self) -> FetchOutcome {
        if !self.can_fetch() {
            return FetchOutcome::Skipped;
        }
        match self.throttle.request(Instant::now()) {
            Decision::Fire => self.fetch().await,
            Decision::Deferred(at) => {
                debug!(?at, "fetch deferred by throttle");
                FetchOutcome::Skipped
            }
        }
    }

    pub fn trailing_deadline(&self) -> Option<Instant> {
        self.throttle.deadline()
    }

    /// Runs the deferred call collected by `trigger` once it is due.
    pub async fn fire_trailing(&mut self) -> FetchOutcome {
        if !self.throttle.take_trailing(Instant::now()) || !self.can_fetch() {
            return FetchOutcome::Skipped;
        }
        self.fetch().await
    }

    /// Refresh tick: fetches once the refresh interval elapsed since the
    /// last completed update, unless one is already running or we're paused.
    pub async fn fetch_if_idle(&mut self, now: DateTime<Utc>) -> FetchOutcome {
        if self.is_due(now) && !self.session.status.is_updating() {
            self.trigger().await
        } else {
            FetchOutcome::Skipped
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        let refresh = chrono::Duration::from_std(self.refresh).unwrap_or(chrono::Duration::MAX);
        match self.session.status.last_update_at() {
            Some(last) => last
                .checked_add_signed(refresh)
                .is_none_or(|next| now >= next),
            None => true,
        }
    }

    /// One request, bypassing the throttle.
    pub async fn fetch(&mut self) -> FetchOutcome {
        if !self.can_fetch() {
            return FetchOutcome::Skipped;
        }

        let previous = self.session.status.value();
        self.session.status.set_fetching();

        let request = self.options.request(self.session.filters.raws());
        debug!(filters = ?request.filters, "fetching alerts");

        let fetched = {
            let info = &mut self.session.info;
            self.transport
                .fetch_alerts(&request, &mut |attempt| info.set_is_retrying(attempt))
                .await
        };

        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(err) => return self.fail(format!("Can't connect to the API, last error was \"{err}\"")),
        };

        if fetched.opaque {
            warn!("backend reply looks redirected, a reload is needed");
            self.session.info.reload_needed = true;
        }
        self.session.info.clear_is_retrying();
        self.session.status.set_processing();

        if let Some(logger) = &self.logger {
            logger.log(fetched.body.clone());
        }

        let response: AlertsResponse = match serde_json::from_str(&fetched.body) {
            Ok(response) => response,
            Err(err) => return self.fail(format!("Can't connect to the API, last error was \"{err}\"")),
        };

        match self.session.parse_api_response(response) {
            ResponseOutcome::Applied => {
                if self.session.status.is_stopped() {
                    self.throttle.cancel();
                }
                FetchOutcome::Applied
            }
            ResponseOutcome::Stale => {
                self.session.status.revert_to(previous);
                FetchOutcome::Stale
            }
            ResponseOutcome::Failed(error) => FetchOutcome::Failed(error),
        }
    }

    fn fail(&mut self, error: String) -> FetchOutcome {
        warn!(%error, "alert fetch failed");
        self.session.handle_fetch_error(error.clone());
        FetchOutcome::Failed(error)
    }
}
