use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Timelike, Utc};
use tracing::warn;
use uuid::Uuid;

use super::{
    AlertmanagerOption, Matcher, MatcherValue, alertmanager_payload, derive_matchers,
    unpack_regex_matcher_values,
};
use crate::{
    filters::Filter,
    protocol::{
        Alert, AlertGroup, AlertmanagerUpstream, Authentication, ClusterMap, Operator, Silence,
        SilencePayload,
    },
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Stage {
    #[default]
    Form,
    Preview,
    Submit,
}

/// Silence length split the way it's shown to users.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SilenceDuration {
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
}

/// Submission progress for one targeted cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRequest {
    pub cluster: String,
    pub members: Vec<String>,
    pub is_done: bool,
    pub silence_id: Option<String>,
    pub silence_link: Option<String>,
    pub error: Option<String>,
}

impl ClusterRequest {
    pub fn new(cluster: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            cluster: cluster.into(),
            members,
            is_done: false,
            silence_id: None,
            silence_link: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SilenceForm {
    pub stage: Stage,
    pub was_validated: bool,
    /// Set when editing an existing silence.
    pub silence_id: Option<String>,
    pub alertmanagers: Vec<AlertmanagerOption>,
    pub matchers: Vec<Matcher>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub comment: String,
    pub author: String,
    pub requests_by_cluster: BTreeMap<String, ClusterRequest>,
    /// Fill matchers from the active filters next time the form opens.
    pub autofill_matchers: bool,
    /// Reset times next time the form opens.
    pub reset_inputs: bool,
}

impl Default for SilenceForm {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl SilenceForm {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            stage: Stage::Form,
            was_validated: false,
            silence_id: None,
            alertmanagers: Vec::new(),
            matchers: Vec::new(),
            starts_at: now,
            ends_at: now + Duration::hours(1),
            comment: String::new(),
            author: String::new(),
            requests_by_cluster: BTreeMap::new(),
            autofill_matchers: true,
            reset_inputs: true,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.alertmanagers.is_empty()
            && !self.matchers.is_empty()
            && !self.matchers.iter().any(Matcher::is_incomplete)
            && !self.comment.is_empty()
            && !self.author.is_empty()
    }

    /// Prepares the form for display: resets or re-validates times, fills
    /// matchers from `filters` when autofill is on and picks an author.
    pub fn open(
        &mut self,
        now: DateTime<Utc>,
        filters: &[Filter],
        authentication: &Authentication,
        default_author: &str,
    ) {
        if self.silence_id.is_none() && self.reset_inputs {
            self.reset_start_end(now);
        } else {
            self.verify_start_end(now);
        }

        self.requests_by_cluster.clear();

        if self.autofill_matchers {
            self.matchers.clear();
            self.autofill_from_filters(filters);
        }
        if self.matchers.is_empty() {
            self.add_empty_matcher();
        }

        self.autofill_matchers = false;
        self.reset_inputs = true;

        if self.author.is_empty() {
            self.author = default_author.to_string();
        }
        if authentication.enabled {
            self.author = authentication.username.clone();
        }
    }

    /// Turns label filters into matchers. Regex filters are unanchored on
    /// the backend so their value gets wrapped in `.*`.
    pub fn autofill_from_filters(&mut self, filters: &[Filter]) {
        for filter in filters.iter().filter(|f| !f.name.starts_with('@')) {
            let mut matcher = Matcher {
                name: filter.name.clone(),
                ..Matcher::new_empty()
            };
            match filter.matcher {
                Some(Operator::Equal) | Some(Operator::NotEqual) => {
                    matcher.values = vec![MatcherValue::new(filter.value.as_str())];
                    matcher.is_equal = filter.matcher == Some(Operator::Equal);
                }
                Some(Operator::Regex) | Some(Operator::NegativeRegex) => {
                    matcher.values = vec![MatcherValue::new(format!(".*{}.*", filter.value))];
                    matcher.is_regex = true;
                    matcher.is_equal = filter.matcher == Some(Operator::Regex);
                }
                _ => continue,
            }
            self.matchers.push(matcher);
        }
    }

    /// Validates and, when valid, moves on to the preview stage. Submission
    /// tracking is reset for every selected cluster either way.
    pub fn submit(&mut self) -> bool {
        self.requests_by_cluster = self
            .alertmanagers
            .iter()
            .map(|am| {
                (
                    am.label.clone(),
                    ClusterRequest::new(am.label.as_str(), am.value.clone()),
                )
            })
            .collect();

        let valid = self.is_valid();
        if valid {
            self.stage = Stage::Preview;
        }
        self.was_validated = true;
        valid
    }

    pub fn set_stage(&mut self, stage: Stage) {
        self.stage = stage;
    }

    pub fn reset_progress(&mut self) {
        self.stage = Stage::Form;
        self.was_validated = false;
    }

    pub fn reset_start_end(&mut self, now: DateTime<Utc>) {
        self.starts_at = now;
        self.ends_at = now + Duration::hours(1);
    }

    pub fn add_empty_matcher(&mut self) {
        self.matchers.push(Matcher::new_empty());
    }

    pub fn add_matcher(&mut self, matcher: Matcher) {
        self.matchers.push(matcher);
    }

    /// The last remaining matcher can't be deleted.
    pub fn delete_matcher(&mut self, id: Uuid) {
        if self.matchers.len() > 1 {
            self.matchers.retain(|matcher| matcher.id != id);
        }
    }

    pub fn set_matchers(&mut self, matchers: Vec<Matcher>) {
        self.matchers = matchers;
    }

    pub fn fill_from_group(
        &mut self,
        group: &AlertGroup,
        strip_labels: &[String],
        alertmanagers: Vec<AlertmanagerOption>,
        alerts: Option<&[Alert]>,
    ) {
        self.alertmanagers = alertmanagers;
        self.matchers = derive_matchers(group, strip_labels, alerts, false);
        // group silences are always new silences
        self.silence_id = None;
        self.autofill_matchers = false;
        self.reset_inputs = false;
    }

    /// Loads an existing silence for editing.
    pub fn fill_from_silence(&mut self, alertmanager: &AlertmanagerUpstream, silence: &Silence) {
        self.silence_id = (!silence.id.is_empty()).then(|| silence.id.clone());

        let clusters: ClusterMap = BTreeMap::from([(
            alertmanager.cluster.clone(),
            alertmanager.cluster_members.clone(),
        )]);
        self.alertmanagers = AlertmanagerOption::from_clusters(&clusters);

        self.matchers = silence
            .matchers
            .iter()
            .map(|m| Matcher {
                name: m.name.clone(),
                values: unpack_regex_matcher_values(m.is_regex, &m.value),
                is_regex: m.is_regex,
                is_equal: m.is_equal,
                ..Matcher::new_empty()
            })
            .collect();

        match parse_time(&silence.starts_at) {
            Some(at) => self.starts_at = at,
            None => warn!(value = %silence.starts_at, id = %silence.id, "invalid silence start"),
        }
        match parse_time(&silence.ends_at) {
            Some(at) => self.ends_at = at,
            None => warn!(value = %silence.ends_at, id = %silence.id, "invalid silence end"),
        }
        self.comment = silence.comment.clone();
        self.author = silence.created_by.clone();

        self.autofill_matchers = false;
    }

    /// Keeps the start out of the past (to the minute) and the end at least
    /// a minute after the start.
    pub fn verify_start_end(&mut self, now: DateTime<Utc>) {
        let this_minute = now
            .with_second(0)
            .and_then(|at| at.with_nanosecond(0))
            .unwrap_or(now);
        if self.starts_at < this_minute {
            self.starts_at = this_minute;
        }
        if self.ends_at <= self.starts_at {
            if let Some(at) = shift(self.starts_at, Some(1)) {
                self.ends_at = at;
            }
        }
    }

    /// Edits that would push a time out of range are ignored.
    pub fn inc_start(&mut self, minutes: i64) {
        if let Some(at) = shift(self.starts_at, Some(minutes)) {
            self.starts_at = at;
        }
        self.verify_start_end(Utc::now());
    }

    pub fn dec_start(&mut self, minutes: i64) {
        if let Some(at) = shift(self.starts_at, minutes.checked_neg()) {
            self.starts_at = at;
        }
        self.verify_start_end(Utc::now());
    }

    pub fn inc_end(&mut self, minutes: i64) {
        if let Some(at) = shift(self.ends_at, Some(minutes)) {
            self.ends_at = at;
        }
        self.verify_start_end(Utc::now());
    }

    pub fn dec_end(&mut self, minutes: i64) {
        if let Some(at) = shift(self.ends_at, minutes.checked_neg()) {
            self.ends_at = at;
        }
        self.verify_start_end(Utc::now());
    }

    pub fn duration(&self) -> SilenceDuration {
        let delta = self.ends_at - self.starts_at;
        SilenceDuration {
            days: delta.num_days(),
            hours: delta.num_hours() % 24,
            minutes: delta.num_minutes() % 60,
        }
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.ends_at - self.starts_at).num_minutes()
    }

    pub fn to_alertmanager_payload(&self) -> SilencePayload {
        alertmanager_payload(
            self.starts_at,
            self.ends_at,
            &self.matchers,
            &self.author,
            &self.comment,
            self.silence_id.as_deref(),
        )
    }
}

/// Moves `at` by `minutes`, keeping a minute of headroom so the end can
/// always be placed after the start.
fn shift(at: DateTime<Utc>, minutes: Option<i64>) -> Option<DateTime<Utc>> {
    let moved = at.checked_add_signed(Duration::try_minutes(minutes?)?)?;
    moved.checked_add_signed(Duration::minutes(1))?;
    Some(moved)
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}
