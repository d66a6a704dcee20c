//! Silence matchers: deriving them from alert groups, packing them into
//! Alertmanager payloads and unpacking existing silences.

pub mod form;
pub mod share;
pub mod submit;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::{
    Alert, AlertGroup, AlertState, ClusterMap, Operator, SilenceMatcher, SilencePayload,
};

pub use form::{ClusterRequest, SilenceDuration, SilenceForm, Stage};
pub use share::ShareLinkError;
pub use submit::{SubmitError, submit_silence};

// An alternative is a run of ASCII word characters, optionally with `\.` or
// `\-` escapes, e.g. `10\.0\.0\.1`.
static PARENTHESIZED_ALTERNATIVES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\(((?:[A-Za-z0-9_]|\\[.\-])+\|)+(?:[A-Za-z0-9_]|\\[.\-])+\)$").expect("valid regex")
});
static BARE_ALTERNATIVES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^((?:[A-Za-z0-9_]|\\[.\-])+\|)+(?:[A-Za-z0-9_]|\\[.\-])+$").expect("valid regex")
});

/// One value of a silence matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatcherValue {
    pub label: String,
    pub value: String,
    /// Typed in by the user rather than picked from known label values.
    /// Only affects rendering.
    pub was_created: bool,
}

impl MatcherValue {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            label: value.clone(),
            value,
            was_created: false,
        }
    }

    pub fn created(value: impl Into<String>) -> Self {
        Self {
            was_created: true,
            ..Self::new(value)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matcher {
    pub id: Uuid,
    pub name: String,
    pub values: Vec<MatcherValue>,
    pub is_regex: bool,
    pub is_equal: bool,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new_empty()
    }
}

impl Matcher {
    pub fn new_empty() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: String::new(),
            values: Vec::new(),
            is_regex: false,
            is_equal: true,
        }
    }

    /// Equality matcher with a single value.
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: vec![MatcherValue::new(value)],
            ..Self::new_empty()
        }
    }

    /// Replaces the values, dropping repeats. More than one value makes the
    /// matcher a regex; going back down to a single value clears the flag
    /// again.
    pub fn set_values(&mut self, values: Vec<MatcherValue>) {
        let was_multi = self.values.len() > 1;

        let mut seen = BTreeSet::new();
        self.values = values
            .into_iter()
            .filter(|value| seen.insert(value.value.clone()))
            .collect();

        if self.values.len() > 1 {
            self.is_regex = true;
        } else if was_multi {
            self.is_regex = false;
        }
    }

    pub fn operator(&self) -> Operator {
        match (self.is_regex, self.is_equal) {
            (true, true) => Operator::Regex,
            (true, false) => Operator::NegativeRegex,
            (false, true) => Operator::Equal,
            (false, false) => Operator::NotEqual,
        }
    }

    /// Value as Alertmanager expects it: bare for one value, `(a|b)` for
    /// several.
    pub fn packed_value(&self) -> String {
        match self.values.as_slice() {
            [] => String::new(),
            [single] => single.value.clone(),
            many => {
                let joined: Vec<&str> = many.iter().map(|v| v.value.as_str()).collect();
                format!("({})", joined.join("|"))
            }
        }
    }

    /// Empty name, no values or an empty value.
    pub fn is_incomplete(&self) -> bool {
        self.name.is_empty()
            || self.values.is_empty()
            || self.values.iter().any(|value| value.value.is_empty())
    }

    fn to_silence_matcher(&self) -> SilenceMatcher {
        SilenceMatcher {
            name: self.name.clone(),
            value: self.packed_value(),
            is_regex: self.is_regex,
            is_equal: self.is_equal,
        }
    }
}

/// Builds matchers that would silence `group`.
///
/// Group-level labels always become equality matchers. Labels present on
/// every alert of the working subset (`alerts`, or all group alerts) become
/// equality matchers when all alerts agree on the value and regex matchers
/// over the sorted values otherwise.
pub fn derive_matchers(
    group: &AlertGroup,
    strip_labels: &[String],
    alerts: Option<&[Alert]>,
    only_active: bool,
) -> Vec<Matcher> {
    let stripped = |key: &str| strip_labels.iter().any(|label| label == key);

    let mut group_labels = group.labels.clone();
    group_labels.extend(
        group
            .shared
            .labels
            .iter()
            .map(|(key, value)| (key.clone(), value.clone())),
    );

    let mut matchers: Vec<Matcher> = group_labels
        .iter()
        .filter(|(key, _)| !stripped(key.as_str()))
        .map(|(key, value)| Matcher::equal(key, value))
        .collect();

    let working: Vec<&Alert> = alerts
        .unwrap_or(group.alerts.as_slice())
        .iter()
        .filter(|alert| !only_active || alert.state == AlertState::Active)
        .collect();

    let mut shared_keys: Option<BTreeSet<&str>> = None;
    for alert in &working {
        let keys: BTreeSet<&str> = alert.labels.keys().map(String::as_str).collect();
        shared_keys = Some(match shared_keys {
            Some(current) => current.intersection(&keys).copied().collect(),
            None => keys,
        });
    }
    let shared_keys = shared_keys.unwrap_or_default();

    let mut values: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for alert in &working {
        for (key, value) in &alert.labels {
            if shared_keys.contains(key.as_str())
                && !group_labels.contains_key(key)
                && !stripped(key.as_str())
            {
                values.entry(key.as_str()).or_default().insert(value.as_str());
            }
        }
    }

    matchers.extend(values.into_iter().map(|(key, values)| {
        let mut matcher = Matcher {
            name: key.to_string(),
            ..Matcher::new_empty()
        };
        matcher.set_values(values.into_iter().map(MatcherValue::new).collect());
        matcher
    }));

    matchers
}

/// Drops sub-second precision and renders as `YYYY-MM-DDTHH:MM:SS.000Z`.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.with_nanosecond(0)
        .unwrap_or(at)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn alertmanager_payload(
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    matchers: &[Matcher],
    author: &str,
    comment: &str,
    silence_id: Option<&str>,
) -> SilencePayload {
    SilencePayload {
        id: silence_id.map(ToOwned::to_owned),
        matchers: matchers.iter().map(Matcher::to_silence_matcher).collect(),
        starts_at: format_timestamp(starts_at),
        ends_at: format_timestamp(ends_at),
        created_by: author.to_string(),
        comment: comment.to_string(),
    }
}

/// Splits a packed regex value back into its alternatives when that can be
/// done without changing what it matches. Anything else is kept as a single
/// user-created value.
pub fn unpack_regex_matcher_values(is_regex: bool, raw: &str) -> Vec<MatcherValue> {
    if is_regex {
        if PARENTHESIZED_ALTERNATIVES.is_match(raw) {
            return split_alternatives(&raw[1..raw.len() - 1]);
        }
        if BARE_ALTERNATIVES.is_match(raw) {
            return split_alternatives(raw);
        }
    }
    vec![MatcherValue::created(raw)]
}

fn split_alternatives(raw: &str) -> Vec<MatcherValue> {
    raw.split('|').map(MatcherValue::new).collect()
}

/// An Alertmanager cluster the form can target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertmanagerOption {
    pub label: String,
    pub value: Vec<String>,
}

impl AlertmanagerOption {
    pub fn from_clusters(clusters: &ClusterMap) -> Vec<Self> {
        clusters
            .iter()
            .map(|(cluster, members)| {
                let label = match members.as_slice() {
                    [single] => single.clone(),
                    _ => format!("Cluster: {cluster}"),
                };
                Self {
                    label,
                    value: members.clone(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn alert(labels: &[(&str, &str)], state: AlertState) -> Alert {
        Alert {
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            state,
            ..Default::default()
        }
    }

    fn mock_group(alerts: Vec<Alert>) -> AlertGroup {
        serde_json::from_value::<AlertGroup>(json!({
            "id": "group1",
            "receiver": "by-name",
            "labels": { "alertname": "FakeAlert" },
            "shared": { "labels": { "job": "mock" } }
        }))
        .map(|mut group| {
            group.alerts = alerts;
            group
        })
        .expect("group")
    }

    fn names(matchers: &[Matcher]) -> Vec<&str> {
        matchers.iter().map(|m| m.name.as_str()).collect()
    }

    fn values(matcher: &Matcher) -> Vec<&str> {
        matcher.values.iter().map(|v| v.value.as_str()).collect()
    }

    fn three_alert_group() -> AlertGroup {
        mock_group(vec![
            alert(&[("instance", "prod1"), ("cluster", "prod")], AlertState::Active),
            alert(&[("instance", "prod2"), ("cluster", "prod")], AlertState::Active),
            alert(&[("instance", "dev1"), ("cluster", "dev")], AlertState::Suppressed),
        ])
    }

    #[test]
    fn derive_builds_regex_for_differing_values() {
        let matchers = derive_matchers(&three_alert_group(), &[], None, false);

        assert_eq!(names(&matchers), vec!["alertname", "job", "cluster", "instance"]);
        assert!(!matchers[0].is_regex);
        assert_eq!(values(&matchers[0]), vec!["FakeAlert"]);
        assert_eq!(values(&matchers[1]), vec!["mock"]);

        assert!(matchers[2].is_regex);
        assert_eq!(values(&matchers[2]), vec!["dev", "prod"]);
        assert!(matchers[3].is_regex);
        assert_eq!(values(&matchers[3]), vec!["dev1", "prod1", "prod2"]);
    }

    #[test]
    fn derive_from_single_alert_only_uses_equality() {
        let group = three_alert_group();
        let subset = vec![group.alerts[0].clone()];
        let matchers = derive_matchers(&group, &[], Some(&subset), false);

        assert_eq!(matchers.len(), 4);
        for matcher in &matchers {
            assert!(!matcher.is_regex, "{} should be an equality matcher", matcher.name);
            assert_eq!(matcher.values.len(), 1);
            assert_eq!(matcher.operator(), Operator::Equal);
        }
    }

    #[test]
    fn derive_honours_strip_labels_and_only_active() {
        let strip = vec!["job".to_string(), "instance".to_string()];
        let matchers = derive_matchers(&three_alert_group(), &strip, None, true);

        assert_eq!(names(&matchers), vec!["alertname", "cluster"]);
        assert!(!matchers[1].is_regex);
        assert_eq!(values(&matchers[1]), vec!["prod"]);
    }

    #[test]
    fn derive_only_keeps_keys_present_everywhere() {
        let group = mock_group(vec![
            alert(&[("instance", "a"), ("region", "AF")], AlertState::Active),
            alert(&[("instance", "b")], AlertState::Active),
        ]);
        let matchers = derive_matchers(&group, &[], None, false);
        assert_eq!(names(&matchers), vec!["alertname", "job", "instance"]);
    }

    #[test]
    fn alert_without_labels_empties_intersection() {
        let group = mock_group(vec![
            alert(&[("instance", "a")], AlertState::Active),
            alert(&[], AlertState::Active),
        ]);
        let matchers = derive_matchers(&group, &[], None, false);
        assert_eq!(names(&matchers), vec!["alertname", "job"]);
    }

    #[test]
    fn set_values_toggles_regex() {
        let mut matcher = Matcher::equal("job", "a");
        matcher.set_values(vec![MatcherValue::new("a"), MatcherValue::new("b"), MatcherValue::new("a")]);
        assert!(matcher.is_regex);
        assert_eq!(values(&matcher), vec!["a", "b"]);

        matcher.set_values(vec![MatcherValue::new("a")]);
        assert!(!matcher.is_regex);

        let mut regex = Matcher {
            is_regex: true,
            ..Matcher::equal("job", "a.+")
        };
        regex.set_values(vec![MatcherValue::created("b.+")]);
        assert!(regex.is_regex, "single regex value stays a regex");
    }

    #[test]
    fn operator_follows_flags() {
        let mut matcher = Matcher::equal("a", "b");
        assert_eq!(matcher.operator(), Operator::Equal);
        matcher.is_equal = false;
        assert_eq!(matcher.operator(), Operator::NotEqual);
        matcher.is_regex = true;
        assert_eq!(matcher.operator(), Operator::NegativeRegex);
        matcher.is_equal = true;
        assert_eq!(matcher.operator(), Operator::Regex);
    }

    #[test]
    fn payload_packs_values_and_truncates_time() {
        let starts = Utc
            .with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
            .single()
            .expect("date")
            + chrono::Duration::milliseconds(1500);
        let ends = starts + chrono::Duration::hours(1);

        let mut multi = Matcher::equal("instance", "a");
        multi.set_values(vec![MatcherValue::new("a"), MatcherValue::new("b")]);
        let empty = Matcher {
            name: "job".into(),
            ..Matcher::new_empty()
        };
        let matchers = vec![Matcher::equal("alertname", "Fake"), multi, empty];

        let payload = alertmanager_payload(starts, ends, &matchers, "me", "fix", None);
        assert_eq!(payload.id, None);
        assert_eq!(payload.starts_at, "2000-01-01T00:00:01.000Z");
        assert_eq!(payload.ends_at, "2000-01-01T01:00:01.000Z");
        assert_eq!(payload.matchers[0].value, "Fake");
        assert_eq!(payload.matchers[1].value, "(a|b)");
        assert!(payload.matchers[1].is_regex);
        assert_eq!(payload.matchers[2].value, "");

        let edit = alertmanager_payload(starts, ends, &matchers, "me", "fix", Some("abc"));
        assert_eq!(edit.id.as_deref(), Some("abc"));
    }

    #[test]
    fn unpack_table() {
        let cases: &[(bool, &str, &[&str])] = &[
            (true, "(bar1|bar2|bar3)", &["bar1", "bar2", "bar3"]),
            (true, "bar1|bar2|bar3", &["bar1", "bar2", "bar3"]),
            (true, "(a|b|c)", &["a", "b", "c"]),
            (
                true,
                r"10\.0\.0\.1|10\.0\.0\.2",
                &[r"10\.0\.0\.1", r"10\.0\.0\.2"],
            ),
            (true, r"(us\-east|us\-west)", &[r"us\-east", r"us\-west"]),
        ];
        for (is_regex, raw, expected) in cases {
            let unpacked = unpack_regex_matcher_values(*is_regex, raw);
            let got: Vec<&str> = unpacked.iter().map(|v| v.value.as_str()).collect();
            assert_eq!(got, expected.to_vec(), "unpacking {raw}");
            assert!(unpacked.iter().all(|v| !v.was_created), "{raw}");
        }

        let opaque: &[(bool, &str)] = &[
            (false, "(bar1|bar2|bar3)"),
            (true, "bar1|bar2|bar3)"),
            (true, "(bar1|bar2|bar3"),
            (true, "(.+|bar2|bar3)"),
            (true, "bar1|bar?|bar3)"),
            (true, "server(0|1)"),
            (true, "(café|thé)"),
            (true, "naïve|plain"),
            (true, "single"),
            (true, ""),
        ];
        for (is_regex, raw) in opaque {
            let unpacked = unpack_regex_matcher_values(*is_regex, raw);
            assert_eq!(unpacked.len(), 1, "{raw} should stay packed");
            assert_eq!(unpacked[0].value, *raw);
            assert!(unpacked[0].was_created);
        }
    }

    #[test]
    fn unpack_then_pack_preserves_value() {
        for raw in ["(a|b|c)", r"(10\.0\.0\.1|10\.0\.0\.2)"] {
            let matcher = Matcher {
                name: "x".into(),
                values: unpack_regex_matcher_values(true, raw),
                is_regex: true,
                ..Matcher::new_empty()
            };
            assert_eq!(matcher.packed_value(), raw);
        }
    }

    #[test]
    fn options_from_clusters() {
        let clusters: ClusterMap = [
            ("ha".to_string(), vec!["am1".to_string(), "am2".to_string()]),
            ("solo".to_string(), vec!["am3".to_string()]),
        ]
        .into_iter()
        .collect();

        let options = AlertmanagerOption::from_clusters(&clusters);
        assert_eq!(
            options,
            vec![
                AlertmanagerOption {
                    label: "Cluster: ha".into(),
                    value: vec!["am1".into(), "am2".into()],
                },
                AlertmanagerOption {
                    label: "am3".into(),
                    value: vec!["am3".into()],
                },
            ]
        );
    }
}
