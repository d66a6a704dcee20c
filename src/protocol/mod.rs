use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

pub type Labels = BTreeMap<String, String>;

/// Query operators understood by the backend filter parser.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal,
    NotEqual,
    Regex,
    NegativeRegex,
    GreaterThan,
    LessThan,
    Unknown(String),
}

impl Operator {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::Regex => "=~",
            Self::NegativeRegex => "!~",
            Self::GreaterThan => ">",
            Self::LessThan => "<",
            Self::Unknown(other) => other.as_str(),
        }
    }

    /// Empty strings map to `None`, the backend sends them for filters it
    /// could not parse.
    pub fn parse(input: &str) -> Option<Self> {
        let op = match input {
            "" => return None,
            "=" => Self::Equal,
            "!=" => Self::NotEqual,
            "=~" => Self::Regex,
            "!~" => Self::NegativeRegex,
            ">" => Self::GreaterThan,
            "<" => Self::LessThan,
            other => Self::Unknown(other.to_owned()),
        };
        Some(op)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Operator {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

fn deserialize_operator<'de, D>(deserializer: D) -> Result<Option<Operator>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let input = Option::<String>::deserialize(deserializer)?;
    Ok(input.as_deref().and_then(Operator::parse))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlertState {
    #[default]
    Unprocessed,
    Active,
    Suppressed,
}

impl AlertState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unprocessed => "unprocessed",
            Self::Active => "active",
            Self::Suppressed => "suppressed",
        }
    }
}

impl Serialize for AlertState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AlertState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let input = String::deserialize(deserializer)?;
        let state = match input.as_str() {
            "active" => Self::Active,
            "suppressed" => Self::Suppressed,
            // older Alertmanager releases report nothing useful here
            _ => Self::Unprocessed,
        };

        Ok(state)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Annotation {
    pub name: String,
    pub value: String,
    pub visible: bool,
    pub is_link: bool,
    pub is_action: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertmanagerInstanceState {
    pub fingerprint: String,
    pub name: String,
    pub cluster: String,
    pub state: AlertState,
    pub starts_at: String,
    pub source: String,
    pub silenced_by: Vec<String>,
    pub inhibited_by: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Alert {
    pub id: String,
    pub annotations: Vec<Annotation>,
    pub labels: Labels,
    pub starts_at: String,
    pub state: AlertState,
    pub alertmanager: Vec<AlertmanagerInstanceState>,
    pub receiver: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateCount {
    pub active: u64,
    pub suppressed: u64,
    pub unprocessed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedGroupData {
    pub annotations: Vec<Annotation>,
    pub labels: Labels,
    pub silences: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertGroup {
    pub id: String,
    pub receiver: String,
    pub labels: Labels,
    pub alerts: Vec<Alert>,
    pub alertmanager_count: BTreeMap<String, u64>,
    pub state_count: StateCount,
    pub shared: SharedGroupData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Grid {
    pub label_name: String,
    pub label_value: String,
    pub alert_groups: Vec<AlertGroup>,
    pub state_count: StateCount,
}

/// One matcher as Alertmanager stores it, with alternatives already packed
/// into a single value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SilenceMatcher {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub is_regex: bool,
    #[serde(default = "default_is_equal")]
    pub is_equal: bool,
}

fn default_is_equal() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Silence {
    pub id: String,
    pub matchers: Vec<SilenceMatcher>,
    pub starts_at: String,
    pub ends_at: String,
    pub created_at: String,
    pub created_by: String,
    pub comment: String,
    #[serde(rename = "ticketID")]
    pub ticket_id: String,
    #[serde(rename = "ticketURL")]
    pub ticket_url: String,
}

/// Body of `POST {uri}/api/v1/silences`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SilencePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub matchers: Vec<SilenceMatcher>,
    pub starts_at: String,
    pub ends_at: String,
    pub created_by: String,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SilenceCreated {
    pub silence_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SilenceResponse {
    Success { data: SilenceCreated },
    Error { error: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CorsCredentials {
    Omit,
    SameOrigin,
    #[default]
    Include,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertmanagerUpstream {
    pub name: String,
    pub cluster: String,
    pub uri: String,
    #[serde(rename = "publicURI")]
    pub public_uri: String,
    pub readonly: bool,
    pub headers: BTreeMap<String, String>,
    pub cors_credentials: CorsCredentials,
    pub error: String,
    pub version: String,
    pub cluster_members: Vec<String>,
}

/// Server-side view of a single query filter, keyed back to the client by
/// `text`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiFilter {
    pub text: String,
    pub name: String,
    #[serde(deserialize_with = "deserialize_operator")]
    pub matcher: Option<Operator>,
    pub value: String,
    pub hits: u64,
    pub is_valid: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamCounters {
    pub total: u64,
    pub healthy: u64,
    pub failed: u64,
}

pub type ClusterMap = BTreeMap<String, Vec<String>>;
pub type SilenceMap = BTreeMap<String, BTreeMap<String, Silence>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Upstreams {
    pub counters: UpstreamCounters,
    pub instances: Vec<AlertmanagerUpstream>,
    pub clusters: ClusterMap,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Authentication {
    pub enabled: bool,
    pub username: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelColor {
    pub brightness: i64,
    pub background: String,
}

pub type Colors = BTreeMap<String, BTreeMap<String, LabelColor>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelCounterValue {
    pub value: String,
    pub raw: String,
    pub hits: u64,
    pub percent: f64,
    pub offset: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelCounter {
    pub name: String,
    pub values: Vec<LabelCounterValue>,
    pub hits: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSorting {
    pub order: String,
    pub reverse: bool,
    pub label: String,
}

impl Default for GridSorting {
    fn default() -> Self {
        Self {
            order: "startsAt".to_string(),
            reverse: false,
            label: "alertname".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Sorting {
    pub grid: GridSorting,
    pub value_mapping: BTreeMap<String, BTreeMap<String, i64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StripSettings {
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SilenceFormSettings {
    pub strip: StripSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertAcknowledgement {
    pub enabled: bool,
    pub duration_seconds: u64,
    pub author: String,
    pub comment: String,
}

impl Default for AlertAcknowledgement {
    fn default() -> Self {
        Self {
            enabled: false,
            duration_seconds: 900,
            author: "alertdeck / author missing".to_string(),
            comment: "ACK! This alert was acknowledged using alertdeck".to_string(),
        }
    }
}

/// Settings exported by the backend on every response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub static_color_labels: Vec<String>,
    pub annotations_default_hidden: bool,
    pub annotations_hidden: Vec<String>,
    pub annotations_visible: Vec<String>,
    #[serde(rename = "annotationsEnableHTML")]
    pub annotations_enable_html: bool,
    pub sorting: Sorting,
    pub silence_form: SilenceFormSettings,
    pub alert_acknowledgement: AlertAcknowledgement,
    pub history_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            static_color_labels: Vec::new(),
            annotations_default_hidden: false,
            annotations_hidden: Vec::new(),
            annotations_visible: Vec::new(),
            annotations_enable_html: false,
            sorting: Sorting::default(),
            silence_form: SilenceFormSettings::default(),
            alert_acknowledgement: AlertAcknowledgement::default(),
            history_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertsResponse {
    pub status: String,
    pub error: String,
    pub timestamp: String,
    pub version: String,
    pub upstreams: Upstreams,
    pub silences: SilenceMap,
    pub grids: Vec<Grid>,
    pub total_alerts: u64,
    pub colors: Colors,
    pub filters: Vec<ApiFilter>,
    pub counters: Vec<LabelCounter>,
    pub settings: Settings,
    pub authentication: Authentication,
    pub receivers: Vec<String>,
}

/// Body of `POST {backend}/alerts.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertsRequest {
    pub filters: Vec<String>,
    pub grid_label: String,
    pub grid_sort_reverse: bool,
    pub sort_order: String,
    pub sort_label: String,
    pub sort_reverse: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_response() {
        let raw = r#"
        {
            "status": "success",
            "error": "",
            "version": "v0.88",
            "totalAlerts": 3,
            "filters": [
                {
                    "text": "cluster=prod",
                    "name": "cluster",
                    "matcher": "=",
                    "value": "prod",
                    "hits": 3,
                    "isValid": true
                },
                { "text": "@bogus", "matcher": "", "isValid": false }
            ],
            "upstreams": {
                "counters": { "total": 1, "healthy": 1, "failed": 0 },
                "instances": [
                    {
                        "name": "am1",
                        "cluster": "ha",
                        "uri": "http://am1:9093",
                        "publicURI": "https://am1.example.com",
                        "readonly": false,
                        "corsCredentials": "same-origin",
                        "clusterMembers": ["am1"]
                    }
                ],
                "clusters": { "ha": ["am1"] }
            },
            "settings": {
                "silenceForm": { "strip": { "labels": ["job"] } }
            },
            "authentication": { "enabled": true, "username": "me" }
        }
        "#;

        let response: AlertsResponse = serde_json::from_str(raw).expect("should parse");

        assert_eq!(response.version, "v0.88");
        assert_eq!(response.total_alerts, 3);
        assert_eq!(response.filters.len(), 2);
        assert_eq!(response.filters[0].matcher, Some(Operator::Equal));
        assert_eq!(response.filters[1].matcher, None);
        assert!(!response.filters[1].is_valid);

        let upstream = &response.upstreams.instances[0];
        assert_eq!(upstream.public_uri, "https://am1.example.com");
        assert_eq!(upstream.cors_credentials, CorsCredentials::SameOrigin);

        assert_eq!(response.settings.silence_form.strip.labels, vec!["job"]);
        assert!(
            response.settings.history_enabled,
            "missing settings keys should fall back to defaults"
        );
        assert_eq!(response.settings.sorting.grid.label, "alertname");
        assert!(response.authentication.enabled);
    }

    #[test]
    fn preserves_unknown_operators() {
        let filter: ApiFilter =
            serde_json::from_str(r#"{ "text": "foo~=bar", "matcher": "~=" }"#).expect("parse");

        match filter.matcher {
            Some(Operator::Unknown(op)) => assert_eq!(op, "~="),
            other => panic!("unexpected operator: {:?}", other),
        }
    }

    #[test]
    fn silence_payload_omits_missing_id() {
        let payload = SilencePayload {
            id: None,
            matchers: vec![SilenceMatcher {
                name: "job".into(),
                value: "node".into(),
                is_regex: false,
                is_equal: true,
            }],
            starts_at: "2000-01-01T00:00:00.000Z".into(),
            ends_at: "2000-01-01T01:00:00.000Z".into(),
            created_by: "me@example.com".into(),
            comment: "maintenance".into(),
        };

        let value = serde_json::to_value(&payload).expect("serialize");
        assert!(value.get("id").is_none());
        assert_eq!(value["matchers"][0]["isRegex"], false);
        assert_eq!(value["createdBy"], "me@example.com");
    }

    #[test]
    fn parses_silence_api_responses() {
        let ok: SilenceResponse =
            serde_json::from_str(r#"{"status":"success","data":{"silenceId":"abc"}}"#)
                .expect("parse success");
        assert_eq!(
            ok,
            SilenceResponse::Success {
                data: SilenceCreated {
                    silence_id: "abc".into()
                }
            }
        );

        let err: SilenceResponse =
            serde_json::from_str(r#"{"status":"error","error":"bad matcher"}"#)
                .expect("parse error");
        assert_eq!(
            err,
            SilenceResponse::Error {
                error: "bad matcher".into()
            }
        );
    }

    #[test]
    fn unknown_alert_state_is_unprocessed() {
        let alert: Alert =
            serde_json::from_str(r#"{ "state": "pending", "labels": {"a": "b"} }"#).expect("parse");
        assert_eq!(alert.state, AlertState::Unprocessed);
        assert_eq!(alert.labels.get("a").map(String::as_str), Some("b"));
    }
}
