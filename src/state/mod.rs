use std::{collections::BTreeSet, path::PathBuf, sync::Arc};

use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::mpsc};
use tracing::{info, warn};

use crate::{
    fetch::Status,
    filters::FilterSet,
    protocol::{
        AlertmanagerUpstream, AlertsResponse, Authentication, ClusterMap, Colors, Grid,
        LabelColor, LabelCounter, Settings, SilenceMap, Upstreams,
    },
    query::Location,
};

/// Assumed for upstreams that don't report a version.
const FALLBACK_VERSION: &str = "0.22.0";

/// Everything the backend sends that isn't about filters or the session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertData {
    pub colors: Colors,
    pub counters: Vec<LabelCounter>,
    pub grids: Vec<Grid>,
    pub silences: SilenceMap,
    pub upstreams: Upstreams,
    pub receivers: Vec<String>,
}

impl AlertData {
    /// Extra spacing the grid layout needs when grids carry a label.
    pub fn grid_padding(&self) -> u32 {
        if self.grids.iter().any(|grid| !grid.label_name.is_empty()) {
            5
        } else {
            0
        }
    }

    pub fn alertmanager_by_name(&self, name: &str) -> Option<&AlertmanagerUpstream> {
        self.upstreams.instances.iter().find(|am| am.name == name)
    }

    pub fn is_read_only_alertmanager(&self, name: &str) -> bool {
        self.upstreams
            .instances
            .iter()
            .any(|am| am.readonly && am.name == name)
    }

    pub fn read_only_alertmanagers(&self) -> Vec<&AlertmanagerUpstream> {
        self.upstreams
            .instances
            .iter()
            .filter(|am| am.readonly)
            .collect()
    }

    /// Writable instances, with read-only peers removed from their member
    /// lists.
    pub fn read_write_alertmanagers(&self) -> Vec<AlertmanagerUpstream> {
        self.upstreams
            .instances
            .iter()
            .filter(|am| !am.readonly)
            .map(|am| {
                let mut am = am.clone();
                am.cluster_members
                    .retain(|member| !self.is_read_only_alertmanager(member));
                am
            })
            .collect()
    }

    pub fn clusters_without_read_only(&self) -> ClusterMap {
        self.upstreams
            .clusters
            .iter()
            .filter_map(|(cluster, members)| {
                let members: Vec<String> = members
                    .iter()
                    .filter(|member| !self.is_read_only_alertmanager(member))
                    .cloned()
                    .collect();
                (!members.is_empty()).then(|| (cluster.clone(), members))
            })
            .collect()
    }

    pub fn cluster_alertmanagers_without_read_only(&self, cluster: &str) -> Vec<String> {
        self.clusters_without_read_only()
            .remove(cluster)
            .unwrap_or_default()
    }

    /// Lowest version among the named instances. Pre-release suffixes are
    /// ignored and unknown versions count as 0.22.0.
    pub fn min_version(&self, names: &[String]) -> String {
        self.upstreams
            .instances
            .iter()
            .filter(|am| names.contains(&am.name))
            .map(|am| {
                let release = am.version.split('-').next().unwrap_or_default();
                parse_version(release)
                    .map(|parsed| (parsed, release.trim_start_matches('v').to_string()))
                    .unwrap_or_else(|| {
                        (
                            parse_version(FALLBACK_VERSION).unwrap_or_default(),
                            FALLBACK_VERSION.to_string(),
                        )
                    })
            })
            .min_by_key(|(parsed, _)| *parsed)
            .map(|(_, version)| version)
            .unwrap_or_else(|| FALLBACK_VERSION.to_string())
    }

    pub fn color_data(&self, name: &str, value: &str) -> Option<&LabelColor> {
        self.colors.get(name).and_then(|values| values.get(value))
    }

    pub fn upstreams_with_errors(&self) -> Vec<&AlertmanagerUpstream> {
        self.upstreams
            .instances
            .iter()
            .filter(|am| !am.error.is_empty())
            .collect()
    }

    fn update(&mut self, response: &mut AlertsResponse) {
        self.colors = std::mem::take(&mut response.colors);
        self.counters = std::mem::take(&mut response.counters);
        self.grids = std::mem::take(&mut response.grids);
        self.silences = std::mem::take(&mut response.silences);
        self.upstreams = std::mem::take(&mut response.upstreams);
        self.receivers = std::mem::take(&mut response.receivers);
    }
}

fn parse_version(raw: &str) -> Option<(u64, u64, u64)> {
    let mut parts = raw.trim_start_matches('v').split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().unwrap_or("0").parse().ok()?;
    let patch = parts.next().unwrap_or("0").parse().ok()?;
    Some((major, minor, patch))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Info {
    pub authentication: Authentication,
    pub total_alerts: u64,
    /// `None` until the first response arrives.
    pub version: Option<String>,
    pub upgrade_ready: bool,
    pub upgrade_needed: bool,
    pub is_retrying: bool,
    pub retry_attempts: u32,
    pub reload_needed: bool,
}

impl Info {
    pub fn set_is_retrying(&mut self, attempt: u32) {
        self.is_retrying = true;
        self.retry_attempts = attempt;
    }

    pub fn clear_is_retrying(&mut self) {
        self.is_retrying = false;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    Applied,
    Stale,
    Failed(String),
}

/// State owned by one dashboard session.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub filters: FilterSet,
    pub data: AlertData,
    pub info: Info,
    pub settings: Settings,
    pub status: Status,
    pub location: Location,
}

impl Session {
    pub fn new(location: Location) -> Self {
        Self {
            location,
            ..Self::default()
        }
    }

    /// Starts a session from the dashboard URL, falling back to
    /// `default_filters` when the URL doesn't mention filters at all.
    pub fn from_location(location: Location, default_filters: &[String]) -> Self {
        let decoded = location.decode();
        let mut session = Self::new(location);
        if decoded.defaults_used {
            session.set_filters(default_filters);
        } else {
            session.filters.set(&decoded.filters);
        }
        session
    }

    pub fn add_filter(&mut self, raw: &str) {
        if self.filters.add(raw) {
            self.sync_location();
        }
    }

    pub fn remove_filter(&mut self, raw: &str) {
        if self.filters.remove(raw) {
            self.sync_location();
        }
    }

    pub fn replace_filter(&mut self, old_raw: &str, new_raw: &str) {
        if self.filters.replace(old_raw, new_raw) {
            self.sync_location();
        }
    }

    pub fn set_filters<S: AsRef<str>>(&mut self, raws: &[S]) {
        self.filters.set(raws);
        self.sync_location();
    }

    /// Used when navigating history: the URL already holds the filters, so
    /// only the list is rebuilt.
    pub fn restore_filters<S: AsRef<str>>(&mut self, raws: &[S]) {
        self.filters.set_from_raws(raws);
    }

    fn sync_location(&mut self) {
        let raws = self.filters.raws();
        self.location.push_filters(&raws);
    }

    pub fn parse_api_response(&mut self, mut response: AlertsResponse) -> ResponseOutcome {
        if !response.error.is_empty() {
            let error = std::mem::take(&mut response.error);
            self.handle_fetch_error(error.clone());
            return ResponseOutcome::Failed(error);
        }

        let returned: BTreeSet<&str> = response.filters.iter().map(|f| f.text.as_str()).collect();
        if returned != self.filters.raw_set() {
            info!(
                ?returned,
                expected = ?self.filters.raw_set(),
                "got response for a different filter set, ignoring"
            );
            return ResponseOutcome::Stale;
        }

        for filter in &response.filters {
            self.filters.acknowledge(filter);
        }

        self.data.update(&mut response);

        if let Some(known) = &self.info.version {
            if *known != response.version {
                warn!(from = %known, to = %response.version, "backend version changed, stopping updates");
                self.info.upgrade_ready = true;
                self.status.stop();
            }
        }

        self.info.total_alerts = response.total_alerts;
        self.info.version = Some(response.version);
        self.info.authentication = response.authentication;
        self.settings = response.settings;

        self.status.set_idle();
        ResponseOutcome::Applied
    }

    pub fn handle_fetch_error(&mut self, error: impl Into<String>) {
        self.status.set_failure(error);
        // nothing will be rendered so the counter must not linger
        self.info.total_alerts = 0;
        self.filters.apply_all();
    }
}

/// Appends raw backend replies to a file from a background task.
#[derive(Debug)]
pub struct ResponseLogger {
    sender: mpsc::UnboundedSender<String>,
}

impl ResponseLogger {
    pub fn new(path: PathBuf) -> Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let logger = Arc::new(Self { sender: tx });

        tokio::spawn(async move {
            match OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    while let Some(body) = rx.recv().await {
                        let line = format!("{}\n", body.trim_end());
                        if let Err(err) = file.write_all(line.as_bytes()).await {
                            warn!(?err, "failed to write response dump");
                            break;
                        }
                    }
                }
                Err(err) => {
                    warn!(?err, path = %path.display(), "failed to open response dump file");
                    while rx.recv().await.is_some() {}
                }
            }
        });

        logger
    }

    pub fn log(&self, body: String) {
        let _ = self.sender.send(body);
    }
}
