use std::{path::PathBuf, time::Duration};

use clap::Parser;

use crate::{fetch::QueryOptions, transport::RetryPolicy};

#[derive(Debug, Clone, Parser)]
#[command(name = "alertdeck", about = "Query an alert dashboard backend from the terminal")]
pub struct Config {
    /// Base URI of the dashboard backend serving `alerts.json`.
    #[arg(
        long = "backend",
        env = "ALERTDECK_BACKEND",
        value_name = "URI",
        default_value = "http://127.0.0.1:8080"
    )]
    pub backend: String,

    /// Filters to apply, e.g. `-q cluster=prod -q @state=active`.
    #[arg(
        short = 'q',
        long = "filter",
        env = "ALERTDECK_FILTERS",
        value_name = "FILTER",
        value_delimiter = ','
    )]
    pub filters: Vec<String>,

    /// Used when neither `--filter` nor `--location` name any filter.
    #[arg(long = "default-filter", value_name = "FILTER")]
    pub default_filters: Vec<String>,

    /// Dashboard URL to restore filters from, e.g. `https://dash/?q=foo`.
    #[arg(long = "location", value_name = "URL")]
    pub location: Option<String>,

    #[arg(
        long = "refresh",
        env = "ALERTDECK_REFRESH",
        value_name = "SECONDS",
        default_value_t = 30,
        help = "Seconds between automatic refreshes"
    )]
    pub refresh_secs: u64,

    #[arg(long = "grid-label", value_name = "LABEL", default_value = "")]
    pub grid_label: String,

    #[arg(long = "grid-sort-reverse")]
    pub grid_sort_reverse: bool,

    #[arg(long = "sort-order", value_name = "ORDER", default_value = "")]
    pub sort_order: String,

    #[arg(long = "sort-label", value_name = "LABEL", default_value = "")]
    pub sort_label: String,

    #[arg(long = "sort-reverse")]
    pub sort_reverse: bool,

    #[arg(
        long = "retries",
        env = "ALERTDECK_RETRIES",
        default_value_t = 9,
        help = "How many times a failed backend request is retried"
    )]
    pub retries: u32,

    /// Optional file path to dump raw backend responses for debugging.
    #[arg(
        long = "debug-dump",
        env = "ALERTDECK_DEBUG_DUMP",
        value_name = "FILE",
        help = "Append each backend response to FILE for offline inspection"
    )]
    pub debug_dump: Option<PathBuf>,
}

impl Config {
    pub fn refresh(&self) -> Duration {
        Duration::from_secs(self.refresh_secs.max(1))
    }

    pub fn query_options(&self) -> QueryOptions {
        QueryOptions {
            grid_label: self.grid_label.clone(),
            grid_sort_reverse: self.grid_sort_reverse,
            sort_order: self.sort_order.clone(),
            sort_label: self.sort_label.clone(),
            sort_reverse: self.sort_reverse,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            ..RetryPolicy::default()
        }
    }
}
