use std::time::Duration;

use chrono::Utc;
use color_eyre::{Result, eyre::WrapErr};
use tokio::{
    select,
    time::{self, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    fetch::{FetchController, FetchOutcome},
    query::Location,
    state::{ResponseLogger, Session},
    transport::HttpTransport,
};

pub struct AlertdeckApp {
    tick_rate: Duration,
    controller: FetchController<HttpTransport>,
}

impl AlertdeckApp {
    pub async fn bootstrap(config: Config) -> Result<Self> {
        let location = Location::new(config.location.as_deref().unwrap_or_default());
        let session = if config.filters.is_empty() {
            Session::from_location(location, &config.default_filters)
        } else {
            let mut session = Session::new(location);
            session.set_filters(&config.filters);
            session
        };

        let transport = HttpTransport::new(&config.backend, config.retry_policy())
            .wrap_err_with(|| format!("Invalid backend URI {}", config.backend))?;
        info!(endpoint = %transport.endpoint(), "backend configured");

        let logger = config
            .debug_dump
            .as_ref()
            .map(|path| ResponseLogger::new(path.clone()));

        let controller = FetchController::new(session, transport, config.query_options())
            .with_refresh(config.refresh())
            .with_logger(logger);

        Ok(Self {
            tick_rate: Duration::from_secs(1),
            controller,
        })
    }

    pub async fn run(mut self) -> Result<()> {
        info!(
            filters = ?self.controller.session().filters.raws(),
            "starting alertdeck"
        );

        let mut ticker = time::interval(self.tick_rate);

        loop {
            let trailing = self.controller.trailing_deadline();

            let outcome = select! {
                _ = ticker.tick() => self.controller.fetch_if_idle(Utc::now()).await,
                _ = wait_until(trailing) => self.controller.fire_trailing().await,
                ctrl_c = tokio::signal::ctrl_c() => {
                    if let Err(err) = ctrl_c {
                        warn!(?err, "failed to listen for ctrl+c");
                    } else {
                        info!("received ctrl+c");
                    }
                    break;
                }
            };

            self.report(&outcome);

            if self.controller.session().info.upgrade_ready {
                info!("backend was upgraded, restart alertdeck to pick up the new version");
                break;
            }
        }

        info!("alertdeck shutting down");
        Ok(())
    }

    fn report(&self, outcome: &FetchOutcome) {
        let session = self.controller.session();
        match outcome {
            FetchOutcome::Applied => {
                let groups: usize = session
                    .data
                    .grids
                    .iter()
                    .map(|grid| grid.alert_groups.len())
                    .sum();
                info!(
                    total = session.info.total_alerts,
                    grids = session.data.grids.len(),
                    groups,
                    version = session.info.version.as_deref().unwrap_or_default(),
                    "alerts updated"
                );
                for filter in session.filters.values() {
                    debug!(
                        raw = %filter.raw,
                        hits = filter.hits,
                        valid = filter.is_valid,
                        "filter"
                    );
                }
                for upstream in session.data.upstreams_with_errors() {
                    warn!(name = %upstream.name, error = %upstream.error, "alertmanager upstream failing");
                }
            }
            FetchOutcome::Stale => debug!("dropped response for an older filter set"),
            FetchOutcome::Failed(error) => {
                if session.info.reload_needed {
                    warn!("backend reply was redirected, check authentication");
                }
                warn!(%error, "update failed");
            }
            FetchOutcome::Skipped => {}
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
