use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::ClusterRequest;
use crate::{
    protocol::{AlertmanagerUpstream, SilencePayload, SilenceResponse},
    query::backend_uri,
    state::AlertData,
};

pub const SILENCES_PATH: &str = "api/v1/silences";

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Rejected(String),
    #[error("alertmanager responded with {status}")]
    Status { status: StatusCode },
    #[error("invalid response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no writable alertmanager instance in cluster {0}")]
    NoWritableMembers(String),
}

/// Posts `payload` to the members of one cluster, one after another, until
/// an instance accepts it. The outcome is recorded on `request`.
pub async fn submit_silence(
    client: &Client,
    data: &AlertData,
    request: &mut ClusterRequest,
    payload: &SilencePayload,
) -> Result<String, SubmitError> {
    let mut last_error = None;

    for member in &request.members {
        if data.is_read_only_alertmanager(member) {
            warn!(%member, "alertmanager instance is read-only, skipping");
            continue;
        }
        let Some(upstream) = data.alertmanager_by_name(member) else {
            warn!(%member, "alertmanager instance not found, skipping");
            continue;
        };

        match post_silence(client, upstream, payload).await {
            Ok(silence_id) => {
                info!(%member, %silence_id, "silence created");
                request.is_done = true;
                request.error = None;
                request.silence_link = Some(format!(
                    "{}/#/silences/{}",
                    upstream.public_uri.trim_end_matches('/'),
                    silence_id
                ));
                request.silence_id = Some(silence_id.clone());
                return Ok(silence_id);
            }
            Err(err) => {
                warn!(%member, %err, "silence request failed");
                last_error = Some(err);
            }
        }
    }

    let err = last_error.unwrap_or_else(|| SubmitError::NoWritableMembers(request.cluster.clone()));
    request.is_done = true;
    request.error = Some(err.to_string());
    Err(err)
}

async fn post_silence(
    client: &Client,
    upstream: &AlertmanagerUpstream,
    payload: &SilencePayload,
) -> Result<String, SubmitError> {
    let uri = backend_uri(&upstream.uri, SILENCES_PATH);
    debug!(%uri, "posting silence");

    let mut builder = client.post(&uri).json(payload);
    for (name, value) in &upstream.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    let response = builder.send().await?;

    let status = response.status();
    let body = response.bytes().await?;
    match serde_json::from_slice::<SilenceResponse>(&body) {
        Ok(SilenceResponse::Success { data }) => Ok(data.silence_id),
        Ok(SilenceResponse::Error { error }) => Err(SubmitError::Rejected(error)),
        Err(_) if !status.is_success() => Err(SubmitError::Status { status }),
        Err(err) => Err(err.into()),
    }
}
