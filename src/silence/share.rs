//! Compact form encoding used by `?m=` share links.

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use super::{AlertmanagerOption, Matcher, MatcherValue, SilenceForm};
use crate::query::Location;

#[derive(Debug, Error)]
pub enum ShareLinkError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid form json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("shared form has no matchers")]
    NoMatchers,
}

#[derive(Debug, Serialize, Deserialize)]
struct SharedMatcher {
    n: String,
    r: bool,
    e: bool,
    v: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SharedForm {
    am: Vec<AlertmanagerOption>,
    m: Vec<SharedMatcher>,
    /// Duration in minutes.
    d: i64,
    c: String,
}

impl SilenceForm {
    pub fn to_base64(&self) -> Result<String, ShareLinkError> {
        let shared = SharedForm {
            am: self.alertmanagers.clone(),
            m: self
                .matchers
                .iter()
                .map(|m| SharedMatcher {
                    n: m.name.clone(),
                    r: m.is_regex,
                    e: m.is_equal,
                    v: m.values.iter().map(|v| v.value.clone()).collect(),
                })
                .collect(),
            d: self.duration_minutes(),
            c: self.comment.clone(),
        };
        let json = serde_json::to_vec(&shared)?;
        Ok(STANDARD.encode(json))
    }

    pub fn share_link(&self, location: &Location) -> Result<String, ShareLinkError> {
        Ok(location.share_link(&self.to_base64()?))
    }

    /// Restores a shared form. Returns `false` and leaves the form alone
    /// when `encoded` can't be parsed, carries no matchers or a duration
    /// shorter than a minute.
    pub fn from_base64(&mut self, encoded: &str, now: DateTime<Utc>) -> bool {
        let shared = match decode(encoded) {
            Ok(shared) => shared,
            Err(err) => {
                warn!(%err, "ignoring shared silence form");
                return false;
            }
        };
        let Some(ends_at) = Duration::try_minutes(shared.d)
            .filter(|d| *d >= Duration::minutes(1))
            .and_then(|d| now.checked_add_signed(d))
        else {
            warn!(minutes = shared.d, "ignoring shared silence form with invalid duration");
            return false;
        };

        self.alertmanagers = shared.am;
        self.matchers = shared
            .m
            .into_iter()
            .map(|m| Matcher {
                name: m.n,
                values: m.v.into_iter().map(MatcherValue::new).collect(),
                is_regex: m.r,
                is_equal: m.e,
                ..Matcher::new_empty()
            })
            .collect();
        self.starts_at = now;
        self.ends_at = ends_at;
        self.comment = shared.c;
        self.silence_id = None;
        self.autofill_matchers = false;
        self.reset_inputs = false;
        true
    }
}

fn decode(encoded: &str) -> Result<SharedForm, ShareLinkError> {
    let bytes = STANDARD.decode(encoded.trim())?;
    let shared: SharedForm = serde_json::from_slice(&bytes)?;
    if shared.m.is_empty() {
        return Err(ShareLinkError::NoMatchers);
    }
    Ok(shared)
}
