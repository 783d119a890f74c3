//! Message kinds exchanged with the extension. Every message is a JSON object
//! tagged by `type`; requests may carry a `requestId` that is echoed back.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregate::{Aggregate, DailyDigest, StatsPeriod, WeeklyDigest};
use crate::bundle::{ExportPage, ImportReport};
use crate::focus::FocusStatus;
use crate::models::Interval;
use crate::nudge::NudgeRequest;
use crate::session::{PlatformIdleState, SessionSnapshot};
use crate::settings::TrackerSettings;

pub const REQUEST_ID_FIELD: &str = "requestId";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DigestPeriod {
    #[default]
    Daily,
    Weekly,
}

fn default_period() -> StatsPeriod {
    StatsPeriod::Today
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    #[serde(rename_all = "camelCase")]
    TabActivated {
        url: String,
        #[serde(default)]
        tab_id: Option<i64>,
        #[serde(default)]
        window_id: Option<i64>,
    },
    #[serde(rename_all = "camelCase")]
    TabClosed {
        #[serde(default)]
        tab_id: Option<i64>,
        #[serde(default)]
        window_closing: bool,
    },
    WindowFocusChanged {
        focused: bool,
    },
    IdleStateChanged {
        state: PlatformIdleState,
    },
    GetCurrentSession,
    ActivitySignal,
    GetStats {
        #[serde(default = "default_period")]
        window: StatsPeriod,
    },
    Pause,
    Resume,
    EndSession,
    /// One page of the export; follow `nextOffset` in the reply.
    Export {
        #[serde(default)]
        offset: usize,
    },
    Import {
        bundle: Value,
    },
    GetSettings,
    UpdateSettings {
        settings: TrackerSettings,
    },
    GetDigest {
        #[serde(default)]
        period: DigestPeriod,
    },
    ToggleFocusMode {
        domain: String,
    },
    CheckFocusMode {
        domain: String,
    },
    DisableFocusMode {
        domain: String,
    },
    GetFocusStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Response {
    /// Browser event accepted.
    Ok,
    CurrentSession(SessionSnapshot),
    Activity {
        accepted: bool,
    },
    #[serde(rename_all = "camelCase")]
    Stats {
        window: StatsPeriod,
        stats: Aggregate,
        focus_score: u32,
    },
    #[serde(rename_all = "camelCase")]
    PauseState {
        paused: bool,
        changed: bool,
    },
    SessionEnded {
        session: Option<Interval>,
    },
    Export(ExportPage),
    Import(ImportReport),
    Settings {
        settings: TrackerSettings,
    },
    DailyDigest(DailyDigest),
    WeeklyDigest(WeeklyDigest),
    FocusMode {
        domain: String,
        blocked: bool,
    },
    FocusStatus(FocusStatus),
    Error {
        message: String,
    },
}

impl Response {
    pub fn error(err: impl std::fmt::Display) -> Self {
        Response::Error {
            message: err.to_string(),
        }
    }
}

/// Messages the host sends without a request.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Push {
    SessionUpdate(SessionSnapshot),
    Nudge(NudgeRequest),
}

/// Split off the optional request id, then decode the request itself.
pub fn decode_request(raw: Value) -> (Option<Value>, Result<Request>) {
    let request_id = raw.get(REQUEST_ID_FIELD).cloned();
    let request = serde_json::from_value(raw).context("unrecognised request");
    (request_id, request)
}

pub fn encode_response(response: &Response, request_id: Option<Value>) -> Result<Value> {
    let mut value = serde_json::to_value(response).context("failed to encode response")?;
    if let (Some(id), Value::Object(map)) = (request_id, &mut value) {
        map.insert(REQUEST_ID_FIELD.to_string(), id);
    }
    Ok(value)
}

pub fn encode_push(push: &Push) -> Result<Value> {
    serde_json::to_value(push).context("failed to encode push message")
}
