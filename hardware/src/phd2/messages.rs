use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Phd2Error {
    #[error("I/O error talking to PHD2: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid PHD2 message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("PHD2 rejected {method}: {message} (code {code})")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    #[error("guiding did not settle: {0}")]
    SettleFailed(String),

    #[error("timed out waiting for PHD2 {0}")]
    Timeout(String),

    #[error("PHD2 connection closed")]
    Disconnected,
}

pub type Phd2Result<T> = Result<T, Phd2Error>;

/// Settling criteria passed with `guide` and `dither`.
///
/// Guiding is considered settled once the guide star stays within `pixels`
/// for `time` seconds; PHD2 gives up after `timeout` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SettleParams {
    pub pixels: f64,
    pub time: u64,
    pub timeout: u64,
}

impl Default for SettleParams {
    fn default() -> Self {
        Self {
            pixels: 1.5,
            time: 10,
            timeout: 60,
        }
    }
}

/// Asynchronous notifications pushed by the PHD2 event server.
///
/// Only the fields this crate acts on are decoded; anything else is ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "Event")]
pub enum Phd2Event {
    Version {
        #[serde(rename = "PHDVersion")]
        phd_version: String,
    },
    AppState {
        #[serde(rename = "State")]
        state: String,
    },
    GuideStep {
        #[serde(rename = "Frame", default)]
        frame: u64,
        #[serde(rename = "RADistanceRaw", default)]
        ra_distance: f64,
        #[serde(rename = "DECDistanceRaw", default)]
        dec_distance: f64,
    },
    Settling {
        #[serde(rename = "Distance", default)]
        distance: f64,
    },
    SettleDone {
        #[serde(rename = "Status")]
        status: i64,
        #[serde(rename = "Error", default)]
        error: Option<String>,
    },
    StarLost {},
    GuidingStopped {},
    GuidingDithered {},
    Alert {
        #[serde(rename = "Msg", default)]
        msg: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RpcErrorBody {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RpcResponse {
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Value,
    pub error: Option<RpcErrorBody>,
}

/// One line from the event server.
#[derive(Debug, Clone)]
pub(crate) enum Inbound {
    Event(Phd2Event),
    Response(RpcResponse),
}

pub(crate) fn parse_line(line: &str) -> Phd2Result<Inbound> {
    let value: Value = serde_json::from_str(line)?;
    if value.get("Event").is_some() {
        Ok(Inbound::Event(serde_json::from_value(value)?))
    } else {
        Ok(Inbound::Response(serde_json::from_value(value)?))
    }
}
