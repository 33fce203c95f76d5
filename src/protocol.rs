//! Wire format for the duplex channel.
//!
//! Every frame is one JSON object ([`WireMessage`]) with an `action` tag and a
//! fixed set of optional payload fields. Absent or `null` fields decode to
//! their zero value. Inbound records are then narrowed into an [`Action`],
//! which carries only the fields the tagged action actually needs.

use serde::{Deserialize, Deserializer, Serialize};

use crate::storage::base_name;

/// The single record exchanged on the duplex channel, in both directions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireMessage {
    #[serde(deserialize_with = "null_as_default")]
    pub action: String,
    #[serde(deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(deserialize_with = "null_as_default")]
    pub boolean: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub number: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub error: String,
    #[serde(deserialize_with = "null_as_default")]
    pub success: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub filename: String,
    #[serde(deserialize_with = "null_as_default")]
    pub filenames: Vec<String>,
    /// Media descriptor, opaque to this crate.
    pub file: serde_json::Value,
    #[serde(deserialize_with = "null_as_default")]
    pub slice_start: Vec<f64>,
    #[serde(deserialize_with = "null_as_default")]
    pub slice_stop: Vec<f64>,
    #[serde(deserialize_with = "null_as_default")]
    pub slice_type: Vec<i64>,
    #[serde(deserialize_with = "null_as_default")]
    pub state: String,
    #[serde(deserialize_with = "null_as_default")]
    pub place: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl WireMessage {
    pub fn new(action: &str) -> Self {
        Self {
            action: action.to_string(),
            ..Default::default()
        }
    }

    pub fn connected(session: &str) -> Self {
        Self {
            message: session.to_string(),
            ..Self::new("connected")
        }
    }

    pub fn error(filename: &str, error: impl Into<String>) -> Self {
        Self {
            filename: filename.to_string(),
            error: error.into(),
            ..Self::new("error")
        }
    }

    pub fn progress(bytes: u64) -> Self {
        Self {
            number: i64::try_from(bytes).unwrap_or(i64::MAX),
            ..Self::new("progress")
        }
    }

    pub fn processed(filename: &str, descriptor: serde_json::Value) -> Self {
        Self {
            filename: filename.to_string(),
            file: descriptor,
            ..Self::new("processed")
        }
    }

    /// Replace `filename` with its base name, leaving it empty when nothing
    /// usable remains.
    pub fn normalize_filename(&mut self) {
        if !self.filename.is_empty() {
            self.filename = base_name(&self.filename).unwrap_or_default();
        }
    }
}

/// A decoded inbound request, one variant per supported action tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Connected,
    GetInfo { filename: String },
    OnsetDetect { filename: String, sensitivity: i64 },
    SetSlices { filename: String, starts: Vec<f64>, stops: Vec<f64> },
    SetSplicePlayback { filename: String, mode: i64 },
    SetOneshot { filename: String, enabled: bool },
    SetTempoMatch { filename: String, enabled: bool },
    MergeFiles { filenames: Vec<String> },
    UpdateState { place: Option<String>, state: String },
    GetState { place: Option<String> },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown action {0:?}")]
    UnknownAction(String),
    #[error("action {action:?} requires field {field:?}")]
    MissingField {
        action: &'static str,
        field: &'static str,
    },
}

impl Action {
    /// Tag of this action as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Connected => "connected",
            Action::GetInfo { .. } => "getinfo",
            Action::OnsetDetect { .. } => "onsetdetect",
            Action::SetSlices { .. } => "setslices",
            Action::SetSplicePlayback { .. } => "setspliceplayback",
            Action::SetOneshot { .. } => "setoneshot",
            Action::SetTempoMatch { .. } => "settempomatch",
            Action::MergeFiles { .. } => "mergefiles",
            Action::UpdateState { .. } => "updatestate",
            Action::GetState { .. } => "getstate",
        }
    }
}

fn required_filename(msg: &WireMessage, action: &'static str) -> Result<String, ProtocolError> {
    if msg.filename.is_empty() {
        return Err(ProtocolError::MissingField {
            action,
            field: "filename",
        });
    }
    Ok(msg.filename.clone())
}

fn optional_place(msg: &WireMessage) -> Option<String> {
    base_name(&msg.place).ok()
}

impl TryFrom<&WireMessage> for Action {
    type Error = ProtocolError;

    fn try_from(msg: &WireMessage) -> Result<Self, Self::Error> {
        let action = match msg.action.as_str() {
            "connected" => Action::Connected,
            "getinfo" => Action::GetInfo {
                filename: required_filename(msg, "getinfo")?,
            },
            "onsetdetect" => Action::OnsetDetect {
                filename: required_filename(msg, "onsetdetect")?,
                sensitivity: msg.number,
            },
            "setslices" => Action::SetSlices {
                filename: required_filename(msg, "setslices")?,
                starts: msg.slice_start.clone(),
                stops: msg.slice_stop.clone(),
            },
            "setspliceplayback" => Action::SetSplicePlayback {
                filename: required_filename(msg, "setspliceplayback")?,
                mode: msg.number,
            },
            "setoneshot" => Action::SetOneshot {
                filename: required_filename(msg, "setoneshot")?,
                enabled: msg.boolean,
            },
            "settempomatch" => Action::SetTempoMatch {
                filename: required_filename(msg, "settempomatch")?,
                enabled: msg.boolean,
            },
            "mergefiles" => {
                if msg.filenames.is_empty() {
                    return Err(ProtocolError::MissingField {
                        action: "mergefiles",
                        field: "filenames",
                    });
                }
                Action::MergeFiles {
                    filenames: msg.filenames.clone(),
                }
            }
            "updatestate" => Action::UpdateState {
                place: optional_place(msg),
                state: msg.state.clone(),
            },
            "getstate" => Action::GetState {
                place: optional_place(msg),
            },
            other => return Err(ProtocolError::UnknownAction(other.to_string())),
        };
        Ok(action)
    }
}
