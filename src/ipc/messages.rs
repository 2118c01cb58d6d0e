//! Bus message types for controller ↔ worker communication
//!
//! [`Message`] is the typed form used by code; [`Envelope`] is the wire form:
//! an action scope, an integer kind code, and an optional payload.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::bus::*;

/// Channel a message travels on
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Addressed to the worker
    #[serde(rename = "proxy-profiles.action.worker")]
    Worker,
    /// Addressed to controllers
    #[serde(rename = "proxy-profiles.action.controller")]
    Controller,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Worker => ACTION_WORKER,
            Action::Controller => ACTION_CONTROLLER,
        }
    }
}

/// Optional envelope payload
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum Payload {
    Text(String),
    /// (GUID, latency in milliseconds)
    GuidLatency(String, i64),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub action: Action,
    pub kind: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("unknown message kind {0}")]
    UnknownKind(i32),
    #[error("message kind {kind} carries an unexpected payload: {payload:?}")]
    BadPayload { kind: i32, payload: Option<Payload> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    // Controller → worker
    /// Controller is now listening; the worker answers with its state
    RegisterClient,
    /// Controller stops listening
    UnregisterClient,
    Start,
    Stop,
    Restart,
    /// Probe the active profile
    MeasureDelay,
    /// Probe one profile by GUID
    MeasureConfig(String),
    /// Abort outstanding per-profile probes
    MeasureConfigCancel,

    // Worker → controller
    StateRunning,
    StateNotRunning,
    StartSuccess,
    StartFailure,
    StopSuccess,
    /// Human readable result for the active profile
    MeasureDelaySuccess(String),
    /// Latency for a specific profile; negative means failure
    MeasureConfigSuccess { guid: String, millis: i64 },
}

impl Message {
    pub fn kind(&self) -> i32 {
        match self {
            Message::RegisterClient => MSG_REGISTER_CLIENT,
            Message::UnregisterClient => MSG_UNREGISTER_CLIENT,
            Message::Start => MSG_STATE_START,
            Message::Stop => MSG_STATE_STOP,
            Message::Restart => MSG_STATE_RESTART,
            Message::MeasureDelay => MSG_MEASURE_DELAY,
            Message::MeasureConfig(_) => MSG_MEASURE_CONFIG,
            Message::MeasureConfigCancel => MSG_MEASURE_CONFIG_CANCEL,
            Message::StateRunning => MSG_STATE_RUNNING,
            Message::StateNotRunning => MSG_STATE_NOT_RUNNING,
            Message::StartSuccess => MSG_STATE_START_SUCCESS,
            Message::StartFailure => MSG_STATE_START_FAILURE,
            Message::StopSuccess => MSG_STATE_STOP_SUCCESS,
            Message::MeasureDelaySuccess(_) => MSG_MEASURE_DELAY_SUCCESS,
            Message::MeasureConfigSuccess { .. } => MSG_MEASURE_CONFIG_SUCCESS,
        }
    }

    /// Channel this message is meant for
    pub fn action(&self) -> Action {
        match self {
            Message::RegisterClient
            | Message::UnregisterClient
            | Message::Start
            | Message::Stop
            | Message::Restart
            | Message::MeasureDelay
            | Message::MeasureConfig(_)
            | Message::MeasureConfigCancel => Action::Worker,
            _ => Action::Controller,
        }
    }

    pub fn into_envelope(self) -> Envelope {
        let action = self.action();
        let kind = self.kind();
        let payload = match self {
            Message::MeasureConfig(guid) => Some(Payload::Text(guid)),
            Message::MeasureDelaySuccess(text) => Some(Payload::Text(text)),
            Message::MeasureConfigSuccess { guid, millis } => Some(Payload::GuidLatency(guid, millis)),
            _ => None,
        };
        Envelope { action, kind, payload }
    }

    /// Decode the typed message; payloads on payload-less kinds are ignored
    pub fn from_envelope(envelope: Envelope) -> Result<Self, MessageError> {
        let Envelope { kind, payload, .. } = envelope;
        let bad = |payload| MessageError::BadPayload { kind, payload };

        let message = match kind {
            MSG_REGISTER_CLIENT => Message::RegisterClient,
            MSG_UNREGISTER_CLIENT => Message::UnregisterClient,
            MSG_STATE_START => Message::Start,
            MSG_STATE_STOP => Message::Stop,
            MSG_STATE_RESTART => Message::Restart,
            MSG_MEASURE_DELAY => Message::MeasureDelay,
            MSG_MEASURE_CONFIG_CANCEL => Message::MeasureConfigCancel,
            MSG_STATE_RUNNING => Message::StateRunning,
            MSG_STATE_NOT_RUNNING => Message::StateNotRunning,
            MSG_STATE_START_SUCCESS => Message::StartSuccess,
            MSG_STATE_START_FAILURE => Message::StartFailure,
            MSG_STATE_STOP_SUCCESS => Message::StopSuccess,
            MSG_MEASURE_CONFIG => match payload {
                Some(Payload::Text(guid)) => Message::MeasureConfig(guid),
                other => return Err(bad(other)),
            },
            MSG_MEASURE_DELAY_SUCCESS => match payload {
                Some(Payload::Text(text)) => Message::MeasureDelaySuccess(text),
                other => return Err(bad(other)),
            },
            MSG_MEASURE_CONFIG_SUCCESS => match payload {
                Some(Payload::GuidLatency(guid, millis)) => Message::MeasureConfigSuccess { guid, millis },
                other => return Err(bad(other)),
            },
            unknown => return Err(MessageError::UnknownKind(unknown)),
        };
        Ok(message)
    }
}
