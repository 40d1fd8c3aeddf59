//! IPC protocol types for communication with the host UI.
//!
//! Events use `{"event": "<name>", "data": {...}}` format (core -> host).
//! Commands use `{"command": "<name>", ...}` format (host -> core).

pub mod bridge;

use serde::{Deserialize, Serialize};

use crate::agent::ResumeAnalysis;
use crate::mail::MailMessage;
use crate::session::{Phase, SessionObserver};

// ---------------------------------------------------------------------------
// Events: core -> host (stdout)
// ---------------------------------------------------------------------------

/// All events emitted to the host via stdout as JSON lines.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum AstraEvent {
    Starting {},
    Ready {},
    StateChange { state: Phase },
    Turn { user: String, assistant: String },
    Error { message: String },
    Spectrum { bins: Vec<u8> },
    TextReply { text: String },
    AudioDevices {
        input: Vec<AudioDeviceInfo>,
        output: Vec<AudioDeviceInfo>,
    },
    Jobs { text: String },
    MailSyncRequested {},
    MailSyncFinished { count: usize },
    ResumeAnalysis { analysis: ResumeAnalysis },
    Pong {},
    Stopping {},
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    pub id: i32,
    pub name: String,
}

impl AudioDeviceInfo {
    pub fn from_names(names: Vec<String>) -> Vec<Self> {
        names
            .into_iter()
            .enumerate()
            .map(|(i, name)| Self { id: i as i32, name })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Commands: host -> core (stdin)
// ---------------------------------------------------------------------------

/// All commands received from the host via stdin as JSON lines.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command")]
#[serde(rename_all = "snake_case")]
pub enum AstraCommand {
    StartSession {},
    StopSession {},
    SendText { text: String },
    GetSpectrum {},
    GetState {},
    ListAudioDevices {},
    ListJobs {},
    ClearJobs {},
    SyncEmails {
        #[serde(default)]
        emails: Vec<MailMessage>,
    },
    AnalyzeResume {
        resume_text: String,
        job_description: String,
    },
    SetMailStatus {
        connected: bool,
        #[serde(default)]
        expired: bool,
    },
    Ping {},
    Stop {},
}

/// Forwards session notifications to the host as IPC events.
pub struct IpcObserver;

impl SessionObserver for IpcObserver {
    fn phase_changed(&mut self, phase: Phase) {
        bridge::emit_event(&AstraEvent::StateChange { state: phase });
    }

    fn turn_completed(&mut self, user_text: &str, assistant_text: &str) {
        bridge::emit_event(&AstraEvent::Turn {
            user: user_text.to_string(),
            assistant: assistant_text.to_string(),
        });
    }

    fn fatal_error(&mut self, message: &str) {
        bridge::emit_error(message);
    }
}
