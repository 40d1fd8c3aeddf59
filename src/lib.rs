//! Astra voice core.
//!
//! Streams microphone audio to a live speech agent, plays its spoken replies
//! gaplessly, runs its tool calls against the local job tracker, and reports
//! turns and state to a host UI over JSON-line IPC.

pub mod agent;
pub mod audio;
pub mod config;
pub mod error;
pub mod ipc;
pub mod jobs;
pub mod logging;
pub mod mail;
pub mod session;
pub mod tools;
pub mod transport;
