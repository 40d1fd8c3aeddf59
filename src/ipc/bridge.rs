//! IPC bridge: stdin reader and stdout event emitter.
//!
//! A blocking stdin reader thread sends deserialized commands through an
//! mpsc channel; events go out as JSON lines on stdout.

use std::io::{self, BufRead, Write};

use tokio::sync::mpsc;
use tracing::{debug, error};

use super::{AstraCommand, AstraEvent};

/// Emit an `AstraEvent` as a JSON line on stdout and flush.
pub fn emit_event(event: &AstraEvent) {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    // Pipe may be closed.
    let _ = write_event(&mut handle, event);
}

/// Write one event line to `out`.
pub fn write_event(out: &mut impl Write, event: &AstraEvent) -> io::Result<()> {
    let json = serde_json::to_string(event).map_err(io::Error::other)?;
    writeln!(out, "{}", json)?;
    out.flush()
}

/// Convenience helper for emitting error events.
pub fn emit_error(message: &str) {
    emit_event(&AstraEvent::Error {
        message: message.to_string(),
    });
}

/// Hosts that tag messages with `"type"` instead of `"command"` are
/// accepted; `"command"` wins when both are present.
fn normalize_command(mut value: serde_json::Value) -> serde_json::Value {
    if let Some(obj) = value.as_object_mut() {
        if !obj.contains_key("command") {
            if let Some(tag) = obj.remove("type") {
                obj.insert("command".to_string(), tag);
            }
        }
    }
    value
}

/// Parse one stdin line. `Ok(None)` for blank lines.
pub fn parse_command(line: &str) -> Result<Option<AstraCommand>, serde_json::Error> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let value: serde_json::Value = serde_json::from_str(trimmed)?;
    serde_json::from_value(normalize_command(value)).map(Some)
}

/// Spawn a blocking thread that reads JSON lines from stdin and forwards
/// the parsed commands through the returned channel.
///
/// The thread exits when stdin is closed (host process gone) or on an
/// unrecoverable read error.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<AstraCommand> {
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::spawn(move || {
        let stdin = io::stdin();
        let reader = stdin.lock();
        for line in reader.lines() {
            match line {
                Ok(text) => match parse_command(&text) {
                    Ok(Some(cmd)) => {
                        debug!(?cmd, "Received command from host");
                        if tx.send(cmd).is_err() {
                            break; // Receiver dropped
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!("Invalid JSON command: {} (input: {})", e, text.trim());
                        emit_error(&format!("Invalid JSON command: {}", e));
                    }
                },
                Err(e) => {
                    error!("stdin read error: {}", e);
                    break;
                }
            }
        }
        debug!("stdin reader thread exiting");
    });

    rx
}
