//! Gemini Live wire messages.
//!
//! Outbound messages are built with `serde_json::json!`. Inbound server
//! messages are deserialized into the structs below and flattened into an
//! ordered list of [`TransportEvent`]s.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use super::{AgentConfig, TranscriptDirection, TransportEvent};
use crate::audio::codec::{decode_base64, AudioFrame, OUTPUT_SAMPLE_RATE};
use crate::error::TransportError;
use crate::tools::{ToolInvocation, ToolResult};

// ── Outbound ────────────────────────────────────────────────────────

/// First message on a new connection.
pub fn setup_message(config: &AgentConfig) -> Value {
    let model = if config.model.starts_with("models/") {
        config.model.clone()
    } else {
        format!("models/{}", config.model)
    };
    json!({
        "setup": {
            "model": model,
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": config.voice_name }
                    }
                }
            },
            "systemInstruction": {
                "parts": [{ "text": config.system_instruction }]
            },
            "tools": [{ "functionDeclarations": config.tool_declarations }],
            "inputAudioTranscription": {},
            "outputAudioTranscription": {}
        }
    })
}

pub fn audio_message(frame: &AudioFrame) -> Value {
    json!({
        "realtimeInput": {
            "audio": {
                "mimeType": AudioFrame::mime_type(),
                "data": frame.to_base64()
            }
        }
    })
}

pub fn tool_response_message(results: &[ToolResult]) -> Value {
    let responses: Vec<Value> = results
        .iter()
        .map(|r| {
            json!({
                "id": r.id,
                "name": r.name,
                "response": { "result": r.text }
            })
        })
        .collect();
    json!({ "toolResponse": { "functionResponses": responses } })
}

// ── Inbound ─────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<Value>,
    server_content: Option<ServerContent>,
    tool_call: Option<ToolCall>,
    tool_call_cancellation: Option<ToolCallCancellation>,
    go_away: Option<GoAway>,
    error: Option<ServerError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    input_transcription: Option<Transcription>,
    output_transcription: Option<Transcription>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
struct Transcription {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCall {
    #[serde(default)]
    function_calls: Vec<ToolInvocation>,
}

#[derive(Debug, Deserialize)]
struct ToolCallCancellation {
    #[serde(default)]
    ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoAway {
    time_left: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServerError {
    #[serde(default)]
    message: String,
}

/// One decoded server message.
#[derive(Debug, Default, PartialEq)]
pub struct ServerFrame {
    /// The handshake acknowledgement.
    pub setup_complete: bool,
    /// Invocation ids the server withdrew.
    pub cancelled: Vec<String>,
    /// Seconds-left hint when the server is about to disconnect.
    pub go_away: Option<String>,
    /// Events in dispatch order.
    pub events: Vec<TransportEvent>,
}

/// Decode one inbound JSON message.
///
/// Audio parts with undecodable payloads are dropped with a warning; the rest
/// of the message is still delivered.
pub fn decode_server_message(text: &str) -> Result<ServerFrame, TransportError> {
    let msg: ServerMessage = serde_json::from_str(text)
        .map_err(|e| TransportError::Protocol(format!("invalid server message: {}", e)))?;

    let mut frame = ServerFrame {
        setup_complete: msg.setup_complete.is_some(),
        ..Default::default()
    };

    if let Some(err) = msg.error {
        frame.events.push(TransportEvent::Error(err.message));
    }

    if let Some(call) = msg.tool_call {
        if !call.function_calls.is_empty() {
            frame.events.push(TransportEvent::ToolCall(call.function_calls));
        }
    }

    if let Some(content) = msg.server_content {
        for (direction, transcription) in [
            (TranscriptDirection::Output, content.output_transcription),
            (TranscriptDirection::Input, content.input_transcription),
        ] {
            if let Some(t) = transcription {
                if !t.text.is_empty() {
                    frame.events.push(TransportEvent::Transcript {
                        direction,
                        text: t.text,
                    });
                }
            }
        }

        if content.turn_complete {
            frame.events.push(TransportEvent::TurnComplete);
        }

        if let Some(turn) = content.model_turn {
            for data in turn.parts.into_iter().filter_map(|p| p.inline_data) {
                if !data.mime_type.starts_with("audio/pcm") {
                    continue;
                }
                match decode_base64(&data.data) {
                    Ok(pcm) => frame.events.push(TransportEvent::AudioChunk {
                        pcm,
                        sample_rate: mime_sample_rate(&data.mime_type),
                    }),
                    Err(e) => warn!("Dropping undecodable audio part: {}", e),
                }
            }
        }

        if content.interrupted {
            frame.events.push(TransportEvent::Interrupted);
        }
    }

    if let Some(cancel) = msg.tool_call_cancellation {
        frame.cancelled = cancel.ids;
    }
    if let Some(go_away) = msg.go_away {
        frame.go_away = Some(go_away.time_left.unwrap_or_default());
    }

    Ok(frame)
}

/// `audio/pcm;rate=24000` -> 24000. Falls back to the agent's default rate.
fn mime_sample_rate(mime: &str) -> u32 {
    mime.split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
        .unwrap_or(OUTPUT_SAMPLE_RATE)
}
