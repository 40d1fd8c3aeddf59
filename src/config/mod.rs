//! Settings and data directory paths.

pub mod paths;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::TransportError;
use crate::transport::AgentConfig;

/// Settings file name inside the data directory.
pub const SETTINGS_FILE: &str = "astra-settings.json";

/// Live (audio) model used when settings do not name one.
pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Model used for typed chat.
pub const DEFAULT_TEXT_MODEL: &str = "gemini-3-flash-preview";

/// Prebuilt voices the agent can speak with.
pub const VOICES: [&str; 5] = ["Zephyr", "Puck", "Charon", "Kore", "Fenrir"];

const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 15;

/// How much the agent should say.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Conciseness {
    Concise,
    #[default]
    Normal,
    Detailed,
}

impl std::fmt::Display for Conciseness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Concise => write!(f, "Concise"),
            Self::Normal => write!(f, "Normal"),
            Self::Detailed => write!(f, "Detailed"),
        }
    }
}

/// astra-settings.json shape (written by the host's settings panel).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub user_name: String,
    pub target_role: String,
    pub voice_name: String,
    pub conciseness: Conciseness,
    pub timezone: String,
    pub gemini_api_key: Option<String>,
    pub model: Option<String>,
    pub text_model: Option<String>,
    pub endpoint: Option<String>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub output_volume: f32,
    pub handshake_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            user_name: String::new(),
            target_role: String::new(),
            voice_name: VOICES[0].to_string(),
            conciseness: Conciseness::Normal,
            timezone: "UTC".to_string(),
            gemini_api_key: None,
            model: None,
            text_model: None,
            endpoint: None,
            input_device: None,
            output_device: None,
            output_volume: 1.0,
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
        }
    }
}

impl Settings {
    /// Configured voice, or the default when the name is unknown.
    pub fn voice(&self) -> &str {
        VOICES
            .iter()
            .copied()
            .find(|v| v.eq_ignore_ascii_case(self.voice_name.trim()))
            .unwrap_or_else(|| {
                warn!(voice = %self.voice_name, "Unknown voice, using {}", VOICES[0]);
                VOICES[0]
            })
    }

    /// API key from settings, then `GEMINI_API_KEY`, then `GOOGLE_API_KEY`.
    pub fn api_key(&self) -> Option<String> {
        let env = |name: &str| std::env::var(name).ok();
        self.api_key_with(env)
    }

    fn api_key_with(&self, env: impl Fn(&str) -> Option<String>) -> Option<String> {
        self.gemini_api_key
            .clone()
            .or_else(|| env("GEMINI_API_KEY"))
            .or_else(|| env("GOOGLE_API_KEY"))
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }

    pub fn output_volume(&self) -> f32 {
        if self.output_volume.is_finite() {
            self.output_volume.clamp(0.0, 2.0)
        } else {
            1.0
        }
    }

    pub fn live_model(&self) -> &str {
        non_empty(&self.model).unwrap_or(DEFAULT_LIVE_MODEL)
    }

    pub fn text_model(&self) -> &str {
        non_empty(&self.text_model).unwrap_or(DEFAULT_TEXT_MODEL)
    }

    /// Connection parameters for a live session.
    pub fn agent_config(&self) -> Result<AgentConfig, TransportError> {
        let api_key = self.api_key().ok_or(TransportError::MissingApiKey)?;
        Ok(AgentConfig {
            api_key,
            model: self.live_model().to_string(),
            endpoint: non_empty(&self.endpoint).map(String::from),
            voice_name: self.voice().to_string(),
            system_instruction: crate::agent::system_instruction(self),
            tool_declarations: crate::tools::declarations(),
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs.max(1)),
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Read astra-settings.json from the data directory.
pub fn read_settings(data_dir: &Path) -> Settings {
    read_json_file(&get_settings_path(data_dir)).unwrap_or_default()
}

/// Path to astra-settings.json.
pub fn get_settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SETTINGS_FILE)
}

/// Generic helper: read a JSON file and deserialize it.
fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = read_settings(dir.path());
        assert_eq!(settings.voice(), "Zephyr");
        assert_eq!(settings.conciseness, Conciseness::Normal);
        assert_eq!(settings.timezone, "UTC");
        assert_eq!(settings.output_volume(), 1.0);
    }

    #[test]
    fn test_partial_camel_case_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            get_settings_path(dir.path()),
            r#"{"userName":"Sam","targetRole":"Data Engineer","voiceName":"kore","conciseness":"Concise","outputVolume":5}"#,
        )
        .unwrap();
        let settings = read_settings(dir.path());
        assert_eq!(settings.user_name, "Sam");
        assert_eq!(settings.target_role, "Data Engineer");
        assert_eq!(settings.voice(), "Kore");
        assert_eq!(settings.conciseness, Conciseness::Concise);
        assert_eq!(settings.output_volume(), 2.0);
        assert_eq!(settings.handshake_timeout_secs, 15);
    }

    #[test]
    fn test_corrupt_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(get_settings_path(dir.path()), "{{{").unwrap();
        assert_eq!(read_settings(dir.path()).voice_name, "Zephyr");
    }

    #[test]
    fn test_unknown_voice_falls_back() {
        let settings = Settings {
            voice_name: "Robot".into(),
            ..Default::default()
        };
        assert_eq!(settings.voice(), "Zephyr");
    }

    #[test]
    fn test_api_key_precedence() {
        let env = |name: &str| match name {
            "GEMINI_API_KEY" => Some("gemini".to_string()),
            "GOOGLE_API_KEY" => Some("google".to_string()),
            _ => None,
        };
        let mut settings = Settings {
            gemini_api_key: Some(" saved ".into()),
            ..Default::default()
        };
        assert_eq!(settings.api_key_with(env).as_deref(), Some("saved"));

        settings.gemini_api_key = None;
        assert_eq!(settings.api_key_with(env).as_deref(), Some("gemini"));

        let google_only = |name: &str| (name == "GOOGLE_API_KEY").then(|| "google".to_string());
        assert_eq!(settings.api_key_with(google_only).as_deref(), Some("google"));
        assert_eq!(settings.api_key_with(|_| None), None);

        settings.gemini_api_key = Some("   ".into());
        assert_eq!(settings.api_key_with(|_| None), None);
    }

    #[test]
    fn test_model_defaults() {
        let mut settings = Settings::default();
        assert_eq!(settings.live_model(), DEFAULT_LIVE_MODEL);
        assert_eq!(settings.text_model(), DEFAULT_TEXT_MODEL);
        settings.model = Some("  ".into());
        assert_eq!(settings.live_model(), DEFAULT_LIVE_MODEL);
        settings.model = Some("gemini-live-next".into());
        assert_eq!(settings.live_model(), "gemini-live-next");
    }
}
