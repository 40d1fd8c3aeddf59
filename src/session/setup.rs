//! Session resources resolved from the settings file.

use std::path::PathBuf;

use tracing::info;

use super::{SessionPlan, SessionSetup};
use crate::audio::capture::CpalMicrophone;
use crate::audio::playback::RodioDevice;
use crate::audio::scheduler::MonotonicClock;
use crate::config::{read_settings, Settings};
use crate::error::SessionError;

/// Re-reads astra-settings.json on every start and wires the real devices.
pub struct SettingsSetup {
    data_dir: PathBuf,
}

impl SettingsSetup {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }
}

impl SessionSetup for SettingsSetup {
    fn prepare(&mut self) -> Result<SessionPlan, SessionError> {
        let settings = read_settings(&self.data_dir);
        plan_for(&settings)
    }
}

fn plan_for(settings: &Settings) -> Result<SessionPlan, SessionError> {
    let agent = settings.agent_config()?;
    info!(
        model = %agent.model,
        voice = %agent.voice_name,
        input = ?settings.input_device,
        output = ?settings.output_device,
        "Session settings loaded"
    );
    Ok(SessionPlan {
        agent,
        input: Box::new(CpalMicrophone::new(settings.input_device.clone())),
        output: Box::new(RodioDevice::new(
            settings.output_device.clone(),
            settings.output_volume(),
        )),
        clock: Box::new(MonotonicClock::new()),
    })
}
