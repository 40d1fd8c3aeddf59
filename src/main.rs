//! Astra voice core binary.
//!
//! Talks to the host UI via JSON-line IPC on stdin/stdout. This is the entry
//! point that wires the session controller, job tracker and text chat, then
//! runs the command loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use astra_voice::agent::{inbox, text, TextChat};
use astra_voice::audio::{list_input_devices, list_output_devices};
use astra_voice::config::{paths, read_settings};
use astra_voice::ipc::bridge::{emit_error, emit_event, spawn_stdin_reader};
use astra_voice::ipc::{AstraCommand, AstraEvent, AudioDeviceInfo, IpcObserver};
use astra_voice::jobs::file::JsonFileJobStore;
use astra_voice::jobs::{summarize, JobStore};
use astra_voice::logging;
use astra_voice::mail::HostMailSync;
use astra_voice::session::{self, SessionController, SettingsSetup, VoiceSession};
use astra_voice::tools::ToolDispatcher;
use astra_voice::transport::GeminiConnector;

/// How long shutdown waits for the session to release its devices.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

struct Core {
    data_dir: PathBuf,
    session: VoiceSession,
    dispatcher: ToolDispatcher,
    mail: Arc<HostMailSync>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = paths::get_data_dir();
    if let Err(e) = logging::init(&paths::get_log_dir()) {
        logging::init_console();
        warn!("File logging disabled: {:#}", e);
    }

    // Emit starting event immediately so the host knows we're alive.
    emit_event(&AstraEvent::Starting {});
    info!(data_dir = %data_dir.display(), "Astra voice core starting");

    let jobs = Arc::new(JsonFileJobStore::open(&data_dir));
    let mail = Arc::new(HostMailSync::new(|| {
        emit_event(&AstraEvent::MailSyncRequested {});
    }));
    let dispatcher = ToolDispatcher::new(jobs, mail.clone());

    let (events_tx, events_rx) = session::event_channel();
    let controller = SessionController::new(
        Box::new(SettingsSetup::new(data_dir.clone())),
        Box::new(GeminiConnector::new(tokio::runtime::Handle::current())),
        dispatcher.clone(),
        Box::new(IpcObserver),
        events_tx,
    );
    let core = Core {
        data_dir,
        session: controller.handle(),
        dispatcher,
        mail,
    };
    let controller_task = controller.spawn(events_rx);

    let mut cmd_rx = spawn_stdin_reader();

    emit_event(&AstraEvent::Ready {});
    info!("Astra voice core ready");

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(command) => {
                        if !handle_command(&core, command) {
                            break;
                        }
                    }
                    None => {
                        info!("stdin closed, shutting down");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    shutdown(&core.session, controller_task).await;
    info!("Astra voice core shutting down");
    Ok(())
}

/// Handle a single command from the host.
/// Returns `false` if the main loop should exit.
fn handle_command(core: &Core, cmd: AstraCommand) -> bool {
    match cmd {
        AstraCommand::Ping {} => {
            emit_event(&AstraEvent::Pong {});
        }

        AstraCommand::Stop {} => {
            emit_event(&AstraEvent::Stopping {});
            return false;
        }

        AstraCommand::StartSession {} => {
            info!("Session start requested");
            core.session.start();
        }

        AstraCommand::StopSession {} => {
            info!("Session stop requested");
            core.session.stop();
        }

        AstraCommand::GetState {} => {
            emit_event(&AstraEvent::StateChange {
                state: core.session.phase(),
            });
        }

        AstraCommand::GetSpectrum {} => {
            emit_event(&AstraEvent::Spectrum {
                bins: core.session.spectrum(),
            });
        }

        AstraCommand::ListAudioDevices {} => {
            emit_event(&AstraEvent::AudioDevices {
                input: AudioDeviceInfo::from_names(list_input_devices()),
                output: AudioDeviceInfo::from_names(list_output_devices()),
            });
        }

        AstraCommand::ListJobs {} => {
            let text = match core.dispatcher.jobs().list() {
                Ok(jobs) => summarize(&jobs),
                Err(e) => format!("Error: I couldn't read your tracker ({e})."),
            };
            emit_event(&AstraEvent::Jobs { text });
        }

        AstraCommand::ClearJobs {} => {
            let text = match core.dispatcher.jobs().clear() {
                Ok(removed) => {
                    info!(removed, "Tracker cleared");
                    summarize(&[])
                }
                Err(e) => format!("Error: I couldn't clear your tracker ({e})."),
            };
            emit_event(&AstraEvent::Jobs { text });
        }

        AstraCommand::SyncEmails { emails } => {
            info!(count = emails.len(), "Mail sync batch received");
            let settings = read_settings(&core.data_dir);
            let dispatcher = core.dispatcher.clone();
            tokio::spawn(async move {
                let count = match inbox::sync_with_settings(&settings, &dispatcher, &emails).await {
                    Ok(count) => count,
                    Err(e) => {
                        warn!("Mail sync failed: {:#}", e);
                        emit_error(&format!("Mail sync failed: {e}"));
                        0
                    }
                };
                emit_event(&AstraEvent::MailSyncFinished { count });
            });
        }

        AstraCommand::AnalyzeResume {
            resume_text,
            job_description,
        } => {
            let settings = read_settings(&core.data_dir);
            tokio::spawn(async move {
                let result = match TextChat::from_settings(&settings) {
                    Ok(chat) => chat.analyze_resume(&resume_text, &job_description).await,
                    Err(e) => Err(e.into()),
                };
                match result {
                    Ok(analysis) => emit_event(&AstraEvent::ResumeAnalysis { analysis }),
                    Err(e) => {
                        warn!("Resume analysis failed: {:#}", e);
                        emit_error(&format!("Resume analysis failed: {e}"));
                    }
                }
            });
        }

        AstraCommand::SetMailStatus { connected, expired } => {
            core.mail.set_status(connected, expired);
        }

        AstraCommand::SendText { text: message } => {
            let settings = read_settings(&core.data_dir);
            let dispatcher = core.dispatcher.clone();
            tokio::spawn(async move {
                let text = text::reply_to(&settings, &dispatcher, &message).await;
                emit_event(&AstraEvent::TextReply { text });
            });
        }
    }
    true
}

/// Stop any running session and give the controller a moment to release
/// devices.
async fn shutdown(session: &VoiceSession, controller: JoinHandle<()>) {
    session.shutdown();
    if tokio::time::timeout(SHUTDOWN_GRACE, controller).await.is_err() {
        warn!("Session controller did not stop within {:?}", SHUTDOWN_GRACE);
    }
}
